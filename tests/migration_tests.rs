//! Schema migrations applied to SQLite, plus the revision graph check.

use migration::graph::{GraphProblem, Revision, validate};
use migration::{Migrator, MigratorTrait};
use sea_orm::{ConnectionTrait, Database, DatabaseConnection, Statement};

async fn table_names(db: &DatabaseConnection) -> Vec<String> {
    let rows = db
        .query_all(Statement::from_string(
            db.get_database_backend(),
            "SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name".to_string(),
        ))
        .await
        .unwrap();
    rows.iter()
        .map(|row| row.try_get::<String>("", "name").unwrap())
        .collect()
}

async fn user_columns(db: &DatabaseConnection) -> Vec<String> {
    let rows = db
        .query_all(Statement::from_string(
            db.get_database_backend(),
            "SELECT name FROM pragma_table_info('users')".to_string(),
        ))
        .await
        .unwrap();
    rows.iter()
        .map(|row| row.try_get::<String>("", "name").unwrap())
        .collect()
}

#[tokio::test]
async fn all_migrations_apply_and_report_no_pending() {
    let db = Database::connect("sqlite::memory:").await.unwrap();
    Migrator::up(&db, None).await.unwrap();

    let tables = table_names(&db).await;
    for table in ["companies", "tenants", "users"] {
        assert!(tables.iter().any(|t| t == table), "missing {table}");
    }
    assert!(Migrator::get_pending_migrations(&db).await.unwrap().is_empty());
    assert_eq!(
        Migrator::get_applied_migrations(&db).await.unwrap().len(),
        Migrator::names().len()
    );
    assert!(user_columns(&db).await.iter().any(|c| c == "token_version"));
}

#[tokio::test]
async fn stepping_down_and_up_again_restores_schema() {
    let db = Database::connect("sqlite::memory:").await.unwrap();
    Migrator::up(&db, None).await.unwrap();

    Migrator::down(&db, Some(1)).await.unwrap();
    assert_eq!(Migrator::get_pending_migrations(&db).await.unwrap().len(), 1);
    assert!(!user_columns(&db).await.iter().any(|c| c == "token_version"));

    Migrator::up(&db, Some(1)).await.unwrap();
    assert!(Migrator::get_pending_migrations(&db).await.unwrap().is_empty());
    assert!(user_columns(&db).await.iter().any(|c| c == "lockout_until"));
}

#[test]
fn registered_chain_is_linear() {
    let report = Migrator::validate_graph().expect("valid chain");
    assert_eq!(report.chain.first(), Some(&report.base));
    assert_eq!(report.chain.last(), Some(&report.head));
}

#[test]
fn validator_collects_every_problem() {
    let revisions = vec![
        Revision::new("base", &[]),
        Revision::new("second", &["base"]),
        Revision::new("branch", &["base"]),
        Revision::new("orphan", &["missing"]),
    ];
    let problems = validate(&revisions).unwrap_err();
    assert!(problems.contains(&GraphProblem::BrokenLink {
        revision: "orphan".to_string(),
        missing: "missing".to_string(),
    }));
    assert!(
        problems
            .iter()
            .any(|p| matches!(p, GraphProblem::MultipleHeads(_)))
    );
}
