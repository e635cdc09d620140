//! Revision graph checks for the migration chain.
//!
//! Every migration names the revision(s) it builds on. A healthy chain has a
//! single base (no parents), a single head (no children), unique ids and no
//! links to revisions that do not exist.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use thiserror::Error;

/// A single migration revision and the revisions it depends on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Revision {
    pub id: String,
    pub down_revisions: Vec<String>,
}

impl Revision {
    pub fn new(id: impl Into<String>, down_revisions: &[&str]) -> Self {
        Self {
            id: id.into(),
            down_revisions: down_revisions.iter().map(|r| r.to_string()).collect(),
        }
    }
}

/// Summary of a valid revision graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphReport {
    pub base: String,
    pub head: String,
    /// Revisions in application order, base first.
    pub chain: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphProblem {
    #[error("no revisions registered")]
    Empty,
    #[error("duplicate revision id '{0}'")]
    DuplicateRevision(String),
    #[error("revision '{revision}' points to missing down revision '{missing}'")]
    BrokenLink { revision: String, missing: String },
    #[error("no base revision (every revision has a parent)")]
    NoBase,
    #[error("multiple base revisions: {}", .0.join(", "))]
    MultipleBases(Vec<String>),
    #[error("no head revision (the graph contains a cycle)")]
    NoHead,
    #[error("multiple heads: {}", .0.join(", "))]
    MultipleHeads(Vec<String>),
    #[error("revision '{0}' is registered out of name order")]
    OutOfOrder(String),
    #[error("revision '{0}' is part of a cycle")]
    Cycle(String),
}

/// Validates a set of revisions, collecting every problem found.
pub fn validate(revisions: &[Revision]) -> Result<GraphReport, Vec<GraphProblem>> {
    if revisions.is_empty() {
        return Err(vec![GraphProblem::Empty]);
    }

    let mut problems = Vec::new();
    let mut by_id: BTreeMap<&str, &Revision> = BTreeMap::new();

    for revision in revisions {
        if by_id.insert(revision.id.as_str(), revision).is_some() {
            problems.push(GraphProblem::DuplicateRevision(revision.id.clone()));
        }
    }

    let mut children: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for revision in by_id.values() {
        for parent in &revision.down_revisions {
            if by_id.contains_key(parent.as_str()) {
                children
                    .entry(parent.as_str())
                    .or_default()
                    .push(revision.id.as_str());
            } else {
                problems.push(GraphProblem::BrokenLink {
                    revision: revision.id.clone(),
                    missing: parent.clone(),
                });
            }
        }
    }

    let bases: Vec<String> = by_id
        .values()
        .filter(|r| r.down_revisions.is_empty())
        .map(|r| r.id.clone())
        .collect();
    match bases.len() {
        0 => problems.push(GraphProblem::NoBase),
        1 => {}
        _ => problems.push(GraphProblem::MultipleBases(bases.clone())),
    }

    let heads: Vec<String> = by_id
        .keys()
        .filter(|id| !children.contains_key(*id))
        .map(|id| id.to_string())
        .collect();
    match heads.len() {
        0 => problems.push(GraphProblem::NoHead),
        1 => {}
        _ => problems.push(GraphProblem::MultipleHeads(heads.clone())),
    }

    let chain = topological_order(&by_id, &children);
    if chain.len() < by_id.len() {
        let ordered: BTreeSet<&str> = chain.iter().map(String::as_str).collect();
        for id in by_id.keys().filter(|id| !ordered.contains(*id)) {
            problems.push(GraphProblem::Cycle(id.to_string()));
        }
    }

    if !problems.is_empty() {
        return Err(problems);
    }

    Ok(GraphReport {
        base: bases[0].clone(),
        head: heads[0].clone(),
        chain,
    })
}

fn topological_order(
    by_id: &BTreeMap<&str, &Revision>,
    children: &BTreeMap<&str, Vec<&str>>,
) -> Vec<String> {
    let mut pending: BTreeMap<&str, usize> = by_id
        .values()
        .map(|r| {
            let known = r
                .down_revisions
                .iter()
                .filter(|p| by_id.contains_key(p.as_str()))
                .count();
            (r.id.as_str(), known)
        })
        .collect();

    let mut queue: VecDeque<&str> = pending
        .iter()
        .filter(|(_, count)| **count == 0)
        .map(|(id, _)| *id)
        .collect();

    let mut order = Vec::with_capacity(by_id.len());
    while let Some(id) = queue.pop_front() {
        order.push(id.to_string());
        for child in children.get(id).into_iter().flatten() {
            if let Some(count) = pending.get_mut(child) {
                *count -= 1;
                if *count == 0 {
                    queue.push_back(*child);
                }
            }
        }
    }

    order
}

/// Builds a linear chain where each revision depends on the one before it.
pub fn linear_chain<I, S>(ids: I) -> Vec<Revision>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut previous: Option<String> = None;
    ids.into_iter()
        .map(|id| {
            let id = id.into();
            let revision = Revision {
                id: id.clone(),
                down_revisions: previous.iter().cloned().collect(),
            };
            previous = Some(id);
            revision
        })
        .collect()
}
