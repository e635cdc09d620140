//! # detecktiv
//!
//! Backend for UK B2B sales intelligence: users and tenants with JWT auth,
//! a company catalogue enriched from Companies House, and the operational
//! tooling (migrations, readiness wait, backups, seeds) behind the
//! `detecktiv` CLI.

pub mod auth;
pub mod backup;
pub mod client;
pub mod companies_house;
pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod mail;
pub mod models;
pub mod rate_limit;
pub mod repositories;
pub mod security;
pub mod seeds;
pub mod server;
pub mod telemetry;
pub use migration;
