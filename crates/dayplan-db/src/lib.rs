//! Storage layer for daily plans: row models, typed block metadata,
//! PostgreSQL queries, and connection/migration helpers.

pub mod config;
pub mod models;
pub mod pool;
pub mod queries;
