//! The remote data service contract every store depends on

use async_trait::async_trait;
use serde_json::{Map, Value};
use uuid::Uuid;

use super::query::{Filter, Query};

pub type Row = Map<String, Value>;

/// Generic table CRUD with row filters
///
/// Mutations return the affected rows so callers can tell a filtered-out
/// update or delete from a successful one.
#[async_trait]
pub trait DataService: Send + Sync {
    async fn select(&self, table: &str, query: &Query) -> Result<Vec<Row>, DataError>;

    async fn insert(&self, table: &str, rows: Vec<Row>) -> Result<Vec<Row>, DataError>;

    async fn update(&self, table: &str, patch: &Row, filters: &[Filter])
        -> Result<Vec<Row>, DataError>;

    async fn delete(&self, table: &str, filters: &[Filter]) -> Result<Vec<Row>, DataError>;
}

/// The identity primitive: who is logged in right now
#[async_trait]
pub trait AuthProvider: Send + Sync {
    async fn current_user(&self) -> Result<Option<Uuid>, DataError>;
}

/// Identity fixed at construction (verified token, tests)
#[derive(Debug, Clone, Copy)]
pub struct StaticAuth(pub Option<Uuid>);

#[async_trait]
impl AuthProvider for StaticAuth {
    async fn current_user(&self) -> Result<Option<Uuid>, DataError> {
        Ok(self.0)
    }
}

/// Data service errors
#[derive(Debug, thiserror::Error)]
pub enum DataError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("API error (status {status}): {body}")]
    Api { status: u16, body: String },

    #[error("Failed to parse response: {0}")]
    Parse(String),

    #[error("{0}")]
    Injected(String),
}
