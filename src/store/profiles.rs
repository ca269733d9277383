//! User profile lookups (email <-> user id)

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::{StoreError, StoreResult};
use super::query::{Filter, Query};
use super::service::DataService;

pub const PROFILES_TABLE: &str = "profiles";

/// Public profile row
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Profile {
    pub id: Uuid,
    pub email: String,
}

/// Emails are matched trimmed and lowercased
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Profile store operations
#[derive(Clone)]
pub struct ProfileStore {
    service: Arc<dyn DataService>,
}

impl ProfileStore {
    pub fn new(service: Arc<dyn DataService>) -> Self {
        Self { service }
    }

    /// Find a profile by email
    pub async fn find_by_email(&self, email: &str) -> StoreResult<Option<Profile>> {
        let query = Query::new()
            .select("id,email")
            .filter(Filter::eq("email", normalize_email(email)));
        let rows = self.service.select(PROFILES_TABLE, &query).await?;

        match rows.into_iter().next() {
            Some(row) => Ok(Some(serde_json::from_value(row.into())?)),
            None => Ok(None),
        }
    }

    /// Resolve an email to a user id or fail with `UserNotFound`
    pub async fn resolve(&self, email: &str) -> StoreResult<Uuid> {
        self.find_by_email(email)
            .await?
            .map(|p| p.id)
            .ok_or_else(|| StoreError::UserNotFound(email.trim().to_string()))
    }

    /// Display emails for a set of user ids; unknown ids are absent
    pub async fn emails_for(&self, ids: &[Uuid]) -> StoreResult<HashMap<Uuid, String>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let query = Query::new()
            .select("id,email")
            .filter(Filter::is_in("id", ids));
        let rows = self.service.select(PROFILES_TABLE, &query).await?;

        rows.into_iter()
            .map(|row| {
                let profile: Profile = serde_json::from_value(row.into())?;
                Ok((profile.id, profile.email))
            })
            .collect()
    }
}
