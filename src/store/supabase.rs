//! Supabase REST (PostgREST) and auth client acting on behalf of one user

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::{Client, RequestBuilder, Response};
use serde::Deserialize;
use uuid::Uuid;

use super::query::{Filter, Query};
use super::service::{AuthProvider, DataError, DataService, Row};
use crate::config::Config;

/// Supabase client for user-scoped database operations
///
/// Requests carry the user's access token so row-level security on the
/// server stays the authorization boundary.
#[derive(Clone)]
pub struct SupabaseClient {
    client: Client,
    base_url: String,
    anon_key: String,
    access_token: Arc<RwLock<Option<String>>>,
}

impl SupabaseClient {
    pub fn new(config: &Config) -> Self {
        Self::with_base_url(&config.supabase_url, &config.supabase_anon_key)
    }

    pub fn with_base_url(base_url: &str, anon_key: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            anon_key: anon_key.to_string(),
            access_token: Arc::new(RwLock::new(None)),
        }
    }

    /// Client bound to a user's access token
    pub fn for_user(&self, access_token: &str) -> Self {
        let scoped = Self {
            client: self.client.clone(),
            base_url: self.base_url.clone(),
            anon_key: self.anon_key.clone(),
            access_token: Arc::new(RwLock::new(None)),
        };
        scoped.set_access_token(Some(access_token.to_string()));
        scoped
    }

    /// Swap the bearer token (refreshed sessions, logout)
    pub fn set_access_token(&self, token: Option<String>) {
        *self.access_token.write() = token;
    }

    /// Get the REST API URL for a table
    fn rest_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    fn auth_url(&self) -> String {
        format!("{}/auth/v1/user", self.base_url)
    }

    /// Attach apikey and bearer headers
    fn authorize(&self, builder: RequestBuilder) -> RequestBuilder {
        let bearer = self
            .access_token
            .read()
            .clone()
            .unwrap_or_else(|| self.anon_key.clone());

        builder
            .header("apikey", &self.anon_key)
            .header("Authorization", format!("Bearer {}", bearer))
            .header("Content-Type", "application/json")
    }

    async fn rows(response: Response) -> Result<Vec<Row>, DataError> {
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(DataError::Api { status: status.as_u16(), body });
        }

        response
            .json::<Vec<Row>>()
            .await
            .map_err(|e| DataError::Parse(e.to_string()))
    }
}

fn filter_params(filters: &[Filter]) -> Vec<(String, String)> {
    filters.iter().map(Filter::to_param).collect()
}

#[async_trait]
impl DataService for SupabaseClient {
    async fn select(&self, table: &str, query: &Query) -> Result<Vec<Row>, DataError> {
        let response = self
            .authorize(self.client.get(self.rest_url(table)))
            .query(&query.to_params())
            .send()
            .await
            .map_err(DataError::Request)?;

        Self::rows(response).await
    }

    async fn insert(&self, table: &str, rows: Vec<Row>) -> Result<Vec<Row>, DataError> {
        let response = self
            .authorize(self.client.post(self.rest_url(table)))
            .header("Prefer", "return=representation")
            .json(&rows)
            .send()
            .await
            .map_err(DataError::Request)?;

        Self::rows(response).await
    }

    async fn update(
        &self,
        table: &str,
        patch: &Row,
        filters: &[Filter],
    ) -> Result<Vec<Row>, DataError> {
        let response = self
            .authorize(self.client.patch(self.rest_url(table)))
            .header("Prefer", "return=representation")
            .query(&filter_params(filters))
            .json(patch)
            .send()
            .await
            .map_err(DataError::Request)?;

        Self::rows(response).await
    }

    async fn delete(&self, table: &str, filters: &[Filter]) -> Result<Vec<Row>, DataError> {
        let response = self
            .authorize(self.client.delete(self.rest_url(table)))
            .header("Prefer", "return=representation")
            .query(&filter_params(filters))
            .send()
            .await
            .map_err(DataError::Request)?;

        Self::rows(response).await
    }
}

#[derive(Debug, Deserialize)]
struct AuthUser {
    id: Uuid,
}

#[async_trait]
impl AuthProvider for SupabaseClient {
    async fn current_user(&self) -> Result<Option<Uuid>, DataError> {
        if self.access_token.read().is_none() {
            return Ok(None);
        }

        let response = self
            .authorize(self.client.get(self.auth_url()))
            .send()
            .await
            .map_err(DataError::Request)?;

        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Ok(None);
        }

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(DataError::Api { status: status.as_u16(), body });
        }

        let user: AuthUser = response
            .json()
            .await
            .map_err(|e| DataError::Parse(e.to_string()))?;
        Ok(Some(user.id))
    }
}
