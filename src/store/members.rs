//! Membership side-cache and member management for entity stores

use serde::Serialize;
use serde_json::Value;
use tracing::info;
use uuid::Uuid;

use super::entity::{uuid_cell, EntityStore, Resource, Role};
use super::error::{StoreError, StoreResult};
use super::query::{Filter, Query};

/// A user with access to a resource through an edge
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Member {
    pub user_id: Uuid,
    pub email: Option<String>,
    pub role: Role,
}

/// Members loaded for one resource
#[derive(Debug, Clone)]
pub struct MemberList {
    pub resource_id: Uuid,
    pub members: Vec<Member>,
}

impl<R: Resource> EntityStore<R> {
    /// Members of whichever resource was last loaded with `fetch_members`
    pub fn members(&self) -> Option<MemberList> {
        self.state.read().members.clone()
    }

    /// Load the edges of one resource into the members side-cache
    ///
    /// Only the owner and the members themselves may list them.
    pub async fn fetch_members(&self, resource_id: Uuid) -> StoreResult<Vec<Member>> {
        let user_id = self.require_user().await?;
        self.ensure_visible(resource_id, user_id).await?;
        self.load_members(resource_id).await
    }

    async fn load_members(&self, resource_id: Uuid) -> StoreResult<Vec<Member>> {
        let edges = &self.spec.edges;
        let query = Query::new().filter(Filter::eq(edges.resource_column, resource_id));
        let rows = self.service.select(edges.table, &query).await?;

        let mut parsed = Vec::with_capacity(rows.len());
        for row in &rows {
            let user_id = uuid_cell(row, edges.user_column)?;
            let role = match row.get("role") {
                Some(v @ Value::String(_)) => serde_json::from_value(v.clone())?,
                _ => edges.role,
            };
            parsed.push((user_id, role));
        }

        let ids: Vec<Uuid> = parsed.iter().map(|(id, _)| *id).collect();
        let emails = self.profiles.emails_for(&ids).await?;

        let members: Vec<Member> = parsed
            .into_iter()
            .map(|(user_id, role)| Member {
                email: emails.get(&user_id).cloned(),
                user_id,
                role,
            })
            .collect();

        self.state.write().members = Some(MemberList {
            resource_id,
            members: members.clone(),
        });
        Ok(members)
    }

    /// Share a resource with the user registered under `email`; owner only
    pub async fn add_member(&self, resource_id: Uuid, email: &str) -> StoreResult<Vec<Member>> {
        let acting = self.require_user().await?;
        self.ensure_owner(resource_id, acting).await?;
        let user_id = self.profiles.resolve(email).await?;

        if user_id == acting {
            return Err(StoreError::AlreadyMember);
        }

        let existing = self
            .service
            .select(
                self.spec.edges.table,
                &Query::new().filters(self.edge_filters(resource_id, user_id)),
            )
            .await?;
        if !existing.is_empty() {
            return Err(StoreError::AlreadyMember);
        }

        self.insert_edges(resource_id, &[user_id]).await?;
        info!(table = self.spec.edges.table, resource_id = %resource_id, user_id = %user_id, "Member added");

        self.load_members(resource_id).await
    }

    /// Revoke the access of the user registered under `email`; owner only
    pub async fn remove_member(&self, resource_id: Uuid, email: &str) -> StoreResult<Vec<Member>> {
        let acting = self.require_user().await?;
        self.ensure_owner(resource_id, acting).await?;
        let user_id = self.profiles.resolve(email).await?;

        let existing = self
            .service
            .select(
                self.spec.edges.table,
                &Query::new().filters(self.edge_filters(resource_id, user_id)),
            )
            .await?;
        if existing.is_empty() {
            return Err(StoreError::MemberNotFound);
        }

        self.service
            .delete(self.spec.edges.table, &self.edge_filters(resource_id, user_id))
            .await?;
        info!(table = self.spec.edges.table, resource_id = %resource_id, user_id = %user_id, "Member removed");

        self.load_members(resource_id).await
    }
}
