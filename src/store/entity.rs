//! Generic shared-ownership entity store
//!
//! One instance per resource table. The store keeps a local cache of the
//! resources the current user may act on (owned plus shared through a
//! membership edge table) and reconciles it after every confirmed
//! mutation. The server remains the authorization boundary: every
//! mutation is filtered by the owner column as well as the id.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::error::{StoreError, StoreResult};
use super::members::MemberList;
use super::profiles::ProfileStore;
use super::query::{Direction, Filter, Query};
use super::service::{AuthProvider, DataService, Row};

/// A top-level owned record
pub trait Resource: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Client-supplied fields for `add`; id and owner are assigned by the store
    type Draft: Serialize + DeserializeOwned + Send + Sync;

    fn id(&self) -> Uuid;
    fn owner_id(&self) -> Uuid;
}

/// Role carried by a membership edge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Owner,
    Member,
    Viewer,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Owner => "owner",
            Role::Member => "member",
            Role::Viewer => "viewer",
        }
    }
}

/// Where a resource's membership edges live
#[derive(Debug, Clone)]
pub struct EdgeSpec {
    pub table: &'static str,
    pub resource_column: &'static str,
    pub user_column: &'static str,
    /// Role written on edges created by this store
    pub role: Role,
}

/// Table layout for one resource type
#[derive(Debug, Clone)]
pub struct ResourceSpec {
    pub table: &'static str,
    pub owner_column: &'static str,
    pub edges: EdgeSpec,
    pub order: Option<(&'static str, Direction)>,
}

/// Cache entry: the resource plus whether the current user owns it
#[derive(Debug, Clone, Serialize)]
pub struct Cached<R> {
    #[serde(flatten)]
    pub resource: R,
    pub is_owner: bool,
}

/// Result of a fetch that did not fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Cache replaced with this many entries
    Applied(usize),
    /// A newer fetch or a cancel started meanwhile; result discarded
    Superseded,
}

pub(crate) struct StoreState<R> {
    pub(crate) items: Vec<Cached<R>>,
    pub(crate) members: Option<MemberList>,
}

impl<R> Default for StoreState<R> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            members: None,
        }
    }
}

/// Counts one fetch as in flight until dropped, including early returns
pub(crate) struct LoadingGuard<'a> {
    in_flight: &'a AtomicUsize,
}

impl<'a> LoadingGuard<'a> {
    pub(crate) fn enter(in_flight: &'a AtomicUsize) -> Self {
        in_flight.fetch_add(1, Ordering::SeqCst);
        Self { in_flight }
    }
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct EntityStore<R> {
    pub(crate) service: Arc<dyn DataService>,
    auth: Arc<dyn AuthProvider>,
    pub(crate) profiles: ProfileStore,
    pub(crate) spec: ResourceSpec,
    pub(crate) state: Arc<RwLock<StoreState<R>>>,
    in_flight: Arc<AtomicUsize>,
    epoch: Arc<AtomicU64>,
}

impl<R> Clone for EntityStore<R> {
    fn clone(&self) -> Self {
        Self {
            service: self.service.clone(),
            auth: self.auth.clone(),
            profiles: self.profiles.clone(),
            spec: self.spec.clone(),
            state: self.state.clone(),
            in_flight: self.in_flight.clone(),
            epoch: self.epoch.clone(),
        }
    }
}

pub(crate) fn to_row<T: Serialize>(value: &T) -> StoreResult<Row> {
    match serde_json::to_value(value)? {
        Value::Object(row) => Ok(row),
        other => Err(StoreError::Decode(format!("expected an object, got {}", other))),
    }
}

pub(crate) fn decode<T: DeserializeOwned>(row: Row) -> StoreResult<T> {
    Ok(serde_json::from_value(Value::Object(row))?)
}

/// Shallow merge of `patch` into `value`
pub(crate) fn merge<T: Serialize + DeserializeOwned>(value: &T, patch: &Row) -> StoreResult<T> {
    let mut row = to_row(value)?;
    for (k, v) in patch {
        row.insert(k.clone(), v.clone());
    }
    decode(row)
}

/// Apply `patch` to `value` without touching the server; ill-typed fields are rejected
pub(crate) fn validate_patch<T: Serialize + DeserializeOwned>(value: &T, patch: &Row) -> StoreResult<T> {
    merge(value, patch).map_err(|err| match err {
        StoreError::Decode(msg) => StoreError::InvalidPatch(msg),
        other => other,
    })
}

pub(crate) fn uuid_cell(row: &Row, column: &str) -> StoreResult<Uuid> {
    row.get(column)
        .and_then(Value::as_str)
        .and_then(|s| Uuid::parse_str(s).ok())
        .ok_or_else(|| StoreError::Decode(format!("missing or invalid `{}`", column)))
}

/// Distinct sharing targets, never including the owner
fn sharing_targets(shared_with: &[Uuid], owner: Uuid) -> Vec<Uuid> {
    let mut seen = BTreeSet::new();
    shared_with
        .iter()
        .copied()
        .filter(|id| *id != owner && seen.insert(*id))
        .collect()
}

impl<R: Resource> EntityStore<R> {
    pub fn new(
        service: Arc<dyn DataService>,
        auth: Arc<dyn AuthProvider>,
        spec: ResourceSpec,
    ) -> Self {
        Self {
            profiles: ProfileStore::new(service.clone()),
            service,
            auth,
            spec,
            state: Arc::new(RwLock::new(StoreState::default())),
            in_flight: Arc::new(AtomicUsize::new(0)),
            epoch: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn spec(&self) -> &ResourceSpec {
        &self.spec
    }

    /// Snapshot of the cache
    pub fn items(&self) -> Vec<Cached<R>> {
        self.state.read().items.clone()
    }

    pub fn get(&self, id: Uuid) -> Option<Cached<R>> {
        self.state
            .read()
            .items
            .iter()
            .find(|c| c.resource.id() == id)
            .cloned()
    }

    pub fn is_loading(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst) > 0
    }

    /// Invalidate fetches still in flight; their results will be dropped
    pub fn cancel_pending(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
    }

    /// Cancel and forget everything (logout)
    pub fn clear(&self) {
        self.cancel_pending();
        let mut state = self.state.write();
        state.items.clear();
        state.members = None;
    }

    pub(crate) async fn require_user(&self) -> StoreResult<Uuid> {
        self.auth
            .current_user()
            .await?
            .ok_or(StoreError::NotAuthenticated)
    }

    fn owned_by(&self, id: Uuid, user_id: Uuid) -> [Filter; 2] {
        [
            Filter::eq("id", id),
            Filter::eq(self.spec.owner_column, user_id),
        ]
    }

    pub(crate) fn edge_filters(&self, resource_id: Uuid, user_id: Uuid) -> [Filter; 2] {
        let edges = &self.spec.edges;
        [
            Filter::eq(edges.resource_column, resource_id),
            Filter::eq(edges.user_column, user_id),
        ]
    }

    /// The resource as stored, if `user_id` owns it
    async fn owned_row(&self, id: Uuid, user_id: Uuid) -> StoreResult<Option<R>> {
        let rows = self
            .service
            .select(self.spec.table, &Query::new().filters(self.owned_by(id, user_id)))
            .await?;
        rows.into_iter().next().map(decode).transpose()
    }

    /// Fail with `PermissionDenied` unless `user_id` owns the resource
    ///
    /// A cached copy owned by someone else short-circuits without a request;
    /// otherwise the owner-filtered read on the server decides.
    pub async fn ensure_owner(&self, id: Uuid, user_id: Uuid) -> StoreResult<()> {
        if self
            .get(id)
            .map_or(false, |c| c.resource.owner_id() != user_id)
        {
            return Err(StoreError::PermissionDenied);
        }
        match self.owned_row(id, user_id).await? {
            Some(_) => Ok(()),
            None => Err(StoreError::PermissionDenied),
        }
    }

    /// Fail with `PermissionDenied` unless `user_id` owns the resource or holds an edge to it
    pub async fn ensure_visible(&self, id: Uuid, user_id: Uuid) -> StoreResult<()> {
        if self.get(id).is_some() {
            return Ok(());
        }
        if self.owned_row(id, user_id).await?.is_some() {
            return Ok(());
        }

        let edge = self
            .service
            .select(
                self.spec.edges.table,
                &Query::new()
                    .select(self.spec.edges.user_column)
                    .filters(self.edge_filters(id, user_id)),
            )
            .await?;
        if edge.is_empty() {
            warn!(table = self.spec.table, id = %id, user_id = %user_id, "Access rejected: not visible");
            return Err(StoreError::PermissionDenied);
        }
        Ok(())
    }

    /// Ids of resources shared with `user_id` through membership edges
    async fn shared_ids(&self, user_id: Uuid) -> StoreResult<BTreeSet<Uuid>> {
        let edges = &self.spec.edges;
        let query = Query::new()
            .select(edges.resource_column)
            .filter(Filter::eq(edges.user_column, user_id));
        let rows = self.service.select(edges.table, &query).await?;

        rows.iter()
            .map(|row| uuid_cell(row, edges.resource_column))
            .collect()
    }

    /// Load every resource visible to `user_id` and replace the cache
    pub async fn fetch_all(&self, user_id: Uuid) -> StoreResult<FetchOutcome> {
        self.fetch_all_where(user_id, Vec::new()).await
    }

    /// Like `fetch_all`, with extra filters AND-ed onto the resource read
    pub async fn fetch_all_where(
        &self,
        user_id: Uuid,
        extra: Vec<Filter>,
    ) -> StoreResult<FetchOutcome> {
        let ticket = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        let _loading = LoadingGuard::enter(&self.in_flight);

        let shared = self.shared_ids(user_id).await?;

        let owned = Filter::eq(self.spec.owner_column, user_id);
        let visibility = if shared.is_empty() {
            owned
        } else {
            Filter::or(vec![owned, Filter::is_in("id", &shared)])
        };

        let mut query = Query::new().filter(visibility).filters(extra);
        if let Some((column, direction)) = self.spec.order {
            query = query.order_by(column, direction);
        }

        let rows = self.service.select(self.spec.table, &query).await?;

        let mut items = Vec::with_capacity(rows.len());
        for row in rows {
            let resource: R = decode(row)?;
            let is_owner = resource.owner_id() == user_id;
            if is_owner || shared.contains(&resource.id()) {
                items.push(Cached { resource, is_owner });
            } else {
                warn!(
                    table = self.spec.table,
                    id = %resource.id(),
                    "Dropping row not visible to user"
                );
            }
        }

        if self.epoch.load(Ordering::SeqCst) != ticket {
            debug!(table = self.spec.table, "Fetch superseded, discarding result");
            return Ok(FetchOutcome::Superseded);
        }

        let count = items.len();
        self.state.write().items = items;
        debug!(table = self.spec.table, user_id = %user_id, count, "Cache replaced");
        Ok(FetchOutcome::Applied(count))
    }

    pub(crate) fn edge_row(&self, resource_id: Uuid, user_id: Uuid) -> Row {
        let edges = &self.spec.edges;
        let mut row = Row::new();
        row.insert(
            edges.resource_column.to_string(),
            Value::String(resource_id.to_string()),
        );
        row.insert(
            edges.user_column.to_string(),
            Value::String(user_id.to_string()),
        );
        row.insert("role".to_string(), Value::String(edges.role.as_str().to_string()));
        row
    }

    pub(crate) async fn insert_edges(&self, resource_id: Uuid, users: &[Uuid]) -> StoreResult<()> {
        if users.is_empty() {
            return Ok(());
        }
        let rows = users
            .iter()
            .map(|user| self.edge_row(resource_id, *user))
            .collect();
        self.service.insert(self.spec.edges.table, rows).await?;
        Ok(())
    }

    /// Create a resource owned by the current user, shared with `shared_with`
    ///
    /// If the edges cannot be written the new resource is deleted again and
    /// the whole operation fails.
    pub async fn add(&self, draft: &R::Draft, shared_with: &[Uuid]) -> StoreResult<Cached<R>> {
        let user_id = self.require_user().await?;

        let mut row = to_row(draft)?;
        row.remove("id");
        row.insert(
            self.spec.owner_column.to_string(),
            Value::String(user_id.to_string()),
        );

        let inserted = self.service.insert(self.spec.table, vec![row]).await?;
        let created: R = decode(
            inserted
                .into_iter()
                .next()
                .ok_or_else(|| StoreError::Decode("no row returned from insert".into()))?,
        )?;

        let targets = sharing_targets(shared_with, user_id);
        if let Err(err) = self.insert_edges(created.id(), &targets).await {
            warn!(
                table = self.spec.table,
                id = %created.id(),
                error = %err,
                "Sharing failed, rolling back insert"
            );
            self.rollback_insert(created.id(), user_id).await;
            return Err(err);
        }

        let entry = Cached {
            resource: created,
            is_owner: true,
        };
        self.state.write().items.insert(0, entry.clone());

        info!(
            table = self.spec.table,
            id = %entry.resource.id(),
            user_id = %user_id,
            shared = targets.len(),
            "Resource created"
        );
        Ok(entry)
    }

    async fn rollback_insert(&self, id: Uuid, user_id: Uuid) {
        if let Err(err) = self
            .service
            .delete(self.spec.table, &self.owned_by(id, user_id))
            .await
        {
            error!(
                table = self.spec.table,
                id = %id,
                error = %err,
                "Rollback of insert failed, resource left unshared"
            );
        }
    }

    /// Strip fields an update must never touch
    fn sanitize_patch(&self, mut patch: Row) -> Row {
        patch.remove("id");
        patch.remove(self.spec.owner_column);
        patch.remove("is_owner");
        patch
    }

    /// Patch a resource owned by `user_id` and replace its sharing set
    ///
    /// The patch is checked against the cached (or freshly read) resource
    /// before anything is written; a field of the wrong type is
    /// `InvalidPatch`. The update is filtered by owner on the server; if it
    /// matches nothing the caller is not the owner. Edge replacement is
    /// total: all existing edges go, `shared_with` comes in. A failed
    /// replacement restores the previous edges and field values before the
    /// error is returned.
    pub async fn update(
        &self,
        id: Uuid,
        user_id: Uuid,
        patch: Row,
        shared_with: &[Uuid],
    ) -> StoreResult<()> {
        let patch = self.sanitize_patch(patch);
        let edges = &self.spec.edges;

        let previous = match self.get(id) {
            Some(entry) if entry.resource.owner_id() != user_id => {
                warn!(table = self.spec.table, id = %id, user_id = %user_id, "Update rejected: not owner");
                return Err(StoreError::PermissionDenied);
            }
            Some(entry) => entry.resource,
            None => self
                .owned_row(id, user_id)
                .await?
                .ok_or(StoreError::PermissionDenied)?,
        };
        let patched = validate_patch(&previous, &patch)?;

        let matched = if patch.is_empty() {
            self.service
                .select(
                    self.spec.table,
                    &Query::new().select("id").filters(self.owned_by(id, user_id)),
                )
                .await?
        } else {
            self.service
                .update(self.spec.table, &patch, &self.owned_by(id, user_id))
                .await?
        };

        if matched.is_empty() {
            warn!(table = self.spec.table, id = %id, user_id = %user_id, "Update rejected: not owner");
            return Err(StoreError::PermissionDenied);
        }

        let previous_edges = match self
            .service
            .select(
                edges.table,
                &Query::new().filter(Filter::eq(edges.resource_column, id)),
            )
            .await
        {
            Ok(rows) => rows,
            Err(err) => {
                self.restore_fields(id, user_id, &patch, &previous).await;
                return Err(err.into());
            }
        };

        let targets = sharing_targets(shared_with, user_id);
        let replaced = match self
            .service
            .delete(edges.table, &[Filter::eq(edges.resource_column, id)])
            .await
        {
            Ok(_) => self.insert_edges(id, &targets).await.map_err(|e| (e, true)),
            Err(e) => Err((e.into(), false)),
        };

        if let Err((err, edges_removed)) = replaced {
            warn!(table = self.spec.table, id = %id, error = %err, "Sharing update failed, restoring");
            if edges_removed && !previous_edges.is_empty() {
                if let Err(restore_err) = self.service.insert(edges.table, previous_edges).await {
                    error!(table = edges.table, id = %id, error = %restore_err, "Restoring edges failed");
                }
            }
            self.restore_fields(id, user_id, &patch, &previous).await;
            return Err(err);
        }

        {
            let mut state = self.state.write();
            if let Some(entry) = state.items.iter_mut().find(|c| c.resource.id() == id) {
                entry.resource = patched;
            }
        }

        info!(
            table = self.spec.table,
            id = %id,
            shared = targets.len(),
            "Resource updated"
        );
        Ok(())
    }

    async fn restore_fields(&self, id: Uuid, user_id: Uuid, patch: &Row, previous: &R) {
        if patch.is_empty() {
            return;
        }

        let before = match to_row(previous) {
            Ok(row) => row,
            Err(err) => {
                error!(table = self.spec.table, id = %id, error = %err, "Cannot encode previous copy");
                return;
            }
        };
        let revert: Row = patch
            .keys()
            .map(|k| (k.clone(), before.get(k).cloned().unwrap_or(Value::Null)))
            .collect();

        if let Err(err) = self
            .service
            .update(self.spec.table, &revert, &self.owned_by(id, user_id))
            .await
        {
            error!(table = self.spec.table, id = %id, error = %err, "Restoring fields failed");
        }
    }

    /// Delete a resource; only its owner may
    ///
    /// The ownership check runs against the cache first and short-circuits
    /// without a request; the server-side owner filter is still applied.
    pub async fn delete(&self, id: Uuid, user_id: Uuid) -> StoreResult<()> {
        let entry = self.get(id).ok_or(StoreError::NotFound(id))?;
        if entry.resource.owner_id() != user_id {
            warn!(table = self.spec.table, id = %id, user_id = %user_id, "Delete rejected: not owner");
            return Err(StoreError::PermissionDenied);
        }

        let removed = self
            .service
            .delete(self.spec.table, &self.owned_by(id, user_id))
            .await?;
        if removed.is_empty() {
            return Err(StoreError::PermissionDenied);
        }

        let mut state = self.state.write();
        state.items.retain(|c| c.resource.id() != id);
        if state.members.as_ref().map_or(false, |m| m.resource_id == id) {
            state.members = None;
        }

        info!(table = self.spec.table, id = %id, "Resource deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sharing_targets_drop_owner_and_duplicates() {
        let owner = Uuid::new_v4();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        assert_eq!(sharing_targets(&[a, owner, b, a], owner), vec![a, b]);
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Thing {
        id: Uuid,
        name: String,
        size: u32,
    }

    #[test]
    fn merge_is_shallow() {
        let thing = Thing {
            id: Uuid::new_v4(),
            name: "a".into(),
            size: 1,
        };
        let mut patch = Row::new();
        patch.insert("size".into(), Value::from(5));
        let merged = merge(&thing, &patch).unwrap();
        assert_eq!(merged.name, "a");
        assert_eq!(merged.size, 5);
        assert_eq!(merged.id, thing.id);
    }
}
