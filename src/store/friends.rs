//! Friend links: the bilateral variant where the resource is the edge

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;
use uuid::Uuid;

use super::entity::{decode, LoadingGuard};
use super::error::{StoreError, StoreResult};
use super::profiles::ProfileStore;
use super::query::{Direction, Filter, Query};
use super::service::{AuthProvider, DataService, Row};

pub const FRIENDS_TABLE: &str = "friends";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FriendStatus {
    Pending,
    Accepted,
}

/// Row in the friends table; `(requester_id, recipient_id)` is the key
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FriendLink {
    pub id: Uuid,
    pub requester_id: Uuid,
    pub recipient_id: Uuid,
    pub status: FriendStatus,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// A friend link seen from the current user's side
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Friend {
    /// Id of the link row
    pub id: Uuid,
    /// The other user
    pub user_id: Uuid,
    pub email: Option<String>,
    pub status: FriendStatus,
    /// True when the other user sent the invite
    pub incoming: bool,
}


/// Friend store operations
///
/// Every mutation is followed by a full `fetch_friends` instead of a local
/// patch.
#[derive(Clone)]
pub struct FriendStore {
    service: Arc<dyn DataService>,
    auth: Arc<dyn AuthProvider>,
    profiles: ProfileStore,
    friends: Arc<RwLock<Vec<Friend>>>,
    in_flight: Arc<AtomicUsize>,
}

fn participant(user_id: Uuid) -> Filter {
    Filter::or(vec![
        Filter::eq("requester_id", user_id),
        Filter::eq("recipient_id", user_id),
    ])
}

impl FriendStore {
    pub fn new(service: Arc<dyn DataService>, auth: Arc<dyn AuthProvider>) -> Self {
        Self {
            profiles: ProfileStore::new(service.clone()),
            service,
            auth,
            friends: Arc::new(RwLock::new(Vec::new())),
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn friends(&self) -> Vec<Friend> {
        self.friends.read().clone()
    }

    /// Pending invites sent to the current user
    pub fn incoming_invites(&self) -> Vec<Friend> {
        self.friends
            .read()
            .iter()
            .filter(|f| f.incoming && f.status == FriendStatus::Pending)
            .cloned()
            .collect()
    }

    pub fn is_loading(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst) > 0
    }

    pub fn clear(&self) {
        self.friends.write().clear();
    }

    async fn require_user(&self) -> StoreResult<Uuid> {
        self.auth
            .current_user()
            .await?
            .ok_or(StoreError::NotAuthenticated)
    }

    async fn load(&self, user_id: Uuid) -> StoreResult<Vec<Friend>> {
        let query = Query::new()
            .filter(participant(user_id))
            .order_by("created_at", Direction::Desc);
        let rows = self.service.select(FRIENDS_TABLE, &query).await?;
        let links: Vec<FriendLink> = rows.into_iter().map(decode).collect::<StoreResult<_>>()?;

        let others: Vec<Uuid> = links
            .iter()
            .map(|l| {
                if l.requester_id == user_id {
                    l.recipient_id
                } else {
                    l.requester_id
                }
            })
            .collect();
        let emails = self.profiles.emails_for(&others).await?;

        Ok(links
            .into_iter()
            .zip(others)
            .map(|(link, other)| Friend {
                id: link.id,
                user_id: other,
                email: emails.get(&other).cloned(),
                status: link.status,
                incoming: link.recipient_id == user_id,
            })
            .collect())
    }

    /// Reload every link the current user takes part in
    pub async fn fetch_friends(&self) -> StoreResult<Vec<Friend>> {
        let user_id = self.require_user().await?;

        let _loading = LoadingGuard::enter(&self.in_flight);
        let friends = self.load(user_id).await?;

        *self.friends.write() = friends.clone();
        Ok(friends)
    }

    /// Invite the user registered under `email`
    pub async fn send_invite(&self, email: &str) -> StoreResult<Vec<Friend>> {
        let user_id = self.require_user().await?;
        let recipient = self.profiles.resolve(email).await?;

        if recipient == user_id {
            return Err(StoreError::SelfInvite);
        }

        let existing = self
            .service
            .select(
                FRIENDS_TABLE,
                &Query::new().select("id").filter(Filter::or(vec![
                    Filter::And(vec![
                        Filter::eq("requester_id", user_id),
                        Filter::eq("recipient_id", recipient),
                    ]),
                    Filter::And(vec![
                        Filter::eq("requester_id", recipient),
                        Filter::eq("recipient_id", user_id),
                    ]),
                ])),
            )
            .await?;
        if !existing.is_empty() {
            return Err(StoreError::AlreadyFriends);
        }

        let mut row = Row::new();
        row.insert("requester_id".into(), Value::String(user_id.to_string()));
        row.insert("recipient_id".into(), Value::String(recipient.to_string()));
        row.insert("status".into(), Value::String("pending".into()));
        self.service.insert(FRIENDS_TABLE, vec![row]).await?;

        info!(user_id = %user_id, recipient = %recipient, "Friend invite sent");
        self.fetch_friends().await
    }

    /// Accept a pending invite addressed to the current user
    pub async fn accept_invite(&self, id: Uuid) -> StoreResult<Vec<Friend>> {
        let user_id = self.require_user().await?;

        let mut patch = Row::new();
        patch.insert("status".into(), Value::String("accepted".into()));
        let updated = self
            .service
            .update(
                FRIENDS_TABLE,
                &patch,
                &[
                    Filter::eq("id", id),
                    Filter::eq("recipient_id", user_id),
                    Filter::eq("status", "pending"),
                ],
            )
            .await?;
        if updated.is_empty() {
            return Err(StoreError::PermissionDenied);
        }

        info!(user_id = %user_id, link = %id, "Friend invite accepted");
        self.fetch_friends().await
    }

    /// Drop a link (pending or accepted) from either side
    pub async fn remove_friend(&self, id: Uuid) -> StoreResult<Vec<Friend>> {
        let user_id = self.require_user().await?;

        let removed = self
            .service
            .delete(FRIENDS_TABLE, &[Filter::eq("id", id), participant(user_id)])
            .await?;
        if removed.is_empty() {
            return Err(StoreError::NotFound(id));
        }

        info!(user_id = %user_id, link = %id, "Friend removed");
        self.fetch_friends().await
    }
}
