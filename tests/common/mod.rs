#![allow(dead_code)]

use std::sync::Arc;

use household_hub::household::Household;
use household_hub::store::{MemoryService, StaticAuth};
use serde_json::json;
use uuid::Uuid;

pub fn memory() -> Arc<MemoryService> {
    Arc::new(MemoryService::new())
}

/// Household acting as `user`
pub fn household(service: &Arc<MemoryService>, user: Uuid) -> Household {
    Household::new(service.clone(), Arc::new(StaticAuth(Some(user))))
}

/// Register a user profile and return its id
pub fn register(service: &MemoryService, email: &str) -> Uuid {
    let id = Uuid::new_v4();
    service.seed("profiles", vec![json!({"id": id, "email": email})]);
    id
}

pub fn seed_pantry(service: &MemoryService, owner: Uuid, name: &str) -> Uuid {
    let id = Uuid::new_v4();
    service.seed(
        "pantries",
        vec![json!({"id": id, "owner_id": owner, "name": name})],
    );
    id
}

pub fn share_pantry(service: &MemoryService, pantry: Uuid, user: Uuid) {
    service.seed(
        "pantry_members",
        vec![json!({"pantry_id": pantry, "user_id": user, "role": "member"})],
    );
}
