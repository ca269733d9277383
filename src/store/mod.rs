//! Data access: the remote data service contract and the stores built on it

pub mod entity;
pub mod error;
pub mod friends;
pub mod items;
pub mod members;
pub mod memory;
pub mod profiles;
pub mod query;
pub mod service;
pub mod supabase;

pub use entity::{Cached, EdgeSpec, EntityStore, FetchOutcome, Resource, ResourceSpec, Role};
pub use error::{StoreError, StoreResult};
pub use friends::{Friend, FriendLink, FriendStatus, FriendStore};
pub use items::{ChildItem, ItemSpec, ItemStore, QuantityPolicy};
pub use members::{Member, MemberList};
pub use memory::MemoryService;
pub use profiles::{Profile, ProfileStore};
pub use query::{Direction, Filter, Query};
pub use service::{AuthProvider, DataError, DataService, Row, StaticAuth};
pub use supabase::SupabaseClient;
