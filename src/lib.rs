//! Household Hub - shared-ownership data layer for household management
//!
//! Pantries, shopping lists and expenses are owned by one user and shared
//! with others through membership edges; friend links connect users. All
//! persistence lives in Supabase; this crate keeps per-user caches
//! consistent with it and gates mutations by ownership.
//!
//! - `store`: data service contract, generic entity/item/friend stores
//! - `household`: concrete records and the per-user store factory
//! - `http`: JSON API exposing the stores to mobile clients

pub mod app;
pub mod config;
pub mod household;
pub mod http;
pub mod store;
pub mod util;
