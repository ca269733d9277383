//! Application wiring

pub mod state;

pub use state::{AppState, Backend, Session, SessionRegistry};
