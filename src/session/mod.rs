//! Authenticated user sessions
//!
//! - [`manager`] - [`UserSessionManager`]: create, validate, rotate, refresh
//!   and terminate sessions

pub mod manager;

pub use manager::{UserSessionConfig, UserSessionManager};
