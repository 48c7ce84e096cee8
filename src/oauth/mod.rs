//! Identity provider collaborators
//!
//! The code-for-token exchange happens outside this crate. What the session
//! lifecycle needs from the provider is the refresh-token grant, expressed as
//! the [`TokenRefresher`] trait.

pub mod refresher;

pub use refresher::{HttpTokenRefresher, RefreshedTokens, TokenRefresher};
