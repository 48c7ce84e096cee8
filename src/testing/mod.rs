//! Testing utilities for authsession
//!
//! Available to unit tests and, with the `testing` feature, to the
//! integration tests under `tests/`.
//!
//! - [`fixtures`] - pre-wired stores, coordinators, managers and client data
//! - [`mock`] - a scriptable [`TokenRefresher`](crate::oauth::TokenRefresher)
//!   and a fault-injecting [`SessionStore`](crate::store::SessionStore) wrapper
//!
//! ```rust
//! use authsession::testing::TestFixtures;
//!
//! # async fn example() {
//! let store = TestFixtures::memory_store();
//! let sessions = TestFixtures::session_manager(store);
//! let id = sessions
//!     .create("user-1", "google", TestFixtures::fingerprint(), TestFixtures::tokens(3600))
//!     .await
//!     .unwrap();
//! # }
//! ```

pub mod fixtures;
pub mod mock;

pub use fixtures::TestFixtures;
pub use mock::{FaultyStore, MockTokenRefresher};

/// Common test constants
pub mod constants {
    pub const TEST_SUBJECT: &str = "user-123";
    pub const TEST_PROVIDER: &str = "google";
    pub const TEST_USER_AGENT: &str =
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36";
    pub const TEST_LANGUAGE: &str = "en-US,en;q=0.9";
    pub const TEST_CLIENT_IP: &str = "192.168.1.1";
    /// HMAC key for test fingerprints
    pub const TEST_FINGERPRINT_KEY: &[u8] = b"test_key_32_bytes_long_for_test_";
}
