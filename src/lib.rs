#![warn(clippy::pedantic)]
#![warn(clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

/// Version of the authsession crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod auth_flow;
pub mod error;
pub mod fingerprint;
pub mod models;
pub mod oauth;
pub mod services;
pub mod session;
pub mod settings;
pub mod store;
pub mod utils;

// Testing utilities - available for both unit tests and integration tests
#[cfg(any(test, feature = "testing"))]
pub mod testing;

/// Re-export commonly used items
pub use auth_flow::{AuthFlowConfig, AuthFlowCoordinator, AuthFlowStart, CallbackOutcome, HandshakeState};
pub use error::{SessionError, SessionResult};
pub use fingerprint::{ClientFingerprint, ClientSignals, FingerprintPolicy, Fingerprinter};
pub use models::{AuthSessionRecord, SessionTokens, UserSessionRecord};
pub use oauth::{HttpTokenRefresher, RefreshedTokens, TokenRefresher};
pub use services::SessionServices;
pub use session::{UserSessionConfig, UserSessionManager};
pub use settings::{Settings, StoreBackend};
pub use store::{InProcessSessionStore, NetworkedSessionStore, RecordCodec, SessionStore};
