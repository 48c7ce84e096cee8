//! Client fingerprinting for session hijacking detection
//!
//! A fingerprint is an HMAC-SHA256 over a fixed, ordered list of normalized
//! client signals. Only the hex digest is ever stored. The signal list is:
//!
//! 1. user agent (whitespace collapsed)
//! 2. primary `Accept-Language` tag (lower-cased)
//! 3. platform: the `Sec-CH-UA-Platform` hint, else derived from the user agent
//! 4. mobile hint (`Sec-CH-UA-Mobile`)
//! 5. negotiated transport (TLS protocol version and ALPN, as reported by the
//!    TLS terminator)
//! 6. client IP, only when [`FingerprintPolicy::include_client_ip`] is set
//!
//! Client IP is off by default: NAT pools, mobile carriers and corporate
//! proxies rotate addresses mid-session and would evict legitimate users.
//!
//! The fingerprint is a secondary binding, never an authentication factor on
//! its own. A mismatch always invalidates the session.

use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::utils::crypto::constant_time_eq;
use crate::utils::user_agent::{
    derive_platform_from_user_agent, normalize_platform_hint, normalize_user_agent,
    primary_language,
};

type HmacSha256 = Hmac<Sha256>;

/// Raw client signals as supplied by the HTTP layer
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientSignals {
    pub user_agent: Option<String>,
    pub accept_language: Option<String>,
    pub platform: Option<String>,
    pub mobile: Option<bool>,
    pub tls_protocol: Option<String>,
    pub alpn: Option<String>,
    pub client_ip: Option<String>,
}

impl ClientSignals {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    #[must_use]
    pub fn with_accept_language(mut self, accept_language: impl Into<String>) -> Self {
        self.accept_language = Some(accept_language.into());
        self
    }

    #[must_use]
    pub fn with_platform(mut self, platform: impl Into<String>) -> Self {
        self.platform = Some(platform.into());
        self
    }

    #[must_use]
    pub const fn with_mobile(mut self, mobile: bool) -> Self {
        self.mobile = Some(mobile);
        self
    }

    #[must_use]
    pub fn with_transport(mut self, tls_protocol: impl Into<String>, alpn: impl Into<String>) -> Self {
        self.tls_protocol = Some(tls_protocol.into());
        self.alpn = Some(alpn.into());
        self
    }

    #[must_use]
    pub fn with_client_ip(mut self, client_ip: impl Into<String>) -> Self {
        self.client_ip = Some(client_ip.into());
        self
    }

    /// Normalized signal values in hashing order
    fn normalized(&self, policy: &FingerprintPolicy) -> [String; 6] {
        let user_agent = self
            .user_agent
            .as_deref()
            .map(normalize_user_agent)
            .unwrap_or_default();

        let platform = self
            .platform
            .as_deref()
            .map(normalize_platform_hint)
            .filter(|p| !p.is_empty())
            .or_else(|| {
                self.user_agent
                    .as_deref()
                    .map(derive_platform_from_user_agent)
            })
            .unwrap_or_default();

        let transport = match (&self.tls_protocol, &self.alpn) {
            (None, None) => String::new(),
            (tls, alpn) => format!(
                "{}/{}",
                tls.as_deref().unwrap_or("").trim().to_ascii_lowercase(),
                alpn.as_deref().unwrap_or("").trim().to_ascii_lowercase()
            ),
        };

        let client_ip = if policy.include_client_ip {
            self.client_ip.as_deref().unwrap_or("").trim().to_string()
        } else {
            String::new()
        };

        [
            user_agent,
            self.accept_language
                .as_deref()
                .and_then(primary_language)
                .unwrap_or_default(),
            platform,
            self.mobile.map_or_else(String::new, |m| u8::from(m).to_string()),
            transport,
            client_ip,
        ]
    }
}

/// Tunable choices for which signals feed the fingerprint
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FingerprintPolicy {
    /// Bind sessions to the client IP as well (off by default)
    #[serde(default)]
    pub include_client_ip: bool,
}

/// Hex-encoded fingerprint hash bound to a user session
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientFingerprint(String);

impl ClientFingerprint {
    /// Wrap an already computed fingerprint hash
    #[must_use]
    pub fn from_hash(hash: impl Into<String>) -> Self {
        Self(hash.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Constant-time comparison against another fingerprint
    #[must_use]
    pub fn matches(&self, other: &Self) -> bool {
        constant_time_eq(self.0.as_bytes(), other.0.as_bytes())
    }
}

impl std::fmt::Display for ClientFingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Computes fingerprints with a server-side key and a fixed policy
#[derive(Clone)]
pub struct Fingerprinter {
    key: Vec<u8>,
    policy: FingerprintPolicy,
}

impl std::fmt::Debug for Fingerprinter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fingerprinter")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl Fingerprinter {
    #[must_use]
    pub fn new(key: &[u8], policy: FingerprintPolicy) -> Self {
        Self {
            key: key.to_vec(),
            policy,
        }
    }

    #[must_use]
    pub const fn policy(&self) -> FingerprintPolicy {
        self.policy
    }

    /// Hash the normalized signals
    ///
    /// Each value is length-prefixed so that moving bytes between adjacent
    /// signals cannot produce the same input.
    #[must_use]
    pub fn fingerprint(&self, signals: &ClientSignals) -> ClientFingerprint {
        // HMAC accepts keys of any length
        let mut mac = <HmacSha256 as Mac>::new_from_slice(&self.key)
            .unwrap_or_else(|_| unreachable!("HMAC-SHA256 accepts any key length"));

        for value in signals.normalized(&self.policy) {
            mac.update(&(value.len() as u64).to_be_bytes());
            mac.update(value.as_bytes());
        }

        ClientFingerprint(format!("{:x}", mac.finalize().into_bytes()))
    }
}
