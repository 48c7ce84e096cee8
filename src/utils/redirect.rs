// Post-login redirect validation
use log::{debug, warn};

use crate::error::{SessionError, SessionResult};

const MAX_REDIRECT_LENGTH: usize = 2048;

/// Validate a post-authentication redirect target before it is stored
///
/// Only same-origin relative paths are accepted: a single leading `/`, no
/// scheme, no protocol-relative `//`, no backslashes, no control characters
/// and no `..` segments.
///
/// # Errors
///
/// Returns `SessionError::InvalidInput` when the target is rejected
pub fn validate_redirect_target(redirect_url: &str) -> SessionResult<String> {
    debug!("Validating post-authentication redirect target: {redirect_url}");

    if redirect_url.len() > MAX_REDIRECT_LENGTH {
        warn!(
            "Excessively long redirect target: {} characters",
            redirect_url.len()
        );
        return Err(invalid_redirect());
    }

    if !is_relative_url(redirect_url) {
        warn!("Rejected non-relative redirect target");
        return Err(invalid_redirect());
    }

    if has_suspicious_patterns(redirect_url) {
        warn!("Rejected redirect target with suspicious characters");
        return Err(invalid_redirect());
    }

    Ok(redirect_url.to_string())
}

/// Check if URL is relative (starts with /, not //, and has no scheme)
fn is_relative_url(url: &str) -> bool {
    url.starts_with('/') && !url.starts_with("//") && !url.contains(':')
}

fn has_suspicious_patterns(url: &str) -> bool {
    let lower = url.to_ascii_lowercase();
    url.contains("..")
        || url.contains('\\')
        || url.chars().any(char::is_control)
        || ["%00", "%0a", "%0d", "%09", "%5c", "%2f%2f"]
            .iter()
            .any(|needle| lower.contains(needle))
}

fn invalid_redirect() -> SessionError {
    SessionError::InvalidInput("redirect target must be a relative path".to_string())
}
