// User agent normalization and platform detection utilities

/// Collapse runs of whitespace and trim, so that proxies re-folding the
/// header do not change the fingerprint
#[must_use]
pub fn normalize_user_agent(user_agent: &str) -> String {
    user_agent.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Primary language tag from an `Accept-Language` header, lower-cased
///
/// `"en-US,en;q=0.9"` becomes `"en-us"`. Quality values are dropped.
#[must_use]
pub fn primary_language(accept_language: &str) -> Option<String> {
    accept_language
        .split(',')
        .next()
        .map(|tag| tag.split(';').next().unwrap_or("").trim().to_ascii_lowercase())
        .filter(|tag| !tag.is_empty() && tag != "*")
}

/// Client-hint platform values arrive quoted (`"Windows"`)
#[must_use]
pub fn normalize_platform_hint(platform: &str) -> String {
    platform.trim().trim_matches('"').to_string()
}

/// Derive platform from User-Agent string
/// Detects common platforms like Windows, macOS, Linux, Android, iOS, Chrome OS
#[must_use]
pub fn derive_platform_from_user_agent(user_agent: &str) -> String {
    let ua_lower = user_agent.to_lowercase();

    if ua_lower.contains("android") {
        "Android".to_string()
    } else if ua_lower.contains("iphone") || ua_lower.contains("ipad") || ua_lower.contains("ios") {
        "iOS".to_string()
    } else if ua_lower.contains("chrome os") || ua_lower.contains("cros") {
        "Chrome OS".to_string()
    } else if ua_lower.contains("windows") {
        "Windows".to_string()
    } else if ua_lower.contains("macintosh") || ua_lower.contains("mac os") {
        "macOS".to_string()
    } else if ua_lower.contains("linux") {
        "Linux".to_string()
    } else {
        "Unknown".to_string()
    }
}
