//! Utility functions and helpers

/// Generate a random key fragment for a bundle artifact file name
pub fn generate_bundle_key() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Check that a bundle key is safe to embed in a file name
pub fn is_valid_bundle_key(key: &str) -> bool {
    key.chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
        && !key.contains("..")
}

/// Sanitize string for logging (shorten digests)
pub fn sanitize_for_logging(s: &str) -> String {
    if s.len() <= 16 || !s.is_ascii() {
        return s.to_string();
    }

    format!("{}...{}", &s[..8], &s[s.len() - 4..])
}
