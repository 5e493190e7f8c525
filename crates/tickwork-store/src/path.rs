//! Helpers for `/`-separated store paths.

use crate::error::{Result, StoreError};

/// Reject empty paths and empty segments (`a//b`, `/a`, `a/`).
pub fn validate(path: &str) -> Result<()> {
    if path.is_empty() || path.split('/').any(str::is_empty) {
        return Err(StoreError::InvalidPath(path.to_string()));
    }
    Ok(())
}

/// Path with the last segment removed; top-level keys have the empty parent.
pub fn parent(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) => &path[..idx],
        None => "",
    }
}

/// Last segment of the path.
pub fn key(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) => &path[idx + 1..],
        None => path,
    }
}

pub fn join(base: &str, segment: &str) -> String {
    if base.is_empty() {
        segment.to_string()
    } else {
        format!("{base}/{segment}")
    }
}

/// Escape `%`, `_` and `\` for a `LIKE ... ESCAPE '\'` prefix match.
pub(crate) fn like_prefix(path: &str) -> String {
    let mut escaped = String::with_capacity(path.len() + 2);
    for c in path.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push_str("/%");
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parent_and_key_split_on_last_separator() {
        assert_eq!(parent("tenants/acme/jobs/j1"), "tenants/acme/jobs");
        assert_eq!(key("tenants/acme/jobs/j1"), "j1");
        assert_eq!(parent("tenants"), "");
        assert_eq!(key("tenants"), "tenants");
    }

    #[test]
    fn validate_rejects_empty_segments() {
        assert!(validate("tenants/acme").is_ok());
        assert!(validate("").is_err());
        assert!(validate("/tenants").is_err());
        assert!(validate("tenants/").is_err());
        assert!(validate("tenants//acme").is_err());
    }

    #[test]
    fn like_prefix_escapes_wildcards() {
        assert_eq!(like_prefix("t_1"), "t\\_1/%");
        assert_eq!(like_prefix("a%b"), "a\\%b/%");
    }
}
