//! Path utilities (C1) — validate, split, and compose slash-delimited paths.

use crate::error::{ProvmanError, ProvmanResult};

/// Strips a single trailing `/` from a non-root path, per spec §3.
pub fn normalize(path: &str) -> &str {
    if path.len() > 1 && path.ends_with('/') {
        &path[..path.len() - 1]
    } else {
        path
    }
}

/// Validates a path per spec §4.1: non-empty, starts with `/`, no
/// consecutive slashes, every segment printable and whitespace-free.
pub fn validate(path: &str) -> ProvmanResult<()> {
    let path = normalize(path);
    if path.is_empty() || !path.starts_with('/') {
        return Err(ProvmanError::BadArgs(format!(
            "path must start with '/': {path:?}"
        )));
    }
    if path == "/" {
        return Ok(());
    }
    for segment in path[1..].split('/') {
        if segment.is_empty() {
            return Err(ProvmanError::BadArgs(format!(
                "consecutive slashes in path: {path:?}"
            )));
        }
        if segment
            .chars()
            .any(|c| c.is_whitespace() || c.is_control())
        {
            return Err(ProvmanError::BadArgs(format!(
                "segment contains whitespace or control bytes: {segment:?}"
            )));
        }
    }
    Ok(())
}

/// Splits a validated path into its segments. The root `/` splits to an
/// empty sequence.
pub fn split(path: &str) -> ProvmanResult<Vec<&str>> {
    validate(path)?;
    let path = normalize(path);
    if path == "/" {
        return Ok(Vec::new());
    }
    Ok(path[1..].split('/').collect())
}

/// Joins a root (ending in `/`) with a relative path (no leading `/`).
pub fn join(root: &str, relative: &str) -> String {
    if relative.is_empty() {
        normalize(root).to_string()
    } else if root.ends_with('/') {
        format!("{root}{relative}")
    } else {
        format!("{root}/{relative}")
    }
}

/// Returns the parent of a path, or `/` if the path is already a
/// top-level segment or root.
pub fn parent(path: &str) -> ProvmanResult<String> {
    let segments = split(path)?;
    if segments.len() <= 1 {
        return Ok("/".to_string());
    }
    Ok(format!("/{}", segments[..segments.len() - 1].join("/")))
}

/// Returns the last segment of a path, or `""` for root.
pub fn last_segment(path: &str) -> ProvmanResult<String> {
    let segments = split(path)?;
    Ok(segments.last().map(|s| s.to_string()).unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_rejects_empty_and_missing_slash() {
        assert!(validate("").is_err());
        assert!(validate("telephony").is_err());
    }

    #[test]
    fn validate_rejects_consecutive_slashes() {
        assert!(validate("/telephony//contexts").is_err());
    }

    #[test]
    fn validate_rejects_whitespace_segment() {
        assert!(validate("/telephony/my apn").is_err());
    }

    #[test]
    fn validate_accepts_root() {
        assert!(validate("/").is_ok());
    }

    #[test]
    fn trailing_slash_is_normalized() {
        assert_eq!(normalize("/telephony/"), "/telephony");
        assert_eq!(normalize("/"), "/");
    }

    #[test]
    fn split_root_is_empty() {
        assert_eq!(split("/").unwrap(), Vec::<&str>::new());
    }

    #[test]
    fn split_matches_validate() {
        let segs = split("/telephony/contexts/acct/").unwrap();
        assert_eq!(segs, vec!["telephony", "contexts", "acct"]);
    }

    #[test]
    fn join_handles_trailing_slash_on_root() {
        assert_eq!(join("/telephony/", "contexts/acct"), "/telephony/contexts/acct");
    }

    #[test]
    fn parent_and_last_segment() {
        assert_eq!(parent("/telephony/contexts/acct").unwrap(), "/telephony/contexts");
        assert_eq!(last_segment("/telephony/contexts/acct").unwrap(), "acct");
        assert_eq!(parent("/telephony").unwrap(), "/");
        assert_eq!(last_segment("/").unwrap(), "");
    }
}
