//! Object-key construction and validation.
//!
//! Keys follow
//! `users/{user}/{uploads|generated}/{epoch_seconds}_{8-hex-uid}_{safe_filename}`.
//! Validation keeps a strict allowlist to rule out path traversal and header
//! injection before a key reaches a URL or a backend request.

use chrono::Utc;
use confab_core::types::session::FileSource;
use lazy_static::lazy_static;
use regex::Regex;

use crate::error::{StorageError, StorageResult};

lazy_static! {
    static ref KEY_CHARSET: Regex = Regex::new(r"^[A-Za-z0-9._/@+%\-]+$").expect("static regex");
}

/// Normalize a client-supplied filename for use inside a key: path
/// separators, control characters, and whitespace variants collapse to `_`.
pub fn sanitize_filename(filename: &str) -> String {
    let cleaned: String = filename
        .chars()
        .map(|c| match c {
            '/' | '\\' | '\r' | '\n' | '\t' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    if cleaned.is_empty() {
        "file".to_string()
    } else {
        cleaned
    }
}

/// Validate a key against the charset allowlist and traversal rules.
pub fn validate_key(key: &str) -> StorageResult<()> {
    if key.is_empty() {
        return Err(StorageError::InvalidKey("empty key".to_string()));
    }
    if !KEY_CHARSET.is_match(key) {
        return Err(StorageError::InvalidKey(format!(
            "key contains invalid characters: {}",
            sanitize_filename(key)
        )));
    }
    if key.contains("..") {
        return Err(StorageError::InvalidKey(
            "key contains path traversal sequence".to_string(),
        ));
    }
    if key.starts_with('/') {
        return Err(StorageError::InvalidKey(
            "key must not start with '/'".to_string(),
        ));
    }
    Ok(())
}

/// Build a fresh key for an upload.
pub fn build_key(user: &str, source: FileSource, filename: &str) -> StorageResult<String> {
    let ts = Utc::now().timestamp();
    let uid: u32 = rand::random();
    let key = format!(
        "users/{user}/{}/{ts}_{uid:08x}_{}",
        source.key_segment(),
        sanitize_filename(filename)
    );
    validate_key(&key)?;
    Ok(key)
}

/// The user segment of a key, when the key follows the `users/{user}/…`
/// scheme.
pub fn key_owner(key: &str) -> Option<&str> {
    let rest = key.strip_prefix("users/")?;
    let (user, _) = rest.split_once('/')?;
    if user.is_empty() {
        None
    } else {
        Some(user)
    }
}

/// The source segment (`uploads`/`generated`) of a key.
pub fn key_source(key: &str) -> Option<FileSource> {
    let rest = key.strip_prefix("users/")?;
    let (_, rest) = rest.split_once('/')?;
    let (segment, _) = rest.split_once('/')?;
    match segment {
        "uploads" => Some(FileSource::User),
        "generated" => Some(FileSource::Tool),
        _ => None,
    }
}

/// Ensure `user` owns `key`. The error text never echoes the raw key.
pub fn ensure_owner(user: &str, key: &str) -> StorageResult<()> {
    validate_key(key)?;
    match key_owner(key) {
        Some(owner) if owner == user => Ok(()),
        _ => Err(StorageError::AccessDenied(format!(
            "user {user} does not own the requested object"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn built_keys_follow_the_scheme() {
        let key = build_key("a@b.c", FileSource::User, "report.pdf").unwrap();
        assert!(key.starts_with("users/a@b.c/uploads/"));
        assert!(key.ends_with("_report.pdf"));
        assert_eq!(key_owner(&key), Some("a@b.c"));
        assert_eq!(key_source(&key), Some(FileSource::User));

        let key = build_key("a@b.c", FileSource::Tool, "out.png").unwrap();
        assert!(key.contains("/generated/"));
        assert_eq!(key_source(&key), Some(FileSource::Tool));
    }

    #[test]
    fn filenames_are_sanitized() {
        assert_eq!(sanitize_filename("../../etc/passwd"), ".._.._etc_passwd");
        assert_eq!(sanitize_filename("a\r\nb\tc"), "a__b_c");
        assert_eq!(sanitize_filename(""), "file");
    }

    #[test]
    fn traversal_and_bad_charset_rejected() {
        assert!(validate_key("users/a@b.c/uploads/../secret").is_err());
        assert!(validate_key("/users/a@b.c/uploads/x").is_err());
        assert!(validate_key("users/a@b.c/uploads/x;rm").is_err());
        assert!(validate_key("users/a@b.c/uploads/ok_file.txt").is_ok());
    }

    #[test]
    fn ownership_is_prefix_based() {
        assert!(ensure_owner("a@b.c", "users/a@b.c/uploads/1_aa_x.txt").is_ok());
        assert!(ensure_owner("m@b.c", "users/a@b.c/uploads/1_aa_x.txt").is_err());
        assert!(ensure_owner("a@b.c", "other/a@b.c/x").is_err());
    }
}
