// src/url.rs
//
// msc:// URL parsing and forward-slash path manipulation shared by every
// component. Keys always use '/' regardless of host OS.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::constants::MSC_PROTOCOL;
use crate::error::{MscError, Result};

/// User profile names: `[A-Za-z0-9][A-Za-z0-9._-]*`. Implicit profiles start
/// with `_` and are only synthesized internally.
static PROFILE_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]*$").unwrap());

/// Validate a profile name supplied by configuration or a URL.
pub fn validate_profile_name(name: &str) -> Result<()> {
    if name.starts_with('_') {
        return Err(MscError::invalid_argument(format!(
            "profile name \"{name}\" is reserved: names starting with '_' are \
             synthesized for implicit profiles"
        )));
    }
    if !PROFILE_NAME_RE.is_match(name) {
        return Err(MscError::invalid_argument(format!(
            "invalid profile name \"{name}\""
        )));
    }
    Ok(())
}

/// True for names mscio synthesizes itself (`_s3-bucket`, `_file`, ...).
pub fn is_implicit_profile(name: &str) -> bool {
    name.starts_with('_')
}

/// Parse `msc://profile/key` into `(profile, key)`. The key may be empty.
///
/// Path normalizers sometimes collapse `msc://` to `msc:/`; that form is
/// repaired before parsing.
pub fn parse_msc_url(url: &str) -> Result<(String, String)> {
    let url = repair_msc_url(url);
    let rest = url.strip_prefix(MSC_PROTOCOL).ok_or_else(|| {
        MscError::invalid_argument(format!("expected {MSC_PROTOCOL} URL, got \"{url}\""))
    })?;

    let (profile, key) = match rest.split_once('/') {
        Some((profile, key)) => (profile, key),
        None => (rest, ""),
    };

    if profile.is_empty() {
        return Err(MscError::invalid_argument(format!(
            "missing profile in URL \"{url}\""
        )));
    }
    if !is_implicit_profile(profile) {
        validate_profile_name(profile)?;
    }

    Ok((profile.to_string(), key.to_string()))
}

fn repair_msc_url(url: &str) -> String {
    if url.starts_with("msc:/") && !url.starts_with(MSC_PROTOCOL) {
        url.replacen("msc:/", MSC_PROTOCOL, 1)
    } else {
        url.to_string()
    }
}

/// Format an `msc://` URL from a profile and key.
pub fn format_msc_url(profile: &str, key: &str) -> String {
    join_paths(&format!("{MSC_PROTOCOL}{profile}"), key)
}

/// Join two path components without doubling slashes. Works for filesystem
/// paths and scheme-prefixed URLs alike.
pub fn join_paths(base: &str, path: &str) -> String {
    let trimmed = path.trim_start_matches('/');
    if trimmed.is_empty() {
        return base.to_string();
    }
    if base.is_empty() {
        return trimmed.to_string();
    }
    format!("{}/{}", base.trim_end_matches('/'), trimmed)
}

/// Split a key into `(bucket, rest)` at the first slash.
pub fn split_path(path: &str) -> (String, String) {
    let path = path.trim_start_matches('/');
    match path.split_once('/') {
        Some((bucket, key)) => (bucket.to_string(), key.to_string()),
        None => (path.to_string(), String::new()),
    }
}

/// Strip a base path prefix from a listed key, leaving it relative.
pub fn strip_base_path(key: &str, base_path: &str) -> String {
    let base = base_path.trim_end_matches('/');
    if base.is_empty() {
        return key.trim_start_matches('/').to_string();
    }
    key.strip_prefix(base)
        .unwrap_or(key)
        .trim_start_matches('/')
        .to_string()
}

/// Scheme of a non-msc URL, lowercased, or `None` for plain paths.
pub fn url_scheme(url: &str) -> Option<String> {
    url.find("://").map(|pos| url[..pos].to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_parse_msc_url() {
        let (profile, key) = parse_msc_url("msc://data/a/b.txt").unwrap();
        assert_eq!(profile, "data");
        assert_eq!(key, "a/b.txt");

        let (profile, key) = parse_msc_url("msc://data").unwrap();
        assert_eq!(profile, "data");
        assert_eq!(key, "");

        // Directory key keeps its trailing slash.
        let (_, key) = parse_msc_url("msc://data/a/").unwrap();
        assert_eq!(key, "a/");
    }

    #[test]
    fn test_parse_repairs_single_slash() {
        let (profile, key) = parse_msc_url("msc:/data/a.txt").unwrap();
        assert_eq!(profile, "data");
        assert_eq!(key, "a.txt");
    }

    #[test]
    fn test_parse_rejects_reserved_profile_via_validation() {
        // Implicit profiles parse (they are synthesized internally) but user
        // validation rejects them.
        let (profile, _) = parse_msc_url("msc://_s3-bucket/key").unwrap();
        assert!(is_implicit_profile(&profile));
        let err = validate_profile_name("_s3-bucket").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn test_invalid_urls() {
        assert!(parse_msc_url("s3://bucket/key").is_err());
        assert!(parse_msc_url("msc://").is_err());
        assert!(parse_msc_url("msc://-bad/key").is_err());
    }

    #[test]
    fn test_join_and_split() {
        assert_eq!(join_paths("msc://p", "/a/b"), "msc://p/a/b");
        assert_eq!(join_paths("/tmp/", "x"), "/tmp/x");
        assert_eq!(join_paths("", "x/y"), "x/y");
        assert_eq!(join_paths("base", ""), "base");

        assert_eq!(split_path("bucket/a/b"), ("bucket".into(), "a/b".into()));
        assert_eq!(split_path("/bucket"), ("bucket".into(), "".into()));
    }

    #[test]
    fn test_strip_base_path() {
        assert_eq!(strip_base_path("/data/x/1", "/data"), "x/1");
        assert_eq!(strip_base_path("bucket/x", ""), "bucket/x");
        assert_eq!(strip_base_path("/data/x", "/data/"), "x");
    }
}
