//! Url normalization for user-entered navigation targets

use url::{ParseError, Url};

use crate::error::{Error, Result};

/// Turn user input into an absolute url.
///
/// `about:` urls pass through untouched. Input without a scheme that looks
/// like a host (`example.com/path`, `localhost:3000`) gets `https://`.
pub fn normalize_url(input: &str) -> Result<String> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(Error::invalid_url("empty url"));
    }
    if trimmed.starts_with("about:") {
        return Ok(trimmed.to_string());
    }

    match Url::parse(trimmed) {
        // "localhost:3000" parses with scheme "localhost"
        Ok(url) if url.cannot_be_a_base() && looks_like_host(trimmed) => with_https(trimmed),
        Ok(url) => Ok(url.to_string()),
        Err(ParseError::RelativeUrlWithoutBase) if looks_like_host(trimmed) => with_https(trimmed),
        Err(e) => Err(Error::invalid_url(format!("{trimmed}: {e}"))),
    }
}

/// Whether two urls name the same document location.
///
/// Engines report urls in canonical form (`https://a.example/`) while records
/// may hold what was typed (`https://a.example`).
#[must_use]
pub fn same_url(a: &str, b: &str) -> bool {
    if a == b {
        return true;
    }
    match (Url::parse(a), Url::parse(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

fn with_https(input: &str) -> Result<String> {
    Url::parse(&format!("https://{input}"))
        .map(|u| u.to_string())
        .map_err(|e| Error::invalid_url(format!("{input}: {e}")))
}

fn looks_like_host(input: &str) -> bool {
    let host = input
        .split(['/', '?', '#'])
        .next()
        .unwrap_or_default();
    let name = host.split(':').next().unwrap_or_default();
    !name.is_empty()
        && !input.contains(char::is_whitespace)
        && (name.contains('.') || name == "localhost")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_absolute_urls_kept() {
        assert_eq!(
            normalize_url("https://a.example/path?q=1").unwrap(),
            "https://a.example/path?q=1"
        );
        assert_eq!(normalize_url("  http://b.example  ").unwrap(), "http://b.example/");
    }

    #[test]
    fn test_about_passthrough() {
        assert_eq!(normalize_url("about:blank").unwrap(), "about:blank");
    }

    #[test]
    fn test_scheme_added_to_hosts() {
        assert_eq!(normalize_url("a.example").unwrap(), "https://a.example/");
        assert_eq!(
            normalize_url("localhost:3000/app").unwrap(),
            "https://localhost:3000/app"
        );
    }

    #[test]
    fn test_same_url() {
        assert!(same_url("https://a.example", "https://a.example/"));
        assert!(!same_url("https://a.example", "https://a.example#top"));
        assert!(same_url("about:blank", "about:blank"));
        assert!(!same_url("garbage", "other garbage"));
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(matches!(normalize_url(""), Err(Error::InvalidUrl(_))));
        assert!(matches!(normalize_url("not a url"), Err(Error::InvalidUrl(_))));
    }
}
