//! Attribution keys for resources.
//!
//! Every tracked second is attributed to a domain: the hostname of the
//! resource that held focus. Resources that cannot be parsed, or that
//! belong to the browser itself, collapse into [`UNKNOWN_DOMAIN`].

use url::Url;

/// Attribution key used when no hostname can be derived.
pub const UNKNOWN_DOMAIN: &str = "unknown";

/// URL schemes of host-UI and extension-internal pages.
const INTERNAL_SCHEMES: &[&str] = &[
    "chrome",
    "chrome-extension",
    "chrome-untrusted",
    "chrome-search",
    "devtools",
    "edge",
    "about",
    "moz-extension",
];

/// Maps a resource identifier to its attribution key.
///
/// Total and deterministic: parse failures, internal pages and
/// host-less URLs (e.g. `file:///`) all yield `"unknown"`.
#[must_use]
pub fn classify(resource: &str) -> String {
    match Url::parse(resource) {
        Ok(url) if !is_internal_scheme(url.scheme()) => match url.host_str() {
            Some(host) if !host.is_empty() => host.to_string(),
            _ => UNKNOWN_DOMAIN.to_string(),
        },
        _ => UNKNOWN_DOMAIN.to_string(),
    }
}

/// Returns true if time spent on this resource should be counted at all.
///
/// Browser-internal pages never open a session. Anything else does,
/// including resources that classify as `"unknown"`.
#[must_use]
pub fn is_trackable(resource: &str) -> bool {
    let trimmed = resource.trim();
    if trimmed.is_empty() {
        return false;
    }
    match trimmed.split_once("://") {
        Some((scheme, _)) => !is_internal_scheme(&scheme.to_ascii_lowercase()),
        None => match trimmed.split_once(':') {
            Some((scheme, _)) => !is_internal_scheme(&scheme.to_ascii_lowercase()),
            None => true,
        },
    }
}

fn is_internal_scheme(scheme: &str) -> bool {
    INTERNAL_SCHEMES.contains(&scheme)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_returns_hostname() {
        assert_eq!(classify("https://a.example/x"), "a.example");
        assert_eq!(classify("http://news.ycombinator.com/item?id=1"), "news.ycombinator.com");
        assert_eq!(classify("https://localhost:8080/"), "localhost");
    }

    #[test]
    fn test_classify_keeps_subdomains() {
        assert_eq!(classify("https://docs.rs/tokio"), "docs.rs");
        assert_eq!(classify("https://mail.google.com/"), "mail.google.com");
    }

    #[test]
    fn test_classify_unparseable_is_unknown() {
        assert_eq!(classify("not a url"), UNKNOWN_DOMAIN);
        assert_eq!(classify(""), UNKNOWN_DOMAIN);
    }

    #[test]
    fn test_classify_internal_pages_are_unknown() {
        assert_eq!(classify("chrome://settings"), UNKNOWN_DOMAIN);
        assert_eq!(classify("chrome-extension://abcdef/popup.html"), UNKNOWN_DOMAIN);
        assert_eq!(classify("about:blank"), UNKNOWN_DOMAIN);
    }

    #[test]
    fn test_classify_hostless_is_unknown() {
        assert_eq!(classify("file:///home/user/notes.html"), UNKNOWN_DOMAIN);
    }

    #[test]
    fn test_is_trackable() {
        assert!(is_trackable("https://a.example/x"));
        assert!(is_trackable("file:///tmp/page.html"));
        assert!(is_trackable("garbage"));
        assert!(!is_trackable("chrome://newtab/"));
        assert!(!is_trackable("chrome-extension://id/options.html"));
        assert!(!is_trackable("about:blank"));
        assert!(!is_trackable("   "));
    }
}
