//! User-supplied device addresses.

use reqwest::Url;

/// Suffix of mDNS host names, which skip the dotted-quad shape check.
const MDNS_SUFFIX: &str = ".local";

/// Syntactic pre-check used to enable submitting an address.
///
/// The address must be longer than six characters and, unless it is an mDNS name,
/// consist of exactly four non-empty dot-separated segments.
pub fn is_plausible_address(address: &str) -> bool {
    if address.chars().count() <= 6 {
        return false;
    }
    if address.ends_with(MDNS_SUFFIX) {
        return true;
    }

    let segments: Vec<&str> = address.split('.').collect();
    segments.len() == 4 && segments.iter().all(|s| !s.is_empty())
}

/// Turn an address into the URL that gets probed.
///
/// Bare hosts get an `http://` prefix. Returns `None` for anything that does not form
/// an http(s) URL with a host.
pub fn normalize(address: &str) -> Option<Url> {
    let address = address.trim();
    if address.is_empty() {
        return None;
    }

    let candidate = if address.contains("://") {
        address.to_string()
    } else {
        format!("http://{}", address)
    };

    let url = Url::parse(&candidate).ok()?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return None;
    }
    Some(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plausible_ipv4() {
        assert!(is_plausible_address("10.0.0.5"));
        assert!(is_plausible_address("192.168.1.42"));
    }

    #[test]
    fn test_rejects_empty_segment() {
        assert!(!is_plausible_address("10.0..5"));
        assert!(!is_plausible_address(".10.0.0.5"));
        assert!(!is_plausible_address("10.0.0.5."));
    }

    #[test]
    fn test_rejects_wrong_segment_count() {
        assert!(!is_plausible_address("bad_host"));
        assert!(!is_plausible_address("10.0.0.5.6"));
        assert!(!is_plausible_address("example.com"));
    }

    #[test]
    fn test_rejects_short_addresses() {
        assert!(!is_plausible_address(""));
        assert!(!is_plausible_address("1.2.3"));
        // seven characters is the minimum
        assert!(is_plausible_address("1.2.3.4"));
    }

    #[test]
    fn test_mdns_names_skip_segment_check() {
        assert!(is_plausible_address("sensor.local"));
        assert!(is_plausible_address("http://sensor.local"));
        assert!(!is_plausible_address(".local"));
    }

    #[test]
    fn test_urls_with_four_segments() {
        assert!(is_plausible_address("http://192.168.1.42"));
        assert!(!is_plausible_address("https://example.com"));
    }

    #[test]
    fn test_normalize_adds_scheme() {
        let url = normalize("192.168.1.42").unwrap();
        assert_eq!(url.as_str(), "http://192.168.1.42/");

        let url = normalize("192.168.1.42:8080/state").unwrap();
        assert_eq!(url.as_str(), "http://192.168.1.42:8080/state");
    }

    #[test]
    fn test_normalize_keeps_existing_scheme() {
        let url = normalize("https://sensor.local/data").unwrap();
        assert_eq!(url.scheme(), "https");
        assert_eq!(url.host_str(), Some("sensor.local"));
    }

    #[test]
    fn test_normalize_rejects_garbage() {
        assert!(normalize("").is_none());
        assert!(normalize("not a host").is_none());
        assert!(normalize("ftp://10.0.0.5").is_none());
        assert!(normalize("http://").is_none());
    }
}
