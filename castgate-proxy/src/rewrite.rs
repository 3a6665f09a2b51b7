//! URL and playlist rewriting.
//!
//! Proxied URLs travel inside the request path as `/r/<url>`. Clients
//! are sloppy about that encoding: the scheme separator may arrive
//! collapsed (`http:/host`) and the remainder percent-escaped, so
//! reconstruction tolerates both before handing the result to the URL
//! parser.

use percent_encoding::percent_decode_str;
use tracing::warn;
use url::Url;

/// Reconstruct an absolute URL from the wrapped form.
///
/// Detects the scheme by prefix, strips `scheme://` or the collapsed
/// `scheme:/`, percent-unescapes the remainder, and reattaches the
/// scheme. A remainder that fails to decode is kept as-is (logged),
/// matching the degrade-not-fail policy for unparseable input.
pub fn normalize_url(src: &str) -> String {
    let mut secure = false;
    let rest = if src.starts_with("https:") {
        secure = true;
        strip_scheme(src, "https")
    } else if src.starts_with("http:") {
        strip_scheme(src, "http")
    } else {
        src
    };

    let decoded = match percent_decode_str(rest).decode_utf8() {
        Ok(decoded) => decoded.into_owned(),
        Err(e) => {
            warn!("normalize url failed: {e}");
            return rest.to_string();
        }
    };

    if secure {
        format!("https://{decoded}")
    } else {
        format!("http://{decoded}")
    }
}

fn strip_scheme<'a>(src: &'a str, scheme: &str) -> &'a str {
    if let Some(rest) = src.strip_prefix(&format!("{scheme}://")) {
        rest
    } else if let Some(rest) = src.strip_prefix(&format!("{scheme}:/")) {
        rest
    } else {
        src
    }
}

/// Rewrite a text playlist so absolute URL lines route back through the
/// proxy. Only whole lines beginning with a scheme are touched; tags
/// and relative segment names pass through byte-identical.
pub fn rewrite_playlist(body: &str) -> String {
    let mut output = String::with_capacity(body.len());
    for line in body.lines() {
        if line.starts_with("http://") || line.starts_with("https://") {
            output.push_str("/r/");
        }
        output.push_str(line);
        output.push('\n');
    }
    output
}

/// Rewrite an upstream `Location` into the wrapped `/r/` form.
///
/// The upstream scheme is not carried over; the wrapped form is
/// `/r/<host>[:port]<path>[?<query>]`.
pub fn rewrite_location(location: &str) -> Option<String> {
    match Url::parse(location) {
        Ok(url) => {
            let mut wrapped = String::from("/r/");
            wrapped.push_str(url.host_str().unwrap_or(""));
            if let Some(port) = url.port() {
                wrapped.push(':');
                wrapped.push_str(&port.to_string());
            }
            wrapped.push_str(url.path());
            if let Some(query) = url.query() {
                wrapped.push('?');
                wrapped.push_str(query);
            }
            Some(wrapped)
        }
        Err(e) => {
            warn!("parse location failed: {e}");
            None
        }
    }
}

/// Unwrap a Referer that points back at the proxy, restoring the
/// original upstream URL. Referers that do not carry the `/r/` prefix
/// are left untouched (`None`).
pub fn unwrap_referer(referer: &str) -> Option<String> {
    let url = Url::parse(referer).ok()?;
    let rest = url.path().strip_prefix("/r/")?;
    let mut unwrapped = rest.to_string();
    if let Some(query) = url.query() {
        unwrapped.push('?');
        unwrapped.push_str(query);
    }
    Some(normalize_url(&unwrapped))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_full_scheme() {
        assert_eq!(
            normalize_url("http://example.com/a.m3u8"),
            "http://example.com/a.m3u8"
        );
        assert_eq!(
            normalize_url("https://example.com/a.m3u8"),
            "https://example.com/a.m3u8"
        );
    }

    #[test]
    fn test_normalize_collapsed_scheme() {
        assert_eq!(
            normalize_url("http:/example.com/a.m3u8"),
            "http://example.com/a.m3u8"
        );
        assert_eq!(
            normalize_url("https:/example.com/a.m3u8"),
            "https://example.com/a.m3u8"
        );
    }

    #[test]
    fn test_normalize_percent_escapes() {
        assert_eq!(
            normalize_url("http://example.com/a%20b.ts"),
            "http://example.com/a b.ts"
        );
    }

    #[test]
    fn test_normalize_schemeless_defaults_to_http() {
        assert_eq!(normalize_url("example.com/x"), "http://example.com/x");
    }

    #[test]
    fn test_normalize_idempotent() {
        for src in [
            "http://example.com/a.m3u8",
            "https:/example.com/a.m3u8?tok=1",
            "http:/host:8080/seg%2Fment.ts",
        ] {
            let once = normalize_url(src);
            assert_eq!(normalize_url(&once), once);
        }
    }

    #[test]
    fn test_rewrite_playlist_wraps_absolute_lines() {
        let body = "#EXTM3U\nhttp://x/y.ts\n#EXT-X-ENDLIST\n";
        assert_eq!(
            rewrite_playlist(body),
            "#EXTM3U\n/r/http://x/y.ts\n#EXT-X-ENDLIST\n"
        );
    }

    #[test]
    fn test_rewrite_playlist_mixed_lines() {
        let body = "#EXTM3U\n#EXT-X-TARGETDURATION:6\nhttps://cdn.example/s1.ts\nrelative/s2.ts\n";
        assert_eq!(
            rewrite_playlist(body),
            "#EXTM3U\n#EXT-X-TARGETDURATION:6\n/r/https://cdn.example/s1.ts\nrelative/s2.ts\n"
        );
    }

    #[test]
    fn test_rewrite_location_drops_scheme_keeps_query() {
        assert_eq!(
            rewrite_location("https://other.example/v?q=1").as_deref(),
            Some("/r/other.example/v?q=1")
        );
    }

    #[test]
    fn test_rewrite_location_keeps_port() {
        assert_eq!(
            rewrite_location("http://host:8080/path").as_deref(),
            Some("/r/host:8080/path")
        );
    }

    #[test]
    fn test_rewrite_location_unparseable() {
        assert_eq!(rewrite_location("::not a url::"), None);
    }

    #[test]
    fn test_unwrap_referer() {
        assert_eq!(
            unwrap_referer("http://gateway:18090/r/http://origin/live/index.m3u8").as_deref(),
            Some("http://origin/live/index.m3u8")
        );
        // Collapsed scheme inside the wrapped part.
        assert_eq!(
            unwrap_referer("http://gateway:18090/r/https:/origin/a?tok=1").as_deref(),
            Some("https://origin/a?tok=1")
        );
        // Not proxied: untouched.
        assert_eq!(unwrap_referer("http://elsewhere/page"), None);
    }
}
