//! Hop-by-hop header hygiene for the outbound proxy request.

use axum::http::HeaderMap;
use axum::http::header;

/// Headers that apply to a single transport connection and must not be
/// forwarded by a proxy (RFC 7230 section 6.1).
const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
    "transfer-encoding",
    "upgrade",
];

/// Remove hop-by-hop headers: the fixed RFC set plus anything the
/// `Connection` header names. `TE: trailers` is the one sanctioned
/// survivor.
pub fn prune(headers: &mut HeaderMap) {
    if let Some(connection) = headers
        .get(header::CONNECTION)
        .and_then(|v| v.to_str().ok())
    {
        let listed: Vec<String> = connection
            .split(',')
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
            .collect();
        for name in listed {
            headers.remove(name.as_str());
        }
    }

    for name in HOP_BY_HOP {
        if name == "te" {
            let value = headers.get(name).and_then(|v| v.to_str().ok());
            if value == Some("trailers") {
                continue;
            }
        }
        headers.remove(name);
    }
}
