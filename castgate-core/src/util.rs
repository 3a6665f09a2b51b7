use std::net::SocketAddr;

/// Human byte count for access lines, decimal units per the byte-stream
/// registry convention: `512B`, `1.5kB`, `2.0MB`.
pub fn byte_count(bytes: u64) -> String {
    const UNIT: u64 = 1000;
    if bytes < UNIT {
        return format!("{bytes}B");
    }
    let mut div = UNIT;
    let mut exp = 0usize;
    let mut n = bytes / UNIT;
    while n >= UNIT {
        div *= UNIT;
        exp += 1;
        n /= UNIT;
    }
    format!("{:.1}{}B", bytes as f64 / div as f64, ['k', 'M', 'G', 'T', 'P', 'E'][exp])
}

/// Client identity for access lines: the `X-Forwarded-For` value when a
/// fronting proxy supplied one, the peer IP otherwise.
pub fn client_ip(forwarded_for: Option<&str>, remote: SocketAddr) -> String {
    match forwarded_for {
        Some(xff) if !xff.is_empty() => xff.to_string(),
        _ => remote.ip().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_byte_count() {
        assert_eq!(byte_count(0), "0B");
        assert_eq!(byte_count(999), "999B");
        assert_eq!(byte_count(1000), "1.0kB");
        assert_eq!(byte_count(1500), "1.5kB");
        assert_eq!(byte_count(999_999), "1000.0kB");
        assert_eq!(byte_count(1_000_000), "1.0MB");
        assert_eq!(byte_count(3_200_000_000), "3.2GB");
        assert_eq!(byte_count(1_000_000_000_000), "1.0TB");
    }

    #[test]
    fn test_client_ip() {
        let remote: SocketAddr = "10.0.0.7:51234".parse().unwrap();
        assert_eq!(client_ip(None, remote), "10.0.0.7");
        assert_eq!(client_ip(Some(""), remote), "10.0.0.7");
        assert_eq!(client_ip(Some("203.0.113.9"), remote), "203.0.113.9");
    }
}
