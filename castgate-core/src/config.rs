use std::time::Duration;

/// Runtime configuration, assembled from CLI arguments in the binary.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP listen address.
    pub listen: String,
    /// Name of the multicast-capable LAN interface.
    pub interface: String,
    /// How long to wait for the first datagram when joining a group.
    pub first_packet_timeout: Duration,
    /// Widen the log filter to debug.
    pub debug: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:18090".to_string(),
            interface: "eth0".to_string(),
            first_packet_timeout: Duration::from_secs(1),
            debug: false,
        }
    }
}

/// Parse a human duration of the form `300ms`, `1s`, `2m` or a bare
/// number of seconds.
pub fn parse_duration(src: &str) -> Result<Duration, String> {
    let src = src.trim();
    let (digits, unit) = match src.find(|c: char| !c.is_ascii_digit() && c != '.') {
        Some(idx) => src.split_at(idx),
        None => (src, "s"),
    };
    let value: f64 = digits
        .parse()
        .map_err(|_| format!("invalid duration: {src}"))?;
    let secs = match unit {
        "ms" => value / 1000.0,
        "s" | "" => value,
        "m" => value * 60.0,
        "h" => value * 3600.0,
        _ => return Err(format!("invalid duration unit: {unit}")),
    };
    if !secs.is_finite() || secs < 0.0 {
        return Err(format!("invalid duration: {src}"));
    }
    Ok(Duration::from_secs_f64(secs))
}
