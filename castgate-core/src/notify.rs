//! systemd status notification.
//!
//! Writes `READY=1` / `STATUS=...` datagrams to the socket named by
//! `NOTIFY_SOCKET`. Without that variable everything here is a no-op,
//! so running outside systemd costs nothing.

use std::io;
use std::time::Duration;

use tokio::net::UnixDatagram;
use tokio::task::JoinHandle;
use tracing::debug;

/// One sample of gateway activity, taken by the reporter every tick.
#[derive(Debug, Clone, Copy, Default)]
pub struct StatusSample {
    pub rtp_streams: usize,
    pub rtp_subscribers: usize,
    pub hls_clients: i64,
}

/// Format the free-form `STATUS=` line for a sample.
pub fn format_status(sample: &StatusSample) -> String {
    match (sample.rtp_streams > 0, sample.hls_clients > 0) {
        (true, true) => format!(
            "STATUS=RTP(stream: {}, client: {}), HLS(client: {})",
            sample.rtp_streams, sample.rtp_subscribers, sample.hls_clients
        ),
        (true, false) => format!(
            "STATUS=RTP(stream: {}, client: {})",
            sample.rtp_streams, sample.rtp_subscribers
        ),
        (false, true) => format!("STATUS=HLS(client: {})", sample.hls_clients),
        (false, false) => "STATUS=Idle".to_string(),
    }
}

/// Send one state line to the systemd notification socket.
///
/// Returns `Ok(false)` when `NOTIFY_SOCKET` is unset.
pub async fn sd_notify(state: &str) -> io::Result<bool> {
    let Some(path) = std::env::var_os("NOTIFY_SOCKET") else {
        debug!("NOTIFY_SOCKET not set");
        return Ok(false);
    };

    let socket = UnixDatagram::unbound()?;
    socket.send_to(state.as_bytes(), path).await?;
    Ok(true)
}

/// Spawn the 5 s status reporter.
///
/// `sample` is supplied by the caller so this module stays independent
/// of the stream registry and the proxy gauge. Returns `None` (and
/// spawns nothing) when `NOTIFY_SOCKET` is unset.
pub fn spawn_status_reporter<F>(sample: F) -> Option<JoinHandle<()>>
where
    F: Fn() -> StatusSample + Send + 'static,
{
    std::env::var_os("NOTIFY_SOCKET")?;

    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(5));
        loop {
            ticker.tick().await;
            let line = format_status(&sample());
            if let Err(e) = sd_notify(&line).await {
                debug!("status notify failed: {e}");
            }
        }
    }))
}
