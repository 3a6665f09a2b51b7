use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tracing::debug;

use crate::error::StreamResult;
use crate::stream::{RtpStream, StreamEvent};

/// Process-wide registry mapping multicast addresses to live streams.
///
/// At most one stream exists per address: racing misses serialize on a
/// per-address creation lock and re-check the map under it before
/// constructing. A stream removes itself from the map through the close
/// listener installed here, so the registry never polls stream health.
pub struct RtpServer {
    streams: Arc<DashMap<String, Arc<RtpStream>>>,
    creation_locks: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
    interface: Ipv4Addr,
}

impl RtpServer {
    pub fn new(interface: Ipv4Addr) -> Self {
        Self {
            streams: Arc::new(DashMap::new()),
            creation_locks: DashMap::new(),
            interface,
        }
    }

    /// Return the live stream for `address`, creating it on first use.
    pub async fn find(
        &self,
        address: &str,
        first_packet_timeout: Duration,
    ) -> StreamResult<Arc<RtpStream>> {
        debug!(address = %address, "find stream");
        if let Some(stream) = self.streams.get(address) {
            return Ok(stream.clone());
        }

        let lock = self
            .creation_locks
            .entry(address.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        // A racing miss may have published while we waited.
        if let Some(stream) = self.streams.get(address) {
            return Ok(stream.clone());
        }

        let (mut stream, socket) =
            RtpStream::connect(address, self.interface, first_packet_timeout).await?;

        let streams = Arc::clone(&self.streams);
        stream.on_event(Box::new(move |event| {
            let StreamEvent::Close { address } = event;
            debug!(address = %address, "stream closed, dropping registry entry");
            streams.remove(address);
        }));

        // Publish before the ingress task can observe a close, so the
        // listener's removal always finds the entry.
        let stream = Arc::new(stream);
        self.streams.insert(address.to_string(), stream.clone());
        stream.spawn_ingress(socket);
        Ok(stream)
    }

    /// Active stream and total subscriber counts for status reporting.
    pub fn count(&self) -> (usize, usize) {
        let mut subscribers = 0;
        let mut streams = 0;
        for entry in self.streams.iter() {
            streams += 1;
            subscribers += entry.value().subscriber_count();
        }
        (streams, subscribers)
    }

    #[cfg(test)]
    pub(crate) fn contains(&self, address: &str) -> bool {
        self.streams.contains_key(address)
    }
}
