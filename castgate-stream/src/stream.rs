use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use rtp::packet::Packet;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::debug;
use webrtc_util::marshal::Unmarshal;

use crate::error::{StreamError, StreamResult};
use crate::reader::RtpReader;

/// RTP payload type for MPEG-2 transport streams.
/// https://en.wikipedia.org/wiki/RTP_payload_formats
pub const RTP_PAYLOAD_TYPE_MP2T: u8 = 33;

/// https://www.w3.org/2013/12/byte-stream-format-registry/mp2t-byte-stream-format.html
pub const CONTENT_TYPE_MP2T: &str = "video/MP2T";
pub const CONTENT_TYPE_DEFAULT: &str = "application/octet-stream";

/// Largest datagram we expect on an Ethernet-MTU path.
const PACKET_BUF_SIZE: usize = 1500;

/// How often gathered payload is broadcast to subscribers. Per-packet
/// sends would swamp the capacity-1 subscriber queues; one-second
/// windows keep peak memory at a second of bitrate per subscriber.
const BROADCAST_PERIOD: Duration = Duration::from_secs(1);

/// Lifecycle events emitted by a stream, used to decouple tear-down
/// from registry bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Close { address: String },
}

type EventListener = Box<dyn Fn(&StreamEvent) + Send + Sync>;

/// One joined multicast group, fanned out to any number of subscribers.
///
/// The ingress task spawned by [`RtpStream::spawn_ingress`] is the sole
/// owner of the UDP socket; every other task interacts with the stream
/// only through [`join`](RtpStream::join), [`leave`](RtpStream::leave)
/// and the broadcast path. The subscriber lock is never held across an
/// await point.
pub struct RtpStream {
    address: String,
    content_type: &'static str,
    subscribers: Mutex<HashMap<String, mpsc::Sender<Bytes>>>,
    listeners: Vec<EventListener>,
    closed: AtomicBool,
}

impl std::fmt::Debug for RtpStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RtpStream")
            .field("address", &self.address)
            .field("content_type", &self.content_type)
            .field("closed", &self.closed)
            .finish()
    }
}

impl RtpStream {
    /// Join the multicast group and sniff the first packet.
    ///
    /// The advertised content type comes from the first packet's RTP
    /// payload type, so the group must be live within
    /// `first_packet_timeout` or construction fails and nothing is
    /// published. Returns the stream together with its socket; the
    /// caller installs listeners and then hands the socket to
    /// [`spawn_ingress`](RtpStream::spawn_ingress).
    pub async fn connect(
        address: &str,
        interface: Ipv4Addr,
        first_packet_timeout: Duration,
    ) -> StreamResult<(Self, UdpSocket)> {
        let group: SocketAddrV4 = address
            .parse()
            .map_err(|_| StreamError::InvalidAddress(address.to_string()))?;
        if !group.ip().is_multicast() {
            return Err(StreamError::InvalidAddress(address.to_string()));
        }

        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, group.port())).await?;
        socket.join_multicast_v4(*group.ip(), interface)?;

        let mut buf = [0u8; PACKET_BUF_SIZE];
        let n = tokio::time::timeout(first_packet_timeout, socket.recv(&mut buf))
            .await
            .map_err(|_| {
                StreamError::FirstPacketTimeout(address.to_string(), first_packet_timeout)
            })??;
        let packet = Packet::unmarshal(&mut &buf[..n])?;

        let content_type = if packet.header.payload_type == RTP_PAYLOAD_TYPE_MP2T {
            CONTENT_TYPE_MP2T
        } else {
            CONTENT_TYPE_DEFAULT
        };
        debug!(
            address = %address,
            payload_type = packet.header.payload_type,
            content_type = %content_type,
            "stream connected"
        );

        Ok((
            Self {
                address: address.to_string(),
                content_type,
                subscribers: Mutex::new(HashMap::new()),
                listeners: Vec::new(),
                closed: AtomicBool::new(false),
            },
            socket,
        ))
    }

    /// Install a lifecycle listener. Listeners are fixed once the
    /// ingress task runs, so this takes `&mut self`: install everything
    /// before the stream becomes discoverable.
    pub fn on_event(&mut self, listener: EventListener) {
        self.listeners.push(listener);
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn content_type(&self) -> &'static str {
        self.content_type
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    /// Register a subscriber under `client` and hand back its reader.
    ///
    /// Fails once tear-down has begun; the caller should resolve a
    /// fresh stream through the registry instead.
    pub fn join(&self, client: &str) -> StreamResult<RtpReader> {
        let (tx, rx) = mpsc::channel(1);
        let mut subscribers = self.subscribers.lock();
        if self.closed.load(Ordering::Acquire) {
            return Err(StreamError::Closed(self.address.clone()));
        }
        debug!(client = %client, address = %self.address, "subscriber joined");
        subscribers.insert(client.to_string(), tx);
        Ok(RtpReader::new(rx))
    }

    pub fn leave(&self, client: &str) {
        debug!(client = %client, address = %self.address, "subscriber left");
        self.subscribers.lock().remove(client);
    }

    /// Run the ingress loop until a terminal error, then tear down.
    pub fn spawn_ingress(self: &Arc<Self>, socket: UdpSocket) {
        let stream = Arc::clone(self);
        tokio::spawn(async move {
            let err = stream.ingress(&socket).await;
            stream.teardown(socket, &err);
        });
    }

    /// Read datagrams and aggregate payloads; broadcast one window per
    /// tick. Every error is terminal, including the no-subscribers
    /// signal from the broadcast path.
    async fn ingress(&self, socket: &UdpSocket) -> StreamError {
        let mut buf = [0u8; PACKET_BUF_SIZE];
        let mut pool = BytesMut::new();
        // First tick one full period out, after the registry has
        // published the stream.
        let mut ticker = tokio::time::interval_at(
            tokio::time::Instant::now() + BROADCAST_PERIOD,
            BROADCAST_PERIOD,
        );

        loop {
            tokio::select! {
                received = socket.recv(&mut buf) => {
                    let n = match received {
                        Ok(n) => n,
                        Err(e) => return e.into(),
                    };
                    match Packet::unmarshal(&mut &buf[..n]) {
                        Ok(packet) => pool.extend_from_slice(&packet.payload),
                        Err(e) => return e.into(),
                    }
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.broadcast(pool.split().freeze()) {
                        return e;
                    }
                }
            }
        }
    }

    /// Offer one aggregation window to every subscriber.
    ///
    /// The subscriber list is snapshotted under the lock, then each
    /// queue gets a non-blocking send: a full queue drops this window
    /// for that subscriber and nothing ever blocks ingress. An empty
    /// snapshot is the tear-down signal.
    fn broadcast(&self, window: Bytes) -> StreamResult<()> {
        let queues: Vec<mpsc::Sender<Bytes>> =
            self.subscribers.lock().values().cloned().collect();

        if queues.is_empty() {
            return Err(StreamError::NoSubscribers(self.address.clone()));
        }
        if window.is_empty() {
            return Ok(());
        }

        for queue in queues {
            if queue.try_send(window.clone()).is_err() {
                debug!(address = %self.address, "slow subscriber, window dropped");
            }
        }
        Ok(())
    }

    /// Single exit path for the ingress task: refuse new joins, close
    /// every subscriber queue, release the socket, then tell the
    /// listeners.
    fn teardown(&self, socket: UdpSocket, err: &StreamError) {
        debug!(address = %self.address, "ingress exited: {err}");

        let dropped: Vec<mpsc::Sender<Bytes>> = {
            let mut subscribers = self.subscribers.lock();
            self.closed.store(true, Ordering::Release);
            subscribers.drain().map(|(_, tx)| tx).collect()
        };
        drop(dropped);
        drop(socket);

        let event = StreamEvent::Close {
            address: self.address.clone(),
        };
        for listener in &self.listeners {
            listener(&event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    fn bare_stream(address: &str) -> RtpStream {
        RtpStream {
            address: address.to_string(),
            content_type: CONTENT_TYPE_MP2T,
            subscribers: Mutex::new(HashMap::new()),
            listeners: Vec::new(),
            closed: AtomicBool::new(false),
        }
    }

    #[tokio::test]
    async fn test_broadcast_no_subscribers_is_terminal() {
        let stream = bare_stream("239.0.0.1:5000");
        let err = stream.broadcast(Bytes::from_static(b"x")).unwrap_err();
        assert!(matches!(err, StreamError::NoSubscribers(_)));
    }

    #[tokio::test]
    async fn test_broadcast_drops_for_slow_subscriber_without_reorder() {
        let stream = bare_stream("239.0.0.1:5000");
        let mut reader = stream.join("client-1").unwrap();

        // Queue capacity is 1: the second window is dropped while the
        // first sits unconsumed.
        stream.broadcast(Bytes::from_static(b"w1")).unwrap();
        stream.broadcast(Bytes::from_static(b"w2")).unwrap();

        let mut buf = [0u8; 8];
        let n = reader.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"w1");

        stream.broadcast(Bytes::from_static(b"w3")).unwrap();
        let n = reader.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"w3");
    }

    #[tokio::test]
    async fn test_empty_window_keeps_subscribers_but_checks_liveness() {
        let stream = bare_stream("239.0.0.1:5000");
        let _reader = stream.join("client-1").unwrap();
        assert!(stream.broadcast(Bytes::new()).is_ok());

        stream.leave("client-1");
        assert!(stream.broadcast(Bytes::new()).is_err());
    }

    #[tokio::test]
    async fn test_join_and_leave_bookkeeping() {
        let stream = bare_stream("239.0.0.1:5000");
        let _r1 = stream.join("a").unwrap();
        let _r2 = stream.join("b").unwrap();
        assert_eq!(stream.subscriber_count(), 2);
        stream.leave("a");
        assert_eq!(stream.subscriber_count(), 1);
    }
}
