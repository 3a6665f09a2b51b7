// castgate-stream - multicast RTP fan-out engine
//
// One multicast group maps to one RtpStream: a single ingress task owns
// the UDP socket, strips RTP framing, and broadcasts one-second payload
// windows to every subscribed HTTP client. The RtpServer registry
// guarantees at most one live stream per group address.
//
// - error     - stream error type
// - handler   - the /rtp/ axum route
// - reader    - per-subscriber byte stream over the broadcast channel
// - registry  - address -> stream map with racing-miss serialization
// - stream    - socket ownership, ingress loop, broadcast, tear-down

pub mod error;
pub mod handler;
pub mod reader;
pub mod registry;
pub mod stream;

pub use error::{StreamError, StreamResult};
pub use handler::{RtpHandlerState, router};
pub use reader::RtpReader;
pub use registry::RtpServer;
pub use stream::{RtpStream, StreamEvent, CONTENT_TYPE_DEFAULT, CONTENT_TYPE_MP2T};
