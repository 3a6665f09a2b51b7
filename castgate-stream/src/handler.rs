//! The `/rtp/` HTTP route: join a multicast group and stream it.

use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use axum::{
    Router,
    body::Body,
    extract::{ConnectInfo, Path, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use bytes::Bytes;
use futures::Stream;
use tokio_util::io::ReaderStream;
use tracing::info;

use castgate_core::util::{byte_count, client_ip};

use crate::reader::RtpReader;
use crate::registry::RtpServer;
use crate::stream::RtpStream;

#[derive(Clone)]
pub struct RtpHandlerState {
    /// Absent when no multicast interface could be resolved at startup.
    pub server: Option<Arc<RtpServer>>,
    pub first_packet_timeout: Duration,
}

pub fn router(state: RtpHandlerState) -> Router {
    Router::new()
        .route("/rtp", get(no_address))
        .route("/rtp/", get(no_address))
        .route("/rtp/:address", get(handle_rtp))
        .with_state(state)
}

async fn no_address(State(state): State<RtpHandlerState>) -> impl IntoResponse {
    if state.server.is_none() {
        return (StatusCode::INTERNAL_SERVER_ERROR, "no multicast available");
    }
    (StatusCode::BAD_REQUEST, "No address specified")
}

async fn handle_rtp(
    Path(address): Path<String>,
    State(state): State<RtpHandlerState>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Response {
    let start = Instant::now();
    let path = format!("/rtp/{address}");

    let Some(server) = &state.server else {
        return (StatusCode::INTERNAL_SERVER_ERROR, "no multicast available").into_response();
    };

    let stream = match server.find(&address, state.first_packet_timeout).await {
        Ok(stream) => stream,
        Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    };

    // The peer address is the subscriber key: unique per connection,
    // and gone when the connection goes.
    let client = remote.to_string();
    let reader = match stream.join(&client) {
        Ok(reader) => reader,
        Err(e) => return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    };

    let body = SubscriberBody {
        inner: ReaderStream::new(reader),
        stream: Arc::clone(&stream),
        client,
        client_ip: client_ip(
            headers
                .get("x-forwarded-for")
                .and_then(|v| v.to_str().ok()),
            remote,
        ),
        path,
        user_agent: headers
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string(),
        start,
        bytes: 0,
    };

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, stream.content_type())
        .body(Body::from_stream(body))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

/// Response body for one subscriber. Dropping it (client disconnect or
/// stream end) leaves the stream and writes the access line.
struct SubscriberBody {
    inner: ReaderStream<RtpReader>,
    stream: Arc<RtpStream>,
    client: String,
    client_ip: String,
    path: String,
    user_agent: String,
    start: Instant,
    bytes: u64,
}

impl Stream for SubscriberBody {
    type Item = std::io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        match Pin::new(&mut this.inner).poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                this.bytes += chunk.len() as u64;
                Poll::Ready(Some(Ok(chunk)))
            }
            other => other,
        }
    }
}

impl Drop for SubscriberBody {
    fn drop(&mut self) {
        self.stream.leave(&self.client);
        info!(
            "[RTP] {} {} {:.1?} {} [{}]",
            self.client_ip,
            self.path,
            self.start.elapsed(),
            byte_count(self.bytes),
            self.user_agent
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use std::net::Ipv4Addr;
    use tower::ServiceExt;

    fn request(uri: &str) -> Request<Body> {
        let remote: SocketAddr = "127.0.0.1:40000".parse().unwrap();
        Request::builder()
            .uri(uri)
            .extension(ConnectInfo(remote))
            .body(Body::empty())
            .unwrap()
    }

    async fn body_text(response: Response) -> String {
        let collected = response.into_body().collect().await.unwrap();
        String::from_utf8(collected.to_bytes().to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_no_interface_is_500() {
        let app = router(RtpHandlerState {
            server: None,
            first_packet_timeout: Duration::from_millis(50),
        });
        let response = app.oneshot(request("/rtp/239.0.0.1:5000")).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body_text(response).await, "no multicast available");
    }

    #[tokio::test]
    async fn test_missing_address_is_400() {
        let app = router(RtpHandlerState {
            server: Some(Arc::new(RtpServer::new(Ipv4Addr::LOCALHOST))),
            first_packet_timeout: Duration::from_millis(50),
        });
        let response = app.oneshot(request("/rtp/")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_bad_address_is_400() {
        let app = router(RtpHandlerState {
            server: Some(Arc::new(RtpServer::new(Ipv4Addr::LOCALHOST))),
            first_packet_timeout: Duration::from_millis(50),
        });
        let response = app
            .oneshot(request("/rtp/not-a-multicast-address"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(body_text(response).await.contains("invalid multicast address"));
    }

    #[tokio::test]
    async fn test_unicast_address_is_rejected() {
        let app = router(RtpHandlerState {
            server: Some(Arc::new(RtpServer::new(Ipv4Addr::LOCALHOST))),
            first_packet_timeout: Duration::from_millis(50),
        });
        let response = app.oneshot(request("/rtp/10.0.0.1:5000")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
