// castgate-proxy - URL-rewriting reverse proxy for HLS playlists
//
// Requests arrive as `/r/<original-url>`; the proxy reconstructs the
// upstream URL, forwards the request with hop-by-hop headers stripped,
// and rewrites whatever would lead the client away from the gateway:
// absolute URLs inside `#EXTM3U` playlists, redirect Locations, and
// proxied Referers. Everything that is not a playlist streams through
// untouched.

pub mod headers;
pub mod rewrite;

use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::LazyLock;
use std::sync::atomic::{AtomicI64, Ordering};
use std::task::{Context, Poll};
use std::time::Instant;

use axum::{
    Router,
    body::Body,
    extract::{ConnectInfo, Request, State},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::any,
};
use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt, TryStreamExt};
use thiserror::Error;
use tracing::{info, warn};

use castgate_core::util::{byte_count, client_ip};

pub use headers::prune;
pub use rewrite::{normalize_url, rewrite_location, rewrite_playlist, unwrap_referer};

/// First-line magic of an HLS playlist.
pub const M3U_MAGIC: &[u8] = b"#EXTM3U";

#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("make request failed: {0}")]
    Upstream(#[from] reqwest::Error),

    #[error("make request failed: {0}")]
    Url(#[from] url::ParseError),
}

/// Shared upstream client. Redirects stay disabled so `Location` can be
/// rewritten and handed back to the player.
///
/// # Panics
///
/// Panics at first use if the client cannot be built (TLS backend
/// missing); the proxy cannot run without one.
static UPSTREAM_CLIENT: LazyLock<reqwest::Client> = LazyLock::new(|| {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .unwrap_or_else(|e| {
            tracing::error!("failed to build upstream HTTP client: {e}");
            panic!("failed to build upstream HTTP client: {e}")
        })
});

/// Count of in-flight proxied responses, sampled by the status
/// reporter.
#[derive(Clone, Default)]
pub struct HlsGauge(Arc<AtomicI64>);

impl HlsGauge {
    pub fn get(&self) -> i64 {
        self.0.load(Ordering::Relaxed)
    }

    fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    fn dec(&self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

#[derive(Clone, Default)]
pub struct ProxyState {
    pub gauge: HlsGauge,
}

pub fn router(state: ProxyState) -> Router {
    Router::new()
        .route("/r/", any(handle_proxy))
        .route("/r/*rest", any(handle_proxy))
        .with_state(state)
}

async fn handle_proxy(
    State(state): State<ProxyState>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    request: Request,
) -> Response {
    let start = Instant::now();
    let (parts, request_body) = request.into_parts();
    let path = parts.uri.path().to_string();
    let wrapped = parts
        .uri
        .path_and_query()
        .map_or_else(|| parts.uri.path(), |pq| pq.as_str());

    let target = normalize_url(wrapped.strip_prefix("/r/").unwrap_or(wrapped));
    let target = match url::Url::parse(&target) {
        Ok(url) => url,
        Err(e) => {
            warn!("fix url failed: {e}");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                ProxyError::from(e).to_string(),
            )
                .into_response();
        }
    };

    let mut outbound = parts.headers.clone();
    if let Some(referer) = outbound
        .get(header::REFERER)
        .and_then(|v| v.to_str().ok())
        .and_then(unwrap_referer)
    {
        if let Ok(value) = HeaderValue::from_str(&referer) {
            outbound.insert(header::REFERER, value);
        }
    }
    prune(&mut outbound);
    // Identity encoding: the playlist rewriter reads the body as text.
    outbound.remove(header::ACCEPT_ENCODING);
    // The upstream host comes from the reconstructed URL.
    outbound.remove(header::HOST);
    outbound.remove(header::CONTENT_LENGTH);

    let upstream = match UPSTREAM_CLIENT
        .request(parts.method.clone(), target)
        .headers(outbound)
        .body(reqwest::Body::wrap_stream(request_body.into_data_stream()))
        .send()
        .await
    {
        Ok(response) => response,
        Err(e) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                ProxyError::from(e).to_string(),
            )
                .into_response();
        }
    };

    let status = upstream.status();
    let mut response_headers = upstream.headers().clone();
    if let Some(wrapped_location) = response_headers
        .get(header::LOCATION)
        .and_then(|v| v.to_str().ok())
        .and_then(rewrite_location)
    {
        if let Ok(value) = HeaderValue::from_str(&wrapped_location) {
            info!("[REDIR] {wrapped_location}");
            response_headers.insert(header::LOCATION, value);
        }
    }
    // Framing is re-decided on our side of the hop.
    response_headers.remove(header::TRANSFER_ENCODING);

    let content_length = upstream.content_length();
    let mut body_stream = upstream.bytes_stream();

    // Playlists are recognized by their first bytes. Responses with a
    // known length of at most the magic length cannot be playlists and
    // stream through uninspected.
    let inspect = content_length.is_none_or(|length| length > M3U_MAGIC.len() as u64);

    let body: Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>> = if inspect {
        let mut peeked = BytesMut::new();
        while peeked.len() < M3U_MAGIC.len() {
            match body_stream.next().await {
                Some(Ok(chunk)) => peeked.extend_from_slice(&chunk),
                Some(Err(e)) => {
                    return (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        format!("detect magic header failed: {e}"),
                    )
                        .into_response();
                }
                None => break,
            }
        }

        if peeked.len() >= M3U_MAGIC.len() && &peeked[..M3U_MAGIC.len()] == M3U_MAGIC {
            // Whole-body rewrite; mid-body upstream failures degrade to
            // rewriting what arrived.
            while let Some(chunk) = body_stream.next().await {
                match chunk {
                    Ok(chunk) => peeked.extend_from_slice(&chunk),
                    Err(e) => {
                        info!("playlist body truncated: {e}");
                        break;
                    }
                }
            }
            let fixed = rewrite_playlist(&String::from_utf8_lossy(&peeked));
            response_headers.insert(header::CONTENT_LENGTH, HeaderValue::from(fixed.len()));
            Box::pin(futures::stream::once(async move { Ok(Bytes::from(fixed)) }))
        } else {
            let head = futures::stream::iter([Ok(peeked.freeze())]);
            Box::pin(head.chain(body_stream.map_err(io::Error::other)))
        }
    } else {
        Box::pin(body_stream.map_err(io::Error::other))
    };

    state.gauge.inc();
    let body = AccessBody {
        inner: body,
        gauge: state.gauge.clone(),
        client_ip: client_ip(
            parts
                .headers
                .get("x-forwarded-for")
                .and_then(|v| v.to_str().ok()),
            remote,
        ),
        path,
        user_agent: parts
            .headers
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string(),
        start,
        bytes: 0,
    };

    let mut response = Response::new(Body::from_stream(body));
    *response.status_mut() = status;
    *response.headers_mut() = response_headers;
    response
}

/// Proxied response body: counts bytes for the access line and keeps
/// the client gauge honest however the response ends.
struct AccessBody {
    inner: Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>,
    gauge: HlsGauge,
    client_ip: String,
    path: String,
    user_agent: String,
    start: Instant,
    bytes: u64,
}

impl Stream for AccessBody {
    type Item = io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        match this.inner.as_mut().poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                this.bytes += chunk.len() as u64;
                Poll::Ready(Some(Ok(chunk)))
            }
            other => other,
        }
    }
}

impl Drop for AccessBody {
    fn drop(&mut self) {
        self.gauge.dec();
        info!(
            "[HLS] {} {} {:.1?} {} [{}]",
            self.client_ip,
            self.path,
            self.start.elapsed(),
            byte_count(self.bytes),
            self.user_agent
        );
    }
}
