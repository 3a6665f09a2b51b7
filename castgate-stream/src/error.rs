use thiserror::Error;

#[derive(Error, Debug)]
pub enum StreamError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("RTP parse error: {0}")]
    Rtp(String),

    #[error("invalid multicast address: {0}")]
    InvalidAddress(String),

    #[error("no packet received on {0} within {1:?}")]
    FirstPacketTimeout(String, std::time::Duration),

    #[error("no more clients in {0}")]
    NoSubscribers(String),

    #[error("stream closed: {0}")]
    Closed(String),
}

pub type StreamResult<T> = Result<T, StreamError>;

impl From<webrtc_util::Error> for StreamError {
    fn from(err: webrtc_util::Error) -> Self {
        StreamError::Rtp(err.to_string())
    }
}
