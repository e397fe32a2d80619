pub mod rest;
pub mod socket;

use thiserror::Error;

pub use rest::{ExamApi, HttpExamApi};
pub use socket::{
    ack_channel, AckReceiver, AckResponder, ChannelSocket, ExamSocket, InboundEvent, ListenerId,
    Outcome, OutboundEvent, OutboundFrame, ProgressPayload, SocketBridge, SocketController,
    StartPayload, SubmitPayload, Subscription,
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("request failed with status {status}: {message}")]
    Status { status: u16, message: String },
    #[error("network error: {0}")]
    Network(String),
    #[error("malformed payload: {0}")]
    Malformed(String),
    #[error("socket is disconnected")]
    Disconnected,
    #[error("{0}")]
    Rejected(String),
    #[error("acknowledgement timed out")]
    AckTimeout,
    #[error("transport closed")]
    Closed,
}

impl TransportError {
    /// Structured "nothing recorded yet" signal (no progress, no result).
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}
