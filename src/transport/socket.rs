use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::schemas::{AnswerEntry, SubmissionResult};
use crate::transport::TransportError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartPayload {
    pub exam_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressPayload {
    pub exam_id: String,
    pub answers: Vec<AnswerEntry>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub start_time: Option<OffsetDateTime>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitPayload {
    pub exam_id: String,
    pub answers: Vec<AnswerEntry>,
}

/// Events the session sends to the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", content = "payload")]
pub enum OutboundEvent {
    #[serde(rename = "startExam")]
    StartExam(StartPayload),
    #[serde(rename = "saveExamProgress")]
    SaveExamProgress(ProgressPayload),
    #[serde(rename = "submitExam")]
    SubmitExam(SubmitPayload),
}

impl OutboundEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::StartExam(_) => "startExam",
            Self::SaveExamProgress(_) => "saveExamProgress",
            Self::SubmitExam(_) => "submitExam",
        }
    }

    pub fn exam_id(&self) -> &str {
        match self {
            Self::StartExam(payload) => &payload.exam_id,
            Self::SaveExamProgress(payload) => &payload.exam_id,
            Self::SubmitExam(payload) => &payload.exam_id,
        }
    }
}

/// Acknowledgement or pushed submission payload: `{ success, data?, message? }`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Outcome {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub data: Option<SubmissionResult>,
    #[serde(default)]
    pub message: Option<String>,
}

impl Outcome {
    pub fn from_value(value: Value) -> Result<Self, TransportError> {
        serde_json::from_value(value).map_err(|err| TransportError::Malformed(format!("ack: {err}")))
    }
}

/// Events the server pushes, validated at the transport boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    ExamStarted { start_time: OffsetDateTime, answers: Option<Vec<AnswerEntry>> },
    ExamSubmitted(Outcome),
    ExamAutoSubmitted(Outcome),
    Error { message: String },
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StartedFrame {
    #[serde(with = "time::serde::rfc3339")]
    start_time: OffsetDateTime,
    #[serde(default)]
    answers: Option<Vec<AnswerEntry>>,
}

#[derive(Debug, Deserialize)]
struct ErrorFrame {
    #[serde(default)]
    message: Option<String>,
}

impl InboundEvent {
    pub fn from_frame(name: &str, payload: Value) -> Result<Self, TransportError> {
        match name {
            "examStarted" => {
                let frame: StartedFrame = decode(name, payload)?;
                Ok(Self::ExamStarted { start_time: frame.start_time, answers: frame.answers })
            }
            "examSubmitted" => Ok(Self::ExamSubmitted(decode(name, payload)?)),
            "examAutoSubmitted" => Ok(Self::ExamAutoSubmitted(decode(name, payload)?)),
            "error" => {
                let message = match payload {
                    Value::String(message) => message,
                    other => decode::<ErrorFrame>(name, other)?
                        .message
                        .unwrap_or_else(|| "Unknown socket error".to_string()),
                };
                Ok(Self::Error { message })
            }
            other => Err(TransportError::Malformed(format!("unknown socket event '{other}'"))),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::ExamStarted { .. } => "examStarted",
            Self::ExamSubmitted(_) => "examSubmitted",
            Self::ExamAutoSubmitted(_) => "examAutoSubmitted",
            Self::Error { .. } => "error",
        }
    }
}

fn decode<T: serde::de::DeserializeOwned>(name: &str, payload: Value) -> Result<T, TransportError> {
    serde_json::from_value(payload)
        .map_err(|err| TransportError::Malformed(format!("{name} payload: {err}")))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(Uuid);

impl ListenerId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ListenerId {
    fn default() -> Self {
        Self::new()
    }
}

pub struct Subscription {
    pub id: ListenerId,
    pub events: mpsc::UnboundedReceiver<InboundEvent>,
}

#[derive(Debug)]
pub struct AckReceiver(oneshot::Receiver<Result<Outcome, TransportError>>);

#[derive(Debug)]
pub struct AckResponder(oneshot::Sender<Result<Outcome, TransportError>>);

pub fn ack_channel() -> (AckResponder, AckReceiver) {
    let (tx, rx) = oneshot::channel();
    (AckResponder(tx), AckReceiver(rx))
}

impl AckReceiver {
    pub async fn wait(self, timeout: Duration) -> Result<Outcome, TransportError> {
        match tokio::time::timeout(timeout, self.0).await {
            Err(_) => Err(TransportError::AckTimeout),
            Ok(Err(_)) => Err(TransportError::Closed),
            Ok(Ok(outcome)) => outcome,
        }
    }
}

impl AckResponder {
    /// Validates a raw acknowledgement before handing it to the waiting emitter.
    pub fn reply(self, raw: Value) {
        let _ = self.0.send(Outcome::from_value(raw));
    }

    pub fn fail(self, error: TransportError) {
        let _ = self.0.send(Err(error));
    }
}

/// Event channel to the server. Emission order equals call order.
pub trait ExamSocket: Send + Sync {
    fn is_connected(&self) -> bool;

    /// Fire-and-forget; a no-op returning `Disconnected` while offline.
    fn emit(&self, event: OutboundEvent) -> Result<(), TransportError>;

    fn emit_with_ack(&self, event: OutboundEvent) -> Result<AckReceiver, TransportError>;

    fn subscribe(&self, exam_id: &str) -> Subscription;

    fn unsubscribe(&self, id: ListenerId);
}

#[derive(Debug)]
pub struct OutboundFrame {
    pub event: OutboundEvent,
    pub responder: Option<AckResponder>,
}

struct Listener {
    exam_id: String,
    events: mpsc::UnboundedSender<InboundEvent>,
}

struct Shared {
    connected: AtomicBool,
    listeners: Mutex<HashMap<ListenerId, Listener>>,
}

impl Shared {
    fn listeners(&self) -> MutexGuard<'_, HashMap<ListenerId, Listener>> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// In-process socket: the session side of a bridge whose other half is owned
/// by whatever drives the real connection.
#[derive(Clone)]
pub struct ChannelSocket {
    shared: Arc<Shared>,
    outbound: mpsc::UnboundedSender<OutboundFrame>,
}

pub struct SocketBridge {
    controller: SocketController,
    frames: mpsc::UnboundedReceiver<OutboundFrame>,
}

#[derive(Clone)]
pub struct SocketController {
    shared: Arc<Shared>,
}

impl ChannelSocket {
    pub fn new(connected: bool) -> (Self, SocketBridge) {
        let shared = Arc::new(Shared {
            connected: AtomicBool::new(connected),
            listeners: Mutex::new(HashMap::new()),
        });
        let (outbound, frames) = mpsc::unbounded_channel();
        let bridge = SocketBridge { controller: SocketController { shared: shared.clone() }, frames };
        (Self { shared, outbound }, bridge)
    }

    fn send(&self, frame: OutboundFrame) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::Disconnected);
        }
        self.outbound.send(frame).map_err(|_| TransportError::Closed)
    }
}

impl ExamSocket for ChannelSocket {
    fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Acquire)
    }

    fn emit(&self, event: OutboundEvent) -> Result<(), TransportError> {
        self.send(OutboundFrame { event, responder: None })
    }

    fn emit_with_ack(&self, event: OutboundEvent) -> Result<AckReceiver, TransportError> {
        let (responder, receiver) = ack_channel();
        self.send(OutboundFrame { event, responder: Some(responder) })?;
        Ok(receiver)
    }

    fn subscribe(&self, exam_id: &str) -> Subscription {
        let (events, receiver) = mpsc::unbounded_channel();
        let id = ListenerId::new();
        self.shared.listeners().insert(id, Listener { exam_id: exam_id.to_string(), events });
        Subscription { id, events: receiver }
    }

    fn unsubscribe(&self, id: ListenerId) {
        self.shared.listeners().remove(&id);
    }
}

impl SocketBridge {
    pub fn controller(&self) -> SocketController {
        self.controller.clone()
    }

    pub async fn next_frame(&mut self) -> Option<OutboundFrame> {
        self.frames.recv().await
    }

    pub fn try_next_frame(&mut self) -> Option<OutboundFrame> {
        self.frames.try_recv().ok()
    }
}

impl SocketController {
    pub fn set_connected(&self, connected: bool) {
        self.shared.connected.store(connected, Ordering::Release);
    }

    /// Delivers a raw server frame to the listeners of its exam. Frames without
    /// an `examId` reach every listener. Returns how many listeners got it.
    pub fn push(&self, name: &str, payload: Value) -> Result<usize, TransportError> {
        let target = payload.get("examId").and_then(Value::as_str).map(str::to_string);
        let event = InboundEvent::from_frame(name, payload).map_err(|err| {
            tracing::warn!(event = name, error = %err, "Dropping malformed socket frame");
            err
        })?;

        let mut listeners = self.shared.listeners();
        listeners.retain(|_, listener| !listener.events.is_closed());
        let delivered = listeners
            .values()
            .filter(|listener| target.as_deref().map_or(true, |id| id == listener.exam_id))
            .filter(|listener| listener.events.send(event.clone()).is_ok())
            .count();
        Ok(delivered)
    }

    pub fn listener_count(&self) -> usize {
        self.shared.listeners().len()
    }
}
