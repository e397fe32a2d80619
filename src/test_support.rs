use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex, OnceLock};
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use serde_json::json;
use time::macros::datetime;
use time::{Duration, OffsetDateTime};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::core::config::SessionSettings;
use crate::core::time::Clock;
use crate::schemas::{
    AnswerEntry, Attempt, Exam, ExamPayload, ExamProgress, ResultStatus, StartedExam,
    SubmissionResult,
};
use crate::session::{ExamSession, ExamView, Phase};
use crate::transport::{
    ChannelSocket, ExamApi, OutboundEvent, SocketBridge, SocketController, TransportError,
};

pub(crate) const EXAM_ID: &str = "exam-1";
pub(crate) const T0: OffsetDateTime = datetime!(2025-03-01 09:00:00 UTC);

pub(crate) async fn env_lock() -> OwnedMutexGuard<()> {
    static LOCK: OnceLock<Arc<Mutex<()>>> = OnceLock::new();
    let lock = LOCK.get_or_init(|| Arc::new(Mutex::new(()))).clone();
    lock.lock_owned().await
}

/// `questions` questions with ids `q1..qN`, four options each, option 0 correct.
pub(crate) fn sample_payload(duration_minutes: u32, questions: usize) -> ExamPayload {
    let questions: Vec<_> = (1..=questions)
        .map(|n| {
            json!({
                "_id": format!("q{n}"),
                "question": format!("Question {n}"),
                "options": ["alpha", "beta", "gamma", "delta"],
                "correctAnswer": 0,
                "points": 1
            })
        })
        .collect();
    serde_json::from_value(json!({
        "_id": EXAM_ID,
        "title": "Ownership and borrowing",
        "description": "Short quiz",
        "duration": duration_minutes,
        "passingScore": 70,
        "questions": questions
    }))
    .expect("sample exam payload")
}

pub(crate) fn sample_exam(duration_minutes: u32, questions: usize) -> Exam {
    Exam::try_from(sample_payload(duration_minutes, questions)).expect("sample exam")
}

pub(crate) fn progress_started_ago(
    now: OffsetDateTime,
    seconds: i64,
    answers: Vec<AnswerEntry>,
) -> ExamProgress {
    ExamProgress {
        start_time: Some(now - Duration::seconds(seconds)),
        answers,
        is_submitted: false,
    }
}

fn result_with(score: f64, total: f64, status: ResultStatus) -> SubmissionResult {
    let passed = status == ResultStatus::Passed;
    SubmissionResult {
        score,
        total_points: total,
        passed,
        status,
        attempts: vec![Attempt { score, passed, completed_at: T0, answers: Vec::new() }],
    }
}

pub(crate) fn failed_result() -> SubmissionResult {
    result_with(1.0, 3.0, ResultStatus::Failed)
}

pub(crate) fn passed_result() -> SubmissionResult {
    result_with(3.0, 3.0, ResultStatus::Passed)
}

pub(crate) fn idle_settings() -> SessionSettings {
    SessionSettings {
        tick_interval: StdDuration::from_secs(3600),
        checkpoint_period_seconds: 10,
        ack_timeout: StdDuration::from_secs(2),
    }
}

pub(crate) struct ManualClock {
    now: StdMutex<OffsetDateTime>,
}

impl ManualClock {
    pub(crate) fn at(now: OffsetDateTime) -> Arc<Self> {
        Arc::new(Self { now: StdMutex::new(now) })
    }

    pub(crate) fn advance(&self, seconds: i64) {
        let mut now = self.now.lock().expect("clock");
        *now += Duration::seconds(seconds);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> OffsetDateTime {
        *self.now.lock().expect("clock")
    }
}

#[derive(Default)]
struct FakeRecords {
    progress: Option<ExamProgress>,
    result: Option<SubmissionResult>,
    exam_error: Option<TransportError>,
    progress_error: Option<TransportError>,
    result_error: Option<TransportError>,
    start_error: Option<TransportError>,
}

/// In-memory exam backend. Missing records answer with 404 like the real API.
pub(crate) struct FakeExamApi {
    exam: ExamPayload,
    clock: Arc<ManualClock>,
    records: StdMutex<FakeRecords>,
    start_calls: AtomicUsize,
    result_calls: AtomicUsize,
}

impl FakeExamApi {
    pub(crate) fn new(exam: ExamPayload, clock: Arc<ManualClock>) -> Self {
        Self {
            exam,
            clock,
            records: StdMutex::new(FakeRecords::default()),
            start_calls: AtomicUsize::new(0),
            result_calls: AtomicUsize::new(0),
        }
    }

    fn records(&self) -> std::sync::MutexGuard<'_, FakeRecords> {
        self.records.lock().expect("records")
    }

    pub(crate) fn with_progress(self, progress: ExamProgress) -> Self {
        self.records().progress = Some(progress);
        self
    }

    pub(crate) fn with_result(self, result: SubmissionResult) -> Self {
        self.records().result = Some(result);
        self
    }

    pub(crate) fn fail_exam(&self, error: TransportError) {
        self.records().exam_error = Some(error);
    }

    pub(crate) fn fail_progress(&self, error: TransportError) {
        self.records().progress_error = Some(error);
    }

    pub(crate) fn fail_result(&self, error: TransportError) {
        self.records().result_error = Some(error);
    }

    pub(crate) fn fail_start(&self, error: TransportError) {
        self.records().start_error = Some(error);
    }

    pub(crate) fn clock(&self) -> Arc<ManualClock> {
        self.clock.clone()
    }

    pub(crate) fn progress(&self) -> Option<ExamProgress> {
        self.records().progress.clone()
    }

    pub(crate) fn record_submission(&self, answers: Vec<AnswerEntry>, result: SubmissionResult) {
        let mut records = self.records();
        let start_time = records.progress.as_ref().and_then(|progress| progress.start_time);
        records.progress = Some(ExamProgress { start_time, answers, is_submitted: true });
        records.result = Some(result);
    }

    pub(crate) fn start_calls(&self) -> usize {
        self.start_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn result_calls(&self) -> usize {
        self.result_calls.load(Ordering::SeqCst)
    }
}

fn not_found(what: &str) -> TransportError {
    TransportError::NotFound(format!("{what} not found"))
}

#[async_trait]
impl ExamApi for FakeExamApi {
    async fn get_exam(&self, _exam_id: &str) -> Result<ExamPayload, TransportError> {
        match self.records().exam_error.clone() {
            Some(error) => Err(error),
            None => Ok(self.exam.clone()),
        }
    }

    async fn get_progress(&self, _exam_id: &str) -> Result<ExamProgress, TransportError> {
        let records = self.records();
        if let Some(error) = records.progress_error.clone() {
            return Err(error);
        }
        records.progress.clone().ok_or_else(|| not_found("progress"))
    }

    async fn start_exam(&self, _exam_id: &str) -> Result<StartedExam, TransportError> {
        self.start_calls.fetch_add(1, Ordering::SeqCst);
        let mut records = self.records();
        if let Some(error) = records.start_error.clone() {
            return Err(error);
        }
        let start_time = self.clock.now();
        records.progress =
            Some(ExamProgress { start_time: Some(start_time), answers: Vec::new(), is_submitted: false });
        Ok(StartedExam { start_time })
    }

    async fn get_result(&self, _exam_id: &str) -> Result<SubmissionResult, TransportError> {
        self.result_calls.fetch_add(1, Ordering::SeqCst);
        let records = self.records();
        if let Some(error) = records.result_error.clone() {
            return Err(error);
        }
        records.result.clone().ok_or_else(|| not_found("result"))
    }
}

#[derive(Debug, Clone)]
pub(crate) enum SubmitReply {
    /// Record the submission and acknowledge with the result attached.
    Result(SubmissionResult),
    /// Record the submission and acknowledge without data.
    Bare(SubmissionResult),
    Reject(String),
    /// Drop the acknowledgement without answering.
    Hang,
}

/// Plays the server side of a [`SocketBridge`]: logs every frame and answers
/// acknowledgements according to the current script.
#[derive(Clone)]
pub(crate) struct FakeServer {
    frames: Arc<StdMutex<Vec<OutboundEvent>>>,
    submit: Arc<StdMutex<SubmitReply>>,
    checkpoints_ok: Arc<AtomicBool>,
}

impl FakeServer {
    pub(crate) fn spawn(mut bridge: SocketBridge, api: Arc<FakeExamApi>) -> Self {
        let server = Self {
            frames: Arc::default(),
            submit: Arc::new(StdMutex::new(SubmitReply::Result(failed_result()))),
            checkpoints_ok: Arc::new(AtomicBool::new(true)),
        };
        let handle = server.clone();
        tokio::spawn(async move {
            while let Some(frame) = bridge.next_frame().await {
                handle.frames.lock().expect("frames").push(frame.event.clone());
                let Some(responder) = frame.responder else {
                    continue;
                };
                match frame.event {
                    OutboundEvent::SaveExamProgress(_) => {
                        if handle.checkpoints_ok.load(Ordering::SeqCst) {
                            responder.reply(json!({ "success": true }));
                        } else {
                            responder.reply(json!({ "success": false, "message": "storage unavailable" }));
                        }
                    }
                    OutboundEvent::SubmitExam(payload) => {
                        let reply = handle.submit.lock().expect("script").clone();
                        match reply {
                            SubmitReply::Result(result) => {
                                api.record_submission(payload.answers, result.clone());
                                responder.reply(json!({ "success": true, "data": result }));
                            }
                            SubmitReply::Bare(result) => {
                                api.record_submission(payload.answers, result);
                                responder.reply(json!({ "success": true }));
                            }
                            SubmitReply::Reject(message) => {
                                responder.reply(json!({ "success": false, "message": message }));
                            }
                            SubmitReply::Hang => drop(responder),
                        }
                    }
                    OutboundEvent::StartExam(_) => responder.reply(json!({ "success": true })),
                }
            }
        });
        server
    }

    pub(crate) fn script_submit(&self, reply: SubmitReply) {
        *self.submit.lock().expect("script") = reply;
    }

    pub(crate) fn fail_checkpoints(&self) {
        self.checkpoints_ok.store(false, Ordering::SeqCst);
    }

    pub(crate) fn frames(&self) -> Vec<OutboundEvent> {
        self.frames.lock().expect("frames").clone()
    }

    pub(crate) fn count(&self, name: &str) -> usize {
        self.frames().iter().filter(|event| event.name() == name).count()
    }
}

pub(crate) struct Harness {
    pub(crate) session: ExamSession,
    pub(crate) api: Arc<FakeExamApi>,
    pub(crate) clock: Arc<ManualClock>,
    pub(crate) socket: Arc<ChannelSocket>,
    pub(crate) controller: SocketController,
    pub(crate) server: FakeServer,
    pub(crate) settings: SessionSettings,
}

impl Harness {
    /// Another session over the same backend and socket, as after a remount.
    pub(crate) fn second_session(&self) -> ExamSession {
        ExamSession::new(
            EXAM_ID,
            self.api.clone(),
            self.socket.clone(),
            self.clock.clone(),
            self.settings,
        )
    }
}

pub(crate) fn session_with(api: FakeExamApi, settings: SessionSettings) -> Harness {
    let api = Arc::new(api);
    let clock = api.clock();
    let (socket, bridge) = ChannelSocket::new(true);
    let socket = Arc::new(socket);
    let controller = bridge.controller();
    let server = FakeServer::spawn(bridge, api.clone());
    let session =
        ExamSession::new(EXAM_ID, api.clone(), socket.clone(), clock.clone(), settings);
    Harness { session, api, clock, socket, controller, server, settings }
}

/// Three one-point questions, sixty minutes, clock at [`T0`].
pub(crate) fn harness() -> Harness {
    session_with(FakeExamApi::new(sample_payload(60, 3), ManualClock::at(T0)), idle_settings())
}

pub(crate) async fn wait_until(mut check: impl FnMut() -> bool) {
    let waited = tokio::time::timeout(StdDuration::from_secs(2), async {
        while !check() {
            tokio::time::sleep(StdDuration::from_millis(5)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "condition not reached in time");
}

pub(crate) async fn wait_for_view(session: &ExamSession, check: impl Fn(&ExamView) -> bool) -> ExamView {
    let waited = tokio::time::timeout(StdDuration::from_secs(2), async {
        loop {
            let view = session.view().await;
            if check(&view) {
                return view;
            }
            tokio::time::sleep(StdDuration::from_millis(5)).await;
        }
    })
    .await;
    waited.expect("view did not reach the expected state in time")
}

pub(crate) async fn wait_for_phase(session: &ExamSession, phase: Phase) -> ExamView {
    wait_for_view(session, |view| view.phase == phase).await
}
