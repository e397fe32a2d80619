use std::sync::{Arc, Weak};

use time::OffsetDateTime;
use tokio::sync::{Mutex, MutexGuard};

use crate::core::config::SessionSettings;
use crate::core::time::{format_offset, Clock};
use crate::schemas::{AnswerEntry, AnswerSet, Exam, SubmissionResult};
use crate::services::exam_timing::{compute_remaining, is_checkpoint_second};
use crate::session::countdown::Countdown;
use crate::session::reconcile::{reconcile, Reconciled};
use crate::session::view::ExamView;
use crate::session::{Phase, SessionError};
use crate::shell::spawn_contained;
use crate::transport::{
    AckReceiver, ExamApi, ExamSocket, InboundEvent, ListenerId, Outcome, OutboundEvent,
    ProgressPayload, StartPayload, SubmitPayload, TransportError,
};

const OFFLINE_NOTICE: &str =
    "You are offline. The exam cannot be started or submitted until the connection is restored.";
const SUBMITTED_NOTICE: &str = "Your exam has been submitted.";
const TIME_UP_NOTICE: &str = "Time's up! Your exam was submitted automatically.";
const AUTO_SUBMITTING_NOTICE: &str = "Time's up! Submitting your answers...";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Continue,
    Stop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SubmitMode {
    Manual,
    Auto,
    Pushed,
}

impl SubmitMode {
    fn label(self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Auto => "auto",
            Self::Pushed => "pushed",
        }
    }
}

pub(super) struct SessionState {
    pub(super) phase: Phase,
    pub(super) epoch: u64,
    pub(super) exam: Option<Arc<Exam>>,
    pub(super) answers: AnswerSet,
    pub(super) start_time: Option<OffsetDateTime>,
    pub(super) remaining: u64,
    pub(super) result: Option<SubmissionResult>,
    pub(super) error: Option<String>,
    pub(super) notice: Option<String>,
    pub(super) confirming: bool,
    pub(super) submitting: bool,
    pub(super) starting: bool,
    auto_submit_fired: bool,
    countdown: Option<Countdown>,
    listener: Option<ListenerId>,
}

impl SessionState {
    fn new() -> Self {
        Self {
            phase: Phase::Loading,
            epoch: 0,
            exam: None,
            answers: AnswerSet::default(),
            start_time: None,
            remaining: 0,
            result: None,
            error: None,
            notice: None,
            confirming: false,
            submitting: false,
            starting: false,
            auto_submit_fired: false,
            countdown: None,
            listener: None,
        }
    }

    fn reset_for_load(&mut self) {
        self.phase = Phase::Loading;
        self.exam = None;
        self.answers = AnswerSet::default();
        self.start_time = None;
        self.remaining = 0;
        self.result = None;
        self.error = None;
        self.notice = None;
        self.auto_submit_fired = false;
    }
}

pub(super) struct Inner {
    exam_id: String,
    api: Arc<dyn ExamApi>,
    socket: Arc<dyn ExamSocket>,
    clock: Arc<dyn Clock>,
    settings: SessionSettings,
    state: Mutex<SessionState>,
}

impl Inner {
    fn stop_countdown(state: &mut SessionState) {
        if let Some(countdown) = state.countdown.take() {
            countdown.cancel();
        }
    }

    fn detach_listener(&self, state: &mut SessionState) {
        if let Some(id) = state.listener.take() {
            self.socket.unsubscribe(id);
        }
    }

    /// Stops everything the current attempt owns and invalidates its pending work.
    fn teardown_locked(&self, state: &mut SessionState) {
        Self::stop_countdown(state);
        self.detach_listener(state);
        state.epoch += 1;
        state.confirming = false;
        state.submitting = false;
        state.starting = false;
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        Self::stop_countdown(state);
        if let Some(id) = state.listener.take() {
            self.socket.unsubscribe(id);
        }
    }
}

/// Client-side state machine for one exam.
///
/// Cloning is cheap and every clone drives the same session. Background work
/// (the countdown and the socket listener) only holds weak references, so the
/// session is torn down once the last handle is dropped.
#[derive(Clone)]
pub struct ExamSession {
    inner: Arc<Inner>,
}

impl ExamSession {
    pub fn new(
        exam_id: impl Into<String>,
        api: Arc<dyn ExamApi>,
        socket: Arc<dyn ExamSocket>,
        clock: Arc<dyn Clock>,
        settings: SessionSettings,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                exam_id: exam_id.into(),
                api,
                socket,
                clock,
                settings,
                state: Mutex::new(SessionState::new()),
            }),
        }
    }

    pub(super) fn from_inner(inner: Arc<Inner>) -> Self {
        Self { inner }
    }

    fn downgrade(&self) -> Weak<Inner> {
        Arc::downgrade(&self.inner)
    }

    pub fn exam_id(&self) -> &str {
        &self.inner.exam_id
    }

    pub async fn phase(&self) -> Phase {
        self.inner.state.lock().await.phase
    }

    pub async fn view(&self) -> ExamView {
        let state = self.inner.state.lock().await;
        ExamView::build(&self.inner.exam_id, &state, self.inner.socket.is_connected())
    }

    pub async fn countdown_active(&self) -> bool {
        let state = self.inner.state.lock().await;
        state.countdown.as_ref().is_some_and(|countdown| !countdown.is_finished())
    }

    /// Loads the exam and reconciles it against the server's progress record.
    /// Calling it again is a full reload.
    pub async fn load(&self) -> Result<Phase, SessionError> {
        let epoch = {
            let mut state = self.inner.state.lock().await;
            self.inner.teardown_locked(&mut state);
            state.reset_for_load();
            state.epoch
        };

        let exam = match self.fetch_exam().await {
            Ok(exam) => Arc::new(exam),
            Err(err) => return Err(self.fail_load(epoch, err).await),
        };
        let progress = match self.inner.api.get_progress(&self.inner.exam_id).await {
            Ok(progress) => Some(progress),
            Err(err) if err.is_not_found() => None,
            Err(err) => return Err(self.fail_load(epoch, err.into()).await),
        };

        match reconcile(&exam, progress.as_ref(), self.inner.clock.now()) {
            Reconciled::Submitted => {
                let result = match self.inner.api.get_result(&self.inner.exam_id).await {
                    Ok(result) => result,
                    Err(err) => return Err(self.fail_load(epoch, err.into()).await),
                };
                let Some(mut state) = self.lock_current(epoch).await else {
                    return Ok(self.phase().await);
                };
                state.answers = AnswerSet::for_exam(&exam);
                state.exam = Some(exam);
                state.result = Some(result);
                state.phase = Phase::Result;
                tracing::info!(exam_id = %self.inner.exam_id, "Exam already submitted, showing result");
                Ok(Phase::Result)
            }
            Reconciled::NotStarted { answers, has_record } => {
                let previous = self.probe_result().await;
                let Some(mut state) = self.lock_current(epoch).await else {
                    return Ok(self.phase().await);
                };
                state.exam = Some(exam.clone());
                state.answers = answers;
                state.remaining = exam.duration_seconds();
                match previous {
                    Some(result) if !has_record => {
                        state.result = Some(result);
                        state.phase = Phase::Result;
                    }
                    previous => {
                        state.result = previous;
                        state.phase = Phase::NotStarted;
                        self.attach_listener(&mut state);
                    }
                }
                tracing::info!(exam_id = %self.inner.exam_id, phase = %state.phase, "Exam loaded");
                Ok(state.phase)
            }
            Reconciled::Resume { start_time, answers, remaining } => {
                {
                    let Some(mut state) = self.lock_current(epoch).await else {
                        return Ok(self.phase().await);
                    };
                    state.exam = Some(exam.clone());
                    state.answers = answers;
                    state.start_time = Some(start_time);
                    state.remaining = remaining;
                    state.phase = Phase::Resuming;
                }

                let previous = self.probe_result().await;
                let Some(mut state) = self.lock_current(epoch).await else {
                    return Ok(self.phase().await);
                };
                state.result = previous;
                let expired = self.enter_in_progress(&mut state, start_time);
                tracing::info!(
                    exam_id = %self.inner.exam_id,
                    remaining = state.remaining,
                    "Resuming exam in progress"
                );
                drop(state);
                if expired {
                    self.auto_submit(epoch).await;
                }
                Ok(self.phase().await)
            }
            Reconciled::Expired { start_time, answers } => {
                {
                    let Some(mut state) = self.lock_current(epoch).await else {
                        return Ok(self.phase().await);
                    };
                    state.exam = Some(exam);
                    state.answers = answers;
                    self.enter_in_progress(&mut state, start_time);
                }
                tracing::info!(
                    exam_id = %self.inner.exam_id,
                    "Exam time ran out while away, submitting automatically"
                );
                self.auto_submit(epoch).await;
                Ok(self.phase().await)
            }
        }
    }

    /// Starts (or, when the server already has a running attempt, resumes) the exam.
    pub async fn start(&self) -> Result<Phase, SessionError> {
        let epoch = {
            let mut state = self.inner.state.lock().await;
            if state.phase != Phase::NotStarted || state.starting {
                return Err(SessionError::InvalidState {
                    action: "start the exam",
                    phase: state.phase,
                });
            }
            self.require_connected(&mut state)?;
            state.starting = true;
            state.error = None;
            state.epoch
        };

        match self.inner.api.get_progress(&self.inner.exam_id).await {
            Ok(progress) if !progress.is_submitted => {
                if let Some(start_time) = progress.start_time {
                    return self.resume_from(epoch, start_time, &progress.answers).await;
                }
            }
            Ok(_) => {}
            Err(err) if err.is_not_found() => {}
            Err(err) => return Err(self.start_failed(epoch, err).await),
        }

        self.begin_attempt(epoch).await
    }

    pub async fn select_option(&self, question_id: &str, index: usize) -> Result<(), SessionError> {
        let mut state = self.inner.state.lock().await;
        if state.phase != Phase::InProgress || state.submitting {
            return Err(SessionError::InvalidState { action: "change answers", phase: state.phase });
        }
        if state.remaining == 0 {
            return Err(SessionError::Validation(
                "Time is up; answers can no longer be changed.".to_string(),
            ));
        }
        self.require_connected(&mut state)?;

        let exam = state.exam.clone().ok_or_else(|| {
            SessionError::InvalidState { action: "change answers", phase: state.phase }
        })?;
        state.answers.select(&exam, question_id, index)?;
        state.error = None;

        let epoch = state.epoch;
        match self.inner.socket.emit_with_ack(progress_event(&self.inner.exam_id, &state)) {
            Ok(receiver) => {
                metrics::counter!("exam_checkpoints_total", "source" => "answer").increment(1);
                let session = self.clone();
                spawn_contained("checkpoint-ack", async move {
                    session.await_checkpoint_ack(epoch, receiver).await;
                });
            }
            Err(err) => {
                metrics::counter!("exam_checkpoint_failures_total").increment(1);
                tracing::warn!(exam_id = %self.inner.exam_id, error = %err, "Checkpoint emit failed");
                state.error = Some(format!("Failed to save progress: {err}"));
            }
        }
        Ok(())
    }

    /// Opens the confirmation step once every question is answered. After the
    /// clock ran out the completeness check no longer applies.
    pub async fn request_submit(&self) -> Result<(), SessionError> {
        let mut state = self.inner.state.lock().await;
        if state.phase != Phase::InProgress || state.submitting {
            return Err(SessionError::InvalidState { action: "submit", phase: state.phase });
        }
        self.require_connected(&mut state)?;
        if let Err(err) = check_complete(&state) {
            state.error = Some(err.to_string());
            state.confirming = false;
            return Err(err);
        }
        state.error = None;
        state.confirming = true;
        Ok(())
    }

    pub async fn cancel_submit(&self) {
        self.inner.state.lock().await.confirming = false;
    }

    pub async fn confirm_submit(&self) -> Result<Phase, SessionError> {
        let (epoch, emitted) = {
            let mut state = self.inner.state.lock().await;
            if state.phase != Phase::InProgress || !state.confirming || state.submitting {
                return Err(SessionError::InvalidState {
                    action: "confirm submission",
                    phase: state.phase,
                });
            }
            state.confirming = false;
            self.require_connected(&mut state)?;
            if let Err(err) = check_complete(&state) {
                state.error = Some(err.to_string());
                return Err(err);
            }
            state.submitting = true;
            state.error = None;
            let event = submit_event(&self.inner.exam_id, &state.answers);
            (state.epoch, self.inner.socket.emit_with_ack(event))
        };

        let outcome = match emitted {
            Ok(receiver) => receiver.wait(self.inner.settings.ack_timeout).await,
            Err(err) => Err(err),
        };
        self.finish_submission(epoch, outcome, SubmitMode::Manual).await
    }

    /// Starts a fresh attempt after a non-passing result.
    pub async fn try_again(&self) -> Result<Phase, SessionError> {
        {
            let mut state = self.inner.state.lock().await;
            if state.phase != Phase::Result {
                return Err(SessionError::InvalidState { action: "try again", phase: state.phase });
            }
            if !state.result.as_ref().is_some_and(SubmissionResult::allows_retry) {
                return Err(SessionError::Validation(
                    "The exam was passed; no further attempts are offered.".to_string(),
                ));
            }
            self.require_connected(&mut state)?;

            self.inner.teardown_locked(&mut state);
            let Some(exam) = state.exam.clone() else {
                return Err(SessionError::InvalidState { action: "try again", phase: state.phase });
            };
            state.answers = AnswerSet::for_exam(&exam);
            state.start_time = None;
            state.remaining = exam.duration_seconds();
            state.auto_submit_fired = false;
            state.error = None;
            state.notice = None;
            state.phase = Phase::NotStarted;
            self.attach_listener(&mut state);
            tracing::info!(exam_id = %self.inner.exam_id, "Starting a new attempt");
        }

        self.start().await
    }

    /// Unmount: stops the countdown, detaches socket listeners and discards
    /// any work still in flight for this session.
    pub async fn teardown(&self) {
        let mut state = self.inner.state.lock().await;
        self.inner.teardown_locked(&mut state);
        tracing::debug!(exam_id = %self.inner.exam_id, "Exam session torn down");
    }

    #[cfg(test)]
    pub(crate) async fn tick_now(&self) -> TickOutcome {
        let epoch = self.inner.state.lock().await.epoch;
        self.tick(epoch).await
    }

    /// One countdown step. The remaining time is always recomputed from the
    /// start time, never decremented.
    pub(super) async fn tick(&self, epoch: u64) -> TickOutcome {
        let mut state = self.inner.state.lock().await;
        if state.epoch != epoch || state.phase != Phase::InProgress {
            return TickOutcome::Stop;
        }
        let (Some(start_time), Some(exam)) = (state.start_time, state.exam.clone()) else {
            return TickOutcome::Stop;
        };

        let remaining = compute_remaining(start_time, exam.duration_seconds(), self.inner.clock.now());
        state.remaining = remaining;

        if remaining == 0 {
            Inner::stop_countdown(&mut state);
            self.trigger_expiry(&mut state);
            return TickOutcome::Stop;
        }

        if is_checkpoint_second(remaining, self.inner.settings.checkpoint_period_seconds)
            && self.inner.socket.is_connected()
            && !state.submitting
        {
            match self.inner.socket.emit(progress_event(&self.inner.exam_id, &state)) {
                Ok(()) => {
                    metrics::counter!("exam_checkpoints_total", "source" => "tick").increment(1)
                }
                Err(err) => {
                    tracing::debug!(exam_id = %self.inner.exam_id, error = %err, "Tick checkpoint skipped")
                }
            }
        }

        TickOutcome::Continue
    }

    async fn fetch_exam(&self) -> Result<Exam, SessionError> {
        let payload = self.inner.api.get_exam(&self.inner.exam_id).await?;
        Ok(Exam::try_from(payload)?)
    }

    async fn probe_result(&self) -> Option<SubmissionResult> {
        match self.inner.api.get_result(&self.inner.exam_id).await {
            Ok(result) => Some(result),
            Err(err) if err.is_not_found() => None,
            Err(err) => {
                tracing::warn!(
                    exam_id = %self.inner.exam_id,
                    error = %err,
                    "Failed to look up previous result"
                );
                None
            }
        }
    }

    async fn lock_current(&self, epoch: u64) -> Option<MutexGuard<'_, SessionState>> {
        let state = self.inner.state.lock().await;
        (state.epoch == epoch).then_some(state)
    }

    async fn fail_load(&self, epoch: u64, err: SessionError) -> SessionError {
        tracing::error!(exam_id = %self.inner.exam_id, error = %err, "Failed to load exam");
        if let Some(mut state) = self.lock_current(epoch).await {
            state.phase = Phase::Error;
            state.error = Some(match &err {
                SessionError::Integrity(message) => format!("This exam cannot be taken: {message}"),
                other => format!("Failed to load exam: {other}"),
            });
        }
        err
    }

    async fn start_failed(&self, epoch: u64, err: TransportError) -> SessionError {
        tracing::warn!(exam_id = %self.inner.exam_id, error = %err, "Failed to start exam");
        if let Some(mut state) = self.lock_current(epoch).await {
            state.starting = false;
            state.error = Some(format!("Failed to start exam: {err}"));
        }
        SessionError::Transport(err)
    }

    async fn resume_from(
        &self,
        epoch: u64,
        start_time: OffsetDateTime,
        saved: &[AnswerEntry],
    ) -> Result<Phase, SessionError> {
        let expired = {
            let Some(mut state) = self.lock_current(epoch).await else {
                return Ok(self.phase().await);
            };
            state.starting = false;
            if let Some(exam) = state.exam.clone() {
                state.answers = AnswerSet::restore(&exam, saved);
            }
            tracing::info!(
                exam_id = %self.inner.exam_id,
                "Attempt already running on the server, resuming instead of restarting"
            );
            self.enter_in_progress(&mut state, start_time)
        };
        if expired {
            self.auto_submit(epoch).await;
        }
        Ok(self.phase().await)
    }

    async fn begin_attempt(&self, epoch: u64) -> Result<Phase, SessionError> {
        let started = match self.inner.api.start_exam(&self.inner.exam_id).await {
            Ok(started) => started,
            Err(err) => return Err(self.start_failed(epoch, err).await),
        };

        let expired = {
            let Some(mut state) = self.lock_current(epoch).await else {
                return Ok(self.phase().await);
            };
            if let Err(err) = self.inner.socket.emit(OutboundEvent::StartExam(StartPayload {
                exam_id: self.inner.exam_id.clone(),
            })) {
                tracing::warn!(exam_id = %self.inner.exam_id, error = %err, "Failed to announce exam start");
            }

            state.starting = false;
            if let Some(exam) = state.exam.clone() {
                state.answers = AnswerSet::for_exam(&exam);
            }
            state.auto_submit_fired = false;
            state.notice = None;
            tracing::info!(
                exam_id = %self.inner.exam_id,
                start_time = %format_offset(started.start_time),
                "Exam started"
            );
            self.enter_in_progress(&mut state, started.start_time)
        };
        if expired {
            self.auto_submit(epoch).await;
        }
        Ok(self.phase().await)
    }

    /// Moves to `InProgress`. Returns `true` when the clock already ran out, in
    /// which case no countdown is started and the caller runs the auto-submit.
    fn enter_in_progress(&self, state: &mut SessionState, start_time: OffsetDateTime) -> bool {
        let duration = state.exam.as_ref().map(|exam| exam.duration_seconds()).unwrap_or(0);
        state.start_time = Some(start_time);
        state.remaining = compute_remaining(start_time, duration, self.inner.clock.now());
        state.phase = Phase::InProgress;
        state.confirming = false;
        state.submitting = false;
        self.attach_listener(state);

        if state.remaining == 0 {
            Inner::stop_countdown(state);
            return true;
        }
        self.start_countdown(state);
        false
    }

    fn start_countdown(&self, state: &mut SessionState) {
        Inner::stop_countdown(state);
        state.countdown =
            Some(Countdown::start(self.downgrade(), state.epoch, self.inner.settings.tick_interval));
    }

    fn attach_listener(&self, state: &mut SessionState) {
        if state.listener.is_some() {
            return;
        }
        let subscription = self.inner.socket.subscribe(&self.inner.exam_id);
        state.listener = Some(subscription.id);

        let session = self.downgrade();
        let mut events = subscription.events;
        spawn_contained("socket-listener", async move {
            while let Some(event) = events.recv().await {
                let Some(inner) = session.upgrade() else {
                    break;
                };
                ExamSession::from_inner(inner).handle_event(event).await;
            }
        });
    }

    fn require_connected(&self, state: &mut SessionState) -> Result<(), SessionError> {
        if self.inner.socket.is_connected() {
            return Ok(());
        }
        state.error = Some(OFFLINE_NOTICE.to_string());
        Err(SessionError::Disconnected)
    }

    /// Claims the single auto-submission of this attempt and emits it.
    fn begin_auto_submit(
        &self,
        state: &mut SessionState,
    ) -> Option<Result<AckReceiver, TransportError>> {
        if state.auto_submit_fired || state.submitting || state.phase != Phase::InProgress {
            return None;
        }
        state.auto_submit_fired = true;
        Inner::stop_countdown(state);
        state.phase = Phase::Expired;
        state.submitting = true;
        state.confirming = false;
        state.notice = Some(AUTO_SUBMITTING_NOTICE.to_string());
        Some(self.inner.socket.emit_with_ack(submit_event(&self.inner.exam_id, &state.answers)))
    }

    fn trigger_expiry(&self, state: &mut SessionState) {
        let Some(emitted) = self.begin_auto_submit(state) else {
            return;
        };
        let epoch = state.epoch;
        let session = self.clone();
        spawn_contained("auto-submit", async move {
            let _ = session.complete_auto_submit(epoch, emitted).await;
        });
    }

    async fn auto_submit(&self, epoch: u64) {
        let emitted = {
            let Some(mut state) = self.lock_current(epoch).await else {
                return;
            };
            self.begin_auto_submit(&mut state)
        };
        if let Some(emitted) = emitted {
            let _ = self.complete_auto_submit(epoch, emitted).await;
        }
    }

    async fn complete_auto_submit(
        &self,
        epoch: u64,
        emitted: Result<AckReceiver, TransportError>,
    ) -> Result<Phase, SessionError> {
        let outcome = match emitted {
            Ok(receiver) => receiver.wait(self.inner.settings.ack_timeout).await,
            Err(err) => Err(err),
        };
        self.finish_submission(epoch, outcome, SubmitMode::Auto).await
    }

    /// Shared tail of every submission path: acknowledgement, pushed event
    /// and auto-submit all converge here.
    async fn finish_submission(
        &self,
        epoch: u64,
        outcome: Result<Outcome, TransportError>,
        mode: SubmitMode,
    ) -> Result<Phase, SessionError> {
        let outcome = match outcome {
            Ok(outcome) if outcome.success => outcome,
            Ok(outcome) => {
                let message = outcome
                    .message
                    .unwrap_or_else(|| "The server rejected the submission".to_string());
                return Err(self.submission_failed(epoch, mode, TransportError::Rejected(message)).await);
            }
            Err(err) => return Err(self.submission_failed(epoch, mode, err).await),
        };

        let result = match outcome.data {
            Some(result) => result,
            None => match self.inner.api.get_result(&self.inner.exam_id).await {
                Ok(result) => result,
                Err(err) => return Err(self.submission_failed(epoch, mode, err).await),
            },
        };

        Ok(self.apply_result(epoch, result, mode).await)
    }

    async fn submission_failed(
        &self,
        epoch: u64,
        mode: SubmitMode,
        err: TransportError,
    ) -> SessionError {
        metrics::counter!("exam_submission_failures_total", "mode" => mode.label()).increment(1);
        tracing::warn!(
            exam_id = %self.inner.exam_id,
            mode = mode.label(),
            error = %err,
            "Exam submission failed"
        );

        if let Some(mut state) = self.lock_current(epoch).await {
            if matches!(state.phase, Phase::InProgress | Phase::Expired) {
                state.phase = Phase::InProgress;
                state.submitting = false;
                state.notice = None;
                state.error = Some(format!(
                    "Failed to submit exam: {err}. Your answers are kept, please submit again."
                ));
                if state.countdown.is_none() && state.remaining > 0 {
                    self.start_countdown(&mut state);
                }
            }
        }
        SessionError::Transport(err)
    }

    async fn apply_result(&self, epoch: u64, result: SubmissionResult, mode: SubmitMode) -> Phase {
        let Some(mut state) = self.lock_current(epoch).await else {
            return self.phase().await;
        };
        if state.phase == Phase::Result {
            metrics::counter!("exam_duplicate_results_total").increment(1);
            tracing::debug!(
                exam_id = %self.inner.exam_id,
                mode = mode.label(),
                "Ignoring duplicate submission result"
            );
            return Phase::Result;
        }

        Inner::stop_countdown(&mut state);
        self.inner.detach_listener(&mut state);
        state.submitting = false;
        state.confirming = false;
        state.error = None;
        state.notice = Some(
            match mode {
                SubmitMode::Auto => TIME_UP_NOTICE,
                SubmitMode::Manual | SubmitMode::Pushed => SUBMITTED_NOTICE,
            }
            .to_string(),
        );
        metrics::counter!("exam_submissions_total", "mode" => mode.label()).increment(1);
        tracing::info!(
            exam_id = %self.inner.exam_id,
            mode = mode.label(),
            score = result.score,
            passed = result.passed,
            "Exam submitted"
        );
        state.result = Some(result);
        state.phase = Phase::Result;
        Phase::Result
    }

    async fn await_checkpoint_ack(&self, epoch: u64, receiver: AckReceiver) {
        let failure = match receiver.wait(self.inner.settings.ack_timeout).await {
            Ok(outcome) if outcome.success => return,
            Ok(outcome) => TransportError::Rejected(
                outcome.message.unwrap_or_else(|| "progress was not saved".to_string()),
            ),
            Err(err) => err,
        };

        metrics::counter!("exam_checkpoint_failures_total").increment(1);
        tracing::warn!(exam_id = %self.inner.exam_id, error = %failure, "Checkpoint was not saved");
        if let Some(mut state) = self.lock_current(epoch).await {
            if state.phase == Phase::InProgress {
                state.error = Some(format!("Failed to save progress: {failure}"));
            }
        }
    }

    async fn handle_event(&self, event: InboundEvent) {
        tracing::debug!(exam_id = %self.inner.exam_id, event = event.name(), "Socket event");
        match event {
            InboundEvent::ExamStarted { start_time, answers } => {
                self.on_exam_started(start_time, answers).await
            }
            InboundEvent::ExamSubmitted(outcome) => {
                self.on_pushed_submission(outcome, SubmitMode::Pushed).await
            }
            InboundEvent::ExamAutoSubmitted(outcome) => {
                self.on_pushed_submission(outcome, SubmitMode::Auto).await
            }
            InboundEvent::Error { message } => {
                tracing::warn!(exam_id = %self.inner.exam_id, message = %message, "Socket error");
                let mut state = self.inner.state.lock().await;
                if !state.phase.is_terminal() {
                    state.error = Some(format!("Connection error: {message}"));
                }
            }
        }
    }

    async fn on_exam_started(&self, start_time: OffsetDateTime, saved: Option<Vec<AnswerEntry>>) {
        let mut state = self.inner.state.lock().await;
        let Some(exam) = state.exam.clone() else {
            return;
        };

        let expired = match state.phase {
            Phase::NotStarted => {
                state.answers = match saved {
                    Some(saved) => AnswerSet::restore(&exam, &saved),
                    None => AnswerSet::for_exam(&exam),
                };
                state.auto_submit_fired = false;
                state.starting = false;
                self.enter_in_progress(&mut state, start_time)
            }
            Phase::InProgress => {
                if let Some(saved) = saved.filter(|_| !state.answers.has_answers()) {
                    state.answers = AnswerSet::restore(&exam, &saved);
                }
                state.start_time = Some(start_time);
                state.remaining =
                    compute_remaining(start_time, exam.duration_seconds(), self.inner.clock.now());
                state.remaining == 0
            }
            phase => {
                tracing::debug!(exam_id = %self.inner.exam_id, %phase, "Ignoring examStarted");
                return;
            }
        };

        if expired {
            Inner::stop_countdown(&mut state);
            self.trigger_expiry(&mut state);
        }
    }

    async fn on_pushed_submission(&self, outcome: Outcome, mode: SubmitMode) {
        let epoch = {
            let state = self.inner.state.lock().await;
            match state.phase {
                Phase::Result => {
                    metrics::counter!("exam_duplicate_results_total").increment(1);
                    tracing::debug!(
                        exam_id = %self.inner.exam_id,
                        mode = mode.label(),
                        "Submission already applied, ignoring pushed result"
                    );
                    return;
                }
                Phase::InProgress | Phase::Expired => state.epoch,
                phase => {
                    tracing::debug!(
                        exam_id = %self.inner.exam_id,
                        mode = mode.label(),
                        %phase,
                        "No attempt running, ignoring pushed result"
                    );
                    return;
                }
            }
        };

        if !outcome.success {
            let message = outcome
                .message
                .unwrap_or_else(|| "The server could not record the submission".to_string());
            tracing::warn!(exam_id = %self.inner.exam_id, message = %message, "Pushed submission failed");
            if let Some(mut state) = self.lock_current(epoch).await {
                if matches!(state.phase, Phase::InProgress | Phase::Expired) {
                    state.error = Some(format!("Failed to submit exam: {message}"));
                }
            }
            return;
        }

        let _ = self.finish_submission(epoch, Ok(outcome), mode).await;
    }
}

fn check_complete(state: &SessionState) -> Result<(), SessionError> {
    if state.remaining == 0 {
        return Ok(());
    }
    let unanswered = state.answers.len() - state.answers.answered_count();
    if unanswered > 0 || state.answers.is_empty() {
        return Err(SessionError::Validation(format!(
            "Please answer all questions before submitting ({unanswered} unanswered)."
        )));
    }
    Ok(())
}

fn progress_event(exam_id: &str, state: &SessionState) -> OutboundEvent {
    OutboundEvent::SaveExamProgress(ProgressPayload {
        exam_id: exam_id.to_string(),
        answers: state.answers.entries().to_vec(),
        start_time: state.start_time,
    })
}

fn submit_event(exam_id: &str, answers: &AnswerSet) -> OutboundEvent {
    OutboundEvent::SubmitExam(SubmitPayload {
        exam_id: exam_id.to_string(),
        answers: answers.entries().to_vec(),
    })
}
