use std::fmt::Write as _;

use serde::Serialize;

use crate::core::time::format_offset;
use crate::schemas::{Exam, ResultStatus, SubmissionResult};
use crate::services::exam_timing::{deadline, format_remaining};
use crate::session::machine::SessionState;
use crate::session::Phase;

#[derive(Debug, Clone, Serialize)]
pub struct QuestionView {
    pub id: String,
    pub prompt: String,
    pub options: Vec<String>,
    pub selected: Option<usize>,
    pub points: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct AttemptView {
    pub score: f64,
    pub passed: bool,
    pub completed_at: String,
}

/// Per-question breakdown of the latest graded attempt.
#[derive(Debug, Clone, Serialize)]
pub struct ReviewItem {
    pub question_id: String,
    pub prompt: String,
    pub selected: Option<usize>,
    pub is_correct: bool,
    pub explanation: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResultView {
    pub score: f64,
    pub total_points: f64,
    pub percentage: f64,
    pub passed: bool,
    pub status: ResultStatus,
    pub attempts: Vec<AttemptView>,
    pub review: Vec<ReviewItem>,
}

impl ResultView {
    fn build(result: &SubmissionResult, exam: Option<&Exam>) -> Self {
        let review = match (result.latest_attempt(), exam) {
            (Some(attempt), Some(exam)) => attempt
                .answers
                .iter()
                .filter_map(|answer| {
                    let question = exam.question(&answer.question_id)?;
                    Some(ReviewItem {
                        question_id: question.id.clone(),
                        prompt: question.prompt.clone(),
                        selected: answer.selected,
                        is_correct: answer.is_correct,
                        explanation: question.explanation.clone(),
                    })
                })
                .collect(),
            _ => Vec::new(),
        };

        Self {
            score: result.score,
            total_points: result.total_points,
            percentage: result.percentage(),
            passed: result.passed,
            status: result.status,
            attempts: result
                .attempts
                .iter()
                .map(|attempt| AttemptView {
                    score: attempt.score,
                    passed: attempt.passed,
                    completed_at: format_offset(attempt.completed_at),
                })
                .collect(),
            review,
        }
    }
}

/// Snapshot of everything a screen needs to draw the session. Correct answers
/// never leave the session.
#[derive(Debug, Clone, Serialize)]
pub struct ExamView {
    pub exam_id: String,
    pub phase: Phase,
    pub title: String,
    pub description: String,
    pub passing_score: f64,
    pub remaining_seconds: u64,
    pub remaining_label: String,
    pub started_at: Option<String>,
    pub ends_at: Option<String>,
    pub questions: Vec<QuestionView>,
    pub answered: usize,
    pub total: usize,
    pub error: Option<String>,
    pub notice: Option<String>,
    pub connected: bool,
    pub confirming: bool,
    pub submitting: bool,
    pub can_start: bool,
    pub can_answer: bool,
    pub can_submit: bool,
    pub can_try_again: bool,
    pub result: Option<ResultView>,
}

impl ExamView {
    pub(super) fn build(exam_id: &str, state: &SessionState, connected: bool) -> Self {
        let exam = state.exam.as_deref();
        let in_progress = state.phase == Phase::InProgress && !state.submitting;

        let questions = exam
            .map(|exam| {
                exam.questions
                    .iter()
                    .map(|question| QuestionView {
                        id: question.id.clone(),
                        prompt: question.prompt.clone(),
                        options: question.options.iter().map(|option| option.text.clone()).collect(),
                        selected: state.answers.selected(&question.id),
                        points: question.points,
                    })
                    .collect()
            })
            .unwrap_or_default();

        let ends_at = match (state.start_time, exam) {
            (Some(start), Some(exam)) => Some(format_offset(deadline(start, exam.duration_seconds()))),
            _ => None,
        };

        Self {
            exam_id: exam_id.to_string(),
            phase: state.phase,
            title: exam.map(|exam| exam.title.clone()).unwrap_or_default(),
            description: exam.map(|exam| exam.description.clone()).unwrap_or_default(),
            passing_score: exam.map(|exam| exam.passing_score).unwrap_or_default(),
            remaining_seconds: state.remaining,
            remaining_label: format_remaining(state.remaining),
            started_at: state.start_time.map(format_offset),
            ends_at,
            questions,
            answered: state.answers.answered_count(),
            total: state.answers.len(),
            error: state.error.clone(),
            notice: state.notice.clone(),
            connected,
            confirming: state.confirming,
            submitting: state.submitting,
            can_start: state.phase == Phase::NotStarted && !state.starting && connected,
            can_answer: in_progress && state.remaining > 0 && connected,
            can_submit: in_progress
                && connected
                && (state.remaining == 0 || state.answers.is_complete()),
            can_try_again: state.phase == Phase::Result
                && connected
                && state.result.as_ref().is_some_and(SubmissionResult::allows_retry),
            result: state.result.as_ref().map(|result| ResultView::build(result, exam)),
        }
    }
}

/// Plain-text rendering used by the terminal shell.
pub fn render_text(view: &ExamView) -> String {
    let mut out = String::new();
    let title = if view.title.is_empty() { view.exam_id.as_str() } else { view.title.as_str() };
    let _ = writeln!(out, "== {title} ==");
    if !view.connected {
        let _ = writeln!(out, "[offline] Reconnecting... starting and submitting are disabled.");
    }
    if let Some(notice) = &view.notice {
        let _ = writeln!(out, "{notice}");
    }
    if let Some(error) = &view.error {
        let _ = writeln!(out, "! {error}");
    }

    match view.phase {
        Phase::Loading => {
            let _ = writeln!(out, "Loading exam...");
        }
        Phase::Resuming => {
            let _ = writeln!(out, "Resuming your exam...");
        }
        Phase::Error => {
            let _ = writeln!(out, "The exam could not be loaded. Reload to try again.");
        }
        Phase::NotStarted => {
            if !view.description.is_empty() {
                let _ = writeln!(out, "{}", view.description);
            }
            let _ = writeln!(
                out,
                "{} questions, {}% to pass, {} on the clock.",
                view.total,
                format_score(view.passing_score),
                view.remaining_label
            );
            if let Some(result) = &view.result {
                let _ = writeln!(out, "Previous attempts: {}", result.attempts.len());
            }
        }
        Phase::InProgress | Phase::Expired => {
            let _ = writeln!(
                out,
                "Time remaining: {}  |  Answered {}/{}",
                view.remaining_label, view.answered, view.total
            );
            for (number, question) in view.questions.iter().enumerate() {
                let _ = writeln!(out, "{}. {} ({} pts)", number + 1, question.prompt, question.points);
                for (index, option) in question.options.iter().enumerate() {
                    let mark = if question.selected == Some(index) { "x" } else { " " };
                    let _ = writeln!(out, "   [{mark}] {option}");
                }
            }
            if view.confirming {
                let _ = writeln!(out, "Submit your answers? This cannot be undone.");
            }
            if view.submitting {
                let _ = writeln!(out, "Submitting...");
            }
        }
        Phase::Result => {
            if let Some(result) = &view.result {
                let verdict = if result.passed { "PASSED" } else { "NOT PASSED" };
                let _ = writeln!(
                    out,
                    "{verdict}: {}/{} ({}%)",
                    format_score(result.score),
                    format_score(result.total_points),
                    format_score(result.percentage)
                );
                for item in &result.review {
                    let mark = if item.is_correct { "+" } else { "-" };
                    let _ = writeln!(out, "  [{mark}] {}", item.prompt);
                    if !item.is_correct && !item.explanation.is_empty() {
                        let _ = writeln!(out, "      {}", item.explanation);
                    }
                }
                for (number, attempt) in result.attempts.iter().enumerate() {
                    let _ = writeln!(
                        out,
                        "  attempt {}: {} on {}",
                        number + 1,
                        format_score(attempt.score),
                        attempt.completed_at
                    );
                }
            }
            if view.can_try_again {
                let _ = writeln!(out, "You can try again.");
            }
        }
    }
    out
}

fn format_score(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{value:.0}")
    } else {
        format!("{value:.1}")
    }
}
