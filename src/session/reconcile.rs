use time::OffsetDateTime;

use crate::schemas::{AnswerSet, Exam, ExamProgress};
use crate::services::exam_timing::compute_remaining;

/// Where a freshly loaded session should land, given the server's progress record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reconciled {
    /// Nothing started yet. `has_record` tells a missing record from an unstarted one.
    NotStarted { answers: AnswerSet, has_record: bool },
    Resume { start_time: OffsetDateTime, answers: AnswerSet, remaining: u64 },
    /// Started, unsubmitted, and the clock already ran out.
    Expired { start_time: OffsetDateTime, answers: AnswerSet },
    Submitted,
}

pub fn reconcile(exam: &Exam, progress: Option<&ExamProgress>, now: OffsetDateTime) -> Reconciled {
    let Some(progress) = progress else {
        return Reconciled::NotStarted { answers: AnswerSet::for_exam(exam), has_record: false };
    };

    if progress.is_submitted {
        return Reconciled::Submitted;
    }

    let answers = AnswerSet::restore(exam, &progress.answers);
    match progress.start_time {
        Some(start_time) => match compute_remaining(start_time, exam.duration_seconds(), now) {
            0 => Reconciled::Expired { start_time, answers },
            remaining => Reconciled::Resume { start_time, answers, remaining },
        },
        None => Reconciled::NotStarted { answers, has_record: true },
    }
}
