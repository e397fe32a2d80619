pub mod exam;
pub mod progress;
pub mod result;

pub use exam::{Exam, ExamPayload, IntegrityError, Question, QuestionKind, QuestionOption};
pub use progress::{AnswerEntry, AnswerError, AnswerSet, ExamProgress, StartedExam};
pub use result::{Attempt, AttemptAnswer, ResultStatus, SubmissionResult};
