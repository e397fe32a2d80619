use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;

use crate::schemas::exam::Exam;

/// One question's answer. `selected == None` travels as `-1` on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerEntry {
    pub question_id: String,
    #[serde(rename = "selectedOptionIndex", default, with = "selected_index")]
    pub selected: Option<usize>,
}

impl AnswerEntry {
    pub fn unanswered(question_id: impl Into<String>) -> Self {
        Self { question_id: question_id.into(), selected: None }
    }

    pub fn is_answered(&self) -> bool {
        self.selected.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AnswerError {
    #[error("question '{0}' is not part of this exam")]
    UnknownQuestion(String),
    #[error("option {index} does not exist for question '{question_id}'")]
    OptionOutOfRange { question_id: String, index: usize },
}

/// Exactly one entry per exam question, in question order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct AnswerSet {
    entries: Vec<AnswerEntry>,
}

impl AnswerSet {
    pub fn for_exam(exam: &Exam) -> Self {
        Self {
            entries: exam
                .questions
                .iter()
                .map(|question| AnswerEntry::unanswered(question.id.clone()))
                .collect(),
        }
    }

    /// Rebuilds the set from a saved checkpoint. Entries for unknown questions
    /// are dropped, missing questions come back unanswered and selections that
    /// no longer fit the question's options are cleared.
    pub fn restore(exam: &Exam, saved: &[AnswerEntry]) -> Self {
        let entries = exam
            .questions
            .iter()
            .map(|question| {
                let selected = saved
                    .iter()
                    .rev()
                    .find(|entry| entry.question_id == question.id)
                    .and_then(|entry| entry.selected)
                    .filter(|index| *index < question.options.len());
                AnswerEntry { question_id: question.id.clone(), selected }
            })
            .collect();
        Self { entries }
    }

    pub fn select(&mut self, exam: &Exam, question_id: &str, index: usize) -> Result<(), AnswerError> {
        let question = exam
            .question(question_id)
            .ok_or_else(|| AnswerError::UnknownQuestion(question_id.to_string()))?;
        if index >= question.options.len() {
            return Err(AnswerError::OptionOutOfRange {
                question_id: question_id.to_string(),
                index,
            });
        }

        match self.entries.iter_mut().find(|entry| entry.question_id == question_id) {
            Some(entry) => entry.selected = Some(index),
            None => self.entries.push(AnswerEntry {
                question_id: question_id.to_string(),
                selected: Some(index),
            }),
        }
        Ok(())
    }

    pub fn selected(&self, question_id: &str) -> Option<usize> {
        self.entries
            .iter()
            .find(|entry| entry.question_id == question_id)
            .and_then(|entry| entry.selected)
    }

    pub fn entries(&self) -> &[AnswerEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn answered_count(&self) -> usize {
        self.entries.iter().filter(|entry| entry.is_answered()).count()
    }

    pub fn has_answers(&self) -> bool {
        self.answered_count() > 0
    }

    pub fn is_complete(&self) -> bool {
        !self.entries.is_empty() && self.entries.iter().all(AnswerEntry::is_answered)
    }

    /// True when every entry maps onto a question of `exam` and vice versa.
    pub fn matches(&self, exam: &Exam) -> bool {
        self.entries.len() == exam.questions.len()
            && exam.questions.iter().all(|question| {
                self.entries.iter().filter(|entry| entry.question_id == question.id).count() == 1
            })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExamProgress {
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub start_time: Option<OffsetDateTime>,
    #[serde(default)]
    pub answers: Vec<AnswerEntry>,
    #[serde(default)]
    pub is_submitted: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartedExam {
    #[serde(with = "time::serde::rfc3339")]
    pub start_time: OffsetDateTime,
}

pub(crate) mod selected_index {
    use serde::{Deserialize, Deserializer, Serializer};

    pub(crate) fn serialize<S: Serializer>(value: &Option<usize>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(index) => serializer.serialize_i64(*index as i64),
            None => serializer.serialize_i64(-1),
        }
    }

    pub(crate) fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<usize>, D::Error> {
        let raw = Option::<i64>::deserialize(deserializer)?;
        Ok(raw.and_then(|value| usize::try_from(value).ok()))
    }
}
