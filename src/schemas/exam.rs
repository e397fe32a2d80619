use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use validator::{Validate, ValidationErrors};

/// Raised when the server hands us an exam the session cannot be run against.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct IntegrityError(pub String);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QuestionKind {
    #[default]
    #[serde(alias = "multiple_choice", alias = "multipleChoice")]
    MultipleChoice,
    #[serde(alias = "true_false", alias = "trueFalse", alias = "boolean")]
    TrueFalse,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OptionPayload {
    Plain(String),
    Full {
        #[serde(alias = "_id")]
        id: String,
        #[serde(alias = "label")]
        text: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct QuestionPayload {
    #[serde(alias = "_id")]
    #[validate(length(min = 1, message = "question id must not be empty"))]
    pub id: String,
    #[serde(alias = "question", alias = "prompt")]
    #[validate(length(min = 1, message = "question text must not be empty"))]
    pub text: String,
    #[serde(default)]
    pub options: Vec<OptionPayload>,
    #[serde(default, alias = "correctOption")]
    pub correct_answer: Option<i64>,
    #[serde(default)]
    pub explanation: String,
    #[serde(default = "default_points")]
    pub points: u32,
    #[serde(default, rename = "type")]
    pub kind: QuestionKind,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ExamPayload {
    #[serde(alias = "_id")]
    #[validate(length(min = 1, message = "exam id must not be empty"))]
    pub id: String,
    #[validate(length(min = 1, message = "title must not be empty"))]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, alias = "durationMinutes")]
    #[validate(
        required(message = "duration is missing"),
        range(min = 1, message = "duration must be positive")
    )]
    pub duration: Option<u32>,
    #[serde(default)]
    #[validate(range(min = 0.0, max = 100.0, message = "passing score must be a percentage"))]
    pub passing_score: f64,
    #[serde(default)]
    #[validate(length(min = 1, message = "exam has no questions"), nested)]
    pub questions: Vec<QuestionPayload>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuestionOption {
    pub id: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Question {
    pub id: String,
    pub prompt: String,
    pub options: Vec<QuestionOption>,
    /// Only the server compares against this; it never reaches the view.
    pub(crate) correct_option: Option<usize>,
    pub explanation: String,
    pub points: u32,
    pub kind: QuestionKind,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Exam {
    pub id: String,
    pub title: String,
    pub description: String,
    pub duration_minutes: u32,
    pub passing_score: f64,
    pub questions: Vec<Question>,
}

impl Exam {
    pub fn duration_seconds(&self) -> u64 {
        u64::from(self.duration_minutes) * 60
    }

    pub fn question(&self, question_id: &str) -> Option<&Question> {
        self.questions.iter().find(|question| question.id == question_id)
    }

    pub fn total_points(&self) -> u32 {
        self.questions.iter().map(|question| question.points).sum()
    }
}

impl TryFrom<ExamPayload> for Exam {
    type Error = IntegrityError;

    fn try_from(payload: ExamPayload) -> Result<Self, Self::Error> {
        payload.validate().map_err(|errors| IntegrityError(describe(&errors)))?;

        let mut seen = HashSet::new();
        let mut questions = Vec::with_capacity(payload.questions.len());
        for raw in payload.questions {
            if !seen.insert(raw.id.clone()) {
                return Err(IntegrityError(format!("duplicate question id '{}'", raw.id)));
            }
            questions.push(Question::try_from(raw)?);
        }

        Ok(Self {
            id: payload.id,
            title: payload.title,
            description: payload.description,
            duration_minutes: payload
                .duration
                .ok_or_else(|| IntegrityError("duration is missing".to_string()))?,
            passing_score: payload.passing_score,
            questions,
        })
    }
}

impl TryFrom<QuestionPayload> for Question {
    type Error = IntegrityError;

    fn try_from(raw: QuestionPayload) -> Result<Self, Self::Error> {
        let options = match raw.kind {
            QuestionKind::TrueFalse => vec![
                QuestionOption { id: "true".to_string(), text: "True".to_string() },
                QuestionOption { id: "false".to_string(), text: "False".to_string() },
            ],
            QuestionKind::MultipleChoice => {
                let options: Vec<QuestionOption> = raw
                    .options
                    .into_iter()
                    .enumerate()
                    .map(|(index, option)| match option {
                        OptionPayload::Plain(text) => QuestionOption { id: index.to_string(), text },
                        OptionPayload::Full { id, text } => QuestionOption { id, text },
                    })
                    .collect();
                if options.len() < 2 {
                    return Err(IntegrityError(format!(
                        "question '{}' needs at least two options",
                        raw.id
                    )));
                }
                options
            }
        };

        let correct_option = match raw.correct_answer {
            None => None,
            Some(index) => match usize::try_from(index) {
                Ok(index) if index < options.len() => Some(index),
                _ => {
                    return Err(IntegrityError(format!(
                        "question '{}' has correct answer {index} outside its options",
                        raw.id
                    )))
                }
            },
        };

        Ok(Self {
            id: raw.id,
            prompt: raw.text,
            options,
            correct_option,
            explanation: raw.explanation,
            points: raw.points,
            kind: raw.kind,
        })
    }
}

fn default_points() -> u32 {
    1
}

fn describe(errors: &ValidationErrors) -> String {
    let mut messages = Vec::new();
    collect_messages(errors, &mut messages);
    if messages.is_empty() {
        "exam payload failed validation".to_string()
    } else {
        messages.join("; ")
    }
}

fn collect_messages(errors: &ValidationErrors, out: &mut Vec<String>) {
    for (field, kind) in errors.errors() {
        match kind {
            validator::ValidationErrorsKind::Field(items) => {
                for item in items {
                    match &item.message {
                        Some(message) => out.push(message.to_string()),
                        None => out.push(format!("{field} is invalid")),
                    }
                }
            }
            validator::ValidationErrorsKind::Struct(nested) => collect_messages(nested, out),
            validator::ValidationErrorsKind::List(items) => {
                for nested in items.values() {
                    collect_messages(nested, out);
                }
            }
        }
    }
}
