//! Quiz items served by the remote service and the local log of them

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::store::{load_json, to_document, DocumentStore, StorageError, QUIZ_HISTORY_KEY};

/// A multiple-choice question
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizItem {
    pub question: String,
    pub options: Vec<String>,
    #[serde(default)]
    pub correct_answer: String,
    #[serde(default = "unknown_topic")]
    pub topic: String,
}

fn unknown_topic() -> String {
    "unknown".to_string()
}

impl QuizItem {
    pub fn has_option(&self, selection: &str) -> bool {
        self.options.iter().any(|option| option == selection)
    }
}

/// The service's judgement of a selected option
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizVerdict {
    pub correct: bool,
    #[serde(default)]
    pub explanation: String,
}

/// Text shown (and stored as the answer) after a quiz option is picked
pub fn feedback(item: &QuizItem, selection: &str, verdict: &QuizVerdict) -> String {
    let explanation = verdict.explanation.trim();
    if verdict.correct {
        let explanation = if explanation.is_empty() {
            "This option addresses the main goal of the topic."
        } else {
            explanation
        };
        format!("Correct! You picked \"{}\". {}", selection, explanation)
    } else {
        let explanation = if explanation.is_empty() {
            "The correct option best represents the concept being assessed."
        } else {
            explanation
        };
        format!(
            "Incorrect. You picked \"{}\". The correct option is \"{}\". {}",
            selection, item.correct_answer, explanation
        )
    }
}

/// One served quiz, as kept in `quizHistory`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizRecord {
    #[serde(flatten)]
    pub item: QuizItem,
    pub served_at: DateTime<Utc>,
}

pub async fn load_log(store: &dyn DocumentStore) -> Result<Vec<QuizRecord>, StorageError> {
    Ok(load_json(store, QUIZ_HISTORY_KEY).await?.unwrap_or_default())
}

/// Entries kept in `quizHistory`; older ones are dropped first
pub const QUIZ_LOG_LIMIT: usize = 100;

/// Append a served quiz to the persisted log
pub async fn record(store: &dyn DocumentStore, item: &QuizItem) -> Result<(), StorageError> {
    let mut log = load_log(store).await?;
    log.push(QuizRecord {
        item: item.clone(),
        served_at: Utc::now(),
    });
    let excess = log.len().saturating_sub(QUIZ_LOG_LIMIT);
    log.drain(..excess);
    store.put(QUIZ_HISTORY_KEY, to_document(&log)?).await
}
