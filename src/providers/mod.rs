//! Remote answer service integration

mod http;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::conversation::Exchange;
use crate::preferences::{Avatar, ExplanationLevel};
use crate::quiz::{QuizItem, QuizVerdict};

pub use http::HttpAnswerService;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    #[error("Service returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Service reported an error: {0}")]
    Remote(String),

    #[error("Service returned an empty answer")]
    EmptyAnswer,

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// Body of the question request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerRequest {
    pub question: String,
    pub user_id: String,
    pub avatar_id: String,
    pub topic: Option<String>,
    pub level: ExplanationLevel,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerReply {
    #[serde(default)]
    pub answer: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AnswerReply {
    /// Turn a reply into its answer text and media reference, rejecting
    /// replies that carry an error or no answer.
    pub fn into_answer(self) -> Result<(String, Option<String>), ServiceError> {
        if let Some(error) = self.error.filter(|e| !e.trim().is_empty()) {
            return Err(ServiceError::Remote(error));
        }
        if self.answer.trim().is_empty() {
            return Err(ServiceError::EmptyAnswer);
        }
        Ok((self.answer, self.avatar_url))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizRequest {
    pub user_id: String,
    pub level: ExplanationLevel,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizAnswerRequest {
    pub question: String,
    pub answer: String,
    pub correct_answer: String,
    pub topic: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TtsRequest {
    pub text: String,
}

/// Recent exchanges the service picks the next topic from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecommendRequest {
    pub user_id: String,
    pub history: Vec<Exchange>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recommendation {
    pub recommendation: String,
}

/// Whatever answers questions for the widget
#[async_trait]
pub trait AnswerService: Send + Sync {
    async fn ask(&self, request: &AnswerRequest) -> Result<AnswerReply, ServiceError>;

    async fn quiz(&self, request: &QuizRequest) -> Result<QuizItem, ServiceError>;

    async fn grade_quiz(&self, request: &QuizAnswerRequest) -> Result<QuizVerdict, ServiceError>;

    async fn avatars(&self) -> Result<Vec<Avatar>, ServiceError>;

    /// Synthesized speech, as encoded audio
    async fn tts(&self, request: &TtsRequest) -> Result<Vec<u8>, ServiceError>;

    async fn recommend(&self, request: &RecommendRequest) -> Result<Recommendation, ServiceError>;

    /// Topics the service can teach
    async fn topics(&self) -> Result<Vec<String>, ServiceError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel {
    Success,
    Info,
    Warning,
    Error,
}

/// A user-visible message for the widget's notification area
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

impl Notice {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Error,
            message: message.into(),
        }
    }
}

/// Describe a failed remote call for the user, prefixed by what was being done
pub fn notice_for(context: &str, error: &ServiceError) -> Notice {
    let message = match error {
        ServiceError::RequestFailed(e) if e.is_connect() => "No internet connection".to_string(),
        ServiceError::RequestFailed(e) if e.is_timeout() => "The server took too long to answer".to_string(),
        ServiceError::Status { status: 503, .. } => "The server is busy, try again".to_string(),
        ServiceError::Status { status: 429, .. } => "Too many requests, wait a moment".to_string(),
        ServiceError::Status { status: 401, .. } => "Not authorized, check your session".to_string(),
        other => other.to_string(),
    };
    Notice::error(format!("{}: {}", context, message))
}

/// Shown when no recommendation could be fetched
pub const FALLBACK_RECOMMENDATION: &str = "No recommendation could be generated";

/// A recommendation for the user, with a notice when it is the fallback text
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecommendOutcome {
    pub recommendation: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notice: Option<Notice>,
}

impl From<Result<Recommendation, ServiceError>> for RecommendOutcome {
    fn from(fetched: Result<Recommendation, ServiceError>) -> Self {
        match fetched {
            Ok(r) if !r.recommendation.trim().is_empty() => Self {
                recommendation: r.recommendation,
                notice: None,
            },
            Ok(_) => Self {
                recommendation: FALLBACK_RECOMMENDATION.to_string(),
                notice: None,
            },
            Err(e) => Self {
                recommendation: FALLBACK_RECOMMENDATION.to_string(),
                notice: Some(notice_for("Getting a recommendation", &e)),
            },
        }
    }
}
