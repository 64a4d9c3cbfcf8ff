//! HTTP implementation of the answer service

use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::preferences::Avatar;
use crate::quiz::{QuizItem, QuizVerdict};

use super::{
    AnswerReply, AnswerRequest, AnswerService, QuizAnswerRequest, QuizRequest, RecommendRequest,
    Recommendation, ServiceError, TtsRequest,
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

pub struct HttpAnswerService {
    client: Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct AvatarList {
    #[serde(default)]
    avatars: Vec<Avatar>,
}

#[derive(Debug, Deserialize)]
struct TopicList {
    #[serde(default)]
    topics: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

impl HttpAnswerService {
    pub fn new(base_url: impl Into<String>) -> Result<Self, ServiceError> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn post_json<B, R>(&self, path: &str, body: &B) -> Result<R, ServiceError>
    where
        B: Serialize + ?Sized + Sync,
        R: DeserializeOwned,
    {
        debug!(path, "POST to answer service");
        let response = self.client.post(self.url(path)).json(body).send().await?;
        decode(response).await
    }
}

/// Turn a non-2xx response into `ServiceError::Status`. Error bodies of the
/// form `{"error": "..."}` have their message surfaced.
async fn check_status(response: Response) -> Result<Response, ServiceError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&body)
        .map(|b| b.error)
        .unwrap_or(body);
    Err(ServiceError::Status {
        status: status.as_u16(),
        message,
    })
}

/// Check the status and decode a JSON body
async fn decode<R: DeserializeOwned>(response: Response) -> Result<R, ServiceError> {
    let text = check_status(response).await?.text().await?;
    serde_json::from_str(&text).map_err(|e| ServiceError::InvalidResponse(e.to_string()))
}

#[async_trait]
impl AnswerService for HttpAnswerService {
    async fn ask(&self, request: &AnswerRequest) -> Result<AnswerReply, ServiceError> {
        self.post_json("/ask", request).await
    }

    async fn quiz(&self, request: &QuizRequest) -> Result<QuizItem, ServiceError> {
        self.post_json("/quiz", request).await
    }

    async fn grade_quiz(&self, request: &QuizAnswerRequest) -> Result<QuizVerdict, ServiceError> {
        self.post_json("/quiz/answer", request).await
    }

    async fn avatars(&self) -> Result<Vec<Avatar>, ServiceError> {
        debug!("GET avatars");
        let response = self.client.get(self.url("/avatars")).send().await?;
        let list: AvatarList = decode(response).await?;
        Ok(list.avatars)
    }

    async fn tts(&self, request: &TtsRequest) -> Result<Vec<u8>, ServiceError> {
        debug!(chars = request.text.chars().count(), "POST to answer service: /tts");
        let response = self.client.post(self.url("/tts")).json(request).send().await?;
        let audio = check_status(response).await?.bytes().await?;
        Ok(audio.to_vec())
    }

    async fn recommend(&self, request: &RecommendRequest) -> Result<Recommendation, ServiceError> {
        self.post_json("/recommend", request).await
    }

    async fn topics(&self) -> Result<Vec<String>, ServiceError> {
        debug!("GET topics");
        let response = self.client.get(self.url("/topics")).send().await?;
        let list: TopicList = decode(response).await?;
        Ok(list.topics)
    }
}
