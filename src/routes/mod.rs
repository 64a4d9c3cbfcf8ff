//! API routes

mod error;

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Json, Response,
    },
    routing::{get, post, put},
    Router,
};
use chrono::Utc;
use futures::Stream;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, warn};

use crate::conversation::{ActiveConversation, ConversationSummary, Exchange};
use crate::core::speech::{self, Speech, Transition, VoiceEffect, VoiceEvent, VoiceState};
use crate::core::{AskOutcome, HistoryError, Session};
use crate::export::ExportFormat;
use crate::preferences::{Avatar, Preferences};
use crate::providers::{AnswerService, Notice, RecommendOutcome};
use crate::quiz::{QuizItem, QuizVerdict};

pub use error::{ApiError, ApiResult};

/// Application state shared across handlers
///
/// The session lock is held for each persistence step and released while the
/// answer service is working.
#[derive(Clone)]
pub struct AppState {
    pub session: Arc<Mutex<Session>>,
    pub service: Arc<dyn AnswerService>,
}

impl AppState {
    pub fn new(session: Session, service: Arc<dyn AnswerService>) -> Self {
        Self {
            session: Arc::new(Mutex::new(session)),
            service,
        }
    }
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Debug, Deserialize)]
pub struct AskRequest {
    pub question: String,
}

#[derive(Debug, Serialize)]
pub struct AskResponse {
    /// `false` when the conversation changed before the answer arrived
    pub saved: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exchange: Option<Exchange>,
    /// Voice work for the front end, such as speaking the answer
    pub effects: Vec<VoiceEffect>,
}

impl From<AskOutcome> for AskResponse {
    fn from(outcome: AskOutcome) -> Self {
        match outcome {
            AskOutcome::Appended { exchange, effects } => Self {
                saved: true,
                exchange: Some(exchange),
                effects,
            },
            AskOutcome::Discarded => Self {
                saved: false,
                exchange: None,
                effects: Vec::new(),
            },
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RenameRequest {
    pub name: String,
}

#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    pub cleared_active: bool,
}

#[derive(Debug, Deserialize)]
pub struct QuizAnswerBody {
    pub selection: String,
}

#[derive(Debug, Serialize)]
pub struct QuizAnswerResponse {
    pub verdict: QuizVerdict,
    #[serde(flatten)]
    pub saved: AskResponse,
}

#[derive(Debug, Serialize)]
pub struct AvatarsResponse {
    pub avatars: Vec<Avatar>,
}

#[derive(Debug, Serialize)]
pub struct PreferencesResponse {
    #[serde(flatten)]
    pub preferences: Preferences,
    pub voice: Transition,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceStatus {
    pub state: VoiceState,
    pub voice_enabled: bool,
}

#[derive(Debug, Deserialize)]
pub struct TtsBody {
    pub text: String,
}

#[derive(Debug, Serialize)]
pub struct LocalSpeech {
    pub effect: VoiceEffect,
    pub notice: Notice,
}

#[derive(Debug, Serialize)]
pub struct TopicsResponse {
    pub topics: Vec<String>,
    pub selected: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TopicBody {
    #[serde(default)]
    pub topic: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SavedExport {
    pub path: String,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn list_conversations(State(state): State<AppState>) -> ApiResult<Json<Vec<ConversationSummary>>> {
    let session = state.session.lock().await;
    Ok(Json(session.list_summaries().await?))
}

async fn new_conversation(State(state): State<AppState>) -> ApiResult<(StatusCode, Json<ActiveConversation>)> {
    let mut session = state.session.lock().await;
    session.start_new_conversation().await?;
    Ok((StatusCode::CREATED, Json(session.active_conversation().await?)))
}

async fn active_conversation(State(state): State<AppState>) -> ApiResult<Json<ActiveConversation>> {
    let session = state.session.lock().await;
    Ok(Json(session.active_conversation().await?))
}

async fn get_conversation(
    State(state): State<AppState>,
    Path(id): Path<usize>,
) -> ApiResult<Json<ConversationSummary>> {
    let session = state.session.lock().await;
    let summary = session
        .list_summaries()
        .await?
        .into_iter()
        .find(|s| s.id == id)
        .ok_or(HistoryError::NotFound(id))?;
    Ok(Json(summary))
}

async fn load_conversation(
    State(state): State<AppState>,
    Path(id): Path<usize>,
) -> ApiResult<Json<ActiveConversation>> {
    let mut session = state.session.lock().await;
    session.load_conversation(id).await?;
    Ok(Json(session.active_conversation().await?))
}

async fn rename_conversation(
    State(state): State<AppState>,
    Path(id): Path<usize>,
    Json(body): Json<RenameRequest>,
) -> ApiResult<StatusCode> {
    let mut session = state.session.lock().await;
    session.rename_conversation(id, &body.name).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn delete_conversation(
    State(state): State<AppState>,
    Path(id): Path<usize>,
) -> ApiResult<Json<DeleteResponse>> {
    let mut session = state.session.lock().await;
    let cleared_active = session.delete_conversation(id).await?;
    Ok(Json(DeleteResponse { cleared_active }))
}

async fn ask(State(state): State<AppState>, Json(body): Json<AskRequest>) -> ApiResult<Json<AskResponse>> {
    let pending = state.session.lock().await.prepare_question(&body.question)?;

    debug!(question = %pending.request.question, "Forwarding question");
    let reply = state.service.ask(&pending.request).await?;

    let outcome = state
        .session
        .lock()
        .await
        .complete_question(pending, reply)
        .await?;
    Ok(Json(outcome.into()))
}

async fn export(State(state): State<AppState>, Path(format): Path<String>) -> ApiResult<Response> {
    let format: ExportFormat = format.parse()?;
    let artifact = state.session.lock().await.export(format).await?;

    let disposition = format!("attachment; filename=\"{}\"", artifact.file_name);
    Ok((
        [
            (header::CONTENT_TYPE, artifact.format.content_type().to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        artifact.bytes,
    )
        .into_response())
}

/// Write the export into the server's export directory instead of the response
async fn save_export(
    State(state): State<AppState>,
    Path(format): Path<String>,
) -> ApiResult<(StatusCode, Json<SavedExport>)> {
    let format: ExportFormat = format.parse()?;
    let path = state.session.lock().await.export_to_dir(format).await?;
    Ok((
        StatusCode::CREATED,
        Json(SavedExport {
            path: path.display().to_string(),
        }),
    ))
}

async fn request_quiz(State(state): State<AppState>) -> ApiResult<Json<QuizItem>> {
    let request = state.session.lock().await.quiz_request();
    let item = state.service.quiz(&request).await?;
    state.session.lock().await.accept_quiz(item.clone()).await?;
    Ok(Json(item))
}

async fn answer_quiz(
    State(state): State<AppState>,
    Json(body): Json<QuizAnswerBody>,
) -> ApiResult<Json<QuizAnswerResponse>> {
    let pending = state.session.lock().await.prepare_quiz_answer(&body.selection)?;
    let verdict = state.service.grade_quiz(&pending.request).await?;
    let outcome = state
        .session
        .lock()
        .await
        .complete_quiz_answer(pending, &verdict)
        .await?;
    Ok(Json(QuizAnswerResponse {
        verdict,
        saved: outcome.into(),
    }))
}

async fn get_preferences(State(state): State<AppState>) -> Json<Preferences> {
    Json(state.session.lock().await.preferences().clone())
}

async fn put_preferences(
    State(state): State<AppState>,
    Json(preferences): Json<Preferences>,
) -> ApiResult<Json<PreferencesResponse>> {
    let mut session = state.session.lock().await;
    let voice = session.update_preferences(preferences).await?;
    Ok(Json(PreferencesResponse {
        preferences: session.preferences().clone(),
        voice,
    }))
}

async fn list_avatars(State(state): State<AppState>) -> Json<AvatarsResponse> {
    let fetched = state.service.avatars().await;
    let mut session = state.session.lock().await;
    let avatars = session.apply_avatars(fetched).to_vec();
    Json(AvatarsResponse { avatars })
}

async fn select_avatar(
    State(state): State<AppState>,
    Path(avatar_id): Path<String>,
) -> ApiResult<Json<Avatar>> {
    let mut session = state.session.lock().await;
    let avatar = session.select_avatar(&avatar_id).await?.clone();
    Ok(Json(avatar))
}

async fn voice_status(State(state): State<AppState>) -> Json<VoiceStatus> {
    let session = state.session.lock().await;
    Json(VoiceStatus {
        state: session.voice().state(),
        voice_enabled: session.voice().voice_enabled(),
    })
}

async fn voice_event(
    State(state): State<AppState>,
    Json(event): Json<VoiceEvent>,
) -> ApiResult<Json<Transition>> {
    Ok(Json(state.session.lock().await.handle_voice(event)?))
}

/// Called periodically while listening so quiet recognition gets stopped
async fn poll_voice(State(state): State<AppState>) -> Json<Transition> {
    Json(state.session.lock().await.poll_voice(Instant::now()))
}

/// Remote speech as audio, or a local utterance when the service fails
async fn tts(State(state): State<AppState>, Json(body): Json<TtsBody>) -> ApiResult<Response> {
    match speech::synthesize(state.service.as_ref(), &body.text).await {
        Some(Speech::Audio(audio)) => Ok(([(header::CONTENT_TYPE, "audio/mpeg")], audio).into_response()),
        Some(Speech::Fallback { effect, notice }) => Ok(Json(LocalSpeech { effect, notice }).into_response()),
        None => Err(ApiError::BadRequest("nothing to speak".into())),
    }
}

async fn recommend(State(state): State<AppState>) -> ApiResult<Json<RecommendOutcome>> {
    let request = state.session.lock().await.recommend_request().await?;
    let fetched = state.service.recommend(&request).await;
    Ok(Json(fetched.into()))
}

async fn list_topics(State(state): State<AppState>) -> ApiResult<Json<TopicsResponse>> {
    let now = Utc::now();
    {
        let mut session = state.session.lock().await;
        if session.use_cached_topics(now).await? {
            return Ok(Json(topics_response(&session)));
        }
    }

    let fetched = state.service.topics().await;
    let mut session = state.session.lock().await;
    session.apply_topics(fetched, now).await?;
    Ok(Json(topics_response(&session)))
}

async fn select_topic(
    State(state): State<AppState>,
    Json(body): Json<TopicBody>,
) -> ApiResult<Json<TopicsResponse>> {
    let mut session = state.session.lock().await;
    session.set_topic(body.topic)?;
    Ok(Json(topics_response(&session)))
}

fn topics_response(session: &Session) -> TopicsResponse {
    TopicsResponse {
        topics: session.topics().to_vec(),
        selected: session.topic().map(str::to_string),
    }
}

/// Conversation change notifications as server-sent events
async fn events(State(state): State<AppState>) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let mut rx = state.session.lock().await.subscribe();

    let stream = async_stream::stream! {
        yield Ok(Event::default().event("connected").data("Conversation events connected"));

        loop {
            match rx.recv().await {
                Ok(event) => {
                    if let Ok(json) = serde_json::to_string(&event) {
                        yield Ok(Event::default().event("conversation").data(json));
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Event stream fell behind");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/v1/conversations", get(list_conversations).post(new_conversation))
        .route("/v1/conversations/active", get(active_conversation))
        .route(
            "/v1/conversations/:id",
            get(get_conversation)
                .patch(rename_conversation)
                .delete(delete_conversation),
        )
        .route("/v1/conversations/:id/load", post(load_conversation))
        .route("/v1/ask", post(ask))
        .route("/v1/export/:format", get(export).post(save_export))
        .route("/v1/quiz", post(request_quiz))
        .route("/v1/quiz/answer", post(answer_quiz))
        .route("/v1/preferences", get(get_preferences).put(put_preferences))
        .route("/v1/avatars", get(list_avatars))
        .route("/v1/avatars/:id", put(select_avatar))
        .route("/v1/voice", get(voice_status).post(voice_event))
        .route("/v1/voice/poll", post(poll_voice))
        .route("/v1/tts", post(tts))
        .route("/v1/recommend", post(recommend))
        .route("/v1/topics", get(list_topics))
        .route("/v1/topic", put(select_topic))
        .route("/v1/events", get(events))
}
