//! Widget session
//!
//! Everything the widget used to keep in page-level globals (selected avatar,
//! voice state, explanation level, current topic) lives here, next to the
//! conversation manager that owns the persisted history.
//!
//! Asking a question is split in two so the remote call can run without
//! holding the session: [`Session::prepare_question`] captures a conversation
//! token, and [`Session::complete_question`] drops the answer if the token has
//! changed in the meantime (new conversation, another one loaded, or the
//! active one deleted).

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::client::TopicsConfig;
use crate::conversation::{ActiveConversation, ConversationSummary, Exchange};
use crate::export::{self, Artifact, ExportError, ExportFormat, PdfLayout};
use crate::preferences::{default_avatars, Avatar, ExplanationLevel, Preferences};
use crate::providers::{
    AnswerRequest, AnswerReply, AnswerService, QuizAnswerRequest, QuizRequest, RecommendOutcome,
    RecommendRequest, ServiceError,
};
use crate::quiz::{self, QuizItem, QuizVerdict};
use crate::store::{DocumentStore, StorageError};
use crate::topics::{self, TopicCache};

use super::manager::{ConversationEvent, ConversationManager, HistoryError};
use super::speech::{Transition, VoiceEffect, VoiceError, VoiceEvent, VoiceMachine};

/// Exchanges sent along when asking for a recommendation
pub const RECOMMEND_HISTORY: usize = 5;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    History(#[from] HistoryError),

    #[error("Answer service error: {0}")]
    Service(#[from] ServiceError),

    #[error(transparent)]
    Export(#[from] ExportError),

    #[error("No quiz is waiting for an answer")]
    NoQuiz,
}

impl From<StorageError> for SessionError {
    fn from(e: StorageError) -> Self {
        SessionError::History(HistoryError::Storage(e))
    }
}

/// A question on its way to the answer service
#[derive(Debug, Clone)]
pub struct PendingQuestion {
    token: Uuid,
    pub request: AnswerRequest,
}

/// A quiz selection on its way to be graded
#[derive(Debug, Clone)]
pub struct PendingQuizAnswer {
    token: Uuid,
    item: QuizItem,
    pub request: QuizAnswerRequest,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AskOutcome {
    /// The exchange was saved to the active conversation. `effects` is what
    /// the voice machine wants done with the answer (usually an utterance).
    Appended {
        exchange: Exchange,
        effects: Vec<VoiceEffect>,
    },
    /// The conversation changed while the answer was in flight
    Discarded,
}

impl AskOutcome {
    pub fn exchange(&self) -> Option<&Exchange> {
        match self {
            Self::Appended { exchange, .. } => Some(exchange),
            Self::Discarded => None,
        }
    }
}

/// Static inputs for a session
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub user_id: String,
    pub topic: Option<String>,
    /// Offered until the answer service supplies its own list
    pub topics: Vec<String>,
    pub pdf_layout: PdfLayout,
    /// Where server-side exports are written
    pub export_dir: PathBuf,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            user_id: "anonymous".to_string(),
            topic: None,
            topics: TopicsConfig::default().available,
            pdf_layout: PdfLayout::default(),
            export_dir: PathBuf::from("./data/exports"),
        }
    }
}

pub struct Session {
    store: Arc<dyn DocumentStore>,
    manager: ConversationManager,
    preferences: Preferences,
    voice: VoiceMachine,
    avatars: Vec<Avatar>,
    topics: Vec<String>,
    pending_quiz: Option<QuizItem>,
    token: Uuid,
    options: SessionOptions,
}

impl Session {
    pub async fn open(
        store: Arc<dyn DocumentStore>,
        options: SessionOptions,
    ) -> Result<Self, SessionError> {
        let preferences = Preferences::load(store.as_ref()).await?;
        let voice = VoiceMachine::new(preferences.voice_enabled);
        info!(user = %options.user_id, avatar = %preferences.selected_avatar, "Opened session");

        Ok(Self {
            manager: ConversationManager::new(store.clone()),
            store,
            preferences,
            voice,
            avatars: default_avatars(),
            topics: options.topics.clone(),
            pending_quiz: None,
            token: Uuid::new_v4(),
            options,
        })
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<ConversationEvent> {
        self.manager.subscribe()
    }

    pub fn preferences(&self) -> &Preferences {
        &self.preferences
    }

    pub fn voice(&self) -> &VoiceMachine {
        &self.voice
    }

    pub fn avatars(&self) -> &[Avatar] {
        &self.avatars
    }

    pub fn topic(&self) -> Option<&str> {
        self.options.topic.as_deref()
    }

    /// Pick the topic questions are asked under. `None` or blank clears it.
    pub fn set_topic(&mut self, topic: Option<String>) -> Result<(), SessionError> {
        let topic = topic.map(|t| t.trim().to_string()).filter(|t| !t.is_empty());
        if let Some(t) = &topic {
            if !self.topics.contains(t) {
                return Err(HistoryError::InvalidInput(format!("unknown topic '{}'", t)).into());
            }
        }
        info!(topic = ?topic, "Selected topic");
        self.options.topic = topic;
        Ok(())
    }

    pub fn topics(&self) -> &[String] {
        &self.topics
    }

    /// Switch to the cached topic list if it is younger than a day.
    /// Returns `false` when the service has to be asked.
    pub async fn use_cached_topics(&mut self, now: DateTime<Utc>) -> Result<bool, SessionError> {
        match topics::fresh_topics(self.store.as_ref(), now).await? {
            Some(cached) => {
                self.topics = cached;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Take a fetched topic list and cache it. On failure the current list stays.
    pub async fn apply_topics(
        &mut self,
        fetched: Result<Vec<String>, ServiceError>,
        now: DateTime<Utc>,
    ) -> Result<&[String], SessionError> {
        match fetched {
            Ok(list) if !list.is_empty() => {
                topics::save_cache(self.store.as_ref(), &TopicCache::new(list.clone(), now)).await?;
                info!(count = list.len(), "Loaded topics from the answer service");
                self.topics = list;
            }
            Ok(_) => warn!("Answer service sent no topics, keeping the current list"),
            Err(e) => warn!(error = %e, "Could not load topics, keeping the current list"),
        }
        Ok(&self.topics)
    }

    pub async fn refresh_topics(&mut self, service: &dyn AnswerService) -> Result<&[String], SessionError> {
        let now = Utc::now();
        if self.use_cached_topics(now).await? {
            return Ok(&self.topics);
        }
        let fetched = service.topics().await;
        self.apply_topics(fetched, now).await
    }

    pub async fn list_summaries(&self) -> Result<Vec<ConversationSummary>, SessionError> {
        Ok(self.manager.list_summaries().await?)
    }

    pub async fn active_conversation(&self) -> Result<ActiveConversation, SessionError> {
        Ok(self.manager.active_conversation().await?)
    }

    pub fn prepare_question(&self, question: &str) -> Result<PendingQuestion, SessionError> {
        let question = question.trim();
        if question.is_empty() {
            return Err(HistoryError::InvalidInput("question must not be empty".into()).into());
        }

        Ok(PendingQuestion {
            token: self.token,
            request: AnswerRequest {
                question: question.to_string(),
                user_id: self.options.user_id.clone(),
                avatar_id: self.preferences.selected_avatar.clone(),
                topic: self.options.topic.clone(),
                level: self.preferences.level,
            },
        })
    }

    pub async fn complete_question(
        &mut self,
        pending: PendingQuestion,
        reply: AnswerReply,
    ) -> Result<AskOutcome, SessionError> {
        if pending.token != self.token {
            info!(question = %pending.request.question, "Dropping answer for a conversation that is no longer active");
            return Ok(AskOutcome::Discarded);
        }

        let (answer, media_ref) = reply.into_answer()?;
        let exchange = Exchange::new(pending.request.question, answer).with_media(media_ref);
        self.manager.append_exchange(exchange.clone()).await?;

        let effects = self.speak(&exchange.answer);
        Ok(AskOutcome::Appended { exchange, effects })
    }

    /// Ask the service and save the exchange
    pub async fn ask(
        &mut self,
        service: &dyn AnswerService,
        question: &str,
    ) -> Result<AskOutcome, SessionError> {
        let pending = self.prepare_question(question)?;
        let reply = service.ask(&pending.request).await?;
        self.complete_question(pending, reply).await
    }

    pub async fn start_new_conversation(&mut self) -> Result<(), SessionError> {
        self.manager.start_new_conversation().await?;
        self.pending_quiz = None;
        self.rotate_token();
        Ok(())
    }

    pub async fn load_conversation(&mut self, id: usize) -> Result<Vec<Exchange>, SessionError> {
        let messages = self.manager.load_conversation(id).await?;
        self.pending_quiz = None;
        self.rotate_token();
        Ok(messages)
    }

    pub async fn rename_conversation(&mut self, id: usize, new_name: &str) -> Result<(), SessionError> {
        Ok(self.manager.rename_conversation(id, new_name).await?)
    }

    /// Returns `true` when the active conversation was the one deleted
    pub async fn delete_conversation(&mut self, id: usize) -> Result<bool, SessionError> {
        let cleared = self.manager.delete_conversation(id).await?;
        if cleared {
            self.pending_quiz = None;
            self.rotate_token();
        }
        Ok(cleared)
    }

    pub async fn export(&self, format: ExportFormat) -> Result<Artifact, SessionError> {
        let active = self.manager.active_conversation().await?;
        Ok(export::export(&active, format, &self.options.pdf_layout)?)
    }

    /// Write the active conversation into the configured export directory
    pub async fn export_to_dir(&self, format: ExportFormat) -> Result<PathBuf, SessionError> {
        let active = self.manager.active_conversation().await?;
        let path =
            export::export_to_dir(&active, format, &self.options.pdf_layout, &self.options.export_dir).await?;
        info!(path = %path.display(), "Exported conversation");
        Ok(path)
    }

    /// Recent exchanges of the active conversation, for a topic recommendation
    pub async fn recommend_request(&self) -> Result<RecommendRequest, SessionError> {
        let active = self.manager.active_conversation().await?;
        let skip = active.messages.len().saturating_sub(RECOMMEND_HISTORY);
        Ok(RecommendRequest {
            user_id: self.options.user_id.clone(),
            history: active.messages.into_iter().skip(skip).collect(),
        })
    }

    pub async fn recommend(&self, service: &dyn AnswerService) -> Result<RecommendOutcome, SessionError> {
        let request = self.recommend_request().await?;
        Ok(service.recommend(&request).await.into())
    }

    pub async fn update_preferences(&mut self, preferences: Preferences) -> Result<Transition, SessionError> {
        if !self.avatars.iter().any(|a| a.avatar_id == preferences.selected_avatar) {
            return Err(HistoryError::InvalidInput(format!(
                "unknown avatar '{}'",
                preferences.selected_avatar
            ))
            .into());
        }
        preferences.save(self.store.as_ref()).await?;
        self.preferences = preferences;
        Ok(self.voice.set_voice_enabled(self.preferences.voice_enabled))
    }

    pub async fn set_level(&mut self, level: ExplanationLevel) -> Result<(), SessionError> {
        let mut preferences = self.preferences.clone();
        preferences.level = level;
        self.update_preferences(preferences).await?;
        Ok(())
    }

    /// Reload the avatar list, keeping the built-in one if the service fails
    pub async fn refresh_avatars(&mut self, service: &dyn AnswerService) -> &[Avatar] {
        let fetched = service.avatars().await;
        self.apply_avatars(fetched)
    }

    pub fn apply_avatars(&mut self, fetched: Result<Vec<Avatar>, ServiceError>) -> &[Avatar] {
        self.avatars = match fetched {
            Ok(avatars) if !avatars.is_empty() => avatars,
            Ok(_) => default_avatars(),
            Err(e) => {
                warn!(error = %e, "Could not load avatars, using the default");
                default_avatars()
            }
        };
        &self.avatars
    }

    pub async fn select_avatar(&mut self, avatar_id: &str) -> Result<&Avatar, SessionError> {
        let index = self
            .avatars
            .iter()
            .position(|a| a.avatar_id == avatar_id)
            .ok_or_else(|| HistoryError::InvalidInput(format!("unknown avatar '{}'", avatar_id)))?;

        let mut preferences = self.preferences.clone();
        preferences.selected_avatar = avatar_id.to_string();
        preferences.save(self.store.as_ref()).await?;
        self.preferences = preferences;
        info!(avatar = avatar_id, "Selected avatar");
        Ok(&self.avatars[index])
    }

    pub fn quiz_request(&self) -> QuizRequest {
        QuizRequest {
            user_id: self.options.user_id.clone(),
            level: self.preferences.level,
        }
    }

    /// Log a served quiz and keep it until it is answered
    pub async fn accept_quiz(&mut self, item: QuizItem) -> Result<(), SessionError> {
        quiz::record(self.store.as_ref(), &item).await?;
        self.pending_quiz = Some(item);
        Ok(())
    }

    pub async fn request_quiz(&mut self, service: &dyn AnswerService) -> Result<QuizItem, SessionError> {
        let item = service.quiz(&self.quiz_request()).await?;
        self.accept_quiz(item.clone()).await?;
        Ok(item)
    }

    pub fn pending_quiz(&self) -> Option<&QuizItem> {
        self.pending_quiz.as_ref()
    }

    pub fn prepare_quiz_answer(&self, selection: &str) -> Result<PendingQuizAnswer, SessionError> {
        let item = self.pending_quiz.clone().ok_or(SessionError::NoQuiz)?;
        if !item.has_option(selection) {
            return Err(HistoryError::InvalidInput(format!("'{}' is not one of the options", selection)).into());
        }

        Ok(PendingQuizAnswer {
            token: self.token,
            request: QuizAnswerRequest {
                question: item.question.clone(),
                answer: selection.to_string(),
                correct_answer: item.correct_answer.clone(),
                topic: item.topic.clone(),
            },
            item,
        })
    }

    /// Save the grading feedback as an exchange
    pub async fn complete_quiz_answer(
        &mut self,
        pending: PendingQuizAnswer,
        verdict: &QuizVerdict,
    ) -> Result<AskOutcome, SessionError> {
        if pending.token != self.token {
            info!(question = %pending.item.question, "Dropping quiz grade for a conversation that is no longer active");
            return Ok(AskOutcome::Discarded);
        }

        let feedback = quiz::feedback(&pending.item, &pending.request.answer, verdict);
        let exchange = Exchange::new(pending.item.question.clone(), feedback);
        self.manager.append_exchange(exchange.clone()).await?;
        // A newer quiz accepted while this one was being graded stays open
        if self.pending_quiz.as_ref() == Some(&pending.item) {
            self.pending_quiz = None;
        }
        let effects = self.speak(&exchange.answer);
        Ok(AskOutcome::Appended { exchange, effects })
    }

    pub async fn answer_quiz(
        &mut self,
        service: &dyn AnswerService,
        selection: &str,
    ) -> Result<(QuizVerdict, AskOutcome), SessionError> {
        let pending = self.prepare_quiz_answer(selection)?;
        let verdict = service.grade_quiz(&pending.request).await?;
        let outcome = self.complete_quiz_answer(pending, &verdict).await?;
        Ok((verdict, outcome))
    }

    pub fn handle_voice(&mut self, event: VoiceEvent) -> Result<Transition, VoiceError> {
        self.voice.handle(event)
    }

    /// Current voice state, after stopping recognition that has gone quiet
    pub fn poll_voice(&mut self, now: Instant) -> Transition {
        self.voice.check_idle(now).unwrap_or_else(|| Transition {
            state: self.voice.state(),
            effects: Vec::new(),
        })
    }

    fn speak(&mut self, text: &str) -> Vec<VoiceEffect> {
        match self.voice.handle(VoiceEvent::Speak(text.to_string())) {
            Ok(transition) => transition.effects,
            Err(e) => {
                warn!(error = %e, "Voice machine rejected answer");
                Vec::new()
            }
        }
    }

    fn rotate_token(&mut self) {
        self.token = Uuid::new_v4();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::speech::{VoiceState, RECOGNITION_IDLE_TIMEOUT};
    use crate::providers::testing::ScriptedAnswerService;
    use crate::providers::FALLBACK_RECOMMENDATION;
    use std::time::Duration;
    use crate::store::InMemoryStore;

    async fn session() -> Session {
        let store = Arc::new(InMemoryStore::new());
        Session::open(store, SessionOptions::default()).await.unwrap()
    }

    fn quiz_item() -> QuizItem {
        QuizItem {
            question: "Which principle hides internal state?".into(),
            options: vec!["Encapsulation".into(), "Inheritance".into()],
            correct_answer: "Encapsulation".into(),
            topic: "Encapsulamiento".into(),
        }
    }

    #[tokio::test]
    async fn test_ask_appends_exchange() {
        let mut session = session().await;
        let service = ScriptedAnswerService::answering(&["4"]);

        let outcome = session.ask(&service, "2+2?").await.unwrap();
        assert_eq!(outcome.exchange(), Some(&Exchange::new("2+2?", "4")));

        let history = session.list_summaries().await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].id, 0);
        assert_eq!(history[0].messages, vec![Exchange::new("2+2?", "4")]);
    }

    #[tokio::test]
    async fn test_request_carries_preferences() {
        let mut session = session().await;
        session.set_level(ExplanationLevel::Advanced).await.unwrap();
        session.set_topic(Some("Herencia".into())).unwrap();
        let service = ScriptedAnswerService::answering(&["ok"]);

        session.ask(&service, "  What is a subclass?  ").await.unwrap();

        let requests = service.requests.lock().unwrap();
        assert_eq!(requests[0].question, "What is a subclass?");
        assert_eq!(requests[0].level, ExplanationLevel::Advanced);
        assert_eq!(requests[0].topic.as_deref(), Some("Herencia"));
        assert_eq!(requests[0].avatar_id, "default");
    }

    #[tokio::test]
    async fn test_late_answer_after_new_conversation_is_discarded() {
        let mut session = session().await;
        let service = ScriptedAnswerService::answering(&["first", "late"]);
        session.ask(&service, "first question").await.unwrap();

        let pending = session.prepare_question("slow question").unwrap();
        let reply = service.ask(&pending.request).await.unwrap();
        session.start_new_conversation().await.unwrap();

        let outcome = session.complete_question(pending, reply).await.unwrap();
        assert_eq!(outcome, AskOutcome::Discarded);

        let active = session.active_conversation().await.unwrap();
        assert!(active.is_empty());
        let history = session.list_summaries().await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].messages.len(), 1);
    }

    #[tokio::test]
    async fn test_late_answer_after_load_is_discarded() {
        let mut session = session().await;
        let service = ScriptedAnswerService::answering(&["a", "b", "late"]);
        session.ask(&service, "one").await.unwrap();
        session.start_new_conversation().await.unwrap();
        session.ask(&service, "two").await.unwrap();

        let pending = session.prepare_question("three").unwrap();
        session.load_conversation(0).await.unwrap();
        let reply = service.ask(&pending.request).await.unwrap();

        assert_eq!(
            session.complete_question(pending, reply).await.unwrap(),
            AskOutcome::Discarded
        );
        let history = session.list_summaries().await.unwrap();
        assert_eq!(history[0].messages.len(), 1);
        assert_eq!(history[1].messages.len(), 1);
    }

    #[tokio::test]
    async fn test_rename_keeps_pending_answer() {
        let mut session = session().await;
        let service = ScriptedAnswerService::answering(&["a", "b"]);
        session.ask(&service, "one").await.unwrap();

        let pending = session.prepare_question("two").unwrap();
        session.rename_conversation(0, "Renamed").await.unwrap();
        let reply = service.ask(&pending.request).await.unwrap();

        assert!(matches!(
            session.complete_question(pending, reply).await.unwrap(),
            AskOutcome::Appended { .. }
        ));
        assert_eq!(session.list_summaries().await.unwrap()[0].messages.len(), 2);
    }

    #[tokio::test]
    async fn test_service_error_persists_nothing() {
        let mut session = session().await;
        let service = ScriptedAnswerService::default();
        service.push_reply(Err(ServiceError::Status { status: 503, message: "busy".into() }));
        service.push_reply(Ok(AnswerReply {
            answer: String::new(),
            avatar_url: None,
            error: Some("model failed".into()),
        }));

        assert!(matches!(
            session.ask(&service, "q").await,
            Err(SessionError::Service(ServiceError::Status { status: 503, .. }))
        ));
        assert!(matches!(
            session.ask(&service, "q").await,
            Err(SessionError::Service(ServiceError::Remote(_)))
        ));
        assert!(session.list_summaries().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_blank_question_rejected() {
        let session = session().await;
        assert!(matches!(
            session.prepare_question("   "),
            Err(SessionError::History(HistoryError::InvalidInput(_)))
        ));
    }

    #[tokio::test]
    async fn test_delete_active_rotates_token() {
        let mut session = session().await;
        let service = ScriptedAnswerService::answering(&["a", "late"]);
        session.ask(&service, "one").await.unwrap();

        let pending = session.prepare_question("two").unwrap();
        assert!(session.delete_conversation(0).await.unwrap());
        let reply = service.ask(&pending.request).await.unwrap();

        assert_eq!(
            session.complete_question(pending, reply).await.unwrap(),
            AskOutcome::Discarded
        );
        assert!(session.list_summaries().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_answer_starts_speech_when_voice_enabled() {
        let mut session = session().await;
        let prefs = Preferences {
            voice_enabled: true,
            ..Preferences::default()
        };
        session.update_preferences(prefs).await.unwrap();
        session.handle_voice(VoiceEvent::UserInteracted).unwrap();

        let service = ScriptedAnswerService::answering(&["**Four**"]);
        let outcome = session.ask(&service, "2+2?").await.unwrap();
        assert_eq!(session.voice().state(), VoiceState::Speaking);
        assert_eq!(
            outcome,
            AskOutcome::Appended {
                exchange: Exchange::new("2+2?", "**Four**"),
                effects: vec![VoiceEffect::Utter("Four".into())],
            }
        );

        let done = session.handle_voice(VoiceEvent::Finished).unwrap();
        assert_eq!(done.state, VoiceState::Idle);
    }

    #[tokio::test]
    async fn test_answer_has_no_effects_when_voice_disabled() {
        let mut session = session().await;
        let service = ScriptedAnswerService::answering(&["4"]);
        match session.ask(&service, "2+2?").await.unwrap() {
            AskOutcome::Appended { effects, .. } => assert!(effects.is_empty()),
            AskOutcome::Discarded => panic!("answer should be saved"),
        }
        assert_eq!(session.voice().state(), VoiceState::Idle);
    }

    #[tokio::test]
    async fn test_poll_voice_stops_quiet_recognition() {
        let mut session = session().await;
        session.handle_voice(VoiceEvent::StartListening).unwrap();

        let quiet = session.poll_voice(Instant::now());
        assert_eq!(quiet.state, VoiceState::Listening);
        assert!(quiet.effects.is_empty());

        let later = Instant::now() + RECOGNITION_IDLE_TIMEOUT + Duration::from_secs(1);
        let stopped = session.poll_voice(later);
        assert_eq!(stopped.state, VoiceState::Idle);
        assert!(stopped.effects.contains(&VoiceEffect::StopRecognition));
    }

    #[tokio::test]
    async fn test_preferences_reject_unknown_avatar() {
        let mut session = session().await;
        let prefs = Preferences {
            selected_avatar: "ghost".into(),
            ..Preferences::default()
        };
        assert!(matches!(
            session.update_preferences(prefs).await,
            Err(SessionError::History(HistoryError::InvalidInput(_)))
        ));
        assert_eq!(session.preferences().selected_avatar, "default");
        let stored = Preferences::load(session.store.as_ref()).await.unwrap();
        assert_eq!(stored.selected_avatar, "default");
    }

    #[tokio::test]
    async fn test_set_topic_must_be_offered() {
        let mut session = session().await;
        session.set_topic(Some("  Polimorfismo ".into())).unwrap();
        assert_eq!(session.topic(), Some("Polimorfismo"));

        assert!(session.set_topic(Some("Cooking".into())).is_err());
        assert_eq!(session.topic(), Some("Polimorfismo"));

        session.set_topic(Some("   ".into())).unwrap();
        assert_eq!(session.topic(), None);
    }

    #[tokio::test]
    async fn test_topics_are_fetched_then_cached() {
        let mut session = session().await;
        let service = ScriptedAnswerService {
            topic_list: Some(vec!["Herencia".into(), "Genéricos".into()]),
            ..ScriptedAnswerService::default()
        };

        let topics = session.refresh_topics(&service).await.unwrap().to_vec();
        assert_eq!(topics, vec!["Herencia", "Genéricos"]);
        session.refresh_topics(&service).await.unwrap();
        assert_eq!(*service.topic_calls.lock().unwrap(), 1);

        session.set_topic(Some("Genéricos".into())).unwrap();

        // A day later the cache is stale and a failed fetch keeps the list
        let tomorrow = Utc::now() + chrono::Duration::hours(25);
        assert!(!session.use_cached_topics(tomorrow).await.unwrap());
        let kept = session
            .apply_topics(Err(ServiceError::EmptyAnswer), tomorrow)
            .await
            .unwrap();
        assert_eq!(kept, ["Herencia", "Genéricos"]);
    }

    #[tokio::test]
    async fn test_failed_topic_fetch_keeps_configured_list() {
        let mut session = session().await;
        let topics = session
            .refresh_topics(&ScriptedAnswerService::default())
            .await
            .unwrap()
            .to_vec();
        assert_eq!(topics, TopicsConfig::default().available);
        assert!(crate::topics::load_cache(session.store.as_ref()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_recommend_sends_recent_exchanges() {
        let mut session = session().await;
        let answers: Vec<String> = (0..7).map(|n| format!("a{}", n)).collect();
        let answers: Vec<&str> = answers.iter().map(String::as_str).collect();
        let service = ScriptedAnswerService {
            recommendation: Some("Study Polimorfismo".into()),
            ..ScriptedAnswerService::answering(&answers)
        };
        for n in 0..7 {
            session.ask(&service, &format!("q{}", n)).await.unwrap();
        }

        let outcome = session.recommend(&service).await.unwrap();
        assert_eq!(outcome.recommendation, "Study Polimorfismo");
        assert!(outcome.notice.is_none());

        let requests = service.recommend_requests.lock().unwrap();
        let history = &requests[0].history;
        assert_eq!(history.len(), RECOMMEND_HISTORY);
        assert_eq!(history[0].question, "q2");
        assert_eq!(history[4].question, "q6");
    }

    #[tokio::test]
    async fn test_recommend_falls_back_on_error() {
        let session = session().await;
        let outcome = session.recommend(&ScriptedAnswerService::default()).await.unwrap();
        assert_eq!(outcome.recommendation, FALLBACK_RECOMMENDATION);
        assert!(outcome.notice.is_some());
    }

    #[tokio::test]
    async fn test_export_empty_conversation() {
        let session = session().await;
        assert!(matches!(
            session.export(ExportFormat::Text).await,
            Err(SessionError::Export(ExportError::EmptyConversation))
        ));
    }

    #[tokio::test]
    async fn test_export_active_conversation() {
        let mut session = session().await;
        let service = ScriptedAnswerService::answering(&["4"]);
        session.ask(&service, "2+2?").await.unwrap();

        let artifact = session.export(ExportFormat::Text).await.unwrap();
        assert_eq!(String::from_utf8(artifact.bytes).unwrap(), "Question: 2+2?\nAnswer: 4\n");
    }

    #[tokio::test]
    async fn test_export_to_configured_dir() {
        let temp_dir = tempfile::tempdir().unwrap();
        let options = SessionOptions {
            export_dir: temp_dir.path().join("exports"),
            ..SessionOptions::default()
        };
        let mut session = Session::open(Arc::new(InMemoryStore::new()), options).await.unwrap();
        session.ask(&ScriptedAnswerService::answering(&["4"]), "2+2?").await.unwrap();

        let path = session.export_to_dir(ExportFormat::Text).await.unwrap();
        assert!(path.starts_with(temp_dir.path().join("exports")));
        assert_eq!(std::fs::read_to_string(path).unwrap(), "Question: 2+2?\nAnswer: 4\n");
    }

    #[tokio::test]
    async fn test_avatar_fallback_and_selection() {
        let mut session = session().await;
        let failing = ScriptedAnswerService::default();
        let avatars = session.refresh_avatars(&failing).await;
        assert_eq!(avatars, default_avatars().as_slice());

        let working = ScriptedAnswerService {
            avatar_list: Some(vec![Avatar {
                avatar_id: "robot".into(),
                name: "Robot".into(),
                url: "/img/robot.png".into(),
                animation_url: None,
            }]),
            ..ScriptedAnswerService::default()
        };
        session.refresh_avatars(&working).await;
        session.select_avatar("robot").await.unwrap();
        assert_eq!(session.preferences().selected_avatar, "robot");
        assert!(session.select_avatar("ghost").await.is_err());

        let reloaded = Preferences::load(session.store.as_ref()).await.unwrap();
        assert_eq!(reloaded.selected_avatar, "robot");
    }

    #[tokio::test]
    async fn test_quiz_flow() {
        let mut session = session().await;
        let service = ScriptedAnswerService {
            quiz_item: Some(quiz_item()),
            verdict: Some(QuizVerdict {
                correct: false,
                explanation: "Inheritance is about reuse.".into(),
            }),
            ..ScriptedAnswerService::default()
        };

        assert!(matches!(
            session.answer_quiz(&service, "Encapsulation").await,
            Err(SessionError::NoQuiz)
        ));

        let item = session.request_quiz(&service).await.unwrap();
        assert_eq!(item, quiz_item());
        assert_eq!(quiz::load_log(session.store.as_ref()).await.unwrap().len(), 1);

        assert!(session.answer_quiz(&service, "Polymorphism").await.is_err());

        let (verdict, outcome) = session.answer_quiz(&service, "Inheritance").await.unwrap();
        assert!(!verdict.correct);
        match outcome {
            AskOutcome::Appended { exchange, .. } => {
                assert_eq!(exchange.question, item.question);
                assert!(exchange.answer.contains("\"Encapsulation\""));
            }
            AskOutcome::Discarded => panic!("quiz feedback should be saved"),
        }
        let history = session.list_summaries().await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].id, 0);
        assert!(session.pending_quiz().is_none());
    }

    #[tokio::test]
    async fn test_quiz_grade_after_new_conversation_is_discarded() {
        let mut session = session().await;
        session.accept_quiz(quiz_item()).await.unwrap();

        let pending = session.prepare_quiz_answer("Encapsulation").unwrap();
        session.start_new_conversation().await.unwrap();
        let verdict = QuizVerdict {
            correct: true,
            explanation: String::new(),
        };

        assert_eq!(
            session.complete_quiz_answer(pending, &verdict).await.unwrap(),
            AskOutcome::Discarded
        );
        assert!(session.list_summaries().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_grade_of_replaced_quiz_keeps_newer_one() {
        let mut session = session().await;
        session.accept_quiz(quiz_item()).await.unwrap();
        let pending = session.prepare_quiz_answer("Encapsulation").unwrap();

        let newer = QuizItem {
            question: "Which keyword creates a subclass?".into(),
            options: vec!["extends".into(), "implements".into()],
            correct_answer: "extends".into(),
            topic: "Herencia".into(),
        };
        session.accept_quiz(newer.clone()).await.unwrap();

        let verdict = QuizVerdict {
            correct: true,
            explanation: String::new(),
        };
        let outcome = session.complete_quiz_answer(pending, &verdict).await.unwrap();
        assert!(matches!(outcome, AskOutcome::Appended { .. }));
        assert_eq!(session.pending_quiz(), Some(&newer));
    }
}
