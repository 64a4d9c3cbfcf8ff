//! Voice input/output state machine
//!
//! The widget either listens (speech-to-text), speaks an answer
//! (text-to-speech), has speech paused, or is idle. Browser callbacks are fed
//! in as [`VoiceEvent`]s; the machine answers with the new state and the
//! [`VoiceEffect`]s the front end has to carry out.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};

use crate::providers::{AnswerService, Notice, NoticeLevel, TtsRequest};

/// Listening stops after this long without recognition results
pub const RECOGNITION_IDLE_TIMEOUT: Duration = Duration::from_secs(15);

/// Longest text sent to the remote synthesizer
pub const TTS_MAX_CHARS: usize = 1000;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoiceState {
    #[default]
    Idle,
    Listening,
    Speaking,
    Paused,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum VoiceEvent {
    /// First click/keypress on the page; browsers block audio before it
    UserInteracted,
    StartListening,
    StopListening,
    Transcript {
        text: String,
        #[serde(rename = "isFinal", default)]
        is_final: bool,
    },
    SilenceTimeout,
    RecognitionError(String),
    Speak(String),
    Pause,
    Resume,
    /// The current utterance ended on its own
    Finished,
    Stop,
}

/// Work the front end must do after a transition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum VoiceEffect {
    StartRecognition,
    StopRecognition,
    /// Speak this already-cleaned text
    Utter(String),
    PauseSpeech,
    ResumeSpeech,
    CancelSpeech,
    /// A final transcript to send as a question
    Submit(String),
    Notify(Notice),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum VoiceError {
    #[error("Cannot handle {event} while {state:?}")]
    InvalidTransition { state: VoiceState, event: &'static str },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Transition {
    pub state: VoiceState,
    pub effects: Vec<VoiceEffect>,
}

#[derive(Debug, Default)]
pub struct VoiceMachine {
    state: VoiceState,
    voice_enabled: bool,
    user_has_interacted: bool,
    pending_utterance: Option<String>,
    last_recognition_activity: Option<Instant>,
}

impl VoiceMachine {
    pub fn new(voice_enabled: bool) -> Self {
        Self {
            voice_enabled,
            ..Self::default()
        }
    }

    pub fn state(&self) -> VoiceState {
        self.state
    }

    pub fn voice_enabled(&self) -> bool {
        self.voice_enabled
    }

    pub fn pending_utterance(&self) -> Option<&str> {
        self.pending_utterance.as_deref()
    }

    /// Turning voice off cancels anything being spoken
    pub fn set_voice_enabled(&mut self, enabled: bool) -> Transition {
        self.voice_enabled = enabled;
        let mut effects = Vec::new();
        if !enabled {
            self.pending_utterance = None;
            if matches!(self.state, VoiceState::Speaking | VoiceState::Paused) {
                self.state = VoiceState::Idle;
                effects.push(VoiceEffect::CancelSpeech);
            }
        }
        self.transition(effects)
    }

    pub fn handle(&mut self, event: VoiceEvent) -> Result<Transition, VoiceError> {
        debug!(state = ?self.state, event = event_name(&event), "Voice event");
        let now = Instant::now();

        match (self.state, event) {
            (_, VoiceEvent::UserInteracted) => {
                self.user_has_interacted = true;
                let mut effects = Vec::new();
                if self.state == VoiceState::Idle {
                    if let Some(text) = self.pending_utterance.take() {
                        self.state = VoiceState::Speaking;
                        effects.push(VoiceEffect::Utter(text));
                    }
                }
                Ok(self.transition(effects))
            }

            (_, VoiceEvent::Speak(text)) => {
                let cleaned = speech_text(&text);
                if !self.voice_enabled || cleaned.is_empty() {
                    return Ok(self.transition(Vec::new()));
                }
                if !self.user_has_interacted {
                    self.pending_utterance = Some(cleaned);
                    return Ok(self.transition(Vec::new()));
                }
                let mut effects = Vec::new();
                match self.state {
                    VoiceState::Listening => effects.push(VoiceEffect::StopRecognition),
                    VoiceState::Speaking | VoiceState::Paused => effects.push(VoiceEffect::CancelSpeech),
                    VoiceState::Idle => {}
                }
                effects.push(VoiceEffect::Utter(cleaned));
                self.state = VoiceState::Speaking;
                Ok(self.transition(effects))
            }

            (VoiceState::Listening, VoiceEvent::StartListening) => {
                Err(self.invalid("StartListening"))
            }
            (state, VoiceEvent::StartListening) => {
                let mut effects = Vec::new();
                if matches!(state, VoiceState::Speaking | VoiceState::Paused) {
                    effects.push(VoiceEffect::CancelSpeech);
                }
                effects.push(VoiceEffect::StartRecognition);
                self.state = VoiceState::Listening;
                self.last_recognition_activity = Some(now);
                Ok(self.transition(effects))
            }

            (VoiceState::Listening, VoiceEvent::StopListening) => Ok(self.stop_listening(None)),
            (_, VoiceEvent::StopListening) => Err(self.invalid("StopListening")),

            (VoiceState::Listening, VoiceEvent::Transcript { text, is_final }) => {
                self.last_recognition_activity = Some(now);
                if !is_final {
                    return Ok(self.transition(Vec::new()));
                }
                let mut transition = self.stop_listening(None);
                let text = text.trim().to_string();
                if !text.is_empty() {
                    transition.effects.push(VoiceEffect::Submit(text));
                }
                Ok(transition)
            }
            (_, VoiceEvent::Transcript { .. }) => Err(self.invalid("Transcript")),

            (VoiceState::Listening, VoiceEvent::SilenceTimeout) => Ok(self.stop_listening(Some(Notice {
                level: NoticeLevel::Info,
                message: "Voice recognition stopped after inactivity".into(),
            }))),
            // A timer firing after listening already ended
            (_, VoiceEvent::SilenceTimeout) => Ok(self.transition(Vec::new())),

            (VoiceState::Listening, VoiceEvent::RecognitionError(code)) => {
                Ok(self.stop_listening(Some(recognition_notice(&code))))
            }
            (_, VoiceEvent::RecognitionError(_)) => Err(self.invalid("RecognitionError")),

            (VoiceState::Speaking, VoiceEvent::Pause) => {
                self.state = VoiceState::Paused;
                Ok(self.transition(vec![VoiceEffect::PauseSpeech]))
            }
            (_, VoiceEvent::Pause) => Err(self.invalid("Pause")),

            (VoiceState::Paused, VoiceEvent::Resume) => {
                self.state = VoiceState::Speaking;
                Ok(self.transition(vec![VoiceEffect::ResumeSpeech]))
            }
            (_, VoiceEvent::Resume) => Err(self.invalid("Resume")),

            (VoiceState::Speaking, VoiceEvent::Finished) => {
                self.state = VoiceState::Idle;
                Ok(self.transition(Vec::new()))
            }
            // Late end callbacks from a cancelled utterance
            (_, VoiceEvent::Finished) => Ok(self.transition(Vec::new())),

            (state, VoiceEvent::Stop) => {
                let effects = match state {
                    VoiceState::Idle => Vec::new(),
                    VoiceState::Listening => vec![VoiceEffect::StopRecognition],
                    VoiceState::Speaking | VoiceState::Paused => vec![VoiceEffect::CancelSpeech],
                };
                self.state = VoiceState::Idle;
                self.last_recognition_activity = None;
                Ok(self.transition(effects))
            }
        }
    }

    /// Fire the silence timeout if listening has been idle long enough
    pub fn check_idle(&mut self, now: Instant) -> Option<Transition> {
        let last = self.last_recognition_activity?;
        if self.state != VoiceState::Listening
            || now.saturating_duration_since(last) < RECOGNITION_IDLE_TIMEOUT
        {
            return None;
        }
        self.handle(VoiceEvent::SilenceTimeout).ok()
    }

    fn stop_listening(&mut self, notice: Option<Notice>) -> Transition {
        self.state = VoiceState::Idle;
        self.last_recognition_activity = None;
        let mut effects = vec![VoiceEffect::StopRecognition];
        if let Some(notice) = notice {
            effects.push(VoiceEffect::Notify(notice));
        }
        self.transition(effects)
    }

    fn transition(&self, effects: Vec<VoiceEffect>) -> Transition {
        Transition {
            state: self.state,
            effects,
        }
    }

    fn invalid(&self, event: &'static str) -> VoiceError {
        VoiceError::InvalidTransition {
            state: self.state,
            event,
        }
    }
}

fn event_name(event: &VoiceEvent) -> &'static str {
    match event {
        VoiceEvent::UserInteracted => "UserInteracted",
        VoiceEvent::StartListening => "StartListening",
        VoiceEvent::StopListening => "StopListening",
        VoiceEvent::Transcript { .. } => "Transcript",
        VoiceEvent::SilenceTimeout => "SilenceTimeout",
        VoiceEvent::RecognitionError(_) => "RecognitionError",
        VoiceEvent::Speak(_) => "Speak",
        VoiceEvent::Pause => "Pause",
        VoiceEvent::Resume => "Resume",
        VoiceEvent::Finished => "Finished",
        VoiceEvent::Stop => "Stop",
    }
}

/// How an answer gets voiced
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Speech {
    /// Audio rendered by the answer service
    Audio(Vec<u8>),
    /// The service could not synthesize; speak locally instead
    Fallback { effect: VoiceEffect, notice: Notice },
}

/// Ask the service for audio, falling back to a local utterance when it
/// fails. `None` when nothing speakable is left after cleanup.
pub async fn synthesize(service: &dyn AnswerService, text: &str) -> Option<Speech> {
    let cleaned: String = speech_text(text).chars().take(TTS_MAX_CHARS).collect();
    if cleaned.is_empty() {
        return None;
    }

    let request = TtsRequest { text: cleaned.clone() };
    match service.tts(&request).await {
        Ok(audio) if !audio.is_empty() => Some(Speech::Audio(audio)),
        Ok(_) => Some(local_speech(cleaned, "The voice service returned no audio")),
        Err(e) => {
            warn!(error = %e, "Remote speech failed, using the local voice");
            Some(local_speech(cleaned, "Voice service unavailable, using the local voice"))
        }
    }
}

fn local_speech(text: String, message: &str) -> Speech {
    Speech::Fallback {
        effect: VoiceEffect::Utter(text),
        notice: Notice {
            level: NoticeLevel::Warning,
            message: message.to_string(),
        },
    }
}

/// User-facing message for a speech recognition error code
pub fn recognition_notice(code: &str) -> Notice {
    let message = match code {
        "no-speech" => "No speech detected, try again".to_string(),
        "aborted" => "Voice recognition cancelled".to_string(),
        "network" => "Network error during voice recognition".to_string(),
        "not-allowed" => "Microphone permission denied".to_string(),
        other => format!("Voice recognition error: {}", other),
    };
    Notice::error(message)
}

/// Spoken forms of acronyms the synthesizer would otherwise spell badly
const ACRONYM_EXPANSIONS: &[(&str, &str)] = &[
    ("POO", "Programación Orientada a Objetos"),
    ("UML", "U Em Ele"),
    ("MVC", "Em Vi Ci"),
    ("ORM", "Mapeo Objeto Relacional"),
    ("BD", "Base de Datos"),
    ("API", "A Pi I"),
    ("SQL", "Esquiu Ele"),
];

struct SpeechPatterns {
    emoji: Regex,
    code_block: Regex,
    inline_code: Regex,
    bold: Regex,
    italic: Regex,
    heading: Regex,
    list_dash: Regex,
    whitespace: Regex,
    acronym: Regex,
}

fn patterns() -> &'static SpeechPatterns {
    static PATTERNS: OnceLock<SpeechPatterns> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        let compile = |pattern: &str| Regex::new(pattern).expect("speech pattern is valid");
        SpeechPatterns {
            emoji: compile(
                r"[\x{1F300}-\x{1F5FF}\x{1F600}-\x{1F64F}\x{1F680}-\x{1F6FF}\x{1F700}-\x{1F7FF}\x{1F800}-\x{1F8FF}\x{1F900}-\x{1F9FF}\x{1FA00}-\x{1FAFF}\x{2700}-\x{27BF}]",
            ),
            code_block: compile(r"(?s)```.*?```"),
            inline_code: compile(r"`[^`]+`"),
            bold: compile(r"\*\*([^*]+)\*\*"),
            italic: compile(r"\*([^*]+)\*"),
            heading: compile(r"#+\s*"),
            list_dash: compile(r"(?m)^\s*-\s+"),
            whitespace: compile(r"\s+"),
            acronym: compile(r"\b(POO|UML|MVC|ORM|BD|API|SQL)\b"),
        }
    })
}

/// Clean answer text for the speech synthesizer: drop emoji, code and
/// markdown markup, flatten lines and expand acronyms.
pub fn speech_text(text: &str) -> String {
    let p = patterns();
    let text = p.emoji.replace_all(text, "");
    let text = p.code_block.replace_all(&text, "");
    let text = p.inline_code.replace_all(&text, "");
    let text = p.bold.replace_all(&text, "$1");
    let text = p.italic.replace_all(&text, "$1");
    let text = p.heading.replace_all(&text, "");
    let text = p.list_dash.replace_all(&text, "");
    let text = p.whitespace.replace_all(&text, " ");
    let text = p.acronym.replace_all(&text, |caps: &regex::Captures| {
        let word = &caps[1];
        ACRONYM_EXPANSIONS
            .iter()
            .find(|(acronym, _)| *acronym == word)
            .map(|(_, spoken)| spoken.to_string())
            .unwrap_or_else(|| word.to_string())
    });
    text.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::testing::ScriptedAnswerService;

    fn ready() -> VoiceMachine {
        let mut machine = VoiceMachine::new(true);
        machine.handle(VoiceEvent::UserInteracted).unwrap();
        machine
    }

    #[test]
    fn test_speak_pause_resume_finish() {
        let mut machine = ready();

        let t = machine.handle(VoiceEvent::Speak("Hello there".into())).unwrap();
        assert_eq!(t.state, VoiceState::Speaking);
        assert_eq!(t.effects, vec![VoiceEffect::Utter("Hello there".into())]);

        assert_eq!(machine.handle(VoiceEvent::Pause).unwrap().state, VoiceState::Paused);
        assert_eq!(machine.handle(VoiceEvent::Resume).unwrap().state, VoiceState::Speaking);
        assert_eq!(machine.handle(VoiceEvent::Finished).unwrap().state, VoiceState::Idle);
    }

    #[test]
    fn test_speak_ignored_when_disabled() {
        let mut machine = VoiceMachine::new(false);
        machine.handle(VoiceEvent::UserInteracted).unwrap();

        let t = machine.handle(VoiceEvent::Speak("Hello".into())).unwrap();
        assert_eq!(t.state, VoiceState::Idle);
        assert!(t.effects.is_empty());
    }

    #[test]
    fn test_speech_deferred_until_interaction() {
        let mut machine = VoiceMachine::new(true);

        let t = machine.handle(VoiceEvent::Speak("Welcome!".into())).unwrap();
        assert_eq!(t.state, VoiceState::Idle);
        assert_eq!(machine.pending_utterance(), Some("Welcome!"));

        let t = machine.handle(VoiceEvent::UserInteracted).unwrap();
        assert_eq!(t.state, VoiceState::Speaking);
        assert_eq!(t.effects, vec![VoiceEffect::Utter("Welcome!".into())]);
        assert!(machine.pending_utterance().is_none());
    }

    #[test]
    fn test_final_transcript_submits() {
        let mut machine = ready();
        let t = machine.handle(VoiceEvent::StartListening).unwrap();
        assert_eq!(t.effects, vec![VoiceEffect::StartRecognition]);

        let t = machine
            .handle(VoiceEvent::Transcript { text: "what is".into(), is_final: false })
            .unwrap();
        assert_eq!(t.state, VoiceState::Listening);

        let t = machine
            .handle(VoiceEvent::Transcript { text: " what is UML ".into(), is_final: true })
            .unwrap();
        assert_eq!(t.state, VoiceState::Idle);
        assert_eq!(
            t.effects,
            vec![VoiceEffect::StopRecognition, VoiceEffect::Submit("what is UML".into())]
        );
    }

    #[test]
    fn test_listening_interrupts_speech() {
        let mut machine = ready();
        machine.handle(VoiceEvent::Speak("long answer".into())).unwrap();

        let t = machine.handle(VoiceEvent::StartListening).unwrap();
        assert_eq!(t.state, VoiceState::Listening);
        assert_eq!(t.effects, vec![VoiceEffect::CancelSpeech, VoiceEffect::StartRecognition]);
    }

    #[test]
    fn test_invalid_transitions() {
        let mut machine = ready();
        assert_eq!(
            machine.handle(VoiceEvent::Pause),
            Err(VoiceError::InvalidTransition { state: VoiceState::Idle, event: "Pause" })
        );
        assert!(machine.handle(VoiceEvent::StopListening).is_err());

        machine.handle(VoiceEvent::StartListening).unwrap();
        assert!(machine.handle(VoiceEvent::StartListening).is_err());
        assert_eq!(machine.state(), VoiceState::Listening);
    }

    #[test]
    fn test_recognition_error_returns_to_idle() {
        let mut machine = ready();
        machine.handle(VoiceEvent::StartListening).unwrap();

        let t = machine.handle(VoiceEvent::RecognitionError("not-allowed".into())).unwrap();
        assert_eq!(t.state, VoiceState::Idle);
        assert_eq!(
            t.effects[1],
            VoiceEffect::Notify(Notice::error("Microphone permission denied"))
        );
    }

    #[test]
    fn test_idle_timeout() {
        let mut machine = ready();
        machine.handle(VoiceEvent::StartListening).unwrap();
        let started = Instant::now();

        assert!(machine.check_idle(started).is_none());
        let t = machine
            .check_idle(started + RECOGNITION_IDLE_TIMEOUT + Duration::from_secs(1))
            .unwrap();
        assert_eq!(t.state, VoiceState::Idle);
        assert!(machine.check_idle(started + Duration::from_secs(60)).is_none());
    }

    #[test]
    fn test_disabling_voice_cancels_speech() {
        let mut machine = ready();
        machine.handle(VoiceEvent::Speak("answer".into())).unwrap();

        let t = machine.set_voice_enabled(false);
        assert_eq!(t.state, VoiceState::Idle);
        assert_eq!(t.effects, vec![VoiceEffect::CancelSpeech]);
    }

    #[test]
    fn test_speech_text_cleanup() {
        let text = "## Classes 😀\n**Encapsulation** hides *state*.\n- use `private`\n```java\nclass A {}\n```\nSee the POO and SQL notes.";
        assert_eq!(
            speech_text(text),
            "Classes Encapsulation hides state. use See the Programación Orientada a Objetos and Esquiu Ele notes."
        );
    }

    #[test]
    fn test_speech_text_keeps_plain_text() {
        assert_eq!(speech_text("  Hello,\n\nworld  "), "Hello, world");
        assert_eq!(speech_text("DATABASE is not BD-like"), "DATABASE is not Base de Datos-like");
    }

    #[test]
    fn test_events_from_json() {
        let finished: VoiceEvent = serde_json::from_str(r#""finished""#).unwrap();
        assert_eq!(finished, VoiceEvent::Finished);

        let transcript: VoiceEvent =
            serde_json::from_str(r#"{"transcript": {"text": "hola", "isFinal": true}}"#).unwrap();
        assert_eq!(
            transcript,
            VoiceEvent::Transcript {
                text: "hola".into(),
                is_final: true
            }
        );

        let effect = serde_json::to_value(VoiceEffect::Utter("hi".into())).unwrap();
        assert_eq!(effect, serde_json::json!({"utter": "hi"}));
    }

    #[tokio::test]
    async fn test_synthesize_uses_remote_audio() {
        let service = ScriptedAnswerService {
            audio: Some(vec![0xFF, 0xFB]),
            ..ScriptedAnswerService::default()
        };
        assert_eq!(
            synthesize(&service, "**Hola**").await,
            Some(Speech::Audio(vec![0xFF, 0xFB]))
        );
        assert_eq!(service.tts_requests.lock().unwrap()[0].text, "Hola");
    }

    #[tokio::test]
    async fn test_synthesize_falls_back_to_local_voice() {
        let service = ScriptedAnswerService::default();
        match synthesize(&service, "La POO usa clases").await {
            Some(Speech::Fallback { effect, notice }) => {
                assert_eq!(
                    effect,
                    VoiceEffect::Utter("La Programación Orientada a Objetos usa clases".into())
                );
                assert_eq!(notice.level, NoticeLevel::Warning);
            }
            other => panic!("expected local fallback, got {:?}", other),
        }

        assert!(synthesize(&service, "```\ncode only\n```").await.is_none());
    }

    #[tokio::test]
    async fn test_synthesize_caps_text_length() {
        let service = ScriptedAnswerService {
            audio: Some(vec![1]),
            ..ScriptedAnswerService::default()
        };
        synthesize(&service, &"a".repeat(TTS_MAX_CHARS + 50)).await;
        assert_eq!(service.tts_requests.lock().unwrap()[0].text.len(), TTS_MAX_CHARS);
    }
}
