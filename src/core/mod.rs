//! Conversation state and the widget session built on top of it

mod manager;
mod session;
pub mod speech;

pub use manager::{ConversationEvent, ConversationManager, HistoryError};
pub use session::{AskOutcome, PendingQuestion, PendingQuizAnswer, Session, SessionError, SessionOptions};
