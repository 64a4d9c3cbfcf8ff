//! Chatbox - conversation persistence for a tutoring chat widget
//!
//! Keeps the widget's conversation history and active conversation in a
//! durable store, talks to the remote answer service, and exports transcripts.

pub mod config;
pub mod conversation;
pub mod core;
pub mod export;
pub mod preferences;
pub mod providers;
pub mod quiz;
pub mod routes;
pub mod store;
pub mod topics;
