//! Transcript export
//!
//! Flattens the active conversation into `Question:` / `Answer:` pairs and
//! writes it as plain text or PDF.

mod pdf;
mod text;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;
use tracing::info;

use crate::conversation::ActiveConversation;

pub use pdf::{render_pdf, PdfLayout};
pub use text::render_text;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("The conversation has no messages to export")]
    EmptyConversation,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unknown export format: {0}")]
    UnknownFormat(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Text,
    Pdf,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Text => "txt",
            ExportFormat::Pdf => "pdf",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            ExportFormat::Text => "text/plain; charset=utf-8",
            ExportFormat::Pdf => "application/pdf",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for ExportFormat {
    type Err = ExportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "txt" | "text" => Ok(ExportFormat::Text),
            "pdf" => Ok(ExportFormat::Pdf),
            other => Err(ExportError::UnknownFormat(other.to_string())),
        }
    }
}

/// A rendered export, ready to be written or sent
#[derive(Debug, Clone)]
pub struct Artifact {
    pub file_name: String,
    pub format: ExportFormat,
    pub bytes: Vec<u8>,
}

/// `chat_<local timestamp>.<ext>`
pub fn file_name(format: ExportFormat, at: DateTime<Local>) -> String {
    format!("chat_{}.{}", at.format("%Y-%m-%d_%H-%M-%S"), format.extension())
}

/// Render the conversation. Fails without producing anything when it has no
/// exchanges.
pub fn export(
    conversation: &ActiveConversation,
    format: ExportFormat,
    layout: &PdfLayout,
) -> Result<Artifact, ExportError> {
    if conversation.messages.is_empty() {
        return Err(ExportError::EmptyConversation);
    }

    let bytes = match format {
        ExportFormat::Text => render_text(&conversation.messages).into_bytes(),
        ExportFormat::Pdf => render_pdf(&conversation.messages, layout),
    };

    Ok(Artifact {
        file_name: file_name(format, Local::now()),
        format,
        bytes,
    })
}

/// Render and write the artifact into `dir`, returning its path
pub async fn export_to_dir(
    conversation: &ActiveConversation,
    format: ExportFormat,
    layout: &PdfLayout,
    dir: &Path,
) -> Result<PathBuf, ExportError> {
    let artifact = export(conversation, format, layout)?;
    tokio::fs::create_dir_all(dir).await?;
    let path = dir.join(&artifact.file_name);
    tokio::fs::write(&path, &artifact.bytes).await?;
    info!(path = %path.display(), bytes = artifact.bytes.len(), "Exported conversation");
    Ok(path)
}
