//! Widget configuration loaded from TOML files
//!
//! Each deployment can describe:
//! - Which user the widget asks on behalf of
//! - The topics offered to the student
//! - PDF export page layout

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::core::SessionOptions;
use crate::export::PdfLayout;

/// Root widget configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WidgetConfig {
    #[serde(default)]
    pub widget: WidgetSection,

    #[serde(default)]
    pub export: ExportConfig,

    #[serde(default)]
    pub topics: TopicsConfig,
}

impl WidgetConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Load configuration from a TOML string
    pub fn from_str(content: &str) -> Result<Self, ConfigError> {
        let config: WidgetConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.widget.user_id.trim().is_empty() {
            return Err(ConfigError::Validation("widget.user_id must not be empty".into()));
        }
        if let Some(topic) = &self.widget.default_topic {
            if !self.topics.available.iter().any(|t| t == topic) {
                return Err(ConfigError::Validation(format!(
                    "default topic '{}' is not in topics.available",
                    topic
                )));
            }
        }
        let pdf = &self.export.pdf;
        if pdf.page_height <= 2.0 * pdf.margin + 2.0 * pdf.line_height {
            return Err(ConfigError::Validation(
                "export.pdf page is too small to hold one exchange".into(),
            ));
        }
        Ok(())
    }

    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            user_id: self.widget.user_id.clone(),
            topic: self.widget.default_topic.clone(),
            topics: self.topics.available.clone(),
            pdf_layout: self.export.pdf.clone(),
            ..SessionOptions::default()
        }
    }
}

/// `[widget]`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WidgetSection {
    #[serde(default = "default_user_id")]
    pub user_id: String,

    /// Topic preselected when the widget opens
    #[serde(default)]
    pub default_topic: Option<String>,
}

fn default_user_id() -> String {
    "anonymous".to_string()
}

impl Default for WidgetSection {
    fn default() -> Self {
        Self {
            user_id: default_user_id(),
            default_topic: None,
        }
    }
}

/// `[export]`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExportConfig {
    #[serde(default)]
    pub pdf: PdfLayout,
}

/// `[topics]`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicsConfig {
    #[serde(default = "default_topics")]
    pub available: Vec<String>,
}

fn default_topics() -> Vec<String> {
    [
        "Introducción a la POO",
        "Clases y Objetos",
        "Encapsulamiento",
        "Herencia",
        "Polimorfismo",
        "Clases Abstractas e Interfaces",
        "UML",
        "Diagramas UML",
        "Patrones de Diseño en POO",
        "Patrón MVC",
        "Acceso a Archivos",
        "Bases de Datos y ORM",
        "Integración POO + MVC + BD",
        "Pruebas y Buenas Prácticas",
    ]
    .iter()
    .map(|t| t.to_string())
    .collect()
}

impl Default for TopicsConfig {
    fn default() -> Self {
        Self {
            available: default_topics(),
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_CONFIG: &str = r#"
[widget]
user_id = "student-42"
default_topic = "Herencia"

[export.pdf]
margin = 50.0
max_answer_chars = 80

[topics]
available = ["Herencia", "Polimorfismo"]
"#;

    #[test]
    fn test_parse_config() {
        let config = WidgetConfig::from_str(SAMPLE_CONFIG).unwrap();

        assert_eq!(config.widget.user_id, "student-42");
        assert_eq!(config.widget.default_topic.as_deref(), Some("Herencia"));
        assert_eq!(config.topics.available, vec!["Herencia", "Polimorfismo"]);
        assert_eq!(config.export.pdf.margin, 50.0);
        assert_eq!(config.export.pdf.max_answer_chars, 80);
        // Unset layout fields keep the A4 defaults
        assert_eq!(config.export.pdf.page_height, 842.0);

        let options = config.session_options();
        assert_eq!(options.user_id, "student-42");
        assert_eq!(options.topic.as_deref(), Some("Herencia"));
        assert!(options.topics.iter().any(|t| t == "Herencia"));
    }

    #[test]
    fn test_minimal_config() {
        let config = WidgetConfig::from_str("").unwrap();
        assert_eq!(config.widget.user_id, "anonymous");
        assert!(config.widget.default_topic.is_none());
        assert_eq!(config.topics.available.len(), 14);
        assert_eq!(config.export.pdf, PdfLayout::default());
    }

    #[test]
    fn test_unknown_default_topic() {
        let result = WidgetConfig::from_str(
            r#"
[widget]
default_topic = "Quantum"
"#,
        );
        assert!(matches!(result, Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_tiny_page_rejected() {
        let result = WidgetConfig::from_str(
            r#"
[export.pdf]
page_height = 60.0
margin = 20.0
"#,
        );
        assert!(matches!(result, Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("widget.toml");
        std::fs::write(&path, SAMPLE_CONFIG).unwrap();
        assert_eq!(WidgetConfig::from_file(&path).unwrap().widget.user_id, "student-42");

        assert!(matches!(
            WidgetConfig::from_file(&dir.path().join("missing.toml")),
            Err(ConfigError::Io(_))
        ));
    }
}
