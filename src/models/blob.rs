//! Blob 数据模型
//!
//! Raw conversational input awaiting distillation into profile facts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{AppError, Result};

/// Blob kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlobType {
    Chat,
    Doc,
    Code,
    Image,
}

impl BlobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlobType::Chat => "chat",
            BlobType::Doc => "doc",
            BlobType::Code => "code",
            BlobType::Image => "image",
        }
    }

    /// Only chat blobs are buffered and distilled into profiles.
    pub fn is_profiled(&self) -> bool {
        matches!(self, BlobType::Chat)
    }
}

impl fmt::Display for BlobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BlobType {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "chat" => Ok(BlobType::Chat),
            "doc" => Ok(BlobType::Doc),
            "code" => Ok(BlobType::Code),
            "image" => Ok(BlobType::Image),
            other => Err(AppError::Validation(format!("unknown blob type: {}", other))),
        }
    }
}

/// One message of a chat exchange
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// user / assistant
    pub role: String,

    pub content: String,

    /// Display name for the speaker
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,

    /// Caller supplied timestamp, kept verbatim
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
            alias: None,
            created_at: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
            alias: None,
            created_at: None,
        }
    }
}

/// Blob payload, tagged by type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BlobData {
    Chat { messages: Vec<ChatMessage> },
    Doc { content: String },
    Code {
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        language: Option<String>,
    },
    Image { url: String },
}

impl BlobData {
    pub fn blob_type(&self) -> BlobType {
        match self {
            BlobData::Chat { .. } => BlobType::Chat,
            BlobData::Doc { .. } => BlobType::Doc,
            BlobData::Code { .. } => BlobType::Code,
            BlobData::Image { .. } => BlobType::Image,
        }
    }

    /// Reject payloads that carry nothing to remember.
    pub fn validate(&self) -> Result<()> {
        let empty = match self {
            BlobData::Chat { messages } => {
                messages.is_empty() || messages.iter().all(|m| m.content.trim().is_empty())
            }
            BlobData::Doc { content } | BlobData::Code { content, .. } => content.trim().is_empty(),
            BlobData::Image { url } => url.trim().is_empty(),
        };
        if empty {
            return Err(AppError::Validation(format!(
                "{} blob has no content",
                self.blob_type()
            )));
        }
        Ok(())
    }

    /// Plain-text rendering used in prompts and for buffer token estimates.
    pub fn render(&self) -> String {
        match self {
            BlobData::Chat { messages } => messages
                .iter()
                .map(|m| {
                    let speaker = m.alias.as_deref().unwrap_or(&m.role);
                    match &m.created_at {
                        Some(ts) => format!("[{}] {}: {}", ts, speaker, m.content.trim()),
                        None => format!("{}: {}", speaker, m.content.trim()),
                    }
                })
                .collect::<Vec<_>>()
                .join("\n"),
            BlobData::Doc { content } => content.trim().to_string(),
            BlobData::Code { content, language } => format!(
                "```{}\n{}\n```",
                language.as_deref().unwrap_or_default(),
                content.trim_end()
            ),
            BlobData::Image { url } => format!("[image] {}", url),
        }
    }
}

/// A stored blob
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Blob {
    pub id: String,

    pub user_id: String,

    pub project_id: String,

    pub data: BlobData,

    /// Free-form caller metadata
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields: Option<serde_json::Value>,

    pub created_at: DateTime<Utc>,
}

impl Blob {
    pub fn new(user_id: &str, project_id: &str, data: BlobData) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            project_id: project_id.to_string(),
            data,
            fields: None,
            created_at: Utc::now(),
        }
    }

    pub fn chat(user_id: &str, project_id: &str, messages: Vec<ChatMessage>) -> Self {
        Self::new(user_id, project_id, BlobData::Chat { messages })
    }

    pub fn blob_type(&self) -> BlobType {
        self.data.blob_type()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_render_uses_alias_and_timestamp() {
        let mut first = ChatMessage::user("I run 5k every morning");
        first.alias = Some("Gus".to_string());
        first.created_at = Some("2025/01/02".to_string());
        let data = BlobData::Chat {
            messages: vec![first, ChatMessage::assistant("Nice routine!")],
        };

        assert_eq!(
            data.render(),
            "[2025/01/02] Gus: I run 5k every morning\nassistant: Nice routine!"
        );
    }

    #[test]
    fn test_validate_rejects_empty_chat() {
        let data = BlobData::Chat { messages: vec![ChatMessage::user("   ")] };
        assert!(matches!(data.validate(), Err(AppError::Validation(_))));
        assert!(BlobData::Doc { content: "notes".into() }.validate().is_ok());
    }

    #[test]
    fn test_blob_data_wire_format() {
        let json = serde_json::json!({
            "type": "chat",
            "messages": [{"role": "user", "content": "hello"}]
        });
        let data: BlobData = serde_json::from_value(json).unwrap();
        assert_eq!(data.blob_type(), BlobType::Chat);
        assert_eq!("chat".parse::<BlobType>().unwrap(), BlobType::Chat);
        assert!("video".parse::<BlobType>().is_err());
    }
}
