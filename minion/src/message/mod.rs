//! Chat message model: roles, text and image parts, canonical conversion.
//!
//! A [`Message`] is immutable once emitted and compared structurally. Content
//! is either scalar text or an ordered list of [`ContentPart`]s; ordering is
//! preserved through every transformation so multimodal prompts reach the
//! provider exactly as the caller assembled them.
//!
//! [`canonicalize`] turns a caller-facing [`Query`] (plain string, part list,
//! or already-canonical messages) into a message list with an optional system
//! prompt. Conversion is idempotent: canonicalizing canonical messages returns
//! an equal list.

mod convert;

pub use convert::{canonicalize, ImageFormat, Query, QueryPart};

use serde::{Deserialize, Serialize};

/// Message role.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// One ordered part of multimodal content.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    /// Remote image by URL.
    ImageUrl { url: String },
    /// Inlined image as a base64 data URL with explicit media type.
    ImageData { data: String, media_type: String },
}

impl ContentPart {
    pub fn text(s: impl Into<String>) -> Self {
        ContentPart::Text { text: s.into() }
    }

    /// Data URL form (`data:<media_type>;base64,<data>`), for providers that
    /// take images as URLs only.
    pub fn as_data_url(&self) -> Option<String> {
        match self {
            ContentPart::ImageData { data, media_type } => {
                Some(format!("data:{};base64,{}", media_type, data))
            }
            ContentPart::ImageUrl { url } => Some(url.clone()),
            ContentPart::Text { .. } => None,
        }
    }
}

/// Message content: scalar text or ordered parts.
///
/// Parts are only used when at least one non-text part is present; template
/// rendering must never concatenate parts into a single string.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Content {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl Content {
    /// Text view: scalar text as-is; for parts, the concatenation of text
    /// fragments only (images are skipped). For logging and token estimates.
    pub fn as_text(&self) -> String {
        match self {
            Content::Text(s) => s.clone(),
            Content::Parts(parts) => {
                let mut out = String::new();
                for p in parts {
                    if let ContentPart::Text { text } = p {
                        out.push_str(text);
                    }
                }
                out
            }
        }
    }

    /// Approximate size in bytes of the rendered content.
    pub fn byte_len(&self) -> usize {
        match self {
            Content::Text(s) => s.len(),
            Content::Parts(parts) => parts
                .iter()
                .map(|p| match p {
                    ContentPart::Text { text } => text.len(),
                    ContentPart::ImageUrl { url } => url.len(),
                    ContentPart::ImageData { data, .. } => data.len(),
                })
                .sum(),
        }
    }
}

impl From<String> for Content {
    fn from(s: String) -> Self {
        Content::Text(s)
    }
}

impl From<&str> for Content {
    fn from(s: &str) -> Self {
        Content::Text(s.to_string())
    }
}

/// One chat message. Structural equality; immutable once emitted.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: Content,
    /// Set on `Tool` messages: id of the tool call this message answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// Optional participant or tool name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Message {
    pub fn system(content: impl Into<Content>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
            tool_call_id: None,
            name: None,
        }
    }

    pub fn user(content: impl Into<Content>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            tool_call_id: None,
            name: None,
        }
    }

    pub fn assistant(content: impl Into<Content>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tool_call_id: None,
            name: None,
        }
    }

    /// Tool result message answering `tool_call_id`.
    pub fn tool(tool_call_id: impl Into<String>, content: impl Into<Content>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            tool_call_id: Some(tool_call_id.into()),
            name: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn is_system(&self) -> bool {
        self.role == Role::System
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_compare_structurally() {
        let a = Message::user("hi");
        let b = Message::user("hi");
        assert_eq!(a, b);
        assert_ne!(a, Message::assistant("hi"));
    }

    #[test]
    fn tool_message_carries_call_id() {
        let m = Message::tool("call-1", "result");
        assert_eq!(m.role, Role::Tool);
        assert_eq!(m.tool_call_id.as_deref(), Some("call-1"));
    }

    #[test]
    fn as_text_skips_image_parts() {
        let c = Content::Parts(vec![
            ContentPart::text("a"),
            ContentPart::ImageUrl {
                url: "http://x/img.png".into(),
            },
            ContentPart::text("b"),
        ]);
        assert_eq!(c.as_text(), "ab");
    }

    #[test]
    fn image_data_renders_as_data_url() {
        let p = ContentPart::ImageData {
            data: "QUJD".into(),
            media_type: "image/png".into(),
        };
        assert_eq!(p.as_data_url().unwrap(), "data:image/png;base64,QUJD");
    }

    #[test]
    fn content_serde_roundtrip_keeps_part_order() {
        let c = Content::Parts(vec![
            ContentPart::text("before"),
            ContentPart::ImageUrl { url: "u".into() },
            ContentPart::text("after"),
        ]);
        let json = serde_json::to_string(&c).unwrap();
        let back: Content = serde_json::from_str(&json).unwrap();
        assert_eq!(c, back);
    }
}
