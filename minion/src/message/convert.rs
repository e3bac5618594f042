//! Canonical conversion of caller queries into message lists.

use base64::Engine as _;

use super::{Content, ContentPart, Message};

/// A caller-facing query: plain text, ordered multimodal parts, or an
/// already-canonical message list.
#[derive(Clone, Debug, PartialEq)]
pub enum Query {
    Text(String),
    Parts(Vec<QueryPart>),
    Messages(Vec<Message>),
}

impl Query {
    /// Text view of the query (image parts skipped), for prompts and logs.
    pub fn as_text(&self) -> String {
        match self {
            Query::Text(s) => s.clone(),
            Query::Parts(parts) => {
                let mut out = String::new();
                for p in parts {
                    if let QueryPart::Text(t) = p {
                        if !out.is_empty() {
                            out.push(' ');
                        }
                        out.push_str(t);
                    }
                }
                out
            }
            Query::Messages(msgs) => msgs
                .iter()
                .rev()
                .find(|m| m.role == super::Role::User)
                .map(|m| m.content.as_text())
                .unwrap_or_default(),
        }
    }

    pub fn is_multimodal(&self) -> bool {
        match self {
            Query::Text(_) => false,
            Query::Parts(parts) => parts.iter().any(|p| !matches!(p, QueryPart::Text(_))),
            Query::Messages(msgs) => msgs
                .iter()
                .any(|m| matches!(m.content, Content::Parts(_))),
        }
    }
}

impl From<&str> for Query {
    fn from(s: &str) -> Self {
        Query::Text(s.to_string())
    }
}

impl From<String> for Query {
    fn from(s: String) -> Self {
        Query::Text(s)
    }
}

/// One part of a multimodal query.
#[derive(Clone, Debug, PartialEq)]
pub enum QueryPart {
    Text(String),
    /// Remote image reference.
    ImageUrl(String),
    /// In-memory image bytes with a declared format.
    ImageBytes { bytes: Vec<u8>, format: ImageFormat },
}

/// Recognized in-memory image formats.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ImageFormat {
    Png,
    Jpeg,
    Gif,
    Webp,
}

impl ImageFormat {
    pub fn media_type(&self) -> &'static str {
        match self {
            ImageFormat::Png => "image/png",
            ImageFormat::Jpeg => "image/jpeg",
            ImageFormat::Gif => "image/gif",
            ImageFormat::Webp => "image/webp",
        }
    }

    /// Best-effort sniff from magic bytes; `None` for unrecognized data.
    pub fn sniff(bytes: &[u8]) -> Option<Self> {
        if bytes.starts_with(&[0x89, b'P', b'N', b'G']) {
            Some(ImageFormat::Png)
        } else if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
            Some(ImageFormat::Jpeg)
        } else if bytes.starts_with(b"GIF8") {
            Some(ImageFormat::Gif)
        } else if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
            Some(ImageFormat::Webp)
        } else {
            None
        }
    }
}

fn convert_part(part: &QueryPart) -> ContentPart {
    match part {
        QueryPart::Text(t) => ContentPart::text(t.clone()),
        QueryPart::ImageUrl(url) => ContentPart::ImageUrl { url: url.clone() },
        QueryPart::ImageBytes { bytes, format } => ContentPart::ImageData {
            data: base64::engine::general_purpose::STANDARD.encode(bytes),
            media_type: format.media_type().to_string(),
        },
    }
}

/// Converts a query into a canonical message list with an optional system prompt.
///
/// * `Text` becomes one user message.
/// * `Parts` become one user message with ordered parts; in-memory images are
///   serialized to base64 with their declared media type.
/// * `Messages` pass through unchanged (idempotent); the system prompt is
///   prepended only if the list does not already start with a system message.
pub fn canonicalize(query: &Query, system_prompt: Option<&str>) -> Vec<Message> {
    let mut out = Vec::new();
    match query {
        Query::Messages(msgs) => {
            let has_system = msgs.first().map(Message::is_system).unwrap_or(false);
            if let (Some(sp), false) = (system_prompt, has_system) {
                out.push(Message::system(sp));
            }
            out.extend(msgs.iter().cloned());
        }
        Query::Text(text) => {
            if let Some(sp) = system_prompt {
                out.push(Message::system(sp));
            }
            out.push(Message::user(text.clone()));
        }
        Query::Parts(parts) => {
            if let Some(sp) = system_prompt {
                out.push(Message::system(sp));
            }
            let converted: Vec<ContentPart> = parts.iter().map(convert_part).collect();
            let all_text = converted
                .iter()
                .all(|p| matches!(p, ContentPart::Text { .. }));
            let content = if all_text {
                // No non-text part present: collapse to scalar text.
                Content::Text(
                    converted
                        .iter()
                        .map(|p| match p {
                            ContentPart::Text { text } => text.as_str(),
                            _ => unreachable!(),
                        })
                        .collect::<Vec<_>>()
                        .join("\n"),
                )
            } else {
                Content::Parts(converted)
            };
            out.push(Message {
                role: super::Role::User,
                content,
                tool_call_id: None,
                name: None,
            });
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Role;

    #[test]
    fn text_query_becomes_system_plus_user() {
        let msgs = canonicalize(&Query::Text("hi".into()), Some("be brief"));
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0].role, Role::System);
        assert_eq!(msgs[1].role, Role::User);
        assert_eq!(msgs[1].content.as_text(), "hi");
    }

    #[test]
    fn canonicalize_is_idempotent() {
        let once = canonicalize(&Query::Text("q".into()), Some("sys"));
        let twice = canonicalize(&Query::Messages(once.clone()), Some("sys"));
        assert_eq!(once, twice);
    }

    #[test]
    fn parts_with_image_keep_order() {
        let png = vec![0x89, b'P', b'N', b'G', 0, 0];
        let q = Query::Parts(vec![
            QueryPart::Text("Is this answer correct?".into()),
            QueryPart::ImageBytes {
                bytes: png,
                format: ImageFormat::Png,
            },
            QueryPart::Text("Explain briefly.".into()),
        ]);
        let msgs = canonicalize(&q, None);
        assert_eq!(msgs.len(), 1);
        let Content::Parts(parts) = &msgs[0].content else {
            panic!("expected parts");
        };
        assert_eq!(parts.len(), 3);
        assert!(matches!(parts[0], ContentPart::Text { .. }));
        match &parts[1] {
            ContentPart::ImageData { media_type, .. } => assert_eq!(media_type, "image/png"),
            other => panic!("expected image data, got {other:?}"),
        }
        assert!(matches!(parts[2], ContentPart::Text { .. }));
    }

    #[test]
    fn all_text_parts_collapse_to_scalar() {
        let q = Query::Parts(vec![QueryPart::Text("a".into()), QueryPart::Text("b".into())]);
        let msgs = canonicalize(&q, None);
        assert_eq!(msgs[0].content, Content::Text("a\nb".into()));
    }

    #[test]
    fn existing_system_message_is_not_duplicated() {
        let canon = vec![Message::system("orig"), Message::user("q")];
        let msgs = canonicalize(&Query::Messages(canon.clone()), Some("other"));
        assert_eq!(msgs, canon);
    }

    #[test]
    fn sniff_recognizes_common_formats() {
        assert_eq!(
            ImageFormat::sniff(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A]),
            Some(ImageFormat::Png)
        );
        assert_eq!(
            ImageFormat::sniff(&[0xFF, 0xD8, 0xFF, 0xE0]),
            Some(ImageFormat::Jpeg)
        );
        assert_eq!(ImageFormat::sniff(b"plain text"), None);
    }
}
