//! Auto-decay of large historical messages.
//!
//! After each step, messages whose content is large enough and old enough are
//! swapped out to cache files; the slot keeps a short reference so the model
//! can re-read the content on demand via the file tool. Decay runs only at
//! step boundaries and never touches system messages or the interpreter
//! namespace.

use std::path::Path;

use tracing::debug;
use uuid::Uuid;

use crate::message::{Content, Message};
use crate::state::{AgentState, DecayMarker};

/// Knobs for the decay pass.
#[derive(Clone, Debug)]
pub struct DecayConfig {
    pub enabled: bool,
    /// Minimum content size in bytes for a message to decay.
    pub min_size: usize,
    /// Minimum age in steps before a message may decay.
    pub ttl_steps: usize,
}

impl Default for DecayConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_size: 100_000,
            ttl_steps: 3,
        }
    }
}

/// Short reference text left in a decayed message's slot.
fn reference_text(size: usize, path: &Path) -> String {
    format!(
        "[Large output ({}KB) saved to: {}] Use file_read to access full content if needed.",
        size / 1024,
        path.display()
    )
}

/// Runs one decay pass over the state's history. Returns the markers for
/// messages decayed in this pass; files live until the agent closes.
pub fn decay_pass(
    state: &mut AgentState,
    cache_dir: &Path,
    config: &DecayConfig,
) -> std::io::Result<Vec<DecayMarker>> {
    if !config.enabled {
        return Ok(Vec::new());
    }
    std::fs::create_dir_all(cache_dir)?;

    let mut markers = Vec::new();
    let already: Vec<usize> = state.decayed.iter().map(|m| m.message_index).collect();

    for idx in 0..state.messages.len() {
        let message = &state.messages[idx];
        if message.is_system() || already.contains(&idx) {
            continue;
        }
        let size = message.content.byte_len();
        if size < config.min_size {
            continue;
        }
        let born = state.message_steps.get(idx).copied().unwrap_or(0);
        if state.step_count.saturating_sub(born) < config.ttl_steps {
            continue;
        }

        let file_name = format!("decay-step{}-{}.txt", born, Uuid::new_v4());
        let path = cache_dir.join(file_name);
        std::fs::write(&path, message.content.as_text())?;
        debug!(index = idx, size, path = %path.display(), "message decayed to file");

        let marker = DecayMarker {
            decayed: true,
            file_path: path.display().to_string(),
            original_size: size as u64,
            message_index: idx,
        };
        state.messages[idx] = Message {
            role: message.role,
            content: Content::Text(reference_text(size, &path)),
            tool_call_id: message.tool_call_id.clone(),
            name: message.name.clone(),
        };
        state.decayed.push(marker.clone());
        markers.push(marker);
    }
    Ok(markers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::Input;

    fn state_with_large_message(size: usize, born_step: usize, now_step: usize) -> AgentState {
        let mut state = AgentState::new(Input::new("q"));
        state.push_messages(vec![Message::system("sys")]);
        state.step_count = born_step;
        state.push_messages(vec![Message::tool("c1", "x".repeat(size))]);
        state.step_count = now_step;
        state
    }

    #[test]
    fn old_large_message_decays_with_exact_reference_text() {
        let dir = tempfile::tempdir().unwrap();
        let mut state = state_with_large_message(150_000, 5, 8);
        let config = DecayConfig {
            enabled: true,
            min_size: 100_000,
            ttl_steps: 3,
        };
        let markers = decay_pass(&mut state, dir.path(), &config).unwrap();
        assert_eq!(markers.len(), 1);
        let marker = &markers[0];
        assert!(marker.decayed);
        assert_eq!(marker.original_size, 150_000);

        // the file holds the original content in full
        let meta = std::fs::metadata(&marker.file_path).unwrap();
        assert_eq!(meta.len(), 150_000);
        let name = Path::new(&marker.file_path)
            .file_name()
            .unwrap()
            .to_string_lossy()
            .to_string();
        assert!(name.starts_with("decay-step5-"), "name: {name}");

        // the slot holds the short reference
        let content = state.messages[1].content.as_text();
        assert_eq!(
            content,
            format!(
                "[Large output (146KB) saved to: {}] Use file_read to access full content if needed.",
                marker.file_path
            )
        );
    }

    #[test]
    fn young_messages_are_not_decayed() {
        let dir = tempfile::tempdir().unwrap();
        let mut state = state_with_large_message(150_000, 5, 6);
        let config = DecayConfig::default();
        let markers = decay_pass(&mut state, dir.path(), &config).unwrap();
        assert!(markers.is_empty());
        assert_eq!(state.messages[1].content.byte_len(), 150_000);
    }

    #[test]
    fn small_messages_are_not_decayed() {
        let dir = tempfile::tempdir().unwrap();
        let mut state = state_with_large_message(1_000, 0, 10);
        let markers = decay_pass(&mut state, dir.path(), &DecayConfig::default()).unwrap();
        assert!(markers.is_empty());
    }

    #[test]
    fn system_messages_never_decay() {
        let dir = tempfile::tempdir().unwrap();
        let mut state = AgentState::new(Input::new("q"));
        state.push_messages(vec![Message::system("s".repeat(200_000))]);
        state.step_count = 10;
        let markers = decay_pass(&mut state, dir.path(), &DecayConfig::default()).unwrap();
        assert!(markers.is_empty());
    }

    #[test]
    fn decayed_message_is_not_decayed_twice() {
        let dir = tempfile::tempdir().unwrap();
        let mut state = state_with_large_message(150_000, 0, 5);
        let config = DecayConfig::default();
        assert_eq!(decay_pass(&mut state, dir.path(), &config).unwrap().len(), 1);
        assert!(decay_pass(&mut state, dir.path(), &config)
            .unwrap()
            .is_empty());
    }
}
