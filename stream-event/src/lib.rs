//! Stream chunk protocol: chunk kind + content + metadata, plus envelope injection.
//!
//! This crate defines the wire shape of a single stream chunk and how the
//! session envelope (session_id, turn_id, event_id) is injected into each
//! serialized chunk. It does not depend on minion; minion produces
//! [`StreamChunk`] values during a run and UIs accumulate `text`/`llm_output`
//! content while rendering the other kinds specially.

pub mod chunk;
pub mod envelope;

pub use chunk::{ChunkKind, StreamChunk};
pub use envelope::{to_json, Envelope, EnvelopeState};
