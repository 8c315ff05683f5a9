//! Domain types shared by the proxy and runtime layers.

pub mod chunk;
pub mod envelope;

pub use chunk::{Chunk, EmbeddingVector, Span};
