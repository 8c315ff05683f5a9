//! Port definitions (trait seams) implemented by adapter crates.

pub mod embedding;

pub use embedding::{EmbeddingError, EmbeddingPort};
