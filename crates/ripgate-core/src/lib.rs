//! Core domain types, configuration and ports for the ripgate gateway.
//!
//! This crate has no HTTP server or client code; adapters live in
//! `ripgate-proxy` and `ripgate-runtime`.

#![deny(unsafe_code)]

pub mod config;
pub mod domain;
pub mod ports;

pub use config::{
    ChatPolicy, ConfigError, EmbeddingSettings, GatewayConfig, ListenConfig, UpstreamConfig,
};
pub use domain::{Chunk, EmbeddingVector, Span};
pub use ports::{EmbeddingError, EmbeddingPort};
