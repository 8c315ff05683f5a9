//! Composition root for the `ripgate` binary.

#![deny(unsafe_code)]

pub mod logging;
pub mod parser;
pub mod serve;

pub use parser::Cli;
pub use serve::serve;

use std::path::Path;

use anyhow::Context;

/// Load `.env` variables without overriding the real environment.
///
/// An explicit file must exist. The implicit `./.env` is optional and
/// skipped entirely when `ENV=production`.
pub fn load_env(env_file: Option<&Path>) -> anyhow::Result<()> {
    if let Some(path) = env_file {
        dotenvy::from_path(path)
            .with_context(|| format!("Failed to load env file {}", path.display()))?;
    } else if std::env::var("ENV").as_deref() != Ok("production") {
        dotenvy::dotenv().ok();
    }
    Ok(())
}
