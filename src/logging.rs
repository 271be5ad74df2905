//! Logging setup.
//!
//! Console output goes to stderr in human-readable form. If a log file is
//! configured, a second layer writes JSON lines for post-run analysis.
//! Safe to call multiple times; only the first call installs handlers.

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Arc;

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::error::Result;

pub fn init(level: &str, log_file: Option<&Path>) -> Result<()> {
    let filter = EnvFilter::new(format!("agentpool={}", level.to_lowercase()));
    let console = fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);

    if let Some(path) = log_file {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let json = fmt::layer().json().with_writer(Arc::new(file));
        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(console)
            .with(json)
            .try_init();
    } else {
        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(console)
            .try_init();
    }

    Ok(())
}
