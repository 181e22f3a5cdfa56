//! Shared CLI bootstrap: structured logging setup and config loading, used by
//! all three executables (SPEC_FULL.md §4.6, §4.7), matching the teacher
//! daemon's `tracing_subscriber::fmt().json()` setup in shape.

use std::path::Path;

use anyhow::Context;
use sgf_core::config::RunConfig;
use tracing::info;

pub fn init_tracing(level: tracing::Level) {
    tracing_subscriber::fmt().json().with_max_level(level).init();
}

/// Loads and resolves the config file, installs logging at the resolved verbose
/// level, and persists the `saveconf` snapshot if requested.
pub fn bootstrap(config_path: &Path) -> anyhow::Result<RunConfig> {
    let cfg = sgf_core::config::load(config_path)
        .with_context(|| format!("loading config file {}", config_path.display()))?;
    init_tracing(cfg.verbose.tracing_level());
    info!(workdir = %cfg.workdir.display(), dataprefix = %cfg.dataprefix.display(), attrs = cfg.attrs, "config loaded");
    if cfg.saveconf {
        let path = sgf_core::config::save_resolved(&cfg).context("saving resolved config snapshot")?;
        info!(path = %path.display(), "saved resolved config snapshot");
    }
    Ok(cfg)
}

/// Runs `body`, logging and exiting with status 1 on any error, matching the
/// teacher daemon's `main()` error-handling shape.
pub fn run_and_exit_on_error<F: FnOnce() -> anyhow::Result<()>>(body: F) {
    if let Err(e) = body() {
        tracing::error!(error = %e, "fatal error");
        std::process::exit(1);
    }
}
