pub mod curate;
pub mod repo;
pub mod synclist;
pub mod worker;

use std::path::PathBuf;

use anyhow::{Context, Result};
use galaxy_core::Settings;

pub(crate) fn home() -> Result<PathBuf> {
    dirs::home_dir().context("could not determine home directory")
}

/// Settings for `home`, plus a stderr subscriber so log lines never mix with
/// command output.
pub(crate) fn settings(home: &std::path::Path) -> Result<Settings> {
    let settings = Settings::load_at(home).context("failed to load settings")?;
    init_cli_tracing();
    Ok(settings)
}

fn init_cli_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

pub(crate) fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("failed to render JSON")?
    );
    Ok(())
}
