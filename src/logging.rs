use std::env;
use std::fs::OpenOptions;
use std::io;
use std::sync::Mutex;

use anyhow::{anyhow, Context, Result};
use tracing_subscriber::EnvFilter;

pub const FILTER_ENV: &str = "LIVESPOT_LOG";
pub const FILE_ENV: &str = "LIVESPOT_LOG_FILE";
const DEFAULT_FILTER: &str = "warn";

/// Where log lines go when no log file is configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Output {
    /// The terminal belongs to the UI; drop lines.
    Terminal,
    Stderr,
}

pub fn init(output: Output) -> Result<()> {
    let filter = EnvFilter::try_from_env(FILTER_ENV).unwrap_or_else(|_| DEFAULT_FILTER.into());
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    let installed = match env::var_os(FILE_ENV).filter(|path| !path.is_empty()) {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .with_context(|| format!("open log file {}", path.to_string_lossy()))?;
            builder.with_ansi(false).with_writer(Mutex::new(file)).try_init()
        }
        None => match output {
            Output::Terminal => builder.with_writer(io::sink).try_init(),
            Output::Stderr => builder.with_writer(io::stderr).try_init(),
        },
    };

    installed.map_err(|err| anyhow!("install log subscriber: {err}"))
}
