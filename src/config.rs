use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

const DEFAULT_ENV_PREFIX: &str = "LIVESPOT";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Config {
    #[serde(default)]
    pub feed: FeedConfig,
    #[serde(default)]
    pub ui: UIConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeedConfig {
    #[serde(default = "default_url")]
    pub url: String,
    #[serde(default = "default_poll_interval", with = "humantime_serde")]
    pub poll_interval: Duration,
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default)]
    pub pause_on_start: bool,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            poll_interval: default_poll_interval(),
            timezone: None,
            pause_on_start: false,
            user_agent: default_user_agent(),
            timeout: default_timeout(),
        }
    }
}

fn default_url() -> String {
    "feed.json".into()
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(15)
}

fn default_user_agent() -> String {
    format!("livespot/{} (+https://github.com/danielmerja/livespot)", crate::VERSION)
}

fn default_timeout() -> Duration {
    Duration::from_secs(20)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UIConfig {
    #[serde(default = "default_relative_refresh", with = "humantime_serde")]
    pub relative_refresh: Duration,
    #[serde(default)]
    pub compact: bool,
    #[serde(default = "default_autoscroll")]
    pub autoscroll: bool,
}

impl Default for UIConfig {
    fn default() -> Self {
        Self {
            relative_refresh: default_relative_refresh(),
            compact: false,
            autoscroll: default_autoscroll(),
        }
    }
}

fn default_relative_refresh() -> Duration {
    Duration::from_secs(15)
}

fn default_autoscroll() -> bool {
    true
}

#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    pub config_file: Option<PathBuf>,
    pub env_prefix: Option<String>,
}

pub fn load(options: LoadOptions) -> Result<Config> {
    let mut cfg = Config::default();

    if let Some(path) = options.config_file.as_ref() {
        if path.exists() {
            let from_file = read_config_file(path)?;
            cfg = merge_config(cfg, from_file);
        } else {
            tracing::warn!(path = %path.display(), "config file not found; using defaults");
        }
    } else if let Some(default_path) = default_config_path() {
        if default_path.exists() {
            let from_file = read_config_file(&default_path)?;
            cfg = merge_config(cfg, from_file);
        }
    }

    let prefix = options.env_prefix.as_deref().unwrap_or(DEFAULT_ENV_PREFIX);
    for (key, value) in load_env(prefix) {
        apply_env_value(&mut cfg, &key, value);
    }

    Ok(cfg)
}

fn read_config_file(path: &Path) -> Result<Config> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file at {}", path.display()))?;
    if data.trim().is_empty() {
        return Ok(Config::default());
    }
    let config: Config = serde_yaml::from_str(&data)
        .with_context(|| format!("Failed to parse config file at {}", path.display()))?;
    Ok(config)
}

fn merge_config(mut base: Config, other: Config) -> Config {
    if !other.feed.url.trim().is_empty() {
        base.feed.url = other.feed.url;
    }
    if !other.feed.poll_interval.is_zero() {
        base.feed.poll_interval = other.feed.poll_interval;
    }
    if other.feed.timezone.as_deref().is_some_and(|tz| !tz.trim().is_empty()) {
        base.feed.timezone = other.feed.timezone;
    }
    base.feed.pause_on_start = other.feed.pause_on_start;
    if !other.feed.user_agent.trim().is_empty() {
        base.feed.user_agent = other.feed.user_agent;
    }
    if !other.feed.timeout.is_zero() {
        base.feed.timeout = other.feed.timeout;
    }

    if !other.ui.relative_refresh.is_zero() {
        base.ui.relative_refresh = other.ui.relative_refresh;
    }
    base.ui.compact = other.ui.compact;
    base.ui.autoscroll = other.ui.autoscroll;

    base
}

fn load_env(prefix: &str) -> HashMap<String, String> {
    let upper_prefix = format!("{}_", prefix.to_uppercase());
    env::vars()
        .filter_map(|(key, value)| {
            key.strip_prefix(&upper_prefix)
                .map(|stripped| (stripped.to_ascii_lowercase().replace("__", "."), value))
        })
        .collect()
}

fn apply_env_value(cfg: &mut Config, key: &str, value: String) {
    match key {
        "feed.url" => cfg.feed.url = value,
        "feed.poll_interval" => set_duration(&mut cfg.feed.poll_interval, key, &value),
        "feed.timezone" => {
            let value = value.trim();
            cfg.feed.timezone = (!value.is_empty()).then(|| value.to_string());
        }
        "feed.pause_on_start" => cfg.feed.pause_on_start = parse_flag(&value),
        "feed.user_agent" => cfg.feed.user_agent = value,
        "feed.timeout" => set_duration(&mut cfg.feed.timeout, key, &value),
        "ui.relative_refresh" => set_duration(&mut cfg.ui.relative_refresh, key, &value),
        "ui.compact" => cfg.ui.compact = parse_flag(&value),
        "ui.autoscroll" => cfg.ui.autoscroll = parse_flag(&value),
        _ => {}
    }
}

fn set_duration(target: &mut Duration, key: &str, value: &str) {
    match humantime::parse_duration(value.trim()) {
        Ok(duration) if !duration.is_zero() => *target = duration,
        Ok(_) => tracing::warn!(key, "ignoring zero duration from environment"),
        Err(err) => tracing::warn!(key, %err, "ignoring unparsable duration from environment"),
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

pub fn default_path() -> Option<PathBuf> {
    default_config_path()
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("livespot").join("config.yaml"))
}
