use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use chrono::Utc;

use crate::config::{self, Config};
use crate::engine::{CycleOutcome, EngineOptions, FeedSyncEngine, Trigger};
use crate::logging;
use crate::rss;
use crate::source::{self, ClientConfig, FeedSource};
use crate::subscription::{self, Subscription};
use crate::timefmt;
use crate::ui;
use crate::view::{FeedView, StatusBoard};

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Mode {
    #[default]
    Interactive,
    /// Fetch, apply and print the rendered feed once.
    Once,
    /// Fetch once and print the feed as RSS for the given site origin.
    Rss { origin: String },
}

/// Command-line overrides; they win over the config file and environment.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub config_file: Option<PathBuf>,
    pub feed: Option<String>,
    pub interval: Option<Duration>,
    pub timezone: Option<String>,
    pub paused: bool,
    pub mode: Mode,
}

pub fn run(options: RunOptions) -> Result<()> {
    let output = match options.mode {
        Mode::Interactive => logging::Output::Terminal,
        Mode::Once | Mode::Rss { .. } => logging::Output::Stderr,
    };
    logging::init(output)?;

    let cfg = config::load(config::LoadOptions {
        config_file: options.config_file.clone(),
        env_prefix: None,
    })
    .context("load config")?;
    let cfg = apply_overrides(cfg, &options);
    tracing::debug!(feed = %cfg.feed.url, poll = ?cfg.feed.poll_interval, "configuration loaded");

    let source = source::open(
        &cfg.feed.url,
        ClientConfig {
            user_agent: cfg.feed.user_agent.clone(),
            timeout: Some(cfg.feed.timeout),
            http_client: None,
        },
    )
    .context("open feed source")?;

    let stdout = std::io::stdout();
    match &options.mode {
        Mode::Interactive => run_interactive(&cfg, source),
        Mode::Once => run_once(&cfg, source.as_ref(), &mut stdout.lock()),
        Mode::Rss { origin } => run_rss(source.as_ref(), origin, &mut stdout.lock()),
    }
}

fn apply_overrides(mut cfg: Config, options: &RunOptions) -> Config {
    if let Some(feed) = options.feed.as_ref().filter(|feed| !feed.trim().is_empty()) {
        cfg.feed.url = feed.clone();
    }
    if let Some(interval) = options.interval.filter(|interval| !interval.is_zero()) {
        cfg.feed.poll_interval = interval;
    }
    if let Some(tz) = options.timezone.as_ref().filter(|tz| !tz.trim().is_empty()) {
        cfg.feed.timezone = Some(tz.clone());
    }
    if options.paused {
        cfg.feed.pause_on_start = true;
    }
    cfg
}

fn engine_options(cfg: &Config) -> EngineOptions {
    EngineOptions {
        timezone_override: cfg.feed.timezone.clone(),
        default_timezone: timefmt::system_zone_name(),
        start_paused: cfg.feed.pause_on_start,
    }
}

fn run_interactive(cfg: &Config, source: Arc<dyn FeedSource>) -> Result<()> {
    let status = StatusBoard::default();
    let source_label = source.describe();
    let subscription = Subscription::new(
        source,
        FeedView::new(),
        status.clone(),
        subscription::Options {
            poll_interval: cfg.feed.poll_interval,
            relative_refresh: cfg.ui.relative_refresh,
            engine: engine_options(cfg),
        },
        Utc::now(),
    );

    let mut model = ui::Model::new(
        subscription,
        status,
        ui::Options {
            compact: cfg.ui.compact,
            autoscroll: cfg.ui.autoscroll,
            source_label,
        },
    );
    model.run()
}

/// Renders a single fetch of the feed as plain text.
pub fn run_once<W: Write>(cfg: &Config, source: &dyn FeedSource, out: &mut W) -> Result<()> {
    let mut options = engine_options(cfg);
    options.start_paused = false;
    let mut engine = FeedSyncEngine::new(FeedView::new(), StatusBoard::default(), options);

    let ticket = engine
        .begin_cycle(Trigger::Manual)
        .ok_or_else(|| anyhow!("feed fetch could not start"))?;
    match engine.complete_cycle(ticket, source.fetch(), Utc::now()) {
        CycleOutcome::Applied(report) => {
            tracing::debug!(created = report.created, scheduled = report.scheduled, "feed applied");
        }
        CycleOutcome::Failed(message) => bail!("{message} ({})", source.describe()),
        CycleOutcome::Stale => bail!("feed fetch result was discarded"),
    }

    out.write_all(engine.renderer().render_text().as_bytes())
        .context("write feed")?;
    Ok(())
}

pub fn run_rss<W: Write>(source: &dyn FeedSource, origin: &str, out: &mut W) -> Result<()> {
    let snapshot = source
        .fetch()
        .with_context(|| format!("fetch feed from {}", source.describe()))?;
    let xml = rss::to_rss(&snapshot, origin, Utc::now())?;
    out.write_all(xml.as_bytes()).context("write RSS")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::FeedSnapshot;
    use crate::source::StaticFeedSource;

    fn snapshot(json: &str) -> FeedSnapshot {
        FeedSnapshot::from_json(json.as_bytes()).unwrap()
    }

    #[test]
    fn overrides_win_over_config() {
        let options = RunOptions {
            feed: Some("https://example.com/feed.json".into()),
            interval: Some(Duration::from_secs(5)),
            timezone: Some("Asia/Tokyo".into()),
            paused: true,
            ..RunOptions::default()
        };
        let cfg = apply_overrides(Config::default(), &options);
        assert_eq!(cfg.feed.url, "https://example.com/feed.json");
        assert_eq!(cfg.feed.poll_interval, Duration::from_secs(5));
        assert_eq!(cfg.feed.timezone.as_deref(), Some("Asia/Tokyo"));
        assert!(cfg.feed.pause_on_start);
    }

    #[test]
    fn blank_overrides_are_ignored() {
        let options = RunOptions {
            feed: Some("  ".into()),
            interval: Some(Duration::ZERO),
            ..RunOptions::default()
        };
        let cfg = apply_overrides(Config::default(), &options);
        assert_eq!(cfg, Config::default());
    }

    #[test]
    fn once_prints_due_posts_only() {
        let source = StaticFeedSource::new(snapshot(
            r#"{"meta":{"title":"Launch day","timezone":"UTC"},"posts":[
                {"id":"past","time":"2020-01-01T00:00:00Z","title":"Doors open"},
                {"id":"future","time":"2999-01-01T00:00:00Z","title":"Not yet"}
            ]}"#,
        ));
        let mut out = Vec::new();
        run_once(&Config::default(), &source, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("Launch day\n"));
        assert!(text.contains("Doors open"));
        assert!(!text.contains("Not yet"));
    }

    #[test]
    fn once_fails_on_fetch_error() {
        let source = StaticFeedSource::sequence(vec![Err("offline".into())]);
        let mut out = Vec::new();
        let err = run_once(&Config::default(), &source, &mut out).unwrap_err();
        assert!(err.to_string().contains("Fetch error: offline"));
        assert!(out.is_empty());
    }

    #[test]
    fn rss_writes_channel() {
        let source = StaticFeedSource::new(snapshot(r#"{"posts":[{"id":"a","time":"2020-01-01T00:00:00Z"}]}"#));
        let mut out = Vec::new();
        run_rss(&source, "https://live.example", &mut out).unwrap();
        let xml = String::from_utf8(out).unwrap();
        assert!(xml.contains("<guid isPermaLink=\"false\">https://live.example/posts/a</guid>"));
    }
}
