use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use livespot::app::{Mode, RunOptions};

const HELP: &str = "livespot - Follow a live JSON post feed from the terminal.

Usage: livespot [OPTIONS]

  --feed <url|path>      Feed URL or local JSON file (default: feed.json)
  --config <path>        Config file (default: ~/.config/livespot/config.yaml)
  --interval <duration>  Poll interval, e.g. 15s or 1m
  --tz <zone>            IANA time zone to display times in
  --paused               Start with auto-refresh paused
  --once                 Fetch once, print the feed as text and exit
  --rss <origin>         Fetch once, print the feed as RSS for <origin> and exit
  --version, -V          Show version and exit
  --help,    -h          Show this help message";

enum Command {
    Version,
    Help,
    Run(RunOptions),
}

fn main() {
    let command = match parse_args(std::env::args().skip(1)) {
        Ok(command) => command,
        Err(err) => {
            eprintln!("error: {err}\n\nRun `livespot --help` for usage.");
            std::process::exit(2);
        }
    };

    match command {
        Command::Version => println!("livespot {}", livespot::VERSION),
        Command::Help => println!("{HELP}"),
        Command::Run(options) => {
            if let Err(err) = livespot::run(options) {
                eprintln!("error: {err:?}");
                std::process::exit(1);
            }
        }
    }
}

fn parse_args<I>(args: I) -> Result<Command>
where
    I: IntoIterator<Item = String>,
{
    let mut options = RunOptions::default();
    let mut args = args.into_iter();

    while let Some(arg) = args.next() {
        let (flag, inline) = match arg.split_once('=') {
            Some((flag, value)) if flag.starts_with("--") => (flag.to_string(), Some(value.to_string())),
            _ => (arg.clone(), None),
        };
        let mut value = |name: &str| -> Result<String> {
            match inline.clone() {
                Some(value) => Ok(value),
                None => args.next().with_context(|| format!("{name} needs a value")),
            }
        };

        match flag.as_str() {
            "--version" | "-V" => return Ok(Command::Version),
            "--help" | "-h" => return Ok(Command::Help),
            "--config" => options.config_file = Some(PathBuf::from(value("--config")?)),
            "--feed" => options.feed = Some(value("--feed")?),
            "--interval" => {
                let raw = value("--interval")?;
                let interval = humantime::parse_duration(&raw)
                    .with_context(|| format!("invalid --interval {raw:?}"))?;
                if interval.is_zero() {
                    bail!("--interval must be greater than zero");
                }
                options.interval = Some(interval);
            }
            "--tz" => options.timezone = Some(value("--tz")?),
            "--paused" => options.paused = true,
            "--once" => options.mode = Mode::Once,
            "--rss" => {
                options.mode = Mode::Rss {
                    origin: value("--rss")?,
                }
            }
            other => bail!("unknown argument {other:?}"),
        }
    }

    Ok(Command::Run(options))
}
