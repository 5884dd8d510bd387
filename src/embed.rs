use once_cell::sync::Lazy;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use regex::Regex;
use url::Url;

use crate::feed::Embeds;

/// Characters `encodeURIComponent` leaves alone.
const COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

static VIDEO_ID: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-]{11}$").expect("valid regex"));
static VIDEO_PATH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"/(?:embed|shorts)/([A-Za-z0-9_-]{11})").expect("valid regex"));
static STATUS_PATH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"/(?:i/)?status/(\d+)").expect("valid regex"));
static BSKY_POST_PATH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^/profile/[^/]+/post/[^/]+/?$").expect("valid regex"));

pub const TELEGRAM_WIDGET_SCRIPT: &str = "https://telegram.org/js/telegram-widget.js?22";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocialFamily {
    FxTwitter,
    FixupX,
    FxBsky,
}

impl SocialFamily {
    pub fn label(self) -> &'static str {
        match self {
            SocialFamily::FxTwitter => "fxtwitter",
            SocialFamily::FixupX => "fixupx",
            SocialFamily::FxBsky => "Bluesky",
        }
    }

    fn from_host(host: &str) -> Option<Self> {
        match host {
            "fxtwitter.com" => Some(SocialFamily::FxTwitter),
            "fixupx.com" => Some(SocialFamily::FixupX),
            "fxbsky.app" => Some(SocialFamily::FxBsky),
            _ => None,
        }
    }
}

/// How a single embed descriptor should be shown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Embed {
    Video {
        id: String,
        player_url: String,
    },
    Social {
        family: SocialFamily,
        /// Status id for the twitter mirrors, rkey path for Bluesky.
        post: String,
        frame_url: String,
        source: String,
    },
    Widget {
        channel: String,
        message: String,
    },
    Unresolvable {
        source: String,
    },
}

impl Embed {
    /// The address a reader can open for this embed.
    pub fn link(&self) -> &str {
        match self {
            Embed::Video { player_url, .. } => player_url,
            Embed::Social { source, .. } => source,
            Embed::Widget { .. } => TELEGRAM_WIDGET_SCRIPT,
            Embed::Unresolvable { source } => source,
        }
    }

    pub fn widget_post(&self) -> Option<String> {
        match self {
            Embed::Widget { channel, message } => Some(format!("{channel}/{message}")),
            _ => None,
        }
    }
}

/// Resolves every descriptor of a post, videos first, then widgets, then links.
pub fn resolve_all(embeds: &Embeds) -> Vec<Embed> {
    let videos = embeds.youtube.iter().map(|raw| resolve_video(raw));
    let widgets = embeds.telegram.iter().map(|raw| resolve_widget(raw));
    let links = embeds.links.iter().map(|raw| resolve_link(raw));
    videos.chain(widgets).chain(links).collect()
}

pub fn resolve_video(raw: &str) -> Embed {
    match video_id(raw) {
        Some(id) => {
            let player_url = format!("https://www.youtube.com/embed/{}?rel=0", encode(&id));
            Embed::Video { id, player_url }
        }
        None => unresolvable(raw),
    }
}

pub fn resolve_widget(raw: &str) -> Embed {
    let Ok(url) = Url::parse(raw.trim()) else {
        return unresolvable(raw);
    };
    if url.host_str() != Some("t.me") {
        return unresolvable(raw);
    }
    let mut segments = url.path().split('/').skip(1);
    match (segments.next(), segments.next()) {
        (Some(channel), Some(message)) if !channel.is_empty() && !message.is_empty() => {
            Embed::Widget {
                channel: channel.to_string(),
                message: message.to_string(),
            }
        }
        _ => unresolvable(raw),
    }
}

pub fn resolve_link(raw: &str) -> Embed {
    let Ok(url) = Url::parse(raw.trim()) else {
        return unresolvable(raw);
    };
    let Some(family) = url.host_str().and_then(|host| SocialFamily::from_host(&normalize_host(host)))
    else {
        return unresolvable(raw);
    };

    match family {
        SocialFamily::FxTwitter | SocialFamily::FixupX => match status_id(&url) {
            Some(id) => {
                let host = match family {
                    SocialFamily::FxTwitter => "fxtwitter.com",
                    _ => "fixupx.com",
                };
                Embed::Social {
                    family,
                    frame_url: format!("https://{host}/i/status/{}?embed=1", encode(&id)),
                    post: id,
                    source: raw.trim().to_string(),
                }
            }
            None => unresolvable(raw),
        },
        SocialFamily::FxBsky => {
            let path = url.path();
            if !BSKY_POST_PATH.is_match(path) {
                return unresolvable(raw);
            }
            let canonical = format!("https://bsky.app{path}");
            Embed::Social {
                family,
                post: path.to_string(),
                frame_url: format!("https://embed.bsky.app/?url={}", encode(&canonical)),
                source: raw.trim().to_string(),
            }
        }
    }
}

/// Extracts a YouTube id from a bare id, a short link, or a youtube.com URL.
pub fn video_id(raw: &str) -> Option<String> {
    let candidate = raw.trim();
    if candidate.is_empty() {
        return None;
    }
    if VIDEO_ID.is_match(candidate) {
        return Some(candidate.to_string());
    }

    let url = Url::parse(candidate).ok()?;
    let host = url.host_str()?.to_ascii_lowercase();
    if host.contains("youtu.be") {
        let id = url.path().trim_start_matches('/');
        return (!id.is_empty()).then(|| id.to_string());
    }
    if host.contains("youtube.com") {
        if let Some((_, v)) = url.query_pairs().find(|(key, _)| key == "v") {
            if !v.is_empty() {
                return Some(v.into_owned());
            }
        }
        return VIDEO_PATH
            .captures(url.path())
            .map(|caps| caps[1].to_string());
    }
    None
}

fn status_id(url: &Url) -> Option<String> {
    STATUS_PATH
        .captures(url.path())
        .map(|caps| caps[1].to_string())
}

fn normalize_host(host: &str) -> String {
    let lower = host.to_ascii_lowercase();
    lower
        .strip_prefix("www.")
        .map(str::to_string)
        .unwrap_or(lower)
}

pub(crate) fn encode(value: &str) -> String {
    utf8_percent_encode(value, COMPONENT).to_string()
}

fn unresolvable(raw: &str) -> Embed {
    tracing::debug!(source = raw, "embed not recognised; falling back to link");
    Embed::Unresolvable {
        source: raw.trim().to_string(),
    }
}
