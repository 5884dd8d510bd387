use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::embed::{self, Embed};
use crate::engine::{RenderOp, Renderer, StatusKind, StatusSink};
use crate::feed::{Post, DEFAULT_FEED_TITLE};
use crate::timefmt;

pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// A rendered post.
#[derive(Debug, Clone, PartialEq)]
pub struct Card {
    pub id: String,
    pub title: String,
    pub description: String,
    pub time: Option<DateTime<Utc>>,
    pub absolute: String,
    pub relative: String,
    pub images: Vec<String>,
    pub embeds: Vec<Embed>,
    pub tags: Vec<String>,
    pub pinned: bool,
}

impl Card {
    fn build(id: &str, post: &Post, pinned: bool, timezone: &str, now: DateTime<Utc>) -> Self {
        let time = post.timestamp();
        let (absolute, relative) = match time {
            Some(time) => (
                timefmt::absolute(time, timezone),
                timefmt::relative(time, now),
            ),
            None => (String::from("Unknown time"), String::new()),
        };
        Self {
            id: id.to_string(),
            title: post.display_title().to_string(),
            description: post.description().to_string(),
            time,
            absolute,
            relative,
            images: post.images.clone(),
            embeds: post.embeds.as_ref().map(embed::resolve_all).unwrap_or_default(),
            tags: post.tags.clone(),
            pinned,
        }
    }

    /// First address a reader might want to open: an embed, else an image.
    pub fn primary_link(&self) -> Option<&str> {
        self.embeds
            .iter()
            .map(Embed::link)
            .chain(self.images.iter().map(String::as_str))
            .find(|link| !link.is_empty())
    }
}

/// Renderer that keeps the feed as plain data for the terminal UI.
///
/// Cards are never removed. New cards are appended; `SetOrder` moves the
/// listed cards to the top in the given order, so cards that dropped out of
/// the feed sink below the live ones.
pub struct FeedView {
    title: String,
    timezone: String,
    updated_at: Option<DateTime<Utc>>,
    updated_label: Option<String>,
    cards: HashMap<String, Card>,
    sequence: Vec<String>,
    pinned: Vec<String>,
    revision: u64,
    clock: Clock,
}

impl Default for FeedView {
    fn default() -> Self {
        Self::with_clock(Arc::new(Utc::now))
    }
}

impl FeedView {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_clock(clock: Clock) -> Self {
        Self {
            title: DEFAULT_FEED_TITLE.to_string(),
            timezone: timefmt::DEFAULT_TIMEZONE.to_string(),
            updated_at: None,
            updated_label: None,
            cards: HashMap::new(),
            sequence: Vec::new(),
            pinned: Vec::new(),
            revision: 0,
            clock,
        }
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn timezone(&self) -> &str {
        &self.timezone
    }

    pub fn updated_label(&self) -> Option<&str> {
        self.updated_label.as_deref()
    }

    /// Bumped on every change; lets the UI notice fresh content.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn len(&self) -> usize {
        self.sequence.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sequence.is_empty()
    }

    pub fn card(&self, id: &str) -> Option<&Card> {
        self.cards.get(id)
    }

    pub fn ids(&self) -> &[String] {
        &self.sequence
    }

    pub fn cards(&self) -> impl Iterator<Item = &Card> {
        self.sequence.iter().filter_map(|id| self.cards.get(id))
    }

    pub fn pinned_cards(&self) -> impl Iterator<Item = &Card> {
        self.pinned.iter().filter_map(|id| self.cards.get(id))
    }

    fn upsert(&mut self, id: &str, post: &Post, pinned: bool, now: DateTime<Utc>) {
        let card = Card::build(id, post, pinned, &self.timezone, now);
        if self.cards.insert(id.to_string(), card).is_none() {
            self.sequence.push(id.to_string());
        }
    }

    fn reorder(&mut self, ids: &[String]) {
        for id in ids.iter().rev() {
            let Some(pos) = self.sequence.iter().position(|existing| existing == id) else {
                continue;
            };
            if pos != 0 {
                let id = self.sequence.remove(pos);
                self.sequence.insert(0, id);
            }
        }
    }

    fn set_updated(&mut self, updated_at: Option<DateTime<Utc>>, now: DateTime<Utc>) {
        self.updated_at = updated_at;
        if let Some(at) = updated_at {
            self.updated_label = Some(format!(
                "{} ({})",
                timefmt::absolute(at, &self.timezone),
                timefmt::relative(at, now)
            ));
        }
    }

    /// Plain-text rendering, newest first, with the pinned section on top.
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "{}", self.title);
        let _ = write!(out, "Time zone: {}", self.timezone);
        if let Some(updated) = &self.updated_label {
            let _ = write!(out, " · Updated {updated}");
        }
        out.push('\n');

        if !self.pinned.is_empty() {
            out.push_str("\n== Pinned ==\n");
            for card in self.pinned_cards() {
                write_card(&mut out, card);
            }
        }

        out.push_str("\n== Feed ==\n");
        if self.sequence.is_empty() {
            out.push_str("No posts yet.\n");
        }
        for card in self.cards() {
            write_card(&mut out, card);
        }
        out
    }
}

fn write_card(out: &mut String, card: &Card) {
    let _ = writeln!(out);
    let marker = if card.pinned { "📌 " } else { "" };
    let _ = writeln!(out, "{marker}{}", card.title);
    if card.relative.is_empty() {
        let _ = writeln!(out, "  {}", card.absolute);
    } else {
        let _ = writeln!(out, "  {} · {}", card.absolute, card.relative);
    }
    if !card.description.is_empty() {
        for line in card.description.lines() {
            let _ = writeln!(out, "  {line}");
        }
    }
    for image in &card.images {
        let _ = writeln!(out, "  [image] {image}");
    }
    for embed in &card.embeds {
        let _ = writeln!(out, "  {}", embed_label(embed));
    }
    if !card.tags.is_empty() {
        let tags: Vec<String> = card.tags.iter().map(|tag| format!("#{tag}")).collect();
        let _ = writeln!(out, "  {}", tags.join(" "));
    }
}

pub fn embed_label(embed: &Embed) -> String {
    match embed {
        Embed::Video { player_url, .. } => format!("[video] {player_url}"),
        Embed::Social {
            family, frame_url, ..
        } => format!("[{}] {frame_url}", family.label()),
        Embed::Widget { .. } => format!(
            "[telegram] {}",
            embed.widget_post().unwrap_or_default()
        ),
        Embed::Unresolvable { source } => format!("[link] {source}"),
    }
}

impl Renderer for FeedView {
    fn apply(&mut self, ops: &[RenderOp]) {
        let now = (self.clock)();
        for op in ops {
            match op {
                RenderOp::Header {
                    title,
                    timezone,
                    updated_at,
                } => {
                    self.title = title.clone();
                    self.timezone = timezone.clone();
                    self.set_updated(*updated_at, now);
                }
                RenderOp::Create { id, post, pinned } | RenderOp::Update { id, post, pinned } => {
                    self.upsert(id, post, *pinned, now);
                }
                RenderOp::SetOrder(ids) => self.reorder(ids),
                RenderOp::SetPinned(ids) => {
                    self.pinned = ids
                        .iter()
                        .filter(|id| self.cards.contains_key(id.as_str()))
                        .cloned()
                        .collect();
                }
            }
        }
        self.revision += 1;
    }

    fn refresh_relative(&mut self, now: DateTime<Utc>) {
        for card in self.cards.values_mut() {
            if let Some(time) = card.time {
                card.relative = timefmt::relative(time, now);
            }
        }
        let updated_at = self.updated_at;
        self.set_updated(updated_at, now);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    pub message: String,
    pub kind: StatusKind,
}

/// Latest status message, shared between the engine and the UI thread.
#[derive(Debug, Clone)]
pub struct StatusBoard {
    inner: Arc<Mutex<Status>>,
}

impl Default for StatusBoard {
    fn default() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Status {
                message: "Connecting…".to_string(),
                kind: StatusKind::Info,
            })),
        }
    }
}

impl StatusBoard {
    pub fn current(&self) -> Status {
        self.inner.lock().clone()
    }
}

impl StatusSink for StatusBoard {
    fn on_status(&mut self, message: &str, kind: StatusKind) {
        *self.inner.lock() = Status {
            message: message.to_string(),
            kind,
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fixed_clock() -> Clock {
        Arc::new(|| Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap())
    }

    fn post(id: &str, time: &str, title: &str) -> Post {
        Post {
            id: Some(id.into()),
            time: Some(time.into()),
            title: Some(title.into()),
            ..Post::default()
        }
    }

    fn create(id: &str, time: &str, title: &str) -> RenderOp {
        RenderOp::Create {
            id: id.into(),
            post: post(id, time, title),
            pinned: false,
        }
    }

    fn order(ids: &[&str]) -> RenderOp {
        RenderOp::SetOrder(ids.iter().map(|id| id.to_string()).collect())
    }

    #[test]
    fn creates_cards_with_formatted_times() {
        let mut view = FeedView::with_clock(fixed_clock());
        view.apply(&[create("a", "2024-01-01T11:00:00Z", "Hello")]);
        let card = view.card("a").unwrap();
        assert_eq!(card.title, "Hello");
        assert_eq!(card.absolute, "Jan 1, 2024, 11:00 AM");
        assert_eq!(card.relative, "1 hour ago");
        assert_eq!(view.revision(), 1);
    }

    #[test]
    fn set_order_moves_listed_cards_to_top() {
        let mut view = FeedView::with_clock(fixed_clock());
        view.apply(&[
            create("old", "2024-01-01T08:00:00Z", "Old"),
            create("gone", "2024-01-01T09:00:00Z", "Gone"),
            create("new", "2024-01-01T10:00:00Z", "New"),
            order(&["new", "gone", "old"]),
        ]);
        assert_eq!(view.ids(), ["new", "gone", "old"]);

        view.apply(&[order(&["new", "old"])]);
        assert_eq!(view.ids(), ["new", "old", "gone"]);

        view.apply(&[order(&["new", "old"])]);
        assert_eq!(view.ids(), ["new", "old", "gone"]);
    }

    #[test]
    fn update_rewrites_in_place_or_creates() {
        let mut view = FeedView::with_clock(fixed_clock());
        view.apply(&[create("a", "2024-01-01T11:00:00Z", "First")]);
        view.apply(&[RenderOp::Update {
            id: "a".into(),
            post: post("a", "2024-01-01T11:00:00Z", "Second"),
            pinned: true,
        }]);
        assert_eq!(view.len(), 1);
        assert_eq!(view.card("a").unwrap().title, "Second");
        assert!(view.card("a").unwrap().pinned);

        view.apply(&[RenderOp::Update {
            id: "b".into(),
            post: post("b", "2024-01-01T11:30:00Z", "Fresh"),
            pinned: false,
        }]);
        assert_eq!(view.ids(), ["a", "b"]);
    }

    #[test]
    fn pinned_view_skips_unknown_ids() {
        let mut view = FeedView::with_clock(fixed_clock());
        view.apply(&[
            create("a", "2024-01-01T11:00:00Z", "A"),
            RenderOp::SetPinned(vec!["a".into(), "ghost".into()]),
        ]);
        let pinned: Vec<&str> = view.pinned_cards().map(|card| card.id.as_str()).collect();
        assert_eq!(pinned, ["a"]);
    }

    #[test]
    fn header_sets_title_zone_and_updated_label() {
        let mut view = FeedView::with_clock(fixed_clock());
        view.apply(&[RenderOp::Header {
            title: "Election night".into(),
            timezone: "America/New_York".into(),
            updated_at: Some(Utc.with_ymd_and_hms(2024, 1, 1, 11, 55, 0).unwrap()),
        }]);
        assert_eq!(view.title(), "Election night");
        assert_eq!(
            view.updated_label(),
            Some("Jan 1, 2024, 6:55 AM (5 minutes ago)")
        );
    }

    #[test]
    fn relative_refresh_recomputes_labels() {
        let mut view = FeedView::with_clock(fixed_clock());
        view.apply(&[create("a", "2024-01-01T11:59:00Z", "Recent")]);
        assert_eq!(view.card("a").unwrap().relative, "1 minute ago");
        view.refresh_relative(Utc.with_ymd_and_hms(2024, 1, 1, 14, 0, 0).unwrap());
        assert_eq!(view.card("a").unwrap().relative, "2 hours ago");
    }

    #[test]
    fn cards_resolve_embeds_and_links() {
        let mut view = FeedView::with_clock(fixed_clock());
        let mut with_embeds = post("e", "2024-01-01T11:00:00Z", "Clip");
        with_embeds.embeds = Some(crate::feed::Embeds {
            youtube: vec!["https://youtu.be/dQw4w9WgXcQ".into()],
            links: vec!["not a url".into()],
            ..Default::default()
        });
        view.apply(&[RenderOp::Create {
            id: "e".into(),
            post: with_embeds,
            pinned: false,
        }]);
        let card = view.card("e").unwrap();
        assert_eq!(card.embeds.len(), 2);
        assert_eq!(
            card.primary_link(),
            Some("https://www.youtube.com/embed/dQw4w9WgXcQ?rel=0")
        );
        let text = view.render_text();
        assert!(text.contains("[video] https://www.youtube.com/embed/dQw4w9WgXcQ?rel=0"));
        assert!(text.contains("[link] not a url"));
    }

    #[test]
    fn render_text_lists_pinned_then_feed() {
        let mut view = FeedView::with_clock(fixed_clock());
        let mut pinned = post("p", "2024-01-01T10:00:00Z", "Pinned note");
        pinned.tags = vec!["live".into()];
        view.apply(&[
            RenderOp::Create {
                id: "p".into(),
                post: pinned,
                pinned: true,
            },
            create("q", "2024-01-01T11:00:00Z", "Latest"),
            order(&["q", "p"]),
            RenderOp::SetPinned(vec!["p".into()]),
        ]);
        let text = view.render_text();
        let pinned_at = text.find("== Pinned ==").unwrap();
        let feed_at = text.find("== Feed ==").unwrap();
        assert!(pinned_at < feed_at);
        assert!(text[feed_at..].find("Latest").unwrap() < text[feed_at..].find("Pinned note").unwrap());
        assert!(text.contains("#live"));
    }

    #[test]
    fn status_board_keeps_latest_message() {
        let mut board = StatusBoard::default();
        let reader = board.clone();
        board.on_status("Connected", StatusKind::Ok);
        assert_eq!(
            reader.current(),
            Status {
                message: "Connected".into(),
                kind: StatusKind::Ok
            }
        );
    }
}
