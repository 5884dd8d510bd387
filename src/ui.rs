use std::io::{self, Stdout};
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use crossterm::ExecutableCommand;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Alignment, Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, List, ListItem, ListState, Padding, Paragraph, Wrap};
use ratatui::{Frame, Terminal};
use textwrap::{wrap, Options as WrapOptions};

use crate::engine::{StatusKind, StatusSink};
use crate::subscription::Subscription;
use crate::view::{embed_label, Card, FeedView, Status, StatusBoard};

// Catppuccin Mocha, named by the role each colour plays on the feed screen.
const COLOR_SCREEN: Color = Color::Rgb(30, 30, 46);
const COLOR_CARD_BG: Color = Color::Rgb(24, 24, 36);
/// Header, status line and idle borders.
const COLOR_BAR_BG: Color = Color::Rgb(49, 50, 68);
const COLOR_SELECTED_BG: Color = Color::Rgb(69, 71, 90);
const COLOR_TEXT: Color = Color::Rgb(205, 214, 244);
const COLOR_MUTED: Color = Color::Rgb(166, 173, 200);
/// Links, the focused pane border and the fetching badge.
const COLOR_LINK: Color = Color::Rgb(137, 180, 250);
const COLOR_LIVE: Color = Color::Rgb(166, 227, 161);
/// Paused badge and fetch errors.
const COLOR_ALERT: Color = Color::Rgb(243, 139, 168);
const COLOR_PINNED: Color = Color::Rgb(249, 226, 175);

const TICK_RATE: Duration = Duration::from_millis(250);
const MIN_POLL: Duration = Duration::from_millis(16);
const MAX_PINNED_HEIGHT: u16 = 12;

pub type FeedSubscription = Subscription<FeedView, StatusBoard>;

pub struct Options {
    pub compact: bool,
    pub autoscroll: bool,
    pub source_label: String,
}

pub struct Model {
    subscription: FeedSubscription,
    status: StatusBoard,
    source_label: String,
    selected: usize,
    compact: bool,
    autoscroll: bool,
    seen_revision: u64,
    drawn_status: Option<Status>,
    needs_redraw: bool,
}

impl Model {
    /// `status` must be the board the subscription reports to.
    pub fn new(subscription: FeedSubscription, status: StatusBoard, options: Options) -> Self {
        Self {
            subscription,
            status,
            source_label: options.source_label,
            selected: 0,
            compact: options.compact,
            autoscroll: options.autoscroll,
            seen_revision: 0,
            drawn_status: None,
            needs_redraw: true,
        }
    }

    pub fn run(&mut self) -> Result<()> {
        let mut stdout = io::stdout();
        enable_raw_mode()?;
        stdout.execute(EnterAlternateScreen)?;
        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend)?;
        terminal.clear()?;

        let result = self.event_loop(&mut terminal);

        disable_raw_mode()?;
        terminal.backend_mut().execute(LeaveAlternateScreen)?;
        terminal.show_cursor()?;

        result
    }

    fn event_loop(&mut self, terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> Result<()> {
        loop {
            self.poll_subscription();

            if self.needs_redraw {
                terminal.draw(|frame| self.draw(frame))?;
                self.needs_redraw = false;
            }

            if event::poll(self.poll_timeout())? {
                match event::read()? {
                    Event::Key(key) if key.kind == KeyEventKind::Press => {
                        match self.handle_key(key.code) {
                            Ok(true) => break,
                            Ok(false) => {}
                            Err(err) => {
                                self.notify(&format!("Error: {err}"), StatusKind::Error);
                            }
                        }
                    }
                    Event::Resize(_, _) => self.mark_dirty(),
                    _ => {}
                }
            }
        }

        Ok(())
    }

    fn mark_dirty(&mut self) {
        self.needs_redraw = true;
    }

    fn notify(&mut self, message: &str, kind: StatusKind) {
        self.status.on_status(message, kind);
        self.mark_dirty();
    }

    fn view(&self) -> &FeedView {
        self.subscription.engine().renderer()
    }

    /// Runs due timers, applies finished fetches, and tracks what needs a
    /// redraw.
    fn poll_subscription(&mut self) {
        if self.subscription.pump(Utc::now()) {
            self.mark_dirty();
        }

        let revision = self.view().revision();
        if revision != self.seen_revision {
            self.seen_revision = revision;
            if self.autoscroll {
                self.selected = 0;
            }
            self.clamp_selection();
            self.mark_dirty();
        }

        let status = self.status.current();
        if self.drawn_status.as_ref() != Some(&status) {
            self.drawn_status = Some(status);
            self.mark_dirty();
        }
    }

    /// Sleeps until the next tick or the next subscription deadline,
    /// whichever comes first.
    fn poll_timeout(&self) -> Duration {
        let until_deadline = self
            .subscription
            .next_deadline()
            .and_then(|deadline| (deadline - Utc::now()).to_std().ok())
            .unwrap_or(TICK_RATE);
        until_deadline.clamp(MIN_POLL, TICK_RATE)
    }

    fn clamp_selection(&mut self) {
        let len = self.view().len();
        self.selected = self.selected.min(len.saturating_sub(1));
    }

    fn selected_card(&self) -> Option<&Card> {
        let view = self.view();
        view.ids()
            .get(self.selected)
            .and_then(|id| view.card(id))
    }

    /// Returns true when the UI should exit.
    fn handle_key(&mut self, code: KeyCode) -> Result<bool> {
        match code {
            KeyCode::Char('q') | KeyCode::Esc => return Ok(true),
            KeyCode::Char(' ') => {
                self.subscription.toggle_pause();
                self.mark_dirty();
            }
            KeyCode::Char('r') => {
                if self.subscription.engine().is_paused() {
                    self.notify("Auto-refresh is paused. Press space to resume.", StatusKind::Info);
                } else if self.subscription.refresh_now() {
                    self.notify("Refreshing…", StatusKind::Info);
                } else {
                    self.notify("A refresh is already running.", StatusKind::Info);
                }
            }
            KeyCode::Char('j') | KeyCode::Down => {
                if self.selected + 1 < self.view().len() {
                    self.selected += 1;
                    self.mark_dirty();
                }
            }
            KeyCode::Char('k') | KeyCode::Up => {
                if self.selected > 0 {
                    self.selected -= 1;
                    self.mark_dirty();
                }
            }
            KeyCode::Home | KeyCode::Char('g') => {
                self.selected = 0;
                self.mark_dirty();
            }
            KeyCode::End | KeyCode::Char('G') => {
                self.selected = self.view().len().saturating_sub(1);
                self.mark_dirty();
            }
            KeyCode::Char('c') => {
                self.compact = !self.compact;
                let mode = if self.compact { "on" } else { "off" };
                self.notify(&format!("Compact view {mode}."), StatusKind::Info);
            }
            KeyCode::Char('a') => {
                self.autoscroll = !self.autoscroll;
                let mode = if self.autoscroll { "on" } else { "off" };
                self.notify(&format!("Autoscroll {mode}."), StatusKind::Info);
            }
            KeyCode::Char('o') => self.open_selected_link(),
            _ => {}
        }
        Ok(false)
    }

    fn open_selected_link(&mut self) {
        let Some(card) = self.selected_card() else {
            self.notify("No post selected.", StatusKind::Info);
            return;
        };
        let Some(url) = card.primary_link().map(str::to_string) else {
            self.notify("Selected post has no links.", StatusKind::Info);
            return;
        };
        match webbrowser::open(&url) {
            Ok(_) => self.notify(&format!("Opened {url} in your browser."), StatusKind::Ok),
            Err(err) => {
                tracing::warn!(%err, url, "failed to open link");
                self.notify(&format!("Failed to open link: {err} (URL: {url})"), StatusKind::Error);
            }
        }
    }

    fn draw(&mut self, frame: &mut Frame<'_>) {
        let full = frame.size();
        frame.render_widget(Block::default().style(Style::default().bg(COLOR_SCREEN)), full);

        let pinned_height = self.pinned_height(full.width);
        let layout = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(2),
                Constraint::Length(pinned_height),
                Constraint::Min(0),
                Constraint::Length(1),
                Constraint::Length(1),
            ])
            .split(full);

        self.draw_header(frame, layout[0]);
        if pinned_height > 0 {
            self.draw_pinned(frame, layout[1]);
        }
        self.draw_feed(frame, layout[2]);
        self.draw_status(frame, layout[3]);

        let footer = Paragraph::new(self.footer_text())
            .style(
                Style::default()
                    .fg(COLOR_MUTED)
                    .bg(COLOR_CARD_BG)
                    .add_modifier(Modifier::ITALIC),
            )
            .alignment(Alignment::Center)
            .wrap(Wrap { trim: true });
        frame.render_widget(footer, layout[4]);
    }

    fn draw_header(&self, frame: &mut Frame<'_>, area: Rect) {
        let view = self.view();
        let engine = self.subscription.engine();
        let state = if engine.is_paused() {
            Span::styled(" ⏸ Paused ", Style::default().fg(COLOR_ALERT))
        } else if engine.is_fetching() {
            Span::styled(" ⟳ Fetching ", Style::default().fg(COLOR_LINK))
        } else {
            Span::styled(" ● Live ", Style::default().fg(COLOR_LIVE))
        };

        let title = Line::from(vec![
            Span::styled(
                view.title().to_string(),
                Style::default()
                    .fg(COLOR_TEXT)
                    .add_modifier(Modifier::BOLD),
            ),
            state,
        ]);

        let mut meta = format!("Time zone: {}", view.timezone());
        if let Some(updated) = view.updated_label() {
            meta.push_str(&format!(" · Updated {updated}"));
        }
        meta.push_str(&format!(" · {}", self.source_label));
        let meta = Line::from(Span::styled(meta, Style::default().fg(COLOR_MUTED)));

        let header =
            Paragraph::new(vec![title, meta]).style(Style::default().bg(COLOR_BAR_BG));
        frame.render_widget(header, area);
    }

    fn pinned_height(&self, width: u16) -> u16 {
        let view = self.view();
        let inner_width = width.saturating_sub(4) as usize;
        let lines: usize = view
            .pinned_cards()
            .map(|card| card_lines(card, inner_width, true, false).len())
            .sum();
        if lines == 0 {
            return 0;
        }
        (lines as u16).saturating_add(2).min(MAX_PINNED_HEIGHT)
    }

    fn draw_pinned(&self, frame: &mut Frame<'_>, area: Rect) {
        let block = pane_block("Pinned", false);
        let inner = block.inner(area);
        let width = inner.width.max(1) as usize;
        let lines: Vec<Line<'static>> = self
            .view()
            .pinned_cards()
            .flat_map(|card| card_lines(card, width, true, false))
            .collect();
        frame.render_widget(Paragraph::new(lines).block(block), area);
    }

    fn draw_feed(&self, frame: &mut Frame<'_>, area: Rect) {
        let view = self.view();
        let block = pane_block(&format!("Feed ({})", view.len()), true);
        let inner = block.inner(area);
        let width = inner.width.max(1) as usize;

        if view.is_empty() {
            let empty = Paragraph::new("No posts yet.")
                .style(Style::default().fg(COLOR_MUTED))
                .block(block);
            frame.render_widget(empty, area);
            return;
        }

        let items: Vec<ListItem> = view
            .cards()
            .enumerate()
            .map(|(idx, card)| {
                let mut lines = card_lines(card, width, self.compact, idx == self.selected);
                if !self.compact {
                    lines.push(Line::from(""));
                }
                ListItem::new(lines)
            })
            .collect();

        let list = List::new(items)
            .block(block)
            .highlight_style(Style::default().bg(COLOR_SELECTED_BG));
        let mut state = ListState::default();
        state.select(Some(self.selected));
        frame.render_stateful_widget(list, area, &mut state);
    }

    fn draw_status(&self, frame: &mut Frame<'_>, area: Rect) {
        let Status { message, kind } = self.status.current();
        let color = match kind {
            StatusKind::Ok => COLOR_LIVE,
            StatusKind::Error => COLOR_ALERT,
            StatusKind::Info => COLOR_TEXT,
        };
        let status_line = Paragraph::new(message).style(
            Style::default()
                .fg(color)
                .bg(COLOR_BAR_BG)
                .add_modifier(Modifier::BOLD),
        );
        frame.render_widget(status_line, area);
    }

    fn footer_text(&self) -> String {
        let pause = if self.subscription.engine().is_paused() {
            "space resume"
        } else {
            "space pause"
        };
        let mut parts = vec![
            pause.to_string(),
            "r refresh".to_string(),
            "j/k move".to_string(),
            "o open link".to_string(),
        ];
        parts.push(format!("c compact ({})", on_off(self.compact)));
        parts.push(format!("a autoscroll ({})", on_off(self.autoscroll)));
        parts.push("q quit".to_string());
        parts.join(" · ")
    }
}

fn on_off(flag: bool) -> &'static str {
    if flag {
        "on"
    } else {
        "off"
    }
}

fn pane_block(title: &str, focused: bool) -> Block<'static> {
    let border_style = if focused {
        Style::default().fg(COLOR_LINK)
    } else {
        Style::default().fg(COLOR_BAR_BG)
    };
    let title_style = if focused {
        Style::default()
            .fg(COLOR_LINK)
            .add_modifier(Modifier::BOLD)
    } else {
        Style::default().fg(COLOR_MUTED)
    };
    Block::default()
        .title(Span::styled(title.to_string(), title_style))
        .borders(Borders::ALL)
        .border_style(border_style)
        .style(Style::default().bg(COLOR_CARD_BG))
        .padding(Padding::horizontal(1))
}

fn card_lines(card: &Card, width: usize, compact: bool, selected: bool) -> Vec<Line<'static>> {
    let title_color = if card.pinned {
        COLOR_PINNED
    } else if selected {
        COLOR_LINK
    } else {
        COLOR_TEXT
    };
    let title_style = Style::default().fg(title_color).add_modifier(Modifier::BOLD);
    let muted = Style::default().fg(COLOR_MUTED);

    let stamp = if card.relative.is_empty() {
        card.absolute.clone()
    } else {
        format!("{} · {}", card.absolute, card.relative)
    };

    if compact {
        let marker = if card.pinned { "📌 " } else { "" };
        return vec![Line::from(vec![
            Span::styled(format!("{marker}{}", card.title), title_style),
            Span::styled(format!("  {stamp}"), muted),
        ])];
    }

    let mut lines = Vec::new();
    let first = if card.pinned { "📌 " } else { "" };
    lines.extend(wrap_field(&card.title, width, first, Field::Prose, title_style));
    lines.push(Line::from(Span::styled(stamp, muted)));

    if !card.description.is_empty() {
        let body = Style::default().fg(COLOR_TEXT);
        for paragraph in card.description.lines() {
            lines.extend(wrap_field(paragraph, width, "", Field::Prose, body));
        }
    }

    let link_style = Style::default().fg(COLOR_LINK);
    for image in &card.images {
        lines.extend(wrap_field(image, width, "[image] ", Field::Link, link_style));
    }
    for embed in &card.embeds {
        lines.extend(wrap_field(&embed_label(embed), width, "", Field::Link, link_style));
    }

    if !card.tags.is_empty() {
        let tags: Vec<String> = card.tags.iter().map(|tag| format!("#{tag}")).collect();
        lines.push(Line::from(Span::styled(tags.join(" "), muted)));
    }

    lines
}

/// How a card field may be broken across lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    /// Post text: words stay whole and blank lines survive as paragraph gaps.
    Prose,
    /// URLs and embed targets: split anywhere, nothing emitted when blank.
    Link,
}

/// Wraps one card field to `width`, with `label` on the first line and a
/// hanging indent of the same width on the rest.
fn wrap_field(text: &str, width: usize, label: &str, field: Field, style: Style) -> Vec<Line<'static>> {
    if text.trim().is_empty() {
        return match field {
            Field::Prose => vec![Line::from(Span::styled(String::new(), style))],
            Field::Link => Vec::new(),
        };
    }

    let hanging = " ".repeat(label.chars().count());
    if width == 0 {
        return vec![Line::from(Span::styled(format!("{label}{text}"), style))];
    }

    let options = WrapOptions::new(width.max(hanging.len() + 1))
        .break_words(field == Field::Link)
        .initial_indent(label)
        .subsequent_indent(&hanging);

    wrap(text, options)
        .into_iter()
        .map(|cow| Line::from(Span::styled(cow.into_owned(), style)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::feed::FeedSnapshot;
    use crate::source::StaticFeedSource;
    use crate::subscription::Options as SubscriptionOptions;

    fn line_text(line: &Line<'_>) -> String {
        line.spans.iter().map(|span| span.content.as_ref()).collect()
    }

    fn model_with(json: &str) -> Model {
        let snapshot = FeedSnapshot::from_json(json.as_bytes()).unwrap();
        let status = StatusBoard::default();
        let mut subscription = Subscription::new(
            Arc::new(StaticFeedSource::new(snapshot)),
            FeedView::new(),
            status.clone(),
            SubscriptionOptions::default(),
            Utc::now(),
        );
        subscription.pump(Utc::now());
        subscription.wait_for_fetch(Duration::from_secs(5), Utc::now());
        let mut model = Model::new(
            subscription,
            status,
            Options {
                compact: false,
                autoscroll: true,
                source_label: "test".into(),
            },
        );
        model.poll_subscription();
        model
    }

    const THREE_POSTS: &str = r#"{"posts":[
        {"id":"a","time":"2020-01-01T00:00:00Z","title":"Oldest"},
        {"id":"b","time":"2020-01-02T00:00:00Z","title":"Middle"},
        {"id":"c","time":"2020-01-03T00:00:00Z","title":"Newest","embeds":{"youtube":["dQw4w9WgXcQ"]}}
    ]}"#;

    #[test]
    fn selection_moves_within_bounds() {
        let mut model = model_with(THREE_POSTS);
        assert_eq!(model.selected_card().unwrap().title, "Newest");
        model.handle_key(KeyCode::Char('k')).unwrap();
        assert_eq!(model.selected, 0);
        model.handle_key(KeyCode::Char('j')).unwrap();
        model.handle_key(KeyCode::Down).unwrap();
        model.handle_key(KeyCode::Down).unwrap();
        assert_eq!(model.selected_card().unwrap().title, "Oldest");
        model.handle_key(KeyCode::Home).unwrap();
        assert_eq!(model.selected, 0);
    }

    #[test]
    fn quit_keys_exit() {
        let mut model = model_with(THREE_POSTS);
        assert!(model.handle_key(KeyCode::Char('q')).unwrap());
        assert!(model.handle_key(KeyCode::Esc).unwrap());
        assert!(!model.handle_key(KeyCode::Char('x')).unwrap());
    }

    #[test]
    fn space_toggles_pause_and_reports_it() {
        let mut model = model_with(THREE_POSTS);
        model.handle_key(KeyCode::Char(' ')).unwrap();
        assert!(model.subscription.engine().is_paused());
        assert_eq!(model.status.current().message, "Auto-refresh paused.");
        model.handle_key(KeyCode::Char('r')).unwrap();
        assert!(!model.subscription.engine().is_fetching());
        model.handle_key(KeyCode::Char(' ')).unwrap();
        assert_eq!(model.status.current().message, "Auto-refresh resumed.");
    }

    #[test]
    fn compact_and_autoscroll_toggle() {
        let mut model = model_with(THREE_POSTS);
        model.handle_key(KeyCode::Char('c')).unwrap();
        assert!(model.compact);
        assert!(model.footer_text().contains("c compact (on)"));
        model.handle_key(KeyCode::Char('a')).unwrap();
        assert!(!model.autoscroll);
        assert_eq!(model.status.current().message, "Autoscroll off.");
    }

    #[test]
    fn newest_card_has_an_openable_link() {
        let model = model_with(THREE_POSTS);
        assert_eq!(
            model.selected_card().and_then(Card::primary_link),
            Some("https://www.youtube.com/embed/dQw4w9WgXcQ?rel=0")
        );
    }

    #[test]
    fn compact_card_is_one_line() {
        let model = model_with(THREE_POSTS);
        let card = model.selected_card().unwrap();
        let lines = card_lines(card, 60, true, true);
        assert_eq!(lines.len(), 1);
        assert!(line_text(&lines[0]).starts_with("Newest"));
        assert!(card_lines(card, 60, false, true).len() > 2);
    }

    #[test]
    fn image_links_hang_under_their_label() {
        let lines = wrap_field(
            "https://cdn.example/photos/harbor.jpg",
            16,
            "[image] ",
            Field::Link,
            Style::default(),
        );
        let texts: Vec<String> = lines.iter().map(line_text).collect();
        assert!(texts.len() > 1);
        assert!(texts[0].starts_with("[image] https:"));
        assert!(texts[1..].iter().all(|line| line.starts_with("        ")));
        assert!(texts.iter().all(|line| line.chars().count() <= 16));
    }

    #[test]
    fn prose_keeps_words_and_blank_lines() {
        let lines = wrap_field("alpha beta gamma", 8, "", Field::Prose, Style::default());
        let texts: Vec<String> = lines.iter().map(line_text).collect();
        assert_eq!(texts, ["alpha", "beta", "gamma"]);
        assert_eq!(wrap_field("  ", 8, "", Field::Prose, Style::default()).len(), 1);
        assert!(wrap_field("", 8, "[image] ", Field::Link, Style::default()).is_empty());
    }
}
