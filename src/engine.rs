//! Feed synchronization: turns successive snapshots into render operations
//! and keeps a wake-up scheduled for the next post that is not yet due.
//!
//! The engine never performs I/O. A host hands out fetches when
//! [`FeedSyncEngine::begin_cycle`] returns a [`Ticket`] and reports the
//! result through [`FeedSyncEngine::complete_cycle`].

use chrono::{DateTime, Duration, Utc};

use crate::feed::{FeedSnapshot, Post};
use crate::source::FetchError;
use crate::store::PostStore;
use crate::timefmt;
use crate::timer::Timer;

/// Extra delay after a scheduled post's time before the wake fetch runs.
pub const WAKE_MARGIN_MS: i64 = 500;

pub fn wake_margin() -> Duration {
    Duration::milliseconds(WAKE_MARGIN_MS)
}

#[derive(Debug, Clone, PartialEq)]
pub enum RenderOp {
    Header {
        title: String,
        timezone: String,
        updated_at: Option<DateTime<Utc>>,
    },
    Create {
        id: String,
        post: Post,
        pinned: bool,
    },
    /// Renderers without a node for `id` treat this as a create.
    Update {
        id: String,
        post: Post,
        pinned: bool,
    },
    SetOrder(Vec<String>),
    SetPinned(Vec<String>),
}

pub trait Renderer {
    fn apply(&mut self, ops: &[RenderOp]);

    /// Recomputes relative timestamps of rendered posts. Driven by its own
    /// interval, not by fetch cycles.
    fn refresh_relative(&mut self, _now: DateTime<Utc>) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusKind {
    Ok,
    Error,
    Info,
}

pub trait StatusSink {
    fn on_status(&mut self, message: &str, kind: StatusKind);
}

impl<F> StatusSink for F
where
    F: FnMut(&str, StatusKind),
{
    fn on_status(&mut self, message: &str, kind: StatusKind) {
        self(message, kind)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Fetching,
    Applying,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Poll,
    Wake,
    Manual,
}

/// Identifies the one fetch currently allowed to complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ticket {
    serial: u64,
    pub trigger: Trigger,
}

#[derive(Debug, Clone, Default)]
pub struct EngineOptions {
    /// Wins over the zone named by the feed.
    pub timezone_override: Option<String>,
    /// Used until a feed or the override names a zone.
    pub default_timezone: String,
    pub start_paused: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ApplyReport {
    pub ops: Vec<RenderOp>,
    pub created: usize,
    pub updated: usize,
    /// Posts held back because their time has not come yet.
    pub scheduled: usize,
    /// Time of the earliest held-back post.
    pub next_post: Option<DateTime<Utc>>,
    pub next_wake: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    Applied(ApplyReport),
    Failed(String),
    /// The ticket did not match the fetch in flight; nothing happened.
    Stale,
}

pub struct FeedSyncEngine<R, S> {
    renderer: R,
    status: S,
    store: PostStore,
    phase: Phase,
    paused: bool,
    wake: Timer,
    in_flight: Option<Ticket>,
    serial: u64,
    timezone: String,
    timezone_override: Option<String>,
}

impl<R: Renderer, S: StatusSink> FeedSyncEngine<R, S> {
    pub fn new(renderer: R, status: S, options: EngineOptions) -> Self {
        let timezone = options
            .timezone_override
            .clone()
            .filter(|tz| !tz.trim().is_empty())
            .unwrap_or_else(|| {
                if options.default_timezone.trim().is_empty() {
                    timefmt::DEFAULT_TIMEZONE.to_string()
                } else {
                    options.default_timezone.clone()
                }
            });
        Self {
            renderer,
            status,
            store: PostStore::new(),
            phase: Phase::Idle,
            paused: options.start_paused,
            wake: Timer::new(),
            in_flight: None,
            serial: 0,
            timezone,
            timezone_override: options.timezone_override.filter(|tz| !tz.trim().is_empty()),
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_fetching(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn timezone(&self) -> &str {
        &self.timezone
    }

    pub fn store(&self) -> &PostStore {
        &self.store
    }

    pub fn renderer(&self) -> &R {
        &self.renderer
    }

    pub fn renderer_mut(&mut self) -> &mut R {
        &mut self.renderer
    }

    pub fn wake_deadline(&self) -> Option<DateTime<Utc>> {
        self.wake.deadline()
    }

    pub fn pause(&mut self) {
        self.set_paused(true);
    }

    pub fn resume(&mut self) {
        self.set_paused(false);
    }

    pub fn toggle_pause(&mut self) -> bool {
        self.set_paused(!self.paused);
        self.paused
    }

    fn set_paused(&mut self, paused: bool) {
        self.paused = paused;
        let word = if paused { "paused" } else { "resumed" };
        tracing::info!(paused, "auto-refresh toggled");
        self.status
            .on_status(&format!("Auto-refresh {word}."), StatusKind::Ok);
    }

    /// Starts a fetch unless paused or one is already in flight. Triggers
    /// that arrive while fetching are dropped, not queued.
    pub fn begin_cycle(&mut self, trigger: Trigger) -> Option<Ticket> {
        if self.paused {
            tracing::trace!(?trigger, "paused; skipping fetch");
            return None;
        }
        if let Some(current) = self.in_flight {
            tracing::debug!(?trigger, in_flight = ?current.trigger, "fetch already in flight; skipping");
            return None;
        }
        self.serial += 1;
        let ticket = Ticket {
            serial: self.serial,
            trigger,
        };
        self.in_flight = Some(ticket);
        self.phase = Phase::Fetching;
        tracing::debug!(?trigger, serial = ticket.serial, "fetch started");
        Some(ticket)
    }

    pub fn refresh_now(&mut self) -> Option<Ticket> {
        self.begin_cycle(Trigger::Manual)
    }

    /// Fires the wake timer if due and starts the follow-up fetch. The timer
    /// is consumed even when the fetch is skipped.
    pub fn on_wake(&mut self, now: DateTime<Utc>) -> Option<Ticket> {
        if !self.wake.fire_if_due(now) {
            return None;
        }
        tracing::debug!("wake timer fired");
        self.begin_cycle(Trigger::Wake)
    }

    pub fn refresh_relative(&mut self, now: DateTime<Utc>) {
        self.renderer.refresh_relative(now);
    }

    pub fn complete_cycle(
        &mut self,
        ticket: Ticket,
        result: Result<FeedSnapshot, FetchError>,
        now: DateTime<Utc>,
    ) -> CycleOutcome {
        if self.in_flight != Some(ticket) {
            tracing::debug!(serial = ticket.serial, "discarding stale fetch result");
            return CycleOutcome::Stale;
        }
        self.in_flight = None;

        match result {
            Ok(snapshot) => {
                let report = self.apply(snapshot, now);
                self.status.on_status("Connected", StatusKind::Ok);
                if let Some(due) = report.next_post {
                    let message = format!(
                        "Next scheduled post: {} ({})",
                        timefmt::absolute(due, &self.timezone),
                        timefmt::relative(due, now)
                    );
                    self.status.on_status(&message, StatusKind::Info);
                }
                CycleOutcome::Applied(report)
            }
            Err(err) => {
                tracing::warn!(%err, "feed fetch failed");
                self.phase = Phase::Idle;
                let message = format!("Fetch error: {err}");
                self.status.on_status(&message, StatusKind::Error);
                CycleOutcome::Failed(message)
            }
        }
    }

    /// Reconciles a snapshot with the store and pushes the resulting
    /// operations to the renderer.
    pub fn apply(&mut self, snapshot: FeedSnapshot, now: DateTime<Utc>) -> ApplyReport {
        self.phase = Phase::Applying;

        if let Some(tz) = self
            .timezone_override
            .clone()
            .or_else(|| snapshot.meta.timezone.clone().filter(|tz| !tz.trim().is_empty()))
        {
            self.timezone = tz;
        }

        let mut ops = vec![RenderOp::Header {
            title: snapshot.title().to_string(),
            timezone: self.timezone.clone(),
            updated_at: snapshot
                .meta
                .updated_at
                .as_deref()
                .and_then(crate::feed::parse_time),
        }];

        let (due, held, next_unlock) = partition_due(snapshot.posts, now);
        let scheduled = held.len();
        self.store.hold_back(&held);

        let next_wake = match next_unlock {
            Some(unlock) => {
                let delay = (unlock - now + wake_margin()).max(Duration::zero());
                self.wake.arm(now, delay);
                tracing::debug!(%unlock, delay_ms = delay.num_milliseconds(), "wake scheduled");
                self.wake.deadline()
            }
            None => {
                if self.wake.cancel() {
                    tracing::debug!("no scheduled posts left; wake canceled");
                }
                None
            }
        };

        let diff = self.store.diff(due);
        for (id, created) in &diff.changes {
            let Some(entry) = self.store.get(id) else {
                continue;
            };
            let post = entry.last_content.clone();
            let pinned = post.pinned;
            ops.push(if *created {
                RenderOp::Create {
                    id: id.clone(),
                    post,
                    pinned,
                }
            } else {
                RenderOp::Update {
                    id: id.clone(),
                    post,
                    pinned,
                }
            });
        }
        ops.push(RenderOp::SetOrder(diff.order.clone()));
        ops.push(RenderOp::SetPinned(self.store.pinned()));

        self.renderer.apply(&ops);

        tracing::info!(
            created = diff.created.len(),
            updated = diff.updated.len(),
            visible = diff.order.len(),
            scheduled,
            "snapshot applied"
        );

        self.phase = if self.in_flight.is_some() {
            Phase::Fetching
        } else {
            Phase::Idle
        };

        ApplyReport {
            ops,
            created: diff.created.len(),
            updated: diff.updated.len(),
            scheduled,
            next_post: next_unlock,
            next_wake,
        }
    }
}

/// Splits posts into those due at `now` and the ids of the rest, along with
/// the earliest time among them. Posts without a readable time count as due.
fn partition_due(
    posts: Vec<Post>,
    now: DateTime<Utc>,
) -> (Vec<Post>, Vec<String>, Option<DateTime<Utc>>) {
    let mut next_unlock: Option<DateTime<Utc>> = None;
    let mut held = Vec::new();
    let due = posts
        .into_iter()
        .filter(|post| match post.timestamp() {
            Some(time) if time > now => {
                held.push(post.key());
                next_unlock = Some(next_unlock.map_or(time, |current| current.min(time)));
                false
            }
            _ => true,
        })
        .collect();
    (due, held, next_unlock)
}
