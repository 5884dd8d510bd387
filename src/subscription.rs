use std::sync::Arc;
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Utc};
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};

use crate::engine::{
    CycleOutcome, EngineOptions, FeedSyncEngine, Renderer, StatusSink, Ticket, Trigger,
};
use crate::feed::FeedSnapshot;
use crate::source::{FeedSource, FetchError};
use crate::timer::Interval;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(15);
pub const DEFAULT_RELATIVE_REFRESH: Duration = Duration::from_secs(15);

#[derive(Debug, Clone)]
pub struct Options {
    pub poll_interval: Duration,
    pub relative_refresh: Duration,
    pub engine: EngineOptions,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            relative_refresh: DEFAULT_RELATIVE_REFRESH,
            engine: EngineOptions::default(),
        }
    }
}

struct Completed {
    ticket: Ticket,
    result: Result<FeedSnapshot, FetchError>,
}

/// One live feed: an engine, the source it polls, and the timers that drive
/// it. Fetches run on a worker thread; everything else happens in
/// [`Subscription::pump`] on the caller's thread.
pub struct Subscription<R, S> {
    engine: FeedSyncEngine<R, S>,
    source: Arc<dyn FeedSource>,
    poll: Interval,
    relative: Interval,
    tx: Sender<Completed>,
    rx: Receiver<Completed>,
}

impl<R: Renderer, S: StatusSink> Subscription<R, S> {
    pub fn new(
        source: Arc<dyn FeedSource>,
        renderer: R,
        status: S,
        options: Options,
        now: DateTime<Utc>,
    ) -> Self {
        let (tx, rx) = unbounded();
        Self {
            engine: FeedSyncEngine::new(renderer, status, options.engine),
            source,
            poll: Interval::new(options.poll_interval, now),
            relative: Interval::new(options.relative_refresh, now),
            tx,
            rx,
        }
    }

    pub fn engine(&self) -> &FeedSyncEngine<R, S> {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut FeedSyncEngine<R, S> {
        &mut self.engine
    }

    pub fn source(&self) -> &Arc<dyn FeedSource> {
        &self.source
    }

    /// Applies finished fetches and runs whatever timers are due. Returns
    /// true when the renderer may have changed.
    pub fn pump(&mut self, now: DateTime<Utc>) -> bool {
        let mut changed = false;

        while let Ok(done) = self.rx.try_recv() {
            changed |= !matches!(
                self.engine.complete_cycle(done.ticket, done.result, now),
                CycleOutcome::Stale
            );
        }

        if self.poll.tick(now) {
            if let Some(ticket) = self.engine.begin_cycle(Trigger::Poll) {
                self.spawn_fetch(ticket);
            }
        }

        if let Some(ticket) = self.engine.on_wake(now) {
            self.spawn_fetch(ticket);
        }

        if self.relative.tick(now) {
            self.engine.refresh_relative(now);
            changed = true;
        }

        changed
    }

    /// Starts a fetch right away. Returns false when paused or busy.
    pub fn refresh_now(&mut self) -> bool {
        match self.engine.refresh_now() {
            Some(ticket) => {
                self.spawn_fetch(ticket);
                true
            }
            None => false,
        }
    }

    pub fn toggle_pause(&mut self) -> bool {
        self.engine.toggle_pause()
    }

    /// Earliest moment at which [`Subscription::pump`] has timer work to do.
    pub fn next_deadline(&self) -> Option<DateTime<Utc>> {
        [
            self.poll.deadline(),
            self.relative.deadline(),
            self.engine.wake_deadline(),
        ]
        .into_iter()
        .flatten()
        .min()
    }

    /// Blocks until the fetch in flight finishes and applies it, evaluating
    /// due posts at `now`.
    pub fn wait_for_fetch(&mut self, timeout: Duration, now: DateTime<Utc>) -> Option<CycleOutcome> {
        if !self.engine.is_fetching() {
            return None;
        }
        match self.rx.recv_timeout(timeout) {
            Ok(done) => Some(self.engine.complete_cycle(done.ticket, done.result, now)),
            Err(RecvTimeoutError::Timeout) => {
                tracing::warn!(?timeout, "feed fetch did not finish in time");
                None
            }
            Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    fn spawn_fetch(&self, ticket: Ticket) {
        let source = self.source.clone();
        let tx = self.tx.clone();
        tracing::debug!(trigger = ?ticket.trigger, source = %source.describe(), "spawning fetch");
        thread::spawn(move || {
            let result = source.fetch();
            let _ = tx.send(Completed { ticket, result });
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{RenderOp, StatusKind};
    use crate::source::StaticFeedSource;
    use chrono::TimeZone;

    #[derive(Default)]
    struct Counter {
        applies: usize,
        refreshes: usize,
    }

    impl Renderer for Counter {
        fn apply(&mut self, _ops: &[RenderOp]) {
            self.applies += 1;
        }

        fn refresh_relative(&mut self, _now: DateTime<Utc>) {
            self.refreshes += 1;
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn feed(json: &str) -> FeedSnapshot {
        FeedSnapshot::from_json(json.as_bytes()).unwrap()
    }

    fn subscription(
        source: Arc<StaticFeedSource>,
        options: Options,
    ) -> Subscription<Counter, fn(&str, StatusKind)> {
        fn ignore(_: &str, _: StatusKind) {}
        Subscription::new(
            source,
            Counter::default(),
            ignore as fn(&str, StatusKind),
            options,
            t0(),
        )
    }

    const WAIT: Duration = Duration::from_secs(5);

    #[test]
    fn first_pump_fetches_and_applies() {
        let source = Arc::new(StaticFeedSource::new(feed(
            r#"{"posts":[{"id":"a","time":"2023-12-31T23:00:00Z"}]}"#,
        )));
        let mut sub = subscription(source.clone(), Options::default());

        assert!(sub.pump(t0()));
        assert!(sub.engine().is_fetching());
        let outcome = sub.wait_for_fetch(WAIT, t0()).unwrap();
        assert!(matches!(outcome, CycleOutcome::Applied(ref r) if r.created == 1));
        assert_eq!(source.fetch_count(), 1);
        assert_eq!(sub.engine().renderer().applies, 1);
        assert_eq!(sub.engine().renderer().refreshes, 1);

        assert!(!sub.pump(t0() + chrono::Duration::seconds(1)));
        assert!(!sub.engine().is_fetching());
    }

    #[test]
    fn poll_interval_drives_next_fetch() {
        let source = Arc::new(StaticFeedSource::new(FeedSnapshot::default()));
        let mut sub = subscription(
            source.clone(),
            Options {
                poll_interval: Duration::from_secs(30),
                relative_refresh: Duration::from_secs(600),
                ..Options::default()
            },
        );
        sub.pump(t0());
        sub.wait_for_fetch(WAIT, t0());
        assert_eq!(
            sub.next_deadline(),
            Some(t0() + chrono::Duration::seconds(30))
        );

        sub.pump(t0() + chrono::Duration::seconds(30));
        sub.wait_for_fetch(WAIT, t0() + chrono::Duration::seconds(30));
        assert_eq!(source.fetch_count(), 2);
    }

    #[test]
    fn manual_refresh_is_skipped_while_fetching() {
        let source = Arc::new(StaticFeedSource::new(FeedSnapshot::default()));
        let mut sub = subscription(source.clone(), Options::default());
        sub.pump(t0());
        assert!(!sub.refresh_now());
        sub.wait_for_fetch(WAIT, t0());
        assert!(sub.refresh_now());
        sub.wait_for_fetch(WAIT, t0());
        assert_eq!(source.fetch_count(), 2);
    }

    #[test]
    fn wake_deadline_triggers_refetch() {
        let json = r#"{"posts":[{"id":"later","time":"2024-01-01T00:00:05Z"}]}"#;
        let source = Arc::new(StaticFeedSource::new(feed(json)));
        let mut sub = subscription(
            source.clone(),
            Options {
                poll_interval: Duration::from_secs(3600),
                relative_refresh: Duration::from_secs(3600),
                ..Options::default()
            },
        );
        sub.pump(t0());
        sub.wait_for_fetch(WAIT, t0());
        let wake = t0() + chrono::Duration::milliseconds(5500);
        assert_eq!(sub.next_deadline(), Some(wake));

        sub.pump(wake - chrono::Duration::milliseconds(1));
        assert!(!sub.engine().is_fetching());
        sub.pump(wake);
        assert!(sub.engine().is_fetching());
        let outcome = sub.wait_for_fetch(WAIT, wake).unwrap();
        assert!(matches!(outcome, CycleOutcome::Applied(ref r) if r.created == 1));
        assert_eq!(source.fetch_count(), 2);
    }

    #[test]
    fn paused_start_skips_polling() {
        let source = Arc::new(StaticFeedSource::new(FeedSnapshot::default()));
        let mut sub = subscription(
            source.clone(),
            Options {
                engine: EngineOptions {
                    start_paused: true,
                    ..EngineOptions::default()
                },
                ..Options::default()
            },
        );
        sub.pump(t0());
        assert!(!sub.engine().is_fetching());
        assert_eq!(source.fetch_count(), 0);

        assert!(!sub.toggle_pause());
        assert!(sub.refresh_now());
        sub.wait_for_fetch(WAIT, t0());
        assert_eq!(source.fetch_count(), 1);
    }

    #[test]
    fn failed_fetch_keeps_previous_render() {
        let source = Arc::new(StaticFeedSource::sequence(vec![
            Ok(feed(r#"{"posts":[{"id":"a","time":"2023-01-01T00:00:00Z"}]}"#)),
            Err("connection reset".into()),
        ]));
        let mut sub = subscription(source, Options::default());
        sub.pump(t0());
        sub.wait_for_fetch(WAIT, t0());
        assert!(sub.refresh_now());
        let outcome = sub.wait_for_fetch(WAIT, t0()).unwrap();
        assert_eq!(
            outcome,
            CycleOutcome::Failed("Fetch error: connection reset".into())
        );
        assert_eq!(sub.engine().store().len(), 1);
        assert_eq!(sub.engine().renderer().applies, 1);
    }
}
