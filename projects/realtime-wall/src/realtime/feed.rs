use std::time::{Duration, Instant};

use crate::backend::types::RealtimeCamera;

/// Not-running reports are counted up to this value and no further.
pub const FALSE_COUNT_CAP: u8 = 10;
/// Consecutive not-running reports needed before a live feed is considered down.
pub const NOT_RUNNING_GRACE: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamHandle {
    pub epoch: u64,
    pub connected_at: Instant,
}

/// Client-side view of one camera's liveness and live connection.
#[derive(Debug, Clone)]
pub struct FeedState {
    index: u32,
    name: String,
    active: bool,
    running: bool,
    stable_running: bool,
    false_count: u8,
    epoch: u64,
    handle: Option<StreamHandle>,
}

impl FeedState {
    pub fn discovered(report: &RealtimeCamera) -> Self {
        let mut feed = Self {
            index: report.index,
            name: report.display_name(),
            active: false,
            running: false,
            stable_running: false,
            false_count: 0,
            epoch: 0,
            handle: None,
        };
        feed.apply_report(report);
        feed
    }

    pub fn apply_report(&mut self, report: &RealtimeCamera) {
        self.name = report.display_name();
        self.active = report.active;
        self.record_liveness(report.running);
    }

    /// A camera missing from a registry response counts as not running.
    pub fn mark_unreported(&mut self) {
        self.record_liveness(false);
    }

    fn record_liveness(&mut self, running: bool) {
        self.running = running;
        self.false_count = if running {
            0
        } else {
            self.false_count.saturating_add(1).min(FALSE_COUNT_CAP)
        };
        self.stable_running =
            running || (self.stable_running && self.false_count < NOT_RUNNING_GRACE);
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn active(&self) -> bool {
        self.active
    }

    pub fn running(&self) -> bool {
        self.running
    }

    pub fn stable_running(&self) -> bool {
        self.stable_running
    }

    pub fn false_count(&self) -> u8 {
        self.false_count
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn handle(&self) -> Option<StreamHandle> {
        self.handle
    }

    pub fn last_connected_at(&self) -> Option<Instant> {
        self.handle.map(|handle| handle.connected_at)
    }

    pub fn is_eligible(&self) -> bool {
        self.active && self.stable_running
    }

    pub fn title(&self) -> String {
        let tag = if self.stable_running {
            "[Live]"
        } else {
            "[Not Active]"
        };
        format!("{} {tag}", self.name)
    }

    pub fn connection_token(&self, session: u64) -> String {
        format!("{session:x}-{}", self.epoch)
    }

    /// Opens a new connection epoch. Also used for forced refresh.
    pub fn connect(&mut self, now: Instant) -> u64 {
        self.epoch += 1;
        self.handle = Some(StreamHandle {
            epoch: self.epoch,
            connected_at: now,
        });
        self.epoch
    }

    /// Drops the handle and moves to a fresh epoch so late frames from the
    /// old connection no longer match.
    pub fn release(&mut self) -> u64 {
        self.handle = None;
        self.epoch += 1;
        self.epoch
    }

    pub fn needs_refresh(&self, now: Instant, window: Duration) -> bool {
        self.handle
            .is_some_and(|handle| now.saturating_duration_since(handle.connected_at) >= window)
    }

    pub fn go_offline(&mut self) {
        self.stable_running = false;
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use crate::backend::mock::camera;

    use super::{FALSE_COUNT_CAP, FeedState};

    #[test]
    fn single_missed_heartbeat_keeps_feed_live() {
        let mut feed = FeedState::discovered(&camera(0, true, true));
        assert!(feed.stable_running());

        feed.apply_report(&camera(0, true, false));
        assert!(!feed.running());
        assert!(feed.stable_running(), "one miss must be absorbed");

        feed.apply_report(&camera(0, true, false));
        assert!(!feed.stable_running(), "two misses flip the feed down");
    }

    #[test]
    fn running_report_resets_the_counter() {
        let mut feed = FeedState::discovered(&camera(0, true, true));
        feed.apply_report(&camera(0, true, false));
        feed.apply_report(&camera(0, true, true));
        assert_eq!(feed.false_count(), 0);

        feed.apply_report(&camera(0, true, false));
        assert!(feed.stable_running());
    }

    #[test]
    fn feed_discovered_down_is_not_stable() {
        let feed = FeedState::discovered(&camera(4, true, false));
        assert!(!feed.stable_running());
        assert!(!feed.is_eligible());
    }

    #[test]
    fn false_counter_is_capped() {
        let mut feed = FeedState::discovered(&camera(0, true, false));
        for _ in 0..30 {
            feed.mark_unreported();
        }
        assert_eq!(feed.false_count(), FALSE_COUNT_CAP);
    }

    #[test]
    fn inactive_feed_is_not_eligible() {
        let feed = FeedState::discovered(&camera(1, false, true));
        assert!(feed.stable_running());
        assert!(!feed.is_eligible());
    }

    #[test]
    fn connect_and_release_advance_the_epoch() {
        let mut feed = FeedState::discovered(&camera(2, true, true));
        let now = Instant::now();

        assert_eq!(feed.connect(now), 1);
        assert_eq!(feed.handle().map(|handle| handle.epoch), Some(1));
        assert_eq!(feed.connection_token(0xab), "ab-1");

        assert_eq!(feed.release(), 2);
        assert!(feed.handle().is_none());
        assert!(feed.last_connected_at().is_none());
    }

    #[test]
    fn refresh_is_due_only_after_the_window() {
        let mut feed = FeedState::discovered(&camera(2, true, true));
        let window = Duration::from_secs(25);
        let t0 = Instant::now();
        feed.connect(t0);

        assert!(!feed.needs_refresh(t0 + Duration::from_secs(24), window));
        assert!(feed.needs_refresh(t0 + window, window));
    }

    #[test]
    fn title_reflects_debounced_liveness() {
        let mut feed = FeedState::discovered(&camera(0, true, true));
        assert_eq!(feed.title(), "Cam 0 [Live]");
        feed.go_offline();
        assert_eq!(feed.title(), "Cam 0 [Not Active]");
    }
}
