//! Decides which camera feeds may hold a live connection.
//!
//! The allocator is a plain state machine: every input (registry poll,
//! visibility change, ramp tick, bulk command, teardown) is an
//! [`AllocatorEvent`] handed to [`StreamAllocator::step`] together with the
//! current time. Each step re-runs the selection from current state and
//! returns the per-feed connection changes it made. Timers and network I/O
//! live in the driver, never here.

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
    time::{Duration, Instant},
};

use anyhow::Result;

use crate::{
    backend::types::RealtimeCamera,
    core::state::{FeedView, TileStatus, WallSnapshot},
};

use super::feed::FeedState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocatorSettings {
    /// Hard ceiling on concurrent live connections.
    pub max_slots: usize,
    /// A connection older than this gets a new token on the next re-evaluation.
    pub refresh_after: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllocatorEvent {
    RegistryPolled(Vec<RealtimeCamera>),
    VisibilityChanged { index: u32, visible: bool },
    RampTick,
    Reevaluate,
    StartAll,
    StopAll,
    Teardown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedChange {
    Connected { index: u32, epoch: u64 },
    Refreshed { index: u32, epoch: u64 },
    Released { index: u32, epoch: u64 },
}

/// Why a feed could not be promoted to fullscreen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FullscreenRefusal {
    NotFound(u32),
    NotRunning(u32),
    TornDown,
}

impl fmt::Display for FullscreenRefusal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound(index) => write!(f, "camera {index} not found"),
            Self::NotRunning(index) => write!(f, "camera {index} is not running"),
            Self::TornDown => f.write_str("wall has been torn down"),
        }
    }
}

impl std::error::Error for FullscreenRefusal {}

#[derive(Debug, Clone)]
pub struct StreamAllocator {
    settings: AllocatorSettings,
    session: u64,
    feeds: BTreeMap<u32, FeedState>,
    visible: BTreeSet<u32>,
    allocated: BTreeSet<u32>,
    ramp_ceiling: usize,
    fullscreen: Option<u32>,
    torn_down: bool,
}

impl StreamAllocator {
    /// `session` salts every connection token so tokens from a previous
    /// process never collide with the current ones.
    pub fn new(settings: AllocatorSettings, session: u64) -> Self {
        Self {
            settings: AllocatorSettings {
                max_slots: settings.max_slots.max(1),
                ..settings
            },
            session,
            feeds: BTreeMap::new(),
            visible: BTreeSet::new(),
            allocated: BTreeSet::new(),
            ramp_ceiling: 1,
            fullscreen: None,
            torn_down: false,
        }
    }

    pub fn step(&mut self, event: AllocatorEvent, now: Instant) -> Vec<FeedChange> {
        if self.torn_down {
            return Vec::new();
        }

        match event {
            AllocatorEvent::RegistryPolled(cameras) => self.merge_registry(&cameras),
            AllocatorEvent::VisibilityChanged { index, visible } => {
                // Only known feeds are tracked; clients cannot grow the set.
                if visible && self.feeds.contains_key(&index) {
                    self.visible.insert(index);
                } else {
                    self.visible.remove(&index);
                }
            }
            AllocatorEvent::RampTick => {
                if self.is_ramping() {
                    self.ramp_ceiling += 1;
                }
            }
            AllocatorEvent::Reevaluate => {}
            AllocatorEvent::StartAll => self.ramp_ceiling = 1,
            AllocatorEvent::StopAll => {
                self.fullscreen = None;
                let mut changes = self.release_all();
                changes.extend(self.reevaluate(now));
                return changes;
            }
            AllocatorEvent::Teardown => return self.teardown(),
        }

        self.reevaluate(now)
    }

    fn merge_registry(&mut self, cameras: &[RealtimeCamera]) {
        let mut reported = BTreeSet::new();
        for camera in cameras {
            reported.insert(camera.index);
            self.feeds
                .entry(camera.index)
                .and_modify(|feed| feed.apply_report(camera))
                .or_insert_with(|| FeedState::discovered(camera));
        }

        for feed in self.feeds.values_mut() {
            if !reported.contains(&feed.index()) {
                feed.mark_unreported();
            }
        }
    }

    fn reevaluate(&mut self, now: Instant) -> Vec<FeedChange> {
        let capacity = self.capacity();
        let target: BTreeSet<u32> = self
            .visible
            .iter()
            .copied()
            .filter(|index| self.feeds.contains_key(index))
            .take(capacity)
            .collect();

        let mut changes = Vec::new();
        for feed in self.feeds.values_mut() {
            let index = feed.index();
            let should_hold = target.contains(&index) && feed.is_eligible();
            match (should_hold, feed.handle().is_some()) {
                (true, false) => {
                    let epoch = feed.connect(now);
                    changes.push(FeedChange::Connected { index, epoch });
                }
                (true, true) if feed.needs_refresh(now, self.settings.refresh_after) => {
                    let epoch = feed.connect(now);
                    changes.push(FeedChange::Refreshed { index, epoch });
                }
                (false, true) => {
                    let epoch = feed.release();
                    changes.push(FeedChange::Released { index, epoch });
                }
                _ => {}
            }
        }

        self.allocated = target;
        changes
    }

    fn release_all(&mut self) -> Vec<FeedChange> {
        let mut changes = Vec::new();
        for feed in self.feeds.values_mut() {
            let had_handle = feed.handle().is_some();
            let epoch = feed.release();
            feed.go_offline();
            if had_handle {
                changes.push(FeedChange::Released {
                    index: feed.index(),
                    epoch,
                });
            }
        }
        changes
    }

    fn teardown(&mut self) -> Vec<FeedChange> {
        let changes = self.release_all();
        self.visible.clear();
        self.allocated.clear();
        self.fullscreen = None;
        self.ramp_ceiling = 1;
        self.torn_down = true;
        changes
    }

    /// Promotes a feed to fullscreen, or exits fullscreen when it already is.
    /// Returns the fullscreen feed afterwards.
    pub fn toggle_fullscreen(&mut self, index: u32) -> Result<Option<u32>> {
        if self.torn_down {
            return Err(FullscreenRefusal::TornDown.into());
        }
        let Some(feed) = self.feeds.get(&index) else {
            return Err(FullscreenRefusal::NotFound(index).into());
        };

        if self.fullscreen == Some(index) {
            self.fullscreen = None;
        } else if feed.stable_running() {
            self.fullscreen = Some(index);
        } else {
            return Err(FullscreenRefusal::NotRunning(index).into());
        }
        Ok(self.fullscreen)
    }

    pub fn exit_fullscreen(&mut self) {
        self.fullscreen = None;
    }

    pub fn capacity(&self) -> usize {
        self.ramp_ceiling.min(self.settings.max_slots)
    }

    pub fn is_ramping(&self) -> bool {
        !self.torn_down && self.ramp_ceiling < self.settings.max_slots
    }

    pub fn ramp_ceiling(&self) -> usize {
        self.ramp_ceiling
    }

    pub fn settings(&self) -> AllocatorSettings {
        self.settings
    }

    pub fn feed(&self, index: u32) -> Option<&FeedState> {
        self.feeds.get(&index)
    }

    pub fn feeds(&self) -> impl Iterator<Item = &FeedState> {
        self.feeds.values()
    }

    pub fn allocated(&self) -> &BTreeSet<u32> {
        &self.allocated
    }

    pub fn visible(&self) -> &BTreeSet<u32> {
        &self.visible
    }

    pub fn fullscreen(&self) -> Option<u32> {
        self.fullscreen
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }

    pub fn connection_token(&self, index: u32) -> Option<String> {
        self.feeds
            .get(&index)
            .map(|feed| feed.connection_token(self.session))
    }

    pub fn snapshot(&self) -> WallSnapshot {
        let feeds = self
            .feeds
            .values()
            .map(|feed| {
                let token = feed.connection_token(self.session);
                let stream_url = feed
                    .handle()
                    .map(|_| format!("/wall/{}/stream?token={token}", feed.index()));
                FeedView {
                    index: feed.index(),
                    name: feed.name().to_owned(),
                    title: feed.title(),
                    active: feed.active(),
                    running: feed.running(),
                    stable_running: feed.stable_running(),
                    status: if feed.is_eligible() {
                        TileStatus::Live
                    } else {
                        TileStatus::NotActive
                    },
                    connection_token: token,
                    stream_url,
                    fullscreen: self.fullscreen == Some(feed.index()),
                }
            })
            .collect();

        WallSnapshot {
            feeds,
            allocated: self.allocated.iter().copied().collect(),
            visible: self.visible.iter().copied().collect(),
            ramp_ceiling: self.ramp_ceiling,
            max_slots: self.settings.max_slots,
            capacity: self.capacity(),
            fullscreen: self.fullscreen,
            error: None,
            torn_down: self.torn_down,
        }
    }
}
