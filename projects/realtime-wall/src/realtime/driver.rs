use std::{ops::ControlFlow, sync::Arc, time::Duration};

use anyhow::{Context, Result, anyhow};
use tokio::{
    sync::{mpsc, oneshot, watch},
    task::JoinHandle,
    time::{Instant, Interval, MissedTickBehavior, interval, interval_at},
};
use tracing::{debug, error, info};

use crate::{
    backend::{stop_all::stop_all_cameras, traits::RealtimeBackend, types::RealtimeCamera},
    config::AppConfig,
    core::state::WallSnapshot,
};

use super::allocator::{AllocatorEvent, FeedChange, StreamAllocator};

pub const LOAD_FAILURE: &str = "failed to load cameras";

#[derive(Debug, Clone, Copy)]
pub struct WallTimers {
    pub poll: Duration,
    pub ramp_step: Duration,
    pub reevaluate: Duration,
}

impl From<&AppConfig> for WallTimers {
    fn from(config: &AppConfig) -> Self {
        Self {
            poll: config.poll_interval,
            ramp_step: config.ramp_step,
            reevaluate: config.reevaluate_interval,
        }
    }
}

enum WallCommand {
    SetVisibility {
        index: u32,
        visible: bool,
        reply: oneshot::Sender<()>,
    },
    Refresh {
        reply: oneshot::Sender<()>,
    },
    StartAll {
        reply: oneshot::Sender<()>,
    },
    StopAll {
        reply: oneshot::Sender<()>,
    },
    ToggleFullscreen {
        index: u32,
        reply: oneshot::Sender<Result<Option<u32>>>,
    },
    ExitFullscreen {
        reply: oneshot::Sender<()>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

enum Completion {
    Polled {
        result: Result<Vec<RealtimeCamera>>,
        scheduled: bool,
        reply: Option<oneshot::Sender<()>>,
    },
    StoppedAll {
        reply: oneshot::Sender<()>,
    },
}

/// Cheap handle for talking to the wall driver task.
#[derive(Clone)]
pub struct WallHandle {
    commands: mpsc::Sender<WallCommand>,
    snapshots: watch::Receiver<WallSnapshot>,
}

impl WallHandle {
    pub fn snapshot(&self) -> WallSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<WallSnapshot> {
        self.snapshots.clone()
    }

    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> WallCommand) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(build(reply))
            .await
            .map_err(|_| anyhow!("wall driver has stopped"))?;
        response.await.context("wall driver dropped the request")
    }

    pub async fn set_visibility(&self, index: u32, visible: bool) -> Result<()> {
        self.request(|reply| WallCommand::SetVisibility {
            index,
            visible,
            reply,
        })
        .await
    }

    pub async fn refresh(&self) -> Result<()> {
        self.request(|reply| WallCommand::Refresh { reply }).await
    }

    pub async fn start_all(&self) -> Result<()> {
        self.request(|reply| WallCommand::StartAll { reply }).await
    }

    pub async fn stop_all(&self) -> Result<()> {
        self.request(|reply| WallCommand::StopAll { reply }).await
    }

    pub async fn toggle_fullscreen(&self, index: u32) -> Result<Option<u32>> {
        self.request(|reply| WallCommand::ToggleFullscreen { index, reply })
            .await?
    }

    pub async fn exit_fullscreen(&self) -> Result<()> {
        self.request(|reply| WallCommand::ExitFullscreen { reply })
            .await
    }

    /// Tears the wall down. Every stream handle is released before this returns.
    pub async fn shutdown(&self) -> Result<()> {
        self.request(|reply| WallCommand::Shutdown { reply }).await
    }
}

pub fn spawn_wall(
    backend: Arc<dyn RealtimeBackend>,
    allocator: StreamAllocator,
    timers: WallTimers,
) -> (WallHandle, JoinHandle<()>) {
    let (command_tx, command_rx) = mpsc::channel(64);
    let (completion_tx, completion_rx) = mpsc::unbounded_channel();
    let (snapshot_tx, snapshot_rx) = watch::channel(allocator.snapshot());

    let driver = WallDriver {
        backend,
        allocator,
        timers,
        last_error: None,
        poll_in_flight: false,
        snapshot_tx,
        completion_tx,
    };
    let task = tokio::spawn(driver.run(command_rx, completion_rx));

    (
        WallHandle {
            commands: command_tx,
            snapshots: snapshot_rx,
        },
        task,
    )
}

struct WallDriver {
    backend: Arc<dyn RealtimeBackend>,
    allocator: StreamAllocator,
    timers: WallTimers,
    last_error: Option<String>,
    poll_in_flight: bool,
    snapshot_tx: watch::Sender<WallSnapshot>,
    completion_tx: mpsc::UnboundedSender<Completion>,
}

fn delayed_interval(period: Duration) -> Interval {
    let mut timer = interval_at(Instant::now() + period, period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    timer
}

impl WallDriver {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<WallCommand>,
        mut completions: mpsc::UnboundedReceiver<Completion>,
    ) {
        // First poll tick fires immediately for the initial registry load.
        let mut poll = interval(self.timers.poll);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut ramp = delayed_interval(self.timers.ramp_step);
        let mut reevaluate = delayed_interval(self.timers.reevaluate);

        info!(
            "wall driver started (max_slots={}, ramp_step={:?})",
            self.allocator.settings().max_slots,
            self.timers.ramp_step
        );

        loop {
            tokio::select! {
                _ = poll.tick() => {
                    if !self.poll_in_flight {
                        self.spawn_poll(true, None);
                    }
                }
                _ = ramp.tick(), if self.allocator.is_ramping() => {
                    self.apply(AllocatorEvent::RampTick);
                    debug!("ramp ceiling raised to {}", self.allocator.ramp_ceiling());
                }
                _ = reevaluate.tick() => self.apply(AllocatorEvent::Reevaluate),
                Some(completion) = completions.recv() => self.on_completion(completion),
                command = commands.recv() => {
                    let Some(command) = command else {
                        self.teardown();
                        break;
                    };
                    if matches!(command, WallCommand::StartAll { .. }) {
                        ramp = delayed_interval(self.timers.ramp_step);
                    }
                    if self.on_command(command).is_break() {
                        break;
                    }
                }
            }
        }

        info!("wall driver stopped");
    }

    fn on_command(&mut self, command: WallCommand) -> ControlFlow<()> {
        match command {
            WallCommand::SetVisibility {
                index,
                visible,
                reply,
            } => {
                self.apply(AllocatorEvent::VisibilityChanged { index, visible });
                let _ = reply.send(());
            }
            WallCommand::Refresh { reply } => self.spawn_poll(false, Some(reply)),
            WallCommand::StopAll { reply } => {
                let backend = self.backend.clone();
                let completions = self.completion_tx.clone();
                tokio::spawn(async move {
                    stop_all_cameras(backend).await;
                    let _ = completions.send(Completion::StoppedAll { reply });
                });
            }
            WallCommand::ToggleFullscreen { index, reply } => {
                let result = self.allocator.toggle_fullscreen(index);
                match &result {
                    Ok(Some(index)) => info!("camera {index} promoted to fullscreen"),
                    Ok(None) => info!("fullscreen closed"),
                    Err(err) => debug!("fullscreen refused: {err}"),
                }
                self.publish();
                let _ = reply.send(result);
            }
            WallCommand::ExitFullscreen { reply } => {
                self.allocator.exit_fullscreen();
                self.publish();
                let _ = reply.send(());
            }
            WallCommand::StartAll { reply } => self.start_all(reply),
            WallCommand::Shutdown { reply } => {
                self.teardown();
                let _ = reply.send(());
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    fn start_all(&mut self, reply: oneshot::Sender<()>) {
        info!("start-all requested, restarting ramp-up");
        self.apply(AllocatorEvent::StartAll);

        let backend = self.backend.clone();
        let completions = self.completion_tx.clone();
        tokio::spawn(async move {
            if let Err(err) = backend.start_all().await {
                error!("start-all request failed: {err:#}");
            }
            let result = backend.list_cameras().await;
            let _ = completions.send(Completion::Polled {
                result,
                scheduled: false,
                reply: Some(reply),
            });
        });
    }

    fn spawn_poll(&mut self, scheduled: bool, reply: Option<oneshot::Sender<()>>) {
        if scheduled {
            self.poll_in_flight = true;
        }
        let backend = self.backend.clone();
        let completions = self.completion_tx.clone();
        tokio::spawn(async move {
            let result = backend.list_cameras().await;
            let _ = completions.send(Completion::Polled {
                result,
                scheduled,
                reply,
            });
        });
    }

    fn on_completion(&mut self, completion: Completion) {
        match completion {
            Completion::Polled {
                result,
                scheduled,
                reply,
            } => {
                if scheduled {
                    self.poll_in_flight = false;
                }
                match result {
                    Ok(cameras) => {
                        self.last_error = None;
                        self.apply(AllocatorEvent::RegistryPolled(cameras));
                    }
                    Err(err) => {
                        error!("camera registry poll failed: {err:#}");
                        self.last_error = Some(LOAD_FAILURE.to_owned());
                        self.publish();
                    }
                }
                if let Some(reply) = reply {
                    let _ = reply.send(());
                }
            }
            Completion::StoppedAll { reply } => {
                self.apply(AllocatorEvent::StopAll);
                self.spawn_poll(false, Some(reply));
            }
        }
    }

    fn teardown(&mut self) {
        self.apply(AllocatorEvent::Teardown);
        info!("wall torn down, all stream handles released");
    }

    fn apply(&mut self, event: AllocatorEvent) {
        // tokio's clock, so paused-time tests drive the staleness window too.
        let changes = self.allocator.step(event, Instant::now().into_std());
        for change in &changes {
            match change {
                FeedChange::Connected { index, epoch } => {
                    info!("camera {index} stream connected (epoch {epoch})")
                }
                FeedChange::Refreshed { index, epoch } => {
                    info!("camera {index} stream refreshed (epoch {epoch})")
                }
                FeedChange::Released { index, epoch } => {
                    info!("camera {index} stream released (epoch {epoch})")
                }
            }
        }
        self.publish();
    }

    fn publish(&self) {
        let mut snapshot = self.allocator.snapshot();
        snapshot.error = self.last_error.clone();
        self.snapshot_tx.send_replace(snapshot);
    }
}
