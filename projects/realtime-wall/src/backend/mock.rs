use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
};

use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;
use bytes::Bytes;

use super::{
    traits::{LiveStream, RealtimeBackend},
    types::{ManagedCamera, RealtimeCamera},
};

#[derive(Default)]
struct MockInner {
    cameras: Vec<RealtimeCamera>,
    managed: Vec<ManagedCamera>,
    registry_down: bool,
    stop_all_fails: bool,
    failing_stops: Vec<String>,
    stopped: Vec<String>,
    start_all_calls: usize,
    stream_chunks: Vec<Bytes>,
    streams_stay_open: bool,
    streams_opened: usize,
    snapshot: Option<Bytes>,
}

/// In-memory backend used by unit tests across the crate.
#[derive(Clone, Default)]
pub struct MockBackend {
    inner: Arc<Mutex<MockInner>>,
}

impl MockBackend {
    pub fn with_cameras(cameras: Vec<RealtimeCamera>) -> Self {
        let backend = Self::default();
        backend.set_cameras(cameras);
        backend
    }

    fn inner(&self) -> std::sync::MutexGuard<'_, MockInner> {
        self.inner.lock().expect("mock backend mutex poisoned")
    }

    pub fn set_cameras(&self, cameras: Vec<RealtimeCamera>) {
        self.inner().cameras = cameras;
    }

    pub fn set_managed(&self, managed: Vec<ManagedCamera>) {
        self.inner().managed = managed;
    }

    pub fn set_registry_down(&self, down: bool) {
        self.inner().registry_down = down;
    }

    pub fn fail_stop_all(&self) {
        self.inner().stop_all_fails = true;
    }

    pub fn fail_stop_for(&self, id: &str) {
        self.inner().failing_stops.push(id.to_owned());
    }

    pub fn set_stream_chunks(&self, chunks: Vec<Bytes>) {
        self.inner().stream_chunks = chunks;
    }

    /// Streams keep pending after their chunks run out instead of ending.
    pub fn keep_streams_open(&self) {
        self.inner().streams_stay_open = true;
    }

    pub fn streams_opened(&self) -> usize {
        self.inner().streams_opened
    }

    pub fn set_snapshot(&self, jpeg: Bytes) {
        self.inner().snapshot = Some(jpeg);
    }

    pub fn stopped(&self) -> Vec<String> {
        let mut stopped = self.inner().stopped.clone();
        stopped.sort();
        stopped
    }

    pub fn start_all_calls(&self) -> usize {
        self.inner().start_all_calls
    }
}

pub fn camera(index: u32, active: bool, running: bool) -> RealtimeCamera {
    RealtimeCamera {
        index,
        name: Some(format!("Cam {index}")),
        active,
        running,
    }
}

pub fn managed(id: &str) -> ManagedCamera {
    ManagedCamera {
        id: id.to_owned(),
        location: format!("{id} location"),
        status: "Active".to_owned(),
        last: String::new(),
    }
}

#[async_trait]
impl RealtimeBackend for MockBackend {
    async fn list_cameras(&self) -> Result<Vec<RealtimeCamera>> {
        let inner = self.inner();
        if inner.registry_down {
            bail!("registry unreachable");
        }
        Ok(inner.cameras.clone())
    }

    async fn start_all(&self) -> Result<()> {
        let mut inner = self.inner();
        inner.start_all_calls += 1;
        for camera in inner.cameras.iter_mut().filter(|camera| camera.active) {
            camera.running = true;
        }
        Ok(())
    }

    async fn stop_all(&self) -> Result<()> {
        let mut inner = self.inner();
        if inner.stop_all_fails {
            bail!("stop-all failed status=500 Internal Server Error body=");
        }
        for camera in inner.cameras.iter_mut() {
            camera.running = false;
        }
        Ok(())
    }

    async fn list_managed_cameras(&self) -> Result<Vec<ManagedCamera>> {
        Ok(self.inner().managed.clone())
    }

    async fn stop_camera(&self, id: &str) -> Result<()> {
        let mut inner = self.inner();
        if inner.failing_stops.iter().any(|failing| failing == id) {
            bail!("camera stop failed status=404 Not Found body=");
        }
        inner.stopped.push(id.to_owned());
        Ok(())
    }

    async fn open_stream(&self, index: u32, _token: &str) -> Result<Box<dyn LiveStream>> {
        let mut inner = self.inner();
        if !inner.cameras.iter().any(|camera| camera.index == index) {
            bail!("camera {index} not found");
        }
        inner.streams_opened += 1;
        Ok(Box::new(MockStream {
            chunks: inner.stream_chunks.iter().cloned().collect(),
            stay_open: inner.streams_stay_open,
        }))
    }

    async fn snapshot(&self, index: u32) -> Result<Bytes> {
        self.inner()
            .snapshot
            .clone()
            .ok_or_else(|| anyhow!("no frame yet for camera {index}"))
    }
}

struct MockStream {
    chunks: VecDeque<Bytes>,
    stay_open: bool,
}

#[async_trait]
impl LiveStream for MockStream {
    fn content_type(&self) -> &str {
        super::http::DEFAULT_STREAM_CONTENT_TYPE
    }

    async fn next_chunk(&mut self) -> Result<Option<Bytes>> {
        match self.chunks.pop_front() {
            Some(chunk) => Ok(Some(chunk)),
            None if self.stay_open => std::future::pending::<Result<Option<Bytes>>>().await,
            None => Ok(None),
        }
    }
}
