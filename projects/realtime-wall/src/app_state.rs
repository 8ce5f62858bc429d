use std::{collections::HashMap, sync::Arc};

use bytes::Bytes;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};

use crate::{backend::traits::RealtimeBackend, config::AppConfig, realtime::driver::WallHandle};

pub struct AppState {
    pub config: AppConfig,
    pub wall: WallHandle,
    pub backend: Arc<dyn RealtimeBackend>,
    latest_frames: Mutex<HashMap<u32, Bytes>>,
    stream_slots: Mutex<HashMap<u32, (String, Arc<Semaphore>)>>,
}

impl AppState {
    pub fn new(config: AppConfig, wall: WallHandle, backend: Arc<dyn RealtimeBackend>) -> Self {
        Self {
            config,
            wall,
            backend,
            latest_frames: Mutex::new(HashMap::new()),
            stream_slots: Mutex::new(HashMap::new()),
        }
    }

    /// Claims the single proxy slot of a feed for one connection token.
    /// A newer token gets a fresh slot, so a superseded proxy that is still
    /// shutting down never blocks its successor.
    pub async fn claim_stream(&self, index: u32, token: &str) -> Option<OwnedSemaphorePermit> {
        let mut slots = self.stream_slots.lock().await;
        let slot = match slots.get(&index) {
            Some((held, slot)) if held == token => slot.clone(),
            _ => {
                let slot = Arc::new(Semaphore::new(1));
                slots.insert(index, (token.to_owned(), slot.clone()));
                slot
            }
        };
        slot.try_acquire_owned().ok()
    }

    pub async fn set_latest_frame(&self, index: u32, frame: Bytes) {
        let mut frames = self.latest_frames.lock().await;
        frames.insert(index, frame);
    }

    pub async fn latest_frame(&self, index: u32) -> Option<Bytes> {
        let frames = self.latest_frames.lock().await;
        frames.get(&index).cloned()
    }

    pub async fn clear_latest_frame(&self, index: u32) {
        let mut frames = self.latest_frames.lock().await;
        frames.remove(&index);
    }
}
