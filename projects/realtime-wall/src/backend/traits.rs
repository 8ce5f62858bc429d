use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;

use super::types::{ManagedCamera, RealtimeCamera};

#[async_trait]
pub trait RealtimeBackend: Send + Sync {
    async fn list_cameras(&self) -> Result<Vec<RealtimeCamera>>;
    async fn start_all(&self) -> Result<()>;
    async fn stop_all(&self) -> Result<()>;
    async fn list_managed_cameras(&self) -> Result<Vec<ManagedCamera>>;
    async fn stop_camera(&self, id: &str) -> Result<()>;
    async fn open_stream(&self, index: u32, token: &str) -> Result<Box<dyn LiveStream>>;
    async fn snapshot(&self, index: u32) -> Result<Bytes>;
}

/// An open upstream live-image transport.
#[async_trait]
pub trait LiveStream: Send {
    fn content_type(&self) -> &str;

    /// `Ok(None)` once the upstream closed the stream.
    async fn next_chunk(&mut self) -> Result<Option<Bytes>>;
}
