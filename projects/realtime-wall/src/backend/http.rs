use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, Response, Url, header::CONTENT_TYPE};

use super::{
    traits::{LiveStream, RealtimeBackend},
    types::{ManagedCamera, RealtimeCamera},
};

pub const DEFAULT_STREAM_CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=frame";

/// Client for the detection backend's realtime and camera-management API.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    base_url: Url,
    client: Client,
    stream_client: Client,
}

impl HttpBackend {
    pub fn new(base_url: &str, request_timeout: Duration) -> Result<Self> {
        let base_url = Url::parse(base_url.trim_end_matches('/'))
            .with_context(|| format!("invalid backend url: {base_url}"))?;
        if base_url.cannot_be_a_base() {
            bail!("backend url cannot be used as a base: {base_url}");
        }

        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .context("failed to build backend http client")?;
        // Live streams never finish on their own, so only the connect phase is bounded.
        let stream_client = Client::builder()
            .connect_timeout(request_timeout)
            .build()
            .context("failed to build backend stream client")?;

        Ok(Self {
            base_url,
            client,
            stream_client,
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| anyhow!("backend url cannot be used as a base: {}", self.base_url))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    pub fn stream_url(&self, index: u32, token: &str) -> Result<Url> {
        let mut url = self.endpoint(&["api", "realtime", &index.to_string(), "stream"])?;
        url.set_query(Some(&format!("v={token}")));
        Ok(url)
    }

    async fn post_command(&self, url: Url, what: &str) -> Result<()> {
        let response = self
            .client
            .post(url)
            .send()
            .await
            .with_context(|| format!("failed to send {what} request"))?;
        ensure_success(response, what).await?;
        Ok(())
    }
}

async fn ensure_success(response: Response, what: &str) -> Result<Response> {
    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        bail!("{what} failed status={status} body={body}");
    }
    Ok(response)
}

#[async_trait]
impl RealtimeBackend for HttpBackend {
    async fn list_cameras(&self) -> Result<Vec<RealtimeCamera>> {
        let url = self.endpoint(&["api", "realtime", "cameras"])?;
        let response = self
            .client
            .get(url)
            .send()
            .await
            .context("failed to request realtime camera registry")?;
        let cameras = ensure_success(response, "camera registry")
            .await?
            .json::<Option<Vec<RealtimeCamera>>>()
            .await
            .context("camera registry returned malformed json")?;
        Ok(cameras.unwrap_or_default())
    }

    async fn start_all(&self) -> Result<()> {
        let url = self.endpoint(&["api", "realtime", "start-all"])?;
        self.post_command(url, "start-all").await
    }

    async fn stop_all(&self) -> Result<()> {
        let url = self.endpoint(&["api", "realtime", "stop-all"])?;
        self.post_command(url, "stop-all").await
    }

    async fn list_managed_cameras(&self) -> Result<Vec<ManagedCamera>> {
        let url = self.endpoint(&["api", "cameras", "manage"])?;
        let response = self
            .client
            .get(url)
            .send()
            .await
            .context("failed to request managed camera list")?;
        let cameras = ensure_success(response, "managed camera list")
            .await?
            .json::<Option<Vec<ManagedCamera>>>()
            .await
            .context("managed camera list returned malformed json")?;
        Ok(cameras.unwrap_or_default())
    }

    async fn stop_camera(&self, id: &str) -> Result<()> {
        let url = self.endpoint(&["api", "cameras", "manage", id, "stop"])?;
        self.post_command(url, "camera stop").await
    }

    async fn open_stream(&self, index: u32, token: &str) -> Result<Box<dyn LiveStream>> {
        let url = self.stream_url(index, token)?;
        let response = self
            .stream_client
            .get(url)
            .send()
            .await
            .with_context(|| format!("failed to open stream for camera {index}"))?;
        let response = ensure_success(response, "camera stream").await?;
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or(DEFAULT_STREAM_CONTENT_TYPE)
            .to_owned();

        Ok(Box::new(HttpLiveStream {
            response,
            content_type,
        }))
    }

    async fn snapshot(&self, index: u32) -> Result<Bytes> {
        let url = self.endpoint(&["api", "realtime", &index.to_string(), "snapshot.jpg"])?;
        let response = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("failed to request snapshot for camera {index}"))?;
        ensure_success(response, "camera snapshot")
            .await?
            .bytes()
            .await
            .context("failed to read snapshot body")
    }
}

struct HttpLiveStream {
    response: Response,
    content_type: String,
}

#[async_trait]
impl LiveStream for HttpLiveStream {
    fn content_type(&self) -> &str {
        &self.content_type
    }

    async fn next_chunk(&mut self) -> Result<Option<Bytes>> {
        self.response
            .chunk()
            .await
            .context("camera stream read failed")
    }
}
