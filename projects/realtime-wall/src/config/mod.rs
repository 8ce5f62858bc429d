use std::{env, net::SocketAddr, time::Duration};

use anyhow::{Context, bail};

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub app_name: String,
    pub bind_addr: SocketAddr,
    pub backend_url: String,
    pub backend_timeout: Duration,
    pub max_streams: usize,
    pub ramp_step: Duration,
    pub stream_refresh: Duration,
    pub poll_interval: Duration,
    pub reevaluate_interval: Duration,
}

fn positive_var(key: &str) -> Option<u64> {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .filter(|v| *v > 0)
}

fn millis_var(key: &str, default_ms: u64) -> Duration {
    Duration::from_millis(positive_var(key).unwrap_or(default_ms))
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let app_name = env::var("APP_NAME").unwrap_or_else(|_| "Realtime Wall".to_owned());
        let bind_addr = env::var("BIND_ADDR")
            .unwrap_or_else(|_| "0.0.0.0:8080".to_owned())
            .parse::<SocketAddr>()
            .context("BIND_ADDR must be a socket address")?;
        let backend_url = env::var("BACKEND_URL")
            .ok()
            .map(|v| v.trim().trim_end_matches('/').to_owned())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| "http://127.0.0.1:8000".to_owned());
        let backend_timeout = Duration::from_secs(positive_var("BACKEND_TIMEOUT_SECS").unwrap_or(10));

        let max_streams = match env::var("MAX_STREAMS") {
            Ok(raw) => {
                let value = raw
                    .trim()
                    .parse::<usize>()
                    .with_context(|| format!("MAX_STREAMS is not a number: {raw}"))?;
                if value == 0 {
                    bail!("MAX_STREAMS must allow at least one stream");
                }
                value
            }
            Err(_) => 4,
        };

        Ok(Self {
            app_name,
            bind_addr,
            backend_url,
            backend_timeout,
            max_streams,
            ramp_step: millis_var("RAMP_STEP_MS", 1500),
            stream_refresh: millis_var("STREAM_REFRESH_MS", 25_000),
            poll_interval: millis_var("POLL_MS", 4000),
            reevaluate_interval: millis_var("REEVALUATE_MS", 3000),
        })
    }
}
