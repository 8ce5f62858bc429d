use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use super::traits::RealtimeBackend;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopAllOutcome {
    Bulk,
    PerCamera { attempted: usize, stopped: usize },
    Unavailable,
}

/// Stops every camera. Falls back to per-camera stops when the bulk command
/// fails; individual failures in the fallback are ignored.
pub async fn stop_all_cameras(backend: Arc<dyn RealtimeBackend>) -> StopAllOutcome {
    let bulk_error = match backend.stop_all().await {
        Ok(()) => {
            info!("bulk stop-all accepted");
            return StopAllOutcome::Bulk;
        }
        Err(err) => err,
    };
    warn!("bulk stop-all failed, stopping cameras one by one: {bulk_error:#}");

    let cameras = match backend.list_managed_cameras().await {
        Ok(cameras) => cameras,
        Err(err) => {
            error!("stop-all fallback could not list cameras: {err:#}");
            return StopAllOutcome::Unavailable;
        }
    };

    let attempted = cameras.len();
    let mut stops = JoinSet::new();
    for camera in cameras {
        let backend = backend.clone();
        stops.spawn(async move {
            let result = backend.stop_camera(&camera.id).await;
            (camera.id, result)
        });
    }

    let mut stopped = 0;
    while let Some(joined) = stops.join_next().await {
        match joined {
            Ok((_, Ok(()))) => stopped += 1,
            Ok((id, Err(err))) => debug!("ignoring stop failure for camera {id}: {err:#}"),
            Err(err) => warn!("camera stop task failed: {err}"),
        }
    }

    info!("stop-all fallback stopped {stopped} of {attempted} cameras");
    StopAllOutcome::PerCamera { attempted, stopped }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::backend::mock::{MockBackend, camera, managed};

    use super::{StopAllOutcome, stop_all_cameras};

    #[tokio::test]
    async fn bulk_stop_skips_fallback() {
        let backend = MockBackend::with_cameras(vec![camera(0, true, true)]);
        backend.set_managed(vec![managed("CAM-1")]);

        let outcome = stop_all_cameras(Arc::new(backend.clone())).await;

        assert_eq!(outcome, StopAllOutcome::Bulk);
        assert!(backend.stopped().is_empty());
    }

    #[tokio::test]
    async fn failed_bulk_stop_falls_back_to_each_camera() {
        let backend = MockBackend::default();
        backend.fail_stop_all();
        backend.set_managed(vec![managed("CAM-1"), managed("CAM-2"), managed("CAM-3")]);

        let outcome = stop_all_cameras(Arc::new(backend.clone())).await;

        assert_eq!(
            outcome,
            StopAllOutcome::PerCamera {
                attempted: 3,
                stopped: 3
            }
        );
        assert_eq!(backend.stopped(), vec!["CAM-1", "CAM-2", "CAM-3"]);
    }

    #[tokio::test]
    async fn individual_stop_failures_are_swallowed() {
        let backend = MockBackend::default();
        backend.fail_stop_all();
        backend.set_managed(vec![managed("CAM-1"), managed("CAM-2")]);
        backend.fail_stop_for("CAM-1");

        let outcome = stop_all_cameras(Arc::new(backend.clone())).await;

        assert_eq!(
            outcome,
            StopAllOutcome::PerCamera {
                attempted: 2,
                stopped: 1
            }
        );
        assert_eq!(backend.stopped(), vec!["CAM-2"]);
    }
}
