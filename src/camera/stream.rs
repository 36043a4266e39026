use std::{sync::Arc, time::Duration};

use bytes::Bytes;
use tokio::{sync::broadcast, time::{self, MissedTickBehavior}};
use tokio_util::sync::CancellationToken;

use super::{Camera, Result};

/// Consecutive failed captures after which the loop gives up
pub const MAX_CONSECUTIVE_FAILURES: usize = 5;

/// Captures a frame every `interval` and publishes it to the connected video
/// clients until `shutdown` is cancelled. Nothing is captured while nobody is
/// subscribed.
pub async fn capture(
    camera: Arc<Camera>,
    frames: broadcast::Sender<Bytes>,
    interval: Duration,
    shutdown: CancellationToken,
) -> Result<()> {
    let mut interval = time::interval(interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut failures = 0;
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break Ok(()),
            _ = interval.tick() => {
                if frames.receiver_count() == 0 {
                    continue;
                }
                let camera = camera.clone();
                let result = tokio::task::spawn_blocking(move || camera.capture()).await
                    .unwrap_or_else(|error| Err(error.into()));
                match result {
                    Ok(frame) => {
                        failures = 0;
                        log::trace!("Captured frame of {} bytes", frame.len());
                        /* the last client may have left in the meantime */
                        let _ = frames.send(frame);
                    },
                    Err(error) => {
                        failures += 1;
                        log::warn!("Could not capture frame ({}/{}): {}",
                            failures, MAX_CONSECUTIVE_FAILURES, error);
                        if failures >= MAX_CONSECUTIVE_FAILURES {
                            break Err(error);
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::{Device, Error, Settings, Source, pattern::PatternSource};
    use image::RgbImage;

    struct FailingSource;

    struct FailingDevice;

    impl Device for FailingDevice {
        fn read(&mut self) -> Result<RgbImage> {
            Err(Error::EmptyFrame)
        }
    }

    impl Source for FailingSource {
        fn open(&self) -> Result<Box<dyn Device>> {
            Ok(Box::new(FailingDevice))
        }

        fn name(&self) -> String {
            "failing".to_owned()
        }
    }

    fn settings() -> Settings {
        Settings { width: 64, height: 48, ..Settings::default() }
    }

    #[tokio::test]
    async fn frames_are_published() {
        let camera = Arc::new(Camera::new(Box::new(PatternSource::new(64, 48)), settings()));
        camera.open().unwrap();
        let (frames_tx, mut frames_rx) = broadcast::channel(2);
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(capture(camera, frames_tx, Duration::from_millis(5), shutdown.clone()));
        let frame = frames_rx.recv().await.unwrap();
        assert_eq!(&frame[..2], &[0xFF, 0xD8]);
        shutdown.cancel();
        assert!(task.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn gives_up_after_repeated_failures() {
        let camera = Arc::new(Camera::new(Box::new(FailingSource), settings()));
        camera.open().unwrap();
        let (frames_tx, _frames_rx) = broadcast::channel(2);
        let result = capture(camera, frames_tx, Duration::from_millis(1), CancellationToken::new()).await;
        assert!(matches!(result, Err(Error::EmptyFrame)));
    }

    #[tokio::test]
    async fn idle_without_subscribers() {
        let camera = Arc::new(Camera::new(Box::new(FailingSource), settings()));
        camera.open().unwrap();
        let (frames_tx, frames_rx) = broadcast::channel(2);
        drop(frames_rx);
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(capture(camera, frames_tx, Duration::from_millis(1), shutdown.clone()));
        /* failures would end the loop if it captured anything */
        time::sleep(Duration::from_millis(30)).await;
        assert!(!task.is_finished());
        shutdown.cancel();
        assert!(task.await.unwrap().is_ok());
    }
}
