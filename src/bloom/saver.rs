use crate::bloom::BloomResult;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread::JoinHandle;
use std::time::Duration;

/// Background thread that persists a filter at a fixed interval
///
/// The thread exits when [`SaveTimer::stop`] is called or the timer is dropped.
pub struct SaveTimer {
    stop: Option<mpsc::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl SaveTimer {
    /// Spawns the timer; `save` runs once per `interval`
    pub fn spawn<F>(interval: Duration, save: F) -> Self
    where
        F: Fn() -> BloomResult<()> + Send + 'static,
    {
        let (stop, signal) = mpsc::channel::<()>();

        let handle = std::thread::Builder::new()
            .name("bloom-save".to_string())
            .spawn(move || loop {
                match signal.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {
                        if let Err(e) = save() {
                            tracing::error!("Periodic bloom filter save failed: {}", e);
                        }
                    }
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            });

        let handle = match handle {
            Ok(handle) => Some(handle),
            Err(e) => {
                tracing::error!("Failed to spawn bloom save thread: {}", e);
                None
            }
        };

        Self {
            stop: Some(stop),
            handle,
        }
    }

    /// Stops the thread and waits for an in-progress save to finish
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for SaveTimer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_saves_periodically_until_stopped() {
        let saves = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&saves);

        let timer = SaveTimer::spawn(Duration::from_millis(10), move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        std::thread::sleep(Duration::from_millis(100));
        timer.stop();

        let observed = saves.load(Ordering::SeqCst);
        assert!(observed >= 2, "only {} saves", observed);

        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(saves.load(Ordering::SeqCst), observed);
    }
}
