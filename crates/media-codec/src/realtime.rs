//! Push-fed real-time frame worker
//!
//! One background thread pulls a bounded channel and hands each frame
//! to the caller's handler. The channel bound applies backpressure to
//! producers; `recv_timeout` doubles as the wake-up tick so the stop
//! flag is observed promptly even when no frames arrive.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{bounded, Sender, TrySendError};
use tracing::{debug, warn};

use forgery_detect_common::{DetectError, MediaFrame, Result};

/// Handler invoked on the worker thread for every queued frame
pub trait FrameHandler: FnMut(MediaFrame) + Send + 'static {}
impl<F: FnMut(MediaFrame) + Send + 'static> FrameHandler for F {}

const QUEUE_CAPACITY: usize = 64;
const POLL_INTERVAL: Duration = Duration::from_millis(33);

/// Running real-time worker; stopped explicitly or on drop
pub struct RealTimeProcessor {
    sender: Option<Sender<MediaFrame>>,
    worker: Option<JoinHandle<()>>,
    running: Arc<AtomicBool>,
}

impl RealTimeProcessor {
    /// Spawn the worker thread with the given frame handler
    pub fn start<F: FrameHandler>(mut handler: F) -> Self {
        let (sender, receiver) = bounded::<MediaFrame>(QUEUE_CAPACITY);
        let running = Arc::new(AtomicBool::new(true));
        let running_worker = Arc::clone(&running);

        let worker = std::thread::spawn(move || {
            debug!("real-time frame worker started");
            while running_worker.load(Ordering::SeqCst) {
                match receiver.recv_timeout(POLL_INTERVAL) {
                    Ok(frame) => handler(frame),
                    Err(crossbeam_channel::RecvTimeoutError::Timeout) => {}
                    Err(crossbeam_channel::RecvTimeoutError::Disconnected) => break,
                }
            }
            // Drain whatever was queued before the stop signal
            while let Ok(frame) = receiver.try_recv() {
                handler(frame);
            }
            debug!("real-time frame worker stopped");
        });

        Self {
            sender: Some(sender),
            worker: Some(worker),
            running,
        }
    }

    /// Queue a frame without blocking
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` when the queue is full or the worker has
    /// gone away.
    pub fn push(&self, frame: MediaFrame) -> Result<()> {
        let sender = self.sender.as_ref().ok_or_else(|| {
            DetectError::InvalidInput("real-time worker is stopped".to_string())
        })?;
        match sender.try_send(frame) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                warn!("real-time frame queue full, dropping frame");
                Err(DetectError::InvalidInput(
                    "real-time frame queue full".to_string(),
                ))
            }
            Err(TrySendError::Disconnected(_)) => Err(DetectError::InvalidInput(
                "real-time worker is stopped".to_string(),
            )),
        }
    }

    /// Signal stop, wake the worker, and join it; idempotent
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        // Dropping the sender disconnects the channel and wakes recv
        self.sender.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("real-time frame worker panicked");
            }
        }
    }
}

impl Drop for RealTimeProcessor {
    fn drop(&mut self) {
        self.shutdown();
    }
}
