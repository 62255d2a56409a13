//! A cloneable handle for poking the engine from external code.

use parking_lot::Mutex;
use std::fmt;
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

/// What is currently keeping the engine from accepting a new send
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusyReason {
    Sending,
    Recording,
    ProcessingImage,
}

impl fmt::Display for BusyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BusyReason::Sending => f.write_str("a message is being sent"),
            BusyReason::Recording => f.write_str("recording is in progress"),
            BusyReason::ProcessingImage => f.write_str("an image is being processed"),
        }
    }
}

/// A cloneable handle for poking the engine from external code.
///
/// All fields are `Arc`-wrapped, so cloning is cheap.
#[derive(Clone)]
pub struct EngineHandle {
    pub(crate) cancel: Arc<Mutex<CancellationToken>>,
    sending: Arc<AtomicBool>,
    recording: Arc<AtomicBool>,
    processing_image: Arc<AtomicBool>,
}

impl EngineHandle {
    pub(crate) fn new() -> Self {
        Self {
            cancel: Arc::new(Mutex::new(CancellationToken::new())),
            sending: Arc::new(AtomicBool::new(false)),
            recording: Arc::new(AtomicBool::new(false)),
            processing_image: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Abort the active stream or recording.
    pub fn abort(&self) {
        self.cancel.lock().cancel();
    }

    /// Replace the cancellation token with a fresh one and return it.
    pub(crate) fn reset_cancel(&self) -> CancellationToken {
        let token = CancellationToken::new();
        *self.cancel.lock() = token.clone();
        token
    }

    fn flag(&self, reason: BusyReason) -> &AtomicBool {
        match reason {
            BusyReason::Sending => &self.sending,
            BusyReason::Recording => &self.recording,
            BusyReason::ProcessingImage => &self.processing_image,
        }
    }

    /// The first reason the engine is busy, if any.
    pub fn busy_reason(&self) -> Option<BusyReason> {
        [
            BusyReason::Sending,
            BusyReason::Recording,
            BusyReason::ProcessingImage,
        ]
        .into_iter()
        .find(|reason| self.flag(*reason).load(Ordering::Acquire))
    }

    /// Whether a send would currently be rejected.
    pub fn is_busy(&self) -> bool {
        self.busy_reason().is_some()
    }

    /// Mark the engine busy for `reason` until the guard drops.
    ///
    /// Fails if any busy flag is already set.
    pub fn try_begin(&self, reason: BusyReason) -> Result<BusyGuard> {
        if let Some(current) = self.busy_reason() {
            return Err(Error::Busy(current));
        }
        if self
            .flag(reason)
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(Error::Busy(reason));
        }
        Ok(BusyGuard {
            handle: self.clone(),
            reason,
        })
    }
}

/// Clears its busy flag on drop
pub struct BusyGuard {
    handle: EngineHandle,
    reason: BusyReason,
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.handle.flag(self.reason).store(false, Ordering::Release);
    }
}
