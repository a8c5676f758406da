use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use serde::Serialize;

use super::PipelineError;

/// Lifecycle of a single run.
///
/// ```text
/// Idle -> Reading -> Draining -> Done
///            |           |
///            +-----------+--> Aborted | Cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Idle,
    Reading,
    Draining,
    Done,
    Aborted,
    Cancelled,
}

impl PipelineState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineState::Idle => "idle",
            PipelineState::Reading => "reading",
            PipelineState::Draining => "draining",
            PipelineState::Done => "done",
            PipelineState::Aborted => "aborted",
            PipelineState::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// First fatal error raised by any stage. Later errors are dropped.
#[derive(Debug, Default)]
pub(crate) struct AbortFlag {
    raised: AtomicBool,
    error: Mutex<Option<PipelineError>>,
}

impl AbortFlag {
    pub(crate) fn raise(&self, err: PipelineError) {
        let mut slot = self.error.lock();
        if slot.is_none() {
            *slot = Some(err);
        }
        self.raised.store(true, Ordering::Release);
    }

    pub(crate) fn is_raised(&self) -> bool {
        self.raised.load(Ordering::Acquire)
    }

    pub(crate) fn take(&self) -> Option<PipelineError> {
        self.error.lock().take()
    }
}
