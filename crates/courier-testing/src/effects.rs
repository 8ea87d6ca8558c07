//! Recording doubles for the side-effect and scheduling seams.

use std::{
    sync::{Mutex, PoisonError},
    time::Duration,
};

use courier_delivery::{
    context::{ContextError, ContextFuture, SideEffects},
    RetryScheduler,
};

/// Side effects that remember every call.
#[derive(Debug, Default)]
pub struct RecordingSideEffects {
    clipboard: Mutex<Vec<String>>,
    notifications: Mutex<Vec<(String, String)>>,
    fail_clipboard: bool,
}

impl RecordingSideEffects {
    /// Creates a recorder whose clipboard writes succeed.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a recorder whose clipboard writes fail.
    pub fn with_failing_clipboard() -> Self {
        Self { fail_clipboard: true, ..Self::default() }
    }

    /// Texts copied so far.
    pub fn clipboard(&self) -> Vec<String> {
        self.clipboard.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// `(title, message)` pairs notified so far.
    pub fn notifications(&self) -> Vec<(String, String)> {
        self.notifications.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Waits until at least `count` clipboard writes were recorded or
    /// `timeout` passes, then returns what was recorded.
    ///
    /// Clipboard writes run on a spawned task, so they land after the send
    /// that triggered them returns.
    pub async fn wait_for_clipboard(&self, count: usize, timeout: Duration) -> Vec<String> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let copied = self.clipboard();
            if copied.len() >= count || tokio::time::Instant::now() >= deadline {
                return copied;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

impl SideEffects for RecordingSideEffects {
    fn copy_to_clipboard(&self, text: &str) -> ContextFuture<'_, ()> {
        self.clipboard.lock().unwrap_or_else(PoisonError::into_inner).push(text.to_string());
        let fail = self.fail_clipboard;
        Box::pin(async move {
            if fail {
                Err(ContextError::new("clipboard denied"))
            } else {
                Ok(())
            }
        })
    }

    fn notify(&self, title: &str, message: &str) {
        self.notifications
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((title.to_string(), message.to_string()));
    }
}

/// Scheduler that records requested delays instead of running passes.
#[derive(Debug, Default)]
pub struct RecordingScheduler {
    delays: Mutex<Vec<Duration>>,
}

impl RecordingScheduler {
    /// Creates an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every delay requested so far, oldest first.
    pub fn delays(&self) -> Vec<Duration> {
        self.delays.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl RetryScheduler for RecordingScheduler {
    fn schedule(&self, delay: Duration) {
        self.delays.lock().unwrap_or_else(PoisonError::into_inner).push(delay);
    }
}
