//! Per-call timers: the replaceable auto-hangup timer and the repeating
//! no-input tick. Timers deliver events into the session mailbox instead of
//! acting directly, so they can never interleave with a dialogue turn.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::session::SessionEvent;

#[derive(Default)]
pub struct TimerSet {
    auto_hangup: Option<JoinHandle<()>>,
    no_input: Option<JoinHandle<()>>,
}

impl TimerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// At most one pending auto-hangup per call: scheduling cancels the
    /// previous timer.
    pub fn schedule_auto_hangup(
        &mut self,
        call_id: &str,
        events_tx: mpsc::Sender<SessionEvent>,
        delay: Duration,
    ) {
        if let Some(prev) = self.auto_hangup.take() {
            prev.abort();
            debug!(call_id, "previous auto-hangup timer cancelled");
        }
        info!(call_id, delay_secs = delay.as_secs_f64(), "auto-hangup scheduled");
        self.auto_hangup = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = events_tx.send(SessionEvent::HangupTimer).await;
        }));
    }

    pub fn has_pending_auto_hangup(&self) -> bool {
        matches!(&self.auto_hangup, Some(h) if !h.is_finished())
    }

    /// Repeating silence tick; re-arming replaces the previous timer.
    pub fn arm_no_input(
        &mut self,
        call_id: &str,
        events_tx: mpsc::Sender<SessionEvent>,
        interval: Duration,
    ) {
        if let Some(prev) = self.no_input.take() {
            prev.abort();
        }
        debug!(call_id, interval_secs = interval.as_secs_f64(), "no-input timer armed");
        self.no_input = Some(tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                if events_tx.send(SessionEvent::SilenceTick).await.is_err() {
                    return;
                }
            }
        }));
    }

    pub fn cancel_all(&mut self) {
        if let Some(handle) = self.auto_hangup.take() {
            handle.abort();
        }
        if let Some(handle) = self.no_input.take() {
            handle.abort();
        }
    }
}

impl Drop for TimerSet {
    fn drop(&mut self) {
        self.cancel_all();
    }
}
