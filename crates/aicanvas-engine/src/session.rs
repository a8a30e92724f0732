//! Single-run bookkeeping.
//!
//! The slot holds the engine's current (or last) run state and an epoch
//! counter. A session is valid while its epoch matches the slot's; every
//! terminal transition, stop or new run advances the epoch, so late work
//! from a superseded session can always be told apart and dropped.

use tokio_util::sync::CancellationToken;

use aicanvas_core::error::{CanvasError, Result};
use aicanvas_core::types::{ExecutionState, RunId, RunStatus};

/// Handle held by a running workflow.
#[derive(Debug, Clone)]
pub struct ExecutionSession {
    pub run_id: RunId,
    pub epoch: u64,
    pub cancel: CancellationToken,
}

#[derive(Debug, Default)]
pub struct SessionSlot {
    epoch: u64,
    state: ExecutionState,
    cancel: Option<CancellationToken>,
}

impl SessionSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the slot for a new run, entering `Validating`.
    ///
    /// Fails while another run is validating or executing; that run's
    /// state is left untouched. A terminal state is discarded.
    pub fn begin(&mut self) -> Result<ExecutionSession> {
        if self.state.status.is_active() {
            let run_id = self
                .state
                .run_id
                .as_ref()
                .map(|r| r.to_string())
                .unwrap_or_default();
            return Err(CanvasError::Concurrency { run_id });
        }

        self.epoch += 1;
        let session = ExecutionSession {
            run_id: RunId::new(),
            epoch: self.epoch,
            cancel: CancellationToken::new(),
        };
        self.state = ExecutionState {
            run_id: Some(session.run_id.clone()),
            status: RunStatus::Validating,
            ..Default::default()
        };
        self.cancel = Some(session.cancel.clone());
        Ok(session)
    }

    pub fn is_current(&self, session: &ExecutionSession) -> bool {
        self.epoch == session.epoch
    }

    pub fn state(&self) -> &ExecutionState {
        &self.state
    }

    /// Apply `f` to the state if `session` still owns the slot.
    pub fn update(
        &mut self,
        session: &ExecutionSession,
        f: impl FnOnce(&mut ExecutionState),
    ) -> bool {
        if !self.is_current(session) {
            return false;
        }
        f(&mut self.state);
        true
    }

    /// Move `session`'s run to a terminal status and retire the session.
    pub fn finish(
        &mut self,
        session: &ExecutionSession,
        status: RunStatus,
        error: Option<String>,
    ) -> bool {
        if !self.is_current(session) {
            return false;
        }
        self.state.status = status;
        self.state.error = error;
        self.retire();
        true
    }

    /// Stop the active run, if any. Returns the stopped state.
    pub fn stop(&mut self) -> Option<ExecutionState> {
        if !self.state.status.is_active() {
            return None;
        }
        self.state.status = RunStatus::Stopped;
        self.retire();
        Some(self.state.clone())
    }

    /// Hand back a terminal state and return to `Idle`.
    pub fn acknowledge(&mut self) -> Option<ExecutionState> {
        if !self.state.status.is_terminal() {
            return None;
        }
        Some(std::mem::take(&mut self.state))
    }

    fn retire(&mut self) {
        self.epoch += 1;
        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
        }
    }
}
