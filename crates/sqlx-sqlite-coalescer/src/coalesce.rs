//! Physical transaction bookkeeping and the commit timer.

use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::Notify;
use tracing::{trace, warn};

use crate::wrapper::Shared;

/// The kind of outermost scope currently open on a handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ScopeKind {
   Sync,
   Coalesced,
}

/// Coalescer state for one connection.
///
/// Only mutated while the connection's writer guard is held, so it always agrees with what
/// the engine has been told.
#[derive(Debug, Default)]
pub(crate) struct TransactionState {
   /// A BEGIN has been issued without a matching COMMIT/ROLLBACK
   pub active: bool,
   pub scope: Option<ScopeKind>,
   pub interval: Option<Duration>,
   pub timer: Option<CommitTimer>,
   /// Bumped whenever the timer is replaced or disarmed
   pub generation: u64,
   /// A scope future was dropped; its transaction must be rolled back before the next
   /// engine call
   pub abandoned: bool,
}

impl TransactionState {
   /// Nested scopes join whatever is already open.
   pub fn should_flatten(&self) -> bool {
      self.scope.is_some() || self.active
   }

   /// Whether a timer firing for `generation` may commit now.
   pub fn timer_may_commit(&self, generation: u64) -> bool {
      self.generation == generation
         && self.active
         && !self.abandoned
         && self.scope != Some(ScopeKind::Sync)
   }

   /// Replace the timer with one for `interval`, or disarm it when `None`.
   ///
   /// Returns the old timer so the caller can drop it outside the lock.
   pub fn rearm(
      &mut self,
      shared: Weak<Shared>,
      interval: Option<Duration>,
   ) -> Option<CommitTimer> {
      self.generation += 1;
      self.interval = interval;
      let old_timer = self.timer.take();
      if let Some(period) = interval {
         self.timer = Some(CommitTimer::spawn(shared, period, self.generation));
      }
      old_timer
   }

   pub fn interval_ms(&self) -> u64 {
      self
         .interval
         .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
         .unwrap_or(0)
   }
}

/// Background task that commits the open transaction one period after it was opened.
///
/// The task waits for [`signal()`](Self::signal), sleeps one period, then asks the handle
/// to commit. Dropping the timer stops the task; a commit already in flight re-checks the
/// generation under the writer guard and backs off.
#[derive(Debug)]
pub(crate) struct CommitTimer {
   signal: Arc<Notify>,
   shutdown: Arc<Notify>,
}

impl CommitTimer {
   pub fn spawn(shared: Weak<Shared>, period: Duration, generation: u64) -> Self {
      let signal = Arc::new(Notify::new());
      let shutdown = Arc::new(Notify::new());

      tokio::spawn(run_timer(
         shared,
         period,
         generation,
         Arc::clone(&signal),
         Arc::clone(&shutdown),
      ));

      trace!(?period, generation, "Armed commit timer");
      Self { signal, shutdown }
   }

   /// Start a period. A signal sent while a period is running starts the next one.
   pub fn signal(&self) {
      self.signal.notify_one();
   }
}

impl Drop for CommitTimer {
   fn drop(&mut self) {
      self.shutdown.notify_one();
   }
}

async fn run_timer(
   shared: Weak<Shared>,
   period: Duration,
   generation: u64,
   signal: Arc<Notify>,
   shutdown: Arc<Notify>,
) {
   loop {
      tokio::select! {
         biased;
         _ = shutdown.notified() => break,
         _ = signal.notified() => {}
      }

      tokio::select! {
         biased;
         _ = shutdown.notified() => break,
         _ = tokio::time::sleep(period) => {}
      }

      let Some(shared) = shared.upgrade() else {
         break;
      };

      if let Err(e) = shared.commit_from_timer(generation).await {
         warn!(generation, "timer commit failed: {}", e);
      }
   }

   trace!(generation, "Commit timer stopped");
}

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn test_should_flatten() {
      let mut state = TransactionState::default();
      assert!(!state.should_flatten());

      state.active = true;
      assert!(state.should_flatten());

      state.active = false;
      state.scope = Some(ScopeKind::Coalesced);
      assert!(state.should_flatten());
   }

   #[test]
   fn test_timer_may_commit() {
      let mut state = TransactionState {
         active: true,
         generation: 3,
         ..Default::default()
      };
      assert!(state.timer_may_commit(3));
      assert!(!state.timer_may_commit(2));

      state.scope = Some(ScopeKind::Coalesced);
      assert!(state.timer_may_commit(3));

      state.scope = Some(ScopeKind::Sync);
      assert!(!state.timer_may_commit(3));

      state.scope = None;
      state.abandoned = true;
      assert!(!state.timer_may_commit(3));

      state.abandoned = false;
      state.active = false;
      assert!(!state.timer_may_commit(3));
   }

   #[test]
   fn test_interval_ms() {
      let mut state = TransactionState::default();
      assert_eq!(state.interval_ms(), 0);
      state.interval = Some(Duration::from_millis(250));
      assert_eq!(state.interval_ms(), 250);
   }
}
