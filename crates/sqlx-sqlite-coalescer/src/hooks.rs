//! Pre/post write hooks owned by one database handle.
//!
//! Hooks run on the write path, so they must not block. Each phase keeps its callbacks in
//! registration order. Registering returns a [`HookHandle`] whose
//! [`dispose()`](HookHandle::dispose) removes exactly that callback, at most once.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::trace;

use crate::wrapper::WriteQueryResult;

/// Passed to pre hooks before a write is dispatched.
#[derive(Debug, Clone, Copy)]
pub struct PendingWrite<'a> {
   pub sql: &'a str,
}

/// Passed to post hooks once the engine has acknowledged a write.
#[derive(Debug, Clone, Copy)]
pub struct CompletedWrite<'a> {
   pub sql: &'a str,
   pub result: &'a WriteQueryResult,
}

type PreCallback = Arc<dyn Fn(&PendingWrite<'_>) + Send + Sync>;
type PostCallback = Arc<dyn Fn(&CompletedWrite<'_>) + Send + Sync>;

/// A callback together with the phase it runs in.
#[derive(Clone)]
pub enum WriteHook {
   Pre(PreCallback),
   Post(PostCallback),
}

impl WriteHook {
   /// Hook that runs before each write.
   pub fn pre<F>(f: F) -> Self
   where
      F: Fn(&PendingWrite<'_>) + Send + Sync + 'static,
   {
      Self::Pre(Arc::new(f))
   }

   /// Hook that runs after each successful write.
   pub fn post<F>(f: F) -> Self
   where
      F: Fn(&CompletedWrite<'_>) + Send + Sync + 'static,
   {
      Self::Post(Arc::new(f))
   }

   fn phase(&self) -> &'static str {
      match self {
         Self::Pre(_) => "pre",
         Self::Post(_) => "post",
      }
   }
}

impl std::fmt::Debug for WriteHook {
   fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
      f.debug_tuple("WriteHook").field(&self.phase()).finish()
   }
}

#[derive(Default)]
struct HookLists {
   pre: Vec<(u64, PreCallback)>,
   post: Vec<(u64, PostCallback)>,
}

/// Ordered pre and post hook lists.
#[derive(Default)]
pub struct HookRegistry {
   lists: Mutex<HookLists>,
   next_id: AtomicU64,
}

impl HookRegistry {
   pub fn new() -> Arc<Self> {
      Arc::new(Self::default())
   }

   /// Append `hook` to its phase and return the handle that removes it.
   pub fn register(self: &Arc<Self>, hook: WriteHook) -> HookHandle {
      let id = self.next_id.fetch_add(1, Ordering::Relaxed);
      trace!(id, phase = hook.phase(), "Registering write hook");

      let mut lists = self.lists.lock();
      match hook {
         WriteHook::Pre(f) => lists.pre.push((id, f)),
         WriteHook::Post(f) => lists.post.push((id, f)),
      }

      HookHandle {
         registry: Arc::downgrade(self),
         id,
         disposed: AtomicBool::new(false),
      }
   }

   fn remove(&self, id: u64) -> bool {
      let mut lists = self.lists.lock();
      let before = lists.pre.len() + lists.post.len();
      lists.pre.retain(|(i, _)| *i != id);
      lists.post.retain(|(i, _)| *i != id);
      before != lists.pre.len() + lists.post.len()
   }

   /// Number of registered hooks across both phases.
   pub fn len(&self) -> usize {
      let lists = self.lists.lock();
      lists.pre.len() + lists.post.len()
   }

   pub fn is_empty(&self) -> bool {
      self.len() == 0
   }

   /// Run pre hooks in registration order.
   ///
   /// The list is snapshotted first, so a hook may register or dispose hooks without
   /// deadlocking; such changes apply from the next write on.
   pub fn run_pre(&self, write: &PendingWrite<'_>) {
      let hooks: Vec<PreCallback> = self
         .lists
         .lock()
         .pre
         .iter()
         .map(|(_, f)| Arc::clone(f))
         .collect();
      for hook in hooks {
         hook(write);
      }
   }

   /// Run post hooks in registration order.
   pub fn run_post(&self, write: &CompletedWrite<'_>) {
      let hooks: Vec<PostCallback> = self
         .lists
         .lock()
         .post
         .iter()
         .map(|(_, f)| Arc::clone(f))
         .collect();
      for hook in hooks {
         hook(write);
      }
   }
}

/// Removes one registered hook.
///
/// Dropping the handle does not remove the hook.
#[derive(Debug)]
pub struct HookHandle {
   registry: Weak<HookRegistry>,
   id: u64,
   disposed: AtomicBool,
}

impl HookHandle {
   /// Remove the hook.
   ///
   /// Returns true only for the call that actually removed it. Later calls, or calls after
   /// the owning database was dropped, return false.
   pub fn dispose(&self) -> bool {
      if self.disposed.swap(true, Ordering::SeqCst) {
         return false;
      }

      match self.registry.upgrade() {
         Some(registry) => {
            let removed = registry.remove(self.id);
            trace!(id = self.id, removed, "Disposed write hook");
            removed
         }
         None => false,
      }
   }

   pub fn is_disposed(&self) -> bool {
      self.disposed.load(Ordering::SeqCst)
   }
}

#[cfg(test)]
mod tests {
   use super::*;

   fn recorder(log: &Arc<Mutex<Vec<String>>>, name: &'static str) -> WriteHook {
      let log = Arc::clone(log);
      WriteHook::pre(move |w| log.lock().push(format!("{}:{}", name, w.sql)))
   }

   #[test]
   fn test_pre_hooks_run_in_registration_order() {
      let registry = HookRegistry::new();
      let log = Arc::new(Mutex::new(Vec::new()));
      let _a = registry.register(recorder(&log, "a"));
      let _b = registry.register(recorder(&log, "b"));
      let _c = registry.register(recorder(&log, "c"));

      registry.run_pre(&PendingWrite { sql: "x" });
      assert_eq!(*log.lock(), vec!["a:x", "b:x", "c:x"]);
   }

   #[test]
   fn test_dispose_is_idempotent() {
      let registry = HookRegistry::new();
      let log = Arc::new(Mutex::new(Vec::new()));
      let a = registry.register(recorder(&log, "a"));
      let _b = registry.register(recorder(&log, "b"));

      assert!(a.dispose());
      assert!(!a.dispose());
      assert!(a.is_disposed());
      assert_eq!(registry.len(), 1);

      registry.run_pre(&PendingWrite { sql: "y" });
      assert_eq!(*log.lock(), vec!["b:y"]);
   }

   #[test]
   fn test_dispose_after_registry_dropped() {
      let registry = HookRegistry::new();
      let handle = registry.register(WriteHook::pre(|_| {}));
      drop(registry);
      assert!(!handle.dispose());
   }

   #[test]
   fn test_post_hooks_see_result() {
      let registry = HookRegistry::new();
      let seen = Arc::new(Mutex::new(Vec::new()));
      let s = Arc::clone(&seen);
      let _h = registry.register(WriteHook::post(move |w| {
         s.lock().push((w.sql.to_string(), w.result.rows_affected))
      }));

      let result = WriteQueryResult {
         rows_affected: 3,
         last_insert_id: 0,
      };
      registry.run_pre(&PendingWrite { sql: "ignored" });
      registry.run_post(&CompletedWrite {
         sql: "DELETE FROM t",
         result: &result,
      });
      assert_eq!(*seen.lock(), vec![("DELETE FROM t".to_string(), 3)]);
   }

   #[test]
   fn test_hook_may_dispose_itself() {
      let registry = HookRegistry::new();
      let slot: Arc<Mutex<Option<HookHandle>>> = Arc::new(Mutex::new(None));
      let s = Arc::clone(&slot);
      let handle = registry.register(WriteHook::pre(move |_| {
         if let Some(h) = s.lock().as_ref() {
            h.dispose();
         }
      }));
      *slot.lock() = Some(handle);

      registry.run_pre(&PendingWrite { sql: "x" });
      assert!(registry.is_empty());
   }
}
