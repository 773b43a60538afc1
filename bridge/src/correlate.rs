//! Correlation of unsolicited per-file diagnostic publishes to waiting calls.
//!
//! Responses to requests we issued are matched by id in the session; this
//! ledger handles the other half of the protocol: engine-initiated
//! notifications keyed by file path. A waiter resolves on the first publish
//! for its file carried out at or after the waiter's issue instant;
//! anything published earlier is stale and must never satisfy a newer wait.
//!
//! Invariant: at most one waiter entry per file. A second wait for the same
//! file joins the existing entry, adopting its issue instant; both callers
//! resolve from the same next publish.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Instant;

use cpplens_types::Diagnostic;
use tokio::sync::oneshot;

pub(crate) struct PublishedSet {
    pub at: Instant,
    pub items: Vec<Diagnostic>,
}

struct FileWaiter {
    issued_at: Instant,
    /// Expired entries are reaped opportunistically; the per-call timeout
    /// is enforced by the caller, this only bounds table growth.
    deadline: Instant,
    slots: Vec<oneshot::Sender<Vec<Diagnostic>>>,
}

#[derive(Default)]
pub(crate) struct DiagnosticsLedger {
    waiters: HashMap<PathBuf, FileWaiter>,
    published: HashMap<PathBuf, PublishedSet>,
}

impl DiagnosticsLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a wait for the next publish for `path`.
    ///
    /// Joins the existing waiter if one is pending for the same file,
    /// extending its purge deadline to the later of the two.
    pub fn register(
        &mut self,
        path: &Path,
        now: Instant,
        deadline: Instant,
    ) -> oneshot::Receiver<Vec<Diagnostic>> {
        self.purge_expired(now);

        let (tx, rx) = oneshot::channel();
        match self.waiters.get_mut(path) {
            Some(waiter) => {
                waiter.deadline = waiter.deadline.max(deadline);
                waiter.slots.push(tx);
            }
            None => {
                self.waiters.insert(
                    path.to_path_buf(),
                    FileWaiter {
                        issued_at: now,
                        deadline,
                        slots: vec![tx],
                    },
                );
            }
        }
        rx
    }

    /// Record a published diagnostic set and resolve a matching waiter.
    ///
    /// An empty `items` is a valid resolution (the file is clean). A publish
    /// older than the waiter's issue instant updates the stored set but
    /// leaves the waiter pending.
    pub fn publish(&mut self, path: &Path, items: Vec<Diagnostic>, published_at: Instant) {
        let resolves_wait = self
            .waiters
            .get(path)
            .is_some_and(|w| w.issued_at <= published_at);

        if resolves_wait
            && let Some(waiter) = self.waiters.remove(path)
        {
            for slot in waiter.slots {
                // A closed slot means the caller abandoned the wait; that is
                // its loss, not an error.
                let _ = slot.send(items.clone());
            }
        }

        self.published.insert(
            path.to_path_buf(),
            PublishedSet {
                at: published_at,
                items,
            },
        );
    }

    /// The most recently published set for a file, if any.
    pub fn latest(&self, path: &Path) -> Option<&PublishedSet> {
        self.published.get(path)
    }

    /// Drop every waiter. Receivers observe the closed channel immediately,
    /// so calls pending against a dead session fail fast instead of hanging
    /// out their full deadline.
    pub fn fail_all_waiters(&mut self) {
        self.waiters.clear();
    }

    /// Reap expired entries and slots whose caller has gone away.
    pub fn purge_expired(&mut self, now: Instant) {
        self.waiters.retain(|_, waiter| {
            waiter.slots.retain(|slot| !slot.is_closed());
            !waiter.slots.is_empty() && waiter.deadline >= now
        });
    }

    #[cfg(test)]
    pub fn has_waiter(&self, path: &Path) -> bool {
        self.waiters.contains_key(path)
    }
}
