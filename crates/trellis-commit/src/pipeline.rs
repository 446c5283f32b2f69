use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};
use trellis_refs::ActivationEngine;
use trellis_store::WriteBatch;
use trellis_types::{ObjectId, OpaqueHandle, TransactionId};

use crate::error::{CommitError, CommitResult};
use crate::listener::{CommitContext, CommitListener, CommitObserver, Committed};
use crate::set::CommitSet;
use crate::transaction::Transaction;

// ---------------------------------------------------------------------------
// CommitReport
// ---------------------------------------------------------------------------

/// Outcome of a successful commit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommitReport {
    /// Token of the committed transaction.
    pub transaction: TransactionId,
    pub added: usize,
    pub updated: usize,
    pub deleted: usize,
    /// Payload bytes written to the store.
    pub bytes_written: usize,
    /// Listeners that ran (all passed).
    pub listeners_run: usize,
    /// Wall-clock time for all three phases.
    pub elapsed: Duration,
}

impl CommitReport {
    /// Returns `true` if the commit had nothing to do.
    pub fn is_empty(&self) -> bool {
        self.added + self.updated + self.deleted == 0
    }
}

// ---------------------------------------------------------------------------
// CommitPipeline
// ---------------------------------------------------------------------------

/// Runs commits for one container.
///
/// Phase 1 runs on the caller's transaction without any shared lock.
/// Phases 2 and 3 run under the store-wide commit lock, so listeners of
/// concurrent commits never interleave and batches land one at a time.
pub struct CommitPipeline {
    engine: Arc<ActivationEngine>,
    listeners: RwLock<Vec<Arc<dyn CommitListener>>>,
    observers: RwLock<Vec<Arc<dyn CommitObserver>>>,
    commit_lock: Mutex<()>,
}

impl CommitPipeline {
    pub fn new(engine: Arc<ActivationEngine>) -> Self {
        Self {
            engine,
            listeners: RwLock::new(Vec::new()),
            observers: RwLock::new(Vec::new()),
            commit_lock: Mutex::new(()),
        }
    }

    pub fn engine(&self) -> &Arc<ActivationEngine> {
        &self.engine
    }

    /// Append a listener. Names must be unique.
    pub fn register(&self, listener: Arc<dyn CommitListener>) -> CommitResult<()> {
        let mut listeners = self.listeners.write();
        if listeners.iter().any(|l| l.name() == listener.name()) {
            return Err(CommitError::DuplicateListener(listener.name().to_string()));
        }
        debug!(listener = listener.name(), "commit listener registered");
        listeners.push(listener);
        Ok(())
    }

    /// Remove a listener by name. Returns `true` if one was removed.
    pub fn deregister(&self, name: &str) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|l| l.name() != name);
        listeners.len() != before
    }

    /// Listener names in invocation order.
    pub fn listener_names(&self) -> Vec<String> {
        self.listeners
            .read()
            .iter()
            .map(|l| l.name().to_string())
            .collect()
    }

    /// Append an observer. Names must be unique.
    pub fn register_observer(&self, observer: Arc<dyn CommitObserver>) -> CommitResult<()> {
        let mut observers = self.observers.write();
        if observers.iter().any(|o| o.name() == observer.name()) {
            return Err(CommitError::DuplicateListener(observer.name().to_string()));
        }
        observers.push(observer);
        Ok(())
    }

    /// Remove an observer by name. Returns `true` if one was removed.
    pub fn deregister_observer(&self, name: &str) -> bool {
        let mut observers = self.observers.write();
        let before = observers.len();
        observers.retain(|o| o.name() != name);
        observers.len() != before
    }

    /// Commit `tx`.
    ///
    /// On a veto nothing durable changes and `tx` keeps its log, so the
    /// caller can fix the offending mutation and commit again. On success
    /// the log is cleared and `tx` gets a fresh token.
    pub fn commit(&self, tx: &mut Transaction) -> CommitResult<CommitReport> {
        let started = Instant::now();

        // Phase 1: collect.
        let write_intent = self.engine.table().dirty_ids();
        let mut set = tx.snapshot(&write_intent);
        let mut values: BTreeMap<ObjectId, OpaqueHandle> = BTreeMap::new();
        let mut batch = WriteBatch::new();
        for id in set.written() {
            let value = match tx.pending_value(id) {
                Some(value) => value.clone(),
                None => match self.engine.peek(id) {
                    Some(value) => value,
                    // Write intent dropped since the snapshot.
                    None => continue,
                },
            };
            let bytes = self
                .engine
                .codec()
                .encode(&value)
                .map_err(|e| CommitError::Encode {
                    id,
                    reason: e.to_string(),
                })?;
            batch.write(id, bytes);
            values.insert(id, value);
        }
        debug!(
            tx = %set.transaction,
            added = set.added.len(),
            updated = set.updated.len(),
            deleted = set.deleted.len(),
            "commit collected"
        );

        let _guard = self.commit_lock.lock();

        // A delete planned before another commit freed the id is dropped.
        let mut stale = Vec::new();
        for id in &set.deleted {
            if !self.engine.store().exists(*id)? {
                stale.push(*id);
            }
        }
        for id in stale {
            debug!(tx = %set.transaction, %id, "delete already applied, skipping");
            set.deleted.remove(&id);
        }
        for id in &set.deleted {
            batch.free(*id);
        }

        // Phase 2: notify.
        let listeners: Vec<Arc<dyn CommitListener>> = self.listeners.read().clone();
        let context = CommitContext::new(tx, &self.engine);
        for listener in &listeners {
            if let Err(veto) = listener.on_commit(&set, &context) {
                warn!(
                    tx = %set.transaction,
                    listener = listener.name(),
                    reason = %veto,
                    "commit vetoed"
                );
                return Err(CommitError::ConstraintViolation {
                    listener: listener.name().to_string(),
                    reason: veto.to_string(),
                });
            }
        }

        // Phase 3: apply.
        self.engine.store().apply(&batch)?;
        for (id, value) in &values {
            self.engine.install(*id, value.clone())?;
        }
        for id in &set.deleted {
            self.engine.evict(*id);
        }
        for id in tx.finish() {
            self.engine.store().release(id)?;
        }

        let observers: Vec<Arc<dyn CommitObserver>> = self.observers.read().clone();
        let committed = Committed::new(&set, &values, self.engine.codec().as_ref());
        for observer in &observers {
            observer.on_committed(&committed);
        }

        let report = CommitReport {
            transaction: set.transaction,
            added: set.added.len(),
            updated: set.updated.len(),
            deleted: set.deleted.len(),
            bytes_written: batch.payload_bytes(),
            listeners_run: listeners.len(),
            elapsed: started.elapsed(),
        };
        info!(
            tx = %report.transaction,
            added = report.added,
            updated = report.updated,
            deleted = report.deleted,
            bytes = report.bytes_written,
            "commit applied"
        );
        Ok(report)
    }

    /// Roll back `tx`: release ids allocated for its adds, drop cached
    /// values it may have made stale, and clear write intent.
    pub fn rollback(&self, tx: &mut Transaction) -> CommitResult<()> {
        let rollback = tx.rollback();
        for id in &rollback.released {
            self.engine.store().release(*id)?;
        }
        for id in &rollback.touched {
            self.engine.invalidate(*id);
        }
        for id in self.engine.table().dirty_ids() {
            self.engine.invalidate(id);
        }
        debug!(
            released = rollback.released.len(),
            touched = rollback.touched.len(),
            "transaction rolled back"
        );
        Ok(())
    }

    /// Snapshot what `tx` would commit, without committing.
    pub fn preview(&self, tx: &Transaction) -> CommitSet {
        tx.snapshot(&self.engine.table().dirty_ids())
    }
}

impl std::fmt::Debug for CommitPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommitPipeline")
            .field("listeners", &self.listener_names())
            .field("observers", &self.observers.read().len())
            .finish()
    }
}
