//! Restore session manager.
//!
//! At most one [`RestoreSession`] exists at a time. While it is active every
//! `Restored` transaction in a batch is turned into a [`Purchase`] and
//! appended to the session's accumulator; nothing else is claimed. The
//! session ends on the backend's terminal signal, at which point its single
//! callback receives everything accumulated.
//!
//! # Acknowledgment
//!
//! | `atomically` | acknowledged now | `needs_finish_transaction` |
//! |--------------|------------------|----------------------------|
//! | `true`       | yes              | `false`                    |
//! | `false`      | no               | `true`                     |
//!
//! # Re-entrancy
//!
//! [`RestoreManager::finish`] and [`RestoreManager::fail`] take the session
//! out of its slot *before* the callback is scheduled. A callback that begins
//! a new restore therefore lands in an empty slot and is not overwritten by a
//! reset afterwards.

use std::fmt;

use tracing::{debug, info, warn};

use crate::error::{Admission, Rejection, StoreError, TransactionError};
use crate::pipeline::{BatchEffects, Dispatch, RestoreCallback, Stage};
use crate::types::{Purchase, RestoreOutcome, Transaction, TransactionState};

/// An in-flight restoration request.
pub struct RestoreSession {
    pub atomically: bool,
    pub app_user_name: Option<String>,
    callback: RestoreCallback,
    accumulated: Vec<RestoreOutcome>,
}

impl RestoreSession {
    pub fn new<F>(atomically: bool, callback: F) -> Self
    where
        F: FnOnce(Vec<RestoreOutcome>) + Send + 'static,
    {
        Self {
            atomically,
            app_user_name: None,
            callback: Box::new(callback),
            accumulated: Vec::new(),
        }
    }

    pub fn with_app_user_name(mut self, name: impl Into<String>) -> Self {
        self.app_user_name = Some(name.into());
        self
    }

    pub fn accumulated(&self) -> &[RestoreOutcome] {
        &self.accumulated
    }
}

impl fmt::Debug for RestoreSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RestoreSession")
            .field("atomically", &self.atomically)
            .field("app_user_name", &self.app_user_name)
            .field("accumulated", &self.accumulated.len())
            .finish_non_exhaustive()
    }
}

/// Singleton slot for the active restore session.
#[derive(Debug, Default)]
pub struct RestoreManager {
    active: Option<RestoreSession>,
}

impl RestoreManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    pub fn session(&self) -> Option<&RestoreSession> {
        self.active.as_ref()
    }

    /// Install `session` unless one is already active. A rejected session
    /// is dropped without its callback ever firing.
    pub fn begin(&mut self, session: RestoreSession) -> Admission {
        if self.active.is_some() {
            warn!("restore requested while a session is active; ignored");
            return Admission::Rejected(Rejection::SessionAlreadyActive);
        }
        info!(
            atomically = session.atomically,
            has_app_user_name = session.app_user_name.is_some(),
            "restore session started"
        );
        self.active = Some(session);
        Admission::Accepted
    }

    /// Claim `Restored` transactions for the active session. Returns the
    /// residue; everything is residue when no session is active.
    pub fn process_batch(
        &mut self,
        transactions: Vec<Transaction>,
        effects: &mut BatchEffects,
    ) -> Vec<Transaction> {
        let Some(session) = self.active.as_mut() else {
            return transactions;
        };

        let atomically = session.atomically;
        let mut residue = Vec::new();
        for txn in transactions {
            if txn.state != TransactionState::Restored {
                residue.push(txn);
                continue;
            }
            debug!(
                transaction_id = %txn.transaction_id,
                catalog_item_id = %txn.catalog_item_id,
                atomically,
                "restored transaction accumulated"
            );
            effects.claim(&txn.transaction_id, Stage::Restore, atomically);
            session
                .accumulated
                .push(RestoreOutcome::Restored(Purchase::from_transaction(
                    &txn,
                    None,
                    !atomically,
                )));
        }
        residue
    }

    /// Backend reported the sweep complete.
    pub fn finish(&mut self, effects: &mut BatchEffects) -> bool {
        let Some(session) = self.active.take() else {
            warn!("restore finished with no active session; ignored");
            return false;
        };
        info!(
            restored = session.accumulated.len(),
            "restore session finished"
        );
        effects.dispatch(Dispatch::Restore {
            callback: session.callback,
            outcomes: session.accumulated,
        });
        true
    }

    /// Backend reported the sweep failed. One failure outcome is appended
    /// after everything accumulated so far.
    pub fn fail(&mut self, error: StoreError, effects: &mut BatchEffects) -> bool {
        let Some(mut session) = self.active.take() else {
            warn!(error = %error, "restore failed with no active session; ignored");
            return false;
        };
        warn!(
            error = %error,
            restored = session.accumulated.len(),
            "restore session failed"
        );
        session
            .accumulated
            .push(RestoreOutcome::Failed(TransactionError::from(error)));
        effects.dispatch(Dispatch::Restore {
            callback: session.callback,
            outcomes: session.accumulated,
        });
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    type Seen = Arc<Mutex<Vec<Vec<RestoreOutcome>>>>;

    fn session(atomically: bool, seen: &Seen) -> RestoreSession {
        let seen = Arc::clone(seen);
        RestoreSession::new(atomically, move |o| seen.lock().unwrap().push(o))
    }

    fn batch() -> Vec<Transaction> {
        vec![
            Transaction::new("r1", "item.Z", TransactionState::Restored),
            Transaction::new("p1", "item.X", TransactionState::Purchased),
        ]
    }

    #[test]
    fn inactive_manager_passes_everything_through() {
        let mut mgr = RestoreManager::new();
        let mut fx = BatchEffects::new();
        let residue = mgr.process_batch(batch(), &mut fx);
        assert_eq!(residue.len(), 2);
        assert!(fx.claims().is_empty());
    }

    #[test]
    fn atomic_session_acks_and_clears_needs_finish() {
        let seen: Seen = Arc::default();
        let mut mgr = RestoreManager::new();
        assert!(mgr.begin(session(true, &seen)).is_accepted());

        let mut fx = BatchEffects::new();
        let residue = mgr.process_batch(batch(), &mut fx);
        assert_eq!(residue.len(), 1);
        assert_eq!(residue[0].state, TransactionState::Purchased);
        assert_eq!(fx.acknowledgments().count(), 1);

        let mut fx = BatchEffects::new();
        assert!(mgr.finish(&mut fx));
        fx.fire_all();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        match &seen[0][..] {
            [RestoreOutcome::Restored(p)] => assert!(!p.needs_finish_transaction),
            other => panic!("unexpected outcomes: {other:?}"),
        }
    }

    #[test]
    fn non_atomic_session_defers_ack() {
        let seen: Seen = Arc::default();
        let mut mgr = RestoreManager::new();
        mgr.begin(session(false, &seen));

        let mut fx = BatchEffects::new();
        mgr.process_batch(batch(), &mut fx);
        assert_eq!(fx.claims().len(), 1);
        assert_eq!(fx.acknowledgments().count(), 0);

        let mut fx = BatchEffects::new();
        mgr.finish(&mut fx);
        fx.fire_all();
        let seen = seen.lock().unwrap();
        match &seen[0][..] {
            [RestoreOutcome::Restored(p)] => assert!(p.needs_finish_transaction),
            other => panic!("unexpected outcomes: {other:?}"),
        }
    }

    #[test]
    fn begin_while_active_is_rejected_and_keeps_accumulator() {
        let seen: Seen = Arc::default();
        let mut mgr = RestoreManager::new();
        mgr.begin(session(true, &seen));

        let mut fx = BatchEffects::new();
        mgr.process_batch(batch(), &mut fx);

        let second = RestoreSession::new(false, |_| panic!("rejected session must never fire"));
        assert_eq!(
            mgr.begin(second),
            Admission::Rejected(Rejection::SessionAlreadyActive)
        );
        assert_eq!(mgr.session().map(|s| s.accumulated().len()), Some(1));
        assert!(mgr.session().is_some_and(|s| s.atomically));
    }

    #[test]
    fn failure_appends_one_failed_outcome_and_empties_slot() {
        let seen: Seen = Arc::default();
        let mut mgr = RestoreManager::new();
        mgr.begin(session(true, &seen));

        let mut fx = BatchEffects::new();
        mgr.process_batch(batch(), &mut fx);

        let mut fx = BatchEffects::new();
        assert!(mgr.fail(StoreError::unknown("network down"), &mut fx));
        assert!(!mgr.is_active());
        fx.fire_all();

        let seen = seen.lock().unwrap();
        assert_eq!(seen[0].len(), 2);
        assert!(matches!(seen[0][1], RestoreOutcome::Failed(_)));
    }

    #[test]
    fn finish_without_session_is_ignored() {
        let mut mgr = RestoreManager::new();
        let mut fx = BatchEffects::new();
        assert!(!mgr.finish(&mut fx));
        assert_eq!(fx.dispatch_count(), 0);
    }
}
