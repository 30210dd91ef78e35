use std::time::{Duration, Instant};

use tracing::{trace, warn};

use crate::error::Result;
use crate::ports::RecordStore;

/// Groups a run of record-store mutations into one transaction that is lifted
/// (committed and reopened) once it has been open longer than `max_hold`.
///
/// The transaction is committed on [`TransactionGrouper::finish`] or, failing
/// that, on drop.
pub struct TransactionGrouper<'a> {
    store: &'a dyn RecordStore,
    max_hold: Duration,
    opened_at: Instant,
    open: bool,
    lifts: usize,
}

impl std::fmt::Debug for TransactionGrouper<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionGrouper")
            .field("max_hold", &self.max_hold)
            .field("open", &self.open)
            .field("lifts", &self.lifts)
            .finish_non_exhaustive()
    }
}

impl<'a> TransactionGrouper<'a> {
    pub fn new(store: &'a dyn RecordStore, max_hold: Duration) -> Result<Self> {
        let open = store.supports_transactions();
        if open {
            store.begin_transaction()?;
        }

        Ok(Self {
            store,
            max_hold,
            opened_at: Instant::now(),
            open,
            lifts: 0,
        })
    }

    /// Called after every mutated record. Lifts when the hold time elapsed and
    /// reports whether it did.
    pub fn allow_lift(&mut self) -> Result<bool> {
        if self.opened_at.elapsed() < self.max_hold {
            return Ok(false);
        }
        self.lift()?;
        Ok(true)
    }

    pub fn lift(&mut self) -> Result<()> {
        if self.open {
            // A failed reopen leaves no transaction behind to commit on drop.
            if let Err(err) = self.store.reopen() {
                self.open = false;
                return Err(err);
            }
        }
        self.lifts += 1;
        self.opened_at = Instant::now();
        trace!(target: "shoebox::db", lifts = self.lifts, "lifted grouped transaction");
        Ok(())
    }

    pub fn lifts(&self) -> usize {
        self.lifts
    }

    pub fn finish(mut self) -> Result<()> {
        if self.open {
            self.open = false;
            self.store.commit()?;
        }
        Ok(())
    }
}

impl Drop for TransactionGrouper<'_> {
    fn drop(&mut self) {
        if self.open
            && let Err(err) = self.store.commit()
        {
            warn!(target: "shoebox::db", error = %err, "failed to commit grouped transaction on drop");
        }
    }
}
