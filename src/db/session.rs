use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::debug;

use crate::db::database::Database;
use crate::db::options::{TransactionOptions, TransactionType};
use crate::db::transaction::Transaction;
use crate::error::{Result, TesseraError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionKind {
    Schema,
    Data,
}

/// A session borrows its database and tracks the transactions it produced,
/// closing any still live when it closes.
pub struct Session {
    database: Arc<Database>,
    kind: SessionKind,
    transactions: Mutex<Vec<(u64, Weak<Transaction>)>>,
    is_open: AtomicBool,
}

impl Session {
    pub(crate) fn new(database: Arc<Database>, kind: SessionKind) -> Arc<Session> {
        Arc::new(Session {
            database,
            kind,
            transactions: Mutex::new(Vec::new()),
            is_open: AtomicBool::new(true),
        })
    }

    pub fn kind(&self) -> SessionKind {
        self.kind
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.database
    }

    pub fn is_open(&self) -> bool {
        self.is_open.load(Ordering::Acquire)
    }

    /// Opens a transaction of this session's kind.
    pub fn transaction(
        self: &Arc<Self>,
        tx_type: TransactionType,
        options: TransactionOptions,
    ) -> Result<Arc<Transaction>> {
        if !self.is_open() {
            return Err(TesseraError::TransactionClosed);
        }
        match self.kind {
            SessionKind::Schema => Transaction::open_schema(self, tx_type, options),
            SessionKind::Data => Transaction::open_data(self, tx_type, options),
        }
    }

    pub(crate) fn register(&self, tx: &Arc<Transaction>) {
        let mut transactions = self.transactions.lock();
        transactions.retain(|(_, weak)| weak.strong_count() > 0);
        transactions.push((tx.uid(), Arc::downgrade(tx)));
    }

    pub(crate) fn remove(&self, uid: u64) {
        self.transactions.lock().retain(|(id, _)| *id != uid);
    }

    /// Idempotent; closes all live transactions of this session.
    pub fn close(&self) {
        if self
            .is_open
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            let transactions: Vec<_> = self.transactions.lock().drain(..).collect();
            for (_, weak) in transactions {
                if let Some(tx) = weak.upgrade() {
                    tx.close();
                }
            }
            debug!("session closed");
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}
