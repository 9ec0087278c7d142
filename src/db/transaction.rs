/*!
 * Scoped database transactions
 *
 * `TransactionScope` makes the all-or-nothing contract explicit:
 * begin, run the work against `conn()`, then hand the work's result to
 * `finish`, which commits on `Ok` and rolls back on `Err`. A scope that
 * is dropped without `finish` (panic, cancelled future) is rolled back
 * by the underlying `DatabaseTransaction`.
 *
 * ```rust,ignore
 * let scope = TransactionScope::begin(&db).await?;
 * let result = mark_paid(scope.conn(), order_id).await;
 * let order = scope.finish(result).await?;
 * ```
 */

use crate::errors::ServiceError;
use metrics::{counter, histogram};
use sea_orm::{DatabaseConnection, DatabaseTransaction, TransactionTrait};
use std::time::Instant;
use tracing::{debug, error, warn};
use uuid::Uuid;

pub struct TransactionScope {
    txn: DatabaseTransaction,
    id: Uuid,
    started: Instant,
}

impl TransactionScope {
    pub async fn begin(db: &DatabaseConnection) -> Result<Self, ServiceError> {
        let txn = db.begin().await.map_err(|e| {
            error!(error = %e, "Failed to start transaction");
            ServiceError::DatabaseError(e)
        })?;
        let id = Uuid::new_v4();
        debug!(transaction_id = %id, "Transaction started");
        counter!("storefront_db.transaction.started", 1);
        Ok(Self {
            txn,
            id,
            started: Instant::now(),
        })
    }

    /// Connection to run statements on; every write inside the scope must use it.
    pub fn conn(&self) -> &DatabaseTransaction {
        &self.txn
    }

    /// Commits when `result` is `Ok`, rolls back otherwise, and returns `result`.
    /// A failed commit surfaces as a database error.
    pub async fn finish<T>(self, result: Result<T, ServiceError>) -> Result<T, ServiceError> {
        let Self { txn, id, started } = self;
        match result {
            Ok(value) => {
                txn.commit().await.map_err(|e| {
                    error!(transaction_id = %id, error = %e, "Transaction commit failed");
                    counter!("storefront_db.transaction.commit_failed", 1);
                    ServiceError::DatabaseError(e)
                })?;
                histogram!("storefront_db.transaction.duration", started.elapsed());
                counter!("storefront_db.transaction.committed", 1);
                debug!(transaction_id = %id, "Transaction committed");
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = txn.rollback().await {
                    error!(transaction_id = %id, error = %rollback_err, "Transaction rollback failed");
                }
                counter!("storefront_db.transaction.rolled_back", 1);
                warn!(transaction_id = %id, error = %err, "Transaction rolled back");
                Err(err)
            }
        }
    }
}
