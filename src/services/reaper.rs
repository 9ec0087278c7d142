use chrono::{DateTime, Utc};
use metrics::{counter, histogram};
use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::db::{self, DbPool};
use crate::entities::order::{self, CancelReason, OrderStatus};
use crate::entities::Order;
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};

/// Cancels PENDING orders that never got a payment attached.
#[derive(Clone)]
pub struct OrderReaper {
    db: Arc<DbPool>,
    events: EventSender,
    ttl: chrono::Duration,
    running: Arc<AtomicBool>,
}

/// Clears the in-progress flag when a sweep ends, however it ends.
struct RunGuard(Arc<AtomicBool>);

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl OrderReaper {
    pub fn new(db: Arc<DbPool>, events: EventSender, ttl: Duration) -> Self {
        let ttl = chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::minutes(2));
        Self {
            db,
            events,
            ttl,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn try_claim(&self) -> Option<RunGuard> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RunGuard(self.running.clone()))
    }

    /// One sweep. Returns `Ok(None)` when skipped because another sweep is in
    /// flight or the database is unreachable.
    pub async fn run_once_at(&self, now: DateTime<Utc>) -> Result<Option<u64>, ServiceError> {
        let Some(_guard) = self.try_claim() else {
            debug!("reaper sweep already running, skipping");
            return Ok(None);
        };

        if let Err(e) = db::check_connection(&self.db).await {
            warn!(error = %e, "database unreachable, reaper sweep skipped");
            return Ok(None);
        }

        let started = Instant::now();
        let cutoff = now - self.ttl;
        let result = Order::update_many()
            .col_expr(order::Column::Status, Expr::value(OrderStatus::Cancelled))
            .col_expr(order::Column::CancelReason, Expr::value(CancelReason::PaymentTimeout))
            .col_expr(order::Column::UpdatedAt, Expr::value(now))
            .filter(order::Column::Status.eq(OrderStatus::Pending))
            .filter(order::Column::CreatedAt.lte(cutoff))
            .filter(order::Column::PaymentId.is_null())
            .exec(&*self.db)
            .await?;
        histogram!("storefront_reaper.sweep_duration", started.elapsed());

        let count = result.rows_affected;
        if count > 0 {
            counter!("storefront_reaper.cancelled", count);
            info!(count, cutoff = %cutoff, "stale pending orders cancelled");
            self.events.send_or_log(Event::OrdersExpired { count }).await;
        }
        Ok(Some(count))
    }

    /// Runs sweeps forever on `interval`. Failures are logged and the next
    /// tick proceeds.
    pub fn spawn(self, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            info!(interval_secs = interval.as_secs(), "order reaper started");
            loop {
                ticker.tick().await;
                if let Err(e) = self.run_once_at(Utc::now()).await {
                    error!(error = %e, "reaper sweep failed");
                }
            }
        })
    }
}
