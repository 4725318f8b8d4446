// src/sweeper.rs
//
// Periodic downgrade of canceled paid subscriptions whose grace period is
// over. Status reads do the same lazily; this keeps idle accounts tidy.

use std::time::Duration;

use chrono::Utc;
use sqlx::PgPool;

use crate::billing::{self, BillingError};
use crate::db;

const BATCH_SIZE: i64 = 50;

pub fn start_grace_sweeper(pool: PgPool, interval: Duration) {
    log::info!("grace period sweeper every {}s", interval.as_secs());
    tokio::spawn(async move {
        loop {
            match sweep_once(&pool).await {
                Ok(0) => {}
                Ok(n) => log::info!("grace sweeper downgraded {n} subscriptions"),
                Err(e) => log::error!("grace sweeper error: {e}"),
            }
            tokio::time::sleep(interval).await;
        }
    });
}

/// Downgrades one batch. Returns how many records were moved to free.
pub async fn sweep_once(pool: &PgPool) -> Result<usize, BillingError> {
    let user_ids = db::list_elapsed_grace_periods(pool, Utc::now(), BATCH_SIZE).await?;

    let mut downgraded = 0;
    for user_id in user_ids {
        match billing::expire_grace_period(pool, user_id).await {
            Ok(true) => downgraded += 1,
            Ok(false) => {}
            Err(e) => log::error!("grace sweeper downgrade failed user_id={user_id}: {e}"),
        }
    }
    Ok(downgraded)
}
