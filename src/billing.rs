// src/billing.rs

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::json;
use sqlx::PgPool;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::db;
use crate::models::{
    HistoryAction, PaymentStatus, SubscriptionHistoryEntry, SubscriptionRecord,
    SubscriptionStatus, Tier,
};

pub const BILLING_WINDOW_DAYS: i64 = 30;

#[derive(Debug, thiserror::Error)]
pub enum BillingError {
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
    #[error("cannot cancel free subscription")]
    CannotCancelFree,
    #[error("subscription is not canceled")]
    NotCanceled,
    #[error("no subscription for payment reference {0}")]
    UnknownReference(String),
}

/// What callers see when they ask "can this user run another analysis".
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct StatusView {
    pub tier: Tier,
    pub status: SubscriptionStatus,
    pub payment_status: PaymentStatus,
    pub analyses_used: i32,
    pub monthly_limit: i32,
    pub analyses_remaining: i32,
    pub can_analyze: bool,
    pub needs_upgrade: bool,
    pub billing_period_start: DateTime<Utc>,
    pub billing_period_end: DateTime<Utc>,
    pub days_until_reset: i64,
    pub days_until_expiry: Option<i64>,
    pub canceled_at: Option<DateTime<Utc>>,
    pub cancellation_reason: Option<String>,
    pub grace_period_end: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Evaluation {
    Status(StatusView),
    /// A canceled paid record whose grace period is over; it must be
    /// downgraded before a status can be reported.
    GraceElapsed,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct CancelOutcome {
    pub message: String,
    pub effective_date: DateTime<Utc>,
}

fn window_end(start: DateTime<Utc>) -> DateTime<Utc> {
    start + Duration::days(BILLING_WINDOW_DAYS)
}

/// Whole days from `now` until `until`, rounded up, never negative.
fn days_until(now: DateTime<Utc>, until: DateTime<Utc>) -> i64 {
    let secs = (until - now).num_seconds();
    if secs <= 0 {
        return 0;
    }
    let day = Duration::days(1).num_seconds();
    (secs + day - 1) / day
}

fn clear_cancellation(record: &mut SubscriptionRecord) {
    record.canceled_at = None;
    record.cancellation_reason = None;
    record.grace_period_end = None;
}

pub fn free_record(user_id: Uuid, now: DateTime<Utc>) -> SubscriptionRecord {
    SubscriptionRecord {
        user_id,
        tier: Tier::Free,
        analyses_used: 0,
        monthly_limit: Tier::Free.monthly_limit(),
        billing_period_start: now,
        billing_period_end: window_end(now),
        status: SubscriptionStatus::Active,
        payment_status: PaymentStatus::Pending,
        payment_reference: None,
        canceled_at: None,
        cancellation_reason: None,
        grace_period_end: None,
        created_at: now,
        updated_at: now,
    }
}

/// Moves an elapsed billing window forward so that it contains `now` and
/// resets usage. Canceled records keep their window; the grace check owns them.
pub fn roll_window(record: &mut SubscriptionRecord, now: DateTime<Utc>) -> bool {
    if record.status == SubscriptionStatus::Canceled || now < record.billing_period_end {
        return false;
    }

    let mut start = record.billing_period_end;
    while window_end(start) <= now {
        start = window_end(start);
    }
    record.billing_period_start = start;
    record.billing_period_end = window_end(start);
    record.analyses_used = 0;
    record.updated_at = now;
    true
}

pub fn evaluate(record: &SubscriptionRecord, now: DateTime<Utc>) -> Evaluation {
    let mut can_analyze = record.analyses_used < record.monthly_limit;
    let mut days_until_expiry = None;

    if record.status == SubscriptionStatus::Canceled {
        let grace_end = record.grace_period_end.unwrap_or(record.billing_period_end);
        days_until_expiry = Some(days_until(now, grace_end));

        if now > grace_end {
            if record.tier != Tier::Free {
                return Evaluation::GraceElapsed;
            }
            can_analyze = false;
        }
    }

    Evaluation::Status(StatusView {
        tier: record.tier,
        status: record.status,
        payment_status: record.payment_status,
        analyses_used: record.analyses_used,
        monthly_limit: record.monthly_limit,
        analyses_remaining: (record.monthly_limit - record.analyses_used).max(0),
        can_analyze,
        needs_upgrade: !can_analyze && record.tier == Tier::Free,
        billing_period_start: record.billing_period_start,
        billing_period_end: record.billing_period_end,
        days_until_reset: days_until(now, record.billing_period_end),
        days_until_expiry,
        canceled_at: record.canceled_at,
        cancellation_reason: record.cancellation_reason.clone(),
        grace_period_end: record.grace_period_end,
    })
}

pub fn apply_upgrade(
    record: &mut SubscriptionRecord,
    tier: Tier,
    reference: Option<&str>,
    now: DateTime<Utc>,
) {
    record.tier = tier;
    record.monthly_limit = tier.monthly_limit();
    record.analyses_used = 0;
    record.status = SubscriptionStatus::Active;
    record.payment_status = PaymentStatus::Active;
    record.billing_period_start = now;
    record.billing_period_end = window_end(now);
    if let Some(reference) = reference {
        record.payment_reference = Some(reference.to_string());
    }
    clear_cancellation(record);
    record.updated_at = now;
}

/// Marks the record canceled and returns the date access ends.
/// The tier stays until the grace period is found elapsed.
pub fn apply_cancel(
    record: &mut SubscriptionRecord,
    reason: Option<&str>,
    immediate: bool,
    now: DateTime<Utc>,
) -> Result<DateTime<Utc>, BillingError> {
    if record.tier == Tier::Free {
        return Err(BillingError::CannotCancelFree);
    }

    let effective = if immediate { now } else { record.billing_period_end };
    record.status = SubscriptionStatus::Canceled;
    record.canceled_at = Some(now);
    record.cancellation_reason = reason.map(str::to_string);
    record.grace_period_end = Some(effective);
    record.updated_at = now;
    Ok(effective)
}

pub fn apply_downgrade(record: &mut SubscriptionRecord, now: DateTime<Utc>) {
    record.tier = Tier::Free;
    record.monthly_limit = Tier::Free.monthly_limit();
    record.analyses_used = 0;
    record.status = SubscriptionStatus::Active;
    record.billing_period_start = now;
    record.billing_period_end = window_end(now);
    clear_cancellation(record);
    record.updated_at = now;
}

pub fn apply_reactivate(record: &mut SubscriptionRecord, now: DateTime<Utc>) -> Result<(), BillingError> {
    if record.status != SubscriptionStatus::Canceled {
        return Err(BillingError::NotCanceled);
    }
    record.status = SubscriptionStatus::Active;
    clear_cancellation(record);
    record.updated_at = now;
    Ok(())
}

/// History writes are best effort: a failed log line never fails the
/// transition that produced it.
async fn log_history(
    pool: &PgPool,
    user_id: Uuid,
    action: HistoryAction,
    previous_tier: Option<&str>,
    new_tier: Option<&str>,
    reason: &str,
    metadata: Option<serde_json::Value>,
) {
    if let Err(e) = db::insert_history(
        pool,
        user_id,
        action,
        previous_tier,
        new_tier,
        Some(reason),
        metadata,
    )
    .await
    {
        log::error!("subscription history insert failed user_id={user_id} action={action}: {e}");
    }
}

/// Reads the user's record, creating a free one on first access.
pub async fn load_or_create(pool: &PgPool, user_id: Uuid) -> Result<SubscriptionRecord, BillingError> {
    if let Some(record) = db::get_subscription(pool, user_id).await? {
        return Ok(record);
    }

    let record = free_record(user_id, Utc::now());
    if db::insert_subscription(pool, &record).await? {
        log::info!("created free subscription user_id={user_id}");
        log_history(
            pool,
            user_id,
            HistoryAction::Created,
            None,
            Some(Tier::Free.as_str()),
            "Initial subscription",
            None,
        )
        .await;
        return Ok(record);
    }

    // Lost the insert race; the other request's row is authoritative.
    db::get_subscription(pool, user_id)
        .await?
        .ok_or(BillingError::Db(sqlx::Error::RowNotFound))
}

/// Loads the record as of now: an elapsed window is rolled forward and a
/// paid record past its grace period is downgraded first.
async fn current_record(pool: &PgPool, user_id: Uuid) -> Result<SubscriptionRecord, BillingError> {
    let mut record = load_or_create(pool, user_id).await?;
    let now = Utc::now();

    if roll_window(&mut record, now) {
        db::save_subscription(pool, &record, true).await?;
        log::info!(
            "billing window rolled user_id={user_id} tier={} until={}",
            record.tier,
            record.billing_period_end
        );
    }

    if evaluate(&record, now) == Evaluation::GraceElapsed {
        expire_grace_period(pool, user_id).await?;
        // whichever write won, the stored row is the current state
        record = load_or_create(pool, user_id).await?;
    }
    Ok(record)
}

pub async fn get_status(pool: &PgPool, user_id: Uuid) -> Result<StatusView, BillingError> {
    let record = current_record(pool, user_id).await?;
    match evaluate(&record, Utc::now()) {
        Evaluation::Status(view) => Ok(view),
        // only reachable if an immediate cancel landed between the writes above
        Evaluation::GraceElapsed => Err(BillingError::Db(sqlx::Error::RowNotFound)),
    }
}

/// Consumes one analysis from the user's quota.
/// Returns `false` without touching the counter when the quota is exhausted.
pub async fn increment_usage(pool: &PgPool, user_id: Uuid) -> Result<bool, BillingError> {
    load_or_create(pool, user_id).await?;
    match db::try_increment_usage(pool, user_id).await? {
        Some(used) => {
            log::debug!("usage incremented user_id={user_id} used={used}");
            Ok(true)
        }
        None => {
            log::warn!("usage increment refused, quota exhausted user_id={user_id}");
            Ok(false)
        }
    }
}

/// Moves the user onto `tier` with a fresh window. A reference that was
/// already applied is a no-op, so replayed payment events stay harmless.
pub async fn upgrade(
    pool: &PgPool,
    user_id: Uuid,
    tier: Tier,
    reference: Option<&str>,
) -> Result<SubscriptionRecord, BillingError> {
    let mut record = load_or_create(pool, user_id).await?;
    if reference.is_some()
        && record.payment_reference.as_deref() == reference
        && record.tier == tier
        && matches!(
            record.status,
            SubscriptionStatus::Active | SubscriptionStatus::Canceled
        )
    {
        log::info!("upgrade already applied user_id={user_id} reference={reference:?}");
        return Ok(record);
    }

    let previous = record.tier;
    apply_upgrade(&mut record, tier, reference, Utc::now());
    db::save_subscription(pool, &record, true).await?;

    log::info!("subscription upgraded user_id={user_id} {previous} -> {tier}");
    log_history(
        pool,
        user_id,
        HistoryAction::Upgraded,
        Some(previous.as_str()),
        Some(tier.as_str()),
        "Payment successful",
        reference.map(|r| json!({ "reference": r })),
    )
    .await;

    Ok(record)
}

pub async fn cancel(
    pool: &PgPool,
    user_id: Uuid,
    reason: Option<&str>,
    immediate: bool,
) -> Result<CancelOutcome, BillingError> {
    let mut record = current_record(pool, user_id).await?;
    let effective_date = apply_cancel(&mut record, reason, immediate, Utc::now())?;
    db::save_subscription(pool, &record, false).await?;

    log::info!("subscription canceled user_id={user_id} immediate={immediate}");
    log_history(
        pool,
        user_id,
        HistoryAction::Canceled,
        Some(record.tier.as_str()),
        Some(record.tier.as_str()),
        reason.unwrap_or("User requested cancellation"),
        None,
    )
    .await;

    let message = if immediate {
        "Subscription canceled immediately"
    } else {
        "Subscription will cancel at the end of your billing period"
    };
    Ok(CancelOutcome {
        message: message.to_string(),
        effective_date,
    })
}

/// Unconditional move to free, for subscriptions ended by the payment provider.
pub async fn downgrade_to_free(pool: &PgPool, user_id: Uuid) -> Result<SubscriptionRecord, BillingError> {
    let mut record = load_or_create(pool, user_id).await?;
    let previous = record.tier;
    apply_downgrade(&mut record, Utc::now());
    db::save_subscription(pool, &record, true).await?;

    log::info!("subscription downgraded user_id={user_id} {previous} -> free");
    log_history(
        pool,
        user_id,
        HistoryAction::Downgraded,
        Some(previous.as_str()),
        Some(Tier::Free.as_str()),
        "Subscription ended",
        None,
    )
    .await;

    Ok(record)
}

/// Downgrades a canceled paid record whose grace period is over.
/// Returns `false` when the stored row no longer qualifies, e.g. an upgrade
/// or another downgrade landed after it was read.
pub async fn expire_grace_period(pool: &PgPool, user_id: Uuid) -> Result<bool, BillingError> {
    let mut record = load_or_create(pool, user_id).await?;
    let previous = record.tier;
    let now = Utc::now();
    apply_downgrade(&mut record, now);

    if !db::downgrade_if_grace_elapsed(pool, &record, now).await? {
        log::debug!("grace downgrade skipped, record changed user_id={user_id}");
        return Ok(false);
    }

    log::info!("grace period over user_id={user_id} {previous} -> free");
    log_history(
        pool,
        user_id,
        HistoryAction::Downgraded,
        Some(previous.as_str()),
        Some(Tier::Free.as_str()),
        "Automatic downgrade after cancellation",
        None,
    )
    .await;
    Ok(true)
}

pub async fn reactivate(pool: &PgPool, user_id: Uuid) -> Result<SubscriptionRecord, BillingError> {
    let mut record = current_record(pool, user_id).await?;
    apply_reactivate(&mut record, Utc::now())?;
    db::save_subscription(pool, &record, false).await?;

    log::info!("subscription reactivated user_id={user_id}");
    log_history(
        pool,
        user_id,
        HistoryAction::Reactivated,
        Some(SubscriptionStatus::Canceled.as_str()),
        Some(record.tier.as_str()),
        "User reactivated subscription",
        None,
    )
    .await;

    Ok(record)
}

pub async fn history(pool: &PgPool, user_id: Uuid) -> Result<Vec<SubscriptionHistoryEntry>, BillingError> {
    Ok(db::list_history(pool, user_id).await?)
}

async fn record_for_reference(pool: &PgPool, reference: &str) -> Result<SubscriptionRecord, BillingError> {
    db::find_subscription_by_reference(pool, reference)
        .await?
        .ok_or_else(|| BillingError::UnknownReference(reference.to_string()))
}

pub async fn mark_payment_active(pool: &PgPool, reference: &str) -> Result<(), BillingError> {
    let mut record = record_for_reference(pool, reference).await?;
    record.payment_status = PaymentStatus::Active;
    record.updated_at = Utc::now();
    db::save_subscription(pool, &record, false).await?;
    log::info!("payment marked active user_id={}", record.user_id);
    Ok(())
}

pub async fn downgrade_by_reference(pool: &PgPool, reference: &str) -> Result<(), BillingError> {
    let record = record_for_reference(pool, reference).await?;
    let mut record = downgrade_to_free(pool, record.user_id).await?;
    record.payment_status = PaymentStatus::Canceled;
    db::save_subscription(pool, &record, false).await?;
    Ok(())
}

pub async fn cancel_by_reference(
    pool: &PgPool,
    reference: &str,
    reason: Option<&str>,
) -> Result<(), BillingError> {
    let record = record_for_reference(pool, reference).await?;
    match cancel(pool, record.user_id, reason.or(Some("Cancelled via Dodo Payment")), false).await {
        Ok(_) => Ok(()),
        // Nothing to cancel on a record already back on the free tier.
        Err(BillingError::CannotCancelFree) => Ok(()),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, day, 12, 0, 0).unwrap()
    }

    fn view(record: &SubscriptionRecord, now: DateTime<Utc>) -> StatusView {
        match evaluate(record, now) {
            Evaluation::Status(v) => v,
            Evaluation::GraceElapsed => panic!("unexpected grace elapsed"),
        }
    }

    #[test]
    fn days_until_rounds_up_and_floors_at_zero() {
        assert_eq!(days_until(at(1), at(1)), 0);
        assert_eq!(days_until(at(2), at(1)), 0);
        assert_eq!(days_until(at(1), at(1) + Duration::hours(1)), 1);
        assert_eq!(days_until(at(1), at(3)), 2);
    }

    #[test]
    fn roll_window_skips_whole_windows() {
        let mut record = free_record(Uuid::new_v4(), at(1));
        record.analyses_used = 2;
        let now = record.billing_period_end + Duration::days(BILLING_WINDOW_DAYS + 3);

        assert!(roll_window(&mut record, now));
        assert_eq!(record.analyses_used, 0);
        assert!(record.billing_period_start <= now);
        assert!(now < record.billing_period_end);
        assert_eq!(
            record.billing_period_end - record.billing_period_start,
            Duration::days(BILLING_WINDOW_DAYS)
        );
    }

    #[test]
    fn roll_window_leaves_canceled_records_alone() {
        let mut record = free_record(Uuid::new_v4(), at(1));
        apply_upgrade(&mut record, Tier::Pro, None, at(1));
        apply_cancel(&mut record, None, false, at(2)).unwrap();
        let before = record.clone();

        assert!(!roll_window(&mut record, at(1) + Duration::days(45)));
        assert_eq!(record, before);
    }

    #[test]
    fn canceled_free_record_past_grace_cannot_analyze() {
        let mut record = free_record(Uuid::new_v4(), at(1));
        record.status = SubscriptionStatus::Canceled;
        record.grace_period_end = Some(at(2));

        let v = view(&record, at(3));
        assert!(!v.can_analyze);
        assert!(v.needs_upgrade);
        assert_eq!(v.days_until_expiry, Some(0));
    }
}
