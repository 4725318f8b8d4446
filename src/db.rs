// src/db.rs

use std::str::FromStr;

use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::models::{
    AnalysisRecord, HistoryAction, PaymentSession, SubscriptionHistoryEntry, SubscriptionRecord,
    UserProfile,
};

const SUBSCRIPTION_COLUMNS: &str = r#"user_id, subscription_tier, analyses_used_this_month, monthly_limit,
       billing_period_start, billing_period_end, subscription_status, payment_status,
       payment_reference, canceled_at, cancellation_reason, grace_period_end,
       created_at, updated_at"#;

fn text_column<T>(row: &PgRow, column: &str) -> Result<T, sqlx::Error>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw: String = row.try_get(column)?;
    raw.parse::<T>().map_err(|e| sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: Box::new(e),
    })
}

fn subscription_from_row(r: &PgRow) -> Result<SubscriptionRecord, sqlx::Error> {
    Ok(SubscriptionRecord {
        user_id: r.try_get("user_id")?,
        tier: text_column(r, "subscription_tier")?,
        analyses_used: r.try_get("analyses_used_this_month")?,
        monthly_limit: r.try_get("monthly_limit")?,
        billing_period_start: r.try_get("billing_period_start")?,
        billing_period_end: r.try_get("billing_period_end")?,
        status: text_column(r, "subscription_status")?,
        payment_status: text_column(r, "payment_status")?,
        payment_reference: r.try_get("payment_reference")?,
        canceled_at: r.try_get("canceled_at")?,
        cancellation_reason: r.try_get("cancellation_reason")?,
        grace_period_end: r.try_get("grace_period_end")?,
        created_at: r.try_get("created_at")?,
        updated_at: r.try_get("updated_at")?,
    })
}

pub async fn get_subscription(
    pool: &PgPool,
    user_id: Uuid,
) -> Result<Option<SubscriptionRecord>, sqlx::Error> {
    let row = sqlx::query(&format!(
        "SELECT {SUBSCRIPTION_COLUMNS} FROM user_subscriptions WHERE user_id = $1"
    ))
    .bind(user_id)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(subscription_from_row).transpose()
}

pub async fn find_subscription_by_reference(
    pool: &PgPool,
    reference: &str,
) -> Result<Option<SubscriptionRecord>, sqlx::Error> {
    let row = sqlx::query(&format!(
        "SELECT {SUBSCRIPTION_COLUMNS} FROM user_subscriptions WHERE payment_reference = $1
         ORDER BY updated_at DESC LIMIT 1"
    ))
    .bind(reference)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(subscription_from_row).transpose()
}

/// Inserts the record unless the user already has one.
/// Returns `true` when this call created the row.
pub async fn insert_subscription(
    pool: &PgPool,
    record: &SubscriptionRecord,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"INSERT INTO user_subscriptions
                (user_id, subscription_tier, analyses_used_this_month, monthly_limit,
                 billing_period_start, billing_period_end, subscription_status, payment_status,
                 payment_reference, canceled_at, cancellation_reason, grace_period_end,
                 created_at, updated_at)
           VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
           ON CONFLICT (user_id) DO NOTHING"#,
    )
    .bind(record.user_id)
    .bind(record.tier.as_str())
    .bind(record.analyses_used)
    .bind(record.monthly_limit)
    .bind(record.billing_period_start)
    .bind(record.billing_period_end)
    .bind(record.status.as_str())
    .bind(record.payment_status.as_str())
    .bind(record.payment_reference.as_deref())
    .bind(record.canceled_at)
    .bind(record.cancellation_reason.as_deref())
    .bind(record.grace_period_end)
    .bind(record.created_at)
    .bind(record.updated_at)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Writes every mutable field of the record back.
/// The usage counter is left alone unless `reset_usage` is set, so that a
/// concurrent `try_increment_usage` is never overwritten by a stale read.
pub async fn save_subscription(
    pool: &PgPool,
    record: &SubscriptionRecord,
    reset_usage: bool,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"UPDATE user_subscriptions
           SET subscription_tier = $2,
               analyses_used_this_month = CASE WHEN $3 THEN $4 ELSE analyses_used_this_month END,
               monthly_limit = $5,
               billing_period_start = $6,
               billing_period_end = $7,
               subscription_status = $8,
               payment_status = $9,
               payment_reference = $10,
               canceled_at = $11,
               cancellation_reason = $12,
               grace_period_end = $13,
               updated_at = $14
           WHERE user_id = $1"#,
    )
    .bind(record.user_id)
    .bind(record.tier.as_str())
    .bind(reset_usage)
    .bind(record.analyses_used)
    .bind(record.monthly_limit)
    .bind(record.billing_period_start)
    .bind(record.billing_period_end)
    .bind(record.status.as_str())
    .bind(record.payment_status.as_str())
    .bind(record.payment_reference.as_deref())
    .bind(record.canceled_at)
    .bind(record.cancellation_reason.as_deref())
    .bind(record.grace_period_end)
    .bind(record.updated_at)
    .execute(pool)
    .await?;

    Ok(())
}

/// Writes the free-tier fields of `record` only while the row is still a
/// canceled paid subscription past its grace end. Returns whether it applied.
pub async fn downgrade_if_grace_elapsed(
    pool: &PgPool,
    record: &SubscriptionRecord,
    now: DateTime<Utc>,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"UPDATE user_subscriptions
           SET subscription_tier = $2,
               analyses_used_this_month = $3,
               monthly_limit = $4,
               billing_period_start = $5,
               billing_period_end = $6,
               subscription_status = $7,
               canceled_at = NULL,
               cancellation_reason = NULL,
               grace_period_end = NULL,
               updated_at = $8
           WHERE user_id = $1
             AND subscription_status = 'canceled'
             AND subscription_tier <> 'free'
             AND COALESCE(grace_period_end, billing_period_end) < $8"#,
    )
    .bind(record.user_id)
    .bind(record.tier.as_str())
    .bind(record.analyses_used)
    .bind(record.monthly_limit)
    .bind(record.billing_period_start)
    .bind(record.billing_period_end)
    .bind(record.status.as_str())
    .bind(now)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Consumes one analysis if the user is under the limit.
/// Returns the new usage count, or `None` when the quota is exhausted.
pub async fn try_increment_usage(pool: &PgPool, user_id: Uuid) -> Result<Option<i32>, sqlx::Error> {
    let row = sqlx::query(
        r#"UPDATE user_subscriptions
           SET analyses_used_this_month = analyses_used_this_month + 1,
               updated_at = NOW()
           WHERE user_id = $1
             AND analyses_used_this_month < monthly_limit
           RETURNING analyses_used_this_month"#,
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await?;

    row.map(|r| r.try_get("analyses_used_this_month")).transpose()
}

pub async fn list_elapsed_grace_periods(
    pool: &PgPool,
    now: DateTime<Utc>,
    batch_size: i64,
) -> Result<Vec<Uuid>, sqlx::Error> {
    let rows = sqlx::query(
        r#"SELECT user_id
           FROM user_subscriptions
           WHERE subscription_status = 'canceled'
             AND subscription_tier <> 'free'
             AND COALESCE(grace_period_end, billing_period_end) < $1
           ORDER BY updated_at ASC
           LIMIT $2"#,
    )
    .bind(now)
    .bind(batch_size)
    .fetch_all(pool)
    .await?;

    rows.iter().map(|r| r.try_get("user_id")).collect()
}

pub async fn insert_history(
    pool: &PgPool,
    user_id: Uuid,
    action: HistoryAction,
    previous_tier: Option<&str>,
    new_tier: Option<&str>,
    reason: Option<&str>,
    metadata: Option<serde_json::Value>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"INSERT INTO subscription_history (user_id, action, previous_tier, new_tier, reason, metadata)
           VALUES ($1, $2, $3, $4, $5, $6)"#,
    )
    .bind(user_id)
    .bind(action.as_str())
    .bind(previous_tier)
    .bind(new_tier)
    .bind(reason)
    .bind(metadata)
    .execute(pool)
    .await?;

    Ok(())
}

fn history_from_row(r: &PgRow) -> Result<SubscriptionHistoryEntry, sqlx::Error> {
    Ok(SubscriptionHistoryEntry {
        id: r.try_get("id")?,
        action: text_column(r, "action")?,
        previous_tier: r.try_get("previous_tier")?,
        new_tier: r.try_get("new_tier")?,
        reason: r.try_get("reason")?,
        metadata: r.try_get("metadata")?,
        created_at: r.try_get("created_at")?,
    })
}

pub async fn list_history(
    pool: &PgPool,
    user_id: Uuid,
) -> Result<Vec<SubscriptionHistoryEntry>, sqlx::Error> {
    let rows = sqlx::query(
        r#"SELECT id, action, previous_tier, new_tier, reason, metadata, created_at
           FROM subscription_history
           WHERE user_id = $1
           ORDER BY created_at DESC"#,
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    rows.iter().map(history_from_row).collect()
}

pub struct NewAnalysis<'a> {
    pub user_id: Uuid,
    pub overall_score: f64,
    pub skin_score: f64,
    pub nail_score: f64,
    pub structure_score: f64,
    pub symmetry_score: f64,
    pub cleanliness_score: f64,
    pub detected_issues: &'a [String],
    pub improvement_tips: &'a [String],
    pub confidence_score: f64,
    pub parse_mode: &'a str,
    pub full_analysis: serde_json::Value,
}

pub async fn insert_analysis(pool: &PgPool, analysis: NewAnalysis<'_>) -> Result<Uuid, sqlx::Error> {
    let row = sqlx::query(
        r#"INSERT INTO foot_analyses
                (user_id, overall_score, skin_score, nail_score, structure_score, symmetry_score,
                 cleanliness_score, detected_issues, improvement_tips, confidence_score,
                 parse_mode, full_analysis)
           VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
           RETURNING id"#,
    )
    .bind(analysis.user_id)
    .bind(analysis.overall_score)
    .bind(analysis.skin_score)
    .bind(analysis.nail_score)
    .bind(analysis.structure_score)
    .bind(analysis.symmetry_score)
    .bind(analysis.cleanliness_score)
    .bind(serde_json::json!(analysis.detected_issues))
    .bind(serde_json::json!(analysis.improvement_tips))
    .bind(analysis.confidence_score)
    .bind(analysis.parse_mode)
    .bind(analysis.full_analysis)
    .fetch_one(pool)
    .await?;

    row.try_get("id")
}

fn string_list(value: serde_json::Value) -> Vec<String> {
    serde_json::from_value(value).unwrap_or_default()
}

fn analysis_from_row(r: &PgRow) -> Result<AnalysisRecord, sqlx::Error> {
    Ok(AnalysisRecord {
        id: r.try_get("id")?,
        user_id: r.try_get("user_id")?,
        overall_score: r.try_get("overall_score")?,
        skin_score: r.try_get("skin_score")?,
        nail_score: r.try_get("nail_score")?,
        structure_score: r.try_get("structure_score")?,
        symmetry_score: r.try_get("symmetry_score")?,
        cleanliness_score: r.try_get("cleanliness_score")?,
        detected_issues: string_list(r.try_get("detected_issues")?),
        improvement_tips: string_list(r.try_get("improvement_tips")?),
        confidence_score: r.try_get("confidence_score")?,
        parse_mode: r.try_get("parse_mode")?,
        full_analysis: r.try_get("full_analysis")?,
        created_at: r.try_get("created_at")?,
    })
}

pub async fn list_analyses(pool: &PgPool, user_id: Uuid) -> Result<Vec<AnalysisRecord>, sqlx::Error> {
    let rows = sqlx::query(
        r#"SELECT id, user_id, overall_score, skin_score, nail_score, structure_score,
                  symmetry_score, cleanliness_score, detected_issues, improvement_tips,
                  confidence_score, parse_mode, full_analysis, created_at
           FROM foot_analyses
           WHERE user_id = $1
           ORDER BY created_at DESC"#,
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    rows.iter().map(analysis_from_row).collect()
}

fn payment_session_from_row(r: &PgRow) -> Result<PaymentSession, sqlx::Error> {
    Ok(PaymentSession {
        session_id: r.try_get("session_id")?,
        user_id: r.try_get("user_id")?,
        plan: text_column(r, "plan")?,
        amount: r.try_get("amount")?,
        mode: text_column(r, "mode")?,
        status: text_column(r, "status")?,
        created_at: r.try_get("created_at")?,
        completed_at: r.try_get("completed_at")?,
    })
}

pub async fn insert_payment_session(pool: &PgPool, session: &PaymentSession) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"INSERT INTO payment_sessions (session_id, user_id, plan, amount, mode, status, created_at)
           VALUES ($1, $2, $3, $4::numeric, $5, $6, $7)"#,
    )
    .bind(&session.session_id)
    .bind(session.user_id)
    .bind(session.plan.as_str())
    .bind(&session.amount)
    .bind(session.mode.as_str())
    .bind(session.status.as_str())
    .bind(session.created_at)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn get_payment_session(
    pool: &PgPool,
    session_id: &str,
) -> Result<Option<PaymentSession>, sqlx::Error> {
    let row = sqlx::query(
        r#"SELECT session_id, user_id, plan, amount::text AS amount, mode, status,
                  created_at, completed_at
           FROM payment_sessions
           WHERE session_id = $1"#,
    )
    .bind(session_id)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(payment_session_from_row).transpose()
}

/// Flips a pending session to completed. Returns `false` when it was already
/// completed (or unknown), which makes payment confirmation idempotent.
pub async fn complete_payment_session(
    pool: &PgPool,
    session_id: &str,
    now: DateTime<Utc>,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"UPDATE payment_sessions
           SET status = 'completed', completed_at = $2
           WHERE session_id = $1 AND status = 'pending'"#,
    )
    .bind(session_id)
    .bind(now)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

fn profile_from_row(r: &PgRow) -> Result<UserProfile, sqlx::Error> {
    Ok(UserProfile {
        user_id: r.try_get("id")?,
        email: r.try_get("email")?,
        username: r.try_get("username")?,
        full_name: r.try_get("full_name")?,
        avatar_url: r.try_get("avatar_url")?,
        created_at: r.try_get("created_at")?,
        updated_at: r.try_get("updated_at")?,
    })
}

pub async fn get_profile(pool: &PgPool, user_id: Uuid) -> Result<Option<UserProfile>, sqlx::Error> {
    let row = sqlx::query(
        r#"SELECT id, email, username, full_name, avatar_url, created_at, updated_at
           FROM users
           WHERE id = $1"#,
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(profile_from_row).transpose()
}

/// Fields left as `None` keep their stored value.
pub async fn update_profile(
    pool: &PgPool,
    user_id: Uuid,
    username: Option<&str>,
    full_name: Option<&str>,
    avatar_url: Option<&str>,
) -> Result<Option<UserProfile>, sqlx::Error> {
    let result = sqlx::query(
        r#"UPDATE users
           SET username = COALESCE($2, username),
               full_name = COALESCE($3, full_name),
               avatar_url = COALESCE($4, avatar_url),
               updated_at = NOW()
           WHERE id = $1"#,
    )
    .bind(user_id)
    .bind(username)
    .bind(full_name)
    .bind(avatar_url)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Ok(None);
    }
    get_profile(pool, user_id).await
}
