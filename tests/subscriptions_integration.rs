use chrono::{Duration, Utc};
use sqlx::Row;

use footrate_api::billing::{self, BillingError};
use footrate_api::models::{HistoryAction, SubscriptionStatus, Tier};
use footrate_api::{db, sweeper};

mod support;

#[actix_web::test]
async fn first_status_read_creates_a_free_subscription() {
    let Some(test_db) = support::init_test_db().await else {
        return;
    };
    let pool = &test_db.pool;
    let user_id = support::create_user(pool).await;

    let status = billing::get_status(pool, user_id).await.expect("status");
    assert_eq!(status.tier, Tier::Free);
    assert_eq!(status.analyses_remaining, 3);
    assert!(status.can_analyze);

    // second read does not create another row or history entry
    billing::get_status(pool, user_id).await.expect("status again");
    let history = billing::history(pool, user_id).await.expect("history");
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].action, HistoryAction::Created);
}

#[actix_web::test]
async fn usage_increment_stops_exactly_at_the_limit() {
    let Some(test_db) = support::init_test_db().await else {
        return;
    };
    let pool = &test_db.pool;
    let user_id = support::create_user(pool).await;

    let mut handles = Vec::new();
    for _ in 0..8 {
        let pool = pool.clone();
        handles.push(tokio::spawn(async move {
            billing::increment_usage(&pool, user_id).await.expect("increment")
        }));
    }

    let mut granted = 0;
    for handle in handles {
        if handle.await.expect("join") {
            granted += 1;
        }
    }
    assert_eq!(granted, 3);

    let status = billing::get_status(pool, user_id).await.expect("status");
    assert_eq!(status.analyses_used, 3);
    assert!(!status.can_analyze);
    assert!(status.needs_upgrade);
}

#[actix_web::test]
async fn upgrade_is_idempotent_per_reference() {
    let Some(test_db) = support::init_test_db().await else {
        return;
    };
    let pool = &test_db.pool;
    let user_id = support::create_user(pool).await;

    billing::increment_usage(pool, user_id).await.expect("increment");
    let record = billing::upgrade(pool, user_id, Tier::Pro, Some("sub_1"))
        .await
        .expect("upgrade");
    assert_eq!(record.monthly_limit, 50);
    assert_eq!(record.analyses_used, 0);

    billing::increment_usage(pool, user_id).await.expect("increment");
    // replayed payment event must not reset the counter again
    billing::upgrade(pool, user_id, Tier::Pro, Some("sub_1"))
        .await
        .expect("replay");

    let status = billing::get_status(pool, user_id).await.expect("status");
    assert_eq!(status.analyses_used, 1);
    assert_eq!(status.analyses_remaining, 49);

    let upgrades = billing::history(pool, user_id)
        .await
        .expect("history")
        .into_iter()
        .filter(|h| h.action == HistoryAction::Upgraded)
        .count();
    assert_eq!(upgrades, 1);
}

#[actix_web::test]
async fn cancel_then_reactivate_keeps_pro() {
    let Some(test_db) = support::init_test_db().await else {
        return;
    };
    let pool = &test_db.pool;
    let user_id = support::create_user(pool).await;

    assert!(billing::cancel(pool, user_id, None, false).await.is_err());

    billing::upgrade(pool, user_id, Tier::Pro, Some("sub_2"))
        .await
        .expect("upgrade");
    let outcome = billing::cancel(pool, user_id, Some("break"), false)
        .await
        .expect("cancel");
    assert!(outcome.effective_date > Utc::now() + Duration::days(29));

    let status = billing::get_status(pool, user_id).await.expect("status");
    assert_eq!(status.status, SubscriptionStatus::Canceled);
    assert_eq!(status.tier, Tier::Pro);
    assert!(status.can_analyze);

    billing::reactivate(pool, user_id).await.expect("reactivate");
    let status = billing::get_status(pool, user_id).await.expect("status");
    assert_eq!(status.status, SubscriptionStatus::Active);
    assert!(status.cancellation_reason.is_none());
}

#[actix_web::test]
async fn elapsed_grace_is_downgraded_on_read_and_by_sweeper() {
    let Some(test_db) = support::init_test_db().await else {
        return;
    };
    let pool = &test_db.pool;
    let lazy_user = support::create_user(pool).await;
    let idle_user = support::create_user(pool).await;

    for user_id in [lazy_user, idle_user] {
        billing::upgrade(pool, user_id, Tier::Pro, None)
            .await
            .expect("upgrade");
        billing::cancel(pool, user_id, None, false)
            .await
            .expect("cancel");
        sqlx::query(
            "UPDATE user_subscriptions SET grace_period_end = NOW() - INTERVAL '1 day' WHERE user_id = $1",
        )
        .bind(user_id)
        .execute(pool)
        .await
        .expect("expire grace");
    }

    let status = billing::get_status(pool, lazy_user).await.expect("status");
    assert_eq!(status.tier, Tier::Free);
    assert_eq!(status.status, SubscriptionStatus::Active);
    assert_eq!(status.monthly_limit, 3);

    let downgraded = sweeper::sweep_once(pool).await.expect("sweep");
    assert_eq!(downgraded, 1);
    let record = db::get_subscription(pool, idle_user)
        .await
        .expect("load")
        .expect("row");
    assert_eq!(record.tier, Tier::Free);

    let actions: Vec<String> = sqlx::query(
        "SELECT action FROM subscription_history WHERE user_id = $1 ORDER BY created_at",
    )
    .bind(idle_user)
    .fetch_all(pool)
    .await
    .expect("history")
    .iter()
    .map(|r| r.get("action"))
    .collect();
    assert_eq!(actions, vec!["created", "upgraded", "canceled", "downgraded"]);
}

async fn cancel_with_elapsed_grace(pool: &sqlx::PgPool, user_id: uuid::Uuid, reference: &str) {
    billing::upgrade(pool, user_id, Tier::Pro, Some(reference))
        .await
        .expect("upgrade");
    billing::cancel(pool, user_id, None, true)
        .await
        .expect("cancel");
    sqlx::query(
        r#"UPDATE user_subscriptions
           SET grace_period_end = NOW() - INTERVAL '7 days',
               billing_period_end = NOW() - INTERVAL '7 days',
               analyses_used_this_month = 50
           WHERE user_id = $1"#,
    )
    .bind(user_id)
    .execute(pool)
    .await
    .expect("expire grace");
}

async fn downgrade_count(pool: &sqlx::PgPool, user_id: uuid::Uuid) -> i64 {
    sqlx::query(
        "SELECT COUNT(*) AS n FROM subscription_history WHERE user_id = $1 AND action = 'downgraded'",
    )
    .bind(user_id)
    .fetch_one(pool)
    .await
    .expect("count")
    .get("n")
}

#[actix_web::test]
async fn reactivate_after_grace_ends_is_refused() {
    let Some(test_db) = support::init_test_db().await else {
        return;
    };
    let pool = &test_db.pool;
    let user_id = support::create_user(pool).await;
    cancel_with_elapsed_grace(pool, user_id, "sub_x").await;

    let result = billing::reactivate(pool, user_id).await;
    assert!(matches!(result, Err(BillingError::NotCanceled)));

    let status = billing::get_status(pool, user_id).await.expect("status");
    assert_eq!(status.tier, Tier::Free);
    assert_eq!(status.status, SubscriptionStatus::Active);
    assert_eq!(status.monthly_limit, 3);
    assert_eq!(downgrade_count(pool, user_id).await, 1);
}

#[actix_web::test]
async fn cancel_after_grace_ends_sees_free_tier() {
    let Some(test_db) = support::init_test_db().await else {
        return;
    };
    let pool = &test_db.pool;
    let user_id = support::create_user(pool).await;
    cancel_with_elapsed_grace(pool, user_id, "sub_y").await;

    let result = billing::cancel(pool, user_id, None, false).await;
    assert!(matches!(result, Err(BillingError::CannotCancelFree)));

    let record = db::get_subscription(pool, user_id)
        .await
        .expect("load")
        .expect("row");
    assert_eq!(record.tier, Tier::Free);
}

#[actix_web::test]
async fn grace_downgrade_does_not_override_a_newer_upgrade() {
    let Some(test_db) = support::init_test_db().await else {
        return;
    };
    let pool = &test_db.pool;
    let user_id = support::create_user(pool).await;
    cancel_with_elapsed_grace(pool, user_id, "sub_old").await;

    let listed = db::list_elapsed_grace_periods(pool, Utc::now(), 50)
        .await
        .expect("list");
    assert_eq!(listed, vec![user_id]);

    // a new payment lands between the listing and the downgrade
    billing::upgrade(pool, user_id, Tier::Pro, Some("sub_new"))
        .await
        .expect("upgrade");

    assert!(!billing::expire_grace_period(pool, user_id)
        .await
        .expect("expire"));
    let status = billing::get_status(pool, user_id).await.expect("status");
    assert_eq!(status.tier, Tier::Pro);
    assert_eq!(status.status, SubscriptionStatus::Active);
    assert_eq!(downgrade_count(pool, user_id).await, 0);
}

#[actix_web::test]
async fn concurrent_status_reads_downgrade_once() {
    let Some(test_db) = support::init_test_db().await else {
        return;
    };
    let pool = &test_db.pool;
    let user_id = support::create_user(pool).await;
    cancel_with_elapsed_grace(pool, user_id, "sub_z").await;

    let mut handles = Vec::new();
    for _ in 0..4 {
        let pool = pool.clone();
        handles.push(tokio::spawn(async move {
            billing::get_status(&pool, user_id).await.expect("status")
        }));
    }
    for handle in handles {
        assert_eq!(handle.await.expect("join").tier, Tier::Free);
    }
    assert_eq!(downgrade_count(pool, user_id).await, 1);
}

#[actix_web::test]
async fn replayed_upgrade_keeps_a_cancellation() {
    let Some(test_db) = support::init_test_db().await else {
        return;
    };
    let pool = &test_db.pool;
    let user_id = support::create_user(pool).await;

    billing::upgrade(pool, user_id, Tier::Pro, Some("sub_r"))
        .await
        .expect("upgrade");
    billing::increment_usage(pool, user_id).await.expect("increment");
    billing::cancel(pool, user_id, Some("too pricey"), false)
        .await
        .expect("cancel");

    billing::upgrade(pool, user_id, Tier::Pro, Some("sub_r"))
        .await
        .expect("replay");

    let status = billing::get_status(pool, user_id).await.expect("status");
    assert_eq!(status.status, SubscriptionStatus::Canceled);
    assert_eq!(status.cancellation_reason.as_deref(), Some("too pricey"));
    assert_eq!(status.analyses_used, 1);
}
