// src/models.rs

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

impl fmt::Display for UnknownVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown {} value: {}", self.kind, self.value)
    }
}

impl std::error::Error for UnknownVariant {}

/// Declares a text-backed enum: stored as lowercase text in Postgres,
/// serialized the same way in JSON.
macro_rules! text_enum {
    ($(#[$meta:meta])* $name:ident, $kind:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(UnknownVariant {
                        kind: $kind,
                        value: other.to_string(),
                    }),
                }
            }
        }
    };
}

text_enum!(
    /// Subscription level; decides the monthly analysis quota.
    Tier, "tier", {
        Free => "free",
        Pro => "pro",
    }
);

impl Tier {
    pub fn monthly_limit(self) -> i32 {
        match self {
            Tier::Free => 3,
            Tier::Pro => 50,
        }
    }

    /// Checkout price in USD. The free tier is never sold.
    pub fn price(self) -> u32 {
        match self {
            Tier::Free => 0,
            Tier::Pro => 9,
        }
    }
}

text_enum!(SubscriptionStatus, "subscription status", {
    Active => "active",
    Canceled => "canceled",
    Paused => "paused",
    Expired => "expired",
});

text_enum!(PaymentStatus, "payment status", {
    Pending => "pending",
    Active => "active",
    Canceled => "canceled",
    PastDue => "past_due",
});

text_enum!(HistoryAction, "history action", {
    Created => "created",
    Upgraded => "upgraded",
    Canceled => "canceled",
    Downgraded => "downgraded",
    Reactivated => "reactivated",
    Renewed => "renewed",
});

text_enum!(CheckoutMode, "checkout mode", {
    Test => "test",
    Production => "production",
});

text_enum!(PaymentSessionStatus, "payment session status", {
    Pending => "pending",
    Completed => "completed",
});

/// One row of `user_subscriptions`.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct SubscriptionRecord {
    pub user_id: Uuid,
    pub tier: Tier,
    pub analyses_used: i32,
    pub monthly_limit: i32,
    pub billing_period_start: DateTime<Utc>,
    pub billing_period_end: DateTime<Utc>,
    pub status: SubscriptionStatus,
    pub payment_status: PaymentStatus,
    pub payment_reference: Option<String>,
    pub canceled_at: Option<DateTime<Utc>>,
    pub cancellation_reason: Option<String>,
    pub grace_period_end: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SubscriptionHistoryEntry {
    pub id: Uuid,
    pub action: HistoryAction,
    pub previous_tier: Option<String>,
    pub new_tier: Option<String>,
    pub reason: Option<String>,
    #[schema(value_type = Option<Object>)]
    pub metadata: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct AnalysisRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub overall_score: f64,
    pub skin_score: f64,
    pub nail_score: f64,
    pub structure_score: f64,
    pub symmetry_score: f64,
    pub cleanliness_score: f64,
    pub detected_issues: Vec<String>,
    pub improvement_tips: Vec<String>,
    pub confidence_score: f64,
    pub parse_mode: String,
    #[schema(value_type = Object)]
    pub full_analysis: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PaymentSession {
    pub session_id: String,
    pub user_id: Uuid,
    pub plan: Tier,
    pub amount: String,
    pub mode: CheckoutMode,
    pub status: PaymentSessionStatus,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct UserProfile {
    pub user_id: Uuid,
    pub email: String,
    pub username: Option<String>,
    pub full_name: Option<String>,
    pub avatar_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
