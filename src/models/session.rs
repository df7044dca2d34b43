//! Play session model

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{RatePolicy, RateSnapshot, Receipt};

/// One child's timed visit, from check-in to checkout.
///
/// Open while `exit_time` is unset. Once closed, every field is frozen and
/// the bill can be regenerated from `base_amount`, `extra_minutes`,
/// `extra_fee`, `paid_amount` and the stored `rate` snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    /// Numeric code of the physical token; unique among open sessions
    pub token_code: String,
    /// Public identifier for status pages
    pub qr_code: String,
    pub name: Option<String>,
    pub parent_name: Option<String>,
    pub entry_time: DateTime<Utc>,
    pub paid_until: DateTime<Utc>,
    pub exit_time: Option<DateTime<Utc>>,
    pub included_minutes: i64,
    pub base_amount: i64,
    pub extra_minutes: i64,
    pub extra_fee: i64,
    pub paid_amount: i64,
    /// Policy values used for the final bill; set at checkout
    pub rate: Option<RateSnapshot>,
}

impl Session {
    /// Build a fresh open session for `token` starting at `now`
    pub fn open(token: String, details: CheckinDetails, policy: &RatePolicy, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            token_code: token,
            qr_code: Uuid::new_v4().simple().to_string(),
            name: details.name.filter(|s| !s.trim().is_empty()),
            parent_name: details.parent_name.filter(|s| !s.trim().is_empty()),
            entry_time: now,
            paid_until: now + Duration::minutes(policy.included_minutes),
            exit_time: None,
            included_minutes: policy.included_minutes,
            base_amount: policy.flat_fee,
            extra_minutes: 0,
            extra_fee: 0,
            paid_amount: 0,
            rate: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.exit_time.is_none()
    }

    pub fn is_closed(&self) -> bool {
        self.exit_time.is_some()
    }
}

/// Optional descriptive fields supplied with a check-in scan
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CheckinDetails {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub parent_name: Option<String>,
}

/// Field values written by the guarded close of an open session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionClosure {
    /// `paid_until` the bill was computed against; the close only applies
    /// while the stored row still has this value
    pub billed_until: DateTime<Utc>,
    pub exit_time: DateTime<Utc>,
    pub extra_minutes: i64,
    pub extra_fee: i64,
    pub paid_amount: i64,
    pub rate: RateSnapshot,
}

/// Transition taken by a token scan
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum Toggle {
    Checkin { session: Session },
    Checkout { receipt: Receipt },
}

impl Toggle {
    pub fn is_checkin(&self) -> bool {
        matches!(self, Self::Checkin { .. })
    }

    pub fn is_checkout(&self) -> bool {
        matches!(self, Self::Checkout { .. })
    }
}
