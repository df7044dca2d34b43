//! Receipt model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Rounding;

/// Billing breakdown handed back on checkout and reprint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub session_id: String,
    pub token: String,
    pub currency: String,
    pub entry_time: DateTime<Utc>,
    pub paid_until: DateTime<Utc>,
    pub exit_time: DateTime<Utc>,
    pub included_minutes: i64,
    pub extra_minutes: i64,
    pub per_minute: i64,
    pub base_amount: i64,
    pub extra_fee: i64,
    pub total: i64,
    pub rounding: Rounding,
    pub policy_version: String,
    pub printed_at: DateTime<Utc>,
}
