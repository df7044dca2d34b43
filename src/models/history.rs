//! History ledger models

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::Session;

/// Archived snapshot of a closed session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub id: i64,
    pub session_id: String,
    pub token_code: String,
    pub entry_time: DateTime<Utc>,
    pub exit_time: DateTime<Utc>,
    pub paid_amount: i64,
    pub name: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

impl HistoryRecord {
    /// Billed duration in started minutes
    pub fn duration_minutes(&self) -> i64 {
        ceil_minutes((self.exit_time - self.entry_time).num_milliseconds())
    }
}

/// Ledger row to be written (insert or upsert)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewHistoryRecord {
    pub session_id: String,
    pub token_code: String,
    pub entry_time: DateTime<Utc>,
    pub exit_time: DateTime<Utc>,
    pub paid_amount: i64,
    pub name: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

impl NewHistoryRecord {
    /// Snapshot a session; `None` while the session is still open
    pub fn from_session(session: &Session, recorded_at: DateTime<Utc>) -> Option<Self> {
        let exit_time = session.exit_time?;
        Some(Self {
            session_id: session.id.clone(),
            token_code: session.token_code.clone(),
            entry_time: session.entry_time,
            exit_time,
            paid_amount: session.paid_amount,
            name: session.name.clone(),
            recorded_at,
        })
    }
}

/// Round a millisecond span up to whole minutes; negative spans count as zero
pub fn ceil_minutes(ms: i64) -> i64 {
    let ms = ms.max(0);
    ms / 60_000 + i64::from(ms % 60_000 != 0)
}

/// Resolved ledger filter: exit-time window and optional token
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HistoryFilter {
    pub token: Option<String>,
    pub exit_from: Option<DateTime<Utc>>,
    pub exit_to: Option<DateTime<Utc>>,
}

/// Aggregates over a filtered set
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryTotals {
    pub total_count: i64,
    pub total_amount: i64,
    pub total_minutes: i64,
}

/// Amount/minute totals as shown alongside a page of history
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageTotals {
    pub total_amount: i64,
    pub total_minutes: i64,
}

/// Paginated ledger listing
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryPage {
    pub page: u32,
    pub limit: u32,
    pub total: i64,
    pub total_pages: u32,
    pub totals: PageTotals,
    pub items: Vec<HistoryRecord>,
}

/// One-day aggregation
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyReport {
    pub date: NaiveDate,
    #[serde(flatten)]
    pub totals: HistoryTotals,
    pub items: Vec<HistoryRecord>,
}

/// Multi-day aggregation
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RangeReport {
    pub from: NaiveDate,
    pub to: NaiveDate,
    #[serde(flatten)]
    pub totals: HistoryTotals,
    pub items: Vec<HistoryRecord>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ceil_minutes() {
        assert_eq!(ceil_minutes(0), 0);
        assert_eq!(ceil_minutes(1), 1);
        assert_eq!(ceil_minutes(60_000), 1);
        assert_eq!(ceil_minutes(60_001), 2);
        assert_eq!(ceil_minutes(-5_000), 0);
    }

    #[test]
    fn test_daily_report_shape() {
        let report = DailyReport {
            date: NaiveDate::from_ymd_opt(2026, 3, 1).unwrap(),
            totals: HistoryTotals {
                total_count: 2,
                total_amount: 100_000,
                total_minutes: 125,
            },
            items: Vec::new(),
        };
        let value = serde_json::to_value(&report).unwrap();

        assert_eq!(value["date"], "2026-03-01");
        assert_eq!(value["totalCount"], 2);
        assert_eq!(value["totalAmount"], 100_000);
        assert_eq!(value["totalMinutes"], 125);
    }
}
