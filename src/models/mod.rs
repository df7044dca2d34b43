//! Data models
//!
//! This module contains the data structures used throughout Playdesk:
//! - Store entities (Session, HistoryRecord)
//! - The pricing table (RatePolicy) and its frozen per-bill snapshot
//! - Derived values returned to callers (Receipt, Toggle, reports)

mod history;
mod rate_policy;
mod receipt;
mod session;

pub use history::{
    ceil_minutes, DailyReport, HistoryFilter, HistoryPage, HistoryRecord, HistoryTotals,
    NewHistoryRecord, PageTotals, RangeReport,
};
pub use rate_policy::{RatePolicy, RateSnapshot, Rounding, RoundingStrategy};
pub use receipt::Receipt;
pub use session::{CheckinDetails, Session, SessionClosure, Toggle};
