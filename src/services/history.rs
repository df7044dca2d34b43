//! History service
//!
//! Ledger access and reporting: record, backfill, per-session lookup,
//! paginated queries and daily/range aggregates. Whole-day windows are
//! computed in the configured reporting UTC offset and applied to
//! `exit_time`.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, FixedOffset, NaiveDate, NaiveTime, Offset, TimeZone, Utc};
use serde::Deserialize;

use crate::db::repositories::{HistoryRepository, SessionRepository};
use crate::models::{
    DailyReport, HistoryFilter, HistoryPage, HistoryRecord, NewHistoryRecord, PageTotals, RangeReport,
    Session,
};
use crate::services::error::{bounded, ServiceError};
use crate::services::session::Clock;

/// Default page size
pub const DEFAULT_LIMIT: u32 = 50;
/// Largest page size
pub const MAX_LIMIT: u32 = 1000;
/// Largest page number
pub const MAX_PAGE: u32 = 10_000;

const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(5);

/// Raw ledger query parameters as supplied by a caller
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HistoryQuery {
    pub token: Option<String>,
    /// Single day, `YYYY-MM-DD`; takes precedence over `from`/`to`
    pub date: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

/// History service
pub struct HistoryService {
    repo: Arc<dyn HistoryRepository>,
    sessions: Arc<dyn SessionRepository>,
    offset: FixedOffset,
    store_timeout: Duration,
    clock: Clock,
}

impl HistoryService {
    /// Create a new history service reporting in UTC
    pub fn new(repo: Arc<dyn HistoryRepository>, sessions: Arc<dyn SessionRepository>) -> Self {
        Self {
            repo,
            sessions,
            offset: Utc.fix(),
            store_timeout: DEFAULT_STORE_TIMEOUT,
            clock: Arc::new(Utc::now),
        }
    }

    /// Local offset used for whole-day windows
    pub fn with_offset(mut self, offset: FixedOffset) -> Self {
        self.offset = offset;
        self
    }

    /// Bound every store call by `timeout`
    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    /// Replace the clock (tests drive time explicitly)
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    fn today(&self) -> NaiveDate {
        self.now().with_timezone(&self.offset).date_naive()
    }

    /// Rebuild the ledger row of a session from its current fields
    pub async fn backfill(&self, session_id: &str) -> Result<HistoryRecord, ServiceError> {
        let session = bounded(self.store_timeout, "get_by_id", self.sessions.get_by_id(session_id))
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Session {} not found", session_id)))?;

        let record = archive(&session, self.now())?;
        let stored = bounded(self.store_timeout, "history_upsert", self.repo.upsert(&record)).await?;

        tracing::info!(session_id = %session_id, record_id = stored.id, "history backfilled");
        Ok(stored)
    }

    /// Ledger row of one session
    pub async fn by_session(&self, session_id: &str) -> Result<HistoryRecord, ServiceError> {
        bounded(
            self.store_timeout,
            "history_by_session",
            self.repo.get_by_session(session_id),
        )
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("No history for session {}", session_id)))
    }

    /// Filtered, paginated ledger listing with totals over the whole filter
    pub async fn query(&self, query: &HistoryQuery) -> Result<HistoryPage, ServiceError> {
        let page = query.page.unwrap_or(1).clamp(1, MAX_PAGE);
        let limit = query.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);

        let mut filter = HistoryFilter {
            token: query
                .token
                .as_deref()
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string),
            ..HistoryFilter::default()
        };

        if let Some(date) = non_empty(&query.date) {
            let (start, end) = self.day_window(parse_date("date", date)?);
            filter.exit_from = Some(start);
            filter.exit_to = Some(end);
        } else {
            if let Some(from) = non_empty(&query.from) {
                filter.exit_from = Some(self.day_window(parse_date("from", from)?).0);
            }
            if let Some(to) = non_empty(&query.to) {
                filter.exit_to = Some(self.day_window(parse_date("to", to)?).1);
            }
        }

        let offset = u64::from(page - 1) * u64::from(limit);
        let (items, totals) = futures::try_join!(
            bounded(self.store_timeout, "history_list", self.repo.list(&filter, limit, offset)),
            bounded(self.store_timeout, "history_totals", self.repo.totals(&filter)),
        )?;

        let total_pages = u32::try_from((totals.total_count + i64::from(limit) - 1) / i64::from(limit))
            .unwrap_or(u32::MAX);

        Ok(HistoryPage {
            page,
            limit,
            total: totals.total_count,
            total_pages,
            totals: PageTotals {
                total_amount: totals.total_amount,
                total_minutes: totals.total_minutes,
            },
            items,
        })
    }

    /// Aggregate one local day; today when `date` is absent
    pub async fn daily_report(&self, date: Option<&str>) -> Result<DailyReport, ServiceError> {
        let date = match date.map(str::trim).filter(|d| !d.is_empty()) {
            Some(raw) => parse_date("date", raw)?,
            None => self.today(),
        };
        let (start, end) = self.day_window(date);
        let filter = HistoryFilter {
            token: None,
            exit_from: Some(start),
            exit_to: Some(end),
        };

        let (items, totals) = futures::try_join!(
            bounded(self.store_timeout, "history_list", self.repo.list_all(&filter)),
            bounded(self.store_timeout, "history_totals", self.repo.totals(&filter)),
        )?;

        Ok(DailyReport { date, totals, items })
    }

    /// Aggregate a span of local days.
    ///
    /// At least one bound is required; a missing `to` means now and a missing
    /// `from` means the start of the ledger. A `from` after today with no `to`
    /// yields an empty report.
    pub async fn range_report(&self, from: Option<&str>, to: Option<&str>) -> Result<RangeReport, ServiceError> {
        let from = from.map(str::trim).filter(|d| !d.is_empty());
        let to = to.map(str::trim).filter(|d| !d.is_empty());
        if from.is_none() && to.is_none() {
            return Err(ServiceError::ValidationError(
                "At least one of from/to is required".to_string(),
            ));
        }

        let (from_date, exit_from) = match from {
            Some(raw) => {
                let date = parse_date("from", raw)?;
                (date, self.day_window(date).0)
            }
            None => {
                let epoch = DateTime::<Utc>::from(std::time::UNIX_EPOCH);
                (epoch.with_timezone(&self.offset).date_naive(), epoch)
            }
        };
        let (to_date, exit_to) = match to {
            Some(raw) => {
                let date = parse_date("to", raw)?;
                (date, self.day_window(date).1)
            }
            None => (self.today().max(from_date), self.now()),
        };
        if from_date > to_date {
            return Err(ServiceError::ValidationError(format!(
                "from ({}) must not be after to ({})",
                from_date, to_date
            )));
        }

        let filter = HistoryFilter {
            token: None,
            exit_from: Some(exit_from),
            exit_to: Some(exit_to),
        };
        let (items, totals) = futures::try_join!(
            bounded(self.store_timeout, "history_list", self.repo.list_all(&filter)),
            bounded(self.store_timeout, "history_totals", self.repo.totals(&filter)),
        )?;

        Ok(RangeReport {
            from: from_date,
            to: to_date,
            totals,
            items,
        })
    }

    /// `[start, end]` of a local calendar day, in UTC, millisecond-inclusive
    fn day_window(&self, date: NaiveDate) -> (DateTime<Utc>, DateTime<Utc>) {
        let local_midnight = date.and_time(NaiveTime::default());
        let start = Utc.from_utc_datetime(&(local_midnight - self.offset));
        (start, start + ChronoDuration::days(1) - ChronoDuration::milliseconds(1))
    }
}

fn archive(session: &Session, now: DateTime<Utc>) -> Result<NewHistoryRecord, ServiceError> {
    NewHistoryRecord::from_session(session, now).ok_or_else(|| {
        ServiceError::InvalidTransition(format!(
            "Session {} is still open; only closed sessions are archived",
            session.id
        ))
    })
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn parse_date(field: &str, raw: &str) -> Result<NaiveDate, ServiceError> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|_| {
        ServiceError::ValidationError(format!("{} must be a YYYY-MM-DD date, got {:?}", field, raw))
    })
}
