//! Session service
//!
//! Business logic for play sessions:
//! - Token scans toggling between check-in and checkout
//! - Extending prepaid time
//! - Manual (operator) checkout and receipt reprint
//! - Session lookups
//!
//! Every store call runs under the configured store timeout. Races between
//! concurrent requests are arbitrated by guarded writes in the repository,
//! and a loser always gets `Conflict`.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};

use crate::config::TokenConfig;
use crate::db::repositories::SessionRepository;
use crate::models::{CheckinDetails, RatePolicy, Receipt, Session, Toggle};
use crate::services::billing;
use crate::services::error::{bounded, ServiceError};

/// Source of the current instant
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Longest single extension, in minutes
pub const MAX_EXTEND_MINUTES: i64 = 24 * 60;

/// Default store deadline when none is configured
const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(5);

/// Session service
pub struct SessionService {
    repo: Arc<dyn SessionRepository>,
    policy: RatePolicy,
    token_rules: TokenConfig,
    store_timeout: Duration,
    clock: Clock,
}

impl SessionService {
    /// Create a new session service with default token rules and wall-clock time
    pub fn new(repo: Arc<dyn SessionRepository>, policy: RatePolicy) -> Self {
        Self {
            repo,
            policy,
            token_rules: TokenConfig::default(),
            store_timeout: DEFAULT_STORE_TIMEOUT,
            clock: Arc::new(Utc::now),
        }
    }

    /// Use custom token rules
    pub fn with_token_rules(mut self, token_rules: TokenConfig) -> Self {
        self.token_rules = token_rules;
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


    /// Current instant, truncated to the millisecond precision the store keeps
    fn now(&self) -> DateTime<Utc> {
        let now = (self.clock)();
        Utc.timestamp_millis_opt(now.timestamp_millis())
            .single()
            .unwrap_or(now)
    }

    /// Trim and check a scanned token
    pub fn validate_token(&self, raw: &str) -> Result<String, ServiceError> {
        let token = raw.trim();
        let len = token.chars().count();

        if token.is_empty() {
            return Err(ServiceError::ValidationError("Token cannot be empty".to_string()));
        }
        if !token.chars().all(|c| c.is_ascii_digit()) {
            return Err(ServiceError::ValidationError(format!(
                "Token must contain digits only: {}",
                token
            )));
        }
        if len < self.token_rules.min_length || len > self.token_rules.max_length {
            return Err(ServiceError::ValidationError(format!(
                "Token length must be between {} and {} digits, got {}",
                self.token_rules.min_length, self.token_rules.max_length, len
            )));
        }

        Ok(token.to_string())
    }

    /// Handle a token scan: check in when the token is free, otherwise check
    /// out its open session.
    ///
    /// Both branches only commit against the state that was read: a check-in
    /// requires the token's session count to be unchanged and a checkout
    /// requires the billed session to be untouched. A scan that loses either
    /// race fails with `Conflict` instead of flipping state twice.
    pub async fn toggle(&self, raw_token: &str, details: CheckinDetails) -> Result<Toggle, ServiceError> {
        let token = self.validate_token(raw_token)?;
        let now = self.now();
        let guard = self.token_rules.rescan_guard();

        let seen = bounded(
            self.store_timeout,
            "count_by_token",
            self.repo.count_by_token(&token),
        )
        .await?;
        let open = bounded(
            self.store_timeout,
            "find_open_by_token",
            self.repo.find_open_by_token(&token),
        )
        .await?;

        match open {
            Some(session) => {
                if guard > chrono::Duration::zero() && now - session.entry_time < guard {
                    tracing::warn!(token = %token, session_id = %session.id, "duplicate scan right after check-in");
                    return Err(ServiceError::Conflict(format!(
                        "Token {} was checked in moments ago",
                        token
                    )));
                }
                let (_, receipt) = self.close(&session, now, None).await?;
                Ok(Toggle::Checkout { receipt })
            }
            None => {
                if guard > chrono::Duration::zero() {
                    let latest = bounded(
                        self.store_timeout,
                        "find_latest_by_token",
                        self.repo.find_latest_by_token(&token),
                    )
                    .await?;
                    if let Some(exit_time) = latest.and_then(|s| s.exit_time) {
                        if now - exit_time < guard {
                            tracing::warn!(token = %token, "duplicate scan right after checkout");
                            return Err(ServiceError::Conflict(format!(
                                "Token {} was checked out moments ago",
                                token
                            )));
                        }
                    }
                }
                let session = self.check_in(token, details, now, seen).await?;
                Ok(Toggle::Checkin { session })
            }
        }
    }

    async fn check_in(
        &self,
        token: String,
        details: CheckinDetails,
        now: DateTime<Utc>,
        seen: i64,
    ) -> Result<Session, ServiceError> {
        let session = Session::open(token, details, &self.policy, now);

        let inserted = bounded(
            self.store_timeout,
            "insert_open",
            self.repo.insert_open(&session, seen),
        )
        .await?;
        if !inserted {
            tracing::warn!(token = %session.token_code, "check-in lost race for token");
            return Err(ServiceError::Conflict(format!(
                "Token {} changed state during the scan",
                session.token_code
            )));
        }

        tracing::info!(
            session_id = %session.id,
            token = %session.token_code,
            paid_until = %session.paid_until,
            "checked in"
        );
        Ok(session)
    }

    /// Bill and close an open session in one guarded store transaction
    async fn close(
        &self,
        session: &Session,
        now: DateTime<Utc>,
        extra_minutes_override: Option<i64>,
    ) -> Result<(Session, Receipt), ServiceError> {
        if session.is_closed() {
            return Err(ServiceError::InvalidTransition(format!(
                "Session {} is already closed",
                session.id
            )));
        }

        let receipt = billing::compute_receipt(session, now, &self.policy, extra_minutes_override);
        let closure = billing::closure_for(&receipt);

        let closed = bounded(self.store_timeout, "close", self.repo.close(&session.id, &closure)).await?;
        match closed {
            Some(closed) => {
                tracing::info!(
                    session_id = %closed.id,
                    token = %closed.token_code,
                    extra_minutes = receipt.extra_minutes,
                    total = receipt.total,
                    "checked out"
                );
                Ok((closed, receipt))
            }
            None => {
                let current = self.require(&session.id).await?;
                let reason = if current.is_closed() {
                    "was closed by a concurrent request"
                } else {
                    "was extended while being billed"
                };
                tracing::warn!(session_id = %session.id, reason, "checkout lost race for session");
                Err(ServiceError::Conflict(format!("Session {} {}", session.id, reason)))
            }
        }
    }

    /// Add prepaid minutes to an open session
    pub async fn extend(&self, session_id: &str, minutes: i64) -> Result<Session, ServiceError> {
        if !(1..=MAX_EXTEND_MINUTES).contains(&minutes) {
            return Err(ServiceError::ValidationError(format!(
                "Minutes must be between 1 and {}, got {}",
                MAX_EXTEND_MINUTES, minutes
            )));
        }

        let extended = bounded(
            self.store_timeout,
            "extend_open",
            self.repo.extend_open(session_id, minutes),
        )
        .await?;

        let session = self.require(session_id).await?;
        if !extended {
            return Err(ServiceError::InvalidTransition(format!(
                "Session {} is closed and cannot be extended",
                session_id
            )));
        }

        tracing::info!(session_id = %session.id, minutes, paid_until = %session.paid_until, "extended");
        Ok(session)
    }

    /// Operator checkout.
    ///
    /// `extra_minutes_override` of 0 bills the computed overage; a positive
    /// value replaces it.
    pub async fn checkout(&self, session_id: &str, extra_minutes_override: i64) -> Result<Session, ServiceError> {
        if extra_minutes_override < 0 {
            return Err(ServiceError::ValidationError(format!(
                "Extra minutes cannot be negative, got {}",
                extra_minutes_override
            )));
        }

        let session = self.require(session_id).await?;
        let now = self.now();
        let (closed, _) = self.close(&session, now, Some(extra_minutes_override)).await?;
        Ok(closed)
    }

    /// Regenerate the receipt of a closed session
    pub async fn reprint(&self, session_id: &str) -> Result<Receipt, ServiceError> {
        let session = self.require(session_id).await?;

        billing::receipt_from_closed(&session, &self.policy, self.now()).ok_or_else(|| {
            ServiceError::InvalidTransition(format!(
                "Session {} is still open; nothing to reprint",
                session_id
            ))
        })
    }

    /// All sessions, newest first
    pub async fn list_sessions(&self) -> Result<Vec<Session>, ServiceError> {
        bounded(self.store_timeout, "list_sessions", self.repo.list()).await
    }

    /// Session by ID
    pub async fn get(&self, session_id: &str) -> Result<Session, ServiceError> {
        self.require(session_id).await
    }

    /// Session by its public QR identifier
    pub async fn get_by_qr(&self, qr_code: &str) -> Result<Session, ServiceError> {
        bounded(self.store_timeout, "get_by_qr", self.repo.get_by_qr(qr_code))
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("No session with QR code {}", qr_code)))
    }

    /// Open session of a token, or its most recent session when none is open
    pub async fn get_by_code(&self, code: &str) -> Result<Session, ServiceError> {
        let token = code.trim();
        let open = bounded(
            self.store_timeout,
            "find_open_by_token",
            self.repo.find_open_by_token(token),
        )
        .await?;
        if let Some(session) = open {
            return Ok(session);
        }

        bounded(
            self.store_timeout,
            "find_latest_by_token",
            self.repo.find_latest_by_token(token),
        )
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("No session for token {}", token)))
    }

    /// Every session ever bound to a token, newest first
    pub async fn history_by_token(&self, raw_token: &str) -> Result<Vec<Session>, ServiceError> {
        let token = self.validate_token(raw_token)?;
        bounded(self.store_timeout, "list_by_token", self.repo.list_by_token(&token)).await
    }

    async fn require(&self, session_id: &str) -> Result<Session, ServiceError> {
        bounded(self.store_timeout, "get_by_id", self.repo.get_by_id(session_id))
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Session {} not found", session_id)))
    }
}
