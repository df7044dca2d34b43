//! Services layer - Business logic
//!
//! This module contains the business logic of the play-area desk.
//! Services are responsible for:
//! - Enforcing session lifecycle rules
//! - Billing and receipts
//! - Bounding and classifying store failures

pub mod billing;
pub mod error;
pub mod history;
pub mod session;

pub use billing::{charge, closure_for, compute_receipt, overage_minutes, receipt_from_closed, Charge};
pub use error::ServiceError;
pub use history::{HistoryQuery, HistoryService};
pub use session::{Clock, SessionService};
