//! Playdesk - Session tracking and billing for supervised play areas
//!
//! This library provides the core functionality: token toggle check-in and
//! check-out, billing and receipts, and the history ledger with reports.

pub mod api;
pub mod config;
pub mod db;
pub mod models;
pub mod services;
