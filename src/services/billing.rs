//! Billing calculator
//!
//! Pure functions turning a session plus a rate policy into a bill. Nothing
//! here touches the store or the clock; callers pass `now` in.

use chrono::{DateTime, Utc};

use crate::models::{ceil_minutes, RatePolicy, RateSnapshot, Receipt, Rounding, Session, SessionClosure};

/// Overage charge for a number of extra minutes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Charge {
    pub extra_minutes: i64,
    pub extra_fee: i64,
    pub total: i64,
}

/// Started minutes past `paid_until`; zero when leaving on time
pub fn overage_minutes(paid_until: DateTime<Utc>, exit_time: DateTime<Utc>) -> i64 {
    ceil_minutes((exit_time - paid_until).num_milliseconds())
}

/// Price `extra_minutes` on top of `base_amount`.
///
/// Minute counts are never rounded; only the fee and the total are.
pub fn charge(base_amount: i64, extra_minutes: i64, per_minute: i64, rounding: &Rounding) -> Charge {
    let extra_fee = rounding.apply(extra_minutes.saturating_mul(per_minute));
    Charge {
        extra_minutes,
        extra_fee,
        total: rounding.apply(base_amount.saturating_add(extra_fee)),
    }
}

/// Bill an open session leaving at `exit_time` under `policy`.
///
/// A positive `extra_minutes_override` replaces the computed overage.
pub fn compute_receipt(
    session: &Session,
    exit_time: DateTime<Utc>,
    policy: &RatePolicy,
    extra_minutes_override: Option<i64>,
) -> Receipt {
    let extra_minutes = match extra_minutes_override {
        Some(minutes) if minutes > 0 => minutes,
        _ => overage_minutes(session.paid_until, exit_time),
    };
    let charge = charge(session.base_amount, extra_minutes, policy.per_minute, &policy.rounding);

    Receipt {
        session_id: session.id.clone(),
        token: session.token_code.clone(),
        currency: policy.currency.clone(),
        entry_time: session.entry_time,
        paid_until: session.paid_until,
        exit_time,
        included_minutes: session.included_minutes,
        extra_minutes: charge.extra_minutes,
        per_minute: policy.per_minute,
        base_amount: session.base_amount,
        extra_fee: charge.extra_fee,
        total: charge.total,
        rounding: policy.rounding,
        policy_version: policy.version.clone(),
        printed_at: exit_time,
    }
}

/// Field values the close must persist for `receipt`
pub fn closure_for(receipt: &Receipt) -> SessionClosure {
    SessionClosure {
        billed_until: receipt.paid_until,
        exit_time: receipt.exit_time,
        extra_minutes: receipt.extra_minutes,
        extra_fee: receipt.extra_fee,
        paid_amount: receipt.total,
        rate: RateSnapshot {
            version: receipt.policy_version.clone(),
            currency: receipt.currency.clone(),
            per_minute: receipt.per_minute,
            rounding: receipt.rounding,
        },
    }
}

/// Regenerate the receipt of a closed session from its stored fields.
///
/// `fallback` supplies rate details for sessions closed before rate
/// snapshots were stored. Returns `None` for an open session.
pub fn receipt_from_closed(session: &Session, fallback: &RatePolicy, printed_at: DateTime<Utc>) -> Option<Receipt> {
    let exit_time = session.exit_time?;
    let rate = session.rate.clone().unwrap_or_else(|| fallback.snapshot());

    Some(Receipt {
        session_id: session.id.clone(),
        token: session.token_code.clone(),
        currency: rate.currency,
        entry_time: session.entry_time,
        paid_until: session.paid_until,
        exit_time,
        included_minutes: session.included_minutes,
        extra_minutes: session.extra_minutes,
        per_minute: rate.per_minute,
        base_amount: session.base_amount,
        extra_fee: session.extra_fee,
        total: session.paid_amount,
        rounding: rate.rounding,
        policy_version: rate.version,
        printed_at,
    })
}
