//! Payment records and settlement arithmetic.

use core::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use comptoir_core::money::{MONEY_EPSILON, covers, exceeds, remaining_due};
use comptoir_core::{DomainError, DomainResult, OrderId, PaymentId};

/// Accepted payment instruments. Closed set; anything else is rejected at the
/// boundary with `InvalidPaymentMode`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMode {
    Cash,
    MobileMoney,
    Card,
    Check,
    Transfer,
}

impl PaymentMode {
    pub fn as_str(self) -> &'static str {
        match self {
            PaymentMode::Cash => "cash",
            PaymentMode::MobileMoney => "mobile_money",
            PaymentMode::Card => "card",
            PaymentMode::Check => "check",
            PaymentMode::Transfer => "transfer",
        }
    }
}

impl FromStr for PaymentMode {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "cash" => Ok(PaymentMode::Cash),
            "mobile_money" => Ok(PaymentMode::MobileMoney),
            "card" => Ok(PaymentMode::Card),
            "check" => Ok(PaymentMode::Check),
            "transfer" => Ok(PaymentMode::Transfer),
            other => Err(DomainError::InvalidPaymentMode(other.to_string())),
        }
    }
}

impl core::fmt::Display for PaymentMode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One immutable payment row. Never updated, never deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub id: PaymentId,
    pub order_id: OrderId,
    pub amount: f64,
    pub mode: PaymentMode,
    pub paid_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl Payment {
    pub fn new(order_id: OrderId, amount: f64, mode: PaymentMode) -> Self {
        let now = Utc::now();
        Self {
            id: PaymentId::new(),
            order_id,
            amount,
            mode,
            paid_at: now,
            created_at: now,
        }
    }
}

/// Derived settlement state of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SettlementStatus {
    Unpaid,
    Partial,
    Paid,
}

impl SettlementStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SettlementStatus::Unpaid => "UNPAID",
            SettlementStatus::Partial => "PARTIAL",
            SettlementStatus::Paid => "PAID",
        }
    }
}

impl FromStr for SettlementStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "UNPAID" => Ok(SettlementStatus::Unpaid),
            "PARTIAL" => Ok(SettlementStatus::Partial),
            "PAID" => Ok(SettlementStatus::Paid),
            other => Err(DomainError::validation(format!(
                "unknown settlement status: {other}"
            ))),
        }
    }
}

/// Derived payment aggregate; computed on read, mirrored onto the order row
/// inside the same transaction as the payment insert.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PaymentSummary {
    pub paid_total: f64,
    pub remaining: f64,
    pub status: SettlementStatus,
}

impl PaymentSummary {
    pub fn compute(total: f64, paid_total: f64) -> Self {
        let status = if paid_total <= 0.0 {
            SettlementStatus::Unpaid
        } else if covers(paid_total, total) {
            SettlementStatus::Paid
        } else {
            SettlementStatus::Partial
        };
        Self {
            paid_total,
            remaining: remaining_due(total, paid_total),
            status,
        }
    }
}

/// Precondition check for inserting a payment against an order.
///
/// `already_paid` is the authoritative sum of prior payments, read under the
/// order-row lock.
pub fn validate_payment_amount(
    amount: f64,
    total: f64,
    already_paid: f64,
) -> DomainResult<()> {
    if !amount.is_finite() || amount <= MONEY_EPSILON {
        return Err(DomainError::validation("payment amount must be positive"));
    }
    if covers(already_paid, total) {
        return Err(DomainError::OrderAlreadySettled);
    }
    let remaining = remaining_due(total, already_paid);
    if exceeds(amount, remaining) {
        return Err(DomainError::validation(format!(
            "amount exceeds remaining due ({remaining})"
        )));
    }
    Ok(())
}
