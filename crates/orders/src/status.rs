//! Order status machine.
//!
//! The full role/status transition rule lives in one exhaustive construct,
//! [`check_transition`]. Nothing else in the system decides whether a status
//! change is legal.

use core::str::FromStr;

use serde::{Deserialize, Serialize};

use comptoir_core::{DomainError, DomainResult};
use comptoir_auth::Role;

/// Lifecycle status of an order.
///
/// `Pending` is the only state accepting line edits. The finalized family
/// (validated/confirmed/delivered/completed) and `Cancelled` are terminal for
/// everything except payment recording.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Pending,
    Validated,
    Confirmed,
    Delivered,
    Completed,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::Validated => "VALIDATED",
            OrderStatus::Confirmed => "CONFIRMED",
            OrderStatus::Delivered => "DELIVERED",
            OrderStatus::Completed => "COMPLETED",
            OrderStatus::Cancelled => "CANCELLED",
        }
    }

    /// The finalized family: statuses a pending order is "validated into".
    pub fn is_finalized(self) -> bool {
        matches!(
            self,
            OrderStatus::Validated
                | OrderStatus::Confirmed
                | OrderStatus::Delivered
                | OrderStatus::Completed
        )
    }

    /// Terminal for line/field edits.
    pub fn is_terminal(self) -> bool {
        self.is_finalized() || self == OrderStatus::Cancelled
    }
}

impl FromStr for OrderStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "PENDING" => Ok(OrderStatus::Pending),
            "VALIDATED" => Ok(OrderStatus::Validated),
            "CONFIRMED" => Ok(OrderStatus::Confirmed),
            "DELIVERED" => Ok(OrderStatus::Delivered),
            "COMPLETED" => Ok(OrderStatus::Completed),
            "CANCELLED" => Ok(OrderStatus::Cancelled),
            other => Err(DomainError::validation(format!(
                "unknown order status: {other}"
            ))),
        }
    }
}

impl core::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a legal transition obliges the engine to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionEffect {
    /// True exactly for PENDING into the finalized family: the engine must
    /// run the stock-commitment workflow (once per order lifetime).
    pub commits_stock: bool,
}

/// The status-transition table.
///
/// Rules, in evaluation order:
/// - no self-transition;
/// - finalized/cancelled orders accept no further transitions;
/// - cancellation requires zero recorded payments, whatever the role;
/// - elevated roles may finalize to any member of the family; the employee
///   role only to the processing whitelist; any other role is refused.
pub fn check_transition(
    roles: &[Role],
    from: OrderStatus,
    to: OrderStatus,
    has_payments: bool,
) -> DomainResult<TransitionEffect> {
    if from == to {
        return Err(DomainError::validation(format!(
            "order is already {from}"
        )));
    }
    if from.is_terminal() {
        return Err(DomainError::immutable(format!(
            "order is {from} and accepts no further status change"
        )));
    }

    match to {
        OrderStatus::Cancelled => {
            if has_payments {
                return Err(DomainError::CannotCancelSettledOrder);
            }
            ensure_role_may_transition(roles, to)?;
            Ok(TransitionEffect {
                commits_stock: false,
            })
        }
        OrderStatus::Validated
        | OrderStatus::Confirmed
        | OrderStatus::Delivered
        | OrderStatus::Completed => {
            ensure_role_may_transition(roles, to)?;
            Ok(TransitionEffect {
                commits_stock: from == OrderStatus::Pending,
            })
        }
        OrderStatus::Pending => Err(DomainError::validation(
            "an order cannot move back to PENDING",
        )),
    }
}

/// Processing statuses the restricted (employee) role may move an order to.
const EMPLOYEE_WHITELIST: [OrderStatus; 5] = [
    OrderStatus::Validated,
    OrderStatus::Confirmed,
    OrderStatus::Delivered,
    OrderStatus::Completed,
    OrderStatus::Cancelled,
];

fn ensure_role_may_transition(roles: &[Role], to: OrderStatus) -> DomainResult<()> {
    if roles.iter().any(Role::is_elevated) {
        return Ok(());
    }
    let is_employee = roles.iter().any(|r| r.as_str() == Role::EMPLOYEE);
    if is_employee && EMPLOYEE_WHITELIST.contains(&to) {
        return Ok(());
    }
    Err(DomainError::forbidden(format!(
        "role may not move an order to {to}"
    )))
}
