//! `comptoir-core` — shared domain primitives.
//!
//! Typed identifiers, the domain error model, monetary arithmetic with the
//! rounding tolerance used across the payment ledger, and sequential
//! business-number formatting. No I/O lives here.

pub mod error;
pub mod id;
pub mod money;
pub mod sequence;

pub use error::{DomainError, DomainResult};
pub use id::{
    ClientId, InvoiceId, MovementId, OrderId, OrderLineId, PaymentId, ProductId, ReceiptId,
    ServiceId, UserId,
};
pub use money::{MONEY_EPSILON, covers, exceeds, remaining_due};
pub use sequence::{next_sequential, parse_sequential};
