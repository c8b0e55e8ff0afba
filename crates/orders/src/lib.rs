//! `comptoir-orders` — the order aggregate and its pure business rules.
//!
//! Everything here is deterministic and storage-free: the status machine,
//! payment settlement arithmetic, line totals, and the line-reconciliation
//! planner. The reconciliation engine in `comptoir-store` drives these rules
//! inside its unit of work.

pub mod lines;
pub mod order;
pub mod payment;
pub mod status;

pub use lines::{CatalogProduct, CatalogService, CatalogSnapshot, LinePlan, LineSpec, plan_lines};
pub use order::{LineItem, Order, OrderLine};
pub use payment::{
    Payment, PaymentMode, PaymentSummary, SettlementStatus, validate_payment_amount,
};
pub use status::{OrderStatus, TransitionEffect, check_transition};
