//! `comptoir-billing` — invoice and receipt documents.
//!
//! Builds the structured document data from order state, allocates the
//! sequential document numbers, and hands rendering to the external
//! [`DocumentRenderer`] capability. Rendering internals (PDF/PNG layout) are
//! explicitly not modeled here.

pub mod invoice;
pub mod receipt;
pub mod renderer;

pub use invoice::{Invoice, InvoiceData, InvoiceLine, PartyInfo, invoice_data_from_order};
pub use receipt::{Receipt, ReceiptData, receipt_data};
pub use renderer::{DocumentRenderer, FileRenderer, RenderError, RenderedDocument};

use chrono::Utc;
use uuid::Uuid;

/// Generate a unique opaque code (`FAC1754312345678-9F3A2C`).
///
/// Codes are identifiers for humans and logs; the sequential `number` is the
/// accounting-facing series.
pub fn generate_code(prefix: &str) -> String {
    let suffix: String = Uuid::now_v7().simple().to_string()[26..32].to_uppercase();
    format!("{}{}-{}", prefix, Utc::now().timestamp_millis(), suffix)
}
