//! `comptoir-catalog` — product and service catalog entities.
//!
//! Catalog metadata CRUD is thin; what matters to the rest of the system is
//! the sellability check and the price snapshot each order line takes at
//! reconciliation time. Stock is owned by the stock ledger and only mirrored
//! on the product row.

pub mod client;
pub mod product;
pub mod service;

pub use client::Client;
pub use product::Product;
pub use service::Service;
