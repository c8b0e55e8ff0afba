//! `comptoir-store` — storage boundary and the order reconciliation engine.
//!
//! The [`Store`]/[`Uow`] traits define an explicit unit-of-work surface with
//! two implementations: [`MemoryStore`] for dev/tests and [`PgStore`] for
//! production (PostgreSQL row locks via `FOR UPDATE`). The
//! [`OrderEngine`] drives every order mutation through one unit of work, and
//! the `jobs` module is the durable outbox that carries post-commit work
//! (document generation, notifications).

pub mod engine;
pub mod error;
mod integration_tests;
pub mod jobs;
pub mod memory;
pub mod notify;
pub mod postgres;
pub mod store;

pub use engine::{ActorContext, CreateOrderRequest, OrderEngine, OrderPatch};
pub use error::{StoreError, StoreResult};
pub use memory::MemoryStore;
pub use notify::{NotificationSink, RecordingNotificationSink, TracingNotificationSink};
pub use postgres::PgStore;
pub use store::{MovementFilter, OrderFilter, Page, Store, Uow};
