//! Standard handler wiring: outbox jobs onto the engine.

use std::sync::Arc;

use tracing::warn;

use comptoir_core::{OrderId, PaymentId};

use super::executor::JobExecutor;
use super::store::JobStore;
use super::types::{Job, JobResult};
use crate::engine::OrderEngine;
use crate::store::Store;

/// Register the handlers for the job kinds the engine enqueues.
pub fn register_engine_handlers<S>(executor: &mut JobExecutor<S>, engine: Arc<OrderEngine<S>>)
where
    S: Store + JobStore + 'static,
{
    let invoice_engine = engine.clone();
    executor.register_handler("billing.invoice", move |job: Job| {
        let engine = invoice_engine.clone();
        async move {
            let order_id = match payload_id::<OrderId>(&job, "order_id") {
                Ok(id) => id,
                Err(e) => return JobResult::Failure(e),
            };
            match engine.ensure_invoice(order_id).await {
                Ok(_) => JobResult::Success,
                Err(e) => JobResult::Failure(e.to_string()),
            }
        }
    });

    let receipt_engine = engine.clone();
    executor.register_handler("billing.receipt", move |job: Job| {
        let engine = receipt_engine.clone();
        async move {
            let order_id = match payload_id::<OrderId>(&job, "order_id") {
                Ok(id) => id,
                Err(e) => return JobResult::Failure(e),
            };
            let payment_id = match payload_id::<PaymentId>(&job, "payment_id") {
                Ok(id) => id,
                Err(e) => return JobResult::Failure(e),
            };
            match engine.create_receipt(order_id, payment_id).await {
                Ok(_) => JobResult::Success,
                Err(e) => JobResult::Failure(e.to_string()),
            }
        }
    });

    let sink = engine.notifier().clone();
    executor.register_handler("notify.message", move |job: Job| {
        let sink = sink.clone();
        async move {
            let title = job.payload.get("title").and_then(|v| v.as_str());
            let message = job.payload.get("message").and_then(|v| v.as_str());
            match (title, message) {
                (Some(title), Some(message)) => {
                    let meta = job
                        .payload
                        .get("meta")
                        .cloned()
                        .unwrap_or(serde_json::Value::Null);
                    sink.notify(title, message, meta);
                    JobResult::Success
                }
                _ => {
                    warn!(job_id = %job.id, "malformed notification payload");
                    JobResult::Failure("malformed notification payload".to_string())
                }
            }
        }
    });
}

fn payload_id<T: core::str::FromStr>(job: &Job, key: &str) -> Result<T, String> {
    job.payload
        .get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| format!("job payload missing {key}"))?
        .parse::<T>()
        .map_err(|_| format!("job payload has invalid {key}"))
}
