//! Integration tests for the reconciliation engine over the in-memory
//! backend.
//!
//! The in-memory backend honors the same unit-of-work contract as Postgres,
//! so the lifecycle, settlement, at-most-once and idempotence guarantees are
//! exercised here without a database.

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;

    use comptoir_auth::Role;
    use comptoir_billing::{
        DocumentRenderer, InvoiceData, ReceiptData, RenderError, RenderedDocument,
    };
    use comptoir_catalog::{Client, Product, Service};
    use comptoir_core::{DomainError, UserId};
    use comptoir_inventory::{MovementDirection, MovementSource, StockAdjustment};
    use comptoir_orders::{LineItem, LineSpec, OrderStatus, PaymentMode, SettlementStatus};

    use crate::engine::{ActorContext, CreateOrderRequest, OrderEngine, OrderPatch};
    use crate::jobs::{
        JobExecutor, JobExecutorConfig, JobKind, JobStore, register_engine_handlers,
    };
    use crate::memory::MemoryStore;
    use crate::notify::RecordingNotificationSink;
    use crate::store::{MovementFilter, Store};

    /// Renderer stub: no disk, fixed paths.
    struct NullRenderer;

    #[async_trait]
    impl DocumentRenderer for NullRenderer {
        async fn render_invoice(
            &self,
            data: &InvoiceData,
        ) -> Result<RenderedDocument, RenderError> {
            Ok(RenderedDocument {
                png_path: format!("invoices/facture-{}.png", data.number),
                pdf_path: format!("invoices/facture-{}.pdf", data.number),
            })
        }

        async fn render_receipt(
            &self,
            data: &ReceiptData,
        ) -> Result<RenderedDocument, RenderError> {
            Ok(RenderedDocument {
                png_path: format!("receipts/recu-{}.png", data.number),
                pdf_path: format!("receipts/recu-{}.pdf", data.number),
            })
        }
    }

    struct Fixture {
        store: Arc<MemoryStore>,
        engine: Arc<OrderEngine<MemoryStore>>,
        sink: Arc<RecordingNotificationSink>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let sink = Arc::new(RecordingNotificationSink::new());
        let engine = Arc::new(OrderEngine::new(
            store.clone(),
            Arc::new(NullRenderer),
            sink.clone(),
        ));
        Fixture {
            store,
            engine,
            sink,
        }
    }

    fn admin() -> ActorContext {
        ActorContext {
            user_id: Some(UserId::new()),
            roles: vec![Role::admin()],
        }
    }

    fn employee() -> ActorContext {
        ActorContext {
            user_id: Some(UserId::new()),
            roles: vec![Role::employee()],
        }
    }

    async fn seed_product(store: &MemoryStore, name: &str, price: f64, stock: i64) -> Product {
        let product = Product::new(name, None, price, stock).unwrap();
        store.insert_product(&product).await.unwrap();
        product
    }

    async fn seed_service(store: &MemoryStore, name: &str, price: f64) -> Service {
        let service = Service::new(name, None, price).unwrap();
        store.insert_service(&service).await.unwrap();
        service
    }

    #[tokio::test]
    async fn creation_computes_total_without_touching_stock() {
        let f = fixture();
        let product = seed_product(&f.store, "Clavier", 100.0, 10).await;
        let service = seed_service(&f.store, "Installation", 50.0).await;

        let order = f
            .engine
            .create_order(
                &admin(),
                CreateOrderRequest {
                    client_id: None,
                    product_lines: vec![(product.id, 3)],
                    service_lines: vec![(service.id, 1)],
                },
            )
            .await
            .unwrap();

        assert_eq!(order.total, 350.0);
        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(order.number, "C000001");

        let stored = f.store.get_product(product.id).await.unwrap().unwrap();
        assert_eq!(stored.stock, 10, "creation must not reserve stock");
    }

    #[tokio::test]
    async fn creation_rejects_insufficient_stock_and_empty_orders() {
        let f = fixture();
        let product = seed_product(&f.store, "Clavier", 100.0, 2).await;

        let err = f
            .engine
            .create_order(
                &admin(),
                CreateOrderRequest {
                    client_id: None,
                    product_lines: vec![(product.id, 3)],
                    service_lines: vec![],
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err.as_domain(),
            Some(DomainError::InsufficientStock { .. })
        ));

        let err = f
            .engine
            .create_order(&admin(), CreateOrderRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(err.as_domain(), Some(DomainError::Validation(_))));
    }

    #[tokio::test]
    async fn finalizing_decrements_stock_and_records_one_movement() {
        let f = fixture();
        let product = seed_product(&f.store, "Clavier", 100.0, 10).await;

        let order = f
            .engine
            .create_order(
                &admin(),
                CreateOrderRequest {
                    client_id: None,
                    product_lines: vec![(product.id, 3)],
                    service_lines: vec![],
                },
            )
            .await
            .unwrap();

        let updated = f
            .engine
            .update_order(
                &admin(),
                order.id,
                OrderPatch {
                    status: Some(OrderStatus::Confirmed),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.status, OrderStatus::Confirmed);
        assert!(updated.stock_committed_at.is_some());

        let stored = f.store.get_product(product.id).await.unwrap().unwrap();
        assert_eq!(stored.stock, 7);

        let movements = f
            .store
            .list_movements(&MovementFilter {
                product_id: Some(product.id),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(movements.len(), 1);
        assert_eq!(movements[0].quantity, 3);
        assert_eq!(movements[0].direction, MovementDirection::Out);
        assert_eq!(movements[0].source, MovementSource::Sale);
    }

    #[tokio::test]
    async fn stock_is_decremented_at_most_once_across_the_lifecycle() {
        let f = fixture();
        let product = seed_product(&f.store, "Clavier", 100.0, 10).await;

        let order = f
            .engine
            .create_order(
                &admin(),
                CreateOrderRequest {
                    client_id: None,
                    product_lines: vec![(product.id, 3)],
                    service_lines: vec![],
                },
            )
            .await
            .unwrap();

        // Finalize: 10 -> 7.
        f.engine
            .update_order(
                &admin(),
                order.id,
                OrderPatch {
                    status: Some(OrderStatus::Confirmed),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        // Full settlement afterwards must not decrement again.
        f.engine
            .record_payment(&admin(), order.id, 300.0, PaymentMode::Cash)
            .await
            .unwrap();

        let stored = f.store.get_product(product.id).await.unwrap().unwrap();
        assert_eq!(stored.stock, 7, "stock must be decremented exactly once");

        let movements = f
            .store
            .list_movements(&MovementFilter::default())
            .await
            .unwrap();
        assert_eq!(movements.len(), 1);
    }

    #[tokio::test]
    async fn payment_sequence_partial_then_paid() {
        let f = fixture();
        let product = seed_product(&f.store, "Clavier", 100.0, 10).await;
        let service = seed_service(&f.store, "Installation", 50.0).await;

        let order = f
            .engine
            .create_order(
                &admin(),
                CreateOrderRequest {
                    client_id: None,
                    product_lines: vec![(product.id, 3)],
                    service_lines: vec![(service.id, 1)],
                },
            )
            .await
            .unwrap();

        let (_, summary) = f
            .engine
            .record_payment(&admin(), order.id, 200.0, PaymentMode::Cash)
            .await
            .unwrap();
        assert_eq!(summary.paid_total, 200.0);
        assert_eq!(summary.remaining, 150.0);
        assert_eq!(summary.status, SettlementStatus::Partial);

        let (_, summary) = f
            .engine
            .record_payment(&admin(), order.id, 150.0, PaymentMode::MobileMoney)
            .await
            .unwrap();
        assert_eq!(summary.paid_total, 350.0);
        assert_eq!(summary.remaining, 0.0);
        assert_eq!(summary.status, SettlementStatus::Paid);

        // Full settlement commits stock (the order was never finalized).
        let stored = f.store.get_product(product.id).await.unwrap().unwrap();
        assert_eq!(stored.stock, 7);

        // And triggers invoice generation through the outbox.
        let mut saw_invoice_job = false;
        while let Some(job) = f.store.claim_next().await.unwrap() {
            if job.kind == JobKind::InvoiceGeneration {
                saw_invoice_job = true;
            }
        }
        assert!(saw_invoice_job, "full settlement must enqueue the invoice job");
    }

    #[tokio::test]
    async fn overpayment_is_rejected_without_inserting_a_row() {
        let f = fixture();
        let product = seed_product(&f.store, "Clavier", 100.0, 10).await;

        let order = f
            .engine
            .create_order(
                &admin(),
                CreateOrderRequest {
                    client_id: None,
                    product_lines: vec![(product.id, 3)],
                    service_lines: vec![],
                },
            )
            .await
            .unwrap();

        f.engine
            .record_payment(&admin(), order.id, 150.0, PaymentMode::Cash)
            .await
            .unwrap();

        let err = f
            .engine
            .record_payment(&admin(), order.id, 400.0, PaymentMode::Cash)
            .await
            .unwrap_err();
        match err.as_domain() {
            Some(DomainError::Validation(msg)) => {
                assert!(msg.contains("exceeds remaining due"))
            }
            other => panic!("unexpected error: {other:?}"),
        }

        let payments = f.store.payments_for_order(order.id).await.unwrap();
        assert_eq!(payments.len(), 1);
        let stored = f.store.get_order(order.id).await.unwrap().unwrap();
        assert_eq!(stored.paid_total, 150.0);
    }

    #[tokio::test]
    async fn orders_with_payments_reject_line_and_field_edits() {
        let f = fixture();
        let product = seed_product(&f.store, "Clavier", 100.0, 10).await;

        let order = f
            .engine
            .create_order(
                &admin(),
                CreateOrderRequest {
                    client_id: None,
                    product_lines: vec![(product.id, 2)],
                    service_lines: vec![],
                },
            )
            .await
            .unwrap();

        f.engine
            .record_payment(&admin(), order.id, 50.0, PaymentMode::Cash)
            .await
            .unwrap();

        let err = f
            .engine
            .update_order(
                &admin(),
                order.id,
                OrderPatch {
                    product_lines: Some(vec![LineSpec {
                        line_id: None,
                        item: Some(LineItem::Product(product.id)),
                        quantity: 5,
                    }]),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err.as_domain(),
            Some(DomainError::OrderImmutable(_))
        ));

        // Unchanged on disk.
        let stored = f.store.get_order(order.id).await.unwrap().unwrap();
        assert_eq!(stored.lines[0].quantity, 2);
        assert_eq!(stored.total, 200.0);
    }

    #[tokio::test]
    async fn line_reconciliation_recomputes_the_total() {
        let f = fixture();
        let product = seed_product(&f.store, "Clavier", 100.0, 10).await;
        let other = seed_product(&f.store, "Souris", 20.0, 10).await;
        let service = seed_service(&f.store, "Installation", 50.0).await;

        let order = f
            .engine
            .create_order(
                &admin(),
                CreateOrderRequest {
                    client_id: None,
                    product_lines: vec![(product.id, 2), (other.id, 1)],
                    service_lines: vec![(service.id, 1)],
                },
            )
            .await
            .unwrap();
        assert_eq!(order.total, 270.0);

        // Keep the first product at a new quantity, drop the rest.
        let updated = f
            .engine
            .update_order(
                &admin(),
                order.id,
                OrderPatch {
                    product_lines: Some(vec![LineSpec {
                        line_id: None,
                        item: Some(LineItem::Product(product.id)),
                        quantity: 5,
                    }]),
                    service_lines: Some(vec![]),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(updated.lines.len(), 1);
        assert_eq!(updated.total, 500.0);
        let line_sum: f64 = updated.lines.iter().map(|l| l.total).sum();
        assert_eq!(updated.total, line_sum);
    }

    #[tokio::test]
    async fn cancellation_requires_zero_payments() {
        let f = fixture();
        let product = seed_product(&f.store, "Clavier", 100.0, 10).await;

        let order = f
            .engine
            .create_order(
                &admin(),
                CreateOrderRequest {
                    client_id: None,
                    product_lines: vec![(product.id, 1)],
                    service_lines: vec![],
                },
            )
            .await
            .unwrap();

        f.engine
            .record_payment(&admin(), order.id, 10.0, PaymentMode::Cash)
            .await
            .unwrap();

        let err = f
            .engine
            .update_order(
                &admin(),
                order.id,
                OrderPatch {
                    status: Some(OrderStatus::Cancelled),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err.as_domain(),
            Some(DomainError::CannotCancelSettledOrder)
        ));

        let err = f.engine.delete_order(order.id).await.unwrap_err();
        assert!(matches!(
            err.as_domain(),
            Some(DomainError::CannotCancelSettledOrder)
        ));
    }

    #[tokio::test]
    async fn employee_may_finalize_but_unknown_roles_may_not() {
        let f = fixture();
        let product = seed_product(&f.store, "Clavier", 100.0, 10).await;

        let order = f
            .engine
            .create_order(
                &employee(),
                CreateOrderRequest {
                    client_id: None,
                    product_lines: vec![(product.id, 1)],
                    service_lines: vec![],
                },
            )
            .await
            .unwrap();

        let err = f
            .engine
            .update_order(
                &ActorContext {
                    user_id: None,
                    roles: vec![Role::new("auditor")],
                },
                order.id,
                OrderPatch {
                    status: Some(OrderStatus::Delivered),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err.as_domain(), Some(DomainError::Forbidden(_))));

        let updated = f
            .engine
            .update_order(
                &employee(),
                order.id,
                OrderPatch {
                    status: Some(OrderStatus::Delivered),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.status, OrderStatus::Delivered);
    }

    #[tokio::test]
    async fn concurrent_finalizes_over_a_shared_product_commit_exactly_once() {
        let f = fixture();
        let product = seed_product(&f.store, "Cable", 10.0, 5).await;

        let mut orders = Vec::new();
        for qty in [3i64, 4] {
            orders.push(
                f.engine
                    .create_order(
                        &admin(),
                        CreateOrderRequest {
                            client_id: None,
                            product_lines: vec![(product.id, qty)],
                            service_lines: vec![],
                        },
                    )
                    .await
                    .unwrap(),
            );
        }

        let mut handles = Vec::new();
        for order in &orders {
            let engine = f.engine.clone();
            let order_id = order.id;
            handles.push(tokio::spawn(async move {
                engine
                    .update_order(
                        &admin(),
                        order_id,
                        OrderPatch {
                            status: Some(OrderStatus::Confirmed),
                            ..Default::default()
                        },
                    )
                    .await
            }));
        }

        let mut outcomes = Vec::new();
        for handle in handles {
            outcomes.push(handle.await.unwrap());
        }

        let succeeded: Vec<usize> = outcomes
            .iter()
            .enumerate()
            .filter(|(_, r)| r.is_ok())
            .map(|(i, _)| i)
            .collect();
        assert_eq!(succeeded.len(), 1, "exactly one finalize may win");

        let failed = outcomes.iter().find(|r| r.is_err()).unwrap();
        assert!(matches!(
            failed.as_ref().unwrap_err().as_domain(),
            Some(DomainError::InsufficientStock { .. })
        ));

        // Stock reflects exactly the winner's demand, nothing partial.
        let winner_qty = orders[succeeded[0]].lines[0].quantity;
        let stored = f.store.get_product(product.id).await.unwrap().unwrap();
        assert_eq!(stored.stock, 5 - winner_qty);
    }

    #[tokio::test]
    async fn concurrent_payments_cannot_overshoot_the_total() {
        let f = fixture();
        let product = seed_product(&f.store, "Clavier", 100.0, 10).await;

        let order = f
            .engine
            .create_order(
                &admin(),
                CreateOrderRequest {
                    client_id: None,
                    product_lines: vec![(product.id, 1)],
                    service_lines: vec![],
                },
            )
            .await
            .unwrap();

        // Two concurrent payments of 60 against a total of 100: one must
        // lose the remaining-due check.
        let mut handles = Vec::new();
        for _ in 0..2 {
            let engine = f.engine.clone();
            let order_id = order.id;
            handles.push(tokio::spawn(async move {
                engine
                    .record_payment(&admin(), order_id, 60.0, PaymentMode::Cash)
                    .await
            }));
        }

        let mut ok = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                ok += 1;
            }
        }
        assert_eq!(ok, 1);

        let stored = f.store.get_order(order.id).await.unwrap().unwrap();
        assert_eq!(stored.paid_total, 60.0);
    }

    #[tokio::test]
    async fn ensure_invoice_is_idempotent_under_concurrency() {
        let f = fixture();
        let product = seed_product(&f.store, "Clavier", 100.0, 10).await;

        let order = f
            .engine
            .create_order(
                &admin(),
                CreateOrderRequest {
                    client_id: None,
                    product_lines: vec![(product.id, 1)],
                    service_lines: vec![],
                },
            )
            .await
            .unwrap();

        let mut handles = Vec::new();
        for _ in 0..2 {
            let engine = f.engine.clone();
            let order_id = order.id;
            handles.push(tokio::spawn(
                async move { engine.ensure_invoice(order_id).await },
            ));
        }

        let mut ids = Vec::new();
        let mut created = 0;
        for handle in handles {
            let (invoice, was_created) = handle.await.unwrap().unwrap();
            ids.push(invoice.id);
            if was_created {
                created += 1;
            }
        }

        assert_eq!(ids[0], ids[1], "both callers observe the same invoice");
        assert_eq!(created, 1);

        let invoice = f.store.latest_invoice(order.id).await.unwrap().unwrap();
        assert_eq!(invoice.number, "F000001");
    }

    #[tokio::test]
    async fn manual_adjustment_records_movement_and_signals_low_stock() {
        let f = fixture();
        let product = seed_product(&f.store, "Clavier", 100.0, 9).await;

        let updated = f
            .engine
            .adjust_stock(
                &admin(),
                product.id,
                StockAdjustment::Subtract(5),
                Some("shrinkage".to_string()),
            )
            .await
            .unwrap();
        assert_eq!(updated.stock, 4);

        let movements = f
            .store
            .list_movements(&MovementFilter {
                product_id: Some(product.id),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(movements.len(), 1);
        assert_eq!(movements[0].source, MovementSource::Manual);
        assert_eq!(movements[0].note.as_deref(), Some("shrinkage"));

        assert!(f.sink.titles().contains(&"Low stock".to_string()));
    }

    #[tokio::test]
    async fn outbox_executor_drains_payment_side_effects() {
        let f = fixture();
        let product = seed_product(&f.store, "Clavier", 100.0, 10).await;
        let client = Client::new("Ada", Some("ada@example.test".to_string()), None).unwrap();
        f.store.insert_client(&client).await.unwrap();

        let order = f
            .engine
            .create_order(
                &admin(),
                CreateOrderRequest {
                    client_id: Some(client.id),
                    product_lines: vec![(product.id, 1)],
                    service_lines: vec![],
                },
            )
            .await
            .unwrap();

        f.engine
            .record_payment(&admin(), order.id, 100.0, PaymentMode::Card)
            .await
            .unwrap();

        let mut executor = JobExecutor::new(f.store.clone());
        register_engine_handlers(&mut executor, f.engine.clone());
        let handle = executor.spawn(
            JobExecutorConfig::default()
                .with_name("test-executor")
                .with_poll_interval(std::time::Duration::from_millis(5)),
        );

        // Wait for the queue to drain.
        for _ in 0..200 {
            if f.store.pending_jobs().await.unwrap() == 0 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        handle.shutdown().await;

        let invoice = f.store.latest_invoice(order.id).await.unwrap();
        assert!(invoice.is_some(), "settlement must produce an invoice");
        let receipt = f.store.latest_receipt(order.id).await.unwrap();
        assert!(receipt.is_some(), "every payment must produce a receipt");

        let titles = f.sink.titles();
        assert!(titles.iter().any(|t| t == "Payment recorded"));
    }
}
