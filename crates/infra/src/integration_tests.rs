//! Integration tests for the full lifecycle pipeline.
//!
//! Tests: Service → Reconciler / Receipt Processor → UnitOfWork → Store → AuditSink
//!
//! Verifies:
//! - The documented receipt and reconciliation scenarios end to end
//! - Tenant isolation is preserved
//! - Stock increments compose under concurrency
//! - Failed units of work leave no trace, audit failures only warn

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use forgeproc_core::TenantId;
    use forgeproc_events::{EventEnvelope, InMemoryAuditSink};
    use forgeproc_inventory::{Item, ItemId, MovementReason, replay_movements};
    use forgeproc_purchasing::{
        LineSpec, OrderFieldsPatch, OrderWithLines, PurchaseOrderEvent, PurchaseOrderStatus,
        RawQuantity, ReceiptLine, ReceiptRejection,
    };

    use crate::lifecycle::{LifecycleError, OperationWarning, OrderLifecycleService};
    use crate::store::{FailPoint, InMemoryPurchaseOrderStore, PurchaseOrderStore};

    type Sink = Arc<InMemoryAuditSink<EventEnvelope<PurchaseOrderEvent>>>;
    type Service = OrderLifecycleService<InMemoryPurchaseOrderStore, Sink>;

    struct Fixture {
        service: Arc<Service>,
        store: InMemoryPurchaseOrderStore,
        sink: Sink,
        tenant_id: TenantId,
        x: ItemId,
        y: ItemId,
    }

    async fn setup() -> Fixture {
        setup_with_timeout(Duration::from_secs(2)).await
    }

    async fn setup_with_timeout(tx_timeout: Duration) -> Fixture {
        let store = InMemoryPurchaseOrderStore::new();
        let sink: Sink = Arc::new(InMemoryAuditSink::new());
        let tenant_id = TenantId::new();
        let (x, y) = (ItemId::generate(), ItemId::generate());
        store.put_item(Item::new(tenant_id, x, "widget", 100)).await;
        store.put_item(Item::new(tenant_id, y, "gadget", 20)).await;

        Fixture {
            service: Arc::new(OrderLifecycleService::new(store.clone(), sink.clone(), tx_timeout)),
            store,
            sink,
            tenant_id,
            x,
            y,
        }
    }

    impl Fixture {
        async fn order_x10_y5(&self) -> OrderWithLines {
            self.service
                .create(
                    self.tenant_id,
                    "PO-1001",
                    &[LineSpec::new(self.x, 10), LineSpec::new(self.y, 5)],
                )
                .await
                .unwrap()
                .value
        }

        async fn stock(&self, item_id: ItemId) -> i64 {
            self.store.stock(self.tenant_id, item_id).await.unwrap()
        }

        fn event_types(&self) -> Vec<String> {
            self.sink
                .published()
                .iter()
                .map(|e| e.event_type().to_string())
                .collect()
        }
    }

    fn line_of(order: &OrderWithLines, item_id: ItemId) -> &forgeproc_purchasing::PurchaseOrderLine {
        order.lines.iter().find(|l| l.item_id == item_id).unwrap()
    }

    #[tokio::test]
    async fn receipt_scenarios_drive_stock_and_status() {
        let f = setup().await;
        let created = f.order_x10_y5().await;
        assert_eq!(created.order.status, PurchaseOrderStatus::Draft);
        assert!(created.lines.iter().all(|l| l.quantity_received == 0));

        let order_id = created.order.order_id;
        let x_line = line_of(&created, f.x).line_id;
        let y_line = line_of(&created, f.y).line_id;

        let first = f
            .service
            .record_receipt(f.tenant_id, order_id, &[ReceiptLine::incremental(x_line, 4.0)])
            .await
            .unwrap()
            .value;
        assert_eq!(line_of(&first.order, f.x).quantity_received, 4);
        assert_eq!(first.order.order.status, PurchaseOrderStatus::PartiallyReceived);
        assert_eq!(f.stock(f.x).await, 104);

        let second = f
            .service
            .record_receipt(
                f.tenant_id,
                order_id,
                &[ReceiptLine::absolute(x_line, 10.0), ReceiptLine::absolute(y_line, 5.0)],
            )
            .await
            .unwrap()
            .value;
        assert!(second.order.lines.iter().all(|l| l.is_fully_received()));
        assert_eq!(second.order.order.status, PurchaseOrderStatus::FullyReceived);
        assert_eq!(f.stock(f.x).await, 110);
        assert_eq!(f.stock(f.y).await, 25);

        assert_eq!(
            f.event_types(),
            vec![
                "purchasing.order.created",
                "purchasing.order.receipt_recorded",
                "purchasing.order.receipt_recorded",
            ]
        );
    }

    #[tokio::test]
    async fn omitting_an_item_deletes_its_line_and_keeps_received_on_the_rest() {
        let f = setup().await;
        let created = f.order_x10_y5().await;
        let order_id = created.order.order_id;
        let x_line = line_of(&created, f.x).line_id;

        f.service
            .record_receipt(f.tenant_id, order_id, &[ReceiptLine::absolute(x_line, 10.0)])
            .await
            .unwrap();

        let after = f
            .service
            .update_lines(f.tenant_id, order_id, &[LineSpec::new(f.x, 10)])
            .await
            .unwrap()
            .value;
        assert_eq!(after.lines.len(), 1);
        assert_eq!(after.lines[0].line_id, x_line);
        assert_eq!(after.lines[0].quantity_received, 10);

        let reloaded = f.service.get(f.tenant_id, order_id).await.unwrap();
        assert_eq!(reloaded.lines, after.lines);
        // Reconciliation alone never re-derives status.
        assert_eq!(reloaded.order.status, PurchaseOrderStatus::PartiallyReceived);
    }

    #[tokio::test]
    async fn fully_received_survives_reconciliation() {
        let f = setup().await;
        let created = f.order_x10_y5().await;
        let order_id = created.order.order_id;
        let receipts: Vec<ReceiptLine> = created
            .lines
            .iter()
            .map(|l| ReceiptLine::absolute(l.line_id, l.quantity_ordered as f64))
            .collect();
        f.service.record_receipt(f.tenant_id, order_id, &receipts).await.unwrap();

        f.service
            .update_lines(
                f.tenant_id,
                order_id,
                &[LineSpec::new(f.x, 10).with_notes("checked"), LineSpec::new(f.y, 5)],
            )
            .await
            .unwrap();

        let reloaded = f.service.get(f.tenant_id, order_id).await.unwrap();
        assert_eq!(reloaded.order.status, PurchaseOrderStatus::FullyReceived);
    }

    #[tokio::test]
    async fn negative_quantity_rejects_the_whole_batch() {
        let f = setup().await;
        let created = f.order_x10_y5().await;
        let order_id = created.order.order_id;

        let err = f
            .service
            .update_lines(
                f.tenant_id,
                order_id,
                &[LineSpec::new(f.x, 12), LineSpec::new(f.y, -1)],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, LifecycleError::Validation(ref msg) if msg.contains("line 1")));

        let reloaded = f.service.get(f.tenant_id, order_id).await.unwrap();
        assert_eq!(reloaded.lines, created.lines);
    }

    #[tokio::test]
    async fn reconciliation_is_idempotent_and_silent_on_repeat() {
        let f = setup().await;
        let created = f.order_x10_y5().await;
        let order_id = created.order.order_id;
        let payload = [
            LineSpec::new(f.x, 12).with_unit_price(250),
            LineSpec {
                quantity_ordered: RawQuantity::Text("5".to_string()),
                ..LineSpec::new(f.y, 0)
            },
        ];

        let first = f.service.update_lines(f.tenant_id, order_id, &payload).await.unwrap().value;
        let second = f.service.update_lines(f.tenant_id, order_id, &payload).await.unwrap().value;

        assert_eq!(first.lines, second.lines);
        assert_eq!(first.order.version, second.order.version);
        assert_eq!(
            f.event_types(),
            vec!["purchasing.order.created", "purchasing.order.lines_reconciled"]
        );
    }

    #[tokio::test]
    async fn foreign_tenant_cannot_read_or_touch_an_order() {
        let f = setup().await;
        let created = f.order_x10_y5().await;
        let order_id = created.order.order_id;
        let x_line = line_of(&created, f.x).line_id;
        let other = TenantId::new();

        assert!(matches!(f.service.get(other, order_id).await, Err(LifecycleError::NotFound(_))));
        assert!(matches!(
            f.service.update_lines(other, order_id, &[]).await,
            Err(LifecycleError::NotFound(_))
        ));
        assert!(matches!(
            f.service
                .record_receipt(other, order_id, &[ReceiptLine::incremental(x_line, 1.0)])
                .await,
            Err(LifecycleError::NotFound(_))
        ));
        assert!(matches!(
            f.service.cancel(other, order_id, None).await,
            Err(LifecycleError::NotFound(_))
        ));
        assert!(matches!(f.service.delete(other, order_id).await, Err(LifecycleError::NotFound(_))));
        assert!(f.service.list(other).await.unwrap().is_empty());

        let reloaded = f.service.get(f.tenant_id, order_id).await.unwrap();
        assert_eq!(reloaded, created);
        assert_eq!(f.stock(f.x).await, 100);
    }

    #[tokio::test]
    async fn foreign_items_are_not_found() {
        let f = setup().await;
        let foreign = ItemId::generate();
        f.store.put_item(Item::new(TenantId::new(), foreign, "elsewhere", 1)).await;

        let err = f
            .service
            .create(f.tenant_id, "PO-1", &[LineSpec::new(foreign, 1)])
            .await
            .unwrap_err();
        assert!(matches!(err, LifecycleError::NotFound(ref msg) if msg.contains(&foreign.to_string())));
        assert!(f.service.list(f.tenant_id).await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_receipts_compose_additively() {
        let f = setup().await;
        let mut lines = Vec::new();
        for n in 0..4 {
            let order = f
                .service
                .create(f.tenant_id, &format!("PO-{n}"), &[LineSpec::new(f.x, 50)])
                .await
                .unwrap()
                .value;
            lines.push((order.order.order_id, order.lines[0].line_id));
        }

        let mut handles = Vec::new();
        for (order_id, line_id) in lines.iter().copied() {
            for _ in 0..5 {
                let service = f.service.clone();
                let tenant_id = f.tenant_id;
                handles.push(tokio::spawn(async move {
                    service
                        .record_receipt(tenant_id, order_id, &[ReceiptLine::incremental(line_id, 3.0)])
                        .await
                }));
            }
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }

        assert_eq!(f.stock(f.x).await, 100 + 4 * 5 * 3);
        for (order_id, _) in lines {
            let o = f.service.get(f.tenant_id, order_id).await.unwrap();
            assert_eq!(o.lines[0].quantity_received, 15);
        }

        let ledger = f.service.stock_ledger(f.tenant_id, f.x).await.unwrap();
        assert_eq!(ledger.movements.len(), 20);
        assert_eq!(replay_movements(100, &ledger.movements), ledger.item.quantity);
    }

    #[tokio::test]
    async fn storage_failure_mid_batch_leaves_nothing_behind() {
        let f = setup().await;
        let created = f.order_x10_y5().await;
        let order_id = created.order.order_id;
        let x_line = line_of(&created, f.x).line_id;

        f.store.fail_on(Some(FailPoint::RecordMovement));
        let err = f
            .service
            .record_receipt(f.tenant_id, order_id, &[ReceiptLine::incremental(x_line, 4.0)])
            .await
            .unwrap_err();
        assert!(matches!(err, LifecycleError::Storage(_)));
        f.store.fail_on(None);

        let reloaded = f.service.get(f.tenant_id, order_id).await.unwrap();
        assert_eq!(reloaded, created);
        assert_eq!(f.stock(f.x).await, 100);
        assert_eq!(f.event_types(), vec!["purchasing.order.created"]);
    }

    #[tokio::test]
    async fn audit_failure_is_a_warning_not_an_error() {
        let f = setup().await;
        f.sink.set_failing(Some("audit log offline"));

        let outcome = f
            .service
            .create(f.tenant_id, "PO-9", &[LineSpec::new(f.x, 1)])
            .await
            .unwrap();
        assert!(outcome.has_warnings());
        assert!(matches!(
            &outcome.warnings[0],
            OperationWarning::AuditSinkFailed { event_type, message }
                if event_type == "purchasing.order.created" && message.contains("audit log offline")
        ));

        let reloaded = f.service.get(f.tenant_id, outcome.value.order.order_id).await.unwrap();
        assert_eq!(reloaded.lines.len(), 1);
    }

    #[tokio::test]
    async fn blocked_transaction_times_out_cleanly() {
        let f = setup_with_timeout(Duration::from_millis(50)).await;
        let held = f.store.begin(f.tenant_id).await.unwrap();

        let err = f
            .service
            .create(f.tenant_id, "PO-1", &[LineSpec::new(f.x, 1)])
            .await
            .unwrap_err();
        assert!(matches!(err, LifecycleError::Storage(ref msg) if msg.contains("timed out")));

        drop(held);
        assert!(f.service.list(f.tenant_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn duplicate_order_number_is_a_conflict() {
        let f = setup().await;
        f.order_x10_y5().await;
        let err = f
            .service
            .create(f.tenant_id, " PO-1001 ", &[])
            .await
            .unwrap_err();
        assert!(matches!(err, LifecycleError::Conflict(_)));
    }

    #[tokio::test]
    async fn out_of_range_receipts_are_reported_per_line() {
        let f = setup().await;
        let created = f.order_x10_y5().await;
        let order_id = created.order.order_id;
        let x_line = line_of(&created, f.x).line_id;
        let y_line = line_of(&created, f.y).line_id;

        let report = f
            .service
            .record_receipt(
                f.tenant_id,
                order_id,
                &[
                    ReceiptLine::incremental(x_line, 11.0),
                    ReceiptLine::incremental(y_line, 2.0),
                    ReceiptLine::absolute(y_line, 2.0),
                ],
            )
            .await
            .unwrap()
            .value;

        assert_eq!(report.applied.len(), 1);
        assert_eq!(report.skipped, vec![y_line]);
        assert_eq!(report.rejected.len(), 1);
        assert!(matches!(
            report.rejected[0].rejection,
            ReceiptRejection::AboveOrdered { resulting: 11, ordered: 10 }
        ));
        assert_eq!(f.stock(f.x).await, 100);
        assert_eq!(f.stock(f.y).await, 22);
    }

    #[tokio::test]
    async fn downward_correction_records_a_correction_movement() {
        let f = setup().await;
        let created = f.order_x10_y5().await;
        let order_id = created.order.order_id;
        let x_line = line_of(&created, f.x).line_id;

        f.service
            .record_receipt(f.tenant_id, order_id, &[ReceiptLine::incremental(x_line, 6.0)])
            .await
            .unwrap();
        f.service
            .record_receipt(f.tenant_id, order_id, &[ReceiptLine::absolute(x_line, 4.0)])
            .await
            .unwrap();

        assert_eq!(f.stock(f.x).await, 104);
        let ledger = f.service.stock_ledger(f.tenant_id, f.x).await.unwrap();
        let reasons: Vec<(i64, MovementReason)> =
            ledger.movements.iter().map(|m| (m.delta, m.reason)).collect();
        assert_eq!(
            reasons,
            vec![(6, MovementReason::Receipt), (-2, MovementReason::Correction)]
        );
    }

    #[tokio::test]
    async fn status_overrides_are_validated_and_audited() {
        let f = setup().await;
        let created = f.order_x10_y5().await;
        let order_id = created.order.order_id;

        let ordered = f
            .service
            .update_fields(
                f.tenant_id,
                order_id,
                &OrderFieldsPatch {
                    status: Some("ordered".to_string()),
                    total_amount: Some(Some(125_000)),
                    ..Default::default()
                },
            )
            .await
            .unwrap()
            .value;
        assert_eq!(ordered.order.status, PurchaseOrderStatus::Ordered);
        assert_eq!(ordered.order.total_amount, Some(125_000));

        let bad = f
            .service
            .update_fields(
                f.tenant_id,
                order_id,
                &OrderFieldsPatch {
                    status: Some("SHIPPED".to_string()),
                    ..Default::default()
                },
            )
            .await;
        assert!(matches!(bad, Err(LifecycleError::Validation(_))));

        let forced = f
            .service
            .force_status(
                f.tenant_id,
                order_id,
                PurchaseOrderStatus::Draft,
                Some("re-quoting".to_string()),
            )
            .await
            .unwrap()
            .value;
        assert_eq!(forced.order.status, PurchaseOrderStatus::Draft);

        assert_eq!(
            f.event_types(),
            vec![
                "purchasing.order.created",
                "purchasing.order.fields_updated",
                "purchasing.order.status_forced",
                "purchasing.order.status_forced",
            ]
        );
        let last = f.sink.published().pop().unwrap();
        assert_eq!(last.summary(), "Status forced from ORDERED to DRAFT (re-quoting)");
    }

    #[tokio::test]
    async fn cancelled_orders_stay_cancelled() {
        let f = setup().await;
        let created = f.order_x10_y5().await;
        let order_id = created.order.order_id;
        let x_line = line_of(&created, f.x).line_id;

        let cancelled = f
            .service
            .cancel(f.tenant_id, order_id, Some("supplier out of business".to_string()))
            .await
            .unwrap()
            .value;
        assert_eq!(cancelled.order.status, PurchaseOrderStatus::Cancelled);

        let again = f.service.cancel(f.tenant_id, order_id, None).await.unwrap();
        assert!(!again.has_warnings());
        assert_eq!(again.value.order.version, cancelled.order.version);

        let report = f
            .service
            .record_receipt(f.tenant_id, order_id, &[ReceiptLine::absolute(x_line, 10.0)])
            .await
            .unwrap()
            .value;
        assert_eq!(report.order.order.status, PurchaseOrderStatus::Cancelled);
        assert_eq!(f.stock(f.x).await, 110);
    }

    #[tokio::test]
    async fn delete_removes_order_but_keeps_the_ledger() {
        let f = setup().await;
        let created = f.order_x10_y5().await;
        let order_id = created.order.order_id;
        let x_line = line_of(&created, f.x).line_id;
        f.service
            .record_receipt(f.tenant_id, order_id, &[ReceiptLine::incremental(x_line, 2.0)])
            .await
            .unwrap();

        f.service.delete(f.tenant_id, order_id).await.unwrap();

        assert!(matches!(f.service.get(f.tenant_id, order_id).await, Err(LifecycleError::NotFound(_))));
        assert!(matches!(f.service.delete(f.tenant_id, order_id).await, Err(LifecycleError::NotFound(_))));
        let ledger = f.service.stock_ledger(f.tenant_id, f.x).await.unwrap();
        assert_eq!(ledger.movements.len(), 1);
        assert_eq!(ledger.item.quantity, 102);
    }
}
