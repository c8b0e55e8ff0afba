//! Line reconciliation planner.
//!
//! Bulk line updates arrive as the full intended line set. The planner
//! matches them against the existing lines (by explicit line id first, then
//! by referenced item, else as inserts), drops whatever was not mentioned,
//! revalidates prices and stock from the catalog snapshot, and produces the
//! plan the engine persists. Pure function; the engine supplies the catalog
//! snapshot read under its transaction.

use std::collections::{HashMap, HashSet};

use comptoir_core::{DomainError, DomainResult, OrderLineId, ProductId, ServiceId};

use crate::order::{LineItem, OrderLine};

/// One incoming line as the client sent it.
///
/// `line_id` targets an existing line explicitly; otherwise the referenced
/// item is used for matching and `item` must be present.
#[derive(Debug, Clone, PartialEq)]
pub struct LineSpec {
    pub line_id: Option<OrderLineId>,
    pub item: Option<LineItem>,
    pub quantity: i64,
}

/// Catalog facts about a product, read under the reconciliation transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogProduct {
    pub name: String,
    pub unit_price: f64,
    pub stock: i64,
    pub sellable: bool,
}

/// Catalog facts about a service.
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogService {
    pub name: String,
    pub unit_price: f64,
    pub sellable: bool,
}

/// Everything the planner may need to look up.
#[derive(Debug, Clone, Default)]
pub struct CatalogSnapshot {
    pub products: HashMap<ProductId, CatalogProduct>,
    pub services: HashMap<ServiceId, CatalogService>,
}

/// The reconciliation result: the full surviving line set, the ids to
/// delete, and the recomputed order total.
#[derive(Debug, Clone, PartialEq)]
pub struct LinePlan {
    pub lines: Vec<OrderLine>,
    pub deleted: Vec<OrderLineId>,
    pub total: f64,
}

/// Reconcile `incoming` against `existing`.
///
/// Unit prices always come from the catalog snapshot, never from the client.
/// For product lines, availability counts the quantity currently held by the
/// order's own lines as free (they are being replaced by this plan).
pub fn plan_lines(
    existing: &[OrderLine],
    incoming: &[LineSpec],
    catalog: &CatalogSnapshot,
) -> DomainResult<LinePlan> {
    let by_line_id: HashMap<OrderLineId, &OrderLine> =
        existing.iter().map(|l| (l.id, l)).collect();

    let mut matched: HashSet<OrderLineId> = HashSet::new();
    let mut planned: Vec<OrderLine> = Vec::with_capacity(incoming.len());

    for spec in incoming {
        if spec.quantity <= 0 {
            return Err(DomainError::validation("line quantity must be positive"));
        }

        // Resolve which line this spec targets and which item it sells.
        let (line_id, item) = match spec.line_id {
            Some(line_id) => {
                let line = by_line_id.get(&line_id).ok_or_else(|| {
                    DomainError::validation(format!("order line not found: {line_id}"))
                })?;
                if !matched.insert(line_id) {
                    return Err(DomainError::validation(format!(
                        "order line targeted twice: {line_id}"
                    )));
                }
                (line_id, line.item)
            }
            None => {
                let item = spec.item.ok_or_else(|| {
                    DomainError::validation("line must reference a product or a service")
                })?;
                match existing
                    .iter()
                    .find(|l| l.item == item && !matched.contains(&l.id))
                {
                    Some(line) => {
                        matched.insert(line.id);
                        (line.id, item)
                    }
                    None => (OrderLineId::new(), item),
                }
            }
        };

        let (name, unit_price) = resolve_item(item, catalog)?;
        planned.push(OrderLine {
            id: line_id,
            item,
            name,
            quantity: spec.quantity,
            unit_price,
            total: spec.quantity as f64 * unit_price,
        });
    }

    let deleted = existing
        .iter()
        .filter(|l| !matched.contains(&l.id))
        .map(|l| l.id)
        .collect();

    check_stock(existing, &planned, catalog)?;

    let total = planned.iter().map(|l| l.total).sum();
    Ok(LinePlan {
        lines: planned,
        deleted,
        total,
    })
}

fn resolve_item(item: LineItem, catalog: &CatalogSnapshot) -> DomainResult<(String, f64)> {
    match item {
        LineItem::Product(id) => {
            let p = catalog
                .products
                .get(&id)
                .filter(|p| p.sellable)
                .ok_or_else(|| {
                    DomainError::validation(format!("product not found or inactive: {id}"))
                })?;
            Ok((p.name.clone(), p.unit_price))
        }
        LineItem::Service(id) => {
            let s = catalog
                .services
                .get(&id)
                .filter(|s| s.sellable)
                .ok_or_else(|| {
                    DomainError::validation(format!("service not found or inactive: {id}"))
                })?;
            Ok((s.name.clone(), s.unit_price))
        }
    }
}

fn check_stock(
    existing: &[OrderLine],
    planned: &[OrderLine],
    catalog: &CatalogSnapshot,
) -> DomainResult<()> {
    let mut demanded: HashMap<ProductId, i64> = HashMap::new();
    for line in planned {
        if let Some(pid) = line.item.product_id() {
            *demanded.entry(pid).or_default() += line.quantity;
        }
    }

    let mut held: HashMap<ProductId, i64> = HashMap::new();
    for line in existing {
        if let Some(pid) = line.item.product_id() {
            *held.entry(pid).or_default() += line.quantity;
        }
    }

    for (pid, requested) in demanded {
        // Presence was already validated while resolving the lines.
        let product = match catalog.products.get(&pid) {
            Some(p) => p,
            None => continue,
        };
        let available = product.stock + held.get(&pid).copied().unwrap_or(0);
        if available < requested {
            return Err(DomainError::insufficient_stock(
                product.name.clone(),
                available,
                requested,
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog_with(products: Vec<(ProductId, i64, f64)>, services: Vec<(ServiceId, f64)>) -> CatalogSnapshot {
        let mut snapshot = CatalogSnapshot::default();
        for (i, (id, stock, price)) in products.into_iter().enumerate() {
            snapshot.products.insert(
                id,
                CatalogProduct {
                    name: format!("Produit {i}"),
                    unit_price: price,
                    stock,
                    sellable: true,
                },
            );
        }
        for (i, (id, price)) in services.into_iter().enumerate() {
            snapshot.services.insert(
                id,
                CatalogService {
                    name: format!("Service {i}"),
                    unit_price: price,
                    sellable: true,
                },
            );
        }
        snapshot
    }

    fn product_spec(id: ProductId, qty: i64) -> LineSpec {
        LineSpec {
            line_id: None,
            item: Some(LineItem::Product(id)),
            quantity: qty,
        }
    }

    #[test]
    fn fresh_plan_inserts_everything() {
        let pid = ProductId::new();
        let sid = ServiceId::new();
        let catalog = catalog_with(vec![(pid, 10, 100.0)], vec![(sid, 50.0)]);

        let plan = plan_lines(
            &[],
            &[
                product_spec(pid, 3),
                LineSpec {
                    line_id: None,
                    item: Some(LineItem::Service(sid)),
                    quantity: 1,
                },
            ],
            &catalog,
        )
        .unwrap();

        assert_eq!(plan.lines.len(), 2);
        assert!(plan.deleted.is_empty());
        assert_eq!(plan.total, 350.0);
    }

    #[test]
    fn unit_price_comes_from_the_catalog() {
        let pid = ProductId::new();
        let catalog = catalog_with(vec![(pid, 10, 100.0)], vec![]);

        let plan = plan_lines(&[], &[product_spec(pid, 2)], &catalog).unwrap();
        assert_eq!(plan.lines[0].unit_price, 100.0);
        assert_eq!(plan.lines[0].total, 200.0);
    }

    #[test]
    fn matching_by_item_reuses_the_existing_line_id() {
        let pid = ProductId::new();
        let catalog = catalog_with(vec![(pid, 10, 100.0)], vec![]);
        let existing = vec![OrderLine::new(LineItem::Product(pid), "Produit 0", 2, 100.0)];
        let existing_id = existing[0].id;

        let plan = plan_lines(&existing, &[product_spec(pid, 5)], &catalog).unwrap();
        assert_eq!(plan.lines.len(), 1);
        assert_eq!(plan.lines[0].id, existing_id);
        assert_eq!(plan.lines[0].quantity, 5);
        assert!(plan.deleted.is_empty());
    }

    #[test]
    fn matching_by_line_id_wins_over_item() {
        let pid = ProductId::new();
        let catalog = catalog_with(vec![(pid, 10, 100.0)], vec![]);
        let existing = vec![OrderLine::new(LineItem::Product(pid), "Produit 0", 2, 100.0)];
        let spec = LineSpec {
            line_id: Some(existing[0].id),
            item: None,
            quantity: 4,
        };

        let plan = plan_lines(&existing, &[spec], &catalog).unwrap();
        assert_eq!(plan.lines[0].id, existing[0].id);
        assert_eq!(plan.lines[0].quantity, 4);
    }

    #[test]
    fn unmentioned_lines_are_deleted() {
        let pid_a = ProductId::new();
        let pid_b = ProductId::new();
        let catalog = catalog_with(vec![(pid_a, 10, 100.0), (pid_b, 10, 20.0)], vec![]);
        let existing = vec![
            OrderLine::new(LineItem::Product(pid_a), "Produit 0", 2, 100.0),
            OrderLine::new(LineItem::Product(pid_b), "Produit 1", 1, 20.0),
        ];
        let dropped_id = existing[1].id;

        let plan = plan_lines(&existing, &[product_spec(pid_a, 2)], &catalog).unwrap();
        assert_eq!(plan.deleted, vec![dropped_id]);
        assert_eq!(plan.total, 200.0);
    }

    #[test]
    fn replaced_quantity_counts_as_available_stock() {
        let pid = ProductId::new();
        // Stock 3, but the order already holds 4 of this product.
        let catalog = catalog_with(vec![(pid, 3, 10.0)], vec![]);
        let existing = vec![OrderLine::new(LineItem::Product(pid), "Produit 0", 4, 10.0)];

        // 7 = 3 in stock + 4 freed by replacing the line.
        let plan = plan_lines(&existing, &[product_spec(pid, 7)], &catalog).unwrap();
        assert_eq!(plan.lines[0].quantity, 7);

        let err = plan_lines(&existing, &[product_spec(pid, 8)], &catalog).unwrap_err();
        assert!(matches!(err, DomainError::InsufficientStock { .. }));
    }

    #[test]
    fn stock_is_checked_across_duplicate_product_specs() {
        let pid = ProductId::new();
        let catalog = catalog_with(vec![(pid, 5, 10.0)], vec![]);

        let err = plan_lines(
            &[],
            &[product_spec(pid, 3), product_spec(pid, 3)],
            &catalog,
        )
        .unwrap_err();
        assert!(matches!(err, DomainError::InsufficientStock { .. }));
    }

    #[test]
    fn unknown_or_inactive_items_are_rejected() {
        let pid = ProductId::new();
        let mut catalog = catalog_with(vec![(pid, 5, 10.0)], vec![]);

        let err = plan_lines(&[], &[product_spec(ProductId::new(), 1)], &catalog).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));

        catalog.products.get_mut(&pid).unwrap().sellable = false;
        let err = plan_lines(&[], &[product_spec(pid, 1)], &catalog).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn unknown_line_id_is_rejected() {
        let pid = ProductId::new();
        let catalog = catalog_with(vec![(pid, 5, 10.0)], vec![]);
        let spec = LineSpec {
            line_id: Some(OrderLineId::new()),
            item: None,
            quantity: 1,
        };
        assert!(plan_lines(&[], &[spec], &catalog).is_err());
    }

    #[test]
    fn non_positive_quantity_is_rejected() {
        let pid = ProductId::new();
        let catalog = catalog_with(vec![(pid, 5, 10.0)], vec![]);
        assert!(plan_lines(&[], &[product_spec(pid, 0)], &catalog).is_err());
        assert!(plan_lines(&[], &[product_spec(pid, -2)], &catalog).is_err());
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            /// Property: the planned total always equals the sum of planned
            /// line totals.
            #[test]
            fn total_matches_line_sum(
                quantities in proptest::collection::vec(1i64..50, 1..6),
                price in 0.01f64..1_000.0
            ) {
                let pid = ProductId::new();
                let catalog = catalog_with(vec![(pid, 10_000, price)], vec![]);
                let specs: Vec<LineSpec> = quantities
                    .iter()
                    .map(|&q| product_spec(pid, q))
                    .collect();

                let plan = plan_lines(&[], &specs, &catalog).unwrap();
                let sum: f64 = plan.lines.iter().map(|l| l.total).sum();
                prop_assert!((plan.total - sum).abs() < 1e-9);
            }

            /// Property: a successful plan never demands more of a product
            /// than stock plus what the order already held.
            #[test]
            fn plans_respect_availability(
                stock in 0i64..100,
                held in 0i64..100,
                requested in 1i64..300
            ) {
                let pid = ProductId::new();
                let catalog = catalog_with(vec![(pid, stock, 1.0)], vec![]);
                let existing = if held > 0 {
                    vec![OrderLine::new(LineItem::Product(pid), "Produit 0", held, 1.0)]
                } else {
                    vec![]
                };

                match plan_lines(&existing, &[product_spec(pid, requested)], &catalog) {
                    Ok(_) => prop_assert!(requested <= stock + held),
                    Err(_) => prop_assert!(requested > stock + held),
                }
            }
        }
    }
}
