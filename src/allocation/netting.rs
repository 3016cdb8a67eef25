//! Netting of aggregated targets against holdings and in-flight orders.
//!
//! Pure computation: given identical inputs the output sequence is identical
//! in content and order (sorted by instrument key), so execution-record
//! diffs stay reproducible.

use crate::broker::{Holding, Instrument, InstrumentCatalog, InstrumentKey, OpenOrder, OrderAction};
use crate::store::{AggregatedTarget, OrderPlanEntry};
use std::collections::BTreeMap;
use tracing::debug;

/// Signed unfilled quantity per instrument.
///
/// BUY contributes `+remaining`, SELL `-remaining`; fully filled or
/// zero-remaining orders contribute nothing.
pub fn in_flight_map(
    open_orders: &[OpenOrder],
    catalog: &InstrumentCatalog,
) -> BTreeMap<InstrumentKey, i64> {
    let mut map = BTreeMap::new();
    for order in open_orders {
        let signed = order.signed_remaining();
        if signed == 0 {
            continue;
        }
        *map.entry(catalog.resolve(&order.instrument)).or_insert(0) += signed;
    }
    map
}

/// The post-policy target key-space: every aggregated target plus, when
/// `liquidate_untargeted` is set, an implicit zero target for each held
/// instrument no strategy mentioned.
pub fn final_targets(
    targets: &BTreeMap<InstrumentKey, AggregatedTarget>,
    holdings: &[Holding],
    catalog: &InstrumentCatalog,
    liquidate_untargeted: bool,
) -> BTreeMap<InstrumentKey, AggregatedTarget> {
    let mut merged = targets.clone();
    for holding in holdings {
        let key = catalog.resolve(&holding.instrument);
        if merged.contains_key(&key) {
            continue;
        }
        if !liquidate_untargeted {
            debug!(
                instrument = %holding.instrument.display_name(),
                quantity = holding.quantity,
                "Held instrument untargeted - leaving untouched"
            );
            continue;
        }
        merged.insert(
            key,
            AggregatedTarget {
                instrument: holding.instrument.clone(),
                quantity: 0,
                contributors: vec![],
            },
        );
    }
    merged
}

/// Compute the order plan: one entry per instrument whose desired quantity
/// differs from current plus in-flight. Entries come out sorted by
/// instrument key.
pub fn compute_plan(
    targets: &BTreeMap<InstrumentKey, AggregatedTarget>,
    holdings: &[Holding],
    open_orders: &[OpenOrder],
    catalog: &InstrumentCatalog,
    liquidate_untargeted: bool,
) -> Vec<OrderPlanEntry> {
    let mut held: BTreeMap<InstrumentKey, (Instrument, i64)> = BTreeMap::new();
    for holding in holdings {
        let key = catalog.resolve(&holding.instrument);
        held.entry(key)
            .and_modify(|(_, qty)| *qty += holding.quantity)
            .or_insert_with(|| (holding.instrument.clone(), holding.quantity));
    }

    let in_flight = in_flight_map(open_orders, catalog);
    let union = final_targets(targets, holdings, catalog, liquidate_untargeted);

    let mut plan = Vec::new();
    for (key, target) in &union {
        let (current, held_instrument) = match held.get(key) {
            Some((instrument, qty)) => (*qty, Some(instrument)),
            None => (0, None),
        };
        let pending = in_flight.get(key).copied().unwrap_or(0);
        let delta = target.quantity - (current + pending);
        if delta == 0 {
            continue;
        }

        // Prefer an instrument that already carries the broker contract id
        // so execution can skip qualification.
        let instrument = if target.instrument.contract_id.is_some() {
            target.instrument.clone()
        } else if let Some(held) = held_instrument.filter(|i| i.contract_id.is_some()) {
            held.clone()
        } else {
            target.instrument.clone()
        };

        debug!(
            instrument = %instrument.display_name(),
            desired = target.quantity,
            current,
            in_flight = pending,
            delta,
            "Plan entry computed"
        );

        plan.push(OrderPlanEntry {
            instrument,
            desired_quantity: target.quantity,
            current_quantity: current,
            in_flight_quantity: pending,
            delta,
            action: if delta > 0 {
                OrderAction::Buy
            } else {
                OrderAction::Sell
            },
            quantity: delta.abs(),
        });
    }

    plan
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::OrderStatus;

    fn qualified(symbol: &str, con_id: i64) -> Instrument {
        let mut inst = Instrument::stock(symbol, "SMART", "USD");
        inst.contract_id = Some(con_id);
        inst
    }

    fn holding(symbol: &str, con_id: i64, quantity: i64) -> Holding {
        Holding {
            instrument: qualified(symbol, con_id),
            quantity,
            average_cost: None,
        }
    }

    fn open_buy(symbol: &str, con_id: i64, remaining: i64) -> OpenOrder {
        OpenOrder {
            instrument: qualified(symbol, con_id),
            order_id: con_id * 10,
            action: OrderAction::Buy,
            remaining_quantity: remaining,
            status: OrderStatus::Submitted,
            limit_price: None,
        }
    }

    fn target(symbol: &str, con_id: i64, quantity: i64) -> (InstrumentKey, AggregatedTarget) {
        let instrument = qualified(symbol, con_id);
        (
            instrument.key(),
            AggregatedTarget {
                instrument,
                quantity,
                contributors: vec![],
            },
        )
    }

    #[test]
    fn test_in_flight_accounts_for_pending_buy() {
        // Hold 10, one open BUY for 2 more, strategy wants 20: buy 8.
        let targets: BTreeMap<_, _> = [target("SPY", 1001, 20)].into_iter().collect();
        let holdings = vec![holding("SPY", 1001, 10)];
        let orders = vec![open_buy("SPY", 1001, 2)];
        let catalog = InstrumentCatalog::new();

        let plan = compute_plan(&targets, &holdings, &orders, &catalog, true);
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].action, OrderAction::Buy);
        assert_eq!(plan[0].quantity, 8);
        assert_eq!(plan[0].delta, 8);
        assert_eq!(plan[0].in_flight_quantity, 2);
    }

    #[test]
    fn test_replan_before_fill_is_idempotent() {
        // After the BUY 8 above rests at the broker, re-planning emits nothing.
        let targets: BTreeMap<_, _> = [target("SPY", 1001, 20)].into_iter().collect();
        let holdings = vec![holding("SPY", 1001, 10)];
        let orders = vec![open_buy("SPY", 1001, 2), open_buy("SPY", 1001, 8)];
        let catalog = InstrumentCatalog::new();

        let plan = compute_plan(&targets, &holdings, &orders, &catalog, true);
        assert!(plan.is_empty());
    }

    #[test]
    fn test_zero_delta_suppressed() {
        let targets: BTreeMap<_, _> = [target("SPY", 1001, 10)].into_iter().collect();
        let holdings = vec![holding("SPY", 1001, 10)];
        let catalog = InstrumentCatalog::new();

        let plan = compute_plan(&targets, &holdings, &[], &catalog, true);
        assert!(plan.is_empty());
    }

    #[test]
    fn test_untargeted_holding_liquidated_by_default_policy() {
        let targets = BTreeMap::new();
        let holdings = vec![holding("VIXY", 2002, 5)];
        let catalog = InstrumentCatalog::new();

        let plan = compute_plan(&targets, &holdings, &[], &catalog, true);
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].action, OrderAction::Sell);
        assert_eq!(plan[0].quantity, 5);
        assert_eq!(plan[0].desired_quantity, 0);

        let held = compute_plan(&targets, &holdings, &[], &catalog, false);
        assert!(held.is_empty());
    }

    #[test]
    fn test_output_is_deterministic_and_sorted() {
        let targets: BTreeMap<_, _> = [
            target("VIXY", 2002, -3),
            target("SPY", 1001, 15),
            target("QQQ", 3003, 7),
        ]
        .into_iter()
        .collect();
        let holdings = vec![holding("SPY", 1001, 5)];
        let catalog = InstrumentCatalog::new();

        let first = compute_plan(&targets, &holdings, &[], &catalog, true);
        let second = compute_plan(&targets, &holdings, &[], &catalog, true);

        let keys: Vec<_> = first.iter().map(|e| e.instrument.key()).collect();
        assert_eq!(
            keys,
            vec![
                InstrumentKey::Contract(1001),
                InstrumentKey::Contract(2002),
                InstrumentKey::Contract(3003),
            ]
        );
        assert_eq!(
            first.iter().map(|e| e.delta).collect::<Vec<_>>(),
            second.iter().map(|e| e.delta).collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_zero_remaining_orders_ignored() {
        let targets: BTreeMap<_, _> = [target("SPY", 1001, 10)].into_iter().collect();
        let mut done = open_buy("SPY", 1001, 0);
        done.status = OrderStatus::Filled;
        let catalog = InstrumentCatalog::new();

        let plan = compute_plan(&targets, &[], &[done], &catalog, true);
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].quantity, 10);
        assert_eq!(plan[0].in_flight_quantity, 0);
    }

    #[test]
    fn test_catalog_nets_unqualified_target_against_held_contract() {
        // Intent instrument lacks a contract id; the holding carries one.
        let unqualified = Instrument::stock("SPY", "SMART", "USD");
        let holdings = vec![holding("SPY", 1001, 10)];

        let mut catalog = InstrumentCatalog::new();
        catalog.learn(&holdings[0].instrument);

        let targets: BTreeMap<_, _> = [(
            catalog.resolve(&unqualified),
            AggregatedTarget {
                instrument: unqualified,
                quantity: 12,
                contributors: vec![],
            },
        )]
        .into_iter()
        .collect();

        let plan = compute_plan(&targets, &holdings, &[], &catalog, true);
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].delta, 2);
        // The emitted instrument carries the broker id learned from holdings.
        assert_eq!(plan[0].instrument.contract_id, Some(1001));
    }

    #[test]
    fn test_opposing_open_order_widens_delta() {
        // Hold 10, open SELL 4 resting, target 10: the sell will take us to
        // 6, so the plan buys 4 back.
        let targets: BTreeMap<_, _> = [target("SPY", 1001, 10)].into_iter().collect();
        let holdings = vec![holding("SPY", 1001, 10)];
        let mut sell = open_buy("SPY", 1001, 4);
        sell.action = OrderAction::Sell;
        let catalog = InstrumentCatalog::new();

        let plan = compute_plan(&targets, &holdings, &[sell], &catalog, true);
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].action, OrderAction::Buy);
        assert_eq!(plan[0].quantity, 4);
        assert_eq!(plan[0].in_flight_quantity, -4);
    }
}
