//! Keeps the record store consistent with the exchange when a write fails
//! after the exchange already accepted an order.

use std::collections::HashMap;

use crate::error::StoreError;
use crate::exchange::{round_to_valid_price, ExchangeGateway, SymbolFilterSet};
use crate::execution::lifecycle::{order_from_exchange, Transition};
use crate::models::{Bot, Order, OrderSide, Pair};
use crate::persistence::RecordStore;

/// A single-entity upsert. Replaying one is always safe.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordWrite {
    CreateOrder(Order),
    UpdateOrder(Order),
    UpdatePair(Pair),
}

impl RecordWrite {
    pub async fn apply(&self, store: &dyn RecordStore) -> Result<(), StoreError> {
        match self {
            Self::CreateOrder(order) => store.create_order(order).await,
            Self::UpdateOrder(order) => store.update_order(order).await,
            Self::UpdatePair(pair) => store.update_pair(pair).await,
        }
    }

    fn describe(&self) -> String {
        match self {
            Self::CreateOrder(o) => format!("create order {} ({})", o.id, o.symbol),
            Self::UpdateOrder(o) => format!("update order {} ({})", o.id, o.symbol),
            Self::UpdatePair(p) => format!("update pair {}", p.symbol),
        }
    }
}

/// Writes for a transition, orders before the pair that points at them
pub fn writes_for(transition: Transition) -> Vec<RecordWrite> {
    match transition {
        Transition::EntryPlaced { order, pair } => {
            vec![RecordWrite::CreateOrder(order), RecordWrite::UpdatePair(pair)]
        }
        Transition::ExitPlaced { entry, exit, pair } => vec![
            RecordWrite::CreateOrder(exit),
            RecordWrite::UpdateOrder(entry),
            RecordWrite::UpdatePair(pair),
        ],
        Transition::ExitFilled { exit, pair } | Transition::EntryAbandoned { order: exit, pair } => {
            vec![RecordWrite::UpdateOrder(exit), RecordWrite::UpdatePair(pair)]
        }
        Transition::StatusRefreshed { order } | Transition::ExitStranded { order } => {
            vec![RecordWrite::UpdateOrder(order)]
        }
    }
}

/// Apply writes in order; the ones that failed are returned for a later retry.
pub async fn persist(store: &dyn RecordStore, writes: Vec<RecordWrite>) -> Vec<RecordWrite> {
    let mut failed = Vec::new();
    for write in writes {
        if let Err(e) = write.apply(store).await {
            tracing::error!("❌ Failed to {}: {} (will retry next round)", write.describe(), e);
            failed.push(write);
        }
    }
    failed
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Orders missing from the store and rebuilt from the exchange
    pub rebuilt: usize,
    /// Pairs pointing at an order the exchange never accepted, reset to idle
    pub reset: usize,
}

/// Rebuild orders that a pair references but the store lost, by querying the
/// exchange with the client order id.
pub async fn reconcile_bot(
    gateway: &dyn ExchangeGateway,
    store: &dyn RecordStore,
    bot: &Bot,
    filters: &HashMap<String, SymbolFilterSet>,
) -> Result<ReconcileReport, StoreError> {
    let mut report = ReconcileReport::default();

    for pair in store.pairs_of_bot(&bot.id).await? {
        let Some(order_id) = pair.current_order_id.clone() else {
            continue;
        };
        if store.get_order(&order_id).await?.is_some() {
            continue;
        }

        match gateway.query_order(&pair.symbol, &order_id).await {
            Ok(exchange_order) => {
                let side = match exchange_order.side() {
                    Ok(side) => side,
                    Err(e) => {
                        tracing::error!(symbol = %pair.symbol, "Cannot rebuild {}: {}", order_id, e);
                        continue;
                    }
                };
                let take_profit_price = match (side, filters.get(&pair.symbol)) {
                    (OrderSide::Buy, Some(f)) => {
                        round_to_valid_price(f, exchange_order.price * bot.profit_target, true)
                            .unwrap_or(exchange_order.price)
                    }
                    _ => exchange_order.price,
                };

                let order = match order_from_exchange(bot, &exchange_order, take_profit_price, None) {
                    Ok(order) => order,
                    Err(e) => {
                        tracing::error!(symbol = %pair.symbol, "Cannot rebuild {}: {}", order_id, e);
                        continue;
                    }
                };
                let status = order.status;
                store.create_order(&order).await?;
                report.rebuilt += 1;
                tracing::info!(
                    symbol = %pair.symbol,
                    client_order_id = %order_id,
                    "🔧 Rebuilt missing order from exchange ({})",
                    status
                );
            }
            Err(e) if e.is_unknown_order() => {
                let mut pair = pair.clone();
                pair.is_active = true;
                pair.current_order_id = None;
                store.update_pair(&pair).await?;
                report.reset += 1;
                tracing::warn!(
                    symbol = %pair.symbol,
                    client_order_id = %order_id,
                    "Exchange has no record of order, pair reset to idle"
                );
            }
            Err(e) => {
                tracing::warn!(
                    symbol = %pair.symbol,
                    client_order_id = %order_id,
                    "Reconciliation skipped: {}",
                    e
                );
            }
        }
    }

    Ok(report)
}
