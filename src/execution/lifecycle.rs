use rust_decimal::Decimal;
use std::sync::Arc;

use crate::error::{ConfigError, ExchangeError, StoreError};
use crate::exchange::{
    round_to_valid_price, round_to_valid_quantity, ExchangeGateway, OrderReport, OrderRequest,
    SymbolFilterSet,
};
use crate::models::{Bot, Order, OrderSide, OrderStatus, Pair};
use crate::persistence::RecordStore;
use crate::signal::{Signal, SignalEvaluator};

/// Where a pair sits in the entry/exit cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairState {
    /// No open order, eligible to enter
    Idle,
    PendingEntry,
    PendingExit,
}

impl PairState {
    /// `order` is the pair's current order, if loaded
    pub fn of(pair: &Pair, order: Option<&Order>) -> Self {
        match (pair.current_order_id.as_deref(), order) {
            (None, _) => Self::Idle,
            (Some(id), Some(order)) if order.id == id && !order.is_entry_order => {
                Self::PendingExit
            }
            (Some(_), _) => Self::PendingEntry,
        }
    }
}

/// State change produced by one evaluation. Nothing is written until the
/// runner merges transitions after the round barrier.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// Idle -> PendingEntry
    EntryPlaced { order: Order, pair: Pair },
    /// PendingEntry -> PendingExit
    ExitPlaced { entry: Order, exit: Order, pair: Pair },
    /// PendingExit -> Idle
    ExitFilled { exit: Order, pair: Pair },
    /// Order still open; status or fill changed
    StatusRefreshed { order: Order },
    /// Entry died unfilled; PendingEntry -> Idle
    EntryAbandoned { order: Order, pair: Pair },
    /// Exit died; pair stays blocked until an operator steps in
    ExitStranded { order: Order },
}

impl Transition {
    /// True when the transition placed a new order (balances are now stale)
    pub fn placed_order(&self) -> bool {
        matches!(self, Self::EntryPlaced { .. } | Self::ExitPlaced { .. })
    }

    pub fn symbol(&self) -> &str {
        match self {
            Self::EntryPlaced { order, .. }
            | Self::StatusRefreshed { order }
            | Self::EntryAbandoned { order, .. }
            | Self::ExitStranded { order } => &order.symbol,
            Self::ExitPlaced { exit, .. } | Self::ExitFilled { exit, .. } => &exit.symbol,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EvaluationError {
    #[error(transparent)]
    Exchange(#[from] ExchangeError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl EvaluationError {
    pub fn is_network(&self) -> bool {
        matches!(self, Self::Exchange(e) if e.is_network())
    }
}

pub type Evaluation = Result<Option<Transition>, EvaluationError>;

/// An order submitted without a confirmed answer (network error or dispatch
/// timeout). The exchange may or may not hold it; its symbol stays blocked
/// until [`OrderLifecycleEngine::recover_placement`] finds out.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingPlacement {
    pub bot_id: String,
    pub symbol: String,
    pub client_order_id: String,
    pub kind: PlacementKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PlacementKind {
    Entry,
    /// Exit for this stored entry order
    Exit { entry: Order },
}

/// Drives the per-pair entry/exit state machine against the exchange.
pub struct OrderLifecycleEngine {
    gateway: Arc<dyn ExchangeGateway>,
    store: Arc<dyn RecordStore>,
    entry_discount: Decimal,
    kline_limit: usize,
}

impl OrderLifecycleEngine {
    /// `entry_discount` scales the last close into the entry limit price
    /// (0.99 buys 1% under the market).
    pub fn new(
        gateway: Arc<dyn ExchangeGateway>,
        store: Arc<dyn RecordStore>,
        entry_discount: Decimal,
        kline_limit: usize,
    ) -> Result<Self, ConfigError> {
        if entry_discount <= Decimal::ZERO || entry_discount > Decimal::ONE {
            return Err(ConfigError::InvalidEntryDiscount(entry_discount.to_string()));
        }
        Ok(Self {
            gateway,
            store,
            entry_discount,
            kline_limit,
        })
    }

    pub fn gateway(&self) -> &Arc<dyn ExchangeGateway> {
        &self.gateway
    }

    /// Idle -> PendingEntry. `allocation_amount` is the quote amount to spend;
    /// an order placed here carries `client_order_id`.
    pub async fn evaluate_entry(
        &self,
        bot: &Bot,
        evaluator: &dyn SignalEvaluator,
        pair: &Pair,
        filters: &SymbolFilterSet,
        allocation_amount: Decimal,
        client_order_id: &str,
    ) -> Evaluation {
        if PairState::of(pair, None) != PairState::Idle || !pair.is_active {
            return Ok(None);
        }

        let limit = self.kline_limit.max(evaluator.min_candles());
        let candles = self
            .gateway
            .klines(&pair.symbol, &bot.interval, limit, None)
            .await?;
        if candles.len() < evaluator.min_candles() {
            tracing::debug!(
                symbol = %pair.symbol,
                "Not enough candles ({} < {})",
                candles.len(),
                evaluator.min_candles()
            );
            return Ok(None);
        }

        let index = candles.len() - 1;
        if let Signal::NoSignal = evaluator.evaluate(&candles, index) {
            return Ok(None);
        }
        let last_close = candles[index].close;

        let buy_price = round_to_valid_price(filters, last_close * self.entry_discount, false)?;
        if buy_price <= Decimal::ZERO {
            tracing::warn!(symbol = %pair.symbol, "Entry price rounds to zero, skipping");
            return Ok(None);
        }
        let quantity = round_to_valid_quantity(filters, allocation_amount / buy_price, false)?;
        if quantity <= Decimal::ZERO {
            tracing::warn!(
                symbol = %pair.symbol,
                "Allocation {} buys less than one lot at {}, skipping",
                allocation_amount,
                buy_price
            );
            return Ok(None);
        }

        let request = OrderRequest::limit(
            &pair.symbol,
            OrderSide::Buy,
            buy_price,
            quantity,
            client_order_id,
        )?;
        let report = self.gateway.place_order(&request, false).await?;

        let take_profit = round_to_valid_price(filters, buy_price * bot.profit_target, true)?;
        let order = order_from_report(bot, &request, &report, take_profit, None)?;

        let mut pair = pair.clone();
        pair.is_active = false;
        pair.current_order_id = Some(order.id.clone());

        tracing::info!(
            symbol = %pair.symbol,
            client_order_id = %order.id,
            "🟢 Entry placed: BUY {} @ {} (close {}, target {})",
            quantity,
            buy_price,
            last_close,
            take_profit
        );

        Ok(Some(Transition::EntryPlaced { order, pair }))
    }

    /// PendingEntry -> PendingExit, PendingExit -> Idle, or a status refresh.
    /// An exit placed here carries `exit_client_order_id`.
    pub async fn evaluate_exit(
        &self,
        bot: &Bot,
        pair: &Pair,
        order: &Order,
        filters: &SymbolFilterSet,
        exit_client_order_id: &str,
    ) -> Evaluation {
        if order.is_closed {
            return Ok(None);
        }

        let report = self.gateway.query_order(&order.symbol, &order.id).await?;
        let status = report.status()?;

        let mut refreshed = order.clone();
        refreshed.status = status;
        refreshed.executed_quantity = report.executed_qty;

        let filled_entry = order.is_entry_order
            && (status == OrderStatus::Filled
                || (status.is_dead() && report.executed_qty > Decimal::ZERO));

        if filled_entry {
            if status != OrderStatus::Filled {
                tracing::warn!(
                    symbol = %order.symbol,
                    client_order_id = %order.id,
                    "Entry {} after a partial fill, exiting the {} filled",
                    status,
                    report.executed_qty
                );
            }
            return self
                .place_exit(bot, pair, refreshed, filters, exit_client_order_id)
                .await;
        }

        if status == OrderStatus::Filled {
            return self.complete_round_trip(pair, refreshed).await;
        }

        if status.is_dead() {
            refreshed.is_closed = true;
            if order.is_entry_order {
                let mut pair = pair.clone();
                pair.is_active = true;
                pair.current_order_id = None;
                tracing::warn!(
                    symbol = %order.symbol,
                    client_order_id = %order.id,
                    "Entry {} without fill, pair is idle again",
                    status
                );
                return Ok(Some(Transition::EntryAbandoned {
                    order: refreshed,
                    pair,
                }));
            }

            tracing::error!(
                symbol = %order.symbol,
                client_order_id = %order.id,
                "❌ Exit order {}; pair stays blocked until resolved manually",
                status
            );
            return Ok(Some(Transition::ExitStranded { order: refreshed }));
        }

        if refreshed.status != order.status || refreshed.executed_quantity != order.executed_quantity
        {
            return Ok(Some(Transition::StatusRefreshed { order: refreshed }));
        }
        Ok(None)
    }

    async fn place_exit(
        &self,
        bot: &Bot,
        pair: &Pair,
        mut entry: Order,
        filters: &SymbolFilterSet,
        client_order_id: &str,
    ) -> Evaluation {
        let sell_price = round_to_valid_price(filters, entry.price * bot.profit_target, true)?;
        let quantity = round_to_valid_quantity(filters, entry.executed_quantity, false)?;

        let request = OrderRequest::limit(
            &entry.symbol,
            OrderSide::Sell,
            sell_price,
            quantity,
            client_order_id,
        )?;
        let report = self.gateway.place_order(&request, false).await?;
        let exit = order_from_report(bot, &request, &report, sell_price, Some(entry.id.clone()))?;

        entry.is_closed = true;
        entry.closing_order_id = Some(exit.id.clone());

        let mut pair = pair.clone();
        pair.is_active = false;
        pair.current_order_id = Some(exit.id.clone());

        tracing::info!(
            symbol = %entry.symbol,
            client_order_id = %exit.id,
            "🎯 Exit placed: SELL {} @ {} (entry {})",
            quantity,
            sell_price,
            entry.price
        );

        Ok(Some(Transition::ExitPlaced { entry, exit, pair }))
    }

    /// Ask the exchange whether an unconfirmed placement landed. A found
    /// order becomes the transition its placement would have produced;
    /// `Ok(None)` means the exchange never took it and the pair is free.
    pub async fn recover_placement(
        &self,
        bot: &Bot,
        pair: &Pair,
        placement: &PendingPlacement,
        filters: &SymbolFilterSet,
    ) -> Evaluation {
        let report = match self
            .gateway
            .query_order(&placement.symbol, &placement.client_order_id)
            .await
        {
            Ok(report) => report,
            Err(e) if e.is_unknown_order() => {
                tracing::info!(
                    symbol = %placement.symbol,
                    client_order_id = %placement.client_order_id,
                    "Unconfirmed order never reached the exchange"
                );
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        match &placement.kind {
            PlacementKind::Entry => {
                let take_profit =
                    round_to_valid_price(filters, report.price * bot.profit_target, true)?;
                let order = order_from_exchange(bot, &report, take_profit, None)?;

                let mut pair = pair.clone();
                pair.is_active = false;
                pair.current_order_id = Some(order.id.clone());

                tracing::info!(
                    symbol = %order.symbol,
                    client_order_id = %order.id,
                    "🔧 Unconfirmed entry found on the exchange: BUY {} @ {}",
                    order.original_quantity,
                    order.price
                );
                Ok(Some(Transition::EntryPlaced { order, pair }))
            }
            PlacementKind::Exit { entry } => {
                let entry_report = self.gateway.query_order(&entry.symbol, &entry.id).await?;
                let exit = order_from_exchange(bot, &report, report.price, Some(entry.id.clone()))?;

                let mut entry = entry.clone();
                entry.status = entry_report.status()?;
                entry.executed_quantity = entry_report.executed_qty;
                entry.is_closed = true;
                entry.closing_order_id = Some(exit.id.clone());

                let mut pair = pair.clone();
                pair.is_active = false;
                pair.current_order_id = Some(exit.id.clone());

                tracing::info!(
                    symbol = %exit.symbol,
                    client_order_id = %exit.id,
                    "🔧 Unconfirmed exit found on the exchange: SELL {} @ {}",
                    exit.original_quantity,
                    exit.price
                );
                Ok(Some(Transition::ExitPlaced { entry, exit, pair }))
            }
        }
    }

    async fn complete_round_trip(&self, pair: &Pair, mut exit: Order) -> Evaluation {
        exit.is_closed = true;

        let mut pair = pair.clone();
        pair.is_active = true;
        pair.current_order_id = None;

        let entry = match &exit.opening_order_id {
            Some(id) => self.store.get_order(id).await?,
            None => None,
        };
        match entry {
            Some(entry) if entry.price > Decimal::ZERO => {
                pair.profit_loss *= exit.price / entry.price;
                tracing::info!(
                    symbol = %exit.symbol,
                    "✅ Round trip complete: {} -> {} (cumulative x{})",
                    entry.price,
                    exit.price,
                    pair.profit_loss.round_dp(6)
                );
            }
            _ => tracing::warn!(
                symbol = %exit.symbol,
                client_order_id = %exit.id,
                "Exit filled but its entry order is unknown, P/L not updated"
            ),
        }

        Ok(Some(Transition::ExitFilled { exit, pair }))
    }
}

fn order_from_report(
    bot: &Bot,
    request: &OrderRequest,
    report: &OrderReport,
    take_profit_price: Decimal,
    opening_order_id: Option<String>,
) -> Result<Order, ExchangeError> {
    let side = request.side();
    Ok(Order {
        id: request.client_order_id().to_string(),
        bot_id: bot.id.clone(),
        symbol: request.symbol().to_string(),
        side,
        time: report.created_at(),
        price: request.price().unwrap_or(report.price),
        take_profit_price,
        original_quantity: request.quantity(),
        executed_quantity: report.executed_qty,
        status: report.status()?,
        is_entry_order: side == OrderSide::Buy,
        is_closed: false,
        closing_order_id: None,
        opening_order_id,
    })
}

/// Order record for an order known only from the exchange's report
pub(crate) fn order_from_exchange(
    bot: &Bot,
    report: &OrderReport,
    take_profit_price: Decimal,
    opening_order_id: Option<String>,
) -> Result<Order, ExchangeError> {
    let side = report.side()?;
    Ok(Order {
        id: report.client_order_id.clone(),
        bot_id: bot.id.clone(),
        symbol: report.symbol.clone(),
        side,
        time: report.created_at(),
        price: report.price,
        take_profit_price,
        original_quantity: report.orig_qty,
        executed_quantity: report.executed_qty,
        status: report.status()?,
        is_entry_order: side == OrderSide::Buy,
        is_closed: false,
        closing_order_id: None,
        opening_order_id,
    })
}
