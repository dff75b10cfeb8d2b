#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use spotbot::error::{ExchangeError, StoreError};
use spotbot::exchange::responses::AssetBalance;
use spotbot::exchange::{
    AccountInfo, ExchangeGateway, OrderReport, OrderRequest, PaperExchange, SymbolFilterSet,
};
use spotbot::execution::{
    BalanceMonitor, BotRunner, ConcurrentDispatcher, ManualClock, OrderLifecycleEngine,
    RetryPolicy,
};
use spotbot::models::{Bot, Candle, KlineInterval, Order, OrderStatus, Pair};
use spotbot::persistence::{InMemoryRecordStore, RecordStore};
use spotbot::signal::{Signal, SignalEvaluator, SignalRegistry};

/// Scripted failure, converted into an `ExchangeError` when it fires
#[derive(Debug, Clone)]
pub enum Failure {
    Api(i64, &'static str),
    Network,
}

impl Failure {
    fn into_error(self) -> ExchangeError {
        match self {
            Failure::Api(code, msg) => ExchangeError::Api {
                code,
                msg: msg.to_string(),
            },
            Failure::Network => ExchangeError::Timeout(Duration::from_secs(10)),
        }
    }
}

#[derive(Debug, Clone)]
struct BookedOrder {
    report: OrderReport,
}

/// In-process exchange with scripted market data, fills and failures
#[derive(Default)]
pub struct ScriptedExchange {
    filters: Mutex<HashMap<String, SymbolFilterSet>>,
    closes: Mutex<HashMap<String, Vec<Decimal>>>,
    free: Mutex<HashMap<String, Decimal>>,
    book: Mutex<HashMap<String, BookedOrder>>,
    placed: Mutex<Vec<OrderRequest>>,
    test_flags: Mutex<Vec<bool>>,
    place_failures: Mutex<VecDeque<Failure>>,
    lost_answers: AtomicUsize,
    stalls: AtomicUsize,
    query_failures: Mutex<VecDeque<Failure>>,
    account_failures: AtomicUsize,
    pub account_calls: AtomicUsize,
}

impl ScriptedExchange {
    pub fn new() -> Self {
        Self::default()
    }

    /// ETHUSDT with tick 0.01, step 0.0001 and 1000 USDT free
    pub fn eth_usdt() -> Self {
        let exchange = Self::new();
        exchange.add_symbol("ETHUSDT", "ETH", "USDT", Some(dec!(0.01)), Some(dec!(0.0001)));
        exchange.set_closes("ETHUSDT", &[dec!(101), dec!(100.5), dec!(100)]);
        exchange.set_free("USDT", dec!(1000));
        exchange
    }

    pub fn add_symbol(
        &self,
        symbol: &str,
        base: &str,
        quote: &str,
        tick: Option<Decimal>,
        step: Option<Decimal>,
    ) {
        self.filters.lock().unwrap().insert(
            symbol.to_string(),
            SymbolFilterSet {
                symbol: symbol.to_string(),
                base_asset: base.to_string(),
                quote_asset: quote.to_string(),
                tick_size: tick,
                step_size: step,
                min_notional: Some(dec!(5)),
            },
        );
    }

    pub fn filters(&self, symbol: &str) -> SymbolFilterSet {
        self.filters.lock().unwrap()[symbol].clone()
    }

    pub fn set_closes(&self, symbol: &str, closes: &[Decimal]) {
        self.closes
            .lock()
            .unwrap()
            .insert(symbol.to_string(), closes.to_vec());
    }

    pub fn set_free(&self, asset: &str, amount: Decimal) {
        self.free.lock().unwrap().insert(asset.to_string(), amount);
    }

    pub fn fail_next_place(&self, failure: Failure) {
        self.place_failures.lock().unwrap().push_back(failure);
    }

    /// The next placement is booked but its answer is lost in transit
    pub fn lose_next_answer(&self) {
        self.lost_answers.fetch_add(1, Ordering::SeqCst);
    }

    /// The next placement is booked and then never answers
    pub fn stall_next_place(&self) {
        self.stalls.fetch_add(1, Ordering::SeqCst);
    }

    pub fn fail_next_query(&self, failure: Failure) {
        self.query_failures.lock().unwrap().push_back(failure);
    }

    pub fn fail_account(&self, times: usize) {
        self.account_failures.store(times, Ordering::SeqCst);
    }

    pub fn placed(&self) -> Vec<OrderRequest> {
        self.placed.lock().unwrap().clone()
    }

    /// The `test` flag of every placement, in order
    pub fn test_flags(&self) -> Vec<bool> {
        self.test_flags.lock().unwrap().clone()
    }

    pub fn is_booked(&self, client_order_id: &str) -> bool {
        self.book.lock().unwrap().contains_key(client_order_id)
    }

    /// Register an order as if it had been placed earlier
    pub fn book(&self, order: &Order) {
        let report = OrderReport {
            symbol: order.symbol.clone(),
            client_order_id: order.id.clone(),
            transact_time: Some(order.time.timestamp_millis()),
            time: None,
            price: order.price,
            orig_qty: order.original_quantity,
            executed_qty: order.executed_quantity,
            status: order.status.as_str().to_string(),
            order_type: "LIMIT".to_string(),
            side: order.side.as_str().to_string(),
        };
        self.book
            .lock()
            .unwrap()
            .insert(order.id.clone(), BookedOrder { report });
    }

    pub fn set_status(&self, client_order_id: &str, status: OrderStatus, executed: Decimal) {
        let mut book = self.book.lock().unwrap();
        let booked = book.get_mut(client_order_id).unwrap();
        booked.report.status = status.as_str().to_string();
        booked.report.executed_qty = executed;
    }

    pub fn fill(&self, client_order_id: &str) {
        let qty = self.book.lock().unwrap()[client_order_id].report.orig_qty;
        self.set_status(client_order_id, OrderStatus::Filled, qty);
    }
}

#[async_trait]
impl ExchangeGateway for ScriptedExchange {
    async fn symbol_filters(
        &self,
        symbols: &[String],
    ) -> Result<HashMap<String, SymbolFilterSet>, ExchangeError> {
        let filters = self.filters.lock().unwrap();
        Ok(symbols
            .iter()
            .filter_map(|s| filters.get(s).map(|f| (s.clone(), f.clone())))
            .collect())
    }

    async fn klines(
        &self,
        symbol: &str,
        _interval: &KlineInterval,
        limit: usize,
        _end_time: Option<i64>,
    ) -> Result<Vec<Candle>, ExchangeError> {
        let closes = self
            .closes
            .lock()
            .unwrap()
            .get(symbol)
            .cloned()
            .unwrap_or_default();
        let skip = closes.len().saturating_sub(limit);

        Ok(closes
            .iter()
            .enumerate()
            .skip(skip)
            .map(|(i, close)| Candle {
                open_time: i as i64 * 300_000,
                open: *close,
                high: *close,
                low: *close,
                close: *close,
                volume: Decimal::ONE,
                close_time: i as i64 * 300_000 + 299_999,
            })
            .collect())
    }

    async fn place_order(
        &self,
        request: &OrderRequest,
        test: bool,
    ) -> Result<OrderReport, ExchangeError> {
        self.test_flags.lock().unwrap().push(test);
        if let Some(failure) = self.place_failures.lock().unwrap().pop_front() {
            return Err(failure.into_error());
        }

        let report = OrderReport {
            symbol: request.symbol().to_string(),
            client_order_id: request.client_order_id().to_string(),
            transact_time: Some(Utc::now().timestamp_millis()),
            time: None,
            price: request.price().unwrap_or_default(),
            orig_qty: request.quantity(),
            executed_qty: Decimal::ZERO,
            status: "NEW".to_string(),
            order_type: request.order_type().as_str().to_string(),
            side: request.side().as_str().to_string(),
        };
        self.placed.lock().unwrap().push(request.clone());
        self.book.lock().unwrap().insert(
            report.client_order_id.clone(),
            BookedOrder {
                report: report.clone(),
            },
        );

        if take_one(&self.lost_answers) {
            return Err(Failure::Network.into_error());
        }
        if take_one(&self.stalls) {
            std::future::pending::<()>().await;
        }
        Ok(report)
    }

    async fn query_order(
        &self,
        _symbol: &str,
        client_order_id: &str,
    ) -> Result<OrderReport, ExchangeError> {
        if let Some(failure) = self.query_failures.lock().unwrap().pop_front() {
            return Err(failure.into_error());
        }
        self.book
            .lock()
            .unwrap()
            .get(client_order_id)
            .map(|b| b.report.clone())
            .ok_or_else(ExchangeError::unknown_order)
    }

    async fn account(&self) -> Result<AccountInfo, ExchangeError> {
        self.account_calls.fetch_add(1, Ordering::SeqCst);
        let remaining = self.account_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.account_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(ExchangeError::Api {
                code: -1021,
                msg: "Timestamp for this request is outside of the recvWindow.".to_string(),
            });
        }

        let balances = self
            .free
            .lock()
            .unwrap()
            .iter()
            .map(|(asset, free)| AssetBalance {
                asset: asset.clone(),
                free: *free,
                locked: Decimal::ZERO,
            })
            .collect();
        Ok(AccountInfo { balances })
    }

    async fn average_price(&self, symbol: &str) -> Result<Decimal, ExchangeError> {
        Ok(self
            .closes
            .lock()
            .unwrap()
            .get(symbol)
            .and_then(|c| c.last().copied())
            .unwrap_or_default())
    }
}

fn take_one(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

/// Record store that fails the next N order writes
pub struct FlakyStore {
    inner: InMemoryRecordStore,
    order_write_failures: AtomicUsize,
}

impl FlakyStore {
    pub fn new(order_write_failures: usize) -> Self {
        Self {
            inner: InMemoryRecordStore::new(),
            order_write_failures: AtomicUsize::new(order_write_failures),
        }
    }

    fn maybe_fail(&self) -> Result<(), StoreError> {
        let remaining = self.order_write_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.order_write_failures
                .store(remaining - 1, Ordering::SeqCst);
            return Err(StoreError::Corrupt("disk full".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl RecordStore for FlakyStore {
    async fn create_bot(&self, bot: &Bot) -> Result<(), StoreError> {
        self.inner.create_bot(bot).await
    }
    async fn update_bot(&self, bot: &Bot) -> Result<(), StoreError> {
        self.inner.update_bot(bot).await
    }
    async fn create_pair(&self, pair: &Pair) -> Result<(), StoreError> {
        self.inner.create_pair(pair).await
    }
    async fn update_pair(&self, pair: &Pair) -> Result<(), StoreError> {
        self.inner.update_pair(pair).await
    }
    async fn create_order(&self, order: &Order) -> Result<(), StoreError> {
        self.maybe_fail()?;
        self.inner.create_order(order).await
    }
    async fn update_order(&self, order: &Order) -> Result<(), StoreError> {
        self.maybe_fail()?;
        self.inner.update_order(order).await
    }
    async fn get_order(&self, id: &str) -> Result<Option<Order>, StoreError> {
        self.inner.get_order(id).await
    }
    async fn all_bots(&self) -> Result<Vec<Bot>, StoreError> {
        self.inner.all_bots().await
    }
    async fn pairs_of_bot(&self, bot_id: &str) -> Result<Vec<Pair>, StoreError> {
        self.inner.pairs_of_bot(bot_id).await
    }
    async fn active_pairs_of_bot(&self, bot_id: &str) -> Result<Vec<Pair>, StoreError> {
        self.inner.active_pairs_of_bot(bot_id).await
    }
    async fn open_orders_of_bot(&self, bot_id: &str) -> Result<Vec<Order>, StoreError> {
        self.inner.open_orders_of_bot(bot_id).await
    }
}

/// Fires on every candle at its close
pub struct AlwaysBuy;

impl SignalEvaluator for AlwaysBuy {
    fn key(&self) -> &str {
        "always_buy"
    }

    fn min_candles(&self) -> usize {
        1
    }

    fn evaluate(&self, candles: &[Candle], index: usize) -> Signal {
        Signal::Trigger(candles[index].close)
    }
}

/// Never fires
pub struct NeverBuy;

impl SignalEvaluator for NeverBuy {
    fn key(&self) -> &str {
        "never_buy"
    }

    fn min_candles(&self) -> usize {
        1
    }

    fn evaluate(&self, _candles: &[Candle], _index: usize) -> Signal {
        Signal::NoSignal
    }
}

pub fn registry() -> SignalRegistry {
    let mut registry = SignalRegistry::with_defaults();
    registry.register(Arc::new(AlwaysBuy));
    registry.register(Arc::new(NeverBuy));
    registry
}

pub fn bot(simulation: bool) -> Bot {
    Bot {
        id: "bot-1".to_string(),
        name: "eth-scalper".to_string(),
        strategy: "always_buy".to_string(),
        interval: "5m".parse().unwrap(),
        trade_allocation: dec!(0.01),
        profit_target: dec!(1.012),
        simulation,
        created_at: Utc::now(),
    }
}

pub fn engine(
    exchange: Arc<ScriptedExchange>,
    store: Arc<dyn RecordStore>,
) -> OrderLifecycleEngine {
    engine_over(exchange, store)
}

pub fn engine_over(
    gateway: Arc<dyn ExchangeGateway>,
    store: Arc<dyn RecordStore>,
) -> OrderLifecycleEngine {
    OrderLifecycleEngine::new(gateway, store, dec!(0.99), 3).unwrap()
}

/// Both engines trade on `exchange` directly
pub fn runner(
    exchange: Arc<ScriptedExchange>,
    store: Arc<dyn RecordStore>,
    clock: Arc<ManualClock>,
) -> BotRunner {
    build_runner(exchange.clone(), exchange, store, clock, Duration::from_secs(5))
}

pub fn runner_with_timeout(
    exchange: Arc<ScriptedExchange>,
    store: Arc<dyn RecordStore>,
    clock: Arc<ManualClock>,
    task_timeout: Duration,
) -> BotRunner {
    build_runner(exchange.clone(), exchange, store, clock, task_timeout)
}

/// Simulation bots go through a fresh paper book over `exchange`, as after
/// a process start
pub fn paper_runner(
    exchange: Arc<ScriptedExchange>,
    store: Arc<dyn RecordStore>,
    clock: Arc<ManualClock>,
) -> BotRunner {
    let paper = Arc::new(PaperExchange::new(exchange.clone()));
    build_runner(exchange, paper, store, clock, Duration::from_secs(5))
}

fn build_runner(
    live: Arc<ScriptedExchange>,
    paper: Arc<dyn ExchangeGateway>,
    store: Arc<dyn RecordStore>,
    clock: Arc<ManualClock>,
    task_timeout: Duration,
) -> BotRunner {
    let balances = BalanceMonitor::new(live.clone(), RetryPolicy::default(), clock);
    BotRunner::new(
        store.clone(),
        registry(),
        engine_over(live, store.clone()),
        engine_over(paper, store),
        balances,
        ConcurrentDispatcher::new(4, task_timeout),
        Duration::from_millis(10),
    )
}
