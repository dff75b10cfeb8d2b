use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};

use uuid::Uuid;

use crate::error::{BotError, ConfigError, ExchangeError, StoreError};
use crate::exchange::SymbolFilterSet;
use crate::execution::balance::{BalanceFetch, BalanceMonitor, Balances};
use crate::execution::dispatcher::{ConcurrentDispatcher, DispatchError, Dispatched};
use crate::execution::lifecycle::{
    EvaluationError, OrderLifecycleEngine, PairState, PendingPlacement, PlacementKind, Transition,
};
use crate::execution::reconcile::{persist, reconcile_bot, writes_for, RecordWrite};
use crate::models::{Bot, KlineInterval, Order, Pair};
use crate::persistence::RecordStore;
use crate::signal::{SignalEvaluator, SignalRegistry};

/// Parameters for a new bot, validated by [`BotRunner::create_bot`]
#[derive(Debug, Clone)]
pub struct NewBot {
    pub name: String,
    pub strategy: String,
    pub interval: String,
    pub trade_allocation: Decimal,
    pub profit_target: Decimal,
    pub symbols: Vec<String>,
    pub simulation: bool,
}

/// Why the run loop stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunExit {
    Shutdown,
    /// Balances could not be fetched; trading on unknown balances is unsafe
    BalanceExhausted { attempts: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoundOutcome {
    Continue,
    Halt(RunExit),
}

/// State carried from one round to the next
#[derive(Debug, Default)]
pub struct RoundContext {
    pub round: u64,
    /// Set when an order was placed; cleared by a successful balance fetch
    pub balances_stale: bool,
    pub balances: Balances,
    /// Trading rules per symbol, fetched once per run
    pub filters: HashMap<String, SymbolFilterSet>,
    /// Writes that failed after the exchange accepted the order
    pub pending_writes: Vec<RecordWrite>,
    /// Orders sent without a confirmed answer, resolved at the next round
    pub pending_placements: Vec<PendingPlacement>,
}

impl RoundContext {
    pub fn new() -> Self {
        Self {
            balances_stale: true,
            ..Self::default()
        }
    }

    /// Symbols with unpersisted writes or unconfirmed orders are left alone
    /// until those resolve, so the store never lags behind an order the
    /// exchange may already hold.
    fn blocked_symbols(&self, bot_id: &str) -> HashSet<String> {
        let unpersisted = self.pending_writes.iter().filter_map(|w| match w {
            RecordWrite::CreateOrder(o) | RecordWrite::UpdateOrder(o) if o.bot_id == bot_id => {
                Some(o.symbol.clone())
            }
            RecordWrite::UpdatePair(p) if p.bot_id == bot_id => Some(p.symbol.clone()),
            _ => None,
        });
        let unconfirmed = self
            .pending_placements
            .iter()
            .filter(|p| p.bot_id == bot_id)
            .map(|p| p.symbol.clone());
        unpersisted.chain(unconfirmed).collect()
    }

    fn forget_placement(&mut self, bot_id: &str, symbol: &str) {
        self.pending_placements
            .retain(|p| !(p.bot_id == bot_id && p.symbol == symbol));
    }
}

/// A bot with its evaluator resolved
#[derive(Clone)]
pub struct LoadedBot {
    pub bot: Bot,
    pub evaluator: Arc<dyn SignalEvaluator>,
}

pub struct BotRunner {
    store: Arc<dyn RecordStore>,
    registry: SignalRegistry,
    live: OrderLifecycleEngine,
    paper: OrderLifecycleEngine,
    balances: BalanceMonitor,
    dispatcher: ConcurrentDispatcher,
    poll_interval: Duration,
}

impl BotRunner {
    pub fn new(
        store: Arc<dyn RecordStore>,
        registry: SignalRegistry,
        live: OrderLifecycleEngine,
        paper: OrderLifecycleEngine,
        balances: BalanceMonitor,
        dispatcher: ConcurrentDispatcher,
        poll_interval: Duration,
    ) -> Self {
        Self {
            store,
            registry,
            live,
            paper,
            balances,
            dispatcher,
            poll_interval,
        }
    }

    fn engine_for(&self, bot: &Bot) -> &OrderLifecycleEngine {
        if bot.simulation {
            &self.paper
        } else {
            &self.live
        }
    }

    /// Validate and persist a bot with one idle pair per symbol. Nothing is
    /// written unless every parameter and every symbol checks out.
    pub async fn create_bot(&self, new_bot: NewBot) -> Result<Bot, BotError> {
        let interval: KlineInterval = new_bot.interval.parse()?;
        if new_bot.trade_allocation <= Decimal::ZERO || new_bot.trade_allocation > Decimal::ONE {
            return Err(ConfigError::InvalidAllocation(new_bot.trade_allocation.to_string()).into());
        }
        if new_bot.profit_target <= Decimal::ONE {
            return Err(ConfigError::InvalidProfitTarget(new_bot.profit_target.to_string()).into());
        }
        self.registry.get(&new_bot.strategy)?;
        if new_bot.symbols.is_empty() {
            return Err(ConfigError::Invalid("a bot needs at least one symbol".into()).into());
        }

        let symbols: Vec<String> = new_bot
            .symbols
            .iter()
            .map(|s| s.trim().to_uppercase())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();

        let filters = self.live.gateway().symbol_filters(&symbols).await?;
        for symbol in &symbols {
            let f = filters
                .get(symbol)
                .ok_or_else(|| ConfigError::UnknownSymbol(symbol.clone()))?;
            f.validate()?;
        }

        let bot = Bot {
            id: Uuid::new_v4().to_string(),
            name: new_bot.name,
            strategy: new_bot.strategy,
            interval,
            trade_allocation: new_bot.trade_allocation,
            profit_target: new_bot.profit_target,
            simulation: new_bot.simulation,
            created_at: Utc::now(),
        };
        self.store.create_bot(&bot).await?;
        for symbol in &symbols {
            self.store.create_pair(&Pair::new(&bot.id, symbol)).await?;
        }

        tracing::info!(
            "🤖 Created bot '{}' ({}, {}, {} pairs, {})",
            bot.name,
            bot.strategy,
            bot.interval,
            symbols.len(),
            if bot.simulation { "paper" } else { "live" }
        );
        Ok(bot)
    }

    /// Load every bot and resolve its evaluator; an unknown strategy fails the load.
    pub async fn load_bots(&self) -> Result<Vec<LoadedBot>, BotError> {
        let mut loaded = Vec::new();
        for bot in self.store.all_bots().await? {
            let evaluator = self.registry.get(&bot.strategy)?;
            loaded.push(LoadedBot { bot, evaluator });
        }
        Ok(loaded)
    }

    /// Fetch trading rules for symbols not yet cached
    async fn refresh_filters(&self, bots: &[LoadedBot], ctx: &mut RoundContext) -> Result<(), StoreError> {
        let mut missing = Vec::new();
        for loaded in bots {
            for pair in self.store.pairs_of_bot(&loaded.bot.id).await? {
                if !ctx.filters.contains_key(&pair.symbol) && !missing.contains(&pair.symbol) {
                    missing.push(pair.symbol);
                }
            }
        }
        if missing.is_empty() {
            return Ok(());
        }

        match self.live.gateway().symbol_filters(&missing).await {
            Ok(fetched) => {
                for symbol in &missing {
                    match fetched.get(symbol) {
                        Some(f) if f.validate().is_ok() => {
                            ctx.filters.insert(symbol.clone(), f.clone());
                        }
                        _ => tracing::error!(
                            symbol = %symbol,
                            "❌ No usable trading rules, symbol is skipped"
                        ),
                    }
                }
            }
            Err(e) => tracing::warn!("Failed to fetch trading rules: {}", e),
        }
        Ok(())
    }

    /// Start-up pass: hand stored open orders back to the paper book, then
    /// rebuild orders the store lost after the exchange took them.
    pub async fn reconcile(&self, bots: &[LoadedBot], ctx: &mut RoundContext) -> Result<(), StoreError> {
        self.refresh_filters(bots, ctx).await?;
        for loaded in bots {
            let engine = self.engine_for(&loaded.bot);
            let open = self.store.open_orders_of_bot(&loaded.bot.id).await?;
            let restored = engine.gateway().restore_orders(&open).await;
            if restored > 0 {
                tracing::info!(
                    "📝 Restored {} open paper order(s) for bot '{}'",
                    restored,
                    loaded.bot.name
                );
            }

            let report =
                reconcile_bot(engine.gateway().as_ref(), self.store.as_ref(), &loaded.bot, &ctx.filters)
                    .await?;
            if report.rebuilt > 0 || report.reset > 0 {
                tracing::info!(
                    "🔧 Reconciled bot '{}': {} rebuilt, {} reset",
                    loaded.bot.name,
                    report.rebuilt,
                    report.reset
                );
            }
        }
        Ok(())
    }

    /// Poll until `shutdown` flips to true or balances become unavailable.
    /// Shutdown is only observed between rounds.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<RunExit, BotError> {
        let bots = self.load_bots().await?;
        if bots.is_empty() {
            tracing::warn!("No bots configured, nothing to do");
            return Ok(RunExit::Shutdown);
        }
        tracing::info!("🚀 Running {} bot(s)", bots.len());

        let mut ctx = RoundContext::new();
        self.reconcile(&bots, &mut ctx).await?;

        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        tracing::info!("🛑 Shutdown channel closed");
                        return Ok(RunExit::Shutdown);
                    }
                }
            }
            if *shutdown.borrow() {
                tracing::info!("🛑 Shutdown requested, stopping after round {}", ctx.round);
                return Ok(RunExit::Shutdown);
            }

            if let RoundOutcome::Halt(exit) = self.run_round(&bots, &mut ctx).await? {
                return Ok(exit);
            }
        }
    }

    /// One round: pending writes, balances (if stale), then per bot the
    /// unconfirmed orders, the entry fan-out and the exit fan-out, each
    /// fan-out followed by a merge of the results.
    pub async fn run_round(
        &self,
        bots: &[LoadedBot],
        ctx: &mut RoundContext,
    ) -> Result<RoundOutcome, StoreError> {
        ctx.round += 1;
        tracing::debug!("Round {}", ctx.round);

        if !ctx.pending_writes.is_empty() {
            let pending = std::mem::take(&mut ctx.pending_writes);
            tracing::info!("Retrying {} unpersisted write(s)", pending.len());
            ctx.pending_writes = persist(self.store.as_ref(), pending).await;
        }

        if ctx.balances_stale {
            match self.balances.fetch().await {
                BalanceFetch::Available(balances) => {
                    ctx.balances = balances;
                    ctx.balances_stale = false;
                }
                BalanceFetch::Exhausted { attempts } => {
                    return Ok(RoundOutcome::Halt(RunExit::BalanceExhausted { attempts }));
                }
            }
        }

        self.refresh_filters(bots, ctx).await?;

        for loaded in bots {
            self.recover_placements(loaded, ctx).await?;
            self.entry_fan_out(loaded, ctx).await?;
            self.exit_fan_out(loaded, ctx).await?;
        }

        Ok(RoundOutcome::Continue)
    }

    /// Resolve this bot's unconfirmed orders before anything new is sent on
    /// their symbols. Unresolved ones stay pending and keep the symbol blocked.
    async fn recover_placements(&self, loaded: &LoadedBot, ctx: &mut RoundContext) -> Result<(), StoreError> {
        let bot = &loaded.bot;
        let (mine, others): (Vec<_>, Vec<_>) = std::mem::take(&mut ctx.pending_placements)
            .into_iter()
            .partition(|p| p.bot_id == bot.id);
        ctx.pending_placements = others;
        if mine.is_empty() {
            return Ok(());
        }

        let pairs: HashMap<String, Pair> = self
            .store
            .pairs_of_bot(&bot.id)
            .await?
            .into_iter()
            .map(|p| (p.symbol.clone(), p))
            .collect();
        let engine = self.engine_for(bot);

        for placement in mine {
            let (Some(pair), Some(filters)) =
                (pairs.get(&placement.symbol), ctx.filters.get(&placement.symbol))
            else {
                ctx.pending_placements.push(placement);
                continue;
            };
            let recovered = engine.recover_placement(bot, pair, &placement, filters).await;
            match recovered {
                Ok(Some(transition)) => self.apply(transition, ctx).await,
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(
                        bot = %bot.name,
                        symbol = %placement.symbol,
                        client_order_id = %placement.client_order_id,
                        "Order still unconfirmed: {}",
                        e
                    );
                    ctx.pending_placements.push(placement);
                }
            }
        }
        Ok(())
    }

    /// Entries are sized one after another from a working copy of the
    /// balances, so one round never commits more than is free.
    async fn entry_fan_out(&self, loaded: &LoadedBot, ctx: &mut RoundContext) -> Result<(), StoreError> {
        let bot = &loaded.bot;
        let blocked = ctx.blocked_symbols(&bot.id);
        let mut budget = ctx.balances.clone();

        let mut items: Vec<(Pair, SymbolFilterSet, Decimal, String)> = Vec::new();
        for pair in self.store.active_pairs_of_bot(&bot.id).await? {
            if PairState::of(&pair, None) != PairState::Idle || blocked.contains(&pair.symbol) {
                continue;
            }
            let Some(filters) = ctx.filters.get(&pair.symbol) else {
                continue;
            };
            let amount = budget.allocation_amount(&filters.quote_asset, bot.trade_allocation);
            if !budget.can_enter(&filters.quote_asset, amount, filters.min_notional) {
                tracing::debug!(
                    symbol = %pair.symbol,
                    "Not enough free {} to enter",
                    filters.quote_asset
                );
                continue;
            }
            budget.reserve(&filters.quote_asset, amount);

            let client_order_id = Uuid::new_v4().to_string();
            ctx.pending_placements.push(PendingPlacement {
                bot_id: bot.id.clone(),
                symbol: pair.symbol.clone(),
                client_order_id: client_order_id.clone(),
                kind: PlacementKind::Entry,
            });
            items.push((pair, filters.clone(), amount, client_order_id));
        }
        if items.is_empty() {
            return Ok(());
        }

        let engine = self.engine_for(bot);
        let evaluator = loaded.evaluator.as_ref();
        let results = self
            .dispatcher
            .run(
                items,
                |(pair, _, _, _)| pair.symbol.clone(),
                |(pair, filters, amount, client_order_id)| async move {
                    engine
                        .evaluate_entry(bot, evaluator, &pair, &filters, amount, &client_order_id)
                        .await
                },
            )
            .await;

        self.merge(bot, results, ctx).await;
        Ok(())
    }

    async fn exit_fan_out(&self, loaded: &LoadedBot, ctx: &mut RoundContext) -> Result<(), StoreError> {
        let bot = &loaded.bot;
        let blocked = ctx.blocked_symbols(&bot.id);

        let pairs: HashMap<String, Pair> = self
            .store
            .pairs_of_bot(&bot.id)
            .await?
            .into_iter()
            .map(|p| (p.symbol.clone(), p))
            .collect();

        let mut items: Vec<(Order, Pair, SymbolFilterSet, String)> = Vec::new();
        for order in self.store.open_orders_of_bot(&bot.id).await? {
            if blocked.contains(&order.symbol) {
                continue;
            }
            let (Some(pair), Some(filters)) = (pairs.get(&order.symbol), ctx.filters.get(&order.symbol))
            else {
                tracing::warn!(
                    symbol = %order.symbol,
                    client_order_id = %order.id,
                    "Open order without a tracked pair or trading rules"
                );
                continue;
            };
            // Only a pending entry can lead to a new (exit) order
            let exit_client_order_id = Uuid::new_v4().to_string();
            if order.is_entry_order {
                ctx.pending_placements.push(PendingPlacement {
                    bot_id: bot.id.clone(),
                    symbol: order.symbol.clone(),
                    client_order_id: exit_client_order_id.clone(),
                    kind: PlacementKind::Exit {
                        entry: order.clone(),
                    },
                });
            }
            items.push((order, pair.clone(), filters.clone(), exit_client_order_id));
        }
        if items.is_empty() {
            return Ok(());
        }

        let engine = self.engine_for(bot);
        let results = self
            .dispatcher
            .run(
                items,
                |(order, _, _, _)| order.symbol.clone(),
                |(order, pair, filters, exit_client_order_id)| async move {
                    engine
                        .evaluate_exit(bot, &pair, &order, &filters, &exit_client_order_id)
                        .await
                },
            )
            .await;

        self.merge(bot, results, ctx).await;
        Ok(())
    }

    /// Record a transition. A new entry also comes off the free balance so
    /// later bots in the same round size from what is left.
    async fn apply(&self, transition: Transition, ctx: &mut RoundContext) {
        if transition.placed_order() {
            ctx.balances_stale = true;
        }
        if let Transition::EntryPlaced { order, .. } = &transition {
            if let Some(filters) = ctx.filters.get(&order.symbol) {
                let committed = order.price * order.original_quantity;
                ctx.balances.reserve(&filters.quote_asset, committed);
            }
        }
        let failed = persist(self.store.as_ref(), writes_for(transition)).await;
        ctx.pending_writes.extend(failed);
    }

    /// Single-threaded merge after the fan-out barrier. A network failure or
    /// a timeout leaves the outcome of any order sent unknown, so its
    /// placement stays pending; every other result settles it.
    async fn merge(
        &self,
        bot: &Bot,
        results: Vec<Dispatched<Option<Transition>, EvaluationError>>,
        ctx: &mut RoundContext,
    ) {
        for dispatched in results {
            let settled = match &dispatched.result {
                Ok(_) => true,
                Err(DispatchError::Failed(e)) => !e.is_network(),
                Err(DispatchError::TimedOut(_)) => false,
            };
            if settled {
                ctx.forget_placement(&bot.id, &dispatched.symbol);
            }

            match dispatched.result {
                Ok(Some(transition)) => self.apply(transition, ctx).await,
                Ok(None) => {}
                Err(DispatchError::Failed(e)) if e.is_network() => {
                    tracing::warn!(
                        bot = %bot.name,
                        symbol = %dispatched.symbol,
                        "🌐 Network error, keeping previous state: {}",
                        e
                    );
                }
                Err(DispatchError::Failed(EvaluationError::Exchange(ExchangeError::Api { code, msg }))) => {
                    tracing::error!(
                        bot = %bot.name,
                        symbol = %dispatched.symbol,
                        "❌ Exchange error {}: {}",
                        code,
                        msg
                    );
                }
                Err(DispatchError::Failed(e)) => {
                    tracing::error!(bot = %bot.name, symbol = %dispatched.symbol, "❌ {}", e);
                }
                Err(DispatchError::TimedOut(_)) => {}
            }
        }
    }
}
