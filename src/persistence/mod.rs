use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::error::StoreError;
use crate::models::{Bot, Order, Pair};

/// Durable bot/pair/order records.
///
/// Every call touches a single entity; there are no multi-entity
/// transactions. Writes are upserts keyed by id, so replaying a write that
/// may or may not have landed is safe.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn create_bot(&self, bot: &Bot) -> Result<(), StoreError>;
    async fn update_bot(&self, bot: &Bot) -> Result<(), StoreError>;

    async fn create_pair(&self, pair: &Pair) -> Result<(), StoreError>;
    async fn update_pair(&self, pair: &Pair) -> Result<(), StoreError>;

    async fn create_order(&self, order: &Order) -> Result<(), StoreError>;
    async fn update_order(&self, order: &Order) -> Result<(), StoreError>;
    async fn get_order(&self, id: &str) -> Result<Option<Order>, StoreError>;

    async fn all_bots(&self) -> Result<Vec<Bot>, StoreError>;
    async fn pairs_of_bot(&self, bot_id: &str) -> Result<Vec<Pair>, StoreError>;
    async fn active_pairs_of_bot(&self, bot_id: &str) -> Result<Vec<Pair>, StoreError>;
    /// Orders of the bot that are not closed, oldest first
    async fn open_orders_of_bot(&self, bot_id: &str) -> Result<Vec<Order>, StoreError>;
}

#[derive(Default)]
struct Tables {
    bots: HashMap<String, Bot>,
    pairs: HashMap<String, Pair>,
    orders: HashMap<String, Order>,
}

/// Process-local store, used by tests and dry runs without a database
#[derive(Default)]
pub struct InMemoryRecordStore {
    tables: RwLock<Tables>,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn order_count(&self) -> usize {
        self.tables.read().await.orders.len()
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn create_bot(&self, bot: &Bot) -> Result<(), StoreError> {
        self.tables
            .write()
            .await
            .bots
            .insert(bot.id.clone(), bot.clone());
        Ok(())
    }

    async fn update_bot(&self, bot: &Bot) -> Result<(), StoreError> {
        self.create_bot(bot).await
    }

    async fn create_pair(&self, pair: &Pair) -> Result<(), StoreError> {
        self.tables
            .write()
            .await
            .pairs
            .insert(pair.id.clone(), pair.clone());
        Ok(())
    }

    async fn update_pair(&self, pair: &Pair) -> Result<(), StoreError> {
        self.create_pair(pair).await
    }

    async fn create_order(&self, order: &Order) -> Result<(), StoreError> {
        self.tables
            .write()
            .await
            .orders
            .insert(order.id.clone(), order.clone());
        Ok(())
    }

    async fn update_order(&self, order: &Order) -> Result<(), StoreError> {
        self.create_order(order).await
    }

    async fn get_order(&self, id: &str) -> Result<Option<Order>, StoreError> {
        Ok(self.tables.read().await.orders.get(id).cloned())
    }

    async fn all_bots(&self) -> Result<Vec<Bot>, StoreError> {
        let mut bots: Vec<Bot> = self.tables.read().await.bots.values().cloned().collect();
        bots.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(bots)
    }

    async fn pairs_of_bot(&self, bot_id: &str) -> Result<Vec<Pair>, StoreError> {
        let mut pairs: Vec<Pair> = self
            .tables
            .read()
            .await
            .pairs
            .values()
            .filter(|p| p.bot_id == bot_id)
            .cloned()
            .collect();
        pairs.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        Ok(pairs)
    }

    async fn active_pairs_of_bot(&self, bot_id: &str) -> Result<Vec<Pair>, StoreError> {
        let mut pairs = self.pairs_of_bot(bot_id).await?;
        pairs.retain(|p| p.is_active);
        Ok(pairs)
    }

    async fn open_orders_of_bot(&self, bot_id: &str) -> Result<Vec<Order>, StoreError> {
        let mut orders: Vec<Order> = self
            .tables
            .read()
            .await
            .orders
            .values()
            .filter(|o| o.bot_id == bot_id && !o.is_closed)
            .cloned()
            .collect();
        orders.sort_by(|a, b| a.time.cmp(&b.time));
        Ok(orders)
    }
}
