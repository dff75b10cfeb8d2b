use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{postgres::PgPoolOptions, postgres::PgRow, PgPool, Row};

use crate::error::StoreError;
use crate::models::{Bot, KlineInterval, Order, Pair};
use crate::persistence::RecordStore;

const ORDER_COLUMNS: &str = "id, bot_id, symbol, side, time, price, take_profit_price, \
     original_quantity, executed_quantity, status, is_entry_order, is_closed, \
     closing_order_id, opening_order_id";

/// Postgres-backed record store
pub struct PostgresRecordStore {
    pool: PgPool,
}

impl PostgresRecordStore {
    /// Connect and run pending migrations
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        tracing::info!("Connected to Postgres");

        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn upsert_bot(&self, bot: &Bot) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO bots (
                id, name, strategy, interval, trade_allocation, profit_target,
                simulation, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                strategy = EXCLUDED.strategy,
                interval = EXCLUDED.interval,
                trade_allocation = EXCLUDED.trade_allocation,
                profit_target = EXCLUDED.profit_target,
                simulation = EXCLUDED.simulation,
                updated_at = NOW()
            "#,
        )
        .bind(&bot.id)
        .bind(&bot.name)
        .bind(&bot.strategy)
        .bind(bot.interval.as_str())
        .bind(bot.trade_allocation)
        .bind(bot.profit_target)
        .bind(bot.simulation)
        .bind(bot.created_at)
        .execute(&self.pool)
        .await?;

        tracing::debug!(bot = %bot.id, "Saved bot to Postgres");
        Ok(())
    }

    async fn upsert_pair(&self, pair: &Pair) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO pairs (id, bot_id, symbol, is_active, current_order_id, profit_loss)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (id) DO UPDATE SET
                is_active = EXCLUDED.is_active,
                current_order_id = EXCLUDED.current_order_id,
                profit_loss = EXCLUDED.profit_loss,
                updated_at = NOW()
            "#,
        )
        .bind(&pair.id)
        .bind(&pair.bot_id)
        .bind(&pair.symbol)
        .bind(pair.is_active)
        .bind(&pair.current_order_id)
        .bind(pair.profit_loss)
        .execute(&self.pool)
        .await?;

        tracing::debug!(symbol = %pair.symbol, "Saved pair to Postgres");
        Ok(())
    }

    async fn upsert_order(&self, order: &Order) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO orders (
                id, bot_id, symbol, side, time, price, take_profit_price,
                original_quantity, executed_quantity, status, is_entry_order,
                is_closed, closing_order_id, opening_order_id
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            ON CONFLICT (id) DO UPDATE SET
                executed_quantity = EXCLUDED.executed_quantity,
                status = EXCLUDED.status,
                is_closed = EXCLUDED.is_closed,
                closing_order_id = EXCLUDED.closing_order_id,
                updated_at = NOW()
            "#,
        )
        .bind(&order.id)
        .bind(&order.bot_id)
        .bind(&order.symbol)
        .bind(order.side.as_str())
        .bind(order.time)
        .bind(order.price)
        .bind(order.take_profit_price)
        .bind(order.original_quantity)
        .bind(order.executed_quantity)
        .bind(order.status.as_str())
        .bind(order.is_entry_order)
        .bind(order.is_closed)
        .bind(&order.closing_order_id)
        .bind(&order.opening_order_id)
        .execute(&self.pool)
        .await?;

        tracing::debug!(
            symbol = %order.symbol,
            client_order_id = %order.id,
            "Saved order to Postgres"
        );
        Ok(())
    }

    async fn query_pairs(&self, bot_id: &str, only_active: bool) -> Result<Vec<Pair>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, bot_id, symbol, is_active, current_order_id, profit_loss
            FROM pairs
            WHERE bot_id = $1 AND ($2 = FALSE OR is_active)
            ORDER BY symbol ASC
            "#,
        )
        .bind(bot_id)
        .bind(only_active)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(pair_from_row).collect()
    }
}

fn bot_from_row(row: &PgRow) -> Result<Bot, StoreError> {
    let interval: String = row.try_get("interval")?;
    let interval: KlineInterval = interval
        .parse()
        .map_err(|e| StoreError::Corrupt(format!("bot interval: {}", e)))?;

    Ok(Bot {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        strategy: row.try_get("strategy")?,
        interval,
        trade_allocation: row.try_get::<Decimal, _>("trade_allocation")?,
        profit_target: row.try_get::<Decimal, _>("profit_target")?,
        simulation: row.try_get("simulation")?,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
    })
}

fn pair_from_row(row: &PgRow) -> Result<Pair, StoreError> {
    Ok(Pair {
        id: row.try_get("id")?,
        bot_id: row.try_get("bot_id")?,
        symbol: row.try_get("symbol")?,
        is_active: row.try_get("is_active")?,
        current_order_id: row.try_get("current_order_id")?,
        profit_loss: row.try_get::<Decimal, _>("profit_loss")?,
    })
}

fn order_from_row(row: &PgRow) -> Result<Order, StoreError> {
    let side: String = row.try_get("side")?;
    let status: String = row.try_get("status")?;

    Ok(Order {
        id: row.try_get("id")?,
        bot_id: row.try_get("bot_id")?,
        symbol: row.try_get("symbol")?,
        side: side.parse().map_err(StoreError::Corrupt)?,
        time: row.try_get::<DateTime<Utc>, _>("time")?,
        price: row.try_get::<Decimal, _>("price")?,
        take_profit_price: row.try_get::<Decimal, _>("take_profit_price")?,
        original_quantity: row.try_get::<Decimal, _>("original_quantity")?,
        executed_quantity: row.try_get::<Decimal, _>("executed_quantity")?,
        status: status.parse().map_err(StoreError::Corrupt)?,
        is_entry_order: row.try_get("is_entry_order")?,
        is_closed: row.try_get("is_closed")?,
        closing_order_id: row.try_get("closing_order_id")?,
        opening_order_id: row.try_get("opening_order_id")?,
    })
}

#[async_trait]
impl RecordStore for PostgresRecordStore {
    async fn create_bot(&self, bot: &Bot) -> Result<(), StoreError> {
        self.upsert_bot(bot).await
    }

    async fn update_bot(&self, bot: &Bot) -> Result<(), StoreError> {
        self.upsert_bot(bot).await
    }

    async fn create_pair(&self, pair: &Pair) -> Result<(), StoreError> {
        self.upsert_pair(pair).await
    }

    async fn update_pair(&self, pair: &Pair) -> Result<(), StoreError> {
        self.upsert_pair(pair).await
    }

    async fn create_order(&self, order: &Order) -> Result<(), StoreError> {
        self.upsert_order(order).await
    }

    async fn update_order(&self, order: &Order) -> Result<(), StoreError> {
        self.upsert_order(order).await
    }

    async fn get_order(&self, id: &str) -> Result<Option<Order>, StoreError> {
        let sql = format!("SELECT {} FROM orders WHERE id = $1", ORDER_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(order_from_row).transpose()
    }

    async fn all_bots(&self) -> Result<Vec<Bot>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, name, strategy, interval, trade_allocation, profit_target,
                   simulation, created_at
            FROM bots
            ORDER BY created_at ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(bot_from_row).collect()
    }

    async fn pairs_of_bot(&self, bot_id: &str) -> Result<Vec<Pair>, StoreError> {
        self.query_pairs(bot_id, false).await
    }

    async fn active_pairs_of_bot(&self, bot_id: &str) -> Result<Vec<Pair>, StoreError> {
        self.query_pairs(bot_id, true).await
    }

    async fn open_orders_of_bot(&self, bot_id: &str) -> Result<Vec<Order>, StoreError> {
        let sql = format!(
            "SELECT {} FROM orders WHERE bot_id = $1 AND NOT is_closed ORDER BY time ASC",
            ORDER_COLUMNS
        );
        let rows = sqlx::query(&sql).bind(bot_id).fetch_all(&self.pool).await?;

        rows.iter().map(order_from_row).collect()
    }
}
