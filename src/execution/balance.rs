use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;

use crate::exchange::{AccountInfo, ExchangeGateway};
use crate::execution::retry::{Clock, RetryPolicy};

/// Free balance per asset, as of the last successful account fetch
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Balances {
    free: HashMap<String, Decimal>,
}

impl Balances {
    pub fn from_account(account: &AccountInfo) -> Self {
        Self {
            free: account.free_by_asset(),
        }
    }

    pub fn free(&self, asset: &str) -> Decimal {
        self.free.get(asset).copied().unwrap_or(Decimal::ZERO)
    }

    /// Quote amount one entry may spend: `trade_allocation` of the free balance
    pub fn allocation_amount(&self, quote_asset: &str, trade_allocation: Decimal) -> Decimal {
        self.free(quote_asset) * trade_allocation
    }

    /// An entry is allowed when the free quote balance covers the amount and
    /// the amount meets the symbol's minimum notional (when the exchange
    /// publishes one). A full allocation (`1`) spends the whole balance.
    pub fn can_enter(
        &self,
        quote_asset: &str,
        amount: Decimal,
        min_notional: Option<Decimal>,
    ) -> bool {
        if amount <= Decimal::ZERO || self.free(quote_asset) < amount {
            return false;
        }
        min_notional.map_or(true, |min| amount >= min)
    }

    /// Take `amount` out of the free balance so later entries are sized from
    /// what is left. Never goes below zero.
    pub fn reserve(&mut self, asset: &str, amount: Decimal) {
        if amount <= Decimal::ZERO {
            return;
        }
        let free = self.free.entry(asset.to_string()).or_insert(Decimal::ZERO);
        *free = (*free - amount).max(Decimal::ZERO);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum BalanceFetch {
    Available(Balances),
    /// Every attempt failed; the run loop halts on this
    Exhausted { attempts: u32 },
}

pub struct BalanceMonitor {
    gateway: Arc<dyn ExchangeGateway>,
    policy: RetryPolicy,
    clock: Arc<dyn Clock>,
}

impl BalanceMonitor {
    pub fn new(gateway: Arc<dyn ExchangeGateway>, policy: RetryPolicy, clock: Arc<dyn Clock>) -> Self {
        Self {
            gateway,
            policy,
            clock,
        }
    }

    /// Fetch account balances, retrying network and exchange failures alike
    /// on a fixed delay.
    pub async fn fetch(&self) -> BalanceFetch {
        let gateway = &self.gateway;
        let result = self
            .policy
            .run(self.clock.as_ref(), "Balance fetch", |_| async move {
                gateway.account().await
            })
            .await;

        match result {
            Ok(account) => {
                let balances = Balances::from_account(&account);
                tracing::info!("💰 Balances refreshed ({} assets)", balances.free.len());
                BalanceFetch::Available(balances)
            }
            Err(exhausted) => {
                tracing::error!(
                    "❌ Balance fetch failed {} times, last error: {}",
                    exhausted.attempts,
                    exhausted.last_error
                );
                BalanceFetch::Exhausted {
                    attempts: exhausted.attempts,
                }
            }
        }
    }
}
