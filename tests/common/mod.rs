//! Shared bank-account domain for the integration tests.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use skald::registry::{Aggregate, AggregateRegistry, Event};
use skald::store::MemoryEventStore;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub balance: i64,
}

impl Aggregate for Account {
    const KIND: &'static str = "account";

    fn empty(id: &str) -> Self {
        Self {
            id: id.to_string(),
            balance: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deposited {
    pub amount: i64,
}

impl Event<Account> for Deposited {
    const NAME: &'static str = "ACCOUNT_DEPOSITED";

    fn apply_to(&self, state: &mut Account) {
        state.balance += self.amount;
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Withdrawn {
    pub amount: i64,
}

impl Event<Account> for Withdrawn {
    const NAME: &'static str = "ACCOUNT_WITHDRAWN";

    fn apply_to(&self, state: &mut Account) {
        state.balance -= self.amount;
    }
}

#[derive(Debug, thiserror::Error)]
#[error("insufficient funds: balance {balance}, requested {requested}")]
pub struct InsufficientFunds {
    pub balance: i64,
    pub requested: i64,
}

pub fn account_registry() -> Arc<AggregateRegistry> {
    let mut registry = AggregateRegistry::new();
    registry
        .register::<Account, _>(|reg| {
            reg.event::<Deposited>()?.event::<Withdrawn>()?;
            Ok(())
        })
        .unwrap();
    Arc::new(registry)
}

pub fn memory_store() -> Arc<MemoryEventStore> {
    Arc::new(MemoryEventStore::new())
}
