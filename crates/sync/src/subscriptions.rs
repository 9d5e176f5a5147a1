//! Lifetime management for chain log subscriptions.
//!
//! Each subscription polls `eth_getLogs` over a block cursor and hands every
//! non-empty batch of matching logs to its callback. Subscriptions are keyed
//! by `(contract address, event name)`; subscribing again under a live key
//! replaces the old subscription instead of stacking a second listener.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use alloy::primitives::Address;
use alloy::rpc::types::{Filter, Log};
use deployer_chain::{ChainClient, ContractBinding, TokenEvent, decode_factory_log};
use deployer_core::AppError;
use tokio::task::JoinHandle;

/// Identity of a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionKey {
    pub address: Address,
    pub event: &'static str,
}

/// What to listen for.
#[derive(Debug, Clone)]
pub struct Subscription {
    pub key: SubscriptionKey,
    pub owner_filter: Option<Address>,
    filter: Filter,
}

impl Subscription {
    /// The factory's `TokenDeployed`, restricted to `owner` when given.
    pub fn token_deployed(binding: &ContractBinding, owner: Option<Address>) -> Self {
        Self {
            key: SubscriptionKey {
                address: binding.factory_address(),
                event: "TokenDeployed",
            },
            owner_filter: owner,
            filter: binding.token_deployed_filter(owner),
        }
    }

    /// A token's `Minted` or `Burned`.
    pub fn token_event(binding: &ContractBinding, token: Address, event: TokenEvent) -> Self {
        Self {
            key: SubscriptionKey {
                address: token,
                event: event.name(),
            },
            owner_filter: None,
            filter: binding.token_event_filter(token, event),
        }
    }

    fn accepts(&self, log: &Log) -> bool {
        if log.removed {
            return false;
        }
        match self.owner_filter {
            None => true,
            Some(owner) => decode_factory_log(log).is_some_and(|e| e.owner == owner),
        }
    }
}

/// Extra client-side filter applied after the node-side one.
pub type LogPredicate = Box<dyn Fn(&Log) -> bool + Send + Sync>;

/// Receives each non-empty batch of matching logs, in chain order.
pub type BatchCallback = Box<dyn FnMut(Vec<Log>) + Send>;

type Slots = Mutex<HashMap<SubscriptionKey, Slot>>;

struct Slot {
    id: u64,
    gate: Arc<Mutex<bool>>,
    task: JoinHandle<()>,
}

impl Slot {
    fn close(self) {
        *lock(&self.gate) = false;
        self.task.abort();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Owns every live log subscription.
pub struct SubscriptionManager {
    poll_interval: Duration,
    slots: Arc<Slots>,
    next_id: AtomicU64,
}

impl SubscriptionManager {
    pub fn new(poll_interval: Duration) -> Self {
        Self {
            poll_interval,
            slots: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(1),
        }
    }

    /// Start delivering logs that match `subscription` (and `predicate`) to `on_batch`.
    ///
    /// Only logs from blocks after the current head are delivered. An existing
    /// subscription under the same key is disposed first. `on_batch` runs while
    /// the subscription's gate is held, so it must not dispose its own handle.
    pub async fn subscribe(
        &self,
        client: Arc<dyn ChainClient>,
        subscription: Subscription,
        predicate: Option<LogPredicate>,
        on_batch: impl FnMut(Vec<Log>) + Send + 'static,
    ) -> Result<SubscriptionHandle, AppError> {
        let key = subscription.key;
        if let Some(old) = lock(&self.slots).remove(&key) {
            tracing::debug!(address = %key.address, event = key.event, "Replacing subscription");
            old.close();
        }

        let head = client.block_number().await?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let gate = Arc::new(Mutex::new(true));

        let task = tokio::spawn(poll_logs(
            client,
            subscription,
            predicate,
            Box::new(on_batch),
            gate.clone(),
            head + 1,
            self.poll_interval,
        ));

        // A concurrent subscribe under the same key may have landed while we
        // awaited the head; the later one wins.
        if let Some(raced) = lock(&self.slots).insert(
            key,
            Slot {
                id,
                gate: gate.clone(),
                task,
            },
        ) {
            raced.close();
        }

        tracing::debug!(address = %key.address, event = key.event, from_block = head + 1, "Subscribed");
        Ok(SubscriptionHandle {
            key,
            id,
            gate,
            slots: Arc::downgrade(&self.slots),
        })
    }

    /// Dispose every live subscription (e.g. on network switch).
    pub fn dispose_all(&self) {
        let slots: Vec<Slot> = lock(&self.slots).drain().map(|(_, slot)| slot).collect();
        if !slots.is_empty() {
            tracing::debug!(count = slots.len(), "Disposing all subscriptions");
        }
        for slot in slots {
            slot.close();
        }
    }

    pub fn is_active(&self, key: &SubscriptionKey) -> bool {
        lock(&self.slots).contains_key(key)
    }

    pub fn active_keys(&self) -> Vec<SubscriptionKey> {
        lock(&self.slots).keys().copied().collect()
    }
}

impl Drop for SubscriptionManager {
    fn drop(&mut self) {
        self.dispose_all();
    }
}

/// Handle to one live subscription. Disposes it when dropped.
pub struct SubscriptionHandle {
    key: SubscriptionKey,
    id: u64,
    gate: Arc<Mutex<bool>>,
    slots: Weak<Slots>,
}

impl SubscriptionHandle {
    pub fn key(&self) -> SubscriptionKey {
        self.key
    }

    /// Whether this handle still receives batches (false once replaced or disposed).
    pub fn is_active(&self) -> bool {
        *lock(&self.gate)
    }

    /// Stop delivery. No callback runs after this returns.
    pub fn dispose(self) {
        drop(self);
    }

    fn teardown(&mut self) {
        *lock(&self.gate) = false;
        let Some(slots) = self.slots.upgrade() else {
            return;
        };
        let mut slots = lock(&slots);
        if slots.get(&self.key).is_some_and(|slot| slot.id == self.id) {
            if let Some(slot) = slots.remove(&self.key) {
                slot.task.abort();
            }
        }
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.teardown();
    }
}

async fn poll_logs(
    client: Arc<dyn ChainClient>,
    subscription: Subscription,
    predicate: Option<LogPredicate>,
    mut on_batch: BatchCallback,
    gate: Arc<Mutex<bool>>,
    mut next_block: u64,
    poll_interval: Duration,
) {
    let key = subscription.key;
    loop {
        tokio::time::sleep(poll_interval).await;

        let head = match client.block_number().await {
            Ok(head) => head,
            Err(e) => {
                tracing::warn!(address = %key.address, event = key.event, error = %e, "Failed to poll head");
                continue;
            }
        };
        if head < next_block {
            continue;
        }

        let filter = subscription
            .filter
            .clone()
            .from_block(next_block)
            .to_block(head);
        let logs = match client.logs(&filter).await {
            Ok(logs) => logs,
            Err(e) => {
                // Cursor is not advanced, so the same range is asked for again next tick.
                tracing::warn!(address = %key.address, event = key.event, error = %e, "Failed to fetch logs");
                continue;
            }
        };
        next_block = head + 1;

        let mut batch: Vec<Log> = logs
            .into_iter()
            .filter(|log| subscription.accepts(log))
            .filter(|log| predicate.as_ref().is_none_or(|p| p(log)))
            .collect();
        if batch.is_empty() {
            continue;
        }
        batch.sort_by_key(|log| (log.block_number, log.log_index));

        let open = lock(&gate);
        if !*open {
            return;
        }
        tracing::trace!(address = %key.address, event = key.event, count = batch.len(), "Delivering batch");
        on_batch(batch);
    }
}
