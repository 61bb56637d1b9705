// ledger.rs — signed delta ledger (spec.md §4.2). Tracks, per instrument,
// the gap between what the Master's position implies ("Target") and what
// the Follower has actually executed ("Actual"); the accumulated delta is
// what the Position Calculator and Exposure Rebalancer consume.
use crate::error::StoreError;
use crate::store::Store;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
pub struct DeltaEntry {
    pub target: Decimal,
    pub actual: Decimal,
}

impl DeltaEntry {
    pub fn outstanding(&self) -> Decimal {
        self.target - self.actual
    }
}

#[derive(Clone)]
pub struct Ledger {
    store: Store,
}

fn key(instrument: &str) -> String {
    format!("delta:{instrument}")
}

impl Ledger {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    async fn read(&self, instrument: &str) -> Result<DeltaEntry, StoreError> {
        Ok(self.store.get_json(&key(instrument)).await?.unwrap_or_default())
    }

    async fn write(&self, instrument: &str, entry: DeltaEntry) -> Result<(), StoreError> {
        self.store.set_json(&key(instrument), &entry, Store::delta_ttl()).await
    }

    pub async fn get(&self, instrument: &str) -> Result<DeltaEntry, StoreError> {
        self.read(instrument).await
    }

    /// Adds `delta` to the target side — the Master moved its position by
    /// this signed amount and we intend to mirror it.
    pub async fn add_target(&self, instrument: &str, delta: Decimal) -> Result<DeltaEntry, StoreError> {
        let mut entry = self.read(instrument).await?;
        entry.target += delta;
        self.write(instrument, entry).await?;
        Ok(entry)
    }

    /// Records `delta` as actually executed on the Follower, narrowing the
    /// outstanding gap.
    pub async fn record_actual(&self, instrument: &str, delta: Decimal) -> Result<DeltaEntry, StoreError> {
        let mut entry = self.read(instrument).await?;
        entry.actual += delta;
        self.write(instrument, entry).await?;
        Ok(entry)
    }

    /// Consumes up to `amount` of the outstanding delta by folding it into
    /// `actual`, used when a placed order is considered as good as filled
    /// for ledger purposes (e.g. immediately after placement).
    pub async fn consume(&self, instrument: &str, amount: Decimal) -> Result<DeltaEntry, StoreError> {
        self.record_actual(instrument, amount).await
    }

    pub async fn init(&self, instrument: &str) -> Result<(), StoreError> {
        if self.store.get_json::<DeltaEntry>(&key(instrument)).await?.is_none() {
            self.write(instrument, DeltaEntry::default()).await?;
        }
        Ok(())
    }

    pub fn lock_key(instrument: &str) -> String {
        format!("lock:delta:{instrument}")
    }

    pub fn lock_ttl() -> Duration {
        Store::lock_ttl()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn outstanding_is_target_minus_actual() {
        let entry = DeltaEntry { target: dec!(1.5), actual: dec!(1.0) };
        assert_eq!(entry.outstanding(), dec!(0.5));
    }

    #[test]
    fn outstanding_can_be_negative() {
        let entry = DeltaEntry { target: dec!(-0.5), actual: dec!(0.2) };
        assert_eq!(entry.outstanding(), dec!(-0.7));
    }
}
