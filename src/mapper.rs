// mapper.rs — bidirectional Master-oid ↔ Follower-orderId binding
// (spec.md §4.1). The Mapper is the only component permitted to create or
// destroy mapping records; invariant I1 (identity) depends on every write
// and delete touching both directions atomically.
use crate::error::StoreError;
use crate::store::Store;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MappingRecord {
    pub follower_order_id: String,
    pub instrument: String,
    /// Signed Master-unit size (`s`) this mapping's Open event contributed
    /// to the delta ledger's target side, so a later cancel/retirement can
    /// reverse exactly it (I3: target is always in Master units).
    pub signed_size: rust_decimal::Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct InverseRecord {
    master_oid: u64,
    instrument: String,
}

#[derive(Clone)]
pub struct Mapper {
    store: Store,
}

fn m2f_key(master_oid: u64) -> String {
    format!("map:m2f:{master_oid}")
}

fn f2m_key(follower_order_id: &str) -> String {
    format!("map:f2m:{follower_order_id}")
}

fn ts_key(master_oid: u64) -> String {
    format!("ts:order:{master_oid}")
}

const ACTIVE_OIDS_KEY: &str = "map:active_oids";

impl Mapper {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Writes both directions and the creation timestamp atomically
    /// (as a single TTL-refreshing group). Invariant I1.
    pub async fn save(
        &self,
        master_oid: u64,
        follower_order_id: &str,
        instrument: &str,
        signed_size: rust_decimal::Decimal,
        now_ms: u64,
    ) -> Result<(), StoreError> {
        let ttl = Store::mapping_ttl();
        self.store
            .set_json(
                &m2f_key(master_oid),
                &MappingRecord {
                    follower_order_id: follower_order_id.to_string(),
                    instrument: instrument.to_string(),
                    signed_size,
                },
                ttl,
            )
            .await?;
        self.store
            .set_json(
                &f2m_key(follower_order_id),
                &InverseRecord { master_oid, instrument: instrument.to_string() },
                ttl,
            )
            .await?;
        self.store.set_string(&ts_key(master_oid), &now_ms.to_string(), ttl).await?;
        self.store.set_add(ACTIVE_OIDS_KEY, &master_oid.to_string()).await?;
        Ok(())
    }

    /// Lists oids with a live mapping, for the periodic validator's
    /// staleness sweep.
    pub async fn active_oids(&self) -> Result<Vec<u64>, StoreError> {
        Ok(self
            .store
            .set_members(ACTIVE_OIDS_KEY)
            .await?
            .into_iter()
            .filter_map(|s| s.parse().ok())
            .collect())
    }

    pub async fn lookup_follower(
        &self,
        master_oid: u64,
    ) -> Result<Option<MappingRecord>, StoreError> {
        self.store.get_json(&m2f_key(master_oid)).await
    }

    pub async fn lookup_master(&self, follower_order_id: &str) -> Result<Option<u64>, StoreError> {
        let inverse: Option<InverseRecord> = self.store.get_json(&f2m_key(follower_order_id)).await?;
        Ok(inverse.map(|r| r.master_oid))
    }

    /// Removes both directions and the timestamp atomically.
    pub async fn delete(&self, master_oid: u64) -> Result<(), StoreError> {
        // Read the forward record first so we can also drop its inverse;
        // if it is already gone there is nothing to clean up either side.
        let forward = self.lookup_follower(master_oid).await?;
        let mut keys = vec![m2f_key(master_oid), ts_key(master_oid)];
        if let Some(record) = forward {
            keys.push(f2m_key(&record.follower_order_id));
        }
        let refs: Vec<&str> = keys.iter().map(|s| s.as_str()).collect();
        self.store.del_many(&refs).await?;
        self.store.set_remove(ACTIVE_OIDS_KEY, &master_oid.to_string()).await
    }

    pub async fn timestamp_of(&self, master_oid: u64) -> Result<Option<u64>, StoreError> {
        let raw = self.store.get_string(&ts_key(master_oid)).await?;
        Ok(raw.and_then(|s| s.parse().ok()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn mapper() -> Mapper {
        Mapper::new(Store::new("redis://127.0.0.1:6379").unwrap())
    }

    // Requires a local Redis at redis://127.0.0.1:6379.
    #[tokio::test]
    #[ignore]
    async fn save_creates_a_bidirectional_binding_and_delete_removes_both_sides() {
        let mapper = mapper();
        mapper.save(555, "f-555", "BTC", dec!(0.02), 1_700_000_000_000).await.unwrap();

        let forward = mapper.lookup_follower(555).await.unwrap().expect("forward mapping present");
        assert_eq!(forward.follower_order_id, "f-555");
        assert_eq!(mapper.lookup_master("f-555").await.unwrap(), Some(555));
        assert!(mapper.active_oids().await.unwrap().contains(&555));

        mapper.delete(555).await.unwrap();
        assert!(mapper.lookup_follower(555).await.unwrap().is_none());
        assert!(mapper.lookup_master("f-555").await.unwrap().is_none());
        assert!(!mapper.active_oids().await.unwrap().contains(&555));
    }
}
