// validator.rs — periodic order validator (spec.md §4.8). Each sweep asks
// the Follower venue directly for every actively-mapped order's current
// status; a mapping whose order already reached a terminal state (or whose
// order the venue no longer recognizes) is retired immediately rather than
// waiting for the age-based staleness bound, which remains as a fallback
// for mappings the venue can't resolve (e.g. a transient lookup failure).
use crate::error::VenueError;
use crate::follower::FollowerClient;
use crate::ledger::Ledger;
use crate::mapper::{Mapper, MappingRecord};
use log::warn;
use std::sync::Arc;
use std::time::Duration;

pub struct Validator {
    mapper: Mapper,
    ledger: Ledger,
    follower: Arc<dyn FollowerClient>,
    stale_after: Duration,
}

impl Validator {
    pub fn new(mapper: Mapper, ledger: Ledger, follower: Arc<dyn FollowerClient>, stale_after: Duration) -> Self {
        Self { mapper, ledger, follower, stale_after }
    }

    pub async fn run(&self, mut shutdown: tokio::sync::watch::Receiver<bool>, period: Duration) {
        let mut ticker = tokio::time::interval(period);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep().await {
                        warn!("[VALIDATE] sweep failed: {e}");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }

    async fn sweep(&self) -> anyhow::Result<()> {
        let now_ms = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;

        for oid in self.mapper.active_oids().await? {
            self.check_oid(oid, now_ms).await?;
        }
        Ok(())
    }

    async fn check_oid(&self, oid: u64, now_ms: u64) -> anyhow::Result<bool> {
        let mapping = match self.mapper.lookup_follower(oid).await? {
            Some(m) => m,
            None => return Ok(false),
        };

        match self.follower.order_status(&mapping.instrument, &mapping.follower_order_id).await {
            Ok(status) if status.is_terminal() => {
                warn!("[VALIDATE] oid={oid} follower order already {status:?}, retiring");
                self.retire(oid, &mapping).await?;
                return Ok(true);
            }
            Ok(_) => {}
            Err(VenueError::UnknownOrder(_)) => {
                warn!("[VALIDATE] oid={oid} follower order no longer known to venue, retiring");
                self.retire(oid, &mapping).await?;
                return Ok(true);
            }
            Err(e) => {
                warn!("[VALIDATE] oid={oid} order status lookup failed: {e}, falling back to age check");
            }
        }

        let created_at = match self.mapper.timestamp_of(oid).await? {
            Some(ts) => ts,
            None => return Ok(false),
        };
        if now_ms.saturating_sub(created_at) > self.stale_after.as_millis() as u64 {
            warn!("[VALIDATE] oid={oid} mapping stale ({}ms old), retiring", now_ms - created_at);
            self.retire(oid, &mapping).await?;
            return Ok(true);
        }
        Ok(false)
    }

    async fn retire(&self, oid: u64, mapping: &MappingRecord) -> anyhow::Result<()> {
        self.ledger.add_target(&mapping.instrument, -mapping.signed_size).await?;
        self.mapper.delete(oid).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Store;
    use std::time::Duration;

    fn validator() -> Validator {
        let store = Store::new("redis://127.0.0.1:6379").unwrap();
        let follower: Arc<dyn FollowerClient> = Arc::new(crate::rebalancer::tests_support::NoopFollower);
        Validator::new(Mapper::new(store.clone()), Ledger::new(store), follower, Duration::from_secs(3600))
    }

    // Pure constructor/threshold sanity; the Redis-backed sweep path needs a
    // live store and is exercised only by the #[ignore]-gated executor tests.
    #[test]
    fn stale_after_is_carried_through_unchanged() {
        let v = validator();
        assert_eq!(v.stale_after, Duration::from_secs(3600));
    }

    #[test]
    fn now_minus_created_exceeds_bound_when_older_than_stale_after() {
        let now_ms: u64 = 10_000_000;
        let created_at: u64 = now_ms - Duration::from_secs(3601).as_millis() as u64;
        assert!(now_ms.saturating_sub(created_at) > Duration::from_secs(3600).as_millis() as u64);
    }
}
