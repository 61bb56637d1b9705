// reconcile.rs — startup reconciliation and orphan-fill recovery
// (spec.md §4.6). Run once at startup (and after any Master feed
// reconnect that risks a missed event) to rebuild mappings and the delta
// ledger from venue snapshots rather than trusting in-memory state that
// may have been lost across a restart.
use crate::calculator::Calculator;
use crate::config::TradingMode;
use crate::events::{ExecutionOutcome, MasterOrderEvent, Side};
use crate::executor::Executor;
use crate::follower::{FollowerClient, PlacedOrder};
use crate::instrument::{Instrument, InstrumentRegistry};
use crate::journal::Journal;
use crate::ledger::Ledger;
use crate::mapper::Mapper;
use crate::master::MasterIngest;
use log::{info, warn};
use rust_decimal::Decimal;
use std::collections::HashSet;
use std::sync::Arc;

pub struct Reconciler {
    mapper: Mapper,
    ledger: Ledger,
    journal: Journal,
    instruments: InstrumentRegistry,
    master: Arc<MasterIngest>,
    follower: Arc<dyn FollowerClient>,
    executor: Arc<Executor>,
    trading_mode: TradingMode,
    fixed_ratio: Decimal,
    equal_ratio: Decimal,
}

impl Reconciler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        mapper: Mapper,
        ledger: Ledger,
        journal: Journal,
        instruments: InstrumentRegistry,
        master: Arc<MasterIngest>,
        follower: Arc<dyn FollowerClient>,
        executor: Arc<Executor>,
        trading_mode: TradingMode,
        fixed_ratio: Decimal,
        equal_ratio: Decimal,
    ) -> Self {
        Self {
            mapper,
            ledger,
            journal,
            instruments,
            master,
            follower,
            executor,
            trading_mode,
            fixed_ratio,
            equal_ratio,
        }
    }

    /// Walks every followed Master account's open orders, rebuilding any
    /// mapping this process doesn't currently hold and correcting the
    /// ledger's target side to match observed reality. Recovery is
    /// price-side-match: a Follower order on the same instrument, side, and
    /// (snapped) price as an unmapped Master order is adopted as its mirror;
    /// anything left unmatched is placed fresh through the normal executor
    /// path. Once every followed account has been walked, any mapping whose
    /// oid is no longer among the Master's open orders is a zombie from a
    /// crash window and is canceled.
    pub async fn reconcile_startup(&self, followed_users: &[String]) -> anyhow::Result<()> {
        let mut live_oids = HashSet::new();
        for user in followed_users {
            let open_orders = self.master.fetch_open_orders(user).await?;
            for order in &open_orders {
                live_oids.insert(order.oid);
                if self.mapper.lookup_follower(order.oid).await?.is_some() {
                    continue;
                }
                self.recover_or_place(order).await?;
            }
        }
        self.cancel_zombies(&live_oids).await?;
        Ok(())
    }

    fn matches(instrument: &Instrument, order: &MasterOrderEvent, candidate: &PlacedOrder) -> bool {
        if candidate.side != order.side {
            return false;
        }
        let snapped = instrument.snap_price(order.price);
        (candidate.price - snapped).abs() <= Decimal::new(1, 4)
    }

    async fn recover_or_place(&self, order: &MasterOrderEvent) -> anyhow::Result<()> {
        let instrument = match self.instruments.get(&order.instrument) {
            Some(i) => i.clone(),
            None => return Ok(()),
        };

        let candidates = self.follower.open_orders(&order.instrument).await?;
        for candidate in candidates {
            if self.mapper.lookup_master(&candidate.follower_order_id).await?.is_some() {
                continue;
            }
            if !Self::matches(&instrument, order, &candidate) {
                continue;
            }

            let signed_size = order.side.signed(order.size);
            self.mapper
                .save(order.oid, &candidate.follower_order_id, &order.instrument, signed_size, order.timestamp_ms)
                .await?;
            self.ledger.add_target(&order.instrument, signed_size).await?;
            let executed_master_equiv = Calculator::master_equivalent(
                candidate.size,
                self.trading_mode,
                self.fixed_ratio,
                self.equal_ratio,
            );
            self.ledger
                .record_actual(&order.instrument, order.side.signed(executed_master_equiv))
                .await?;
            self.journal
                .record(&format!("recover:{}", order.oid), ExecutionOutcome::Recovered, order.timestamp_ms)
                .await?;
            info!("[RECONCILE] recovered oid={} -> follower {}", order.oid, candidate.follower_order_id);
            return Ok(());
        }

        warn!("[RECONCILE] no Follower match for oid={}, placing fresh", order.oid);
        self.executor.handle_order_event(order.clone()).await
    }

    /// Cancels every mapping whose oid didn't appear among the Master's
    /// currently-open orders across all followed accounts, reversing its
    /// contribution to the delta ledger the same way a live cancel would.
    async fn cancel_zombies(&self, live_oids: &HashSet<u64>) -> anyhow::Result<()> {
        for oid in self.mapper.active_oids().await? {
            if live_oids.contains(&oid) {
                continue;
            }
            let mapping = match self.mapper.lookup_follower(oid).await? {
                Some(m) => m,
                None => continue,
            };
            warn!("[RECONCILE] oid={oid} has no matching live Master order, canceling as zombie");
            self.executor.retire_mapping(oid, &mapping).await?;
        }
        Ok(())
    }

    /// Detects Follower fills that arrived for a mapping the Master side no
    /// longer recognizes (the Follower raced ahead of a Master cancel/close
    /// that this process hasn't observed yet). The outstanding ledger delta
    /// is simply adjusted to match; no compensating order is placed since
    /// the fill already happened.
    pub async fn handle_orphan_fill(
        &self,
        follower_order_id: &str,
        instrument: &str,
        side: Side,
        filled_size: Decimal,
    ) -> anyhow::Result<()> {
        if self.mapper.lookup_master(follower_order_id).await?.is_some() {
            return Ok(());
        }
        let event_id = format!("orphan:{follower_order_id}");
        if self.journal.is_processed(&event_id).await? {
            return Ok(());
        }
        self.ledger.record_actual(instrument, side.signed(filled_size)).await?;
        self.journal.record(&event_id, ExecutionOutcome::Recovered, 0).await?;
        warn!("[RECONCILE] orphan fill on {follower_order_id} ({instrument}) absorbed into ledger");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{FollowerOrderStatus, MasterOrderStatus};
    use crate::instrument::MinOrderSize;
    use rust_decimal_macros::dec;

    fn btc() -> Instrument {
        Instrument {
            symbol: "BTC".into(),
            min_order_size: MinOrderSize::Scalar(dec!(0.002)),
            qty_decimals: 3,
            tick_size: dec!(0.1),
            max_abs_position: dec!(1.0),
            aggressive_reduction_threshold: dec!(0.01),
        }
    }

    fn order() -> MasterOrderEvent {
        MasterOrderEvent {
            oid: 1,
            instrument: "BTC".into(),
            side: Side::Buy,
            price: dec!(30000.04),
            size: dec!(0.02),
            status: MasterOrderStatus::Open,
            reduce_only: false,
            timestamp_ms: 1,
            master_account: "0xabc".into(),
        }
    }

    fn candidate(side: Side, price: Decimal) -> PlacedOrder {
        PlacedOrder {
            follower_order_id: "1".into(),
            status: FollowerOrderStatus::New,
            side,
            price,
            size: dec!(0.002),
            reduce_only: false,
        }
    }

    #[test]
    fn matches_rejects_opposite_side() {
        assert!(!Reconciler::matches(&btc(), &order(), &candidate(Side::Sell, dec!(30000.0))));
    }

    #[test]
    fn matches_accepts_price_within_tolerance_of_snapped_price() {
        // order.price 30000.04 snaps to 30000.0
        assert!(Reconciler::matches(&btc(), &order(), &candidate(Side::Buy, dec!(30000.0))));
    }

    #[test]
    fn matches_rejects_price_outside_tolerance() {
        assert!(!Reconciler::matches(&btc(), &order(), &candidate(Side::Buy, dec!(30001.0))));
    }
}
