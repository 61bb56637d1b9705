// executor.rs — Order Executor (spec.md §4.5). The central state machine:
// every Master order/fill event is journaled exactly once, sized through
// the Calculator, checked by the Risk Gate, and turned into a Follower
// action. This module owns no venue I/O of its own beyond the injected
// `FollowerClient` — everything venue-specific lives in follower.rs.
use crate::calculator::{AccountEquities, Calculator, SizingOutcome};
use crate::config::TradingMode;
use crate::events::{
    ExecutionOutcome, MasterFillEvent, MasterOrderEvent, MasterOrderStatus, Side,
};
use crate::follower::FollowerClient;
use crate::instrument::{ActionType, Instrument, InstrumentRegistry};
use crate::journal::Journal;
use crate::ledger::Ledger;
use crate::mapper::{Mapper, MappingRecord};
use crate::risk::RiskGate;
use log::{info, warn};
use rust_decimal::Decimal;
use std::sync::Arc;

pub struct ExecutorConfig {
    pub trading_mode: TradingMode,
    pub fixed_ratio: Decimal,
    pub equal_ratio: Decimal,
}

pub struct Executor {
    mapper: Mapper,
    ledger: Ledger,
    journal: Journal,
    risk: Arc<tokio::sync::RwLock<RiskGate>>,
    instruments: InstrumentRegistry,
    follower: Arc<dyn FollowerClient>,
    config: ExecutorConfig,
}

impl Executor {
    pub fn new(
        mapper: Mapper,
        ledger: Ledger,
        journal: Journal,
        risk: Arc<tokio::sync::RwLock<RiskGate>>,
        instruments: InstrumentRegistry,
        follower: Arc<dyn FollowerClient>,
        config: ExecutorConfig,
    ) -> Self {
        Self { mapper, ledger, journal, risk, instruments, follower, config }
    }

    fn event_id(event: &MasterOrderEvent) -> String {
        format!("order:{}:{:?}:{}", event.oid, event.status, event.timestamp_ms)
    }

    fn oid_lock_name(oid: u64) -> String {
        format!("oid:{oid}")
    }

    /// Dispatches a Master order-status transition to its handler.
    /// Deduplicated through the Processed-Order Journal by the full event
    /// id, and serialized per `masterOid` (not per event id) via a
    /// short-lived Redis lock, so that two distinct transitions racing for
    /// the same oid — e.g. an amended Open racing a Cancel — never act
    /// concurrently (spec.md §5, §8: "No concurrent placements share a
    /// masterOid lock").
    pub async fn handle_order_event(&self, event: MasterOrderEvent) -> anyhow::Result<()> {
        let event_id = Self::event_id(&event);
        if self.journal.is_processed(&event_id).await? {
            return Ok(());
        }
        let lock = match self.journal.acquire(&Self::oid_lock_name(event.oid)).await? {
            Some(lock) => lock,
            None => return Ok(()),
        };

        let outcome = match event.status {
            MasterOrderStatus::Open => self.handle_open(&event).await?,
            MasterOrderStatus::Canceled => self.handle_canceled(&event).await?,
            MasterOrderStatus::Filled => self.handle_filled(&event).await?,
            // Treated as a terminal close of the resting order rather than a
            // distinct follow-up Open: the trigger condition firing doesn't
            // by itself imply the Follower side should open a fresh order.
            MasterOrderStatus::Triggered => self.handle_canceled(&event).await?,
        };

        self.journal.record(&event_id, outcome, event.timestamp_ms).await?;
        self.journal.release(lock).await?;
        Ok(())
    }

    async fn handle_open(&self, event: &MasterOrderEvent) -> anyhow::Result<ExecutionOutcome> {
        let instrument = match self.instruments.get(&event.instrument).cloned() {
            Some(i) => i,
            None => return Ok(ExecutionOutcome::SkippedRisk),
        };

        if self.risk.read().await.emergency_stop_active() {
            warn!("[EXEC] oid={} skipped: emergency stop active", event.oid);
            return Ok(ExecutionOutcome::SkippedRisk);
        }

        // An Open event for an oid we already mirror is a price/size
        // amendment delivered as a fresh Open rather than a distinct order
        // (the Master feed has no separate "amend" transition). Retire the
        // existing Follower order and its mapping first so the two never
        // coexist — otherwise two follower ids would resolve back to the
        // same oid, violating I1.
        if let Some(existing) = self.mapper.lookup_follower(event.oid).await? {
            self.retire_mapping(event.oid, &existing).await?;
        }

        let s = event.side.signed(event.size);
        self.ledger.add_target(&event.instrument, s).await?;
        let entry = self.ledger.get(&event.instrument).await?;
        let outstanding = entry.outstanding();

        let outstanding_side = match Side::from_signed(outstanding) {
            Some(side) => side,
            None => return Ok(ExecutionOutcome::SkippedBelowMin),
        };

        let current_position = self.follower.position(&event.instrument).await?;
        // Closing whenever the Follower's resting position already sits on
        // the side we're about to move further against (spec.md §4.5 step
        // 4: sign(P) != sign(s) => close).
        let action = if !current_position.is_zero()
            && Side::from_signed(current_position) != Some(outstanding_side)
        {
            ActionType::Close
        } else {
            ActionType::Open
        };

        let sizing = Calculator::translate(
            outstanding.abs(),
            self.config.trading_mode,
            self.config.fixed_ratio,
            self.config.equal_ratio,
            self.equities(&instrument).await,
            &instrument,
            action,
        );

        // Enforce-on-miss (spec.md §4.5 step 7): a translated size that
        // rounds to zero while the accumulated delta is still nonzero is
        // forced up to the instrument's floor instead of skipped again,
        // so drift can never accumulate indefinitely below the minimum.
        let (place_size, outcome) = match sizing.outcome {
            SizingOutcome::Sized => (sizing.size, ExecutionOutcome::Placed),
            SizingOutcome::BelowMinimum => {
                (instrument.min_order_size.for_action(action), ExecutionOutcome::Enforced)
            }
        };

        let projected = current_position + outstanding_side.signed(place_size);
        {
            let risk = self.risk.read().await;
            if let Err(violation) = risk.check(Some(&instrument), projected) {
                warn!("[EXEC] oid={} skipped: {}", event.oid, violation.describe());
                return Ok(ExecutionOutcome::SkippedRisk);
            }
        }

        let price = instrument.snap_price(event.price);
        let reduce_only = action == ActionType::Close;
        let placed = self
            .follower
            .place_limit_gtc(&event.instrument, outstanding_side, price, place_size, reduce_only)
            .await?;

        self.mapper.save(event.oid, &placed.follower_order_id, &event.instrument, s, event.timestamp_ms).await?;
        let executed_master_equiv = Calculator::master_equivalent(
            place_size,
            self.config.trading_mode,
            self.config.fixed_ratio,
            self.config.equal_ratio,
        );
        self.ledger
            .record_actual(&event.instrument, outstanding_side.signed(executed_master_equiv))
            .await?;

        info!(
            "[EXEC] oid={} -> follower order {} {:?} {}@{} ({:?})",
            event.oid, placed.follower_order_id, outstanding_side, place_size, price, outcome
        );
        Ok(outcome)
    }

    async fn handle_canceled(&self, event: &MasterOrderEvent) -> anyhow::Result<ExecutionOutcome> {
        let mapping = match self.mapper.lookup_follower(event.oid).await? {
            Some(m) => m,
            None => return Ok(ExecutionOutcome::SkippedDirection),
        };
        self.retire_mapping(event.oid, &mapping).await?;
        Ok(ExecutionOutcome::Canceled)
    }

    async fn handle_filled(&self, event: &MasterOrderEvent) -> anyhow::Result<ExecutionOutcome> {
        // The Follower's own execution-report stream is the source of
        // truth for fills; here we only retire the mapping so a later
        // Canceled/Triggered for the same oid is a no-op. The ledger
        // contribution recorded at placement time stands.
        self.mapper.delete(event.oid).await?;
        Ok(ExecutionOutcome::Placed)
    }

    /// Cancels the Follower order backing `mapping` (tolerating it having
    /// already vanished venue-side), reverses the Master-unit size this
    /// mapping's Open event contributed to the delta ledger's target, and
    /// drops the mapping. Shared by cancellation, the amendment path in
    /// `handle_open`, and the startup reconciler's zombie-order sweep.
    pub(crate) async fn retire_mapping(&self, oid: u64, mapping: &MappingRecord) -> anyhow::Result<()> {
        match self.follower.cancel(&mapping.instrument, &mapping.follower_order_id).await {
            Ok(()) => {}
            Err(crate::error::VenueError::UnknownOrder(_)) => {}
            Err(e) => return Err(e.into()),
        }
        self.ledger.add_target(&mapping.instrument, -mapping.signed_size).await?;
        self.mapper.delete(oid).await?;
        Ok(())
    }

    /// Handles an independently-reproducible Master taker fill: these
    /// aren't tied to a resting oid, so they're journaled by their own
    /// synthetic event id and placed as Follower market orders.
    pub async fn handle_taker_fill(&self, fill: MasterFillEvent) -> anyhow::Result<()> {
        let event_id = fill.event_id();
        if self.journal.is_processed(&event_id).await? {
            return Ok(());
        }
        let lock = match self.journal.acquire(&event_id).await? {
            Some(lock) => lock,
            None => return Ok(()),
        };

        let outcome = self.handle_taker_fill_inner(&fill).await?;
        self.journal.record(&event_id, outcome, fill.timestamp_ms).await?;
        self.journal.release(lock).await?;
        Ok(())
    }

    /// spec.md §4.5(c): with `s` the fill's own signed size and `delta` the
    /// pre-fill outstanding ledger delta, `S = s + delta` is the combined
    /// gap this fill is an opportunity to resolve. If `s` and `S` disagree
    /// in sign (the fill moved the opposite way from the backlog) or `S`
    /// rounds below the instrument minimum, the fill is skipped and folded
    /// into the backlog (`Δ += s`) for a later event to resolve. Otherwise
    /// an order sized to `S` is placed and both the fresh `s` and the
    /// absorbed backlog are credited in the same step, leaving the
    /// instrument's outstanding delta at zero.
    async fn handle_taker_fill_inner(&self, fill: &MasterFillEvent) -> anyhow::Result<ExecutionOutcome> {
        let instrument = match self.instruments.get(&fill.instrument) {
            Some(i) => i.clone(),
            None => return Ok(ExecutionOutcome::SkippedRisk),
        };
        if self.risk.read().await.emergency_stop_active() {
            return Ok(ExecutionOutcome::SkippedRisk);
        }

        let s = fill.side.signed(fill.size);
        let entry = self.ledger.get(&fill.instrument).await?;
        let delta = entry.outstanding();
        let combined = s + delta;

        if Side::from_signed(s) != Side::from_signed(combined) {
            self.ledger.add_target(&fill.instrument, s).await?;
            return Ok(ExecutionOutcome::SkippedBelowMin);
        }

        let sizing = Calculator::translate(
            combined.abs(),
            self.config.trading_mode,
            self.config.fixed_ratio,
            self.config.equal_ratio,
            self.equities(&instrument).await,
            &instrument,
            ActionType::Open,
        );
        if sizing.outcome == SizingOutcome::BelowMinimum {
            self.ledger.add_target(&fill.instrument, s).await?;
            return Ok(ExecutionOutcome::SkippedBelowMin);
        }

        let side = match Side::from_signed(combined) {
            Some(side) => side,
            None => return Ok(ExecutionOutcome::SkippedBelowMin),
        };
        let current_position = self.follower.position(&fill.instrument).await?;
        let projected = current_position + side.signed(sizing.size);
        {
            let risk = self.risk.read().await;
            if let Err(violation) = risk.check(Some(&instrument), projected) {
                warn!("[EXEC] taker fill on {} skipped: {}", fill.instrument, violation.describe());
                self.ledger.add_target(&fill.instrument, s).await?;
                return Ok(ExecutionOutcome::SkippedRisk);
            }
        }

        self.follower.place_market(&fill.instrument, side, sizing.size, false).await?;
        self.ledger.add_target(&fill.instrument, s).await?;
        self.ledger.consume(&fill.instrument, combined).await?;
        Ok(ExecutionOutcome::Placed)
    }

    // The Master's equity isn't observable through the read-only feed, so
    // Equal mode always falls back to applying `equal_ratio` directly
    // (Calculator's no-equities branch) rather than a true equity ratio.
    async fn equities(&self, _instrument: &Instrument) -> Option<AccountEquities> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TradingMode;
    use crate::error::VenueError;
    use crate::events::FollowerOrderStatus;
    use crate::follower::{PlacedOrder, PositionDetail};
    use crate::instrument::MinOrderSize;
    use crate::store::Store;
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Mutex;
    use tokio::sync::RwLock;

    fn btc() -> Instrument {
        Instrument {
            symbol: "BTC".into(),
            min_order_size: MinOrderSize::Scalar(dec!(0.001)),
            qty_decimals: 3,
            tick_size: dec!(0.1),
            max_abs_position: dec!(10),
            aggressive_reduction_threshold: dec!(0.01),
        }
    }

    struct FakeFollower {
        position: Mutex<Decimal>,
        next_id: AtomicU64,
        placed: Mutex<Vec<(Side, Decimal, Decimal, bool)>>,
    }

    impl FakeFollower {
        fn new(position: Decimal) -> Self {
            Self { position: Mutex::new(position), next_id: AtomicU64::new(1), placed: Mutex::new(Vec::new()) }
        }
    }

    #[async_trait]
    impl FollowerClient for FakeFollower {
        async fn account_equity(&self) -> Result<crate::follower::AccountSnapshot, VenueError> {
            Ok(crate::follower::AccountSnapshot { equity: Decimal::ZERO })
        }
        async fn position(&self, _instrument: &str) -> Result<Decimal, VenueError> {
            Ok(*self.position.lock().unwrap())
        }
        async fn position_detail(&self, _instrument: &str) -> Result<PositionDetail, VenueError> {
            Ok(PositionDetail { size: *self.position.lock().unwrap(), entry_price: dec!(30000) })
        }
        async fn order_status(&self, _instrument: &str, _id: &str) -> Result<FollowerOrderStatus, VenueError> {
            Ok(FollowerOrderStatus::New)
        }
        async fn open_orders(&self, _instrument: &str) -> Result<Vec<PlacedOrder>, VenueError> {
            Ok(vec![])
        }
        async fn place_limit_gtc(
            &self,
            _instrument: &str,
            side: Side,
            price: Decimal,
            size: Decimal,
            reduce_only: bool,
        ) -> Result<PlacedOrder, VenueError> {
            self.placed.lock().unwrap().push((side, price, size, reduce_only));
            let id = self.next_id.fetch_add(1, Ordering::SeqCst);
            Ok(PlacedOrder {
                follower_order_id: id.to_string(),
                status: FollowerOrderStatus::New,
                side,
                price,
                size,
                reduce_only,
            })
        }
        async fn place_market(
            &self,
            _instrument: &str,
            side: Side,
            size: Decimal,
            reduce_only: bool,
        ) -> Result<PlacedOrder, VenueError> {
            self.placed.lock().unwrap().push((side, Decimal::ZERO, size, reduce_only));
            let id = self.next_id.fetch_add(1, Ordering::SeqCst);
            Ok(PlacedOrder {
                follower_order_id: id.to_string(),
                status: FollowerOrderStatus::New,
                side,
                price: Decimal::ZERO,
                size,
                reduce_only,
            })
        }
        async fn cancel(&self, _instrument: &str, _id: &str) -> Result<(), VenueError> {
            Ok(())
        }
        async fn cancel_replace(
            &self,
            instrument: &str,
            _id: &str,
            side: Side,
            price: Decimal,
            size: Decimal,
            reduce_only: bool,
        ) -> Result<PlacedOrder, VenueError> {
            self.place_limit_gtc(instrument, side, price, size, reduce_only).await
        }
    }

    fn test_store() -> Store {
        Store::new("redis://127.0.0.1:6379").expect("valid redis url")
    }

    fn executor(follower: Arc<FakeFollower>) -> Executor {
        let store = test_store();
        let instruments = InstrumentRegistry::new(vec![btc()]);
        Executor::new(
            Mapper::new(store.clone()),
            Ledger::new(store.clone()),
            Journal::new(store),
            Arc::new(RwLock::new(RiskGate::new(false))),
            instruments,
            follower,
            ExecutorConfig { trading_mode: TradingMode::Fixed, fixed_ratio: dec!(0.1), equal_ratio: dec!(1) },
        )
    }

    // Requires a local Redis at redis://127.0.0.1:6379 — the Mapper/Ledger/
    // Journal persist through Store, so pure in-process mocking isn't
    // possible without a fake persistence layer the rest of the engine
    // doesn't have.
    #[tokio::test]
    #[ignore]
    async fn open_below_minimum_still_credits_target_and_enforces_on_second_order() {
        let follower = Arc::new(FakeFollower::new(Decimal::ZERO));
        let exec = executor(follower.clone());

        let first = MasterOrderEvent {
            oid: 1,
            instrument: "BTC".into(),
            side: Side::Buy,
            price: dec!(30000),
            size: dec!(0.01), // 0.1 ratio -> 0.001 follower units, right at the minimum boundary
            status: MasterOrderStatus::Open,
            reduce_only: false,
            timestamp_ms: 1,
            master_account: "0xabc".into(),
        };
        exec.handle_order_event(first).await.unwrap();

        let second = MasterOrderEvent {
            oid: 2,
            instrument: "BTC".into(),
            side: Side::Buy,
            price: dec!(30000),
            size: dec!(0.001),
            status: MasterOrderStatus::Open,
            reduce_only: false,
            timestamp_ms: 2,
            master_account: "0xabc".into(),
        };
        exec.handle_order_event(second).await.unwrap();

        assert!(!follower.placed.lock().unwrap().is_empty());
    }

    #[tokio::test]
    #[ignore]
    async fn cancel_reverses_the_canceled_orders_own_contribution_only() {
        let follower = Arc::new(FakeFollower::new(Decimal::ZERO));
        let exec = executor(follower.clone());

        let open = MasterOrderEvent {
            oid: 10,
            instrument: "BTC".into(),
            side: Side::Buy,
            price: dec!(30000),
            size: dec!(1.0),
            status: MasterOrderStatus::Open,
            reduce_only: false,
            timestamp_ms: 1,
            master_account: "0xabc".into(),
        };
        exec.handle_order_event(open.clone()).await.unwrap();

        let cancel = MasterOrderEvent { status: MasterOrderStatus::Canceled, timestamp_ms: 2, ..open };
        exec.handle_order_event(cancel).await.unwrap();

        let entry = exec.ledger.get("BTC").await.unwrap();
        assert_eq!(entry.outstanding(), Decimal::ZERO);
    }
}
