// rebalancer.rs — exposure rebalancer (spec.md §4.7). Periodically compares
// the Follower's actual position against the Master's authoritative
// position (scaled by the configured ratio) and trims any uncovered excess
// with a reduce-only limit order anchored off the Follower's own entry
// price. Fixed-mode only: Equal-mode rebalancing remains out of scope until
// a Master equity source exists.
use crate::config::TradingMode;
use crate::events::Side;
use crate::follower::FollowerClient;
use crate::instrument::{ActionType, Instrument, InstrumentRegistry};
use crate::master::MasterIngest;
use crate::store::Store;
use log::{info, warn};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;

fn tp_offset() -> Decimal {
    Decimal::new(1, 4) // 0.0001
}

fn floor_to(value: Decimal, decimals: u32) -> Decimal {
    let factor = Decimal::from(10u64.pow(decimals));
    (value * factor).floor() / factor
}

fn anchor_key(symbol: &str) -> String {
    format!("rebalance:tp:{symbol}")
}

pub struct Rebalancer {
    instruments: InstrumentRegistry,
    follower: Arc<dyn FollowerClient>,
    master: Arc<MasterIngest>,
    followed_users: Vec<String>,
    store: Store,
    trading_mode: TradingMode,
    fixed_ratio: Decimal,
}

impl Rebalancer {
    pub fn new(
        instruments: InstrumentRegistry,
        follower: Arc<dyn FollowerClient>,
        master: Arc<MasterIngest>,
        followed_users: Vec<String>,
        store: Store,
        trading_mode: TradingMode,
        fixed_ratio: Decimal,
    ) -> Self {
        Self { instruments, follower, master, followed_users, store, trading_mode, fixed_ratio }
    }

    pub async fn run(&self, mut shutdown: tokio::sync::watch::Receiver<bool>, period: Duration) {
        let mut ticker = tokio::time::interval(period);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep().await {
                        warn!("[REBALANCE] sweep failed: {e}");
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
        if self.trading_mode != TradingMode::Fixed {
            return Ok(());
        }
        for symbol in self.instruments.symbols().map(str::to_string).collect::<Vec<_>>() {
            self.rebalance_one(&symbol).await?;
        }
        Ok(())
    }

    async fn master_position(&self, symbol: &str) -> anyhow::Result<Decimal> {
        let mut total = Decimal::ZERO;
        for user in &self.followed_users {
            let positions = self.master.fetch_positions(user).await?;
            for (coin, szi) in positions {
                if coin == symbol {
                    total += szi;
                }
            }
        }
        Ok(total)
    }

    async fn rebalance_one(&self, symbol: &str) -> anyhow::Result<()> {
        let instrument = match self.instruments.get(symbol) {
            Some(i) => i.clone(),
            None => return Ok(()),
        };

        let master_position = self.master_position(symbol).await?;
        let detail = self.follower.position_detail(symbol).await?;
        let follower_position = detail.size;
        let entry_price = detail.entry_price;

        let expected = master_position * self.fixed_ratio;
        let excess = follower_position - expected;

        if excess.is_zero() {
            self.clear_anchor(symbol).await?;
            return Ok(());
        }

        let closing_side = match Side::from_signed(follower_position) {
            Some(side) => side.opposite(),
            None => return Ok(()),
        };

        let open_orders = self.follower.open_orders(symbol).await?;
        let open_reduce_only_same_side: Decimal = open_orders
            .iter()
            .filter(|o| o.reduce_only && o.side == closing_side)
            .map(|o| o.size)
            .sum();

        let uncovered = excess.abs() - open_reduce_only_same_side;
        if uncovered <= instrument.aggressive_reduction_threshold {
            return Ok(());
        }

        let correction_size = instrument.round_size(floor_to(uncovered / Decimal::from(2), instrument.qty_decimals));
        if correction_size < instrument.min_order_size.for_action(ActionType::Close) {
            return Ok(());
        }

        let price = self.anchor_price(&instrument, closing_side, entry_price);
        self.replace_anchor(symbol, closing_side, price, correction_size).await?;
        info!(
            "[REBALANCE] {symbol} excess={excess} uncovered={uncovered} -> reduce-only {closing_side:?} {correction_size}@{price}"
        );
        Ok(())
    }

    fn anchor_price(&self, instrument: &Instrument, closing_side: Side, entry_price: Decimal) -> Decimal {
        let raw = match closing_side {
            Side::Sell => entry_price * (Decimal::ONE + tp_offset()),
            Side::Buy => entry_price * (Decimal::ONE - tp_offset()),
        };
        instrument.snap_price(raw)
    }

    async fn replace_anchor(&self, symbol: &str, side: Side, price: Decimal, size: Decimal) -> anyhow::Result<()> {
        self.clear_anchor(symbol).await?;
        let placed = self.follower.place_limit_gtc(symbol, side, price, size, true).await?;
        self.store
            .set_string(&anchor_key(symbol), &placed.follower_order_id, Store::mapping_ttl())
            .await?;
        Ok(())
    }

    async fn clear_anchor(&self, symbol: &str) -> anyhow::Result<()> {
        if let Some(order_id) = self.store.get_string(&anchor_key(symbol)).await? {
            match self.follower.cancel(symbol, &order_id).await {
                Ok(()) => {}
                Err(crate::error::VenueError::UnknownOrder(_)) => {}
                Err(e) => return Err(e.into()),
            }
            self.store.del(&anchor_key(symbol)).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
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

    #[test]
    fn floor_to_truncates_toward_zero_on_positive_values() {
        assert_eq!(floor_to(dec!(0.0015), 3), dec!(0.001));
        assert_eq!(floor_to(dec!(0.0019), 3), dec!(0.001));
    }

    #[test]
    fn anchor_price_adds_offset_on_sell_and_subtracts_on_buy() {
        let instruments = InstrumentRegistry::new(vec![btc()]);
        let follower: Arc<dyn FollowerClient> = Arc::new(super::tests_support::NoopFollower);
        let master = Arc::new(MasterIngest::new("wss://x.invalid".into(), "https://x.invalid".into(), vec![]));
        let store = Store::new("redis://127.0.0.1:6379").unwrap();
        let rebalancer =
            Rebalancer::new(instruments, follower, master, vec![], store, TradingMode::Fixed, dec!(0.1));
        let instrument = btc();

        let sell_price = rebalancer.anchor_price(&instrument, Side::Sell, dec!(30000.0));
        assert_eq!(sell_price, dec!(30003.0));

        let buy_price = rebalancer.anchor_price(&instrument, Side::Buy, dec!(30000.0));
        assert_eq!(buy_price, dec!(29997.0));
    }
}

#[cfg(test)]
pub(crate) mod tests_support {
    use super::*;
    use crate::error::VenueError;
    use crate::follower::{AccountSnapshot, PositionDetail};
    use crate::events::FollowerOrderStatus;

    pub struct NoopFollower;

    #[async_trait::async_trait]
    impl FollowerClient for NoopFollower {
        async fn account_equity(&self) -> Result<AccountSnapshot, VenueError> {
            Ok(AccountSnapshot { equity: Decimal::ZERO })
        }
        async fn position(&self, _instrument: &str) -> Result<Decimal, VenueError> {
            Ok(Decimal::ZERO)
        }
        async fn position_detail(&self, _instrument: &str) -> Result<PositionDetail, VenueError> {
            Ok(PositionDetail { size: Decimal::ZERO, entry_price: Decimal::ZERO })
        }
        async fn order_status(&self, _instrument: &str, _id: &str) -> Result<FollowerOrderStatus, VenueError> {
            Ok(FollowerOrderStatus::New)
        }
        async fn open_orders(&self, _instrument: &str) -> Result<Vec<crate::follower::PlacedOrder>, VenueError> {
            Ok(vec![])
        }
        async fn place_limit_gtc(
            &self,
            _instrument: &str,
            _side: Side,
            _price: Decimal,
            _size: Decimal,
            _reduce_only: bool,
        ) -> Result<crate::follower::PlacedOrder, VenueError> {
            unimplemented!("not exercised by these tests")
        }
        async fn place_market(
            &self,
            _instrument: &str,
            _side: Side,
            _size: Decimal,
            _reduce_only: bool,
        ) -> Result<crate::follower::PlacedOrder, VenueError> {
            unimplemented!("not exercised by these tests")
        }
        async fn cancel(&self, _instrument: &str, _id: &str) -> Result<(), VenueError> {
            Ok(())
        }
        async fn cancel_replace(
            &self,
            _instrument: &str,
            _id: &str,
            _side: Side,
            _price: Decimal,
            _size: Decimal,
            _reduce_only: bool,
        ) -> Result<crate::follower::PlacedOrder, VenueError> {
            unimplemented!("not exercised by these tests")
        }
    }
}
