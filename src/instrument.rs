// instrument.rs — per-instrument configuration (spec.md §3 "Instrument").
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Minimum order size, possibly split between opening and closing actions.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MinOrderSize {
    Scalar(Decimal),
    OpenClose { open: Decimal, close: Decimal },
}

impl MinOrderSize {
    pub fn for_action(&self, action: ActionType) -> Decimal {
        match (self, action) {
            (MinOrderSize::Scalar(v), _) => *v,
            (MinOrderSize::OpenClose { open, .. }, ActionType::Open) => *open,
            (MinOrderSize::OpenClose { close, .. }, ActionType::Close) => *close,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionType {
    Open,
    Close,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instrument {
    pub symbol: String,
    pub min_order_size: MinOrderSize,
    pub qty_decimals: u32,
    pub tick_size: Decimal,
    pub max_abs_position: Decimal,
    pub aggressive_reduction_threshold: Decimal,
}

impl Instrument {
    /// Rounds a price to the instrument's tick size: `round(px / tick) * tick`,
    /// rendered with exactly `decimals(tick)` digits (spec.md §8 boundary rule).
    pub fn snap_price(&self, px: Decimal) -> Decimal {
        if self.tick_size.is_zero() {
            return px;
        }
        let ticks = (px / self.tick_size).round();
        let snapped = ticks * self.tick_size;
        snapped.round_dp(self.tick_size.scale())
    }

    /// Truncates-then-rounds a size to the instrument's quantity precision.
    pub fn round_size(&self, size: Decimal) -> Decimal {
        size.round_dp(self.qty_decimals)
    }
}

/// The whitelist of instruments this engine is configured to mirror.
#[derive(Debug, Clone, Default)]
pub struct InstrumentRegistry {
    instruments: HashMap<String, Instrument>,
}

impl InstrumentRegistry {
    pub fn new(instruments: Vec<Instrument>) -> Self {
        Self {
            instruments: instruments.into_iter().map(|i| (i.symbol.clone(), i)).collect(),
        }
    }

    pub fn get(&self, symbol: &str) -> Option<&Instrument> {
        self.instruments.get(symbol)
    }

    pub fn supports(&self, symbol: &str) -> bool {
        self.instruments.contains_key(symbol)
    }

    pub fn symbols(&self) -> impl Iterator<Item = &str> {
        self.instruments.keys().map(|s| s.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
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
    fn snaps_price_to_tick() {
        let btc = btc();
        assert_eq!(btc.snap_price(dec!(30000.04)), dec!(30000.0));
        assert_eq!(btc.snap_price(dec!(30000.06)), dec!(30000.1));
    }

    #[test]
    fn min_order_size_scalar_applies_to_both_actions() {
        let btc = btc();
        assert_eq!(btc.min_order_size.for_action(ActionType::Open), dec!(0.002));
        assert_eq!(btc.min_order_size.for_action(ActionType::Close), dec!(0.002));
    }

    #[test]
    fn min_order_size_open_close_split() {
        let split = MinOrderSize::OpenClose { open: dec!(0.002), close: dec!(0.001) };
        assert_eq!(split.for_action(ActionType::Open), dec!(0.002));
        assert_eq!(split.for_action(ActionType::Close), dec!(0.001));
    }
}
