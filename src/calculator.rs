// calculator.rs — position size calculator (spec.md §4.3). Translates a
// Master-side size into the size the Follower should place, in either
// Fixed-ratio or Equal-ratio mode, then rounds and applies the
// instrument's minimum-order-size policy.
use crate::config::TradingMode;
use crate::instrument::{ActionType, Instrument};
use rust_decimal::Decimal;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizingOutcome {
    Sized,
    BelowMinimum,
}

#[derive(Debug, Clone, Copy)]
pub struct SizingResult {
    pub size: Decimal,
    pub outcome: SizingOutcome,
}

/// Reference account equities used for Equal-ratio sizing; Fixed-ratio
/// sizing never needs them.
#[derive(Debug, Clone, Copy)]
pub struct AccountEquities {
    pub master_equity: Decimal,
    pub follower_equity: Decimal,
}

pub struct Calculator;

impl Calculator {
    /// Converts a Master order/fill size into the Follower size, per the
    /// configured trading mode, then rounds to the instrument's quantity
    /// precision and checks it against the minimum order size for `action`.
    pub fn translate(
        master_size: Decimal,
        mode: TradingMode,
        fixed_ratio: Decimal,
        equal_ratio: Decimal,
        equities: Option<AccountEquities>,
        instrument: &Instrument,
        action: ActionType,
    ) -> SizingResult {
        let raw = match mode {
            TradingMode::Fixed => master_size * fixed_ratio,
            TradingMode::Equal => match equities {
                Some(eq) if !eq.master_equity.is_zero() => {
                    master_size * (eq.follower_equity / eq.master_equity) * equal_ratio
                }
                _ => master_size * equal_ratio,
            },
        };

        let rounded = instrument.round_size(raw);
        let minimum = instrument.min_order_size.for_action(action);

        if rounded.abs() < minimum {
            SizingResult { size: Decimal::ZERO, outcome: SizingOutcome::BelowMinimum }
        } else {
            SizingResult { size: rounded, outcome: SizingOutcome::Sized }
        }
    }

    /// Inverse of `translate`'s ratio scaling: converts a Follower-unit
    /// quantity back to its Master-unit equivalent, so the delta ledger's
    /// `actual` side can stay expressed in Master units (I3). Uses the same
    /// ratio `translate` would have applied for the given mode, including
    /// the no-equities Equal-mode fallback to `equal_ratio`.
    pub fn master_equivalent(
        follower_size: Decimal,
        mode: TradingMode,
        fixed_ratio: Decimal,
        equal_ratio: Decimal,
    ) -> Decimal {
        let ratio = match mode {
            TradingMode::Fixed => fixed_ratio,
            TradingMode::Equal => equal_ratio,
        };
        if ratio.is_zero() {
            Decimal::ZERO
        } else {
            follower_size / ratio
        }
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
            min_order_size: MinOrderSize::Scalar(dec!(0.001)),
            qty_decimals: 3,
            tick_size: dec!(0.1),
            max_abs_position: dec!(1.0),
            aggressive_reduction_threshold: dec!(0.01),
        }
    }

    #[test]
    fn fixed_ratio_scales_linearly() {
        let result = Calculator::translate(
            dec!(1.0),
            TradingMode::Fixed,
            dec!(0.1),
            dec!(1),
            None,
            &btc(),
            ActionType::Open,
        );
        assert_eq!(result.size, dec!(0.100));
        assert_eq!(result.outcome, SizingOutcome::Sized);
    }

    #[test]
    fn below_minimum_is_skipped() {
        let result = Calculator::translate(
            dec!(0.005),
            TradingMode::Fixed,
            dec!(0.1),
            dec!(1),
            None,
            &btc(),
            ActionType::Open,
        );
        assert_eq!(result.outcome, SizingOutcome::BelowMinimum);
        assert_eq!(result.size, Decimal::ZERO);
    }

    #[test]
    fn equal_ratio_scales_by_equity_fraction() {
        let equities = AccountEquities { master_equity: dec!(10000), follower_equity: dec!(1000) };
        let result = Calculator::translate(
            dec!(1.0),
            TradingMode::Equal,
            dec!(0.1),
            dec!(1),
            Some(equities),
            &btc(),
            ActionType::Open,
        );
        assert_eq!(result.size, dec!(0.100));
    }

    #[test]
    fn equal_ratio_falls_back_when_master_equity_unknown() {
        let result = Calculator::translate(
            dec!(2.0),
            TradingMode::Equal,
            dec!(0.1),
            dec!(1),
            None,
            &btc(),
            ActionType::Open,
        );
        assert_eq!(result.size, dec!(2.000));
    }

    #[test]
    fn master_equivalent_inverts_fixed_ratio() {
        let master_equiv = Calculator::master_equivalent(dec!(0.100), TradingMode::Fixed, dec!(0.1), dec!(1));
        assert_eq!(master_equiv, dec!(1));
    }

    #[test]
    fn master_equivalent_is_zero_for_zero_ratio() {
        let master_equiv = Calculator::master_equivalent(dec!(0.5), TradingMode::Fixed, Decimal::ZERO, dec!(1));
        assert_eq!(master_equiv, Decimal::ZERO);
    }
}
