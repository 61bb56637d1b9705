// risk.rs — risk gate (spec.md §4.4). Every Master event is checked
// against the instrument whitelist, the emergency-stop flag, and the
// instrument's position limit before the Order Executor is allowed to
// act on it.
use crate::instrument::Instrument;
use rust_decimal::Decimal;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RiskViolation {
    UnsupportedInstrument,
    EmergencyStopActive,
    PositionLimitExceeded,
}

impl RiskViolation {
    pub fn describe(&self) -> &'static str {
        match self {
            RiskViolation::UnsupportedInstrument => "instrument not on the supported whitelist",
            RiskViolation::EmergencyStopActive => "emergency stop is active",
            RiskViolation::PositionLimitExceeded => "projected position exceeds the configured limit",
        }
    }
}

pub struct RiskGate {
    emergency_stop: bool,
}

impl RiskGate {
    pub fn new(emergency_stop: bool) -> Self {
        Self { emergency_stop }
    }

    pub fn set_emergency_stop(&mut self, active: bool) {
        if active != self.emergency_stop {
            log::warn!("[RISK] emergency stop set to {active}");
        }
        self.emergency_stop = active;
    }

    pub fn emergency_stop_active(&self) -> bool {
        self.emergency_stop
    }

    /// Checks whether `projected_position` for `instrument` is allowed to
    /// proceed. Returns the first violation found, if any.
    pub fn check(
        &self,
        instrument: Option<&Instrument>,
        projected_position: Decimal,
    ) -> Result<(), RiskViolation> {
        if self.emergency_stop {
            return Err(RiskViolation::EmergencyStopActive);
        }

        let instrument = instrument.ok_or(RiskViolation::UnsupportedInstrument)?;

        if projected_position.abs() > instrument.max_abs_position {
            return Err(RiskViolation::PositionLimitExceeded);
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
            min_order_size: MinOrderSize::Scalar(dec!(0.001)),
            qty_decimals: 3,
            tick_size: dec!(0.1),
            max_abs_position: dec!(1.0),
            aggressive_reduction_threshold: dec!(0.01),
        }
    }

    #[test]
    fn emergency_stop_blocks_everything() {
        let gate = RiskGate::new(true);
        assert_eq!(gate.check(Some(&btc()), dec!(0.1)), Err(RiskViolation::EmergencyStopActive));
    }

    #[test]
    fn unsupported_instrument_is_rejected() {
        let gate = RiskGate::new(false);
        assert_eq!(gate.check(None, dec!(0.1)), Err(RiskViolation::UnsupportedInstrument));
    }

    #[test]
    fn position_limit_enforced_on_absolute_value() {
        let gate = RiskGate::new(false);
        assert_eq!(
            gate.check(Some(&btc()), dec!(-1.5)),
            Err(RiskViolation::PositionLimitExceeded)
        );
        assert!(gate.check(Some(&btc()), dec!(0.5)).is_ok());
    }
}
