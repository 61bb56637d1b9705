// events.rs — shared sum-typed event and outcome definitions (spec.md §9
// "Sum-typed events"). Master and Follower events, and Executor outcomes,
// are closed variants meant to be exhaustively matched.
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn sign(&self) -> i32 {
        match self {
            Side::Buy => 1,
            Side::Sell => -1,
        }
    }

    pub fn opposite(&self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }

    /// `amount` signed by this side: positive for Buy, negative for Sell.
    pub fn signed(&self, amount: Decimal) -> Decimal {
        match self {
            Side::Buy => amount,
            Side::Sell => -amount,
        }
    }

    pub fn from_signed(signed: Decimal) -> Option<Side> {
        if signed.is_sign_positive() && !signed.is_zero() {
            Some(Side::Buy)
        } else if signed.is_sign_negative() {
            Some(Side::Sell)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MasterOrderStatus {
    Open,
    Canceled,
    Filled,
    Triggered,
}

/// A single order-book event observed for the followed Master account
/// (spec.md §3 "Master Order Event").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MasterOrderEvent {
    pub oid: u64,
    pub instrument: String,
    pub side: Side,
    pub price: Decimal,
    pub size: Decimal,
    pub status: MasterOrderStatus,
    pub reduce_only: bool,
    pub timestamp_ms: u64,
    pub master_account: String,
}

/// A taker fill observed on the Master account (spec.md §3 "Master Fill
/// Event"). Only taker fills are independently reproducible; resting-order
/// fills are implied by an already-mirrored limit order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MasterFillEvent {
    pub instrument: String,
    pub side: Side,
    pub price: Decimal,
    pub size: Decimal,
    pub timestamp_ms: u64,
    pub taker: bool,
}

impl MasterFillEvent {
    /// Synthetic event id used for the Processed-Order Journal
    /// (spec.md §3 "Processed-Order Entry").
    pub fn event_id(&self) -> String {
        format!("fill:{}:{}:{}", self.instrument, self.timestamp_ms, self.size)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FollowerOrderStatus {
    New,
    PartiallyFilled,
    Filled,
    Canceled,
    Expired,
    Rejected,
}

impl FollowerOrderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            FollowerOrderStatus::Filled
                | FollowerOrderStatus::Canceled
                | FollowerOrderStatus::Expired
                | FollowerOrderStatus::Rejected
        )
    }
}

/// An execution report from the Follower venue's user-data stream
/// (spec.md §3 "Follower Execution Report").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FollowerExecutionReport {
    pub follower_order_id: String,
    pub instrument: String,
    pub side: Side,
    pub status: FollowerOrderStatus,
    pub last_fill_price: Option<Decimal>,
    pub last_fill_size: Option<Decimal>,
    pub timestamp_ms: u64,
}

/// Outcome recorded in the Processed-Order Journal for a Master event
/// (spec.md §9 "Placed / Enforced / Skipped-Below-Min / Skipped-Risk /
/// Skipped-Direction / Recovered").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionOutcome {
    Placed,
    Enforced,
    Replaced,
    Canceled,
    SkippedBelowMin,
    SkippedRisk,
    SkippedDirection,
    Recovered,
}
