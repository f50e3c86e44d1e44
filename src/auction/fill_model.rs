//! Fill Model
//!
//! Prices orders against top-of-book. Market orders cross the spread and pay
//! slippage plus the taker fee; resting limit orders fill when the opposite
//! side reaches the limit and earn the maker rate.
//!
//! ```text
//! market buy   ask + slip         taker
//! market sell  bid - slip         taker
//! limit buy    min(limit, ask)    maker   if ask <= limit
//! limit sell   max(limit, bid)    maker   if bid >= limit
//! ```

use crate::auction::clock::TimestampMs;
use crate::auction::config::{ExecutionConfig, SlippageMode};
use crate::auction::events::{Direction, Quote};
use serde::{Deserialize, Serialize};

/// Order side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    #[inline]
    pub fn opposite(&self) -> Self {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }

    /// Side that opens a position in `direction`.
    #[inline]
    pub fn opening(direction: Direction) -> Self {
        match direction {
            Direction::Long => Side::Buy,
            Direction::Short => Side::Sell,
        }
    }

    /// Side that closes a position in `direction`.
    #[inline]
    pub fn closing(direction: Direction) -> Self {
        Self::opening(direction).opposite()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum OrderType {
    Market,
    Limit { price: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Liquidity {
    Maker,
    Taker,
}

/// Entry and exit orders may carry different slippage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FillPurpose {
    Entry,
    Exit,
}

/// Adverse price adjustment applied to market orders.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SlippageModel {
    pub mode: SlippageMode,
    pub tick_size: f64,
    pub entry_ticks: u32,
    pub exit_ticks: u32,
    pub bps: f64,
}

impl SlippageModel {
    pub fn from_config(exec: &ExecutionConfig, tick_size: f64) -> Self {
        Self {
            mode: exec.slippage_mode,
            tick_size,
            entry_ticks: exec.slippage_ticks_entry,
            exit_ticks: exec.slippage_ticks_exit,
            bps: exec.slippage_bps,
        }
    }

    /// Slippage in price units for a fill touching `touch` (ask or bid).
    #[inline]
    pub fn amount(&self, touch: f64, purpose: FillPurpose) -> f64 {
        match self.mode {
            SlippageMode::Ticks => {
                let ticks = match purpose {
                    FillPurpose::Entry => self.entry_ticks,
                    FillPurpose::Exit => self.exit_ticks,
                };
                ticks as f64 * self.tick_size
            }
            SlippageMode::Bps => touch * self.bps / 10_000.0,
        }
    }
}

/// Maker/taker fee rates in basis points of notional. Negative is a rebate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeeSchedule {
    pub maker_bps: f64,
    pub taker_bps: f64,
}

impl FeeSchedule {
    #[inline]
    pub fn fee(&self, notional: f64, liquidity: Liquidity) -> f64 {
        let bps = match liquidity {
            Liquidity::Maker => self.maker_bps,
            Liquidity::Taker => self.taker_bps,
        };
        notional * bps / 10_000.0
    }
}

/// Price, fee and liquidity of a simulated execution.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Execution {
    pub price: f64,
    pub fee: f64,
    pub slippage: f64,
    pub liquidity: Liquidity,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FillModel {
    pub slippage: SlippageModel,
    pub fees: FeeSchedule,
}

impl FillModel {
    pub fn from_config(exec: &ExecutionConfig, tick_size: f64) -> Self {
        Self {
            slippage: SlippageModel::from_config(exec, tick_size),
            fees: FeeSchedule {
                maker_bps: exec.maker_fee_bps,
                taker_bps: exec.taker_fee_bps,
            },
        }
    }

    pub fn market(&self, side: Side, purpose: FillPurpose, quote: &Quote, qty: f64) -> Execution {
        let (price, slippage) = match side {
            Side::Buy => {
                let slip = self.slippage.amount(quote.ask_px, purpose);
                (quote.ask_px + slip, slip)
            }
            Side::Sell => {
                let slip = self.slippage.amount(quote.bid_px, purpose);
                (quote.bid_px - slip, slip)
            }
        };
        Execution {
            price,
            fee: self.fees.fee(price * qty, Liquidity::Taker),
            slippage,
            liquidity: Liquidity::Taker,
        }
    }

    /// `None` while the quote has not reached the limit.
    pub fn limit(&self, side: Side, limit: f64, quote: &Quote, qty: f64) -> Option<Execution> {
        let price = match side {
            Side::Buy if quote.ask_px <= limit => limit.min(quote.ask_px),
            Side::Sell if quote.bid_px >= limit => limit.max(quote.bid_px),
            _ => return None,
        };
        Some(Execution {
            price,
            fee: self.fees.fee(price * qty, Liquidity::Maker),
            slippage: 0.0,
            liquidity: Liquidity::Maker,
        })
    }
}

/// Why an order was sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FillIntent {
    Entry,
    Exit(crate::auction::position::ExitReason),
}

/// One simulated execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fill {
    pub order_id: u64,
    /// Quote timestamp the fill executed against.
    pub ts_ms: TimestampMs,
    /// Bar close of the decision that produced the order.
    pub decision_ts: TimestampMs,
    pub side: Side,
    pub intent: FillIntent,
    pub qty: f64,
    pub price: f64,
    pub fee: f64,
    pub slippage: f64,
    pub liquidity: Liquidity,
}
