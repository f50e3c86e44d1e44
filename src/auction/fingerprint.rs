//! Run Fingerprint
//!
//! A SHA-256 digest that changes if and only if observable run behavior
//! changes.
//!
//! ```text
//! RunFingerprint = H(
//!   "AUCTION_RUNFP_V1" ||
//!   ConfigHash ||
//!   SignalsHash ||
//!   FillsHash ||
//!   TradesHash
//! )
//! ```
//!
//! # Canonicalization
//!
//! - Floats become fixed-point integers (`value * 1e8`, rounded)
//! - Integers are little-endian, enums hash a stable discriminant byte
//! - Records are hashed in emission order, which is already deterministic

use crate::auction::config::TraderConfig;
use crate::auction::error::TraderResult;
use crate::auction::events::Direction;
use crate::auction::fill_model::{Fill, FillIntent, Liquidity, Side};
use crate::auction::position::{ExitReason, TradeRecord};
use crate::auction::replay::RunOutput;
use crate::auction::signal::{SetupKind, SignalAction, SignalEvent};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Fingerprint version string - increment when format changes.
pub const FINGERPRINT_VERSION: &str = "AUCTION_RUNFP_V1";

const FIXED_SCALE: f64 = 1e8;

#[inline]
fn to_fixed(value: f64) -> i64 {
    (value * FIXED_SCALE).round() as i64
}

/// Incremental canonical hasher.
struct CanonicalHasher {
    inner: Sha256,
}

impl CanonicalHasher {
    fn new(domain: &str) -> Self {
        let mut inner = Sha256::new();
        inner.update(domain.as_bytes());
        Self { inner }
    }

    fn u8(&mut self, v: u8) {
        self.inner.update([v]);
    }

    fn i64(&mut self, v: i64) {
        self.inner.update(v.to_le_bytes());
    }

    fn f64(&mut self, v: f64) {
        self.i64(to_fixed(v));
    }

    fn bytes(&mut self, v: &[u8]) {
        self.i64(v.len() as i64);
        self.inner.update(v);
    }

    fn finish(self) -> String {
        hex::encode(self.inner.finalize())
    }
}

fn direction_tag(d: Direction) -> u8 {
    match d {
        Direction::Long => 1,
        Direction::Short => 2,
    }
}

fn setup_tag(k: SetupKind) -> u8 {
    match k {
        SetupKind::BreakIn => 1,
        SetupKind::FailedBreakout => 2,
        SetupKind::Breakout => 3,
    }
}

fn exit_tag(r: ExitReason) -> u8 {
    match r {
        ExitReason::StopLoss => 1,
        ExitReason::TakeProfit1 => 2,
        ExitReason::TakeProfit2 => 3,
        ExitReason::TimeStop => 4,
        ExitReason::SignalFlip => 5,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunFingerprint {
    pub version: String,
    pub config_hash: String,
    pub signals_hash: String,
    pub fills_hash: String,
    pub trades_hash: String,
    pub hash: String,
}

impl RunFingerprint {
    pub fn compute(config: &TraderConfig, output: &RunOutput) -> TraderResult<Self> {
        let config_hash = hash_config(config)?;
        let signals_hash = hash_signals(&output.signals);
        let fills_hash = hash_fills(&output.fills);
        let trades_hash = hash_trades(&output.trades);

        let mut h = CanonicalHasher::new(FINGERPRINT_VERSION);
        for part in [&config_hash, &signals_hash, &fills_hash, &trades_hash] {
            h.bytes(part.as_bytes());
        }
        Ok(Self {
            version: FINGERPRINT_VERSION.to_string(),
            config_hash,
            signals_hash,
            fills_hash,
            trades_hash,
            hash: h.finish(),
        })
    }

    /// First 16 hex chars, for log lines.
    pub fn short(&self) -> &str {
        &self.hash[..16.min(self.hash.len())]
    }
}

impl std::fmt::Display for RunFingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.version, self.hash)
    }
}

/// Struct fields serialize in declaration order, so the JSON is stable.
pub fn hash_config(config: &TraderConfig) -> TraderResult<String> {
    let json = serde_json::to_vec(config)?;
    let mut h = CanonicalHasher::new("CONFIG");
    h.bytes(&json);
    Ok(h.finish())
}

pub fn hash_signals(signals: &[SignalEvent]) -> String {
    let mut h = CanonicalHasher::new("SIGNALS");
    for s in signals {
        h.i64(s.decision_ts);
        h.u8(setup_tag(s.kind));
        h.u8(direction_tag(s.direction));
        h.u8(match s.action {
            SignalAction::Enter => 1,
            SignalAction::Flip => 2,
        });
        h.f64(s.reference_price);
        h.f64(s.stop);
        h.f64(s.tp1);
        h.f64(s.tp2);
        h.f64(s.va.val);
        h.f64(s.va.poc);
        h.f64(s.va.vah);
    }
    h.finish()
}

pub fn hash_fills(fills: &[Fill]) -> String {
    let mut h = CanonicalHasher::new("FILLS");
    for f in fills {
        h.i64(f.order_id as i64);
        h.i64(f.ts_ms);
        h.i64(f.decision_ts);
        h.u8(match f.side {
            Side::Buy => 1,
            Side::Sell => 2,
        });
        h.u8(match f.intent {
            FillIntent::Entry => 0,
            FillIntent::Exit(r) => exit_tag(r),
        });
        h.u8(match f.liquidity {
            Liquidity::Maker => 1,
            Liquidity::Taker => 2,
        });
        h.f64(f.qty);
        h.f64(f.price);
        h.f64(f.fee);
    }
    h.finish()
}

pub fn hash_trades(trades: &[TradeRecord]) -> String {
    let mut h = CanonicalHasher::new("TRADES");
    for t in trades {
        h.i64(t.id as i64);
        h.u8(direction_tag(t.direction));
        h.u8(setup_tag(t.setup));
        h.i64(t.entry_ts);
        h.i64(t.exit_ts);
        h.f64(t.entry_price);
        h.f64(t.exit_price);
        h.f64(t.qty);
        h.f64(t.net_pnl);
        h.u8(exit_tag(t.exit_reason));
    }
    h.finish()
}
