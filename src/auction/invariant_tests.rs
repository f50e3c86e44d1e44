//! Structural invariants over long generated replays.

use crate::auction::clock::MILLIS_PER_MINUTE;
use crate::auction::config::TraderConfig;
use crate::auction::events::{MarketEvent, Quote, Trade};
use crate::auction::histogram::{RollingHistogram, Tick, Volume};
use crate::auction::invariants::{InvariantConfig, InvariantEnforcer, InvariantMode, ViolationType};
use crate::auction::replay::{run, ReplayEngine};
use crate::auction::value_area::expand_value_area;
use std::collections::BTreeMap;

/// Minimal LCG so generated sequences are identical on every platform.
struct Lcg(u64);

impl Lcg {
    fn next_u32(&mut self) -> u32 {
        self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        (self.0 >> 33) as u32
    }

    fn unit(&mut self) -> f64 {
        self.next_u32() as f64 / u32::MAX as f64
    }
}

/// Random-walk market: a quote and a handful of trades per minute.
fn generated_events(minutes: i64, seed: u64) -> Vec<MarketEvent> {
    let mut rng = Lcg(seed);
    let mut mid = 50_000.0f64;
    let mut events = Vec::new();
    for m in 0..minutes {
        let base = m * MILLIS_PER_MINUTE;
        mid += (rng.unit() - 0.5) * 20.0;
        let mid_ticks = (mid * 10.0).round() / 10.0;
        events.push(MarketEvent::Quote(Quote {
            ts_ms: base,
            bid_px: mid_ticks - 0.1,
            bid_sz: 0.5 + rng.unit() * 2.0,
            ask_px: mid_ticks + 0.1,
            ask_sz: 0.5 + rng.unit() * 2.0,
        }));
        let trades = 1 + rng.next_u32() % 6;
        for j in 0..trades {
            let offset = ((rng.unit() - 0.5) * 40.0).round() / 10.0;
            events.push(MarketEvent::Trade(Trade {
                ts_ms: base + 500 + j as i64 * 7_000,
                price: mid_ticks + offset,
                size: 0.001 + rng.unit() * 0.5,
            }));
        }
        if m % 3 == 0 {
            events.push(MarketEvent::Quote(Quote {
                ts_ms: base + 45_000,
                bid_px: mid_ticks - 0.2,
                bid_sz: 1.0,
                ask_px: mid_ticks + 0.1,
                ask_sz: 1.0 + rng.unit(),
            }));
        }
    }
    events
}

fn short_window_config() -> TraderConfig {
    let mut config = TraderConfig::default();
    config.instrument.rolling_window_minutes = 30;
    config.value_area.min_va_bins = 5;
    config.backtest.histogram_audit_minutes = 1;
    config.risk.cooldown_minutes = 1;
    config
}

#[test]
fn test_generated_replay_holds_all_invariants() {
    let config = short_window_config();
    let mut engine = ReplayEngine::new(&config).unwrap();
    for event in generated_events(180, 7) {
        engine.process_event(&event).unwrap();
        let histogram = engine.features().histogram();
        assert!(histogram.window_len() <= 30);
        assert!(histogram.aggregate().values().all(|v| *v >= 0));
    }
    assert!(engine.features().histogram().first_aggregate_mismatch().is_none());

    let output = engine.finish().unwrap();
    assert_eq!(output.invariant_counters.total_violations, 0);
    assert!(output.invariant_counters.histogram_checks >= 179);
    assert_eq!(output.invariant_counters.fill_checks, output.fills.len() as u64);
    for pair in output.signals.windows(2) {
        assert!(pair[1].decision_ts > pair[0].decision_ts);
    }
    for fill in &output.fills {
        assert!(fill.ts_ms > fill.decision_ts);
    }
}

#[test]
fn test_generated_replay_is_deterministic() {
    let config = short_window_config();
    let events = generated_events(120, 42);
    assert_eq!(run(&config, &events).unwrap(), run(&config, &events).unwrap());
}

#[test]
fn test_value_area_contains_poc_whenever_valid() {
    let config = short_window_config();
    let mut engine = ReplayEngine::new(&config).unwrap().with_feature_log();
    for event in generated_events(90, 3) {
        engine.process_event(&event).unwrap();
    }
    let output = engine.finish().unwrap();
    let valid: Vec<_> = output.features.iter().filter(|f| f.va.is_valid).collect();
    assert!(!valid.is_empty());
    for f in valid {
        assert!(f.va.val <= f.va.poc && f.va.poc <= f.va.vah);
        assert!(f.va.coverage >= config.value_area.va_fraction - 1e-9);
        assert!(f.window_minutes <= 30);
    }
}

/// Sparse bucketed histogram: keys are multiples of `k`, some interior
/// buckets left empty, a few zero entries kept explicitly.
fn generated_buckets(rng: &mut Lcg, k: i64) -> BTreeMap<Tick, Volume> {
    let base = 1_000 + (rng.next_u32() % 50) as i64;
    let span = 1 + (rng.next_u32() % 40) as i64;
    let mut buckets = BTreeMap::new();
    for i in 0..span {
        match rng.next_u32() % 6 {
            0 => {}
            1 => {
                buckets.insert((base + i) * k, 0);
            }
            _ => {
                buckets.insert((base + i) * k, 1 + (rng.next_u32() % 5_000) as Volume);
            }
        }
    }
    buckets.insert(base * k, 1 + (rng.next_u32() % 5_000) as Volume);
    buckets
}

#[test]
fn test_value_area_is_contiguous_and_minimal() {
    let mut rng = Lcg(11);
    for case in 0..500 {
        let k = 1 + (rng.next_u32() % 5) as i64;
        let buckets = generated_buckets(&mut rng, k);
        let fraction = 0.3 + 0.65 * rng.unit();
        let total: Volume = buckets.values().sum();
        let target = (fraction * total as f64).ceil() as Volume;
        let vol_at = |key: Tick| buckets.get(&key).copied().unwrap_or(0);

        let exp = expand_value_area(&buckets, k, fraction).unwrap();
        assert_eq!(exp.order[0], exp.poc_key, "case {}", case);
        assert!(exp.lo_key <= exp.poc_key && exp.poc_key <= exp.hi_key);

        // Each step extends the run by exactly one bucket at one end.
        let (mut lo, mut hi) = (exp.poc_key, exp.poc_key);
        for &key in &exp.order[1..] {
            if key == hi + k {
                hi = key;
            } else {
                assert_eq!(key, lo - k, "case {}: non-adjacent step", case);
                lo = key;
            }
        }
        assert_eq!((lo, hi), (exp.lo_key, exp.hi_key));
        assert_eq!(exp.order.len() as i64, (hi - lo) / k + 1);

        let run_volume: Volume = (0..exp.order.len() as i64).map(|i| vol_at(lo + i * k)).sum();
        assert_eq!(exp.covered, run_volume, "case {}", case);
        assert!(exp.covered >= target, "case {}: coverage short of target", case);

        if let Some(&last) = exp.order.last().filter(|_| exp.order.len() > 1) {
            assert!(
                exp.covered - vol_at(last) < target,
                "case {}: last bucket {} was not needed",
                case,
                last
            );
        }
    }
}

#[test]
fn test_histogram_eviction_keeps_window_bound() {
    let mut histogram = RollingHistogram::new(0.1, 2);
    for m in 0..3 {
        histogram.add_trade(100.0, 1.0);
        histogram.flush_minute(m * MILLIS_PER_MINUTE);
    }
    let mut enforcer = InvariantEnforcer::new(InvariantConfig::with_mode(InvariantMode::Hard));
    enforcer.check_histogram(&histogram, true).unwrap();
    assert_eq!(histogram.window_len(), 2);
}

#[test]
fn test_histogram_window_overflow_is_caught() {
    let mut histogram = RollingHistogram::new(0.1, 3);
    for m in 0..3 {
        histogram.add_trade(100.0, 1.0);
        histogram.flush_minute(m * MILLIS_PER_MINUTE);
    }
    histogram.shrink_bound_unchecked(2);

    let mut hard = InvariantEnforcer::new(InvariantConfig::with_mode(InvariantMode::Hard));
    let abort = hard.check_histogram(&histogram, false).unwrap_err();
    assert!(matches!(
        abort.dump.violation.violation_type,
        ViolationType::WindowOverflow { len: 3, max: 2 }
    ));

    let mut soft = InvariantEnforcer::new(InvariantConfig::with_mode(InvariantMode::Soft));
    assert!(soft.check_histogram(&histogram, false).is_ok());
    assert_eq!(soft.counters().total_violations, 1);
    assert!(matches!(
        soft.first_violation().map(|v| &v.violation_type),
        Some(ViolationType::WindowOverflow { len: 3, max: 2 })
    ));
}

#[test]
fn test_signal_time_must_increase() {
    let mut enforcer = InvariantEnforcer::new(InvariantConfig::default());
    enforcer.check_signal_time(59_999).unwrap();
    assert!(enforcer.check_signal_time(59_999).is_err());
}

#[test]
fn test_fill_at_decision_time_rejected() {
    let mut enforcer = InvariantEnforcer::new(InvariantConfig::default());
    assert!(enforcer.check_fill_after_decision(59_999, 60_000, 100.0).is_ok());
    assert!(enforcer.check_fill_after_decision(59_999, 59_999, 100.0).is_err());

    let mut soft = InvariantEnforcer::new(InvariantConfig::with_mode(InvariantMode::Soft));
    assert!(soft.check_fill_after_decision(59_999, 59_000, 100.0).is_ok());
    assert!(soft.first_violation().is_some());
    assert_eq!(soft.counters().total_violations, 1);
}
