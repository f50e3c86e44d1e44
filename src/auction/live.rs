//! Live queue boundary.
//!
//! The feed handler pushes events into a bounded `mpsc` queue in arrival
//! order; a single consumer drains it through the same `ReplayEngine` used
//! for backtests. Receiving from the queue is the only await point, so the
//! pipeline itself stays synchronous and deterministic for a given arrival
//! sequence.
//!
//! Reconciliation runs elsewhere and only ever talks to the pipeline through
//! the `watch` halt channel: `true` blocks new entries, `false` re-arms them.

use crate::auction::config::TraderConfig;
use crate::auction::error::TraderResult;
use crate::auction::events::MarketEvent;
use crate::auction::replay::{ReplayEngine, RunOutput};
use tokio::sync::{mpsc, watch};
use tracing::info;

/// Producer side handed to the feed handler and the reconciler.
pub struct LiveHandles {
    pub events: mpsc::Sender<MarketEvent>,
    pub halt: watch::Sender<bool>,
}

pub struct LiveRunner {
    engine: ReplayEngine,
    events: mpsc::Receiver<MarketEvent>,
    halt: watch::Receiver<bool>,
}

impl LiveRunner {
    /// Build a runner and its producer handles. `capacity` bounds the queue.
    pub fn new(config: &TraderConfig, capacity: usize) -> TraderResult<(Self, LiveHandles)> {
        let engine = ReplayEngine::new(config)?;
        let (event_tx, event_rx) = mpsc::channel(capacity.max(1));
        let (halt_tx, halt_rx) = watch::channel(false);
        Ok((
            Self {
                engine,
                events: event_rx,
                halt: halt_rx,
            },
            LiveHandles {
                events: event_tx,
                halt: halt_tx,
            },
        ))
    }

    /// Consume until every sender is dropped, then close out the run.
    pub async fn run(mut self) -> TraderResult<RunOutput> {
        info!("Live pipeline started");
        while let Some(event) = self.events.recv().await {
            let halted = *self.halt.borrow_and_update();
            if halted != self.engine.signals().is_halted() {
                self.engine.set_halted(halted);
            }
            self.engine.process_event(&event)?;
        }
        info!("Event queue closed, finishing");
        self.engine.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auction::replay::run;
    use crate::auction::replay_tests::{scenario_config, scenario_events};

    #[tokio::test]
    async fn test_live_matches_replay() {
        let config = scenario_config(1);
        let events = scenario_events();
        let (runner, handles) = LiveRunner::new(&config, 16).unwrap();
        let task = tokio::spawn(runner.run());

        for event in &events {
            handles.events.send(*event).await.unwrap();
        }
        drop(handles);

        let live = task.await.unwrap().unwrap();
        assert_eq!(live, run(&config, &events).unwrap());
        assert_eq!(live.trades.len(), 1);
    }

    #[tokio::test]
    async fn test_halt_channel_blocks_entries() {
        let config = scenario_config(0);
        let (runner, handles) = LiveRunner::new(&config, 4).unwrap();
        handles.halt.send(true).unwrap();
        let task = tokio::spawn(runner.run());

        for event in scenario_events() {
            handles.events.send(event).await.unwrap();
        }
        drop(handles);

        let output = task.await.unwrap().unwrap();
        assert!(output.signals.is_empty());
        assert_eq!(output.signal_stats.suppressed_halt, 1);
    }
}
