//! Market data feeds.
//!
//! Replay pulls events one at a time through [`MarketDataFeed`]. Feeds hand
//! out events in canonical order `(ts_ms, quote-before-trade, arrival)`.
//!
//! On-disk format is JSON Lines, one [`MarketEvent`] per line:
//!
//! ```text
//! {"type":"quote","ts_ms":1700000000000,"bid_px":50000.0,"bid_sz":1.5,"ask_px":50000.1,"ask_sz":0.7}
//! {"type":"trade","ts_ms":1700000000120,"price":50000.1,"size":0.02}
//! ```

use crate::auction::clock::TimestampMs;
use crate::auction::error::{TraderError, TraderResult};
use crate::auction::events::{sort_events, MarketEvent};
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;
use tracing::info;

/// Source of market events for a replay.
pub trait MarketDataFeed: Send {
    /// Get the next event from the feed.
    fn next_event(&mut self) -> Option<MarketEvent>;

    /// Peek at the timestamp of the next event without consuming.
    fn peek_time(&self) -> Option<TimestampMs>;

    /// Reset the feed to the beginning (for multiple runs).
    fn reset(&mut self);

    /// Number of events remaining (if known).
    fn remaining(&self) -> Option<usize> {
        None
    }

    /// Feed identifier for logging/diagnostics.
    fn name(&self) -> &str {
        "unknown"
    }
}

/// A feed backed by an in-memory vector of events.
#[derive(Debug)]
pub struct VecFeed {
    events: Vec<MarketEvent>,
    index: usize,
    name: String,
}

impl VecFeed {
    pub fn new(name: impl Into<String>, mut events: Vec<MarketEvent>) -> Self {
        sort_events(&mut events);
        Self {
            events,
            index: 0,
            name: name.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn events(&self) -> &[MarketEvent] {
        &self.events
    }
}

impl MarketDataFeed for VecFeed {
    fn next_event(&mut self) -> Option<MarketEvent> {
        let event = self.events.get(self.index).copied();
        if event.is_some() {
            self.index += 1;
        }
        event
    }

    fn peek_time(&self) -> Option<TimestampMs> {
        self.events.get(self.index).map(|e| e.ts_ms())
    }

    fn reset(&mut self) {
        self.index = 0;
    }

    fn remaining(&self) -> Option<usize> {
        Some(self.events.len().saturating_sub(self.index))
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Parse JSON Lines from any reader. Blank lines and `#` comments are
/// skipped; anything else that fails to parse aborts with the line number.
pub fn parse_jsonl<R: Read>(reader: R) -> TraderResult<Vec<MarketEvent>> {
    let mut events = Vec::new();
    for (idx, line) in BufReader::new(reader).lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let event: MarketEvent = serde_json::from_str(trimmed)
            .map_err(|e| TraderError::Data(format!("line {}: {}", idx + 1, e)))?;
        events.push(event);
    }
    Ok(events)
}

/// Load a JSONL file into a sorted in-memory feed.
pub fn load_jsonl(path: impl AsRef<Path>) -> TraderResult<VecFeed> {
    let path = path.as_ref();
    let events = parse_jsonl(File::open(path)?)?;
    info!(path = %path.display(), events = events.len(), "Loaded market data");
    Ok(VecFeed::new(path.display().to_string(), events))
}

/// Write events as JSON Lines.
pub fn write_jsonl<W: std::io::Write>(mut writer: W, events: &[MarketEvent]) -> TraderResult<()> {
    for event in events {
        serde_json::to_writer(&mut writer, event)?;
        writer.write_all(b"\n")?;
    }
    Ok(())
}

/// Iterator adapter for MarketDataFeed.
pub struct FeedIterator<'a, F: MarketDataFeed + ?Sized> {
    feed: &'a mut F,
}

impl<'a, F: MarketDataFeed + ?Sized> Iterator for FeedIterator<'a, F> {
    type Item = MarketEvent;

    fn next(&mut self) -> Option<Self::Item> {
        self.feed.next_event()
    }
}

/// Extension trait to get an iterator from a feed.
pub trait MarketDataFeedExt: MarketDataFeed {
    fn iter(&mut self) -> FeedIterator<'_, Self> {
        FeedIterator { feed: self }
    }
}

impl<T: MarketDataFeed + ?Sized> MarketDataFeedExt for T {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auction::events::{Quote, Trade};

    #[test]
    fn test_vec_feed_orders_quote_before_trade() {
        let events = vec![
            MarketEvent::Trade(Trade { ts_ms: 10, price: 1.0, size: 1.0 }),
            MarketEvent::Quote(Quote { ts_ms: 10, bid_px: 0.9, bid_sz: 1.0, ask_px: 1.1, ask_sz: 1.0 }),
            MarketEvent::Trade(Trade { ts_ms: 5, price: 1.0, size: 2.0 }),
        ];
        let mut feed = VecFeed::new("test", events);
        assert_eq!(feed.remaining(), Some(3));
        assert_eq!(feed.peek_time(), Some(5));

        let kinds: Vec<u8> = feed.iter().map(|e| e.rank()).collect();
        assert_eq!(kinds, vec![1, 0, 1]);
        assert_eq!(feed.remaining(), Some(0));

        feed.reset();
        assert_eq!(feed.remaining(), Some(3));
    }

    #[test]
    fn test_parse_jsonl() {
        let input = "\
# sample
{\"type\":\"quote\",\"ts_ms\":0,\"bid_px\":100.0,\"bid_sz\":1.0,\"ask_px\":100.5,\"ask_sz\":2.0}

{\"type\":\"trade\",\"ts_ms\":5,\"price\":100.5,\"size\":0.25}
";
        let events = parse_jsonl(input.as_bytes()).unwrap();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[1], MarketEvent::Trade(t) if t.size == 0.25));
    }

    #[test]
    fn test_parse_jsonl_reports_line() {
        let input = "{\"type\":\"trade\",\"ts_ms\":5,\"price\":1.0,\"size\":1.0}\nnot json\n";
        match parse_jsonl(input.as_bytes()) {
            Err(TraderError::Data(msg)) => assert!(msg.starts_with("line 2")),
            other => panic!("expected data error, got {:?}", other.map(|e| e.len())),
        }
    }

    #[test]
    fn test_jsonl_file_roundtrip() {
        let events = vec![
            MarketEvent::Quote(Quote { ts_ms: 0, bid_px: 99.0, bid_sz: 1.0, ask_px: 101.0, ask_sz: 1.0 }),
            MarketEvent::Trade(Trade { ts_ms: 1, price: 100.0, size: 0.5 }),
        ];
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.jsonl");
        write_jsonl(File::create(&path).unwrap(), &events).unwrap();

        let feed = load_jsonl(&path).unwrap();
        assert_eq!(feed.events(), events.as_slice());
    }
}
