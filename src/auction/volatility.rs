//! Rolling realized volatility of 1-minute log returns.
//!
//! Running sum and sum of squares over a fixed window; O(1) per minute.
//! A minute without trades contributes a zero return rather than being
//! skipped, so the window always spans the same wall time.

use std::collections::VecDeque;

#[derive(Debug, Clone)]
pub struct RollingVolatility {
    window: usize,
    returns: VecDeque<f64>,
    sum: f64,
    sum_sq: f64,
    last_price: Option<f64>,
}

impl RollingVolatility {
    pub fn new(window: usize) -> Self {
        Self {
            window: window.max(1),
            returns: VecDeque::with_capacity(window + 1),
            sum: 0.0,
            sum_sq: 0.0,
            last_price: None,
        }
    }

    /// Record a minute close. `traded` false forces a zero return.
    pub fn push_close(&mut self, mid_close: f64, traded: bool) {
        let Some(prev) = self.last_price else {
            if mid_close > 0.0 {
                self.last_price = Some(mid_close);
            }
            return;
        };

        let ret = if traded && mid_close > 0.0 && prev > 0.0 {
            (mid_close / prev).ln()
        } else {
            0.0
        };
        self.push_return(ret);

        if traded && mid_close > 0.0 {
            self.last_price = Some(mid_close);
        }
    }

    fn push_return(&mut self, ret: f64) {
        self.returns.push_back(ret);
        self.sum += ret;
        self.sum_sq += ret * ret;

        if self.returns.len() > self.window {
            if let Some(old) = self.returns.pop_front() {
                self.sum -= old;
                self.sum_sq -= old * old;
            }
        }
    }

    /// Population standard deviation of the retained returns.
    pub fn sigma(&self) -> Option<f64> {
        let n = self.returns.len();
        if n < 2 {
            return None;
        }
        let n = n as f64;
        let mean = self.sum / n;
        let variance = (self.sum_sq / n - mean * mean).max(0.0);
        Some(variance.sqrt())
    }

    pub fn len(&self) -> usize {
        self.returns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.returns.is_empty()
    }

    pub fn is_ready(&self) -> bool {
        self.returns.len() >= self.window
    }

    pub fn clear(&mut self) {
        self.returns.clear();
        self.sum = 0.0;
        self.sum_sq = 0.0;
        self.last_price = None;
    }
}
