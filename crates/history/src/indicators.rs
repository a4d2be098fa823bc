use common::{Bar, Price};

/// Pure indicator surface over a descending-time bar window.
///
/// Implemented on bare slices so sub-windows compose naturally:
/// `bars[0..20].sma(Price::C)`, `bars[1..15].atr()`. Every function is
/// total — an empty window returns the documented sentinel instead of
/// failing (0.0 for averages, -1/-1.0 for scans, false for predicates).
pub trait Indicators {
    /// Simple moving average over the whole window.
    fn sma(&self, mode: Price) -> f64;

    /// Linearly weighted moving average; the newest bar carries the highest
    /// weight. Returns -1.0 for an empty window.
    fn lwma(&self, mode: Price) -> f64;

    /// Exponential moving average seeded with the window SMA, smoothing
    /// k = 2/(N+1) applied oldest to newest.
    fn ema(&self, mode: Price) -> f64;

    /// Mean bar range (high - low) over the window.
    fn atr(&self) -> f64;

    /// Population standard deviation of the chosen price column.
    fn st_dev(&self, mode: Price) -> f64;

    /// Highest high minus lowest low of the window.
    fn spread(&self) -> f64;

    fn highest(&self, mode: Price) -> f64;
    fn highest_idx(&self, mode: Price) -> isize;
    fn lowest(&self, mode: Price) -> f64;
    fn lowest_idx(&self, mode: Price) -> isize;

    /// Index of the most recent bull / bear bar, -1 when none.
    fn last_bull_idx(&self) -> isize;
    fn last_bear_idx(&self) -> isize;

    /// Relative Strength Index on close-to-close changes. 0.0 until
    /// `period + 1` bars are available; 100.0 when there are no losses.
    fn rsi(&self, period: usize) -> f64;

    /// Stochastic oscillator: raw %K and the 3-sample smoothed %D.
    fn stochastic(&self, period: usize) -> (f64, f64);

    /// Bullish / bearish engulfing over the two newest bars.
    fn is_engulf_buy(&self) -> bool;
    fn is_engulf_sell(&self) -> bool;

    /// Pinbar reversal shapes on the newest bar: the rejection wick at least
    /// twice the body, the opposite wick smaller than the body, close in the
    /// outer third of the range.
    fn is_pinbar_buy(&self) -> bool;
    fn is_pinbar_sell(&self) -> bool;

    /// TD Sequential count on the newest bar: 1 / -1 for a completed 9-count
    /// up / down, 2 / -2 when the count is "perfect", 0 otherwise.
    fn td_sequential(&self) -> i32;
}

impl Indicators for [Bar] {
    fn sma(&self, mode: Price) -> f64 {
        if self.is_empty() {
            return 0.0;
        }
        self.iter().map(|b| b.mode(mode)).sum::<f64>() / self.len() as f64
    }

    fn lwma(&self, mode: Price) -> f64 {
        let period = self.len();
        let mut sum = 0.0;
        let mut weight = 0.0;
        for (i, bar) in self.iter().enumerate() {
            let w = (period - i) as f64;
            weight += w;
            sum += bar.mode(mode) * w;
        }
        if weight > 0.0 {
            sum / weight
        } else {
            -1.0
        }
    }

    fn ema(&self, mode: Price) -> f64 {
        if self.is_empty() {
            return 0.0;
        }
        let k = 2.0 / (self.len() as f64 + 1.0);
        let mut value = self.sma(mode);
        for bar in self.iter().rev() {
            value = bar.mode(mode) * k + value * (1.0 - k);
        }
        value
    }

    fn atr(&self) -> f64 {
        if self.is_empty() {
            return 0.0;
        }
        self.iter().map(Bar::range).sum::<f64>() / self.len() as f64
    }

    fn st_dev(&self, mode: Price) -> f64 {
        if self.is_empty() {
            return 0.0;
        }
        let mean = self.sma(mode);
        let var = self
            .iter()
            .map(|b| {
                let d = b.mode(mode) - mean;
                d * d
            })
            .sum::<f64>()
            / self.len() as f64;
        var.sqrt()
    }

    fn spread(&self) -> f64 {
        self.highest(Price::H) - self.lowest(Price::L)
    }

    fn highest(&self, mode: Price) -> f64 {
        let mut highest = -1.0;
        for bar in self {
            let v = bar.mode(mode);
            if highest == -1.0 || v > highest {
                highest = v;
            }
        }
        highest
    }

    fn highest_idx(&self, mode: Price) -> isize {
        let mut idx = -1;
        let mut highest = -1.0;
        for (i, bar) in self.iter().enumerate() {
            let v = bar.mode(mode);
            if highest == -1.0 || v > highest {
                highest = v;
                idx = i as isize;
            }
        }
        idx
    }

    fn lowest(&self, mode: Price) -> f64 {
        let mut lowest = -1.0;
        for bar in self {
            let v = bar.mode(mode);
            if lowest == -1.0 || v < lowest {
                lowest = v;
            }
        }
        lowest
    }

    fn lowest_idx(&self, mode: Price) -> isize {
        let mut idx = -1;
        let mut lowest = -1.0;
        for (i, bar) in self.iter().enumerate() {
            let v = bar.mode(mode);
            if lowest == -1.0 || v < lowest {
                lowest = v;
                idx = i as isize;
            }
        }
        idx
    }

    fn last_bull_idx(&self) -> isize {
        self.iter()
            .position(Bar::bull)
            .map(|i| i as isize)
            .unwrap_or(-1)
    }

    fn last_bear_idx(&self) -> isize {
        self.iter()
            .position(Bar::bear)
            .map(|i| i as isize)
            .unwrap_or(-1)
    }

    fn rsi(&self, period: usize) -> f64 {
        if period == 0 || self.len() < period + 1 {
            return 0.0;
        }
        let mut gains = 0.0;
        let mut losses = 0.0;
        for i in 1..=period {
            let change = self[i - 1].close - self[i].close;
            if change > 0.0 {
                gains += change;
            } else {
                losses -= change;
            }
        }
        if losses == 0.0 {
            return 100.0;
        }
        let rs = gains / losses;
        100.0 - 100.0 / (1.0 + rs)
    }

    fn stochastic(&self, period: usize) -> (f64, f64) {
        fn percent_k(bars: &[Bar], period: usize) -> f64 {
            let window = &bars[..period];
            let low = window.lowest(Price::L);
            let high = window.highest(Price::H);
            if high - low == 0.0 {
                return 0.0;
            }
            100.0 * ((bars[0].close - low) / (high - low))
        }

        if period == 0 || self.len() < period {
            return (0.0, 0.0);
        }
        let k = percent_k(self, period);
        if self.len() < period + 2 {
            return (k, k);
        }
        let k2 = percent_k(&self[1..], period);
        let k3 = percent_k(&self[2..], period);
        (k, (k + k2 + k3) / 3.0)
    }

    fn is_engulf_buy(&self) -> bool {
        if self.len() < 2 {
            return false;
        }
        let (cur, prev) = (&self[0], &self[1]);
        prev.bear() && cur.bull() && prev.body() < cur.body() && cur.close > prev.body_high()
    }

    fn is_engulf_sell(&self) -> bool {
        if self.len() < 2 {
            return false;
        }
        let (cur, prev) = (&self[0], &self[1]);
        prev.bull() && cur.bear() && prev.body() < cur.body() && cur.close < prev.body_low()
    }

    fn is_pinbar_buy(&self) -> bool {
        let Some(bar) = self.first() else {
            return false;
        };
        if bar.body() == 0.0 {
            return false;
        }
        bar.wick_dn() / bar.body() >= 2.0 && bar.wick_up() / bar.body() < 1.0 && bar.bullish()
    }

    fn is_pinbar_sell(&self) -> bool {
        let Some(bar) = self.first() else {
            return false;
        };
        if bar.body() == 0.0 {
            return false;
        }
        bar.wick_up() / bar.body() >= 2.0 && bar.wick_dn() / bar.body() < 1.0 && bar.bearish()
    }

    fn td_sequential(&self) -> i32 {
        if self.len() < 5 {
            return 0;
        }
        let n = self.len();
        let mut up = vec![0i32; n];
        let mut dn = vec![0i32; n];

        for i in (0..=n - 5).rev() {
            let is_up = self[i].close > self[i + 4].close;
            let is_dn = self[i].close < self[i + 4].close;

            if is_up {
                dn[i] = 0;
                up[i] = if up[i + 1] < 9 { up[i + 1] + 1 } else { 0 };
                // perfect count: the last lows undercut the reference lows
                if up[i] == 9
                    && (self[i + 1].low <= self[i + 3].low || self[i].low <= self[i + 2].low)
                {
                    up[i] = 10;
                }
            }

            if is_dn {
                up[i] = 0;
                dn[i] = if dn[i + 1] < 9 { dn[i + 1] + 1 } else { 0 };
                if dn[i] == 9
                    && (self[i + 1].low >= self[i + 3].low || self[i].low >= self[i + 2].low)
                {
                    dn[i] = 10;
                }
            }
        }

        match (up[0], dn[0]) {
            (9, _) => 1,
            (10, _) => 2,
            (_, 9) => -1,
            (_, 10) => -2,
            _ => 0,
        }
    }
}
