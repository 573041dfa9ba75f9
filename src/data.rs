//! Data loading and replay
//!
//! Loads OHLCV bars from CSV and replays them through the `MarketFeed`
//! interface, with indicator snapshots precomputed over the whole series.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::path::Path;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::FeedError;
use crate::exchange::{IndicatorPair, IndicatorSnapshot, MarketFeed};
use crate::indicators;
use crate::{Candle, Quote};

// =============================================================================
// CSV Data Loading
// =============================================================================

fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
    s.parse::<DateTime<Utc>>()
        .or_else(|_| {
            chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
                .map(|ndt| DateTime::<Utc>::from_naive_utc_and_offset(ndt, Utc))
        })
        .with_context(|| format!("Failed to parse datetime: {}", s))
}

fn parse_field(record: &csv::StringRecord, idx: usize, name: &str) -> Result<f64> {
    record
        .get(idx)
        .with_context(|| format!("Missing {} column", name))?
        .trim()
        .parse()
        .with_context(|| format!("Failed to parse {}", name))
}

/// Load OHLCV data from a CSV file with a header row:
/// `datetime,open,high,low,close,volume`
pub fn load_csv(path: impl AsRef<Path>) -> Result<Vec<Candle>> {
    let path = path.as_ref();
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("Failed to open CSV file {}", path.display()))?;

    let mut candles = Vec::new();
    let mut skipped = 0usize;

    for (row_idx, result) in reader.records().enumerate() {
        let record = result.with_context(|| format!("Failed to read row {}", row_idx + 1))?;

        let datetime = parse_datetime(record.get(0).context("Missing datetime column")?)?;
        let candle = Candle::new_unchecked(
            datetime,
            parse_field(&record, 1, "open")?,
            parse_field(&record, 2, "high")?,
            parse_field(&record, 3, "low")?,
            parse_field(&record, 4, "close")?,
            parse_field(&record, 5, "volume")?,
        );

        match candle.validate() {
            Ok(()) => candles.push(candle),
            Err(e) => {
                warn!(row = row_idx + 1, error = %e, "Skipping invalid candle");
                skipped += 1;
            }
        }
    }

    debug!(
        path = %path.display(),
        loaded = candles.len(),
        skipped,
        "Loaded candles"
    );

    Ok(candles)
}

/// Aggregate consecutive groups of `factor` bars into higher-timeframe bars.
/// A trailing partial group is dropped.
pub fn resample(candles: &[Candle], factor: usize) -> Vec<Candle> {
    if factor == 0 {
        return vec![];
    }

    candles
        .chunks_exact(factor)
        .map(|group| {
            let first = &group[0];
            let last = &group[group.len() - 1];
            let high = group.iter().map(|c| c.high).fold(f64::MIN, f64::max);
            let low = group.iter().map(|c| c.low).fold(f64::MAX, f64::min);
            let volume = group.iter().map(|c| c.volume).sum();
            Candle::new_unchecked(first.datetime, first.open, high, low, last.close, volume)
        })
        .collect()
}

/// Quote path through a bar: open, the nearer extreme, the far extreme, close
pub fn intrabar_quotes(bar: &Candle, spread: f64) -> Vec<Quote> {
    let quote = |price: f64| Quote {
        bid: price,
        ask: price + spread,
        time: bar.datetime,
    };

    let (first, second) = if bar.close >= bar.open {
        (bar.low, bar.high)
    } else {
        (bar.high, bar.low)
    };

    vec![quote(bar.open), quote(first), quote(second), quote(bar.close)]
}

// =============================================================================
// Replay Feed
// =============================================================================

/// Replays a bar series, revealing one closed bar per `advance`
#[derive(Debug, Clone)]
pub struct ReplayFeed {
    candles: Vec<Candle>,
    /// Number of bars already closed and visible
    cursor: usize,
    spread: f64,
    quote: Option<Quote>,
    atr: Vec<Option<f64>>,
    ma: Vec<Option<f64>>,
    adx: Vec<Option<f64>>,
    plus_di: Vec<Option<f64>>,
    minus_di: Vec<Option<f64>>,
    rsi: Vec<Option<f64>>,
    htf_ma: Vec<Option<IndicatorPair>>,
}

impl ReplayFeed {
    pub fn new(candles: Vec<Candle>, config: &Config, spread: f64) -> Self {
        let ind = &config.indicators;
        let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();

        let (plus_di, minus_di) = indicators::dmi(&candles, ind.adx_period);
        let adx = indicators::adx_from_di(&plus_di, &minus_di, ind.adx_period);

        let htf_ma = if config.multi_timeframe.enabled {
            htf_ma_series(
                &candles,
                config.multi_timeframe.timeframe_factor,
                config.multi_timeframe.ma_period,
            )
        } else {
            vec![None; candles.len()]
        };

        Self {
            atr: indicators::atr(&candles, ind.atr_period),
            ma: indicators::sma(&closes, ind.ma_period),
            rsi: indicators::rsi(&closes, ind.rsi_period),
            adx,
            plus_di,
            minus_di,
            htf_ma,
            candles,
            cursor: 0,
            spread,
            quote: None,
        }
    }

    /// Start with `bars` already closed
    pub fn with_warmup(mut self, bars: usize) -> Self {
        self.cursor = bars.min(self.candles.len());
        self.quote = self.last_close_quote();
        self
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn is_finished(&self) -> bool {
        self.cursor >= self.candles.len()
    }

    /// The bar that will close on the next `advance`
    pub fn forming_bar(&self) -> Option<&Candle> {
        self.candles.get(self.cursor)
    }

    /// Close the forming bar and quote at its close
    pub fn advance(&mut self) -> Option<&Candle> {
        if self.is_finished() {
            return None;
        }
        self.cursor += 1;
        self.quote = self.last_close_quote();
        self.candles.get(self.cursor - 1)
    }

    /// Override the current quote (intrabar replay)
    pub fn set_quote(&mut self, quote: Quote) {
        self.quote = Some(quote);
    }

    fn last_close_quote(&self) -> Option<Quote> {
        self.cursor.checked_sub(1).map(|i| {
            let c = &self.candles[i];
            Quote {
                bid: c.close,
                ask: c.close + self.spread,
                time: c.datetime,
            }
        })
    }

    fn pair(&self, series: &[Option<f64>], name: &'static str) -> Result<IndicatorPair, FeedError> {
        let idx = self
            .cursor
            .checked_sub(1)
            .ok_or(FeedError::IndicatorUnavailable(name))?;
        let current = series
            .get(idx)
            .copied()
            .flatten()
            .ok_or(FeedError::IndicatorUnavailable(name))?;
        let previous = idx
            .checked_sub(1)
            .and_then(|p| series.get(p).copied().flatten())
            .unwrap_or(current);
        Ok(IndicatorPair::new(current, previous))
    }
}

/// Higher-timeframe SMA aligned to primary bars: each primary bar sees the
/// MA of the HTF bars completed at or before it
fn htf_ma_series(candles: &[Candle], factor: usize, period: usize) -> Vec<Option<IndicatorPair>> {
    let htf = resample(candles, factor);
    let closes: Vec<f64> = htf.iter().map(|c| c.close).collect();
    let ma = indicators::sma(&closes, period);

    (0..candles.len())
        .map(|i| {
            let completed = (i + 1) / factor.max(1);
            let k = completed.checked_sub(1)?;
            let current = ma.get(k).copied().flatten()?;
            let previous = k
                .checked_sub(1)
                .and_then(|p| ma.get(p).copied().flatten())
                .unwrap_or(current);
            Some(IndicatorPair::new(current, previous))
        })
        .collect()
}

impl MarketFeed for ReplayFeed {
    fn bars(&self, count: usize, offset: usize) -> Result<Vec<Candle>, FeedError> {
        let needed = count + offset;
        if needed > self.cursor {
            return Err(FeedError::InsufficientHistory {
                needed,
                available: self.cursor,
            });
        }
        let end = self.cursor - offset;
        Ok(self.candles[end - count..end].to_vec())
    }

    fn quote(&self) -> Result<Quote, FeedError> {
        self.quote.ok_or(FeedError::NoQuote)
    }

    fn indicators(&self) -> Result<IndicatorSnapshot, FeedError> {
        let htf_ma = self
            .cursor
            .checked_sub(1)
            .and_then(|i| self.htf_ma.get(i).copied().flatten());

        Ok(IndicatorSnapshot {
            atr: self.pair(&self.atr, "atr")?,
            ma: self.pair(&self.ma, "ma")?,
            adx: self.pair(&self.adx, "adx")?,
            plus_di: self.pair(&self.plus_di, "plus_di")?,
            minus_di: self.pair(&self.minus_di, "minus_di")?,
            rsi: self.pair(&self.rsi, "rsi")?,
            htf_ma,
        })
    }
}

// =============================================================================
// Tests
// =============================================================================
