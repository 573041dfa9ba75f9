//! Closed-position reporting

use anyhow::{Context, Result};
use serde::Serialize;
use std::cell::RefCell;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use tracing::debug;

use crate::oms::PositionRecord;

/// Receives each position record once it is finalized
pub trait ReportSink {
    fn record_closed(&mut self, record: &PositionRecord) -> Result<()>;
}

/// Flat CSV row for a closed position
#[derive(Debug, Serialize)]
struct ClosedRow {
    position_id: u64,
    side: String,
    open_time: String,
    close_time: String,
    entry_price: f64,
    close_price: f64,
    volume: f64,
    initial_stop: f64,
    initial_target: f64,
    last_stop: f64,
    profit: String,
    pips: f64,
    stop_hit: bool,
    target_hit: bool,
    trailing_applied: bool,
    needs_attention: bool,
    adopted: bool,
    trend: String,
    volatility: String,
    risk_percent: f64,
    tier: u8,
}

impl ClosedRow {
    fn from_record(record: &PositionRecord) -> Option<Self> {
        let close = record.close.as_ref()?;
        Some(Self {
            position_id: record.id,
            side: record.side.to_string(),
            open_time: record.open_time.to_rfc3339(),
            close_time: close.time.to_rfc3339(),
            entry_price: record.entry_price,
            close_price: close.price,
            volume: record.volume,
            initial_stop: record.initial_stop,
            initial_target: record.initial_target,
            last_stop: record.last_stop,
            profit: close.profit.to_string(),
            pips: close.pips,
            stop_hit: close.stop_hit,
            target_hit: close.target_hit,
            trailing_applied: record.trailing_applied,
            needs_attention: close.needs_attention,
            adopted: record.adopted,
            trend: format!("{:?}", record.regime.trend),
            volatility: format!("{:?}", record.regime.volatility),
            risk_percent: record.risk_percent,
            tier: record.tier,
        })
    }
}

/// Appends closed positions to a CSV file, writing the header once
pub struct CsvReportSink {
    path: PathBuf,
}

impl CsvReportSink {
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create report dir {}", parent.display()))?;
        }
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ReportSink for CsvReportSink {
    fn record_closed(&mut self, record: &PositionRecord) -> Result<()> {
        let Some(row) = ClosedRow::from_record(record) else {
            return Ok(());
        };

        let write_header = std::fs::metadata(&self.path)
            .map(|m| m.len() == 0)
            .unwrap_or(true);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open report {}", self.path.display()))?;

        let mut writer = csv::WriterBuilder::new()
            .has_headers(write_header)
            .from_writer(file);
        writer.serialize(&row).context("Failed to write report row")?;
        writer.flush()?;

        debug!(position_id = record.id, path = %self.path.display(), "Closed position reported");
        Ok(())
    }
}

/// Keeps reported records in memory. Clones share the same buffer, so a
/// handle kept by the caller sees what the engine reported.
#[derive(Debug, Default, Clone)]
pub struct MemoryReportSink {
    records: Rc<RefCell<Vec<PositionRecord>>>,
}

impl MemoryReportSink {
    pub fn records(&self) -> Vec<PositionRecord> {
        self.records.borrow().clone()
    }
}

impl ReportSink for MemoryReportSink {
    fn record_closed(&mut self, record: &PositionRecord) -> Result<()> {
        self.records.borrow_mut().push(record.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::FillAck;
    use crate::oms::CloseFacts;
    use crate::risk::DynamicParams;
    use crate::{MarketRegime, Money, Side};
    use chrono::Utc;

    fn closed(id: u64) -> PositionRecord {
        let ack = FillAck {
            position_id: id,
            side: Side::Long,
            volume: 0.5,
            entry_price: 1.1,
            stop: 1.09,
            target: 1.12,
            time: Utc::now(),
        };
        let params = DynamicParams {
            risk_percent: 1.0,
            adx_threshold: 25.0,
            rsi_oversold: 30.0,
            rsi_overbought: 70.0,
            tier: 0,
        };
        let mut r = PositionRecord::from_fill(&ack, MarketRegime::default(), &params);
        r.finalize(CloseFacts {
            time: Utc::now(),
            price: 1.12,
            profit: Money::from_f64(1000.0),
            pips: 200.0,
            stop_hit: false,
            target_hit: true,
            needs_attention: false,
        });
        r
    }

    #[test]
    fn test_csv_sink_appends_with_single_header() {
        let path = std::env::temp_dir().join(format!("lt_report_{}.csv", std::process::id()));
        std::fs::remove_file(&path).ok();

        let mut sink = CsvReportSink::new(&path).unwrap();
        sink.record_closed(&closed(1)).unwrap();
        sink.record_closed(&closed(2)).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        std::fs::remove_file(&path).ok();

        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("position_id,side"));
        assert!(lines[2].starts_with("2,long"));
    }
}
