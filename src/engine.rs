//! Trading engine
//!
//! Wires classification, adaptive risk, signal detection, sizing and the
//! position lifecycle to the host's feed, venue and account. The host calls
//! three handlers:
//!
//! - `on_tick`: stop trailing and closure detection
//! - `on_bar`: classification, entry check, detection, sizing and entry
//! - `on_timer`: drift repair, analytics and checkpointing
//!
//! Each handler runs to completion on `&mut self`.

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::analytics::{self, PerformanceSnapshot, ANALYTICS_WINDOW};
use crate::config::Config;
use crate::error::{EngineError, SizingError};
use crate::exchange::{Account, IndicatorSnapshot, MarketFeed, Venue};
use crate::oms::{EntryPlan, PositionManager, PositionRecord};
use crate::regime::classify;
use crate::report::ReportSink;
use crate::risk::{AdaptiveState, DynamicParams, EntryGate, RiskController, TradeOutcome};
use crate::sizing::PositionSizer;
use crate::state_manager::{Checkpoint, SqliteStateManager};
use crate::strategy::LiquidityTrapStrategy;
use crate::{MarketRegime, PositionId, Quote};

/// What `on_bar` did with the latest closed bar
#[derive(Debug, Clone, PartialEq)]
pub enum BarDecision {
    /// Bar already handled, or data unavailable this cycle
    Skipped(&'static str),
    Paused { bars_elapsed: u32 },
    /// Open-position limit or volatility gate
    Blocked(&'static str),
    NoSetup,
    SizingFailed(SizingError),
    Rejected(String),
    Opened(PositionId),
}

fn init_error(what: &str, err: impl std::fmt::Display) -> EngineError {
    EngineError::Init(format!("{what}: {err:#}"))
}

/// Liquidity trap trading engine
pub struct Engine<F: MarketFeed, V: Venue, A: Account> {
    config: Config,
    config_hash: String,
    feed: F,
    venue: V,
    account: A,
    risk: RiskController,
    sizer: PositionSizer,
    strategy: LiquidityTrapStrategy,
    positions: PositionManager,
    state: AdaptiveState,
    regime: MarketRegime,
    params: DynamicParams,
    last_bar_time: Option<DateTime<Utc>>,
    last_snapshot: Option<PerformanceSnapshot>,
    store: Option<SqliteStateManager>,
    report: Option<Box<dyn ReportSink>>,
}

impl<F: MarketFeed, V: Venue, A: Account> Engine<F, V, A> {
    /// Engine without persistence. Live positions at the venue are adopted.
    pub fn new(config: Config, feed: F, venue: V, account: A) -> Result<Self, EngineError> {
        Self::build(config, feed, venue, account, None)
    }

    /// Engine that restores records and counters from `store` before adopting
    /// live positions it has no record of
    pub fn with_state_manager(
        config: Config,
        feed: F,
        venue: V,
        account: A,
        store: SqliteStateManager,
    ) -> Result<Self, EngineError> {
        Self::build(config, feed, venue, account, Some(store))
    }

    fn build(
        config: Config,
        feed: F,
        venue: V,
        account: A,
        store: Option<SqliteStateManager>,
    ) -> Result<Self, EngineError> {
        config.validate().map_err(|e| init_error("invalid configuration", e))?;

        let spec = account.symbol_spec();
        if spec.point <= 0.0 || spec.tick_size <= 0.0 || spec.tick_value <= 0.0 {
            return Err(EngineError::Init(format!(
                "invalid symbol economics for {}: point={}, tick_size={}, tick_value={}",
                spec.name, spec.point, spec.tick_size, spec.tick_value
            )));
        }

        let config_hash = config.fingerprint();
        let (positions, state) = match &store {
            Some(store) => {
                let records = store
                    .load_records()
                    .map_err(|e| init_error("loading position records", e))?;
                let state = match store
                    .load_checkpoint()
                    .map_err(|e| init_error("loading checkpoint", e))?
                {
                    Some(ckpt) => {
                        if ckpt.config_hash != config_hash {
                            warn!(
                                saved = %ckpt.config_hash,
                                current = %config_hash,
                                "Configuration changed since last checkpoint"
                            );
                        }
                        ckpt.adaptive_state()
                    }
                    None => AdaptiveState::default(),
                };
                info!(records = records.len(), losses = state.consecutive_losses, "State restored");
                (PositionManager::restore(records), state)
            }
            None => (PositionManager::new(), AdaptiveState::default()),
        };

        let risk = RiskController::from_config(&config);
        let params = risk.derive(&state);
        let regime = match (feed.indicators(), feed.quote()) {
            (Ok(snapshot), Ok(quote)) => classify(
                &snapshot,
                quote.bid,
                params.adx_threshold,
                config.multi_timeframe.enabled,
            ),
            _ => MarketRegime::default(),
        };

        let mut engine = Self {
            sizer: PositionSizer::new(config.risk.reference_currency.clone()),
            strategy: LiquidityTrapStrategy::new(config.signal.clone()),
            config,
            config_hash,
            feed,
            venue,
            account,
            risk,
            positions,
            state,
            regime,
            params,
            last_bar_time: None,
            last_snapshot: None,
            store,
            report: None,
        };

        let adopted = engine
            .positions
            .adopt_existing(
                &engine.venue,
                engine.regime,
                engine.risk.base_risk_percent(),
                engine.params.tier,
            )
            .map_err(|e| init_error("listing live positions", e))?;
        if adopted > 0 {
            let records: Vec<PositionRecord> = engine
                .positions
                .records()
                .filter(|r| r.adopted && r.is_open())
                .cloned()
                .collect();
            for record in &records {
                engine.persist(record);
            }
        }

        info!(
            symbol = %engine.account.symbol_spec().name,
            tracked = engine.positions.tracked_count(),
            adopted,
            regime = %engine.regime,
            "Engine initialized"
        );
        Ok(engine)
    }

    /// Send every closed record to `sink`
    pub fn with_report_sink(mut self, sink: Box<dyn ReportSink>) -> Self {
        self.report = Some(sink);
        self
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn feed(&self) -> &F {
        &self.feed
    }

    pub fn feed_mut(&mut self) -> &mut F {
        &mut self.feed
    }

    pub fn venue(&self) -> &V {
        &self.venue
    }

    pub fn venue_mut(&mut self) -> &mut V {
        &mut self.venue
    }

    pub fn account(&self) -> &A {
        &self.account
    }

    pub fn account_mut(&mut self) -> &mut A {
        &mut self.account
    }

    pub fn positions(&self) -> &PositionManager {
        &self.positions
    }

    pub fn positions_mut(&mut self) -> &mut PositionManager {
        &mut self.positions
    }

    pub fn state(&self) -> &AdaptiveState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut AdaptiveState {
        &mut self.state
    }

    pub fn regime(&self) -> MarketRegime {
        self.regime
    }

    pub fn params(&self) -> DynamicParams {
        self.params
    }

    pub fn last_snapshot(&self) -> Option<&PerformanceSnapshot> {
        self.last_snapshot.as_ref()
    }

    fn persist(&self, record: &PositionRecord) {
        if let Some(store) = &self.store {
            if let Err(e) = store.save_record(record) {
                warn!(position_id = record.id, error = %e, "Failed to persist position record");
            }
        }
    }

    // =========================================================================
    // Tick
    // =========================================================================

    /// Finalize positions the venue has closed, then trail the rest.
    /// Returns the records closed on this tick.
    pub fn on_tick(&mut self) -> Vec<PositionRecord> {
        let quote = match self.feed.quote() {
            Ok(q) => q,
            Err(e) => {
                debug!(error = %e, "Tick skipped");
                return Vec::new();
            }
        };

        let closed = self.process_closures(&quote);

        match self.feed.indicators() {
            Ok(snapshot) => {
                let trailed = self.positions.apply_trailing(
                    &mut self.venue,
                    &quote,
                    usable_atr(&snapshot),
                    self.account.symbol_spec(),
                    &self.config.risk,
                );
                for id in trailed {
                    if let Some(record) = self.positions.get(id) {
                        self.persist(record);
                    }
                }
            }
            Err(e) => debug!(error = %e, "Trailing skipped"),
        }

        closed
    }

    fn process_closures(&mut self, quote: &Quote) -> Vec<PositionRecord> {
        let closed = self
            .positions
            .detect_closures(&self.venue, self.account.symbol_spec(), quote);

        for record in &closed {
            let outcome = TradeOutcome::from_profit(record.profit());
            self.state.record_outcome(outcome);
            info!(
                position_id = record.id,
                ?outcome,
                losses = self.state.consecutive_losses,
                wins = self.state.consecutive_wins,
                "Trade outcome recorded"
            );

            self.persist(record);
            if let Some(sink) = self.report.as_mut() {
                if let Err(e) = sink.record_closed(record) {
                    warn!(position_id = record.id, error = %e, "Failed to report closed position");
                }
            }
        }

        if !closed.is_empty() {
            self.checkpoint(false);
        }
        closed
    }

    /// Save the adaptive counters, optionally refreshing the JSON backup
    fn checkpoint(&self, export: bool) {
        let Some(store) = &self.store else {
            return;
        };
        let ckpt = Checkpoint::new(
            &self.state,
            self.account.balance(),
            self.positions.open_count(),
            &self.config_hash,
        );
        let result = store.save_checkpoint(&ckpt).and_then(|_| {
            if export {
                store.export_json()
            } else {
                Ok(())
            }
        });
        if let Err(e) = result {
            warn!(error = %e, "Checkpoint failed");
        }
    }

    // =========================================================================
    // Bar
    // =========================================================================

    /// Evaluate the most recently closed bar for an entry
    pub fn on_bar(&mut self) -> BarDecision {
        let bar = match self.feed.bars(1, 0) {
            Ok(mut bars) => match bars.pop() {
                Some(bar) => bar,
                None => return BarDecision::Skipped("no closed bar"),
            },
            Err(e) => {
                debug!(error = %e, "Bar skipped");
                return BarDecision::Skipped("no closed bar");
            }
        };
        if self.last_bar_time == Some(bar.datetime) {
            return BarDecision::Skipped("bar already processed");
        }
        self.last_bar_time = Some(bar.datetime);

        let (snapshot, quote) = match (self.feed.indicators(), self.feed.quote()) {
            (Ok(s), Ok(q)) => (s, q),
            (Err(e), _) | (_, Err(e)) => {
                debug!(error = %e, "Market data unavailable");
                return BarDecision::Skipped("market data unavailable");
            }
        };

        let threshold = self.risk.derive(&self.state).adx_threshold;
        self.regime = classify(
            &snapshot,
            quote.bid,
            threshold,
            self.config.multi_timeframe.enabled,
        );

        if let EntryGate::Paused {
            bars_elapsed,
            auto_reset_bars,
        } = self.risk.check_entry(&mut self.state)
        {
            debug!(bars_elapsed, auto_reset_bars, "Entries paused");
            return BarDecision::Paused { bars_elapsed };
        }
        self.params = self.risk.derive(&self.state);

        debug!(
            regime = %self.regime,
            risk_percent = self.params.risk_percent,
            adx_threshold = self.params.adx_threshold,
            tier = self.params.tier,
            "Bar evaluated"
        );

        if self.positions.open_count() >= self.config.risk.max_positions {
            return BarDecision::Blocked("max positions");
        }

        let atr = usable_atr(&snapshot);
        if atr <= 0.0 {
            return BarDecision::Skipped("atr unavailable");
        }

        let signal_cfg = self.strategy.config();
        let window = match self.feed.bars(signal_cfg.lookback, 1) {
            Ok(w) => w,
            Err(e) => {
                debug!(error = %e, "Lookback window unavailable");
                return BarDecision::Skipped("insufficient history");
            }
        };
        let profile_bars = if signal_cfg.use_volume_profile {
            self.feed.bars(signal_cfg.profile_lookback, 1).ok()
        } else {
            None
        };

        let Some(analysis) = self.strategy.analyze(
            &bar,
            &window,
            profile_bars.as_deref(),
            atr,
            &self.regime,
            snapshot.rsi.current,
            &self.params,
        ) else {
            return BarDecision::NoSetup;
        };

        let Some(setup) = analysis.setup else {
            return BarDecision::NoSetup;
        };

        if atr > self.config.risk.max_atr_to_bar_ratio * analysis.average_bar_size {
            debug!(
                atr,
                average_bar_size = analysis.average_bar_size,
                "Setup skipped on volatility gate"
            );
            return BarDecision::Blocked("volatility");
        }

        let plan = EntryPlan::build(
            &setup,
            &quote,
            atr,
            self.account.symbol_spec(),
            &self.config.risk,
        );

        let volume = match self.sizer.calculate_volume(
            plan.entry,
            plan.stop,
            &self.account,
            self.params.risk_percent,
        ) {
            Ok(v) => v,
            Err(e) => {
                warn!(side = %plan.side, error = %e, "Entry aborted by sizing");
                return BarDecision::SizingFailed(e);
            }
        };

        match self
            .positions
            .open_position(&mut self.venue, &plan, volume, self.regime, &self.params)
        {
            Ok(id) => {
                self.state.record_entry();
                if let Some(record) = self.positions.get(id) {
                    self.persist(record);
                }
                self.checkpoint(false);
                BarDecision::Opened(id)
            }
            Err(e) => BarDecision::Rejected(e.to_string()),
        }
    }

    // =========================================================================
    // Timer
    // =========================================================================

    /// Repair tracking drift, compute analytics and checkpoint
    pub fn on_timer(&mut self) -> PerformanceSnapshot {
        self.positions.reconcile_tracking();

        let balance = self.account.balance();
        let window = self.positions.recent_closed(ANALYTICS_WINDOW);
        let snapshot = analytics::compute(&window, balance);
        if snapshot.trades > 0 {
            info!(
                trades = snapshot.trades,
                win_rate = snapshot.win_rate,
                profit_factor = snapshot.profit_factor,
                sharpe = snapshot.sharpe,
                max_drawdown = snapshot.max_drawdown,
                net_profit = %snapshot.net_profit,
                "Performance"
            );
        }

        self.checkpoint(true);

        self.last_snapshot = Some(snapshot.clone());
        snapshot
    }
}

/// Current ATR, or the previous value when the current one is not positive
fn usable_atr(snapshot: &IndicatorSnapshot) -> f64 {
    if snapshot.atr.current > 0.0 {
        snapshot.atr.current
    } else {
        snapshot.atr.previous
    }
}
