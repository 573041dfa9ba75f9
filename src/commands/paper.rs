//! Paper trading command
//!
//! Replays a CSV of bars through the engine. Each bar is walked as four
//! quotes (open, extremes, close) so stops, targets and trailing see the
//! intrabar path before the bar closes and is evaluated for entries.

use anyhow::{bail, Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use liquidity_trap::data::{self, intrabar_quotes, ReplayFeed};
use liquidity_trap::exchange::{MarketFeed, PaperAccount, PaperVenue, SymbolSpec};
use liquidity_trap::report::CsvReportSink;
use liquidity_trap::state_manager::create_state_manager;
use liquidity_trap::{BarDecision, Config, Engine, Money};
use std::time::Duration;
use tracing::{debug, info};

type PaperEngine = Engine<ReplayFeed, PaperVenue, PaperAccount>;

pub struct PaperArgs {
    pub config_path: String,
    pub data_path: String,
    pub balance: f64,
    pub currency: String,
    pub rates: Vec<String>,
    pub spread: f64,
    pub warmup: usize,
    pub timer_bars: usize,
    pub interval_ms: u64,
    pub persist: bool,
    pub progress: bool,
}

/// Parse "EURUSD=1.085"
fn parse_rate(raw: &str) -> Result<(String, f64)> {
    let (pair, price) = raw
        .split_once('=')
        .with_context(|| format!("Invalid rate '{}', expected PAIR=PRICE", raw))?;
    let price: f64 = price
        .trim()
        .parse()
        .with_context(|| format!("Invalid price in rate '{}'", raw))?;
    if price <= 0.0 {
        bail!("Rate for {} must be positive", pair);
    }
    Ok((pair.trim().to_uppercase(), price))
}

/// Bring the account balance in line with the venue's realized profit
fn sync_balance(engine: &mut PaperEngine, applied: &mut Money) {
    let realized = engine.venue().realized_profit();
    let delta = realized - *applied;
    if !delta.is_zero() {
        engine.account_mut().apply_realized(delta.to_f64());
        *applied = realized;
    }
}

pub fn run(args: PaperArgs) -> Result<()> {
    tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .context("Failed to start runtime")?
        .block_on(run_async(args))
}

async fn run_async(args: PaperArgs) -> Result<()> {
    info!("Starting paper run");

    let config = Config::from_file(&args.config_path)?;
    info!("Loaded configuration from: {}", args.config_path);

    let candles = data::load_csv(&args.data_path)?;
    if candles.len() <= args.warmup {
        bail!(
            "{} has {} bars, need more than the {} warmup bars",
            args.data_path,
            candles.len(),
            args.warmup
        );
    }
    info!("Loaded {} bars from {}", candles.len(), args.data_path);

    let spec = SymbolSpec::from(&config.symbol);
    let feed = ReplayFeed::new(candles, &config, args.spread).with_warmup(args.warmup);

    let mut venue = PaperVenue::new(spec.clone());
    if let Ok(quote) = feed.quote() {
        venue.set_quote(quote);
    }

    let mut account = PaperAccount::new(args.balance, args.currency.clone(), spec);
    for raw in &args.rates {
        let (pair, price) = parse_rate(raw)?;
        account = account.with_rate(pair, price);
    }

    let sink = CsvReportSink::new(&config.state.report_path)?;
    info!("Closed positions report: {}", sink.path().display());

    let mut engine = if args.persist {
        let store = create_state_manager(&config.state.state_dir)?;
        Engine::with_state_manager(config, feed, venue, account, store)?
    } else {
        Engine::new(config, feed, venue, account)?
    }
    .with_report_sink(Box::new(sink));

    let remaining = engine.feed().len() - engine.feed().cursor();
    let pb = if args.progress {
        let pb = ProgressBar::new(remaining as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("⚡ {percent:>3}%|{bar:40}| {pos}/{len} [{elapsed}<{eta}] {msg}")
                .context("Invalid progress template")?
                .progress_chars("█░ "),
        );
        pb
    } else {
        ProgressBar::hidden()
    };

    let mut ticker = tokio::time::interval(Duration::from_millis(args.interval_ms.max(1)));
    let timer_bars = args.timer_bars.max(1);
    let mut applied = Money::ZERO;
    let mut bars = 0usize;
    let mut entries = 0usize;

    while let Some(bar) = engine.feed().forming_bar().cloned() {
        if args.interval_ms > 0 {
            ticker.tick().await;
        }

        for quote in intrabar_quotes(&bar, args.spread) {
            engine.venue_mut().mark(quote);
            engine.feed_mut().set_quote(quote);
            sync_balance(&mut engine, &mut applied);
            engine.on_tick();
        }

        engine.feed_mut().advance();
        match engine.on_bar() {
            BarDecision::Opened(id) => {
                entries += 1;
                pb.set_message(format!("entries {} (last #{})", entries, id));
            }
            other => debug!(?other, time = %bar.datetime, "No entry"),
        }
        sync_balance(&mut engine, &mut applied);

        bars += 1;
        if bars % timer_bars == 0 {
            engine.on_timer();
        }
        pb.inc(1);
    }

    let snapshot = engine.on_timer();
    pb.finish_with_message(format!("{} entries", entries));

    let state = engine.state();
    println!("\n{}", "=".repeat(60));
    println!("PAPER RUN RESULTS");
    println!("{}", "=".repeat(60));
    println!("Starting Balance:   {:.2} {}", args.balance, args.currency);
    println!("Final Balance:      {:.2} {}", engine.account().balance, args.currency);
    println!("Bars Replayed:      {}", bars);
    println!("Entries:            {}", entries);
    println!("Open Positions:     {}", engine.positions().open_count());
    println!("Window Trades:      {}", snapshot.trades);
    println!("Win Rate:           {:.2}%", snapshot.win_rate);
    println!("Profit Factor:      {:.2}", snapshot.profit_factor);
    println!("Average Win:        {:.2}", snapshot.avg_win);
    println!("Average Loss:       {:.2}", snapshot.avg_loss);
    println!("Sharpe (per trade): {:.2}", snapshot.sharpe);
    println!("Max Drawdown:       {:.2}%", snapshot.max_drawdown * 100.0);
    println!("Recovery Factor:    {:.2}", snapshot.recovery_factor);
    println!("Net Profit:         {}", snapshot.net_profit);
    println!(
        "Loss Streak:        {}{}",
        state.consecutive_losses,
        if state.is_paused() { " (paused)" } else { "" }
    );
    println!("{}", "=".repeat(60));

    info!("Paper run completed");
    Ok(())
}
