//! Config validation command

use anyhow::Result;
use liquidity_trap::Config;
use tracing::info;

pub fn run(config_path: String) -> Result<()> {
    let config = Config::from_file(&config_path)?;
    info!("Configuration valid: {}", config_path);

    println!("\n{}", "=".repeat(60));
    println!("CONFIGURATION");
    println!("{}", "=".repeat(60));
    println!("Symbol:             {}", config.symbol.name);
    println!("Base Risk:          {:.2}%", config.risk.risk_percent);
    println!("Max Positions:      {}", config.risk.max_positions);
    println!("Reward Ratio:       {:.2}", config.risk.reward_ratio);
    println!("Lookback:           {}", config.signal.lookback);
    println!("Volume Profile:     {}", config.signal.use_volume_profile);
    println!("HTF Confirmation:   {}", config.multi_timeframe.enabled);
    println!(
        "Loss Pause:         {} (after {} losses, reset {} bars)",
        config.loss_pause.enabled,
        config.loss_pause.trigger_losses,
        config.loss_pause.auto_reset_bars
    );
    println!(
        "Adaptive Risk:      {} (after {} losses)",
        config.adaptive.enabled, config.adaptive.trigger_losses
    );
    println!("Fingerprint:        {}", config.fingerprint());
    println!("{}", "=".repeat(60));

    Ok(())
}
