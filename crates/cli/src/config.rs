use anyhow::{Context, Result};
use chrono_tz::Tz;
use fxbot_brokers_common::SimulatedTerminalConfig;
use fxbot_brokers_metatrader::MetaTraderConfig;
use fxbot_engine::{LoopConfig, SessionClock, TerminationPolicy};
use fxbot_strategies::BreakoutReversalConfig;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Everything the bot reads from its TOML file. Every field has a default,
/// so an empty file (or no file) runs USDCAD at 0.01 lots forever.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    pub trading: TradingConfig,
    pub strategy: BreakoutReversalConfig,
    pub session: SessionConfig,
    pub bridge: MetaTraderConfig,
    pub replay: ReplayConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TradingConfig {
    pub symbol: String,
    pub quantity: Decimal,
    /// Number of iterations to run. Absent means run until killed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iterations: Option<u64>,
    pub poll_interval_secs: u64,
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            symbol: "USDCAD".to_string(),
            quantity: dec!(0.01),
            iterations: None,
            poll_interval_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Broker server offset from UTC outside daylight saving.
    pub server_offset_hours: i64,
    /// IANA zone whose daylight saving shift the server follows.
    pub dst_reference: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            server_offset_hours: 2,
            dst_reference: "America/New_York".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplayConfig {
    pub spread: Decimal,
    pub initial_balance: Decimal,
    pub currency: String,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        let terminal = SimulatedTerminalConfig::default();
        Self {
            spread: terminal.spread,
            initial_balance: terminal.initial_balance,
            currency: terminal.currency,
        }
    }
}

impl BotConfig {
    /// Read the config at `path`, or fall back to defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        Self::from_toml(&text).with_context(|| format!("Invalid config {}", path.display()))
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.session_clock()?;
        if config.trading.quantity <= Decimal::ZERO {
            anyhow::bail!("trading.quantity must be positive");
        }
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn session_clock(&self) -> Result<SessionClock> {
        let tz: Tz = self
            .session
            .dst_reference
            .parse()
            .map_err(|e| anyhow::anyhow!("Unknown timezone '{}': {}", self.session.dst_reference, e))?;
        Ok(SessionClock::new(self.session.server_offset_hours, tz))
    }

    pub fn loop_config(&self) -> Result<LoopConfig> {
        Ok(LoopConfig {
            symbol: self.trading.symbol.clone(),
            quantity: self.trading.quantity,
            poll_interval: Duration::from_secs(self.trading.poll_interval_secs),
            termination: TerminationPolicy::from_iterations(self.trading.iterations),
            session: self.session_clock()?,
            ..Default::default()
        })
    }

    pub fn terminal_config(&self, symbol: &str) -> SimulatedTerminalConfig {
        SimulatedTerminalConfig {
            symbol: symbol.to_string(),
            spread: self.replay.spread,
            initial_balance: self.replay.initial_balance,
            currency: self.replay.currency.clone(),
        }
    }
}
