use crate::models::*;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

// ---------------------------------------------------------------------------
// Strategy Trait
// ---------------------------------------------------------------------------

/// Errors a strategy can raise while evaluating a bar window.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StrategyError {
    #[error("Need at least {required} bars, got {available}")]
    InsufficientBars { required: usize, available: usize },
    #[error("Expected at most one open position for {symbol}, platform reports {count}")]
    MultiplePositions { symbol: String, count: usize },
}

/// Stop-loss / take-profit pair for a new position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtectiveLevels {
    pub stop_loss: Decimal,
    pub take_profit: Decimal,
}

/// Everything a strategy decided for one iteration.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub decision: Decision,
    /// Price the decision executes at (ask for buys, bid for sells).
    pub price: Decimal,
    /// Levels for the position being opened, if the decision opens one.
    pub levels: Option<ProtectiveLevels>,
}

/// A trading strategy that turns the session's bars and the current
/// position into a decision.
pub trait Strategy: Send + Sync {
    /// Unique identifier for this strategy.
    fn id(&self) -> &str;

    /// Human-readable name.
    fn name(&self) -> &str;

    /// Evaluate the bar window against the current position and quote.
    fn evaluate(
        &self,
        bars: &[Bar],
        position: PositionState,
        tick: &Tick,
    ) -> Result<Evaluation, StrategyError>;
}

// ---------------------------------------------------------------------------
// Trading Platform Trait
// ---------------------------------------------------------------------------

/// Errors that can occur while talking to the trading platform.
#[derive(Debug, thiserror::Error)]
pub enum PlatformError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
    #[error("Initialization failed: {0}")]
    InitializationFailed(String),
    #[error("Login failed: {0}")]
    LoginFailed(String),
    #[error("Account not found")]
    AccountNotFound,
    #[error("Unknown symbol: {0}")]
    UnknownSymbol(String),
    #[error("Protocol error: {0}")]
    Protocol(String),
    #[error("Platform error: {0}")]
    Other(String),
}

/// The terminal client API the loop runs against.
///
/// Calls are awaited one at a time; implementations need not support
/// overlapping requests.
#[async_trait]
pub trait TradingPlatform: Send {
    /// Attach to the terminal.
    async fn initialize(&mut self) -> Result<(), PlatformError>;

    /// Log into a trading account.
    async fn login(&mut self, credentials: &Credentials) -> Result<(), PlatformError>;

    /// Current account snapshot.
    async fn account_info(&mut self) -> Result<AccountInfo, PlatformError>;

    /// Latest bid/ask for a symbol.
    async fn symbol_info_tick(&mut self, symbol: &str) -> Result<Tick, PlatformError>;

    /// Bars whose open time falls within `[start, end]`, oldest first.
    async fn copy_rates_range(
        &mut self,
        symbol: &str,
        timeframe: Timeframe,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Bar>, PlatformError>;

    /// Open positions for a symbol.
    async fn positions_get(&mut self, symbol: &str) -> Result<Vec<Position>, PlatformError>;

    /// Submit an order request.
    async fn order_send(&mut self, request: &OrderRequest) -> Result<OrderOutcome, PlatformError>;

    /// Detach from the terminal.
    async fn shutdown(&mut self) -> Result<(), PlatformError> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Data Errors
// ---------------------------------------------------------------------------

/// Errors that can occur while loading bar data.
#[derive(Debug, thiserror::Error)]
pub enum DataError {
    #[error("Data not found: {0}")]
    NotFound(String),
    #[error("Parse error: {0}")]
    ParseError(String),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}
