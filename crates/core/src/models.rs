use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Market Data
// ---------------------------------------------------------------------------

/// A single OHLCV bar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub symbol: String,
    /// Bar open time, in broker server time.
    pub timestamp: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

/// Best bid/ask for a symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub bid: Decimal,
    pub ask: Decimal,
}

/// Timeframe for bars.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Timeframe {
    Minute(u32),
}

impl Timeframe {
    /// The MetaTrader constant name (`M1`, `M5`, ...).
    pub fn code(&self) -> String {
        match self {
            Timeframe::Minute(n) => format!("M{}", n),
        }
    }
}

// ---------------------------------------------------------------------------
// Orders
// ---------------------------------------------------------------------------

/// Order side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn opposite(&self) -> Self {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }

    /// The price this side trades at: buys lift the ask, sells hit the bid.
    pub fn execution_price(&self, tick: &Tick) -> Decimal {
        match self {
            Side::Buy => tick.ask,
            Side::Sell => tick.bid,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Trade request action. Only market execution is used by the bot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeAction {
    Deal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeInForce {
    GoodTillCancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FillPolicy {
    FillOrKill,
}

/// A market order request handed to the platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub id: Uuid,
    pub action: TradeAction,
    pub symbol: String,
    pub volume: Decimal,
    pub side: Side,
    pub price: Decimal,
    pub stop_loss: Option<Decimal>,
    pub take_profit: Option<Decimal>,
    /// Ticket of the position being closed. `None` opens a new position.
    pub position: Option<u64>,
    pub comment: String,
    pub time_in_force: TimeInForce,
    pub fill_policy: FillPolicy,
}

impl OrderRequest {
    /// Request opening a new position with protective levels attached.
    pub fn open(
        symbol: &str,
        side: Side,
        volume: Decimal,
        price: Decimal,
        stop_loss: Decimal,
        take_profit: Decimal,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            action: TradeAction::Deal,
            symbol: symbol.to_string(),
            volume,
            side,
            price,
            stop_loss: Some(stop_loss),
            take_profit: Some(take_profit),
            position: None,
            comment: "Position Opened.".to_string(),
            time_in_force: TimeInForce::GoodTillCancelled,
            fill_policy: FillPolicy::FillOrKill,
        }
    }

    /// Request closing the position `ticket`. `side` is the closing side,
    /// i.e. the opposite of the position's side.
    pub fn close(symbol: &str, side: Side, volume: Decimal, price: Decimal, ticket: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            action: TradeAction::Deal,
            symbol: symbol.to_string(),
            volume,
            side,
            price,
            stop_loss: None,
            take_profit: None,
            position: Some(ticket),
            comment: "Position Closed.".to_string(),
            time_in_force: TimeInForce::GoodTillCancelled,
            fill_policy: FillPolicy::FillOrKill,
        }
    }

    pub fn is_close(&self) -> bool {
        self.position.is_some()
    }
}

/// `TRADE_RETCODE_DONE`: the request completed.
pub const RETCODE_DONE: u32 = 10009;

/// What the platform made of an order request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderOutcome {
    Success { order_id: u64 },
    Rejected { code: u32 },
    /// The platform returned no result at all.
    Unavailable,
}

impl OrderOutcome {
    /// Map a raw platform result (order ticket, return code) to an outcome.
    pub fn from_retcode(retcode: Option<u32>, order_id: u64) -> Self {
        match retcode {
            Some(RETCODE_DONE) => OrderOutcome::Success { order_id },
            Some(code) => OrderOutcome::Rejected { code },
            None => OrderOutcome::Unavailable,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, OrderOutcome::Success { .. })
    }
}

// ---------------------------------------------------------------------------
// Position
// ---------------------------------------------------------------------------

/// An open position as reported by the platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub ticket: u64,
    pub symbol: String,
    pub side: Side,
    pub volume: Decimal,
    pub price_open: Decimal,
    pub stop_loss: Option<Decimal>,
    pub take_profit: Option<Decimal>,
    pub opened_at: DateTime<Utc>,
}

/// Where the single position slot for a symbol stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionState {
    Flat,
    Long,
    Short,
}

impl PositionState {
    /// Collapse the platform's positions for one symbol into the single slot.
    pub fn from_positions(
        symbol: &str,
        positions: &[Position],
    ) -> Result<Self, crate::StrategyError> {
        match positions {
            [] => Ok(PositionState::Flat),
            [pos] => Ok(pos.side.into()),
            _ => Err(crate::StrategyError::MultiplePositions {
                symbol: symbol.to_string(),
                count: positions.len(),
            }),
        }
    }
}

impl From<Side> for PositionState {
    fn from(side: Side) -> Self {
        match side {
            Side::Buy => PositionState::Long,
            Side::Sell => PositionState::Short,
        }
    }
}

// ---------------------------------------------------------------------------
// Decision
// ---------------------------------------------------------------------------

/// What to do with the position slot this iteration.
///
/// The side always names the direction of a *position*: `Open(Buy)` opens a
/// long, `Close(Buy)` closes a long, `Reverse(Buy)` closes the short and
/// opens a long in its place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Hold,
    Open(Side),
    Close(Side),
    Reverse(Side),
}

// ---------------------------------------------------------------------------
// Deal
// ---------------------------------------------------------------------------

/// A locally tracked opening fill, used only for profit reporting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deal {
    pub side: Side,
    pub entry_price: Decimal,
    pub quantity: Decimal,
    /// Unset until the matching close.
    pub profit: Option<Decimal>,
    pub opened_at: DateTime<Utc>,
}

impl Deal {
    pub fn is_closed(&self) -> bool {
        self.profit.is_some()
    }
}

// ---------------------------------------------------------------------------
// Account
// ---------------------------------------------------------------------------

/// Trading account snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountInfo {
    pub login: u64,
    pub balance: Decimal,
    pub equity: Decimal,
    pub currency: String,
}

/// Terminal login credentials.
#[derive(Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub login: u64,
    pub password: String,
    pub server: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("login", &self.login)
            .field("password", &"***")
            .field("server", &self.server)
            .finish()
    }
}
