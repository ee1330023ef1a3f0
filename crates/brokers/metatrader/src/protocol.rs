use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use uuid::Uuid;

/// `TRADE_ACTION_DEAL`: market execution.
pub const TRADE_ACTION_DEAL: u8 = 1;
/// `ORDER_TYPE_BUY` / `ORDER_TYPE_SELL`, also used for position types.
pub const ORDER_TYPE_BUY: u8 = 0;
pub const ORDER_TYPE_SELL: u8 = 1;
/// `ORDER_TIME_GTC`.
pub const ORDER_TIME_GTC: u8 = 0;
/// `ORDER_FILLING_FOK`.
pub const ORDER_FILLING_FOK: u8 = 0;

/// Largest frame body accepted from the bridge.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Messages sent from the Rust client TO the MetaTrader bridge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Request {
    /// Attach the bridge to the terminal.
    #[serde(rename = "initialize")]
    Initialize { id: Uuid },
    #[serde(rename = "login")]
    Login {
        id: Uuid,
        login: u64,
        password: String,
        server: String,
    },
    #[serde(rename = "account_info")]
    AccountInfo { id: Uuid },
    #[serde(rename = "symbol_info_tick")]
    SymbolInfoTick { id: Uuid, symbol: String },
    /// Bars in `[start, end]`, both Unix seconds in server time.
    #[serde(rename = "copy_rates_range")]
    CopyRatesRange {
        id: Uuid,
        symbol: String,
        timeframe: String,
        start: i64,
        end: i64,
    },
    #[serde(rename = "positions_get")]
    PositionsGet { id: Uuid, symbol: String },
    #[serde(rename = "order_send")]
    OrderSend { id: Uuid, request: WireOrder },
    #[serde(rename = "shutdown")]
    Shutdown { id: Uuid },
}

impl Request {
    pub fn id(&self) -> Uuid {
        match self {
            Request::Initialize { id }
            | Request::Login { id, .. }
            | Request::AccountInfo { id }
            | Request::SymbolInfoTick { id, .. }
            | Request::CopyRatesRange { id, .. }
            | Request::PositionsGet { id, .. }
            | Request::OrderSend { id, .. }
            | Request::Shutdown { id } => *id,
        }
    }
}

/// Messages received FROM the MetaTrader bridge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Response {
    #[serde(rename = "initialized")]
    Initialized { id: Uuid, version: String },
    #[serde(rename = "logged_in")]
    LoggedIn { id: Uuid },
    #[serde(rename = "account_info")]
    AccountInfo {
        id: Uuid,
        login: u64,
        balance: Decimal,
        equity: Decimal,
        currency: String,
    },
    #[serde(rename = "tick")]
    Tick {
        id: Uuid,
        symbol: String,
        time: i64,
        bid: Decimal,
        ask: Decimal,
    },
    #[serde(rename = "rates")]
    Rates { id: Uuid, rates: Vec<WireRate> },
    #[serde(rename = "positions")]
    Positions {
        id: Uuid,
        positions: Vec<WirePosition>,
    },
    /// Result of `order_send`. `retcode` is absent when the terminal
    /// returned no result.
    #[serde(rename = "order_result")]
    OrderResult {
        id: Uuid,
        retcode: Option<u32>,
        #[serde(default)]
        order: u64,
        comment: Option<String>,
    },
    #[serde(rename = "shutdown_ack")]
    ShutdownAck { id: Uuid },
    /// Request failed inside the bridge or terminal.
    #[serde(rename = "error")]
    Error {
        id: Option<Uuid>,
        code: Option<i64>,
        message: String,
    },
}

impl Response {
    pub fn id(&self) -> Option<Uuid> {
        match self {
            Response::Initialized { id, .. }
            | Response::LoggedIn { id }
            | Response::AccountInfo { id, .. }
            | Response::Tick { id, .. }
            | Response::Rates { id, .. }
            | Response::Positions { id, .. }
            | Response::OrderResult { id, .. }
            | Response::ShutdownAck { id } => Some(*id),
            Response::Error { id, .. } => *id,
        }
    }
}

/// One row of `copy_rates_range`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireRate {
    pub time: i64,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    #[serde(default)]
    pub tick_volume: Decimal,
}

/// One row of `positions_get`. Zero `sl`/`tp` means unset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WirePosition {
    pub ticket: u64,
    pub symbol: String,
    #[serde(rename = "type")]
    pub kind: u8,
    pub volume: Decimal,
    pub price_open: Decimal,
    #[serde(default)]
    pub sl: Decimal,
    #[serde(default)]
    pub tp: Decimal,
    pub time: i64,
}

/// A trade request in the terminal's own field layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireOrder {
    pub action: u8,
    pub symbol: String,
    pub volume: Decimal,
    #[serde(rename = "type")]
    pub kind: u8,
    pub price: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sl: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tp: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<u64>,
    pub comment: String,
    pub type_time: u8,
    pub type_filling: u8,
}

/// Frame a message with a 4-byte length prefix (big-endian).
pub fn frame_message(msg: &[u8]) -> Vec<u8> {
    let len = msg.len() as u32;
    let mut framed = Vec::with_capacity(4 + msg.len());
    framed.extend_from_slice(&len.to_be_bytes());
    framed.extend_from_slice(msg);
    framed
}

/// Write one framed message.
pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, body: &[u8]) -> std::io::Result<()> {
    writer.write_all(&frame_message(body)).await?;
    writer.flush().await
}

/// Read one framed message body.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> std::io::Result<Vec<u8>> {
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await?;
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("frame of {} bytes exceeds {} byte limit", len, MAX_FRAME_LEN),
        ));
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Ok(body)
}
