use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fxbot_core::*;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::protocol::*;

/// How many recent request ids are remembered for recognising late replies.
const RECENT_REQUESTS: usize = 32;
/// Late replies skipped while waiting for one response before giving up.
const MAX_STALE_FRAMES: usize = 8;

/// Configuration for connecting to the MetaTrader 5 bridge.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetaTraderConfig {
    /// Host address (e.g. "127.0.0.1").
    pub host: String,
    /// Port the bridge is listening on.
    pub port: u16,
}

impl Default for MetaTraderConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5556,
        }
    }
}

/// MetaTrader 5 terminal client.
///
/// Talks to a bridge process running next to the terminal over TCP using
/// length-prefixed JSON. Every request carries an id that the bridge echoes
/// back. A late reply to an earlier request is skipped; anything else that
/// leaves the stream out of step drops the connection.
pub struct MetaTraderBridge {
    config: MetaTraderConfig,
    stream: Option<TcpStream>,
    bridge_version: Option<String>,
    recent: VecDeque<Uuid>,
}

impl MetaTraderBridge {
    pub fn new(config: MetaTraderConfig) -> Self {
        Self {
            config,
            stream: None,
            bridge_version: None,
            recent: VecDeque::with_capacity(RECENT_REQUESTS),
        }
    }

    pub fn bridge_version(&self) -> Option<&str> {
        self.bridge_version.as_deref()
    }

    /// Send a request and wait for its response.
    async fn call(&mut self, request: Request) -> Result<Response, PlatformError> {
        let expected = request.id();
        let json = serde_json::to_vec(&request)
            .map_err(|e| PlatformError::Other(format!("Serialization error: {}", e)))?;

        let result = self.exchange(&json, expected).await;
        if self.recent.len() == RECENT_REQUESTS {
            self.recent.pop_front();
        }
        self.recent.push_back(expected);
        result
    }

    async fn exchange(&mut self, body: &[u8], expected: Uuid) -> Result<Response, PlatformError> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| PlatformError::ConnectionFailed("Not connected".to_string()))?;
        let written = write_frame(stream, body).await;
        if let Err(e) = written {
            return Err(self.disconnect(PlatformError::ConnectionFailed(format!(
                "Write error: {}",
                e
            ))));
        }

        for _ in 0..=MAX_STALE_FRAMES {
            let stream = self
                .stream
                .as_mut()
                .ok_or_else(|| PlatformError::ConnectionFailed("Not connected".to_string()))?;
            let frame = read_frame(stream).await;
            let body = match frame {
                Ok(body) => body,
                Err(e) => {
                    return Err(self.disconnect(PlatformError::ConnectionFailed(format!(
                        "Read error: {}",
                        e
                    ))))
                }
            };
            // The frame was read whole, so a bad body leaves the stream in step.
            let response: Response = serde_json::from_slice(&body)
                .map_err(|e| PlatformError::Protocol(format!("Deserialization error: {}", e)))?;

            match response.id() {
                Some(id) if id == expected => return Ok(response),
                // Errors raised before the bridge could parse the request carry no id.
                None => return Ok(response),
                Some(id) if self.recent.contains(&id) => {
                    warn!(%id, %expected, "Skipping late reply to an earlier request");
                }
                Some(id) => {
                    return Err(self.disconnect(PlatformError::Protocol(format!(
                        "Response id {} does not match request {}",
                        id, expected
                    ))))
                }
            }
        }

        Err(self.disconnect(PlatformError::Protocol(format!(
            "No reply to request {} after {} late frames",
            expected, MAX_STALE_FRAMES
        ))))
    }

    /// Drop a connection that can no longer be trusted to pair replies with
    /// requests. Later calls fail with `ConnectionFailed`.
    fn disconnect(&mut self, error: PlatformError) -> PlatformError {
        warn!(error = %error, "Dropping MetaTrader bridge connection");
        self.stream = None;
        error
    }
}

/// Turn a bridge `error` reply into a platform error; anything else that is
/// not the expected reply is a protocol violation.
fn unexpected(response: Response, expected: &str) -> PlatformError {
    match response {
        Response::Error { code, message, .. } => match code {
            Some(code) => PlatformError::Other(format!("{} (code {})", message, code)),
            None => PlatformError::Other(message),
        },
        other => PlatformError::Protocol(format!("Expected {}, got {:?}", expected, other)),
    }
}

fn timestamp(secs: i64) -> Result<DateTime<Utc>, PlatformError> {
    DateTime::from_timestamp(secs, 0)
        .ok_or_else(|| PlatformError::Protocol(format!("Timestamp out of range: {}", secs)))
}

fn side_from_code(code: u8) -> Result<Side, PlatformError> {
    match code {
        ORDER_TYPE_BUY => Ok(Side::Buy),
        ORDER_TYPE_SELL => Ok(Side::Sell),
        other => Err(PlatformError::Protocol(format!("Unknown position type {}", other))),
    }
}

fn side_code(side: Side) -> u8 {
    match side {
        Side::Buy => ORDER_TYPE_BUY,
        Side::Sell => ORDER_TYPE_SELL,
    }
}

/// Zero means "no level" in the terminal's position records.
fn level(value: Decimal) -> Option<Decimal> {
    if value.is_zero() {
        None
    } else {
        Some(value)
    }
}

impl From<&OrderRequest> for WireOrder {
    fn from(request: &OrderRequest) -> Self {
        WireOrder {
            action: match request.action {
                TradeAction::Deal => TRADE_ACTION_DEAL,
            },
            symbol: request.symbol.clone(),
            volume: request.volume,
            kind: side_code(request.side),
            price: request.price,
            sl: request.stop_loss,
            tp: request.take_profit,
            position: request.position,
            comment: request.comment.clone(),
            type_time: match request.time_in_force {
                TimeInForce::GoodTillCancelled => ORDER_TIME_GTC,
            },
            type_filling: match request.fill_policy {
                FillPolicy::FillOrKill => ORDER_FILLING_FOK,
            },
        }
    }
}

#[async_trait]
impl TradingPlatform for MetaTraderBridge {
    async fn initialize(&mut self) -> Result<(), PlatformError> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        info!("Connecting to MetaTrader bridge at {}", addr);

        let stream = TcpStream::connect(&addr)
            .await
            .map_err(|e| PlatformError::ConnectionFailed(format!("TCP connect failed: {}", e)))?;
        self.stream = Some(stream);

        match self.call(Request::Initialize { id: Uuid::new_v4() }).await? {
            Response::Initialized { version, .. } => {
                info!("Connected to MetaTrader bridge v{}", version);
                self.bridge_version = Some(version);
                Ok(())
            }
            Response::Error { message, .. } => {
                self.stream = None;
                Err(PlatformError::InitializationFailed(message))
            }
            other => {
                self.stream = None;
                Err(unexpected(other, "initialized"))
            }
        }
    }

    async fn login(&mut self, credentials: &Credentials) -> Result<(), PlatformError> {
        let request = Request::Login {
            id: Uuid::new_v4(),
            login: credentials.login,
            password: credentials.password.clone(),
            server: credentials.server.clone(),
        };
        match self.call(request).await? {
            Response::LoggedIn { .. } => {
                info!(login = credentials.login, server = %credentials.server, "Logged in");
                Ok(())
            }
            Response::Error { message, .. } => Err(PlatformError::LoginFailed(message)),
            other => Err(unexpected(other, "logged_in")),
        }
    }

    async fn account_info(&mut self) -> Result<AccountInfo, PlatformError> {
        match self.call(Request::AccountInfo { id: Uuid::new_v4() }).await? {
            Response::AccountInfo {
                login,
                balance,
                equity,
                currency,
                ..
            } => Ok(AccountInfo {
                login,
                balance,
                equity,
                currency,
            }),
            Response::Error { message, .. } => {
                warn!("Account info unavailable: {}", message);
                Err(PlatformError::AccountNotFound)
            }
            other => Err(unexpected(other, "account_info")),
        }
    }

    async fn symbol_info_tick(&mut self, symbol: &str) -> Result<Tick, PlatformError> {
        let request = Request::SymbolInfoTick {
            id: Uuid::new_v4(),
            symbol: symbol.to_string(),
        };
        match self.call(request).await? {
            Response::Tick {
                symbol,
                time,
                bid,
                ask,
                ..
            } => Ok(Tick {
                symbol,
                timestamp: timestamp(time)?,
                bid,
                ask,
            }),
            other => Err(unexpected(other, "tick")),
        }
    }

    async fn copy_rates_range(
        &mut self,
        symbol: &str,
        timeframe: Timeframe,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Bar>, PlatformError> {
        let request = Request::CopyRatesRange {
            id: Uuid::new_v4(),
            symbol: symbol.to_string(),
            timeframe: timeframe.code(),
            start: start.timestamp(),
            end: end.timestamp(),
        };
        match self.call(request).await? {
            Response::Rates { rates, .. } => {
                debug!(symbol, bars = rates.len(), "Received rates");
                rates
                    .into_iter()
                    .map(|r| -> Result<Bar, PlatformError> {
                        Ok(Bar {
                            symbol: symbol.to_string(),
                            timestamp: timestamp(r.time)?,
                            open: r.open,
                            high: r.high,
                            low: r.low,
                            close: r.close,
                            volume: r.tick_volume,
                        })
                    })
                    .collect()
            }
            other => Err(unexpected(other, "rates")),
        }
    }

    async fn positions_get(&mut self, symbol: &str) -> Result<Vec<Position>, PlatformError> {
        let request = Request::PositionsGet {
            id: Uuid::new_v4(),
            symbol: symbol.to_string(),
        };
        match self.call(request).await? {
            Response::Positions { positions, .. } => positions
                .into_iter()
                .map(|p| -> Result<Position, PlatformError> {
                    Ok(Position {
                        ticket: p.ticket,
                        side: side_from_code(p.kind)?,
                        symbol: p.symbol,
                        volume: p.volume,
                        price_open: p.price_open,
                        stop_loss: level(p.sl),
                        take_profit: level(p.tp),
                        opened_at: timestamp(p.time)?,
                    })
                })
                .collect(),
            other => Err(unexpected(other, "positions")),
        }
    }

    async fn order_send(&mut self, request: &OrderRequest) -> Result<OrderOutcome, PlatformError> {
        let msg = Request::OrderSend {
            id: request.id,
            request: WireOrder::from(request),
        };
        match self.call(msg).await? {
            Response::OrderResult {
                retcode,
                order,
                comment,
                ..
            } => {
                debug!(
                    request_id = %request.id,
                    ?retcode,
                    order,
                    comment = comment.as_deref().unwrap_or(""),
                    "Order result"
                );
                Ok(OrderOutcome::from_retcode(retcode, order))
            }
            other => Err(unexpected(other, "order_result")),
        }
    }

    async fn shutdown(&mut self) -> Result<(), PlatformError> {
        if self.stream.is_some() {
            if let Err(e) = self.call(Request::Shutdown { id: Uuid::new_v4() }).await {
                warn!("Bridge shutdown request failed: {}", e);
            }
        }
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.shutdown().await;
        }
        info!("Disconnected from MetaTrader bridge");
        Ok(())
    }
}
