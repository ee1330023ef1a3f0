use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fxbot_core::*;
use rust_decimal::Decimal;
use std::collections::VecDeque;
use tracing::{debug, info};

/// `TRADE_RETCODE_POSITION_CLOSED`: the referenced position no longer exists.
const RETCODE_POSITION_CLOSED: u32 = 10036;

/// Configuration for the simulated terminal.
#[derive(Debug, Clone)]
pub struct SimulatedTerminalConfig {
    /// The only symbol the terminal quotes.
    pub symbol: String,
    /// Ask minus bid.
    pub spread: Decimal,
    /// Starting account balance.
    pub initial_balance: Decimal,
    pub currency: String,
}

impl Default for SimulatedTerminalConfig {
    fn default() -> Self {
        Self {
            symbol: "USDCAD".to_string(),
            spread: Decimal::new(2, 4), // 0.0002
            initial_balance: Decimal::new(10_000, 0),
            currency: "USD".to_string(),
        }
    }
}

/// A terminal that replays a fixed bar series.
///
/// Each history query moves the replay one bar forward, so a loop polling
/// `copy_rates_range` once per iteration walks through the series minute by
/// minute. Orders fill immediately at the requested price.
pub struct SimulatedTerminal {
    config: SimulatedTerminalConfig,
    bars: Vec<Bar>,
    /// Index of the bar currently forming. `None` until the first query.
    cursor: Option<usize>,
    initialized: bool,
    login: Option<u64>,
    fail_login: bool,
    balance: Decimal,
    positions: Vec<Position>,
    next_ticket: u64,
    /// Scripted platform answers for upcoming orders: `Some(code)` replies
    /// with that return code, `None` returns no result.
    scripted: VecDeque<Option<u32>>,
    sent: Vec<OrderRequest>,
}

impl SimulatedTerminal {
    pub fn new(config: SimulatedTerminalConfig, bars: Vec<Bar>) -> Self {
        let balance = config.initial_balance;
        Self {
            config,
            bars,
            cursor: None,
            initialized: false,
            login: None,
            fail_login: false,
            balance,
            positions: Vec::new(),
            next_ticket: 1,
            scripted: VecDeque::new(),
            sent: Vec::new(),
        }
    }

    /// Make the next login attempt fail.
    pub fn with_failing_login(mut self) -> Self {
        self.fail_login = true;
        self
    }

    /// Reject the next order with `code`.
    pub fn reject_next(&mut self, code: u32) {
        self.scripted.push_back(Some(code));
    }

    /// Return no result for the next order.
    pub fn drop_next(&mut self) {
        self.scripted.push_back(None);
    }

    /// Insert a position as if it had been opened outside the bot.
    pub fn inject_position(&mut self, side: Side, volume: Decimal, price_open: Decimal) -> u64 {
        let ticket = self.take_ticket();
        let opened_at = self.current_bar().map(|b| b.timestamp).unwrap_or_default();
        self.positions.push(Position {
            ticket,
            symbol: self.config.symbol.clone(),
            side,
            volume,
            price_open,
            stop_loss: None,
            take_profit: None,
            opened_at,
        });
        ticket
    }

    pub fn positions(&self) -> &[Position] {
        &self.positions
    }

    /// Every request received, in order.
    pub fn sent_orders(&self) -> &[OrderRequest] {
        &self.sent
    }

    pub fn balance(&self) -> Decimal {
        self.balance
    }

    /// Whether the replay has reached the last bar.
    pub fn is_exhausted(&self) -> bool {
        match self.cursor {
            Some(i) => i + 1 >= self.bars.len(),
            None => self.bars.is_empty(),
        }
    }

    fn current_bar(&self) -> Option<&Bar> {
        self.cursor.and_then(|i| self.bars.get(i))
    }

    fn take_ticket(&mut self) -> u64 {
        let ticket = self.next_ticket;
        self.next_ticket += 1;
        ticket
    }

    fn check_symbol(&self, symbol: &str) -> Result<(), PlatformError> {
        if symbol == self.config.symbol {
            Ok(())
        } else {
            Err(PlatformError::UnknownSymbol(symbol.to_string()))
        }
    }

    fn check_session(&self) -> Result<(), PlatformError> {
        if self.login.is_some() {
            Ok(())
        } else {
            Err(PlatformError::ConnectionFailed("Not logged in".to_string()))
        }
    }

    /// Move the replay one bar forward and trigger protective levels.
    fn advance(&mut self) {
        let next = match self.cursor {
            None => 0,
            Some(i) => (i + 1).min(self.bars.len().saturating_sub(1)),
        };
        if self.bars.is_empty() || self.cursor == Some(next) {
            return;
        }
        self.cursor = Some(next);
        let bar = self.bars[next].clone();
        self.trigger_protective_levels(&bar);
    }

    /// Close positions whose stop-loss or take-profit lies inside the bar.
    /// The stop is checked first when both are touched.
    fn trigger_protective_levels(&mut self, bar: &Bar) {
        let mut triggered = Vec::new();
        for (i, pos) in self.positions.iter().enumerate() {
            let stop_hit = pos.stop_loss.filter(|sl| match pos.side {
                Side::Buy => bar.low <= *sl,
                Side::Sell => bar.high >= *sl,
            });
            let target_hit = pos.take_profit.filter(|tp| match pos.side {
                Side::Buy => bar.high >= *tp,
                Side::Sell => bar.low <= *tp,
            });
            if let Some(level) = stop_hit.or(target_hit) {
                triggered.push((i, level));
            }
        }

        for (i, level) in triggered.into_iter().rev() {
            let pos = self.positions.remove(i);
            let pnl = Self::compute_pnl(&pos, level);
            self.balance += pnl;
            info!(
                ticket = pos.ticket,
                side = %pos.side,
                level = %level,
                pnl = %pnl,
                "Protective level hit, position closed"
            );
        }
    }

    fn compute_pnl(pos: &Position, exit_price: Decimal) -> Decimal {
        let price_diff = match pos.side {
            Side::Buy => exit_price - pos.price_open,
            Side::Sell => pos.price_open - exit_price,
        };
        price_diff * pos.volume
    }

    fn fill(&mut self, request: &OrderRequest, opened_at: DateTime<Utc>) -> OrderOutcome {
        match request.position {
            Some(ticket) => {
                let Some(idx) = self.positions.iter().position(|p| p.ticket == ticket) else {
                    return OrderOutcome::Rejected {
                        code: RETCODE_POSITION_CLOSED,
                    };
                };
                let pos = self.positions.remove(idx);
                let pnl = Self::compute_pnl(&pos, request.price);
                self.balance += pnl;
                debug!(ticket, price = %request.price, pnl = %pnl, "Simulated close");
                OrderOutcome::Success {
                    order_id: self.take_ticket(),
                }
            }
            None => {
                let ticket = self.take_ticket();
                self.positions.push(Position {
                    ticket,
                    symbol: request.symbol.clone(),
                    side: request.side,
                    volume: request.volume,
                    price_open: request.price,
                    stop_loss: request.stop_loss,
                    take_profit: request.take_profit,
                    opened_at,
                });
                debug!(ticket, side = %request.side, price = %request.price, "Simulated open");
                OrderOutcome::Success { order_id: ticket }
            }
        }
    }
}

#[async_trait]
impl TradingPlatform for SimulatedTerminal {
    async fn initialize(&mut self) -> Result<(), PlatformError> {
        self.initialized = true;
        Ok(())
    }

    async fn login(&mut self, credentials: &Credentials) -> Result<(), PlatformError> {
        if !self.initialized {
            return Err(PlatformError::InitializationFailed(
                "Terminal not initialized".to_string(),
            ));
        }
        if self.fail_login {
            return Err(PlatformError::LoginFailed(format!(
                "Invalid account {} on {}",
                credentials.login, credentials.server
            )));
        }
        self.login = Some(credentials.login);
        Ok(())
    }

    async fn account_info(&mut self) -> Result<AccountInfo, PlatformError> {
        let login = self.login.ok_or(PlatformError::AccountNotFound)?;
        let unrealized: Decimal = match self.current_bar() {
            Some(bar) => self
                .positions
                .iter()
                .map(|p| Self::compute_pnl(p, bar.close))
                .sum(),
            None => Decimal::ZERO,
        };
        Ok(AccountInfo {
            login,
            balance: self.balance,
            equity: self.balance + unrealized,
            currency: self.config.currency.clone(),
        })
    }

    async fn symbol_info_tick(&mut self, symbol: &str) -> Result<Tick, PlatformError> {
        self.check_symbol(symbol)?;
        let bar = self
            .current_bar()
            .or_else(|| self.bars.first())
            .ok_or_else(|| PlatformError::Other("No market data".to_string()))?;
        Ok(Tick {
            symbol: symbol.to_string(),
            timestamp: bar.timestamp,
            bid: bar.close,
            ask: bar.close + self.config.spread,
        })
    }

    /// Ignores the requested range: serves the cursor's trading day up to
    /// and including the cursor bar.
    async fn copy_rates_range(
        &mut self,
        symbol: &str,
        _timeframe: Timeframe,
        _start: DateTime<Utc>,
        _end: DateTime<Utc>,
    ) -> Result<Vec<Bar>, PlatformError> {
        self.check_symbol(symbol)?;
        self.advance();
        let Some(cursor) = self.cursor else {
            return Ok(Vec::new());
        };
        let day = self.bars[cursor].timestamp.date_naive();
        Ok(self.bars[..=cursor]
            .iter()
            .filter(|b| b.timestamp.date_naive() == day)
            .cloned()
            .collect())
    }

    async fn positions_get(&mut self, symbol: &str) -> Result<Vec<Position>, PlatformError> {
        Ok(self
            .positions
            .iter()
            .filter(|p| p.symbol == symbol)
            .cloned()
            .collect())
    }

    async fn order_send(&mut self, request: &OrderRequest) -> Result<OrderOutcome, PlatformError> {
        self.check_session()?;
        self.check_symbol(&request.symbol)?;
        self.sent.push(request.clone());

        match self.scripted.pop_front() {
            Some(Some(code)) if code != RETCODE_DONE => {
                return Ok(OrderOutcome::Rejected { code });
            }
            Some(None) => return Ok(OrderOutcome::Unavailable),
            _ => {}
        }

        let opened_at = self.current_bar().map(|b| b.timestamp).unwrap_or_default();
        Ok(self.fill(request, opened_at))
    }

    async fn shutdown(&mut self) -> Result<(), PlatformError> {
        self.login = None;
        self.initialized = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use rust_decimal_macros::dec;

    fn bars(closes: &[Decimal]) -> Vec<Bar> {
        let start = Utc.with_ymd_and_hms(2024, 3, 4, 9, 0, 0).unwrap();
        closes
            .iter()
            .enumerate()
            .map(|(i, c)| Bar {
                symbol: "USDCAD".to_string(),
                timestamp: start + Duration::minutes(i as i64),
                open: *c,
                high: *c + dec!(0.001),
                low: *c - dec!(0.001),
                close: *c,
                volume: dec!(10),
            })
            .collect()
    }

    fn credentials() -> Credentials {
        Credentials {
            login: 5001,
            password: "pw".to_string(),
            server: "Sim".to_string(),
        }
    }

    async fn logged_in(closes: &[Decimal]) -> SimulatedTerminal {
        let mut term = SimulatedTerminal::new(SimulatedTerminalConfig::default(), bars(closes));
        term.initialize().await.unwrap();
        term.login(&credentials()).await.unwrap();
        term
    }

    async fn history(term: &mut SimulatedTerminal) -> Vec<Bar> {
        let now = Utc::now();
        term.copy_rates_range("USDCAD", Timeframe::Minute(1), now, now)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_login_requires_initialize() {
        let mut term = SimulatedTerminal::new(SimulatedTerminalConfig::default(), Vec::new());
        assert!(matches!(
            term.login(&credentials()).await,
            Err(PlatformError::InitializationFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_failing_login() {
        let mut term =
            SimulatedTerminal::new(SimulatedTerminalConfig::default(), Vec::new()).with_failing_login();
        term.initialize().await.unwrap();
        assert!(matches!(
            term.login(&credentials()).await,
            Err(PlatformError::LoginFailed(_))
        ));
        assert!(matches!(
            term.account_info().await,
            Err(PlatformError::AccountNotFound)
        ));
    }

    #[tokio::test]
    async fn test_history_advances_cursor() {
        let mut term = logged_in(&[dec!(1.35), dec!(1.36), dec!(1.37)]).await;
        assert_eq!(history(&mut term).await.len(), 1);
        assert_eq!(history(&mut term).await.len(), 2);
        assert_eq!(history(&mut term).await.len(), 3);
        assert!(term.is_exhausted());
        // Stays on the last bar once the series is exhausted.
        assert_eq!(history(&mut term).await.len(), 3);

        let tick = term.symbol_info_tick("USDCAD").await.unwrap();
        assert_eq!(tick.bid, dec!(1.37));
        assert_eq!(tick.ask, dec!(1.3702));
    }

    #[tokio::test]
    async fn test_unknown_symbol() {
        let mut term = logged_in(&[dec!(1.35)]).await;
        assert!(matches!(
            term.symbol_info_tick("EURUSD").await,
            Err(PlatformError::UnknownSymbol(_))
        ));
    }

    #[tokio::test]
    async fn test_open_and_close() {
        let mut term = logged_in(&[dec!(1.35), dec!(1.36)]).await;
        history(&mut term).await;

        let open = OrderRequest::open("USDCAD", Side::Buy, dec!(10), dec!(1.35), dec!(1.2), dec!(1.5));
        let outcome = term.order_send(&open).await.unwrap();
        assert!(outcome.is_success());
        let ticket = term.positions()[0].ticket;

        let close = OrderRequest::close("USDCAD", Side::Sell, dec!(10), dec!(1.36), ticket);
        assert!(term.order_send(&close).await.unwrap().is_success());
        assert!(term.positions().is_empty());
        assert_eq!(term.balance(), dec!(10000.1));
        assert_eq!(term.sent_orders().len(), 2);
    }

    #[tokio::test]
    async fn test_close_unknown_ticket_is_rejected() {
        let mut term = logged_in(&[dec!(1.35)]).await;
        let close = OrderRequest::close("USDCAD", Side::Sell, dec!(1), dec!(1.35), 99);
        assert_eq!(
            term.order_send(&close).await.unwrap(),
            OrderOutcome::Rejected {
                code: RETCODE_POSITION_CLOSED
            }
        );
    }

    #[tokio::test]
    async fn test_scripted_outcomes() {
        let mut term = logged_in(&[dec!(1.35)]).await;
        term.reject_next(10019);
        term.drop_next();
        let open = OrderRequest::open("USDCAD", Side::Sell, dec!(1), dec!(1.35), dec!(1.4), dec!(1.3));
        assert_eq!(
            term.order_send(&open).await.unwrap(),
            OrderOutcome::Rejected { code: 10019 }
        );
        assert_eq!(term.order_send(&open).await.unwrap(), OrderOutcome::Unavailable);
        assert!(term.positions().is_empty());
        assert!(term.order_send(&open).await.unwrap().is_success());
    }

    #[tokio::test]
    async fn test_stop_loss_triggers_on_advance() {
        let mut term = logged_in(&[dec!(1.35), dec!(1.30)]).await;
        history(&mut term).await;
        let open = OrderRequest::open("USDCAD", Side::Buy, dec!(100), dec!(1.35), dec!(1.32), dec!(1.50));
        term.order_send(&open).await.unwrap();

        history(&mut term).await;
        assert!(term.positions().is_empty());
        assert_eq!(term.balance(), dec!(9997));
    }

    #[tokio::test]
    async fn test_order_requires_login() {
        let mut term = SimulatedTerminal::new(SimulatedTerminalConfig::default(), bars(&[dec!(1)]));
        let open = OrderRequest::open("USDCAD", Side::Buy, dec!(1), dec!(1), dec!(0.9), dec!(1.1));
        assert!(matches!(
            term.order_send(&open).await,
            Err(PlatformError::ConnectionFailed(_))
        ));
    }
}
