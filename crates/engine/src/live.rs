use chrono::Utc;
use fxbot_core::*;
use rust_decimal::Decimal;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::execution::OrderExecutor;
use crate::ledger::DealLedger;
use crate::session::SessionClock;

/// When the loop stops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationPolicy {
    Infinite,
    Bounded(u64),
}

impl TerminationPolicy {
    /// `None` runs forever.
    pub fn from_iterations(iterations: Option<u64>) -> Self {
        match iterations {
            Some(n) => TerminationPolicy::Bounded(n),
            None => TerminationPolicy::Infinite,
        }
    }

    /// Whether another iteration may start after `completed` iterations.
    pub fn allows(&self, completed: u64) -> bool {
        match self {
            TerminationPolicy::Infinite => true,
            TerminationPolicy::Bounded(n) => completed < *n,
        }
    }
}

/// Configuration for the strategy loop.
#[derive(Debug, Clone)]
pub struct LoopConfig {
    pub symbol: String,
    /// Lot size for every order.
    pub quantity: Decimal,
    pub timeframe: Timeframe,
    /// Pause between iterations.
    pub poll_interval: Duration,
    pub termination: TerminationPolicy,
    pub session: SessionClock,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            symbol: "USDCAD".to_string(),
            quantity: Decimal::new(1, 2), // 0.01 lots
            timeframe: Timeframe::Minute(1),
            poll_interval: Duration::from_secs(60),
            termination: TerminationPolicy::Infinite,
            session: SessionClock::default(),
        }
    }
}

/// Startup failures. All of them end the process.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Failed to initialize MetaTrader: {0}")]
    Initialize(#[source] PlatformError),
    #[error("Failed to login: {0}")]
    Login(#[source] PlatformError),
    #[error("Account not found: {0}")]
    AccountInfo(#[source] PlatformError),
}

/// A failure that skips the rest of one iteration.
#[derive(Debug, thiserror::Error)]
enum IterationError {
    #[error(transparent)]
    Platform(#[from] PlatformError),
    #[error(transparent)]
    Strategy(#[from] StrategyError),
}

/// What a finished run did.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub iterations: u64,
    pub skipped_iterations: u64,
    pub orders_sent: u64,
    pub orders_failed: u64,
    pub deals: Vec<Deal>,
    pub realized_profit: Decimal,
}

/// Initialize the terminal, log in and fetch the account.
pub async fn start_session<P: TradingPlatform + ?Sized>(
    platform: &mut P,
    credentials: &Credentials,
) -> Result<AccountInfo, EngineError> {
    platform.initialize().await.map_err(EngineError::Initialize)?;
    platform
        .login(credentials)
        .await
        .map_err(EngineError::Login)?;
    let account = platform
        .account_info()
        .await
        .map_err(EngineError::AccountInfo)?;

    info!(
        login = account.login,
        balance = %account.balance,
        equity = %account.equity,
        currency = %account.currency,
        "Account ready"
    );
    Ok(account)
}

/// Polls bars, asks the strategy what to do and executes it, one iteration
/// at a time until the termination policy says stop.
pub struct StrategyLoop<'a, P: TradingPlatform + ?Sized, S: Strategy + ?Sized> {
    platform: &'a mut P,
    strategy: &'a S,
    config: LoopConfig,
    ledger: DealLedger,
    summary: RunSummary,
}

impl<'a, P: TradingPlatform + ?Sized, S: Strategy + ?Sized> StrategyLoop<'a, P, S> {
    pub fn new(platform: &'a mut P, strategy: &'a S, config: LoopConfig) -> Self {
        Self {
            platform,
            strategy,
            config,
            ledger: DealLedger::new(),
            summary: RunSummary::default(),
        }
    }

    /// Run to completion.
    pub async fn run(mut self) -> RunSummary {
        info!(
            strategy = self.strategy.id(),
            symbol = %self.config.symbol,
            quantity = %self.config.quantity,
            termination = ?self.config.termination,
            "Starting strategy loop"
        );

        while self.config.termination.allows(self.summary.iterations) {
            self.summary.iterations += 1;
            info!("Iteration: {}", self.summary.iterations);

            if let Err(e) = self.iterate().await {
                self.summary.skipped_iterations += 1;
                match e {
                    IterationError::Strategy(e) => warn!("Skipping iteration: {}", e),
                    IterationError::Platform(e) => error!("Skipping iteration: {}", e),
                }
            }

            let more = self.config.termination.allows(self.summary.iterations);
            if more && !self.config.poll_interval.is_zero() {
                tokio::time::sleep(self.config.poll_interval).await;
            }
        }

        self.summary.realized_profit = self.ledger.realized_profit();
        self.summary.deals = self.ledger.into_deals();
        info!(
            iterations = self.summary.iterations,
            orders_sent = self.summary.orders_sent,
            orders_failed = self.summary.orders_failed,
            realized_profit = %self.summary.realized_profit,
            "Strategy loop finished"
        );
        self.summary
    }

    async fn iterate(&mut self) -> Result<(), IterationError> {
        let symbol = self.config.symbol.clone();
        let window = self.config.session.window(Utc::now());

        let bars = self
            .platform
            .copy_rates_range(&symbol, self.config.timeframe, window.start, window.end)
            .await?;
        let tick = self.platform.symbol_info_tick(&symbol).await?;
        let positions = self.platform.positions_get(&symbol).await?;
        let position = PositionState::from_positions(&symbol, &positions)?;

        let evaluation = self.strategy.evaluate(&bars, position, &tick)?;
        self.execute(&symbol, evaluation).await;
        Ok(())
    }

    async fn execute(&mut self, symbol: &str, evaluation: Evaluation) {
        let Evaluation {
            decision,
            price,
            levels,
        } = evaluation;
        let now = Utc::now();
        let mut executor =
            OrderExecutor::new(&mut *self.platform, &mut self.ledger, symbol, self.config.quantity);

        match (decision, levels) {
            (Decision::Hold, _) => {}
            (Decision::Close(side), _) => {
                let ok = executor.close_position(side, price).await.is_ok();
                self.summary.record(ok);
            }
            (Decision::Open(side), Some(levels)) => {
                let ok = executor.open_position(side, price, levels, now).await.is_ok();
                self.summary.record(ok);
            }
            (Decision::Reverse(side), Some(levels)) => {
                let closed = executor.close_position(side.opposite(), price).await.is_ok();
                self.summary.record(closed);
                if !closed {
                    // Opening anyway would leave two positions on the symbol.
                    warn!(
                        "Close leg failed; {} open deliberately skipped to keep one position per symbol",
                        side
                    );
                    return;
                }
                let ok = executor.open_position(side, price, levels, now).await.is_ok();
                self.summary.record(ok);
            }
            (decision, None) => {
                warn!(?decision, "Entry without protective levels, skipped");
            }
        }
    }
}

impl RunSummary {
    fn record(&mut self, ok: bool) {
        self.orders_sent += 1;
        if !ok {
            self.orders_failed += 1;
        }
    }
}

/// Convenience wrapper around [`StrategyLoop`].
pub async fn run_strategy_loop<P, S>(platform: &mut P, strategy: &S, config: LoopConfig) -> RunSummary
where
    P: TradingPlatform + ?Sized,
    S: Strategy + ?Sized,
{
    StrategyLoop::new(platform, strategy, config).run().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, TimeZone};
    use fxbot_brokers_common::{SimulatedTerminal, SimulatedTerminalConfig};
    use fxbot_strategies::{BreakoutReversalConfig, BreakoutReversalStrategy};
    use rust_decimal_macros::dec;

    /// Bars whose (high, low, close) rows follow `rows`.
    fn bars(rows: &[(Decimal, Decimal, Decimal)]) -> Vec<Bar> {
        let start = Utc.with_ymd_and_hms(2024, 1, 15, 9, 0, 0).unwrap();
        rows.iter()
            .enumerate()
            .map(|(i, (high, low, close))| Bar {
                symbol: "USDCAD".to_string(),
                timestamp: start + ChronoDuration::minutes(i as i64),
                open: *close,
                high: *high,
                low: *low,
                close: *close,
                volume: dec!(5),
            })
            .collect()
    }

    fn credentials() -> Credentials {
        Credentials {
            login: 42,
            password: "pw".to_string(),
            server: "Sim".to_string(),
        }
    }

    fn config(iterations: u64) -> LoopConfig {
        LoopConfig {
            quantity: dec!(10),
            poll_interval: Duration::ZERO,
            termination: TerminationPolicy::Bounded(iterations),
            ..Default::default()
        }
    }

    async fn ready(rows: &[(Decimal, Decimal, Decimal)]) -> SimulatedTerminal {
        let sim = SimulatedTerminalConfig {
            spread: Decimal::ZERO,
            ..Default::default()
        };
        let mut term = SimulatedTerminal::new(sim, bars(rows));
        start_session(&mut term, &credentials()).await.unwrap();
        term
    }

    fn strategy() -> BreakoutReversalStrategy {
        BreakoutReversalStrategy::new(BreakoutReversalConfig::default())
    }

    #[test]
    fn test_termination_policy() {
        assert!(TerminationPolicy::Infinite.allows(u64::MAX - 1));
        let bounded = TerminationPolicy::from_iterations(Some(2));
        assert!(bounded.allows(0));
        assert!(bounded.allows(1));
        assert!(!bounded.allows(2));
        assert!(!TerminationPolicy::Bounded(0).allows(0));
        assert_eq!(TerminationPolicy::from_iterations(None), TerminationPolicy::Infinite);
    }

    #[tokio::test]
    async fn test_start_session_fails_on_login() {
        let mut term = SimulatedTerminal::new(SimulatedTerminalConfig::default(), Vec::new())
            .with_failing_login();
        let err = start_session(&mut term, &credentials()).await.unwrap_err();
        assert!(matches!(err, EngineError::Login(_)));
    }

    #[tokio::test]
    async fn test_bounded_policy_stops() {
        let mut term = ready(&[(dec!(1.36), dec!(1.34), dec!(1.35))]).await;
        let summary = run_strategy_loop(&mut term, &strategy(), config(3)).await;
        assert_eq!(summary.iterations, 3);
        // A single bar never satisfies the two-bar requirement.
        assert_eq!(summary.skipped_iterations, 3);
        assert_eq!(summary.orders_sent, 0);
    }

    #[tokio::test]
    async fn test_breakout_opens_then_reverses() {
        let rows = [
            (dec!(1.3510), dec!(1.3490), dec!(1.3500)),
            // Breaks above 1.3510: open long.
            (dec!(1.3530), dec!(1.3500), dec!(1.3520)),
            // Falls below 1.3500: close long, open short.
            (dec!(1.3500), dec!(1.3480), dec!(1.3490)),
            // Back above 1.3490 without breaking out: close short.
            (dec!(1.3499), dec!(1.3491), dec!(1.3499)),
        ];
        let mut term = ready(&rows).await;
        let summary = run_strategy_loop(&mut term, &strategy(), config(4)).await;

        assert_eq!(summary.iterations, 4);
        assert_eq!(summary.skipped_iterations, 1);
        assert_eq!(summary.orders_sent, 4);
        assert_eq!(summary.orders_failed, 0);
        assert_eq!(summary.deals.len(), 2);

        let long = &summary.deals[0];
        assert_eq!(long.side, Side::Buy);
        assert_eq!(long.entry_price, dec!(1.3520));
        assert_eq!(long.profit, Some(dec!(-0.03)));

        let short = &summary.deals[1];
        assert_eq!(short.side, Side::Sell);
        assert_eq!(short.entry_price, dec!(1.3490));
        assert_eq!(short.profit, Some(dec!(-0.01)));
        assert_eq!(summary.realized_profit, dec!(-0.04));
        assert!(term.positions().is_empty());

        let sides: Vec<(Side, bool)> = term
            .sent_orders()
            .iter()
            .map(|o| (o.side, o.is_close()))
            .collect();
        assert_eq!(
            sides,
            vec![
                (Side::Buy, false),
                (Side::Sell, true),
                (Side::Sell, false),
                (Side::Buy, true),
            ]
        );
    }

    #[tokio::test]
    async fn test_failed_close_skips_reverse_open() {
        let rows = [
            (dec!(1.3510), dec!(1.3490), dec!(1.3500)),
            (dec!(1.3530), dec!(1.3500), dec!(1.3520)),
            (dec!(1.3500), dec!(1.3480), dec!(1.3490)),
        ];
        let mut term = ready(&rows).await;

        // Let the first two iterations run, then reject the flip's close leg.
        let first = run_strategy_loop(&mut term, &strategy(), config(2)).await;
        assert_eq!(first.orders_sent, 1);
        term.reject_next(10019);
        let second = run_strategy_loop(&mut term, &strategy(), config(1)).await;

        assert_eq!(second.orders_sent, 1);
        assert_eq!(second.orders_failed, 1);
        assert!(second.deals.is_empty());
        assert_eq!(term.positions().len(), 1);
        assert_eq!(term.positions()[0].side, Side::Buy);
    }

    #[tokio::test]
    async fn test_multiple_positions_skip_iteration() {
        let rows = [
            (dec!(1.3510), dec!(1.3490), dec!(1.3500)),
            (dec!(1.3530), dec!(1.3500), dec!(1.3520)),
        ];
        let mut term = ready(&rows).await;
        term.inject_position(Side::Buy, dec!(1), dec!(1.35));
        term.inject_position(Side::Sell, dec!(1), dec!(1.35));

        let summary = run_strategy_loop(&mut term, &strategy(), config(2)).await;
        assert_eq!(summary.skipped_iterations, 2);
        assert!(term.sent_orders().is_empty());
    }

    #[tokio::test]
    async fn test_close_of_foreign_position_books_nothing() {
        let rows = [
            (dec!(1.3510), dec!(1.3490), dec!(1.3500)),
            (dec!(1.3500), dec!(1.3495), dec!(1.3498)),
        ];
        let mut term = ready(&rows).await;
        term.inject_position(Side::Buy, dec!(10), dec!(1.3505));

        let summary = run_strategy_loop(&mut term, &strategy(), config(2)).await;
        assert_eq!(summary.orders_sent, 1);
        assert_eq!(summary.orders_failed, 0);
        assert!(summary.deals.is_empty());
        assert!(term.positions().is_empty());
    }
}
