use fxbot_core::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Two-bar breakout / reversal strategy.
///
/// Goes long when the forming bar closes above the last completed bar's high,
/// short when it closes below that bar's low. An open position is closed once
/// price falls back through the last completed close against it.
#[derive(Debug, Clone)]
pub struct BreakoutReversalStrategy {
    id: String,
    config: BreakoutReversalConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakoutReversalConfig {
    /// Stop-loss distance as a fraction of the entry price.
    pub stop_loss_pct: Decimal,
    /// Take-profit distance as a fraction of the entry price.
    pub take_profit_pct: Decimal,
}

impl Default for BreakoutReversalConfig {
    fn default() -> Self {
        Self {
            stop_loss_pct: dec!(0.05),
            take_profit_pct: dec!(0.1),
        }
    }
}

/// Signals derived from the last two bars of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Conditions {
    pub long: bool,
    pub short: bool,
    pub close_long: bool,
    pub close_short: bool,
}

impl Conditions {
    /// Compare the latest close against the second-to-last bar.
    pub fn from_bars(bars: &[Bar]) -> Result<Self, StrategyError> {
        let [.., last_completed, current] = bars else {
            return Err(StrategyError::InsufficientBars {
                required: 2,
                available: bars.len(),
            });
        };
        let close = current.close;
        Ok(Self {
            long: close > last_completed.high,
            short: close < last_completed.low,
            close_long: close < last_completed.close,
            close_short: close > last_completed.close,
        })
    }

    /// Walk the decision table; the first matching row wins.
    pub fn decide(&self, position: PositionState) -> Decision {
        use PositionState::*;
        match position {
            Flat if self.long => Decision::Open(Side::Buy),
            Short if self.long => Decision::Reverse(Side::Buy),
            Flat if self.short => Decision::Open(Side::Sell),
            Long if self.short => Decision::Reverse(Side::Sell),
            Long if self.close_long => Decision::Close(Side::Buy),
            Short if self.close_short => Decision::Close(Side::Sell),
            _ => Decision::Hold,
        }
    }
}

/// Stop-loss and take-profit for a position of `side` entered at `price`.
pub fn protective_levels(
    side: Side,
    price: Decimal,
    stop_loss_pct: Decimal,
    take_profit_pct: Decimal,
) -> ProtectiveLevels {
    match side {
        Side::Buy => ProtectiveLevels {
            stop_loss: price * (Decimal::ONE - stop_loss_pct),
            take_profit: price * (Decimal::ONE + take_profit_pct),
        },
        Side::Sell => ProtectiveLevels {
            stop_loss: price * (Decimal::ONE + stop_loss_pct),
            take_profit: price * (Decimal::ONE - take_profit_pct),
        },
    }
}

impl BreakoutReversalStrategy {
    pub fn new(config: BreakoutReversalConfig) -> Self {
        Self {
            id: "breakout_reversal".to_string(),
            config,
        }
    }
}

impl Strategy for BreakoutReversalStrategy {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        "Breakout Reversal"
    }

    fn evaluate(
        &self,
        bars: &[Bar],
        position: PositionState,
        tick: &Tick,
    ) -> Result<Evaluation, StrategyError> {
        let conditions = Conditions::from_bars(bars)?;
        let decision = conditions.decide(position);

        // Closing a long sells at the bid, closing a short buys at the ask.
        let (price, levels) = match decision {
            Decision::Hold => (tick.bid, None),
            Decision::Open(side) | Decision::Reverse(side) => {
                let price = side.execution_price(tick);
                let levels = protective_levels(
                    side,
                    price,
                    self.config.stop_loss_pct,
                    self.config.take_profit_pct,
                );
                (price, Some(levels))
            }
            Decision::Close(side) => (side.opposite().execution_price(tick), None),
        };

        tracing::debug!(
            strategy = %self.id,
            ?conditions,
            ?position,
            ?decision,
            "Evaluated bar window"
        );

        Ok(Evaluation {
            decision,
            price,
            levels,
        })
    }
}
