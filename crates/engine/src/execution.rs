use chrono::{DateTime, Utc};
use fxbot_core::*;
use rust_decimal::Decimal;
use tracing::{error, info, warn};

use crate::ledger::DealLedger;

/// Why an order did not go through.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OrderFailure {
    #[error("rejected with return code {0}")]
    Rejected(u32),
    #[error("platform returned no result")]
    Unavailable,
    #[error("no open position to close")]
    NoPosition,
    #[error("{0}")]
    Platform(String),
}

/// Submits market orders for one symbol and keeps the deal ledger in step
/// with the fills.
pub struct OrderExecutor<'a, P: TradingPlatform + ?Sized> {
    platform: &'a mut P,
    ledger: &'a mut DealLedger,
    symbol: &'a str,
    quantity: Decimal,
}

impl<'a, P: TradingPlatform + ?Sized> OrderExecutor<'a, P> {
    pub fn new(
        platform: &'a mut P,
        ledger: &'a mut DealLedger,
        symbol: &'a str,
        quantity: Decimal,
    ) -> Self {
        Self {
            platform,
            ledger,
            symbol,
            quantity,
        }
    }

    async fn send(&mut self, request: &OrderRequest) -> Result<u64, OrderFailure> {
        match self.platform.order_send(request).await {
            Ok(OrderOutcome::Success { order_id }) => Ok(order_id),
            Ok(OrderOutcome::Rejected { code }) => Err(OrderFailure::Rejected(code)),
            Ok(OrderOutcome::Unavailable) => Err(OrderFailure::Unavailable),
            Err(e) => Err(OrderFailure::Platform(e.to_string())),
        }
    }

    /// Open a `side` position at `price` and record the deal on success.
    pub async fn open_position(
        &mut self,
        side: Side,
        price: Decimal,
        levels: ProtectiveLevels,
        at: DateTime<Utc>,
    ) -> Result<u64, OrderFailure> {
        let total = (self.quantity * price).round_dp(2);
        let request = OrderRequest::open(
            self.symbol,
            side,
            self.quantity,
            price,
            levels.stop_loss,
            levels.take_profit,
        );

        match self.send(&request).await {
            Ok(order_id) => {
                info!(
                    order_id,
                    sl = %levels.stop_loss,
                    tp = %levels.take_profit,
                    "{} Order Placed - {} @ {}; Total: {}.",
                    side,
                    self.quantity,
                    price,
                    total
                );
                self.ledger.record_open(side, price, self.quantity, at);
                Ok(order_id)
            }
            Err(failure) => {
                error!(reason = %failure, "Failed to place {} order.", side);
                Err(failure)
            }
        }
    }

    /// Close the open `position_side` position at `price`.
    ///
    /// Returns the profit booked against the ledger, or `None` when the
    /// ledger had no deal to match.
    pub async fn close_position(
        &mut self,
        position_side: Side,
        price: Decimal,
    ) -> Result<Option<Decimal>, OrderFailure> {
        let close_side = position_side.opposite();
        let result = self.try_close(position_side, price).await;

        match result {
            Ok(order_id) => {
                let total = (self.quantity * price).round_dp(2);
                info!(
                    order_id,
                    "{} Position Closed - {} @ {}; Total: {}.",
                    close_side,
                    self.quantity,
                    price,
                    total
                );
                let profit = self.ledger.record_close(position_side, price, self.quantity);
                if let Some(profit) = profit {
                    info!("Profit Made From {} Position: {}", close_side, profit);
                }
                Ok(profit)
            }
            Err(failure) => {
                error!(reason = %failure, "Failed to close {} position.", close_side);
                Err(failure)
            }
        }
    }

    async fn try_close(&mut self, position_side: Side, price: Decimal) -> Result<u64, OrderFailure> {
        let positions = self
            .platform
            .positions_get(self.symbol)
            .await
            .map_err(|e| OrderFailure::Platform(e.to_string()))?;
        let Some(position) = positions.iter().find(|p| p.side == position_side) else {
            warn!(symbol = %self.symbol, "No open position to close.");
            return Err(OrderFailure::NoPosition);
        };

        let request = OrderRequest::close(
            self.symbol,
            position_side.opposite(),
            self.quantity,
            price,
            position.ticket,
        );
        self.send(&request).await
    }
}
