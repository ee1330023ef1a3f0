use chrono::{DateTime, Utc};
use fxbot_core::{Deal, Side};
use rust_decimal::Decimal;
use tracing::warn;

/// In-memory record of the bot's own opening fills, used to report realized
/// profit when positions close. Never consulted for trading decisions.
#[derive(Debug, Clone, Default)]
pub struct DealLedger {
    deals: Vec<Deal>,
}

/// Profit of closing `quantity` of `deal` at `close_price`, rounded to cents.
pub fn deal_profit(deal: &Deal, close_price: Decimal, quantity: Decimal) -> Decimal {
    let price_diff = match deal.side {
        Side::Buy => close_price - deal.entry_price,
        Side::Sell => deal.entry_price - close_price,
    };
    (quantity * price_diff).round_dp(2)
}

impl DealLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_open(
        &mut self,
        side: Side,
        entry_price: Decimal,
        quantity: Decimal,
        opened_at: DateTime<Utc>,
    ) {
        self.deals.push(Deal {
            side,
            entry_price,
            quantity,
            profit: None,
            opened_at,
        });
    }

    /// Settle the most recent unmatched deal on `side` and return its profit.
    ///
    /// Deals on the other side are left alone: a long closed by its stop at
    /// the terminal must not absorb the profit of a later short.
    pub fn record_close(
        &mut self,
        side: Side,
        close_price: Decimal,
        quantity: Decimal,
    ) -> Option<Decimal> {
        let Some(deal) = self
            .deals
            .iter_mut()
            .rev()
            .find(|d| d.side == side && !d.is_closed())
        else {
            warn!(
                %side,
                price = %close_price,
                "Closed a position with no matching deal; profit not recorded"
            );
            return None;
        };
        let profit = deal_profit(deal, close_price, quantity);
        deal.profit = Some(profit);
        Some(profit)
    }

    pub fn deals(&self) -> &[Deal] {
        &self.deals
    }

    /// The deal still waiting for its close, if any.
    pub fn open_deal(&self) -> Option<&Deal> {
        self.deals.iter().rev().find(|d| !d.is_closed())
    }

    /// Sum of all settled profits.
    pub fn realized_profit(&self) -> Decimal {
        self.deals.iter().filter_map(|d| d.profit).sum()
    }

    pub fn into_deals(self) -> Vec<Deal> {
        self.deals
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn deal(side: Side, entry: Decimal) -> Deal {
        Deal {
            side,
            entry_price: entry,
            quantity: dec!(10),
            profit: None,
            opened_at: Utc::now(),
        }
    }

    #[test]
    fn test_long_profit_rounded() {
        let d = deal(Side::Buy, dec!(1.35));
        assert_eq!(deal_profit(&d, dec!(1.36), dec!(10)), dec!(0.10));
        // Below a cent rounds away.
        assert_eq!(deal_profit(&d, dec!(1.36), dec!(0.01)), dec!(0.00));
    }

    #[test]
    fn test_profit_antisymmetric() {
        let prices = [dec!(1.30), dec!(1.3512), dec!(1.40)];
        for close in prices {
            let long = deal_profit(&deal(Side::Buy, dec!(1.35)), close, dec!(25));
            let short = deal_profit(&deal(Side::Sell, dec!(1.35)), close, dec!(25));
            assert_eq!(long, -short, "close {close}");
        }
    }

    #[test]
    fn test_flat_round_trip_is_zero() {
        for side in [Side::Buy, Side::Sell] {
            let mut ledger = DealLedger::new();
            ledger.record_open(side, dec!(1.3500), dec!(10), Utc::now());
            assert_eq!(ledger.record_close(side, dec!(1.3500), dec!(10)), Some(dec!(0.00)));
        }
    }

    #[test]
    fn test_close_settles_latest_open_deal() {
        let mut ledger = DealLedger::new();
        ledger.record_open(Side::Buy, dec!(100), dec!(1), Utc::now());
        assert_eq!(ledger.record_close(Side::Buy, dec!(101), dec!(1)), Some(dec!(1)));
        ledger.record_open(Side::Sell, dec!(101), dec!(1), Utc::now());
        assert_eq!(ledger.open_deal().map(|d| d.side), Some(Side::Sell));

        assert_eq!(ledger.record_close(Side::Sell, dec!(99.5), dec!(1)), Some(dec!(1.5)));
        assert!(ledger.open_deal().is_none());
        assert_eq!(ledger.deals()[0].profit, Some(dec!(1)));
        assert_eq!(ledger.realized_profit(), dec!(2.5));
    }

    #[test]
    fn test_close_without_deal() {
        let mut ledger = DealLedger::new();
        assert_eq!(ledger.record_close(Side::Buy, dec!(1.35), dec!(1)), None);
        assert!(ledger.deals().is_empty());
        assert_eq!(ledger.realized_profit(), Decimal::ZERO);
    }

    #[test]
    fn test_close_ignores_deals_on_other_side() {
        let mut ledger = DealLedger::new();
        // Long stopped out at the terminal, never closed through the bot.
        ledger.record_open(Side::Buy, dec!(1.35), dec!(10), Utc::now());

        assert_eq!(ledger.record_close(Side::Sell, dec!(1.34), dec!(10)), None);
        assert!(!ledger.deals()[0].is_closed());

        ledger.record_open(Side::Sell, dec!(1.36), dec!(10), Utc::now());
        assert_eq!(ledger.record_close(Side::Sell, dec!(1.34), dec!(10)), Some(dec!(0.20)));
        assert_eq!(ledger.deals()[0].profit, None);
        assert_eq!(ledger.deals()[1].profit, Some(dec!(0.20)));
    }
}
