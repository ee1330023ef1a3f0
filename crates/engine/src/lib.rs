pub mod execution;
pub mod ledger;
pub mod live;
pub mod session;

pub use execution::{OrderExecutor, OrderFailure};
pub use ledger::{deal_profit, DealLedger};
pub use live::{
    run_strategy_loop, start_session, EngineError, LoopConfig, RunSummary, StrategyLoop,
    TerminationPolicy,
};
pub use session::{SessionClock, SessionWindow};
