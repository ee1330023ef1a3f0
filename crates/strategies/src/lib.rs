pub mod breakout_reversal;

pub use breakout_reversal::{BreakoutReversalConfig, BreakoutReversalStrategy};
