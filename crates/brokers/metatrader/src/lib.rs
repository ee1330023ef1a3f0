//! MetaTrader 5 terminal client.
//!
//! The terminal's client API is only reachable from inside the terminal host,
//! so a small bridge process (an MQL5 EA or a script using the terminal
//! package) exposes it on a local socket. This crate speaks that socket
//! protocol and implements [`fxbot_core::TradingPlatform`] on top of it.

pub mod client;
pub mod protocol;

pub use client::{MetaTraderBridge, MetaTraderConfig};
