//! # borsa-stream
//! ## Overview
//! A resilient client for a TradingView-style real-time market data
//! websocket: quote snapshots, candle/interval series, and server-computed
//! Pine studies, multiplexed over one connection behind a blocking API.
//!
//! The connection is driven on a dedicated background tokio runtime;
//! [`stream::BorsaStream`] exposes a synchronous, thread-safe surface over
//! it, including `wait_for_*` calls with timeouts and push-style
//! callbacks. A reconnect replays the session bootstrap and every live
//! subscription automatically.
//!
//! The [`condition`] module implements a small boolean expression
//! language over quote fields and indicator outputs for building
//! alert-style conditions (`"rsi_14 > 70 and volume > 1M"`).

pub mod auth;
pub mod condition;
pub mod dispatcher;
pub mod entities;
pub mod errors;
pub mod framer;
pub mod metadata;
pub mod protocol;
pub mod reconnect;
pub mod registry;
pub mod session;
pub mod store;
pub mod study;
pub mod stream;
