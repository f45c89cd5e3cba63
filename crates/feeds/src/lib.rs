//! Public market data over HTTP: BTC spot, perpetual funding and the
//! 15-minute bars used to replay an open day.

pub mod public;

pub use public::PublicFeed;
