//! Trade-state resolution: turns daily snapshots into playbook entries and
//! finalizes open days against the price path that followed them.

pub mod cycle;
pub mod params;
pub mod resolver;
pub mod simulator;

pub use cycle::{CycleOutcome, Journal};
pub use params::EngineParams;
pub use resolver::DayResolver;
pub use simulator::OutcomeSimulator;

/// Round to `decimals` places, half away from zero.
pub(crate) fn round_to(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    (value * factor).round() / factor
}
