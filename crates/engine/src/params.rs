use std::path::Path;

use serde::{Deserialize, Serialize};

use common::{Error, Result};

/// Tunable engine parameters.
///
/// Example `config/engine.toml` (every key optional):
/// ```toml
/// funding_threshold = 0.0003
/// entry_offset_pct = 0.003
/// risk_pct = 0.015
/// reward_multiples = [1.0, 2.0]
/// r_decimals = 4
/// clamp_expired_close = true
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineParams {
    /// Funding rate per interval beyond which the crowd is considered
    /// one-sided (e.g. 0.0003 = 0.03%). Above `+threshold` biases short,
    /// below `-threshold` biases long.
    pub funding_threshold: f64,
    /// Entry distance from spot in the bias direction (e.g. 0.003 = 0.3%).
    pub entry_offset_pct: f64,
    /// Stop distance as a fraction of the entry price: one R.
    pub risk_pct: f64,
    /// Target distances in R, nearest first.
    pub reward_multiples: Vec<f64>,
    /// Decimal places kept on every R-multiple.
    pub r_decimals: u32,
    /// Clamp expired-close R into `[-1, furthest target R]`.
    pub clamp_expired_close: bool,
}

impl Default for EngineParams {
    fn default() -> Self {
        Self {
            funding_threshold: 0.0003,
            entry_offset_pct: 0.003,
            risk_pct: 0.015,
            reward_multiples: vec![1.0, 2.0],
            r_decimals: 4,
            clamp_expired_close: true,
        }
    }
}

impl EngineParams {
    /// Load from a TOML file and validate.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("failed to read engine config at '{}': {e}", path.display()))
        })?;
        let params: EngineParams = toml::from_str(&content).map_err(|e| {
            Error::Config(format!("failed to parse engine config at '{}': {e}", path.display()))
        })?;
        params.validate()?;
        Ok(params)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.funding_threshold.is_finite() && self.funding_threshold >= 0.0) {
            return Err(Error::Config(format!(
                "funding_threshold must be a non-negative number, got {}",
                self.funding_threshold
            )));
        }
        if !(0.0..1.0).contains(&self.entry_offset_pct) {
            return Err(Error::Config(format!(
                "entry_offset_pct must be in [0, 1), got {}",
                self.entry_offset_pct
            )));
        }
        if !(self.risk_pct > 0.0 && self.risk_pct < 1.0) {
            return Err(Error::Config(format!(
                "risk_pct must be in (0, 1), got {}",
                self.risk_pct
            )));
        }
        if self.reward_multiples.is_empty() {
            return Err(Error::Config("reward_multiples must not be empty".into()));
        }
        if let Some(bad) = self
            .reward_multiples
            .iter()
            .find(|m| !(m.is_finite() && **m > 0.0))
        {
            return Err(Error::Config(format!("reward multiple must be positive, got {bad}")));
        }
        if self.r_decimals > 8 {
            return Err(Error::Config(format!(
                "r_decimals must be at most 8, got {}",
                self.r_decimals
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(EngineParams::default().validate().is_ok());
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let params: EngineParams = toml::from_str("risk_pct = 0.01\nreward_multiples = [1.5]").unwrap();
        assert_eq!(params.risk_pct, 0.01);
        assert_eq!(params.reward_multiples, vec![1.5]);
        assert_eq!(params.funding_threshold, EngineParams::default().funding_threshold);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(toml::from_str::<EngineParams>("risk_percent = 0.01").is_err());
    }

    #[test]
    fn invalid_values_fail_validation() {
        let cases = [
            EngineParams { risk_pct: 0.0, ..EngineParams::default() },
            EngineParams { funding_threshold: -0.1, ..EngineParams::default() },
            EngineParams { reward_multiples: vec![], ..EngineParams::default() },
            EngineParams { reward_multiples: vec![1.0, -2.0], ..EngineParams::default() },
            EngineParams { entry_offset_pct: 1.0, ..EngineParams::default() },
            EngineParams { r_decimals: 12, ..EngineParams::default() },
        ];
        for params in cases {
            assert!(
                matches!(params.validate(), Err(Error::Config(_))),
                "expected config error for {params:?}"
            );
        }
    }

    #[test]
    fn load_reports_missing_file() {
        let err = EngineParams::load(Path::new("/nonexistent/engine.toml")).unwrap_err();
        assert!(matches!(err, Error::Config(msg) if msg.contains("engine.toml")));
    }
}
