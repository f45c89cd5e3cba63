use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Market data handed to the core for one cycle.
///
/// Produced by a [`crate::MarketFeed`] before the core runs. The core never
/// reads the wall clock; `date` is the effective journal date.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub date: NaiveDate,
    pub spot_price: f64,
    /// `None` when the provider returned no funding data for the interval.
    pub funding_rate: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

/// Side recorded on a playbook entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    /// No trigger condition was met.
    None,
    /// Open trade whose direction is carried only by its levels.
    Pending,
    Long,
    Short,
}

impl Side {
    /// True for `long` and `short`, the sides that count as trade days.
    pub fn is_directional(self) -> bool {
        matches!(self, Side::Long | Side::Short)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Side::None => "none",
            Side::Pending => "pending",
            Side::Long => "long",
            Side::Short => "short",
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Direction of a triggered trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Long,
    Short,
}

impl From<Direction> for Side {
    fn from(direction: Direction) -> Self {
        match direction {
            Direction::Long => Side::Long,
            Direction::Short => Side::Short,
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Long => write!(f, "long"),
            Direction::Short => write!(f, "short"),
        }
    }
}

/// Entry, stop and take-profit prices of a triggered day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Levels {
    pub entry: f64,
    pub stop: f64,
    /// Ordered nearest-first from the entry.
    pub targets: Vec<f64>,
}

impl Levels {
    /// Distance from entry to stop: one R.
    pub fn risk(&self) -> f64 {
        (self.entry - self.stop).abs()
    }

    /// A stop above the entry means a short.
    pub fn direction(&self) -> Direction {
        if self.stop > self.entry {
            Direction::Short
        } else {
            Direction::Long
        }
    }

    /// Signed R earned by exiting at `price`.
    pub fn r_at(&self, price: f64) -> f64 {
        let risk = self.risk();
        if risk <= 0.0 {
            return 0.0;
        }
        match self.direction() {
            Direction::Long => (price - self.entry) / risk,
            Direction::Short => (self.entry - price) / risk,
        }
    }
}

/// How a day ended.
///
/// Serialized as a flat string (`no_trigger`, `pending`, `stopped`,
/// `expired_close`, `tp_hit_<price>`) so breakdown keys stay literal.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum Exit {
    NoTrigger,
    Pending,
    Stopped,
    ExpiredClose,
    /// Take-profit at the contained target price.
    TpHit(f64),
}

impl Exit {
    const TP_HIT_PREFIX: &'static str = "tp_hit_";

    pub fn is_pending(&self) -> bool {
        matches!(self, Exit::Pending)
    }
}

impl std::fmt::Display for Exit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Exit::NoTrigger => write!(f, "no_trigger"),
            Exit::Pending => write!(f, "pending"),
            Exit::Stopped => write!(f, "stopped"),
            Exit::ExpiredClose => write!(f, "expired_close"),
            Exit::TpHit(price) => write!(f, "{}{price:.2}", Self::TP_HIT_PREFIX),
        }
    }
}

impl FromStr for Exit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "no_trigger" => Ok(Exit::NoTrigger),
            "pending" => Ok(Exit::Pending),
            "stopped" => Ok(Exit::Stopped),
            "expired_close" => Ok(Exit::ExpiredClose),
            other => other
                .strip_prefix(Self::TP_HIT_PREFIX)
                .and_then(|p| p.parse::<f64>().ok())
                .filter(|p| p.is_finite())
                .map(Exit::TpHit)
                .ok_or_else(|| format!("unknown exit tag '{other}'")),
        }
    }
}

impl From<Exit> for String {
    fn from(exit: Exit) -> Self {
        exit.to_string()
    }
}

impl TryFrom<String> for Exit {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// One journal day. The date is the identity; once `exit` leaves `pending`
/// the entry is never rewritten.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybookEntry {
    pub date: NaiveDate,
    pub side: Side,
    pub filled: bool,
    #[serde(default)]
    pub levels: Option<Levels>,
    pub exit: Exit,
    pub r_multiple: f64,
    /// Snapshot time that opened the day; start of the finalization path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opened_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spot_price: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub funding_rate: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl PlaybookEntry {
    /// A terminal day on which nothing triggered.
    pub fn no_trigger(date: NaiveDate) -> Self {
        Self {
            date,
            side: Side::None,
            filled: false,
            levels: None,
            exit: Exit::NoTrigger,
            r_multiple: 0.0,
            opened_at: None,
            spot_price: None,
            funding_rate: None,
            note: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.exit.is_pending()
    }

    /// Describe the first broken entry invariant, if any.
    ///
    /// A filled `expired_close` that closed exactly at the entry carries
    /// `0.0` R and is accepted.
    pub fn invariant_violation(&self) -> Option<String> {
        let r = self.r_multiple;
        if self.side == Side::Pending && !self.is_pending() {
            return Some(format!("side pending with exit {}", self.exit));
        }
        if (self.exit == Exit::Stopped) != (r == -1.0) {
            return Some(format!("exit {} with r_multiple {r}", self.exit));
        }
        if matches!(self.exit, Exit::NoTrigger | Exit::Pending) && r != 0.0 {
            return Some(format!("exit {} with r_multiple {r}", self.exit));
        }
        if self.filled && !self.side.is_directional() {
            return Some(format!("filled entry with side {}", self.side));
        }
        if self.filled && self.is_pending() {
            return Some("pending entry marked filled".to_string());
        }
        if self.side != Side::None && self.levels.is_none() {
            return Some(format!("side {} without levels", self.side));
        }
        if self.side == Side::None && self.exit != Exit::NoTrigger {
            return Some(format!("side none with exit {}", self.exit));
        }
        None
    }
}

/// One point of the intraday price path. A single trade print is an
/// observation with `high == low == close`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceObservation {
    pub at: DateTime<Utc>,
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

impl PriceObservation {
    pub fn tick(at: DateTime<Utc>, price: f64) -> Self {
        Self {
            at,
            high: price,
            low: price,
            close: price,
        }
    }

    /// True when price traded at or above `level` during the observation.
    pub fn reaches_up(&self, level: f64) -> bool {
        self.high >= level
    }

    /// True when price traded at or below `level` during the observation.
    pub fn reaches_down(&self, level: f64) -> bool {
        self.low <= level
    }
}

/// Observations after a pending entry was opened, up to the resolution
/// deadline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricePath {
    pub observations: Vec<PriceObservation>,
    pub expires_at: DateTime<Utc>,
}
