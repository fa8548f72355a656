use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

/// Comparison applied between the sampled value and the configured threshold.
///
/// String representations match the config file format (`"greater_than"`,
/// `"less_than"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    GreaterThan,
    LessThan,
}

impl Operator {
    /// Parse a config-format string into an `Operator`.
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "greater_than" => Some(Self::GreaterThan),
            "less_than" => Some(Self::LessThan),
            _ => None,
        }
    }

    /// Return the config-format string representation.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::GreaterThan => "greater_than",
            Self::LessThan => "less_than",
        }
    }

    /// Strict comparison of `value` against `threshold`. Equality never holds.
    pub fn holds(self, value: Decimal, threshold: Decimal) -> bool {
        match self {
            Self::GreaterThan => value > threshold,
            Self::LessThan => value < threshold,
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One ticker sample for a single instrument.
///
/// Decimals keep the scale of the text they were parsed from, so `Display`
/// reproduces the exchange's own representation (`"1917.52148220"`).
#[derive(Debug, Clone, PartialEq)]
pub struct TickerSnapshot {
    pub instrument: String,
    pub last: Decimal,
    pub volume: Decimal,
    pub high_24h: Decimal,
    pub low_24h: Decimal,
    /// Fraction, `0.189` meaning 18.9%.
    pub percent_change_24h: Decimal,
    pub fetched_at: DateTime<Utc>,
}

/// Presentation hints for chat channels that render HTML.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelegramOptions {
    pub title: String,
    pub parse_mode: &'static str,
    pub disable_web_page_preview: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationPayload {
    pub channel_key: &'static str,
    pub title: String,
    pub body: String,
    pub telegram: TelegramOptions,
}
