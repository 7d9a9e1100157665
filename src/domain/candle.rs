//! Candle (OHLCV bar) representation and series identity.

use crate::domain::asset_pair::AssetPair;
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Which side or kind of price a candle series represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PriceType {
    Bid,
    Ask,
    Mid,
    Trades,
}

impl PriceType {
    pub const ALL: [PriceType; 4] = [
        PriceType::Bid,
        PriceType::Ask,
        PriceType::Mid,
        PriceType::Trades,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PriceType::Bid => "bid",
            PriceType::Ask => "ask",
            PriceType::Mid => "mid",
            PriceType::Trades => "trades",
        }
    }
}

impl fmt::Display for PriceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PriceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PriceType::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown price type '{s}'"))
    }
}

/// Bar width of a candle series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeInterval {
    Sec,
    Minute,
    Min5,
    Min15,
    Min30,
    Hour,
    Hour4,
    Hour6,
    Hour12,
    Day,
    Week,
}

impl TimeInterval {
    pub const ALL: [TimeInterval; 11] = [
        TimeInterval::Sec,
        TimeInterval::Minute,
        TimeInterval::Min5,
        TimeInterval::Min15,
        TimeInterval::Min30,
        TimeInterval::Hour,
        TimeInterval::Hour4,
        TimeInterval::Hour6,
        TimeInterval::Hour12,
        TimeInterval::Day,
        TimeInterval::Week,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TimeInterval::Sec => "sec",
            TimeInterval::Minute => "minute",
            TimeInterval::Min5 => "min5",
            TimeInterval::Min15 => "min15",
            TimeInterval::Min30 => "min30",
            TimeInterval::Hour => "hour",
            TimeInterval::Hour4 => "hour4",
            TimeInterval::Hour6 => "hour6",
            TimeInterval::Hour12 => "hour12",
            TimeInterval::Day => "day",
            TimeInterval::Week => "week",
        }
    }

    pub fn seconds(&self) -> i64 {
        match self {
            TimeInterval::Sec => 1,
            TimeInterval::Minute => 60,
            TimeInterval::Min5 => 5 * 60,
            TimeInterval::Min15 => 15 * 60,
            TimeInterval::Min30 => 30 * 60,
            TimeInterval::Hour => 3_600,
            TimeInterval::Hour4 => 4 * 3_600,
            TimeInterval::Hour6 => 6 * 3_600,
            TimeInterval::Hour12 => 12 * 3_600,
            TimeInterval::Day => 86_400,
            TimeInterval::Week => 7 * 86_400,
        }
    }

    pub fn duration(&self) -> TimeDelta {
        TimeDelta::seconds(self.seconds())
    }
}

impl fmt::Display for TimeInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TimeInterval {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TimeInterval::ALL
            .into_iter()
            .find(|i| i.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown time interval '{s}'"))
    }
}

/// A single OHLCV bar. Series membership is carried by [`SeriesKey`], not
/// by the candle itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub trading_volume: f64,
    pub opposite_volume: f64,
    pub last_trade_price: f64,
}

impl Candle {
    /// Copy of this candle with every price rounded to the pair's accuracy.
    /// Volumes are left untouched.
    pub fn rounded_for(&self, pair: &AssetPair) -> Candle {
        Candle {
            timestamp: self.timestamp,
            open: pair.round_price(self.open),
            high: pair.round_price(self.high),
            low: pair.round_price(self.low),
            close: pair.round_price(self.close),
            trading_volume: self.trading_volume,
            opposite_volume: self.opposite_volume,
            last_trade_price: pair.round_price(self.last_trade_price),
        }
    }
}

/// Identity of a candle series: (asset pair, price type, interval).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SeriesKey {
    pub asset_pair: String,
    pub price_type: PriceType,
    pub interval: TimeInterval,
}

impl SeriesKey {
    pub fn new(asset_pair: impl Into<String>, price_type: PriceType, interval: TimeInterval) -> Self {
        Self {
            asset_pair: asset_pair.into(),
            price_type,
            interval,
        }
    }
}

impl fmt::Display for SeriesKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.asset_pair, self.price_type, self.interval)
    }
}

impl FromStr for SeriesKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.rsplitn(3, ':');
        let interval: TimeInterval = parts.next().ok_or("missing interval")?.parse()?;
        let price_type: PriceType = parts.next().ok_or("missing price type")?.parse()?;
        let asset_pair = parts
            .next()
            .filter(|p| !p.is_empty())
            .ok_or_else(|| format!("missing asset pair in '{s}'"))?;
        Ok(SeriesKey::new(asset_pair, price_type, interval))
    }
}
