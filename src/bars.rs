//! Minute Bars and Fields
//!
//! The OHLCV tuple for one (asset, minute), its fixed-point wire encoding,
//! and the field vocabulary the accessor understands.
//!
//! # Sentinel encoding
//!
//! A minute with no recorded trade is stored as the all-zero tuple. The store
//! has no concept of "missing" distinct from "zero": decoding a zero price
//! field yields NaN, and a zero volume stays zero. A genuine traded price of
//! exactly zero is therefore indistinguishable from "no trade" and is also
//! reported as NaN. Known limitation, inherited from the storage format.
//!
//! # Fixed-point prices
//!
//! Price fields are persisted as little-endian u32 at 1/1000 resolution
//! (`OHLC_RATIO`). Volume is persisted as a raw u32 count.

use crate::error::BarDataError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Fixed-point scale for persisted price fields.
pub const OHLC_RATIO: f64 = 1000.0;

/// Stored columns per bar: open, high, low, close, volume.
pub const COLUMNS_PER_BAR: usize = 5;

/// One minute's observation for one asset, in decoded form.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
}

impl Bar {
    /// The "no trade recorded this minute" tuple.
    pub const SENTINEL: Bar = Bar {
        open: 0.0,
        high: 0.0,
        low: 0.0,
        close: 0.0,
        volume: 0,
    };

    pub fn new(open: f64, high: f64, low: f64, close: f64, volume: u64) -> Self {
        Self {
            open,
            high,
            low,
            close,
            volume,
        }
    }

    /// True if this minute carries a trade (nonzero volume).
    #[inline]
    pub fn has_trade(&self) -> bool {
        self.volume > 0
    }

    /// Encoded column value for a stored field.
    pub fn encode_column(&self, col: usize) -> u32 {
        match col {
            0 => encode_price(self.open),
            1 => encode_price(self.high),
            2 => encode_price(self.low),
            3 => encode_price(self.close),
            4 => encode_volume(self.volume),
            _ => unreachable!("bar column index out of range: {}", col),
        }
    }
}

/// Encode a price into its fixed-point u32 form.
///
/// Non-finite and non-positive inputs collapse to the zero sentinel.
#[inline]
pub fn encode_price(price: f64) -> u32 {
    if !price.is_finite() || price <= 0.0 {
        return 0;
    }
    (price * OHLC_RATIO).round() as u32
}

/// Decode a fixed-point price. Zero decodes to NaN per sentinel semantics.
#[inline]
pub fn decode_price(raw: u32) -> f64 {
    if raw == 0 {
        f64::NAN
    } else {
        raw as f64 / OHLC_RATIO
    }
}

/// Encode a volume count. Saturates at the u32 column width.
#[inline]
pub fn encode_volume(volume: u64) -> u32 {
    volume.min(u32::MAX as u64) as u32
}

/// Decode a volume count. Zero is zero, not NaN.
#[inline]
pub fn decode_volume(raw: u32) -> u64 {
    raw as u64
}

/// A queryable field.
///
/// The first five are stored columns; `price` and `last_traded` are derived
/// by the accessor's forward-fill logic and never hit the store directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Field {
    Open,
    High,
    Low,
    Close,
    Volume,
    Price,
    LastTraded,
}

impl Field {
    pub const OHLC: [Field; 4] = [Field::Open, Field::High, Field::Low, Field::Close];

    pub const ALL: [Field; 7] = [
        Field::Open,
        Field::High,
        Field::Low,
        Field::Close,
        Field::Volume,
        Field::Price,
        Field::LastTraded,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Field::Open => "open",
            Field::High => "high",
            Field::Low => "low",
            Field::Close => "close",
            Field::Volume => "volume",
            Field::Price => "price",
            Field::LastTraded => "last_traded",
        }
    }

    /// Stored column index, or None for derived fields.
    pub fn column(&self) -> Option<usize> {
        match self {
            Field::Open => Some(0),
            Field::High => Some(1),
            Field::Low => Some(2),
            Field::Close => Some(3),
            Field::Volume => Some(4),
            Field::Price | Field::LastTraded => None,
        }
    }

    #[inline]
    pub fn is_derived(&self) -> bool {
        self.column().is_none()
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Field {
    type Err = BarDataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(Field::Open),
            "high" => Ok(Field::High),
            "low" => Ok(Field::Low),
            "close" => Ok(Field::Close),
            "volume" => Ok(Field::Volume),
            "price" => Ok(Field::Price),
            "last_traded" => Ok(Field::LastTraded),
            other => Err(BarDataError::UnknownField(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_price_encoding_roundtrip() {
        assert_eq!(encode_price(1.234), 1234);
        assert_eq!(decode_price(1234), 1.234);
        assert_eq!(encode_price(390.0), 390_000);
    }

    #[test]
    fn test_sentinel_decode() {
        // All-zero bar decodes to NaN prices and zero volume
        assert!(decode_price(0).is_nan());
        assert_eq!(decode_volume(0), 0);
        assert!(!Bar::SENTINEL.has_trade());
    }

    #[test]
    fn test_zero_price_collapses_to_sentinel() {
        // The documented ambiguity: a genuine 0.0 price encodes as "no trade"
        assert_eq!(encode_price(0.0), 0);
        assert!(decode_price(encode_price(0.0)).is_nan());
        assert_eq!(encode_price(f64::NAN), 0);
    }

    #[test]
    fn test_bar_column_encoding() {
        let bar = Bar::new(2.0, 3.0, 0.0, 1.0, 100);
        assert_eq!(bar.encode_column(0), 2000);
        assert_eq!(bar.encode_column(1), 3000);
        assert_eq!(bar.encode_column(2), 0); // zero low hits the sentinel
        assert_eq!(bar.encode_column(3), 1000);
        assert_eq!(bar.encode_column(4), 100);
    }

    #[test]
    fn test_field_parsing() {
        assert_eq!("open".parse::<Field>().unwrap(), Field::Open);
        assert_eq!("last_traded".parse::<Field>().unwrap(), Field::LastTraded);
        assert!(matches!(
            "vwap".parse::<Field>(),
            Err(BarDataError::UnknownField(_))
        ));
    }

    #[test]
    fn test_field_columns() {
        assert_eq!(Field::Open.column(), Some(0));
        assert_eq!(Field::Volume.column(), Some(4));
        assert!(Field::Price.is_derived());
        assert!(Field::LastTraded.is_derived());
    }
}
