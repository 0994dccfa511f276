//! Point-in-Time Accessor
//!
//! `BarData` answers "what is the spot value of field F for asset A right
//! now" while the simulation clock advances minute by minute. It layers
//! tradability, staleness, and forward-fill semantics over the raw column
//! store.
//!
//! # Tradability state machine
//!
//! Three states per asset, driven purely by the advancing current minute:
//!
//! - `NotYetActive`: before the asset's nominal start date, or within the
//!   first active session but before the first minute with a recorded trade
//!   (partial-day listing). The boundary is data-derived, not date-derived.
//! - `Active { stale }`: nominally listed and at/after the first traded
//!   minute. Stale iff the current minute itself has no recorded trade.
//! - `Delisted`: after the nominal end date. Terminal; no re-entry.
//!
//! # Query forms
//!
//! Scalar, multi-field, multi-asset, and table queries are all thin
//! projections over one canonical per-(asset, field) evaluation, so the four
//! forms agree bit-for-bit (or are all missing) by construction.
//!
//! The current minute is an explicit parameter on every call; the accessor
//! holds no mutable state and is safe to invoke concurrently once a
//! session's data has been published.

use crate::assets::{AssetDirectory, Sid};
use crate::bars::Field;
use crate::calendar::TradingCalendar;
use crate::clock::Minute;
use crate::error::Result;
use crate::store::MinuteBarReader;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;

/// Tradability of one asset at one minute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradingState {
    /// Before the asset's first recorded trade (or nominal start date).
    NotYetActive,
    /// Nominally listed and past its first trade. `stale` is true when the
    /// current minute itself carries no trade.
    Active { stale: bool },
    /// After the nominal end date. Terminal.
    Delisted,
}

impl TradingState {
    #[inline]
    pub fn can_trade(&self) -> bool {
        matches!(self, TradingState::Active { .. })
    }

    #[inline]
    pub fn is_stale(&self) -> bool {
        matches!(self, TradingState::Active { stale: true })
    }
}

/// One field's point-in-time value.
///
/// Each field has its own missing-value convention: NaN for price-like
/// fields, zero for volume, None for last_traded.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SpotValue {
    /// open/high/low/close/price. NaN when missing.
    Price(f64),
    /// volume. Zero when no trade this minute.
    Volume(u64),
    /// Absolute minute of the most recent trade. None if the asset has
    /// never traded.
    LastTraded(Option<Minute>),
}

impl SpotValue {
    /// True if this value is the field's missing-value sentinel.
    pub fn is_missing(&self) -> bool {
        match self {
            SpotValue::Price(v) => v.is_nan(),
            SpotValue::Volume(v) => *v == 0,
            SpotValue::LastTraded(m) => m.is_none(),
        }
    }

    /// Equality where a missing value matches a missing value (NaN == NaN).
    /// This is the relation the cross-form consistency guarantee is stated
    /// in.
    pub fn same_value(&self, other: &SpotValue) -> bool {
        match (self, other) {
            (SpotValue::Price(a), SpotValue::Price(b)) => {
                (a.is_nan() && b.is_nan()) || a == b
            }
            (SpotValue::Volume(a), SpotValue::Volume(b)) => a == b,
            (SpotValue::LastTraded(a), SpotValue::LastTraded(b)) => a == b,
            _ => false,
        }
    }

    pub fn as_price(&self) -> Option<f64> {
        match self {
            SpotValue::Price(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_volume(&self) -> Option<u64> {
        match self {
            SpotValue::Volume(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_last_traded(&self) -> Option<Minute> {
        match self {
            SpotValue::LastTraded(m) => *m,
            _ => None,
        }
    }
}

/// Point-in-time view over the column store.
pub struct BarData {
    reader: Arc<MinuteBarReader>,
    calendar: Arc<TradingCalendar>,
    assets: Arc<AssetDirectory>,
}

impl BarData {
    pub fn new(
        reader: Arc<MinuteBarReader>,
        calendar: Arc<TradingCalendar>,
        assets: Arc<AssetDirectory>,
    ) -> Self {
        Self {
            reader,
            calendar,
            assets,
        }
    }

    /// Evaluate the tradability state machine for one asset at `at`.
    pub fn trading_state(&self, sid: Sid, at: Minute) -> Result<TradingState> {
        let asset = self.assets.retrieve(sid)?;
        let (session_idx, _) = self.calendar.minute_to_session(at)?;
        let date = self.calendar.session_date(session_idx)?;

        if date < asset.start_date {
            return Ok(TradingState::NotYetActive);
        }
        if date > asset.end_date {
            return Ok(TradingState::Delisted);
        }

        // Within the nominal window the boundary is data-derived: the asset
        // becomes tradable at its first recorded trade, which for a
        // partial-day listing is mid-session.
        match self.reader.first_trade_minute(sid) {
            None => Ok(TradingState::NotYetActive),
            Some(first) if at < first => Ok(TradingState::NotYetActive),
            Some(_) => Ok(TradingState::Active {
                stale: self.reader.read_volume(sid, at) == 0,
            }),
        }
    }

    pub fn can_trade(&self, sid: Sid, at: Minute) -> Result<bool> {
        Ok(self.trading_state(sid, at)?.can_trade())
    }

    pub fn is_stale(&self, sid: Sid, at: Minute) -> Result<bool> {
        Ok(self.trading_state(sid, at)?.is_stale())
    }

    pub fn can_trade_all(&self, sids: &[Sid], at: Minute) -> Result<HashMap<Sid, bool>> {
        sids.iter()
            .map(|&sid| Ok((sid, self.can_trade(sid, at)?)))
            .collect()
    }

    pub fn is_stale_all(&self, sids: &[Sid], at: Minute) -> Result<HashMap<Sid, bool>> {
        sids.iter()
            .map(|&sid| Ok((sid, self.is_stale(sid, at)?)))
            .collect()
    }

    /// Canonical per-(asset, field) evaluation. Every query form is a
    /// projection of this function.
    pub fn evaluate(&self, sid: Sid, field: Field, at: Minute) -> Result<SpotValue> {
        self.assets.retrieve(sid)?;
        self.calendar.minute_to_session(at)?;

        Ok(match field {
            Field::Open | Field::High | Field::Low | Field::Close => {
                SpotValue::Price(self.reader.read_price(sid, at, field))
            }
            Field::Volume => SpotValue::Volume(self.reader.read_volume(sid, at)),
            // price and last_traded share one backward search, so a filled
            // price always has a matching last_traded minute.
            Field::Price => match self.reader.last_traded_at_or_before(sid, at) {
                Some(m) => SpotValue::Price(self.reader.read_price(sid, m, Field::Close)),
                None => SpotValue::Price(f64::NAN),
            },
            Field::LastTraded => {
                SpotValue::LastTraded(self.reader.last_traded_at_or_before(sid, at))
            }
        })
    }

    /// Single asset, single field.
    pub fn spot_value(&self, sid: Sid, field: &str, at: Minute) -> Result<SpotValue> {
        let field: Field = field.parse()?;
        self.evaluate(sid, field, at)
    }

    /// Single asset, multiple fields.
    pub fn spot_values(
        &self,
        sid: Sid,
        fields: &[&str],
        at: Minute,
    ) -> Result<HashMap<Field, SpotValue>> {
        fields
            .iter()
            .map(|name| {
                let field: Field = name.parse()?;
                Ok((field, self.evaluate(sid, field, at)?))
            })
            .collect()
    }

    /// Multiple assets, single field.
    pub fn spot_value_assets(
        &self,
        sids: &[Sid],
        field: &str,
        at: Minute,
    ) -> Result<HashMap<Sid, SpotValue>> {
        let field: Field = field.parse()?;
        sids.iter()
            .map(|&sid| Ok((sid, self.evaluate(sid, field, at)?)))
            .collect()
    }

    /// Multiple assets, multiple fields.
    pub fn spot_value_table(
        &self,
        sids: &[Sid],
        fields: &[&str],
        at: Minute,
    ) -> Result<HashMap<Sid, HashMap<Field, SpotValue>>> {
        sids.iter()
            .map(|&sid| Ok((sid, self.spot_values(sid, fields, at)?)))
            .collect()
    }

    /// Wall-clock timestamp of the most recent trade at or before `at`.
    pub fn last_traded_timestamp(&self, sid: Sid, at: Minute) -> Result<Option<DateTime<Utc>>> {
        match self.evaluate(sid, Field::LastTraded, at)? {
            SpotValue::LastTraded(Some(minute)) => Ok(Some(self.calendar.minute_timestamp(minute)?)),
            _ => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::Asset;
    use crate::bars::Bar;
    use crate::calendar::US_EQUITIES_MINUTES_PER_SESSION;
    use crate::error::BarDataError;
    use crate::store::MinuteBarWriter;
    use chrono::{NaiveDate, NaiveTime};
    use tempfile::TempDir;

    const MPS: u64 = US_EQUITIES_MINUTES_PER_SESSION as u64;

    fn test_calendar() -> Arc<TradingCalendar> {
        // Mon Jan 4 .. Fri Jan 8, 2016
        Arc::new(
            TradingCalendar::weekdays(
                NaiveDate::from_ymd_opt(2016, 1, 4).unwrap(),
                NaiveDate::from_ymd_opt(2016, 1, 8).unwrap(),
                NaiveTime::from_hms_opt(14, 31, 0).unwrap(),
                US_EQUITIES_MINUTES_PER_SESSION,
            )
            .unwrap(),
        )
    }

    fn test_assets() -> Arc<AssetDirectory> {
        let dir = AssetDirectory::open_memory().unwrap();
        for sid in [1, 2] {
            dir.insert(&Asset {
                sid,
                symbol: format!("ASSET{}", sid),
                start_date: NaiveDate::from_ymd_opt(2016, 1, 5).unwrap(),
                end_date: NaiveDate::from_ymd_opt(2016, 1, 7).unwrap(),
            })
            .unwrap();
        }
        Arc::new(dir)
    }

    /// One session of bars for written day `day` (0-based): slot values run
    /// from day*390+1, every `interval`-th slot populated.
    fn day_bars(day: u64, interval: usize) -> Vec<Bar> {
        (0..MPS as usize)
            .map(|slot| {
                if (slot + 1) % interval == 0 {
                    let base = (day * MPS + slot as u64 + 1) as f64;
                    Bar::new(
                        base + 1.0,
                        base + 2.0,
                        base - 1.0,
                        base,
                        (day * MPS + slot as u64 + 1) * 100,
                    )
                } else {
                    Bar::SENTINEL
                }
            })
            .collect()
    }

    /// Asset 1 trades every minute, asset 2 every 10th minute; data covers
    /// sessions 1 and 2 (Jan 5 and Jan 6) of a five-session calendar where
    /// both assets are listed Jan 5 through Jan 7.
    fn fixture(dir: &TempDir) -> BarData {
        let calendar = test_calendar();
        let mut writer = MinuteBarWriter::new(dir.path(), calendar.clone()).unwrap();
        for (day, session) in [1usize, 2].into_iter().enumerate() {
            writer
                .write_session(1, session, &day_bars(day as u64, 1))
                .unwrap();
            writer
                .write_session(2, session, &day_bars(day as u64, 10))
                .unwrap();
        }

        let reader = Arc::new(MinuteBarReader::new(dir.path(), calendar.clone()).unwrap());
        BarData::new(reader, calendar, test_assets())
    }

    #[test]
    fn test_unknown_field_is_invalid_argument() {
        let dir = TempDir::new().unwrap();
        let bar_data = fixture(&dir);
        assert!(matches!(
            bar_data.spot_value(1, "vwap", MPS),
            Err(BarDataError::UnknownField(_))
        ));
    }

    #[test]
    fn test_unknown_asset_is_invalid_argument() {
        let dir = TempDir::new().unwrap();
        let bar_data = fixture(&dir);
        assert!(matches!(
            bar_data.spot_value(99, "close", MPS),
            Err(BarDataError::UnknownAsset(99))
        ));
        assert!(matches!(
            bar_data.can_trade(99, MPS),
            Err(BarDataError::UnknownAsset(99))
        ));
    }

    #[test]
    fn test_minute_out_of_calendar_is_invalid_argument() {
        let dir = TempDir::new().unwrap();
        let bar_data = fixture(&dir);
        assert!(matches!(
            bar_data.spot_value(1, "close", 5 * MPS),
            Err(BarDataError::MinuteOutOfRange(_))
        ));
    }

    #[test]
    fn test_state_machine_before_listing() {
        let dir = TempDir::new().unwrap();
        let bar_data = fixture(&dir);

        // All of session 0 (Jan 4) precedes both assets' start date
        for at in [0, 100, MPS - 1] {
            for sid in [1, 2] {
                assert_eq!(
                    bar_data.trading_state(sid, at).unwrap(),
                    TradingState::NotYetActive
                );
                assert!(!bar_data.can_trade(sid, at).unwrap());
                assert!(!bar_data.is_stale(sid, at).unwrap());
            }
        }
    }

    #[test]
    fn test_state_machine_partial_day_listing() {
        let dir = TempDir::new().unwrap();
        let bar_data = fixture(&dir);

        // Asset 2's first trade is slot 9 of session 1
        for slot in 0..9 {
            assert_eq!(
                bar_data.trading_state(2, MPS + slot).unwrap(),
                TradingState::NotYetActive
            );
        }
        assert_eq!(
            bar_data.trading_state(2, MPS + 9).unwrap(),
            TradingState::Active { stale: false }
        );
        assert_eq!(
            bar_data.trading_state(2, MPS + 10).unwrap(),
            TradingState::Active { stale: true }
        );

        // Asset 1 trades from the first slot
        assert_eq!(
            bar_data.trading_state(1, MPS).unwrap(),
            TradingState::Active { stale: false }
        );
    }

    #[test]
    fn test_state_machine_listed_day_without_data() {
        let dir = TempDir::new().unwrap();
        let bar_data = fixture(&dir);

        // Session 3 (Jan 7) is inside the nominal window but has no written
        // data: tradable and stale for the whole session.
        let at = 3 * MPS + 123;
        assert_eq!(
            bar_data.trading_state(1, at).unwrap(),
            TradingState::Active { stale: true }
        );
        assert!(bar_data.can_trade(1, at).unwrap());
        assert!(bar_data.is_stale(1, at).unwrap());
    }

    #[test]
    fn test_state_machine_delisting_is_terminal() {
        let dir = TempDir::new().unwrap();
        let bar_data = fixture(&dir);

        // Session 4 (Jan 8) is past end_date
        let at = 4 * MPS;
        for sid in [1, 2] {
            assert_eq!(
                bar_data.trading_state(sid, at).unwrap(),
                TradingState::Delisted
            );
            assert!(!bar_data.can_trade(sid, at).unwrap());
            assert!(!bar_data.is_stale(sid, at).unwrap());
        }
    }

    #[test]
    fn test_ohlc_ignores_tradability() {
        let dir = TempDir::new().unwrap();
        let bar_data = fixture(&dir);

        // Delisted asset: raw fields simply have no data for the minute
        let at = 4 * MPS + 5;
        assert!(bar_data
            .spot_value(1, "close", at)
            .unwrap()
            .as_price()
            .unwrap()
            .is_nan());
        assert_eq!(
            bar_data.spot_value(1, "volume", at).unwrap(),
            SpotValue::Volume(0)
        );
    }

    #[test]
    fn test_price_forward_fill() {
        let dir = TempDir::new().unwrap();
        let bar_data = fixture(&dir);

        // Asset 2, session 1, slot 15: last trade was slot 9 (close = 10)
        let v = bar_data.spot_value(2, "price", MPS + 15).unwrap();
        assert_eq!(v, SpotValue::Price(10.0));

        // Slot 9 itself: close of that minute
        let v = bar_data.spot_value(2, "price", MPS + 9).unwrap();
        assert_eq!(v, SpotValue::Price(10.0));

        // Before any trade: nothing to fill from
        let v = bar_data.spot_value(2, "price", MPS + 3).unwrap();
        assert!(v.is_missing());
    }

    #[test]
    fn test_last_traded_survives_delisting() {
        let dir = TempDir::new().unwrap();
        let bar_data = fixture(&dir);

        // Final trade for both assets is the last slot of session 2
        let final_trade = 2 * MPS + 389;
        let at = 4 * MPS + 100; // after delisting

        for sid in [1, 2] {
            assert!(!bar_data.can_trade(sid, at).unwrap());
            assert_eq!(
                bar_data.spot_value(sid, "last_traded", at).unwrap(),
                SpotValue::LastTraded(Some(final_trade))
            );
        }

        // And price keeps forward-filling from it
        assert_eq!(
            bar_data.spot_value(1, "price", at).unwrap(),
            SpotValue::Price(780.0)
        );
    }

    #[test]
    fn test_last_traded_timestamp_conversion() {
        let dir = TempDir::new().unwrap();
        let bar_data = fixture(&dir);

        let at = MPS + 15;
        let ts = bar_data.last_traded_timestamp(2, at).unwrap().unwrap();
        let expected = bar_data.calendar.minute_timestamp(MPS + 9).unwrap();
        assert_eq!(ts, expected);

        // No history at all yet
        assert_eq!(bar_data.last_traded_timestamp(2, MPS + 3).unwrap(), None);
    }

    #[test]
    fn test_spot_value_volume_and_ohlc_values() {
        let dir = TempDir::new().unwrap();
        let bar_data = fixture(&dir);

        // Session 1, slot 4 for asset 1: base = 5
        let at = MPS + 4;
        assert_eq!(
            bar_data.spot_value(1, "open", at).unwrap(),
            SpotValue::Price(6.0)
        );
        assert_eq!(
            bar_data.spot_value(1, "high", at).unwrap(),
            SpotValue::Price(7.0)
        );
        assert_eq!(
            bar_data.spot_value(1, "low", at).unwrap(),
            SpotValue::Price(4.0)
        );
        assert_eq!(
            bar_data.spot_value(1, "close", at).unwrap(),
            SpotValue::Price(5.0)
        );
        assert_eq!(
            bar_data.spot_value(1, "volume", at).unwrap(),
            SpotValue::Volume(500)
        );
    }

    #[test]
    fn test_zero_low_sentinel_collision() {
        let dir = TempDir::new().unwrap();
        let bar_data = fixture(&dir);

        // Session 1, slot 0: low = 0 stored as sentinel, reported NaN
        let v = bar_data.spot_value(1, "low", MPS).unwrap();
        assert!(v.as_price().unwrap().is_nan());
        // Next slot's low is a real 1.0
        assert_eq!(
            bar_data.spot_value(1, "low", MPS + 1).unwrap(),
            SpotValue::Price(1.0)
        );
    }

    #[test]
    fn test_spot_value_same_value_relation() {
        let a = SpotValue::Price(f64::NAN);
        let b = SpotValue::Price(f64::NAN);
        assert!(a.same_value(&b));
        assert!(!a.same_value(&SpotValue::Price(1.0)));
        assert!(SpotValue::Volume(0).same_value(&SpotValue::Volume(0)));
        assert!(!SpotValue::Volume(0).same_value(&SpotValue::Price(0.0)));
        assert!(SpotValue::LastTraded(None).same_value(&SpotValue::LastTraded(None)));
    }
}
