//! Trading Calendar
//!
//! Ordered trading sessions and the minute addressing scheme built on them.
//!
//! A session is one trading day with a fixed number of minute slots (390 for
//! a standard US equity session). The calendar is the sole authority for
//! translating an absolute minute offset into a (session, slot) pair, and for
//! attaching wall-clock timestamps to minutes. The store and the accessor
//! never do their own date math.
//!
//! # Addressing
//!
//! `minute = session_index * minutes_per_session + slot`
//!
//! Offsets are strictly increasing with session order and, within a session,
//! with slot order. There is no gap in the address space: the calendar only
//! enumerates valid trading minutes, so every offset below `total_minutes()`
//! is a real minute.

use crate::clock::Minute;
use crate::error::{BarDataError, Result};
use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, TimeZone, Utc, Weekday};
use std::collections::HashMap;

/// Minute slots in a standard US equities session (09:30-16:00).
pub const US_EQUITIES_MINUTES_PER_SESSION: u32 = 390;

/// One trading day.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub date: NaiveDate,
    /// Timestamp of the session's first minute slot.
    pub open: DateTime<Utc>,
}

/// Ordered sequence of trading sessions with fixed-length minute slots.
#[derive(Debug)]
pub struct TradingCalendar {
    sessions: Vec<Session>,
    minutes_per_session: u32,
    date_index: HashMap<NaiveDate, usize>,
}

impl TradingCalendar {
    /// Build a calendar from an explicit session list.
    ///
    /// Sessions must be non-empty and strictly increasing by date and open.
    pub fn new(sessions: Vec<Session>, minutes_per_session: u32) -> Result<Self> {
        if sessions.is_empty() {
            return Err(BarDataError::InvalidCalendar("empty session list".into()));
        }
        if minutes_per_session == 0 {
            return Err(BarDataError::InvalidCalendar(
                "minutes_per_session must be positive".into(),
            ));
        }
        for pair in sessions.windows(2) {
            if pair[1].date <= pair[0].date || pair[1].open <= pair[0].open {
                return Err(BarDataError::InvalidCalendar(format!(
                    "sessions out of order: {} then {}",
                    pair[0].date, pair[1].date
                )));
            }
        }

        let date_index = sessions
            .iter()
            .enumerate()
            .map(|(idx, s)| (s.date, idx))
            .collect();

        Ok(Self {
            sessions,
            minutes_per_session,
            date_index,
        })
    }

    /// Build a weekday-only calendar over an inclusive date range, with every
    /// session opening at `open_time` UTC.
    pub fn weekdays(
        start: NaiveDate,
        end: NaiveDate,
        open_time: NaiveTime,
        minutes_per_session: u32,
    ) -> Result<Self> {
        let mut sessions = Vec::new();
        let mut date = start;
        while date <= end {
            match date.weekday() {
                Weekday::Sat | Weekday::Sun => {}
                _ => sessions.push(Session {
                    date,
                    open: Utc.from_utc_datetime(&date.and_time(open_time)),
                }),
            }
            date = match date.succ_opt() {
                Some(next) => next,
                None => break,
            };
        }
        Self::new(sessions, minutes_per_session)
    }

    #[inline]
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    #[inline]
    pub fn minutes_per_session(&self) -> u32 {
        self.minutes_per_session
    }

    /// Total number of addressable minutes across all sessions.
    #[inline]
    pub fn total_minutes(&self) -> Minute {
        self.sessions.len() as Minute * self.minutes_per_session as Minute
    }

    pub fn sessions(&self) -> &[Session] {
        &self.sessions
    }

    pub fn session(&self, idx: usize) -> Result<&Session> {
        self.sessions
            .get(idx)
            .ok_or(BarDataError::UnknownSession(idx))
    }

    pub fn session_date(&self, idx: usize) -> Result<NaiveDate> {
        Ok(self.session(idx)?.date)
    }

    /// Index of the session trading on `date`, if any.
    pub fn session_index_for_date(&self, date: NaiveDate) -> Option<usize> {
        self.date_index.get(&date).copied()
    }

    pub fn previous_session(&self, idx: usize) -> Option<usize> {
        idx.checked_sub(1)
    }

    pub fn next_session(&self, idx: usize) -> Option<usize> {
        if idx + 1 < self.sessions.len() {
            Some(idx + 1)
        } else {
            None
        }
    }

    /// Map an absolute minute to its (session index, slot within session).
    pub fn minute_to_session(&self, minute: Minute) -> Result<(usize, u32)> {
        if minute >= self.total_minutes() {
            return Err(BarDataError::MinuteOutOfRange(minute));
        }
        let mps = self.minutes_per_session as Minute;
        Ok(((minute / mps) as usize, (minute % mps) as u32))
    }

    /// Absolute minute of a session's first slot.
    pub fn session_first_minute(&self, idx: usize) -> Result<Minute> {
        self.session(idx)?;
        Ok(idx as Minute * self.minutes_per_session as Minute)
    }

    /// Absolute minute of a session's last slot.
    pub fn session_last_minute(&self, idx: usize) -> Result<Minute> {
        Ok(self.session_first_minute(idx)? + self.minutes_per_session as Minute - 1)
    }

    /// Wall-clock timestamp of an absolute minute.
    pub fn minute_timestamp(&self, minute: Minute) -> Result<DateTime<Utc>> {
        let (idx, slot) = self.minute_to_session(minute)?;
        Ok(self.sessions[idx].open + Duration::minutes(slot as i64))
    }

    /// Absolute minute containing a wall-clock timestamp, if it falls within
    /// a session.
    pub fn timestamp_to_minute(&self, ts: DateTime<Utc>) -> Option<Minute> {
        let idx = self
            .sessions
            .partition_point(|s| s.open <= ts)
            .checked_sub(1)?;
        let session = &self.sessions[idx];
        let elapsed = (ts - session.open).num_minutes();
        if elapsed < 0 || elapsed >= self.minutes_per_session as i64 {
            return None;
        }
        Some(idx as Minute * self.minutes_per_session as Minute + elapsed as Minute)
    }
}
