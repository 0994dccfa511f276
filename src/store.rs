//! Minute-Bar Column Store
//!
//! Append-only, randomly-addressable storage of per-minute OHLCV tuples,
//! one segment per asset:
//!
//! - `{sid}.bars` - raw column data, one block per written session
//! - `{sid}.meta.json` - sidecar metadata and write-time side indexes
//!
//! # Segment layout
//!
//! Each session block holds five little-endian u32 columns back to back
//! (open, high, low, close, volume), each `minutes_per_session` values long.
//! A value for (minute, column) is located by pure arithmetic, so random
//! reads are O(1) over the memory-mapped file:
//!
//! ```text
//! rel    = minute - first_session * minutes_per_session
//! block  = rel / minutes_per_session
//! slot   = rel % minutes_per_session
//! offset = block * (5 * mps * 4) + column * (mps * 4) + slot * 4
//! ```
//!
//! # Write contract
//!
//! One writer per asset, sessions strictly increasing. Skipped sessions are
//! padded with sentinel blocks so the address arithmetic stays dense.
//! Re-writing or reordering sessions is a caller bug and fails hard.
//!
//! # Publish barrier
//!
//! The sidecar metadata is written (atomically, via rename) only after the
//! block append has been flushed. A reader that can see the metadata for
//! session N can therefore read session N's bytes. Readers snapshot a
//! segment when they first touch it; `refresh()` drops the snapshot cache to
//! pick up later-published sessions.

use crate::assets::Sid;
use crate::bars::{decode_price, decode_volume, Bar, Field, COLUMNS_PER_BAR, OHLC_RATIO};
use crate::calendar::TradingCalendar;
use crate::clock::Minute;
use crate::error::{BarDataError, Result};
use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};
use memmap2::Mmap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

const SEGMENT_VERSION: u32 = 1;
const VALUE_BYTES: usize = 4;
const VOLUME_COLUMN: usize = 4;

/// Sidecar metadata for one asset's segment.
///
/// `session_last_trade[i]` is the last nonzero-volume slot of the i-th
/// written session (counting from `first_session`), or None for a session
/// with no trades. Together with `first_trade_minute` it bounds every
/// backward "most recent trade" search: at most one session's volume column
/// is ever decoded, all earlier sessions resolve from the index alone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentMetadata {
    pub version: u32,
    pub sid: Sid,
    pub minutes_per_session: u32,
    pub ohlc_ratio: f64,
    /// Calendar index of the first written session.
    pub first_session: usize,
    /// Number of session blocks in the data file, padding included.
    pub sessions_written: usize,
    /// First nonzero-volume minute ever written, if any.
    pub first_trade_minute: Option<Minute>,
    /// Per-session last nonzero-volume slot.
    pub session_last_trade: Vec<Option<u32>>,
}

impl SegmentMetadata {
    fn block_bytes(&self) -> usize {
        COLUMNS_PER_BAR * self.minutes_per_session as usize * VALUE_BYTES
    }

    /// First addressable minute of this segment.
    fn first_minute(&self) -> Minute {
        self.first_session as Minute * self.minutes_per_session as Minute
    }

    /// One past the last addressable minute of this segment.
    fn end_minute(&self) -> Minute {
        self.first_minute() + self.sessions_written as Minute * self.minutes_per_session as Minute
    }
}

fn bars_path(root: &Path, sid: Sid) -> PathBuf {
    root.join(format!("{:06}.bars", sid))
}

fn meta_path(root: &Path, sid: Sid) -> PathBuf {
    root.join(format!("{:06}.meta.json", sid))
}

// =============================================================================
// WRITER
// =============================================================================

/// Write-side statistics.
#[derive(Debug, Default)]
pub struct WriterStats {
    pub sessions_written: AtomicU64,
    pub sessions_padded: AtomicU64,
    pub bars_with_trades: AtomicU64,
}

impl WriterStats {
    pub fn summary(&self) -> String {
        format!(
            "sessions={}, padded={}, traded_bars={}",
            self.sessions_written.load(Ordering::Relaxed),
            self.sessions_padded.load(Ordering::Relaxed),
            self.bars_with_trades.load(Ordering::Relaxed),
        )
    }
}

struct WriterSegment {
    file: File,
    meta: SegmentMetadata,
}

/// Append-only writer. One exclusive writer per store directory; concurrent
/// writers to the same asset are not supported and must be serialized by the
/// caller.
pub struct MinuteBarWriter {
    root: PathBuf,
    calendar: Arc<TradingCalendar>,
    segments: HashMap<Sid, WriterSegment>,
    stats: WriterStats,
}

impl MinuteBarWriter {
    /// Open or create a store directory for writing.
    pub fn new<P: AsRef<Path>>(root: P, calendar: Arc<TradingCalendar>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;

        info!(
            root = %root.display(),
            sessions = calendar.session_count(),
            minutes_per_session = calendar.minutes_per_session(),
            "minute bar store opened for writing"
        );

        Ok(Self {
            root,
            calendar,
            segments: HashMap::new(),
            stats: WriterStats::default(),
        })
    }

    /// Append one session of bars for an asset.
    ///
    /// `bars` must contain exactly one entry per session slot, with the
    /// sentinel tuple in every slot that saw no trade. Sessions between the
    /// last written one and `session` are padded with sentinel blocks.
    pub fn write_session(&mut self, sid: Sid, session: usize, bars: &[Bar]) -> Result<()> {
        self.calendar.session(session)?;
        let mps = self.calendar.minutes_per_session();
        if bars.len() != mps as usize {
            return Err(BarDataError::SessionLength {
                got: bars.len(),
                expected: mps as usize,
            });
        }

        if !self.segments.contains_key(&sid) {
            let segment = self.open_segment(sid, session)?;
            self.segments.insert(sid, segment);
        }
        let segment = self.segments.get_mut(&sid).expect("segment just inserted");

        let next = segment.meta.first_session + segment.meta.sessions_written;
        if segment.meta.sessions_written > 0 && session < next {
            return Err(BarDataError::WriteOrderViolation { sid, session, next });
        }

        // Pad skipped sessions so the offset arithmetic stays dense.
        let sentinel_block = vec![0u8; segment.meta.block_bytes()];
        for padded in next..session {
            segment.file.write_all(&sentinel_block)?;
            segment.meta.session_last_trade.push(None);
            segment.meta.sessions_written += 1;
            self.stats.sessions_padded.fetch_add(1, Ordering::Relaxed);
            debug!(sid, session = padded, "padded sentinel session");
        }

        // Columnar block: each field's values contiguous within the session.
        let mut block = Vec::with_capacity(segment.meta.block_bytes());
        for col in 0..COLUMNS_PER_BAR {
            for bar in bars {
                block
                    .write_u32::<LittleEndian>(bar.encode_column(col))
                    .expect("write to Vec cannot fail");
            }
        }
        segment.file.write_all(&block)?;
        segment.file.sync_data()?;

        let first_trade_slot = bars.iter().position(Bar::has_trade);
        let last_trade_slot = bars.iter().rposition(Bar::has_trade);
        let traded = bars.iter().filter(|b| b.has_trade()).count();

        if segment.meta.first_trade_minute.is_none() {
            if let Some(slot) = first_trade_slot {
                segment.meta.first_trade_minute =
                    Some(session as Minute * mps as Minute + slot as Minute);
            }
        }
        segment
            .meta
            .session_last_trade
            .push(last_trade_slot.map(|s| s as u32));
        segment.meta.sessions_written += 1;

        // Publish barrier: data is flushed above, metadata lands last.
        write_metadata(&self.root, &segment.meta)?;

        self.stats.sessions_written.fetch_add(1, Ordering::Relaxed);
        self.stats
            .bars_with_trades
            .fetch_add(traded as u64, Ordering::Relaxed);
        debug!(sid, session, traded, "session appended");
        Ok(())
    }

    pub fn stats(&self) -> &WriterStats {
        &self.stats
    }

    /// Resume an existing segment or create a fresh one starting at
    /// `session`.
    fn open_segment(&self, sid: Sid, session: usize) -> Result<WriterSegment> {
        let meta_file = meta_path(&self.root, sid);
        if meta_file.exists() {
            let meta = read_metadata(&meta_file)?;
            self.validate_meta(sid, &meta)?;

            let file = OpenOptions::new()
                .append(true)
                .open(bars_path(&self.root, sid))?;
            let expected = (meta.sessions_written * meta.block_bytes()) as u64;
            let actual = file.metadata()?.len();
            if actual != expected {
                return Err(BarDataError::SegmentMismatch {
                    sid,
                    reason: format!("data file is {} bytes, metadata expects {}", actual, expected),
                });
            }
            return Ok(WriterSegment { file, meta });
        }

        let file = OpenOptions::new()
            .create(true)
            .truncate(true)
            .write(true)
            .open(bars_path(&self.root, sid))?;
        Ok(WriterSegment {
            file,
            meta: SegmentMetadata {
                version: SEGMENT_VERSION,
                sid,
                minutes_per_session: self.calendar.minutes_per_session(),
                ohlc_ratio: OHLC_RATIO,
                first_session: session,
                sessions_written: 0,
                first_trade_minute: None,
                session_last_trade: Vec::new(),
            },
        })
    }

    fn validate_meta(&self, sid: Sid, meta: &SegmentMetadata) -> Result<()> {
        if meta.minutes_per_session != self.calendar.minutes_per_session() {
            return Err(BarDataError::SegmentMismatch {
                sid,
                reason: format!(
                    "segment has {} minutes per session, calendar has {}",
                    meta.minutes_per_session,
                    self.calendar.minutes_per_session()
                ),
            });
        }
        if meta.ohlc_ratio != OHLC_RATIO {
            return Err(BarDataError::SegmentMismatch {
                sid,
                reason: format!("segment ohlc_ratio {} != {}", meta.ohlc_ratio, OHLC_RATIO),
            });
        }
        if meta.session_last_trade.len() != meta.sessions_written {
            return Err(BarDataError::SegmentMismatch {
                sid,
                reason: "side index length does not match sessions written".into(),
            });
        }
        Ok(())
    }
}

fn read_metadata(path: &Path) -> Result<SegmentMetadata> {
    let bytes = fs::read(path)?;
    Ok(serde_json::from_slice(&bytes)?)
}

fn write_metadata(root: &Path, meta: &SegmentMetadata) -> Result<()> {
    let path = meta_path(root, meta.sid);
    let tmp = path.with_extension("json.tmp");
    let mut file = File::create(&tmp)?;
    file.write_all(&serde_json::to_vec_pretty(meta)?)?;
    file.sync_data()?;
    fs::rename(&tmp, &path)?;
    Ok(())
}

// =============================================================================
// READER
// =============================================================================

struct Segment {
    meta: SegmentMetadata,
    map: Mmap,
}

impl Segment {
    /// Raw encoded value at (minute, column); 0 outside the written range,
    /// which is exactly the sentinel encoding.
    fn raw(&self, minute: Minute, column: usize) -> u32 {
        if minute < self.meta.first_minute() || minute >= self.meta.end_minute() {
            return 0;
        }
        let mps = self.meta.minutes_per_session as usize;
        let rel = (minute - self.meta.first_minute()) as usize;
        let block = rel / mps;
        let slot = rel % mps;
        let offset = block * self.meta.block_bytes() + (column * mps + slot) * VALUE_BYTES;
        LittleEndian::read_u32(&self.map[offset..offset + VALUE_BYTES])
    }
}

/// Random-access reader over a store directory.
///
/// Segments are opened lazily and cached; absent segments are cached too so
/// repeated queries for unknown assets stay cheap. All reads on published
/// data are lock-free apart from the cache `RwLock`.
pub struct MinuteBarReader {
    root: PathBuf,
    calendar: Arc<TradingCalendar>,
    segments: RwLock<HashMap<Sid, Option<Arc<Segment>>>>,
}

impl MinuteBarReader {
    pub fn new<P: AsRef<Path>>(root: P, calendar: Arc<TradingCalendar>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        info!(root = %root.display(), "minute bar store opened for reading");
        Ok(Self {
            root,
            calendar,
            segments: RwLock::new(HashMap::new()),
        })
    }

    pub fn calendar(&self) -> &Arc<TradingCalendar> {
        &self.calendar
    }

    /// Drop cached segment snapshots so sessions published since the last
    /// access become visible.
    pub fn refresh(&self) {
        self.segments.write().clear();
    }

    /// Decoded scalar at exactly `minute`. OHLC fields decode the zero
    /// sentinel to NaN; volume decodes to its raw count (as f64). Reads
    /// before the asset's first written minute, or for assets with no
    /// segment at all, yield the sentinel decode rather than an error.
    pub fn read_scalar(&self, sid: Sid, minute: Minute, field: Field) -> f64 {
        match field {
            Field::Open | Field::High | Field::Low | Field::Close => {
                self.read_price(sid, minute, field)
            }
            Field::Volume => self.read_volume(sid, minute) as f64,
            Field::Price | Field::LastTraded => {
                debug_assert!(false, "derived field {} has no stored column", field);
                f64::NAN
            }
        }
    }

    /// Decoded price field at exactly `minute` (NaN when no trade recorded).
    pub fn read_price(&self, sid: Sid, minute: Minute, field: Field) -> f64 {
        let column = match field.column() {
            Some(col) if col != VOLUME_COLUMN => col,
            _ => {
                debug_assert!(false, "{} is not a price field", field);
                return f64::NAN;
            }
        };
        match self.segment(sid) {
            Some(seg) => decode_price(seg.raw(minute, column)),
            None => f64::NAN,
        }
    }

    /// Raw volume at exactly `minute` (0 when no trade recorded).
    pub fn read_volume(&self, sid: Sid, minute: Minute) -> u64 {
        match self.segment(sid) {
            Some(seg) => decode_volume(seg.raw(minute, VOLUME_COLUMN)),
            None => 0,
        }
    }

    /// Fully decoded bar at `minute` (the sentinel bar when no data).
    pub fn read_bar(&self, sid: Sid, minute: Minute) -> Bar {
        match self.segment(sid) {
            Some(seg) => Bar {
                open: decode_price(seg.raw(minute, 0)),
                high: decode_price(seg.raw(minute, 1)),
                low: decode_price(seg.raw(minute, 2)),
                close: decode_price(seg.raw(minute, 3)),
                volume: decode_volume(seg.raw(minute, VOLUME_COLUMN)),
            },
            None => Bar {
                open: f64::NAN,
                high: f64::NAN,
                low: f64::NAN,
                close: f64::NAN,
                volume: 0,
            },
        }
    }

    /// `count` decoded values of `field` starting at `start_minute`.
    pub fn read_window(&self, sid: Sid, field: Field, start_minute: Minute, count: usize) -> Vec<f64> {
        (0..count as Minute)
            .map(|i| self.read_scalar(sid, start_minute + i, field))
            .collect()
    }

    /// First nonzero-volume minute ever written for this asset.
    pub fn first_trade_minute(&self, sid: Sid) -> Option<Minute> {
        self.segment(sid)?.meta.first_trade_minute
    }

    /// Written minute range [first, end) for this asset, if any.
    pub fn data_range(&self, sid: Sid) -> Option<(Minute, Minute)> {
        let seg = self.segment(sid)?;
        if seg.meta.sessions_written == 0 {
            return None;
        }
        Some((seg.meta.first_minute(), seg.meta.end_minute()))
    }

    /// Most recent nonzero-volume minute at or before `minute`, or None if
    /// the asset has never traded by then.
    ///
    /// Cost is bounded by the side index: at most one session's volume
    /// column is decoded (the query session itself); every earlier session
    /// resolves from `session_last_trade` without touching bar data.
    pub fn last_traded_at_or_before(&self, sid: Sid, minute: Minute) -> Option<Minute> {
        let seg = self.segment(sid)?;
        let meta = &seg.meta;
        let first_trade = meta.first_trade_minute?;
        if minute < first_trade || meta.sessions_written == 0 {
            return None;
        }

        let mps = meta.minutes_per_session as Minute;
        let query_session = (minute / mps) as usize;
        let query_slot = (minute % mps) as u32;
        let last_written = meta.first_session + meta.sessions_written - 1;

        let mut session = query_session.min(last_written);
        loop {
            let rel = session - meta.first_session;
            if let Some(last_slot) = meta.session_last_trade[rel] {
                if session < query_session || last_slot <= query_slot {
                    return Some(session as Minute * mps + last_slot as Minute);
                }
                // Trades exist in the query session but the last one may be
                // after the query slot; scan its volume column backward.
                for slot in (0..=query_slot).rev() {
                    let m = session as Minute * mps + slot as Minute;
                    if seg.raw(m, VOLUME_COLUMN) > 0 {
                        return Some(m);
                    }
                }
            }
            if session == meta.first_session {
                return None;
            }
            session -= 1;
        }
    }

    fn segment(&self, sid: Sid) -> Option<Arc<Segment>> {
        if let Some(cached) = self.segments.read().get(&sid) {
            return cached.clone();
        }
        let loaded = self.load_segment(sid);
        self.segments.write().insert(sid, loaded.clone());
        loaded
    }

    fn load_segment(&self, sid: Sid) -> Option<Arc<Segment>> {
        let meta_file = meta_path(&self.root, sid);
        if !meta_file.exists() {
            return None;
        }
        let meta = match read_metadata(&meta_file) {
            Ok(meta) => meta,
            Err(e) => {
                warn!(sid, error = %e, "unreadable segment metadata, treating as no data");
                return None;
            }
        };
        if meta.minutes_per_session != self.calendar.minutes_per_session() {
            warn!(
                sid,
                segment_mps = meta.minutes_per_session,
                calendar_mps = self.calendar.minutes_per_session(),
                "segment does not match calendar, treating as no data"
            );
            return None;
        }
        if meta.sessions_written == 0 {
            return None;
        }

        let file = match File::open(bars_path(&self.root, sid)) {
            Ok(f) => f,
            Err(e) => {
                warn!(sid, error = %e, "missing segment data file");
                return None;
            }
        };
        let expected = (meta.sessions_written * meta.block_bytes()) as u64;
        let actual = match file.metadata() {
            Ok(m) => m.len(),
            Err(_) => return None,
        };
        if actual < expected {
            warn!(sid, actual, expected, "truncated segment data file");
            return None;
        }

        // Safety: segment files are append-only and the mapped prefix
        // (`sessions_written` blocks) is immutable once its metadata has
        // been published.
        let map = match unsafe { Mmap::map(&file) } {
            Ok(m) => m,
            Err(e) => {
                warn!(sid, error = %e, "failed to map segment");
                return None;
            }
        };
        Some(Arc::new(Segment { meta, map }))
    }
}

// =============================================================================
// TESTS
// =============================================================================
