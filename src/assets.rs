//! Asset Directory
//!
//! SQLite-backed registry of simulated assets. Resolves a stable integer sid
//! to its symbol and nominal lifecycle window [start_date, end_date]
//! (inclusive, date granularity). The directory must resolve a sid before any
//! column-store access for that asset; the accessor treats an unresolvable
//! sid as an invalid argument, never as "no data."
//!
//! The nominal window is what the listing venue reports. The *actual* first
//! and last traded minutes are derived from the recorded data by the store's
//! write-time indexes; the accessor combines both.

use crate::error::{BarDataError, Result};
use chrono::NaiveDate;
use parking_lot::{Mutex, RwLock};
use rusqlite::{params, Connection, OpenFlags};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

pub type Sid = u32;

const ASSET_DIRECTORY_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS equities (
    sid INTEGER PRIMARY KEY,
    symbol TEXT NOT NULL,
    start_date TEXT NOT NULL,
    end_date TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_equities_symbol
    ON equities(symbol);
"#;

/// One asset's directory entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Asset {
    pub sid: Sid,
    pub symbol: String,
    /// First date the asset is nominally active (inclusive).
    pub start_date: NaiveDate,
    /// Last date the asset is nominally active (inclusive).
    pub end_date: NaiveDate,
}

impl Asset {
    /// True if `date` falls within the nominal lifecycle window.
    #[inline]
    pub fn covers(&self, date: NaiveDate) -> bool {
        date >= self.start_date && date <= self.end_date
    }

    /// True if the asset is delisted as of `date`.
    #[inline]
    pub fn delisted_by(&self, date: NaiveDate) -> bool {
        date > self.end_date
    }
}

/// SQLite-backed sid -> asset resolver with an in-process cache.
///
/// Entries are immutable once written, so cached lookups never go stale.
pub struct AssetDirectory {
    conn: Mutex<Connection>,
    cache: RwLock<HashMap<Sid, Arc<Asset>>>,
}

impl AssetDirectory {
    /// Open or create a directory database.
    pub fn open<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = Connection::open_with_flags(db_path.as_ref(), flags)?;
        conn.execute_batch(ASSET_DIRECTORY_SCHEMA)?;

        info!(path = %db_path.as_ref().display(), "asset directory opened");

        Ok(Self {
            conn: Mutex::new(conn),
            cache: RwLock::new(HashMap::new()),
        })
    }

    /// Open an in-memory directory (for testing).
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(ASSET_DIRECTORY_SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
            cache: RwLock::new(HashMap::new()),
        })
    }

    /// Insert or replace an asset entry.
    pub fn insert(&self, asset: &Asset) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO equities (sid, symbol, start_date, end_date)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                asset.sid,
                asset.symbol,
                asset.start_date.to_string(),
                asset.end_date.to_string(),
            ],
        )?;
        self.cache.write().insert(asset.sid, Arc::new(asset.clone()));
        Ok(())
    }

    /// Resolve a sid. Unknown sids are an invalid-argument error.
    pub fn retrieve(&self, sid: Sid) -> Result<Arc<Asset>> {
        if let Some(asset) = self.cache.read().get(&sid) {
            return Ok(asset.clone());
        }

        let row = {
            let conn = self.conn.lock();
            conn.query_row(
                "SELECT symbol, start_date, end_date FROM equities WHERE sid = ?1",
                params![sid],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
        };

        let (symbol, start_date, end_date) = match row {
            Ok(r) => r,
            Err(rusqlite::Error::QueryReturnedNoRows) => {
                return Err(BarDataError::UnknownAsset(sid))
            }
            Err(e) => return Err(e.into()),
        };

        let asset = Arc::new(Asset {
            sid,
            symbol,
            start_date: parse_date(sid, &start_date)?,
            end_date: parse_date(sid, &end_date)?,
        });
        self.cache.write().insert(sid, asset.clone());
        Ok(asset)
    }

    /// Resolve a ticker symbol to its sid.
    pub fn lookup_symbol(&self, symbol: &str) -> Result<Option<Sid>> {
        let conn = self.conn.lock();
        let result = conn.query_row(
            "SELECT sid FROM equities WHERE symbol = ?1 ORDER BY sid LIMIT 1",
            params![symbol],
            |row| row.get(0),
        );
        match result {
            Ok(sid) => Ok(Some(sid)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// All registered sids, ordered.
    pub fn sids(&self) -> Result<Vec<Sid>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT sid FROM equities ORDER BY sid")?;
        let rows = stmt.query_map([], |row| row.get(0))?;

        let mut sids = Vec::new();
        for row in rows {
            sids.push(row?);
        }
        Ok(sids)
    }
}

fn parse_date(sid: Sid, s: &str) -> Result<NaiveDate> {
    s.parse().map_err(|_| BarDataError::SegmentMismatch {
        sid,
        reason: format!("unparseable date '{}' in asset directory", s),
    })
}
