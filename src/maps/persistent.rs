//! SQLite-backed persistent map
//!
//! One database file holds a single `entries(key BLOB PRIMARY KEY, value BLOB)`
//! table in WAL mode. A background compaction loop checkpoints the WAL and
//! vacuums the file once enough pages are free; it stops itself after a
//! configured number of consecutive failures.

use crate::config::PersistentMapConfig;
use crate::maps::{Entry, KvMap, MapError, MapResult};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::Duration;

/// Tuning shared by every persistent map
#[derive(Debug, Clone, Copy)]
pub struct MapSettings {
    pub gc_interval: Duration,
    pub gc_discard_ratio: f64,
    pub gc_err_threshold: u32,
    pub prefetch_size: usize,
}

impl Default for MapSettings {
    fn default() -> Self {
        Self::from(&PersistentMapConfig::default())
    }
}

impl From<&PersistentMapConfig> for MapSettings {
    fn from(config: &PersistentMapConfig) -> Self {
        Self {
            gc_interval: Duration::from_secs(config.gc_interval_secs),
            gc_discard_ratio: config.gc_discard_ratio,
            gc_err_threshold: config.gc_err_threshold,
            prefetch_size: config.default_prefetch_size.max(1),
        }
    }
}

/// Durable byte-keyed map stored in one SQLite file
pub struct PersistentMap {
    path: PathBuf,
    settings: MapSettings,
    conn: Arc<Mutex<Option<Connection>>>,
    gc: Mutex<Option<GcLoop>>,
}

impl PersistentMap {
    /// Opens (creating if needed) a map at `path`
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    /// * `settings` - Compaction and iteration tuning
    ///
    /// # Returns
    ///
    /// * `Ok(PersistentMap)` - The open map, without a compaction loop
    /// * `Err(MapError)` - The file or its parent directory could not be created
    pub fn open(path: &Path, settings: MapSettings) -> MapResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| MapError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
            CREATE TABLE IF NOT EXISTS entries (
                key BLOB PRIMARY KEY,
                value BLOB NOT NULL
            );
        ",
        )?;

        Ok(Self {
            path: path.to_path_buf(),
            settings,
            conn: Arc::new(Mutex::new(Some(conn))),
            gc: Mutex::new(None),
        })
    }

    /// Opens a map and starts its compaction loop
    pub fn open_with_gc(path: &Path, settings: MapSettings) -> MapResult<Self> {
        let map = Self::open(path, settings)?;
        map.start_gc();
        Ok(map)
    }

    /// Creates an in-memory map (for testing)
    #[cfg(test)]
    pub fn new_in_memory() -> MapResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(
            "CREATE TABLE entries (key BLOB PRIMARY KEY, value BLOB NOT NULL);",
        )?;

        Ok(Self {
            path: PathBuf::from(":memory:"),
            settings: MapSettings::default(),
            conn: Arc::new(Mutex::new(Some(conn))),
            gc: Mutex::new(None),
        })
    }

    /// Location of the database file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Starts the background compaction loop if it is not running
    pub fn start_gc(&self) {
        let mut gc = self.gc.lock().unwrap_or_else(|e| e.into_inner());
        if gc.is_none() {
            let conn = Arc::clone(&self.conn);
            let path = self.path.clone();
            let ratio = self.settings.gc_discard_ratio;
            let compactor = move || {
                let guard = conn.lock().unwrap_or_else(|e| e.into_inner());
                match guard.as_ref() {
                    Some(conn) => compact(conn, ratio),
                    None => Err(MapError::Closed(path.clone())),
                }
            };
            *gc = Some(GcLoop::spawn(self.path.clone(), self.settings, compactor));
        }
    }

    /// Number of entries
    pub fn len(&self) -> MapResult<u64> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM entries", [], |row| row.get(0))?;
            Ok(count as u64)
        })
    }

    pub fn is_empty(&self) -> MapResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Removes a key; returns true if it was present
    pub fn delete(&self, key: &[u8]) -> MapResult<bool> {
        self.with_conn(|conn| {
            let removed = conn.execute("DELETE FROM entries WHERE key = ?1", params![key])?;
            Ok(removed > 0)
        })
    }

    /// Removes a batch of keys in one transaction
    ///
    /// # Returns
    ///
    /// * `Ok(n)` - Number of keys that were present and removed
    /// * `Err(MapError)` - The transaction failed; no key was removed
    pub fn delete_many(&self, keys: &[Vec<u8>]) -> MapResult<usize> {
        if keys.is_empty() {
            return Ok(0);
        }

        let mut guard = self.lock();
        let conn = guard
            .as_mut()
            .ok_or_else(|| MapError::Closed(self.path.clone()))?;

        let tx = conn.transaction()?;
        let mut removed = 0;
        {
            let mut stmt = tx.prepare_cached("DELETE FROM entries WHERE key = ?1")?;
            for key in keys {
                removed += stmt.execute(params![key])?;
            }
        }
        tx.commit()?;
        Ok(removed)
    }

    /// Runs one compaction pass
    ///
    /// # Returns
    ///
    /// * `Ok(true)` - The file was vacuumed
    /// * `Ok(false)` - Too few free pages; only the WAL was checkpointed
    /// * `Err(MapError)` - The pass failed
    pub fn compact(&self) -> MapResult<bool> {
        let ratio = self.settings.gc_discard_ratio;
        self.with_conn(|conn| compact(conn, ratio))
    }

    fn lock(&self) -> MutexGuard<'_, Option<Connection>> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn with_conn<T>(&self, op: impl FnOnce(&Connection) -> MapResult<T>) -> MapResult<T> {
        let guard = self.lock();
        match guard.as_ref() {
            Some(conn) => op(conn),
            None => Err(MapError::Closed(self.path.clone())),
        }
    }

    fn page_after(&self, after: Option<&[u8]>) -> MapResult<Vec<Entry>> {
        let limit = self.settings.prefetch_size as i64;

        self.with_conn(|conn| {
            let rows = match after {
                Some(last) => {
                    let mut stmt = conn.prepare_cached(
                        "SELECT key, value FROM entries WHERE key > ?1 ORDER BY key LIMIT ?2",
                    )?;
                    let rows = stmt
                        .query_map(params![last, limit], |row| Ok((row.get(0)?, row.get(1)?)))?
                        .collect::<Result<Vec<Entry>, _>>()?;
                    rows
                }
                None => {
                    let mut stmt = conn
                        .prepare_cached("SELECT key, value FROM entries ORDER BY key LIMIT ?1")?;
                    let rows = stmt
                        .query_map(params![limit], |row| Ok((row.get(0)?, row.get(1)?)))?
                        .collect::<Result<Vec<Entry>, _>>()?;
                    rows
                }
            };
            Ok(rows)
        })
    }
}

impl KvMap for PersistentMap {
    fn get(&self, key: &[u8]) -> MapResult<Option<Vec<u8>>> {
        self.with_conn(|conn| {
            let value = conn
                .query_row(
                    "SELECT value FROM entries WHERE key = ?1",
                    params![key],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(value)
        })
    }

    fn set(&self, key: &[u8], value: &[u8]) -> MapResult<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO entries (key, value) VALUES (?1, ?2)",
                params![key, value],
            )?;
            Ok(())
        })
    }

    fn set_many(&self, pairs: &[Entry]) -> MapResult<()> {
        if pairs.is_empty() {
            return Ok(());
        }

        let mut guard = self.lock();
        let conn = guard
            .as_mut()
            .ok_or_else(|| MapError::Closed(self.path.clone()))?;

        let tx = conn.transaction()?;
        {
            let mut stmt =
                tx.prepare_cached("INSERT OR REPLACE INTO entries (key, value) VALUES (?1, ?2)")?;
            for (key, value) in pairs {
                stmt.execute(params![key, value])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn iterate(&self, visit: &mut dyn FnMut(&[u8], &[u8]) -> bool) -> MapResult<()> {
        let mut last: Option<Vec<u8>> = None;

        loop {
            // The connection is released between pages so `visit` may use the map.
            let page = self.page_after(last.as_deref())?;
            let full_page = page.len() == self.settings.prefetch_size;

            for (key, value) in &page {
                if !visit(key, value) {
                    return Ok(());
                }
            }

            match page.into_iter().last() {
                Some((key, _)) if full_page => last = Some(key),
                _ => return Ok(()),
            }
        }
    }

    fn close(&self) -> MapResult<()> {
        if let Some(gc) = self.gc.lock().unwrap_or_else(|e| e.into_inner()).take() {
            gc.stop();
        }

        if let Some(conn) = self.lock().take() {
            conn.close().map_err(|(_, e)| MapError::Database(e))?;
        }

        Ok(())
    }
}

impl Drop for PersistentMap {
    fn drop(&mut self) {
        if let Some(gc) = self.gc.lock().unwrap_or_else(|e| e.into_inner()).take() {
            gc.stop();
        }
    }
}

/// Checkpoints the WAL, then vacuums when the free-page ratio reaches `discard_ratio`
fn compact(conn: &Connection, discard_ratio: f64) -> MapResult<bool> {
    conn.query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |_| Ok(()))?;

    let pages: i64 = conn.query_row("PRAGMA page_count", [], |row| row.get(0))?;
    let free: i64 = conn.query_row("PRAGMA freelist_count", [], |row| row.get(0))?;

    if pages == 0 || (free as f64 / pages as f64) < discard_ratio {
        return Ok(false);
    }

    conn.execute_batch("VACUUM")?;
    Ok(true)
}

/// Background compaction thread
///
/// Runs `compactor` every `gc_interval` until stopped, until the map is
/// closed, or once `gc_err_threshold` consecutive runs have failed.
struct GcLoop {
    stop: mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

impl GcLoop {
    fn spawn<F>(path: PathBuf, settings: MapSettings, compactor: F) -> Self
    where
        F: Fn() -> MapResult<bool> + Send + 'static,
    {
        let (stop, signal) = mpsc::channel::<()>();

        let handle = std::thread::spawn(move || {
            let mut failures = 0;

            loop {
                match signal.recv_timeout(settings.gc_interval) {
                    Err(RecvTimeoutError::Timeout) => {}
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }

                match compactor() {
                    Ok(vacuumed) => {
                        failures = 0;
                        if vacuumed {
                            tracing::debug!("Compacted persistent map {}", path.display());
                        }
                    }
                    Err(MapError::Closed(_)) => break,
                    Err(e) => {
                        failures += 1;
                        tracing::warn!(
                            "Compaction of {} failed ({}/{}): {}",
                            path.display(),
                            failures,
                            settings.gc_err_threshold,
                            e
                        );

                        if failures >= settings.gc_err_threshold {
                            tracing::error!(
                                "Stopping compaction of {} after {} consecutive failures",
                                path.display(),
                                failures
                            );
                            break;
                        }
                    }
                }
            }
        });

        Self { stop, handle }
    }

    fn stop(self) {
        let _ = self.stop.send(());
        let _ = self.handle.join();
    }
}
