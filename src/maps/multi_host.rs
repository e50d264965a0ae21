use crate::maps::{Entry, KeyedMutex, KvMap, MapError, MapResult, MapSettings, PersistentMap};
use crate::url::{host_of, registrable_domain, shard_host, shard_id};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

const SHARD_FILE: &str = "entries.db";

/// Routes URI keys to one [`PersistentMap`] per registrable domain
///
/// Each shard lives at `<base>/<shard_id>/entries.db`. Shards are opened for a
/// single operation and closed straight after, with a per-shard lock so at most
/// one handle to a given shard file exists at a time.
pub struct MultiHostMap {
    base: PathBuf,
    settings: MapSettings,
    locks: KeyedMutex,
}

impl MultiHostMap {
    /// Creates a router rooted at `base`
    ///
    /// # Arguments
    ///
    /// * `base` - Directory holding one subdirectory per shard
    /// * `settings` - Tuning passed to every shard
    ///
    /// # Returns
    ///
    /// * `Ok(MultiHostMap)` - The router; no shard is opened yet
    /// * `Err(MapError::Io)` - The base directory could not be created
    pub fn open(base: &Path, settings: MapSettings) -> MapResult<Self> {
        std::fs::create_dir_all(base).map_err(|source| MapError::Io {
            path: base.to_path_buf(),
            source,
        })?;

        Ok(Self {
            base: base.to_path_buf(),
            settings,
            locks: KeyedMutex::new(),
        })
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    /// Registrable domain a URI key belongs to
    pub fn domain_of_key(key: &[u8]) -> MapResult<String> {
        let uri = std::str::from_utf8(key)
            .map_err(|_| crate::UrlError::Parse("key is not UTF-8".to_string()))?;
        Ok(registrable_domain(&host_of(uri)?))
    }

    /// Registrable domains that currently have a shard on disk, sorted
    pub fn hosts(&self) -> MapResult<Vec<String>> {
        let entries = std::fs::read_dir(&self.base).map_err(|source| MapError::Io {
            path: self.base.clone(),
            source,
        })?;

        let mut hosts = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| MapError::Io {
                path: self.base.clone(),
                source,
            })?;

            if !entry.path().join(SHARD_FILE).exists() {
                continue;
            }

            let name = entry.file_name();
            match name.to_str().map(shard_host) {
                Some(Ok(host)) => hosts.push(host),
                _ => tracing::debug!("Ignoring foreign directory {:?} in {}", name, self.base.display()),
            }
        }

        hosts.sort();
        Ok(hosts)
    }

    /// Visits every entry stored for `host` until `visit` returns false
    pub fn iterate_host(
        &self,
        host: &str,
        visit: &mut dyn FnMut(&[u8], &[u8]) -> bool,
    ) -> MapResult<()> {
        let domain = registrable_domain(host);
        if !self.shard_path(&domain).exists() {
            return Ok(());
        }
        self.transaction(&domain, |shard| shard.iterate(visit))
    }

    /// Collects every entry stored for `host`
    pub fn entries_for_host(&self, host: &str) -> MapResult<Vec<Entry>> {
        let mut entries = Vec::new();
        self.iterate_host(host, &mut |key, value| {
            entries.push((key.to_vec(), value.to_vec()));
            true
        })?;
        Ok(entries)
    }

    /// Removes `keys` from the shard of `host`
    ///
    /// # Returns
    ///
    /// * `Ok(n)` - Number of entries left in the shard (zero when it does not exist)
    /// * `Err(MapError)` - The shard could not be updated
    pub fn delete_many(&self, host: &str, keys: &[Vec<u8>]) -> MapResult<u64> {
        let domain = registrable_domain(host);
        if !self.shard_path(&domain).exists() {
            return Ok(0);
        }

        self.transaction(&domain, |shard| {
            shard.delete_many(keys)?;
            shard.len()
        })
    }

    /// Deletes the whole shard of `host`
    ///
    /// # Returns
    ///
    /// * `Ok(true)` - The shard existed and was removed
    /// * `Ok(false)` - There was no shard for the host
    pub fn remove_host(&self, host: &str) -> MapResult<bool> {
        let domain = registrable_domain(host);
        let _guard = self.locks.lock(&domain);

        let dir = self.shard_dir(&domain);
        if !dir.exists() {
            return Ok(false);
        }

        std::fs::remove_dir_all(&dir).map_err(|source| MapError::Io { path: dir, source })?;
        Ok(true)
    }

    fn shard_dir(&self, domain: &str) -> PathBuf {
        self.base.join(shard_id(domain))
    }

    fn shard_path(&self, domain: &str) -> PathBuf {
        self.shard_dir(domain).join(SHARD_FILE)
    }

    /// Opens the shard of `domain`, runs `op`, and closes the shard again
    fn transaction<T>(
        &self,
        domain: &str,
        op: impl FnOnce(&PersistentMap) -> MapResult<T>,
    ) -> MapResult<T> {
        let _guard = self.locks.lock(domain);

        let shard = PersistentMap::open(&self.shard_path(domain), self.settings)?;
        let result = op(&shard);
        let closed = shard.close();

        let value = result?;
        closed?;
        Ok(value)
    }
}

impl KvMap for MultiHostMap {
    fn get(&self, key: &[u8]) -> MapResult<Option<Vec<u8>>> {
        let domain = Self::domain_of_key(key)?;
        if !self.shard_path(&domain).exists() {
            return Ok(None);
        }
        self.transaction(&domain, |shard| shard.get(key))
    }

    fn set(&self, key: &[u8], value: &[u8]) -> MapResult<()> {
        let domain = Self::domain_of_key(key)?;
        self.transaction(&domain, |shard| shard.set(key, value))
    }

    fn set_many(&self, pairs: &[Entry]) -> MapResult<()> {
        let mut errors = Vec::new();
        let mut by_domain: BTreeMap<String, Vec<Entry>> = BTreeMap::new();

        for (key, value) in pairs {
            match Self::domain_of_key(key) {
                Ok(domain) => by_domain
                    .entry(domain)
                    .or_default()
                    .push((key.clone(), value.clone())),
                Err(e) => errors.push(e),
            }
        }

        for (domain, batch) in by_domain {
            if let Err(e) = self.transaction(&domain, |shard| shard.set_many(&batch)) {
                tracing::warn!("Failed to write {} entries for {}: {}", batch.len(), domain, e);
                errors.push(e);
            }
        }

        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(MapError::Multiple(errors)),
        }
    }

    fn iterate(&self, visit: &mut dyn FnMut(&[u8], &[u8]) -> bool) -> MapResult<()> {
        for host in self.hosts()? {
            let mut keep_going = true;
            self.iterate_host(&host, &mut |key, value| {
                keep_going = visit(key, value);
                keep_going
            })?;

            if !keep_going {
                break;
            }
        }
        Ok(())
    }

    fn close(&self) -> MapResult<()> {
        // Shards are never held open between operations.
        Ok(())
    }
}
