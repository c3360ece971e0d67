//! RocksDB-backed tracked-app store
//!
//! Persists the per-guild tracked-app set and the role assignment counter in
//! two column families. Keys carry all the information; values are empty for
//! tracked apps and a big-endian `u64` for the counter.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use rocksdb::{ColumnFamilyDescriptor, IteratorMode, Options, DB};

use super::schema::{self, keys, ALL_CFS};
use super::types::{Stats, TrackedApp};
use super::AppStore;
use crate::ids::{AppId, GuildId, IdError};

/// Error type for state store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{app_id} is already tracked in guild {guild_id}")]
    AlreadyTracked { guild_id: GuildId, app_id: AppId },

    #[error(transparent)]
    InvalidId(#[from] IdError),

    #[error("RocksDB error: {0}")]
    RocksDb(#[from] rocksdb::Error),

    #[error("Corrupt value for key {0}")]
    Corrupt(String),

    #[error("Lock poisoned")]
    LockPoisoned,

    #[error("Column family not found: {0}")]
    ColumnFamilyNotFound(String),

    #[error("Store task join error: {0}")]
    TaskJoin(String),
}

impl StoreError {
    /// True for the duplicate-insert condition callers report as a friendly
    /// "already tracked" message rather than a failure.
    pub fn is_already_tracked(&self) -> bool {
        matches!(self, Self::AlreadyTracked { .. })
    }
}

/// Result type for state store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Shared reference to StateStore
pub type SharedStateStore = Arc<StateStore>;

/// RocksDB-backed persistent state store.
///
/// Clones share the same database handle.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<RwLock<DB>>,
    path: PathBuf,
}

impl StateStore {
    /// Open or create a state store at the given path
    pub fn open(path: impl Into<PathBuf>) -> StoreResult<Self> {
        let path = path.into();

        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = ALL_CFS
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()))
            .collect();

        let db = DB::open_cf_descriptors(&opts, &path, cf_descriptors)?;

        Ok(Self {
            db: Arc::new(RwLock::new(db)),
            path,
        })
    }

    /// Create a shared reference to this store
    pub fn shared(self) -> SharedStateStore {
        Arc::new(self)
    }

    /// Get the database path
    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    // =========================================================================
    // Tracked apps
    // =========================================================================

    /// Start tracking `app_id` in `guild_id`.
    ///
    /// Fails with [`StoreError::AlreadyTracked`] if the pair exists.
    pub fn add_app(&self, guild_id: GuildId, app_id: AppId) -> StoreResult<()> {
        // Exclusive lock so the existence check and the insert are atomic.
        let db = self.db.write().map_err(|_| StoreError::LockPoisoned)?;
        let cf = db
            .cf_handle(schema::CF_APPS)
            .ok_or_else(|| StoreError::ColumnFamilyNotFound(schema::CF_APPS.to_string()))?;

        let key = keys::app(guild_id, app_id);
        if db.get_cf(&cf, key.as_bytes())?.is_some() {
            return Err(StoreError::AlreadyTracked { guild_id, app_id });
        }

        db.put_cf(&cf, key.as_bytes(), b"")?;
        Ok(())
    }

    /// Stop tracking `app_id` in `guild_id`, returning how many rows were removed
    pub fn remove_app(&self, guild_id: GuildId, app_id: AppId) -> StoreResult<usize> {
        let db = self.db.write().map_err(|_| StoreError::LockPoisoned)?;
        let cf = db
            .cf_handle(schema::CF_APPS)
            .ok_or_else(|| StoreError::ColumnFamilyNotFound(schema::CF_APPS.to_string()))?;

        let key = keys::app(guild_id, app_id);
        if db.get_cf(&cf, key.as_bytes())?.is_none() {
            return Ok(0);
        }

        db.delete_cf(&cf, key.as_bytes())?;
        Ok(1)
    }

    /// Every app tracked in `guild_id`
    pub fn list_apps(&self, guild_id: GuildId) -> StoreResult<HashSet<AppId>> {
        let db = self.db.read().map_err(|_| StoreError::LockPoisoned)?;
        let cf = db
            .cf_handle(schema::CF_APPS)
            .ok_or_else(|| StoreError::ColumnFamilyNotFound(schema::CF_APPS.to_string()))?;

        let prefix = keys::guild_apps(guild_id);
        let mut apps = HashSet::new();

        for result in db.prefix_iterator_cf(&cf, prefix.as_bytes()) {
            let (key, _) = result?;
            let key_str = String::from_utf8_lossy(&key);
            if !key_str.starts_with(&prefix) {
                break; // Prefix no longer matches
            }
            match keys::parse_app(&key_str) {
                Some((_, app_id)) => {
                    apps.insert(app_id);
                }
                None => return Err(StoreError::Corrupt(key_str.into_owned())),
            }
        }

        Ok(apps)
    }

    /// Every tracked row across all guilds
    pub fn all_apps(&self) -> StoreResult<Vec<TrackedApp>> {
        let db = self.db.read().map_err(|_| StoreError::LockPoisoned)?;
        let cf = db
            .cf_handle(schema::CF_APPS)
            .ok_or_else(|| StoreError::ColumnFamilyNotFound(schema::CF_APPS.to_string()))?;

        let mut rows = Vec::new();
        for result in db.iterator_cf(&cf, IteratorMode::Start) {
            let (key, _) = result?;
            let key_str = String::from_utf8_lossy(&key);
            let (guild_id, app_id) = keys::parse_app(&key_str)
                .ok_or_else(|| StoreError::Corrupt(key_str.to_string()))?;
            rows.push(TrackedApp { guild_id, app_id });
        }

        Ok(rows)
    }

    // =========================================================================
    // Counters
    // =========================================================================

    /// Current value of the role assignment counter (0 before the first grant)
    pub fn assignments(&self) -> StoreResult<u64> {
        let db = self.db.read().map_err(|_| StoreError::LockPoisoned)?;
        let cf = db
            .cf_handle(schema::CF_META)
            .ok_or_else(|| StoreError::ColumnFamilyNotFound(schema::CF_META.to_string()))?;

        read_counter(db.get_cf(&cf, keys::ASSIGNMENTS.as_bytes())?)
    }

    /// Add one to the role assignment counter, returning the new value
    pub fn increment_assignments(&self) -> StoreResult<u64> {
        let db = self.db.write().map_err(|_| StoreError::LockPoisoned)?;
        let cf = db
            .cf_handle(schema::CF_META)
            .ok_or_else(|| StoreError::ColumnFamilyNotFound(schema::CF_META.to_string()))?;

        let current = read_counter(db.get_cf(&cf, keys::ASSIGNMENTS.as_bytes())?)?;
        let next = current.saturating_add(1);
        db.put_cf(&cf, keys::ASSIGNMENTS.as_bytes(), next.to_be_bytes())?;
        Ok(next)
    }

    /// Guild count, app count and assignment counter
    pub fn stats(&self) -> StoreResult<Stats> {
        let rows = self.all_apps()?;
        let guilds: HashSet<GuildId> = rows.iter().map(|row| row.guild_id).collect();

        Ok(Stats {
            guilds: guilds.len() as u64,
            apps: rows.len() as u64,
            assignments: self.assignments()?,
        })
    }
}

fn read_counter(raw: Option<Vec<u8>>) -> StoreResult<u64> {
    match raw {
        None => Ok(0),
        Some(bytes) => {
            let bytes: [u8; 8] = bytes
                .as_slice()
                .try_into()
                .map_err(|_| StoreError::Corrupt(keys::ASSIGNMENTS.to_string()))?;
            Ok(u64::from_be_bytes(bytes))
        }
    }
}

impl StateStore {
    /// Run a synchronous store operation on the blocking thread pool
    async fn blocking<T, F>(&self, op: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(StateStore) -> StoreResult<T> + Send + 'static,
    {
        let store = self.clone();
        tokio::task::spawn_blocking(move || op(store))
            .await
            .map_err(|e| StoreError::TaskJoin(e.to_string()))?
    }
}

#[async_trait]
impl AppStore for StateStore {
    async fn add_app(&self, guild_id: GuildId, app_id: AppId) -> StoreResult<()> {
        self.blocking(move |store| store.add_app(guild_id, app_id))
            .await
    }

    async fn remove_app(&self, guild_id: GuildId, app_id: AppId) -> StoreResult<usize> {
        self.blocking(move |store| store.remove_app(guild_id, app_id))
            .await
    }

    async fn list_apps(&self, guild_id: GuildId) -> StoreResult<HashSet<AppId>> {
        self.blocking(move |store| store.list_apps(guild_id)).await
    }

    async fn increment_assignments(&self) -> StoreResult<u64> {
        self.blocking(|store| store.increment_assignments()).await
    }

    async fn stats(&self) -> StoreResult<Stats> {
        self.blocking(|store| store.stats()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn test_store() -> (StateStore, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let store = StateStore::open(dir.path().join("test.db")).unwrap();
        (store, dir)
    }

    const GUILD: GuildId = GuildId::new(5);
    const APP: AppId = AppId::new(1001);

    #[test]
    fn test_add_then_list() {
        let (store, _dir) = test_store();

        store.add_app(GUILD, APP).unwrap();
        let apps = store.list_apps(GUILD).unwrap();

        assert_eq!(apps, HashSet::from([APP]));
    }

    #[test]
    fn test_add_duplicate_reports_already_tracked() {
        let (store, _dir) = test_store();

        store.add_app(GUILD, APP).unwrap();
        let err = store.add_app(GUILD, APP).unwrap_err();

        assert!(err.is_already_tracked());
        assert_eq!(store.all_apps().unwrap().len(), 1);
    }

    #[test]
    fn test_remove_then_list() {
        let (store, _dir) = test_store();

        store.add_app(GUILD, APP).unwrap();
        assert_eq!(store.remove_app(GUILD, APP).unwrap(), 1);
        assert!(store.list_apps(GUILD).unwrap().is_empty());
    }

    #[test]
    fn test_remove_untracked_returns_zero() {
        let (store, _dir) = test_store();
        assert_eq!(store.remove_app(GUILD, APP).unwrap(), 0);
    }

    #[test]
    fn test_list_is_scoped_to_guild() {
        let (store, _dir) = test_store();

        store.add_app(GUILD, APP).unwrap();
        store.add_app(GuildId::new(55), AppId::new(7)).unwrap();
        store.add_app(GuildId::new(55), APP).unwrap();

        assert_eq!(store.list_apps(GUILD).unwrap(), HashSet::from([APP]));
        assert_eq!(store.list_apps(GuildId::new(55)).unwrap().len(), 2);
        assert!(store.list_apps(GuildId::new(6)).unwrap().is_empty());
    }

    #[test]
    fn test_counter_starts_at_zero_and_increments() {
        let (store, _dir) = test_store();

        assert_eq!(store.assignments().unwrap(), 0);
        assert_eq!(store.increment_assignments().unwrap(), 1);
        assert_eq!(store.increment_assignments().unwrap(), 2);
        assert_eq!(store.assignments().unwrap(), 2);
    }

    #[test]
    fn test_stats() {
        let (store, _dir) = test_store();

        store.add_app(GUILD, APP).unwrap();
        store.add_app(GUILD, AppId::new(2)).unwrap();
        store.add_app(GuildId::new(9), APP).unwrap();
        store.increment_assignments().unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(
            stats,
            Stats {
                guilds: 2,
                apps: 3,
                assignments: 1
            }
        );
    }

    #[test]
    fn test_state_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");

        {
            let store = StateStore::open(&path).unwrap();
            store.add_app(GUILD, APP).unwrap();
            store.increment_assignments().unwrap();
        }

        let store = StateStore::open(&path).unwrap();
        assert_eq!(store.list_apps(GUILD).unwrap(), HashSet::from([APP]));
        assert_eq!(store.assignments().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_async_seam_shares_database() {
        let (store, _dir) = test_store();
        let seam: &dyn AppStore = &store;

        seam.add_app(GUILD, APP).await.unwrap();
        assert!(seam.add_app(GUILD, APP).await.unwrap_err().is_already_tracked());
        assert_eq!(seam.increment_assignments().await.unwrap(), 1);

        // Writes made on the blocking pool are visible to the original handle.
        assert_eq!(store.list_apps(GUILD).unwrap(), HashSet::from([APP]));
        assert_eq!(seam.stats().await.unwrap().assignments, 1);
        assert_eq!(seam.remove_app(GUILD, APP).await.unwrap(), 1);
    }
}
