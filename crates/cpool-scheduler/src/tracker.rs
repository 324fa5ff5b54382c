//! Per-worker sync bookkeeping on the coordinator side.
//!
//! A compiler worker caches every database it has compiled for. The
//! coordinator mirrors that cache with a [`SyncTracker`] per worker so each
//! request ships only what the worker has not seen yet:
//!
//! ```text
//! plan(db)  ──►  SyncArgs (changed fields + evictions)  ──►  worker.sync
//!    ▲                                                          │
//!    └──────────── commit(plan) on success ◄────────────────────┘
//!                  invalidate(db) on FailedStateSync
//! ```

use std::collections::HashMap;

use serde_bytes::ByteBuf;
use tracing::debug;

use cpool_core::SyncArgs;

/// Versions of the per-database fields held by the server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct DatabaseVersions {
    pub user_schema: u64,
    pub reflection_cache: u64,
    pub database_config: u64,
}

/// Versions of the instance-wide fields held by the server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct GlobalVersions {
    pub global_schema: u64,
    pub system_config: u64,
}

/// Encoded authoritative state a [`SyncPlan`] picks its fields from.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateBlobs {
    pub user_schema: ByteBuf,
    pub reflection_cache: ByteBuf,
    pub database_config: ByteBuf,
    pub global_schema: ByteBuf,
    pub system_config: ByteBuf,
}

/// What to ship to one worker for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncPlan {
    pub dbname: String,
    pub evicted_dbs: Vec<String>,
    pub user_schema: bool,
    pub reflection_cache: bool,
    pub database_config: bool,
    pub global_schema: bool,
    pub system_config: bool,
    versions: DatabaseVersions,
    globals: GlobalVersions,
}

impl SyncPlan {
    /// `true` if the worker is already up to date and nothing is shipped.
    pub fn is_noop(&self) -> bool {
        self.evicted_dbs.is_empty()
            && !self.user_schema
            && !self.reflection_cache
            && !self.database_config
            && !self.global_schema
            && !self.system_config
    }

    /// Build the wire arguments, cloning only the planned fields.
    pub fn to_sync_args(&self, blobs: &StateBlobs) -> SyncArgs {
        let pick = |wanted: bool, blob: &ByteBuf| wanted.then(|| blob.clone());
        SyncArgs {
            dbname: self.dbname.clone(),
            evicted_dbs: self.evicted_dbs.clone(),
            user_schema: pick(self.user_schema, &blobs.user_schema),
            reflection_cache: pick(self.reflection_cache, &blobs.reflection_cache),
            global_schema: pick(self.global_schema, &blobs.global_schema),
            database_config: pick(self.database_config, &blobs.database_config),
            system_config: pick(self.system_config, &blobs.system_config),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Held {
    versions: DatabaseVersions,
    last_used: u64,
}

/// Affinity of a worker for a database, usable as a
/// [`WorkerQueue`](crate::WorkerQueue) weight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Affinity {
    Absent,
    Stale,
    Fresh,
}

/// Mirror of one worker's database cache.
#[derive(Debug, Clone)]
pub struct SyncTracker {
    databases: HashMap<String, Held>,
    globals: GlobalVersions,
    max_databases: usize,
    clock: u64,
}

impl SyncTracker {
    /// Track a freshly initialized worker. `globals` are the versions
    /// shipped in its init payload.
    pub fn new(max_databases: usize, globals: GlobalVersions) -> Self {
        Self {
            databases: HashMap::new(),
            globals,
            max_databases: max_databases.max(1),
            clock: 0,
        }
    }

    /// Plan the sync of `dbname` against the server's current versions.
    pub fn plan(
        &self,
        dbname: &str,
        versions: &DatabaseVersions,
        globals: &GlobalVersions,
    ) -> SyncPlan {
        let (user_schema, reflection_cache, database_config, evicted_dbs) =
            match self.databases.get(dbname) {
                Some(held) => (
                    held.versions.user_schema != versions.user_schema,
                    held.versions.reflection_cache != versions.reflection_cache,
                    held.versions.database_config != versions.database_config,
                    Vec::new(),
                ),
                None => (true, true, true, self.eviction_candidates(dbname)),
            };

        SyncPlan {
            dbname: dbname.to_string(),
            evicted_dbs,
            user_schema,
            reflection_cache,
            database_config,
            global_schema: self.globals.global_schema != globals.global_schema,
            system_config: self.globals.system_config != globals.system_config,
            versions: *versions,
            globals: *globals,
        }
    }

    /// Least recently used databases to drop so `dbname` fits.
    fn eviction_candidates(&self, dbname: &str) -> Vec<String> {
        let excess = (self.databases.len() + 1).saturating_sub(self.max_databases);
        if excess == 0 {
            return Vec::new();
        }
        let mut held: Vec<(&String, u64)> = self
            .databases
            .iter()
            .filter(|(name, _)| name.as_str() != dbname)
            .map(|(name, h)| (name, h.last_used))
            .collect();
        held.sort_by_key(|(_, last_used)| *last_used);
        held.into_iter()
            .take(excess)
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Record that the worker applied `plan` successfully.
    pub fn commit(&mut self, plan: &SyncPlan) {
        for name in &plan.evicted_dbs {
            self.databases.remove(name);
        }
        self.clock += 1;
        self.databases.insert(
            plan.dbname.clone(),
            Held {
                versions: plan.versions,
                last_used: self.clock,
            },
        );
        self.globals = plan.globals;
        debug!(
            dbname = %plan.dbname,
            evicted = plan.evicted_dbs.len(),
            held = self.databases.len(),
            "worker sync committed"
        );
    }

    /// Forget `dbname`, e.g. after the worker reported a failed sync; the
    /// next plan ships the database in full.
    pub fn invalidate(&mut self, dbname: &str) {
        if self.databases.remove(dbname).is_some() {
            debug!(%dbname, "worker cache entry invalidated");
        }
    }

    /// Record that the worker rejected `plan` during sync.
    ///
    /// The worker applies evictions before anything that can fail and does
    /// not undo them, so every planned eviction is treated as done and the
    /// target database is forgotten.
    pub fn abort(&mut self, plan: &SyncPlan) {
        for name in &plan.evicted_dbs {
            self.databases.remove(name);
        }
        self.databases.remove(&plan.dbname);
        debug!(
            dbname = %plan.dbname,
            evicted = plan.evicted_dbs.len(),
            held = self.databases.len(),
            "worker sync aborted"
        );
    }

    /// How well this worker's cache matches `versions` for `dbname`.
    pub fn affinity(&self, dbname: &str, versions: &DatabaseVersions) -> Affinity {
        match self.databases.get(dbname) {
            Some(held) if held.versions == *versions => Affinity::Fresh,
            Some(_) => Affinity::Stale,
            None => Affinity::Absent,
        }
    }

    /// `true` if the worker currently holds `dbname`.
    pub fn holds(&self, dbname: &str) -> bool {
        self.databases.contains_key(dbname)
    }

    /// Number of databases the worker currently holds.
    pub fn len(&self) -> usize {
        self.databases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.databases.is_empty()
    }
}
