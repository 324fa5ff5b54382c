//! Cached per-database and instance-wide state held by a worker.
//!
//! `DatabaseState` values are never mutated: a partial update builds a new
//! value sharing the untouched fields, and the cache swaps it in. A value
//! handed to a compiler call therefore never changes underneath it.

use std::collections::HashMap;
use std::sync::Arc;

use crate::compiler::{Compiler, SyncedState};

/// A worker's replica of one database's compile-relevant state.
pub struct DatabaseState<C: Compiler> {
    pub name: String,
    pub user_schema: Arc<C::Schema>,
    pub reflection_cache: Arc<C::ReflectionCache>,
    pub database_config: Arc<C::DatabaseConfig>,
}

/// Fields to replace in a cached [`DatabaseState`]; `None` keeps the
/// current value.
pub struct DatabaseUpdate<C: Compiler> {
    pub user_schema: Option<C::Schema>,
    pub reflection_cache: Option<C::ReflectionCache>,
    pub database_config: Option<C::DatabaseConfig>,
}

impl<C: Compiler> DatabaseUpdate<C> {
    pub fn is_empty(&self) -> bool {
        self.user_schema.is_none()
            && self.reflection_cache.is_none()
            && self.database_config.is_none()
    }
}

impl<C: Compiler> DatabaseState<C> {
    pub fn new(
        name: impl Into<String>,
        user_schema: C::Schema,
        reflection_cache: C::ReflectionCache,
        database_config: C::DatabaseConfig,
    ) -> Self {
        Self {
            name: name.into(),
            user_schema: Arc::new(user_schema),
            reflection_cache: Arc::new(reflection_cache),
            database_config: Arc::new(database_config),
        }
    }

    /// A copy of this state with `update` applied.
    pub fn updated(&self, update: DatabaseUpdate<C>) -> Self {
        Self {
            name: self.name.clone(),
            user_schema: update
                .user_schema
                .map(Arc::new)
                .unwrap_or_else(|| self.user_schema.clone()),
            reflection_cache: update
                .reflection_cache
                .map(Arc::new)
                .unwrap_or_else(|| self.reflection_cache.clone()),
            database_config: update
                .database_config
                .map(Arc::new)
                .unwrap_or_else(|| self.database_config.clone()),
        }
    }
}

/// Instance-wide state shared by every database on the worker.
pub struct GlobalState<C: Compiler> {
    pub global_schema: Arc<C::Schema>,
    pub instance_config: Arc<C::InstanceConfig>,
}

impl<C: Compiler> GlobalState<C> {
    pub fn new(global_schema: C::Schema, instance_config: C::InstanceConfig) -> Self {
        Self {
            global_schema: Arc::new(global_schema),
            instance_config: Arc::new(instance_config),
        }
    }

    /// The view of `db` plus this global state handed to the compiler.
    pub fn synced<'a>(&'a self, db: &'a DatabaseState<C>) -> SyncedState<'a, C> {
        SyncedState {
            user_schema: &db.user_schema,
            reflection_cache: &db.reflection_cache,
            database_config: &db.database_config,
            global_schema: &self.global_schema,
            instance_config: &self.instance_config,
        }
    }
}

/// The worker's cache root: database name to its current state.
///
/// Entries are always complete; a database is either absent or has all
/// three fields.
pub struct DatabaseCache<C: Compiler> {
    entries: HashMap<String, Arc<DatabaseState<C>>>,
}

impl<C: Compiler> DatabaseCache<C> {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    pub fn get(&self, dbname: &str) -> Option<Arc<DatabaseState<C>>> {
        self.entries.get(dbname).cloned()
    }

    pub fn contains(&self, dbname: &str) -> bool {
        self.entries.contains_key(dbname)
    }

    /// Insert or replace the entry for `db.name`.
    pub fn insert(&mut self, db: Arc<DatabaseState<C>>) {
        self.entries.insert(db.name.clone(), db);
    }

    /// Drop every listed database. Names that are not cached are ignored.
    /// Returns how many entries were removed.
    pub fn evict(&mut self, dbnames: &[String]) -> usize {
        dbnames
            .iter()
            .filter(|name| self.entries.remove(name.as_str()).is_some())
            .count()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Names of the cached databases, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.keys().cloned().collect();
        names.sort();
        names
    }
}

impl<C: Compiler> Default for DatabaseCache<C> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakeCompiler;

    fn db(name: &str, version: &str) -> Arc<DatabaseState<FakeCompiler>> {
        Arc::new(DatabaseState::new(
            name,
            vec![format!("schema-{version}")],
            vec![format!("refl-{version}")],
            [("cfg".to_string(), version.to_string())].into(),
        ))
    }

    #[test]
    fn update_shares_untouched_fields() {
        let old = db("main", "0");
        let new = old.updated(DatabaseUpdate {
            user_schema: Some(vec!["schema-1".to_string()]),
            reflection_cache: None,
            database_config: None,
        });

        assert_eq!(*new.user_schema, vec!["schema-1".to_string()]);
        assert!(Arc::ptr_eq(&old.reflection_cache, &new.reflection_cache));
        assert!(Arc::ptr_eq(&old.database_config, &new.database_config));
        // The old value is untouched.
        assert_eq!(*old.user_schema, vec!["schema-0".to_string()]);
    }

    #[test]
    fn evict_ignores_unknown_names() {
        let mut cache = DatabaseCache::<FakeCompiler>::new();
        cache.insert(db("a", "0"));
        cache.insert(db("b", "0"));

        let removed = cache.evict(&["a".to_string(), "zzz".to_string()]);
        assert_eq!(removed, 1);
        assert_eq!(cache.names(), vec!["b".to_string()]);
    }

    #[test]
    fn insert_replaces_existing_entry() {
        let mut cache = DatabaseCache::<FakeCompiler>::new();
        cache.insert(db("main", "0"));
        cache.insert(db("main", "1"));

        assert_eq!(cache.len(), 1);
        let current = cache.get("main").unwrap();
        assert_eq!(*current.user_schema, vec!["schema-1".to_string()]);
    }
}
