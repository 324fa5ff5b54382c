//! One-slot cache of the last transaction state and its serialized form.
//!
//! Most queries inside a transaction leave its session state alone (no
//! DDL, no new aliases, config or globals). When the state key is the same
//! before and after such a query, the bytes from the previous reply still
//! describe the state and serializing it again is skipped.

use serde_bytes::ByteBuf;
use tracing::debug;

use cpool_core::codec;
use cpool_core::{CodecResult, TxStateReply};

use crate::compiler::ConnectionState;

pub struct SerializedStateCache<S> {
    state: Option<S>,
    serialized: Option<ByteBuf>,
}

impl<S: ConnectionState> SerializedStateCache<S> {
    pub fn new() -> Self {
        Self {
            state: None,
            serialized: None,
        }
    }

    /// The state left by the last compile on this worker.
    pub fn state(&self) -> Option<&S> {
        self.state.as_ref()
    }

    /// Bytes matching [`state`](Self::state), if they were produced.
    pub fn serialized(&self) -> Option<&ByteBuf> {
        self.serialized.as_ref()
    }

    /// Drop the cached bytes; a foreign state is about to be installed.
    pub fn invalidate_serialized(&mut self) {
        self.serialized = None;
    }

    /// Cache the state left by a non-transactional compile and return its
    /// serialized form. No state means no open transaction.
    pub fn store(&mut self, state: Option<S>) -> CodecResult<Option<ByteBuf>> {
        self.serialized = None;
        self.state = state;
        if let Some(state) = &self.state {
            self.serialized = Some(codec::encode_blob(state)?);
        }
        Ok(self.serialized.clone())
    }

    /// Cache the state left by an in-transaction compile.
    ///
    /// `prev_key` is the key of the cached state the compile started from,
    /// or `None` if it started from a state shipped by the coordinator.
    /// The state is re-serialized unless it continued the cached state,
    /// bytes for that state exist, and the key did not move.
    pub fn store_tx(&mut self, state: S, prev_key: Option<S::Key>) -> CodecResult<TxStateReply> {
        let unchanged = match (&prev_key, &self.serialized) {
            (Some(prev), Some(_)) => *prev == state.state_key(),
            _ => false,
        };
        if unchanged {
            self.state = Some(state);
            debug!("transaction state unchanged, reusing serialized form");
            return Ok(TxStateReply::Unchanged);
        }

        self.serialized = None;
        let bytes = codec::encode_blob(&state)?;
        self.state = Some(state);
        self.serialized = Some(bytes.clone());
        debug!(bytes = bytes.len(), "transaction state serialized");
        Ok(TxStateReply::Fresh(bytes))
    }
}

impl<S: ConnectionState> Default for SerializedStateCache<S> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakeTxState;

    fn tx(savepoints: u32) -> FakeTxState {
        FakeTxState {
            savepoints,
            ..FakeTxState::default()
        }
    }

    #[test]
    fn store_without_state_clears_everything() {
        let mut cache = SerializedStateCache::new();
        cache.store(Some(tx(0))).unwrap();
        assert!(cache.serialized().is_some());

        assert_eq!(cache.store(None).unwrap(), None);
        assert!(cache.state().is_none());
        assert!(cache.serialized().is_none());
    }

    #[test]
    fn same_key_after_continuing_reuses_bytes() {
        let mut cache = SerializedStateCache::new();
        let first = cache.store_tx(tx(0), None).unwrap();
        let bytes = first.fresh_bytes().unwrap().to_vec();

        let mut next = tx(0);
        next.queries = 5;
        let reply = cache.store_tx(next, Some(tx(0).state_key())).unwrap();
        assert!(reply.is_unchanged());
        assert_eq!(cache.serialized().unwrap().as_slice(), bytes.as_slice());
        assert_eq!(cache.state().unwrap().queries, 5);
    }

    #[test]
    fn changed_key_is_reserialized() {
        let mut cache = SerializedStateCache::new();
        cache.store_tx(tx(0), None).unwrap();

        let reply = cache.store_tx(tx(1), Some(tx(0).state_key())).unwrap();
        let bytes = reply.fresh_bytes().unwrap();
        let decoded: FakeTxState = codec::decode(bytes).unwrap();
        assert_eq!(decoded.savepoints, 1);
    }

    #[test]
    fn decoded_state_keeps_its_key() {
        let mut state = tx(3);
        state.aliases.insert("m".to_string(), "default".to_string());
        state.root_schema = vec!["main::schema@0".to_string()];

        let decoded: FakeTxState = codec::decode(&codec::encode(&state).unwrap()).unwrap();
        assert_eq!(decoded.state_key(), state.state_key());
    }

    #[test]
    fn invalidated_bytes_force_reserialization() {
        let mut cache = SerializedStateCache::new();
        cache.store_tx(tx(0), None).unwrap();
        cache.invalidate_serialized();

        let reply = cache.store_tx(tx(0), Some(tx(0).state_key())).unwrap();
        assert!(!reply.is_unchanged());
    }

    #[test]
    fn shipped_state_is_always_reserialized() {
        let mut cache = SerializedStateCache::new();
        cache.store_tx(tx(0), None).unwrap();

        let reply = cache.store_tx(tx(0), None).unwrap();
        assert!(!reply.is_unchanged());
    }
}
