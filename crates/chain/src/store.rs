//! Key-value store and trie snapshot with explicit rollback.
//!
//! `TrieStore` models the world state as a sorted key-value map with a
//! deterministic root. Snapshots are persisted in the shared [`MemoryDb`]
//! keyed by root, so any participant can reopen the state a header points
//! at, mutate it speculatively, and either `commit` or `recover` back to a
//! known root. A failed or abandoned round therefore never leaks
//! partially-applied state into the next one.

use crate::ChainError;
use dbft_types::{Address, Hash, Producer};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Store key under which the producer-change interval is written once at
/// startup.
pub const KEY_CHANGE_INTERVAL: &[u8] = b"consensus/change_interval";

/// Trie key holding the registered producer candidates.
pub const KEY_CANDIDATES: &[u8] = b"chain/candidates";

const TRIE_SNAPSHOT_PREFIX: &[u8] = b"trie/";
const BALANCE_PREFIX: &[u8] = b"acct/balance/";
const NONCE_PREFIX: &[u8] = b"acct/nonce/";

/// Shared in-memory key-value store.
#[derive(Clone, Default)]
pub struct MemoryDb {
    inner: Arc<RwLock<HashMap<Vec<u8>, Vec<u8>>>>,
}

impl MemoryDb {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a raw value.
    pub fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.inner.read().get(key).cloned()
    }

    /// Write a raw value.
    pub fn put(&self, key: &[u8], value: Vec<u8>) {
        self.inner.write().insert(key.to_vec(), value);
    }
}

/// A mutable world-state snapshot anchored at a root.
pub struct TrieStore {
    db: MemoryDb,
    state: BTreeMap<Vec<u8>, Vec<u8>>,
}

impl TrieStore {
    /// Fresh empty state (genesis construction).
    pub fn empty(db: MemoryDb) -> Self {
        Self {
            db,
            state: BTreeMap::new(),
        }
    }

    /// Reopen the committed snapshot at `root`.
    pub fn at_root(db: MemoryDb, root: &Hash) -> Result<Self, ChainError> {
        let state = load_snapshot(&db, root).ok_or(ChainError::UnknownStateRoot(*root))?;
        Ok(Self { db, state })
    }

    /// Deterministic root over the sorted entries.
    pub fn state_root(&self) -> Hash {
        let mut parts: Vec<&[u8]> = Vec::with_capacity(self.state.len() * 2);
        let mut lens: Vec<[u8; 8]> = Vec::with_capacity(self.state.len() * 2);
        for (key, value) in &self.state {
            lens.push((key.len() as u64).to_be_bytes());
            lens.push((value.len() as u64).to_be_bytes());
        }
        let mut i = 0;
        for (key, value) in &self.state {
            parts.push(&lens[i]);
            parts.push(key);
            parts.push(&lens[i + 1]);
            parts.push(value);
            i += 2;
        }
        Hash::digest_parts(&parts)
    }

    /// Persist the current snapshot under its root and return the root.
    pub fn commit(&self) -> Hash {
        let root = self.state_root();
        let mut key = TRIE_SNAPSHOT_PREFIX.to_vec();
        key.extend_from_slice(root.as_bytes());
        // BTreeMap of byte vectors; serialization cannot fail.
        self.db.put(&key, bincode::serialize(&self.state).unwrap());
        root
    }

    /// Discard speculative mutations by reloading the snapshot at `root`.
    ///
    /// Returns false when no snapshot exists for that root, in which case
    /// the speculative state is left untouched.
    pub fn recover(&mut self, root: &Hash) -> bool {
        match load_snapshot(&self.db, root) {
            Some(state) => {
                self.state = state;
                true
            }
            None => false,
        }
    }

    /// Read a raw trie value.
    pub fn get(&self, key: &[u8]) -> Option<&Vec<u8>> {
        self.state.get(key)
    }

    /// Write a raw trie value.
    pub fn put(&mut self, key: &[u8], value: Vec<u8>) {
        self.state.insert(key.to_vec(), value);
    }

    /// Account balance, zero when absent.
    pub fn balance(&self, addr: &Address) -> u64 {
        self.get_u64(&account_key(BALANCE_PREFIX, addr))
    }

    /// Overwrite an account balance.
    pub fn set_balance(&mut self, addr: &Address, balance: u64) {
        self.put_u64(&account_key(BALANCE_PREFIX, addr), balance);
    }

    /// Credit an account (saturating).
    pub fn add_balance(&mut self, addr: &Address, amount: u64) {
        let balance = self.balance(addr).saturating_add(amount);
        self.set_balance(addr, balance);
    }

    /// Debit an account, failing on insufficient funds.
    pub fn sub_balance(&mut self, addr: &Address, amount: u64) -> Result<(), ChainError> {
        let balance = self.balance(addr);
        if balance < amount {
            return Err(ChainError::InsufficientBalance);
        }
        self.set_balance(addr, balance - amount);
        Ok(())
    }

    /// Account nonce, zero when absent.
    pub fn nonce(&self, addr: &Address) -> u64 {
        self.get_u64(&account_key(NONCE_PREFIX, addr))
    }

    /// Overwrite an account nonce.
    pub fn set_nonce(&mut self, addr: &Address, nonce: u64) {
        self.put_u64(&account_key(NONCE_PREFIX, addr), nonce);
    }

    /// Registered producer candidates, in registration order.
    pub fn candidates(&self) -> Vec<Producer> {
        self.get(KEY_CANDIDATES)
            .and_then(|bytes| bincode::deserialize(bytes).ok())
            .unwrap_or_default()
    }

    /// Overwrite the registered candidate list.
    pub fn set_candidates(&mut self, candidates: &[Producer]) {
        // Fixed-layout types; serialization cannot fail.
        self.put(KEY_CANDIDATES, bincode::serialize(candidates).unwrap());
    }

    fn get_u64(&self, key: &[u8]) -> u64 {
        self.get(key)
            .and_then(|bytes| bytes.as_slice().try_into().ok())
            .map(u64::from_be_bytes)
            .unwrap_or(0)
    }

    fn put_u64(&mut self, key: &[u8], value: u64) {
        self.put(key, value.to_be_bytes().to_vec());
    }
}

fn account_key(prefix: &[u8], addr: &Address) -> Vec<u8> {
    let mut key = prefix.to_vec();
    key.extend_from_slice(addr.as_bytes());
    key
}

fn load_snapshot(db: &MemoryDb, root: &Hash) -> Option<BTreeMap<Vec<u8>, Vec<u8>>> {
    let mut key = TRIE_SNAPSHOT_PREFIX.to_vec();
    key.extend_from_slice(root.as_bytes());
    db.get(&key).and_then(|bytes| bincode::deserialize(&bytes).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_deterministic_and_order_independent() {
        let db = MemoryDb::new();
        let mut a = TrieStore::empty(db.clone());
        a.put(b"k1", vec![1]);
        a.put(b"k2", vec![2]);

        let mut b = TrieStore::empty(db);
        b.put(b"k2", vec![2]);
        b.put(b"k1", vec![1]);

        assert_eq!(a.state_root(), b.state_root());
    }

    #[test]
    fn test_commit_and_reopen() {
        let db = MemoryDb::new();
        let mut trie = TrieStore::empty(db.clone());
        trie.set_balance(&Address([1; 20]), 100);
        let root = trie.commit();

        let reopened = TrieStore::at_root(db, &root).unwrap();
        assert_eq!(reopened.balance(&Address([1; 20])), 100);
        assert_eq!(reopened.state_root(), root);
    }

    #[test]
    fn test_recover_discards_speculative_writes() {
        let db = MemoryDb::new();
        let mut trie = TrieStore::empty(db);
        trie.set_balance(&Address([1; 20]), 100);
        let root = trie.commit();

        trie.set_balance(&Address([1; 20]), 0);
        trie.set_balance(&Address([2; 20]), 999);
        assert_ne!(trie.state_root(), root);

        assert!(trie.recover(&root));
        assert_eq!(trie.state_root(), root);
        assert_eq!(trie.balance(&Address([1; 20])), 100);
        assert_eq!(trie.balance(&Address([2; 20])), 0);
    }

    #[test]
    fn test_recover_unknown_root_fails() {
        let db = MemoryDb::new();
        let mut trie = TrieStore::empty(db);
        assert!(!trie.recover(&Hash::digest(b"never committed")));
    }

    #[test]
    fn test_sub_balance_insufficient() {
        let db = MemoryDb::new();
        let mut trie = TrieStore::empty(db);
        trie.set_balance(&Address([1; 20]), 10);
        assert_eq!(
            trie.sub_balance(&Address([1; 20]), 11).unwrap_err(),
            ChainError::InsufficientBalance
        );
    }
}
