//! EP-010: Blockchain capability — the interface the engine drives a ledger through.
//!
//! Concrete backends implement [`Blockchain`]; the engine never depends on
//! a specific one. [`memory::MemoryChain`] is an in-process backend for
//! development and tests.

pub mod memory;

use crate::error::Result;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::sync::mpsc::Receiver;

/// Event name a backend publishes after each committed block.
pub const NEW_BLOCK: &str = "newBlock";

/// Slot → value for one account.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Storage {
    pub slots: IndexMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub address: String,
    pub balance: String,
    pub nonce: u64,
    /// Hex-encoded code; empty for plain accounts.
    pub code: String,
    pub storage: Storage,
    pub is_script: bool,
}

/// Storage of every account holding any.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct State {
    pub storage: IndexMap<String, Storage>,
}

/// Every account.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorldState {
    pub accounts: IndexMap<String, Account>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub number: u64,
    pub hash: String,
    pub parent: String,
    pub transactions: Vec<String>,
}

/// Notification delivered to a subscriber.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainEvent {
    pub event: String,
    pub target: String,
    pub resource: String,
}

/// Key management half of the capability.
pub trait KeyManager {
    fn active_address(&self) -> String;
    fn address(&self, n: usize) -> Result<String>;
    fn set_address(&mut self, addr: &str) -> Result<()>;
    fn set_address_n(&mut self, n: usize) -> Result<()>;
    /// Create a key; make it active when `set` is true.
    fn new_address(&mut self, set: bool) -> String;
    fn address_count(&self) -> usize;
}

/// A pluggable ledger backend.
pub trait Blockchain: KeyManager {
    // lifecycle
    fn init(&mut self) -> Result<()>;
    fn start(&mut self) -> Result<()>;
    fn shutdown(&mut self) -> Result<()>;
    fn wait_for_shutdown(&self);
    fn set_property(&mut self, key: &str, value: &str) -> Result<()>;
    fn property(&self, key: &str) -> Option<String>;

    // identity
    fn chain_id(&self) -> String;

    // reads
    fn world_state(&self) -> WorldState;
    fn state(&self) -> State;
    fn storage(&self, addr: &str) -> Result<Storage>;
    fn account(&self, addr: &str) -> Result<Account>;
    fn storage_at(&self, addr: &str, slot: &str) -> Result<String>;
    fn block_count(&self) -> u64;
    fn latest_block(&self) -> String;
    fn block(&self, hash: &str) -> Result<Block>;
    fn is_script(&self, addr: &str) -> bool;

    // mutation; each returns a transaction id
    fn tx(&mut self, addr: &str, amount: &str) -> Result<String>;
    fn msg(&mut self, addr: &str, data: &[String]) -> Result<String>;
    /// Simulated, non-mutating message; returns the output value.
    fn call(&mut self, addr: &str, data: &[String]) -> Result<String>;
    /// Deploy code; returns `(txid, address)`.
    fn script(&mut self, code: &[u8]) -> Result<(String, String)>;
    fn commit(&mut self) -> Result<()>;
    fn auto_commit(&mut self, on: bool) -> Result<()>;
    fn is_autocommit(&self) -> bool;

    // eventing
    fn subscribe(&mut self, name: &str, event: &str, target: &str) -> Result<Receiver<ChainEvent>>;
    fn unsubscribe(&mut self, name: &str) -> Result<()>;
}
