//! EP-011: In-process blockchain backend.
//!
//! Mutations apply to a staged world state; `commit` snapshots it as the
//! committed state, produces a block and notifies `newBlock` subscribers.
//! Reads observe committed state. Contract behaviour is delegated to a
//! [`ContractModel`] so callers decide what deployed code does.

use super::*;
use crate::core::resolver::parse_number;
use crate::core::symbols::{coerce_hex, strip_hex, strip_zeros};
use crate::error::EpmError;
use num_bigint::BigUint;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::mpsc::{channel, Sender};

/// Effect of invoking contract code.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Invocation {
    pub output: String,
    pub writes: Vec<(String, String)>,
}

/// What deployed code does. The default model has no behaviour.
pub trait ContractModel {
    /// Initial storage written by deploying `code`.
    fn construct(&self, _code: &[u8]) -> Vec<(String, String)> {
        Vec::new()
    }

    /// Result of a message or call carrying `data`.
    fn invoke(&self, _code: &[u8], _storage: &Storage, _data: &[String]) -> Invocation {
        Invocation::default()
    }
}

/// Model whose contracts neither write storage nor return data.
pub struct InertModel;

impl ContractModel for InertModel {}

struct Subscriber {
    event: String,
    target: String,
    sender: Sender<ChainEvent>,
}

pub struct MemoryChain {
    chain_id: String,
    keys: Vec<String>,
    active: usize,
    staged: WorldState,
    committed: WorldState,
    blocks: Vec<Block>,
    pending: Vec<String>,
    autocommit: bool,
    running: bool,
    tx_count: u64,
    subscribers: HashMap<String, Subscriber>,
    properties: HashMap<String, String>,
    model: Box<dyn ContractModel>,
}

/// Canonical storage key: `0x` + hex without leading zeros (`0x0` for zero).
pub fn normalize_slot(slot: &str) -> String {
    let digits = strip_zeros(strip_hex(slot.trim())).to_ascii_lowercase();
    if digits.is_empty() {
        "0x0".to_string()
    } else {
        format!("0x{}", digits)
    }
}

fn sha256_hex(input: &str) -> String {
    hex::encode(Sha256::digest(input.as_bytes()))
}

fn derive_address(seed: &str) -> String {
    format!("0x{}", &sha256_hex(seed)[..40])
}

impl Default for MemoryChain {
    fn default() -> Self {
        Self::new("memory")
    }
}

impl MemoryChain {
    pub fn new(chain_id: &str) -> Self {
        let mut chain = MemoryChain {
            chain_id: chain_id.to_string(),
            keys: Vec::new(),
            active: 0,
            staged: WorldState::default(),
            committed: WorldState::default(),
            blocks: Vec::new(),
            pending: Vec::new(),
            autocommit: false,
            running: false,
            tx_count: 0,
            subscribers: HashMap::new(),
            properties: HashMap::new(),
            model: Box::new(InertModel),
        };
        let genesis = chain.new_address(true);
        let funds = BigUint::from(1u8) << 128usize;
        chain.account_mut(&genesis).balance = format!("0x{}", funds.to_str_radix(16));
        chain.committed = chain.staged.clone();
        chain.blocks.push(Block {
            number: 0,
            hash: format!("0x{}", sha256_hex(&format!("genesis:{}", chain_id))),
            parent: String::new(),
            transactions: Vec::new(),
        });
        chain
    }

    /// Use `model` for deployed code.
    pub fn with_model(mut self, model: Box<dyn ContractModel>) -> Self {
        self.model = model;
        self
    }

    fn account_mut(&mut self, addr: &str) -> &mut Account {
        let addr = addr.to_ascii_lowercase();
        self.staged
            .accounts
            .entry(addr.clone())
            .or_insert_with(|| Account {
                address: addr,
                balance: "0x00".to_string(),
                ..Account::default()
            })
    }

    fn next_txid(&mut self, kind: &str, target: &str) -> String {
        self.tx_count += 1;
        let id = format!(
            "0x{}",
            sha256_hex(&format!("{}:{}:{}:{}", self.chain_id, kind, target, self.tx_count))
        );
        self.pending.push(id.clone());
        id
    }

    fn bump_nonce(&mut self) -> u64 {
        let sender = self.active_address();
        let acct = self.account_mut(&sender);
        let nonce = acct.nonce;
        acct.nonce += 1;
        nonce
    }

    fn after_mutation(&mut self) -> Result<()> {
        if self.autocommit {
            self.commit()?;
        }
        Ok(())
    }

    fn contract(&self, addr: &str) -> Result<&Account> {
        self.staged
            .accounts
            .get(&addr.to_ascii_lowercase())
            .filter(|a| a.is_script)
            .ok_or_else(|| EpmError::chain(format!("no contract at {}", addr)))
    }

    fn apply_writes(&mut self, addr: &str, writes: Vec<(String, String)>) {
        let acct = self.account_mut(addr);
        for (slot, value) in writes {
            acct.storage
                .slots
                .insert(normalize_slot(&slot), coerce_hex(&value));
        }
    }
}

impl KeyManager for MemoryChain {
    fn active_address(&self) -> String {
        self.keys.get(self.active).cloned().unwrap_or_default()
    }

    fn address(&self, n: usize) -> Result<String> {
        self.keys
            .get(n)
            .cloned()
            .ok_or_else(|| EpmError::chain(format!("no key at index {}", n)))
    }

    fn set_address(&mut self, addr: &str) -> Result<()> {
        let addr = addr.to_ascii_lowercase();
        let idx = self
            .keys
            .iter()
            .position(|k| *k == addr)
            .ok_or_else(|| EpmError::chain(format!("unknown key {}", addr)))?;
        self.active = idx;
        Ok(())
    }

    fn set_address_n(&mut self, n: usize) -> Result<()> {
        if n >= self.keys.len() {
            return Err(EpmError::chain(format!("no key at index {}", n)));
        }
        self.active = n;
        Ok(())
    }

    fn new_address(&mut self, set: bool) -> String {
        let addr = derive_address(&format!("{}:key:{}", self.chain_id, self.keys.len()));
        self.keys.push(addr.clone());
        self.account_mut(&addr);
        if set {
            self.active = self.keys.len() - 1;
        }
        addr
    }

    fn address_count(&self) -> usize {
        self.keys.len()
    }
}

impl Blockchain for MemoryChain {
    fn init(&mut self) -> Result<()> {
        Ok(())
    }

    fn start(&mut self) -> Result<()> {
        self.running = true;
        Ok(())
    }

    fn shutdown(&mut self) -> Result<()> {
        self.running = false;
        self.subscribers.clear();
        Ok(())
    }

    fn wait_for_shutdown(&self) {}

    fn set_property(&mut self, key: &str, value: &str) -> Result<()> {
        self.properties.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn property(&self, key: &str) -> Option<String> {
        self.properties.get(key).cloned()
    }

    fn chain_id(&self) -> String {
        self.chain_id.clone()
    }

    fn world_state(&self) -> WorldState {
        self.committed.clone()
    }

    fn state(&self) -> State {
        let storage = self
            .committed
            .accounts
            .iter()
            .filter(|(_, a)| !a.storage.slots.is_empty())
            .map(|(k, a)| (k.clone(), a.storage.clone()))
            .collect();
        State { storage }
    }

    fn storage(&self, addr: &str) -> Result<Storage> {
        Ok(self.account(addr)?.storage)
    }

    fn account(&self, addr: &str) -> Result<Account> {
        self.committed
            .accounts
            .get(&addr.to_ascii_lowercase())
            .cloned()
            .ok_or_else(|| EpmError::chain(format!("unknown account {}", addr)))
    }

    fn storage_at(&self, addr: &str, slot: &str) -> Result<String> {
        let acct = self
            .committed
            .accounts
            .get(&addr.to_ascii_lowercase())
            .ok_or_else(|| EpmError::chain(format!("unknown account {}", addr)))?;
        Ok(acct
            .storage
            .slots
            .get(&normalize_slot(slot))
            .cloned()
            .unwrap_or_else(|| "0x00".to_string()))
    }

    fn block_count(&self) -> u64 {
        self.blocks.len() as u64
    }

    fn latest_block(&self) -> String {
        self.blocks.last().map(|b| b.hash.clone()).unwrap_or_default()
    }

    fn block(&self, hash: &str) -> Result<Block> {
        self.blocks
            .iter()
            .find(|b| b.hash == hash)
            .cloned()
            .ok_or_else(|| EpmError::chain(format!("unknown block {}", hash)))
    }

    fn is_script(&self, addr: &str) -> bool {
        self.committed
            .accounts
            .get(&addr.to_ascii_lowercase())
            .is_some_and(|a| a.is_script)
    }

    fn tx(&mut self, addr: &str, amount: &str) -> Result<String> {
        let amount = parse_number(amount)?;
        let sender = self.active_address();
        let have = parse_number(&self.account_mut(&sender).balance)?;
        if have < amount {
            return Err(EpmError::chain(format!(
                "insufficient balance in {}: have 0x{}, need 0x{}",
                sender,
                have.to_str_radix(16),
                amount.to_str_radix(16)
            )));
        }
        self.account_mut(&sender).balance = format!("0x{}", (have - &amount).to_str_radix(16));
        let target = self.account_mut(addr);
        let balance = parse_number(&target.balance)? + amount;
        target.balance = format!("0x{}", balance.to_str_radix(16));
        self.bump_nonce();
        let id = self.next_txid("tx", addr);
        self.after_mutation()?;
        Ok(id)
    }

    fn msg(&mut self, addr: &str, data: &[String]) -> Result<String> {
        let acct = self.contract(addr)?;
        let code = hex::decode(&acct.code).map_err(EpmError::chain)?;
        let result = self.model.invoke(&code, &acct.storage, data);
        self.apply_writes(addr, result.writes);
        self.bump_nonce();
        let id = self.next_txid("msg", addr);
        self.after_mutation()?;
        Ok(id)
    }

    fn call(&mut self, addr: &str, data: &[String]) -> Result<String> {
        let acct = self.contract(addr)?;
        let code = hex::decode(&acct.code).map_err(EpmError::chain)?;
        Ok(self.model.invoke(&code, &acct.storage, data).output)
    }

    fn script(&mut self, code: &[u8]) -> Result<(String, String)> {
        let sender = self.active_address();
        let nonce = self.bump_nonce();
        let addr = derive_address(&format!("{}:{}", sender, nonce));
        let writes = self.model.construct(code);
        {
            let acct = self.account_mut(&addr);
            acct.code = hex::encode(code);
            acct.is_script = true;
        }
        self.apply_writes(&addr, writes);
        let id = self.next_txid("script", &addr);
        self.after_mutation()?;
        Ok((id, addr))
    }

    fn commit(&mut self) -> Result<()> {
        self.committed = self.staged.clone();
        let parent = self.latest_block();
        let number = self.blocks.len() as u64;
        let hash = format!(
            "0x{}",
            sha256_hex(&format!("{}:{}:{}", parent, number, self.pending.join(",")))
        );
        self.blocks.push(Block {
            number,
            hash: hash.clone(),
            parent,
            transactions: std::mem::take(&mut self.pending),
        });
        self.subscribers.retain(|_, sub| {
            if sub.event != NEW_BLOCK {
                return true;
            }
            sub.sender
                .send(ChainEvent {
                    event: NEW_BLOCK.to_string(),
                    target: sub.target.clone(),
                    resource: hash.clone(),
                })
                .is_ok()
        });
        Ok(())
    }

    fn auto_commit(&mut self, on: bool) -> Result<()> {
        self.autocommit = on;
        Ok(())
    }

    fn is_autocommit(&self) -> bool {
        self.autocommit
    }

    fn subscribe(&mut self, name: &str, event: &str, target: &str) -> Result<Receiver<ChainEvent>> {
        let (sender, receiver) = channel();
        self.subscribers.insert(
            name.to_string(),
            Subscriber {
                event: event.to_string(),
                target: target.to_string(),
                sender,
            },
        );
        Ok(receiver)
    }

    fn unsubscribe(&mut self, name: &str) -> Result<()> {
        self.subscribers.remove(name);
        Ok(())
    }
}
