//! Tamper-evident audit log.
//!
//! Each entry's hash commits to its own fields and to the previous entry's
//! hash. Verification is a read-only walk that reports the first entry where
//! the chain breaks. There are no per-entry signatures: anyone able to rewrite
//! the whole tail consistently goes unnoticed unless chain heads are anchored
//! elsewhere (see `AuditChain::head`).

use crate::*;
use digest::Digest;
use num_enum::TryFromPrimitive;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use sha2::Sha256;
use std::ops::Range;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, error};

const CANONICAL_MAGIC: &[u8] = b"SVAUDIT";

/// Version of the canonical entry encoding. Bump on any layout change.
pub const CANONICAL_VERSION: u8 = 1;

/// `previous_hash` of the first entry.
pub const GENESIS_HASH: ChainHash = ChainHash([0u8; 32]);

/// SHA-256 digest linking audit entries.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Default)]
pub struct ChainHash(pub [u8; 32]);

impl ChainHash {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl std::fmt::Display for ChainHash {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl std::fmt::Debug for ChainHash {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "ChainHash({})", self)
    }
}

impl FromStr for ChainHash {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s)
            .map_err(|_| Error::InvalidParameter("chain hash is not valid hex".to_owned()))?;
        if bytes.len() != 32 {
            return Err(Error::InvalidParameter(format!(
                "chain hash must be 32 bytes, got {}",
                bytes.len()
            )));
        }
        let mut hash = [0u8; 32];
        hash.copy_from_slice(&bytes);
        Ok(ChainHash(hash))
    }
}

impl Serialize for ChainHash {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ChainHash {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        ChainHash::from_str(&s).map_err(de::Error::custom)
    }
}

/// Kinds of security-relevant events.
#[derive(Serialize, Deserialize, TryFromPrimitive, Copy, Debug, Clone, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum EventKind {
    ElectionCreated = 1,
    ElectionActivated = 2,
    KeyCeremony = 3,
    BallotCast = 4,
    ElectionClosed = 5,
    ShareSubmitted = 6,
    TallyStarted = 7,
    TallyComputed = 8,
    UserRegistration = 9,
    Login = 10,
    FailedLogin = 11,
    SuspiciousLogin = 12,
    AuditAccess = 13,
    AdminAction = 14,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let name = match self {
            EventKind::ElectionCreated => "election_created",
            EventKind::ElectionActivated => "election_activated",
            EventKind::KeyCeremony => "key_ceremony",
            EventKind::BallotCast => "ballot_cast",
            EventKind::ElectionClosed => "election_closed",
            EventKind::ShareSubmitted => "share_submitted",
            EventKind::TallyStarted => "tally_started",
            EventKind::TallyComputed => "tally_computed",
            EventKind::UserRegistration => "user_registration",
            EventKind::Login => "login",
            EventKind::FailedLogin => "failed_login",
            EventKind::SuspiciousLogin => "suspicious_login",
            EventKind::AuditAccess => "audit_access",
            EventKind::AdminAction => "admin_action",
        };
        write!(f, "{}", name)
    }
}

/// Roles are decided by the host before it calls into this crate.
#[derive(Serialize, Deserialize, TryFromPrimitive, Copy, Debug, Clone, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum Role {
    Voter = 1,
    ElectionAdmin = 2,
    Auditor = 3,
    Trustee = 4,
    System = 5,
}

/// Who caused an audit event.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Actor {
    pub role: Role,
    pub id: String,
}

impl Actor {
    pub fn new(role: Role, id: impl Into<String>) -> Self {
        Actor {
            role,
            id: id.into(),
        }
    }

    pub fn system() -> Self {
        Actor::new(Role::System, "system")
    }

    pub fn voter(id: impl Into<String>) -> Self {
        Actor::new(Role::Voter, id)
    }

    pub fn admin(id: impl Into<String>) -> Self {
        Actor::new(Role::ElectionAdmin, id)
    }

    pub fn trustee(index: u8) -> Self {
        Actor::new(Role::Trustee, format!("trustee-{}", index))
    }
}

/// One immutable record in the audit chain.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct AuditEntry {
    pub sequence: u64,
    pub kind: EventKind,
    pub actor: Actor,
    pub timestamp_ms: u64,
    pub payload: serde_json::Value,
    pub previous_hash: ChainHash,
    pub hash: ChainHash,
}

impl AuditEntry {
    fn seal(
        sequence: u64,
        kind: EventKind,
        actor: Actor,
        timestamp_ms: u64,
        payload: serde_json::Value,
        previous_hash: ChainHash,
    ) -> Self {
        let mut entry = AuditEntry {
            sequence,
            kind,
            actor,
            timestamp_ms,
            payload,
            previous_hash,
            hash: ChainHash::default(),
        };
        entry.hash = entry.compute_hash();
        entry
    }

    /// Canonical encoding of every field except `hash`.
    ///
    /// Layout (v1, integers big-endian): magic, version, sequence u64,
    /// kind u8, role u8, actor id (u32 length + UTF-8), timestamp u64,
    /// payload (u32 length + JSON with object keys sorted), previous hash.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let payload = canonical_json(&self.payload).to_string();
        let actor_id = self.actor.id.as_bytes();

        let mut out = Vec::with_capacity(96 + actor_id.len() + payload.len());
        out.extend_from_slice(CANONICAL_MAGIC);
        out.push(CANONICAL_VERSION);
        out.extend_from_slice(&self.sequence.to_be_bytes());
        out.push(self.kind as u8);
        out.push(self.actor.role as u8);
        out.extend_from_slice(&(actor_id.len() as u32).to_be_bytes());
        out.extend_from_slice(actor_id);
        out.extend_from_slice(&self.timestamp_ms.to_be_bytes());
        out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        out.extend_from_slice(payload.as_bytes());
        out.extend_from_slice(&self.previous_hash.0);
        out
    }

    pub fn compute_hash(&self) -> ChainHash {
        let digest = Sha256::digest(self.canonical_bytes());
        let mut hash = [0u8; 32];
        hash.copy_from_slice(&digest);
        ChainHash(hash)
    }
}

/// Copy of `value` with every object's keys in sorted order.
fn canonical_json(value: &serde_json::Value) -> serde_json::Value {
    use serde_json::{Map, Value};
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut sorted = Map::new();
            for key in keys {
                sorted.insert(key.clone(), canonical_json(&map[key]));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonical_json).collect()),
        other => other.clone(),
    }
}

/// Why verification stopped.
#[derive(Serialize, Deserialize, Copy, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Breach {
    /// Entry is missing, duplicated or out of order
    SequenceGap,
    /// Stored hash does not match the entry's contents
    HashMismatch,
    /// Previous-hash does not match the preceding entry
    BrokenLink,
}

/// Result of a verification pass.
#[derive(Serialize, Deserialize, Copy, Clone, Debug, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ChainStatus {
    Intact { total: u64 },
    CompromisedAt { sequence: u64, breach: Breach },
}

impl ChainStatus {
    pub fn is_intact(&self) -> bool {
        matches!(self, ChainStatus::Intact { .. })
    }
}

impl std::fmt::Display for ChainStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            ChainStatus::Intact { total } => write!(f, "intact ({} entries)", total),
            ChainStatus::CompromisedAt { sequence, breach } => {
                write!(f, "compromised at entry {} ({:?})", sequence, breach)
            }
        }
    }
}

/// Verify a run of entries that should start at `first_sequence` and link to
/// `previous`.
pub fn verify_entries<'a, I>(entries: I, first_sequence: u64, previous: ChainHash) -> ChainStatus
where
    I: IntoIterator<Item = &'a AuditEntry>,
{
    let mut previous = previous;
    let mut total = 0;

    for (offset, entry) in entries.into_iter().enumerate() {
        let sequence = first_sequence + offset as u64;
        let breach = if entry.sequence != sequence {
            Some(Breach::SequenceGap)
        } else if entry.compute_hash() != entry.hash {
            Some(Breach::HashMismatch)
        } else if entry.previous_hash != previous {
            Some(Breach::BrokenLink)
        } else {
            None
        };

        if let Some(breach) = breach {
            return ChainStatus::CompromisedAt { sequence, breach };
        }
        previous = entry.hash;
        total += 1;
    }

    ChainStatus::Intact { total }
}

/// The chain head: what a host would publish to anchor the log externally.
#[derive(Serialize, Deserialize, Copy, Clone, Debug, PartialEq, Eq)]
pub struct ChainHead {
    pub sequence: u64,
    pub hash: ChainHash,
}

/// Append-only audit chain over a store.
///
/// `append` holds the store lock across read-tail / hash / push, so concurrent
/// appenders can never link two entries to the same predecessor.
pub struct AuditChain<S: AuditStore = MemAuditStore> {
    store: Mutex<S>,
}

impl<S: AuditStore> AuditChain<S> {
    pub fn new(store: S) -> Self {
        AuditChain {
            store: Mutex::new(store),
        }
    }

    // A panic mid-append leaves the store without the new entry, which
    // verification handles like any other state.
    fn lock(&self) -> MutexGuard<'_, S> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append an event and return the sealed entry.
    pub fn append(
        &self,
        kind: EventKind,
        actor: &Actor,
        payload: serde_json::Value,
    ) -> Result<AuditEntry, Error> {
        let mut store = self.lock();

        let (sequence, previous_hash) = match store.tail() {
            Some(tail) => (tail.sequence + 1, tail.hash),
            None => (0, GENESIS_HASH),
        };
        let entry = AuditEntry::seal(
            sequence,
            kind,
            actor.clone(),
            now_ms(),
            payload,
            previous_hash,
        );
        store.push(entry.clone())?;

        debug!(sequence, kind = %kind, hash = %entry.hash, "audit entry appended");
        Ok(entry)
    }

    /// Verify the whole chain.
    pub fn verify(&self) -> ChainStatus {
        let len = self.len();
        self.verify_range(0..len)
    }

    /// Verify entries `range.start..range.end`.
    ///
    /// The first entry of the range is linked against the stored hash of its
    /// predecessor, so a sub-range check is as strict as a full one.
    pub fn verify_range(&self, range: Range<u64>) -> ChainStatus {
        let store = self.lock();
        let end = range.end.min(store.len());
        let start = range.start.min(end);

        let previous = if start == 0 {
            GENESIS_HASH
        } else {
            match store.get(start - 1) {
                Some(entry) => entry.hash,
                None => {
                    return self.report(ChainStatus::CompromisedAt {
                        sequence: start - 1,
                        breach: Breach::SequenceGap,
                    })
                }
            }
        };

        let entries = store.range(start..end);
        if entries.len() as u64 != end - start {
            let sequence = start + entries.len() as u64;
            return self.report(ChainStatus::CompromisedAt {
                sequence,
                breach: Breach::SequenceGap,
            });
        }

        self.report(verify_entries(&entries, start, previous))
    }

    fn report(&self, status: ChainStatus) -> ChainStatus {
        if let ChainStatus::CompromisedAt { sequence, breach } = status {
            error!(sequence, ?breach, "audit chain compromised");
        }
        status
    }

    /// Most recent entry's sequence and hash.
    pub fn head(&self) -> Option<ChainHead> {
        self.lock().tail().map(|tail| ChainHead {
            sequence: tail.sequence,
            hash: tail.hash,
        })
    }

    pub fn len(&self) -> u64 {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Page through entries in sequence order.
    pub fn entries(&self, offset: u64, limit: usize) -> Vec<AuditEntry> {
        let store = self.lock();
        let end = offset.saturating_add(limit as u64).min(store.len());
        store.range(offset.min(end)..end)
    }

    /// Run `f` with exclusive access to the underlying store.
    pub fn with_store<R>(&self, f: impl FnOnce(&mut S) -> R) -> R {
        f(&mut self.lock())
    }

    pub fn into_inner(self) -> S {
        self.store.into_inner().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for AuditChain<MemAuditStore> {
    fn default() -> Self {
        AuditChain::new(MemAuditStore::default())
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::thread;
    use tracing_test::traced_test;

    fn chain_of(k: usize) -> AuditChain {
        let chain = AuditChain::default();
        for i in 0..k {
            chain
                .append(
                    EventKind::BallotCast,
                    &Actor::voter(format!("voter-{}", i)),
                    json!({ "ballot": i, "receipt": format!("{:04x}", i * 7919) }),
                )
                .unwrap();
        }
        chain
    }

    #[test]
    fn first_entry_links_to_genesis() {
        let chain = chain_of(1);
        let entry = &chain.entries(0, 1)[0];
        assert_eq!(entry.sequence, 0);
        assert_eq!(entry.previous_hash, GENESIS_HASH);
        assert_eq!(entry.hash, entry.compute_hash());
        assert_eq!(
            chain.head(),
            Some(ChainHead {
                sequence: 0,
                hash: entry.hash
            })
        );
    }

    #[test]
    fn empty_chain_is_intact() {
        let chain = AuditChain::default();
        assert!(chain.is_empty());
        assert_eq!(chain.head(), None);
        assert_eq!(chain.verify(), ChainStatus::Intact { total: 0 });
    }

    #[test]
    fn ten_entries_then_corrupt_fourth() {
        let chain = chain_of(10);
        assert_eq!(chain.verify(), ChainStatus::Intact { total: 10 });
        // Repeated verification is stable
        assert_eq!(chain.verify(), chain.verify());

        chain.with_store(|store| {
            store.get_mut(4).unwrap().payload = json!({ "ballot": 400 });
        });
        assert_eq!(
            chain.verify(),
            ChainStatus::CompromisedAt {
                sequence: 4,
                breach: Breach::HashMismatch
            }
        );
        assert_eq!(chain.verify(), chain.verify());
    }

    #[test]
    #[traced_test]
    fn tampering_is_logged() {
        let chain = chain_of(3);
        chain.with_store(|store| store.get_mut(1).unwrap().timestamp_ms += 1);
        assert!(!chain.verify().is_intact());
        assert!(logs_contain("audit chain compromised"));
    }

    #[test]
    fn rewritten_entry_breaks_next_link() {
        let chain = chain_of(5);
        chain.with_store(|store| {
            let entry = store.get_mut(2).unwrap();
            entry.payload = json!({ "forged": true });
            entry.hash = entry.compute_hash();
        });
        assert_eq!(
            chain.verify(),
            ChainStatus::CompromisedAt {
                sequence: 3,
                breach: Breach::BrokenLink
            }
        );
    }

    #[test]
    fn deleted_entry_is_a_gap() {
        let chain = chain_of(5);
        let mut entries = chain.into_inner().into_entries();
        entries.remove(2);
        let chain = AuditChain::new(MemAuditStore::from(entries));
        assert_eq!(
            chain.verify(),
            ChainStatus::CompromisedAt {
                sequence: 2,
                breach: Breach::SequenceGap
            }
        );
    }

    #[test]
    fn range_verification_links_to_predecessor() {
        let chain = chain_of(8);
        assert_eq!(chain.verify_range(3..6), ChainStatus::Intact { total: 3 });
        assert_eq!(chain.verify_range(6..100), ChainStatus::Intact { total: 2 });

        chain.with_store(|store| store.get_mut(3).unwrap().previous_hash = ChainHash([9; 32]));
        assert!(!chain.verify_range(3..6).is_intact());
        // Entries after the damage still verify on their own
        assert_eq!(chain.verify_range(4..8), ChainStatus::Intact { total: 4 });
    }

    #[test]
    fn canonical_encoding_ignores_key_order() {
        let a = AuditEntry::seal(
            0,
            EventKind::AdminAction,
            Actor::admin("root"),
            1_700_000_000_000,
            json!({ "b": 1, "a": { "y": [1, 2], "x": null } }),
            GENESIS_HASH,
        );
        let b = AuditEntry::seal(
            0,
            EventKind::AdminAction,
            Actor::admin("root"),
            1_700_000_000_000,
            json!({ "a": { "x": null, "y": [1, 2] }, "b": 1 }),
            GENESIS_HASH,
        );
        assert_eq!(a.canonical_bytes(), b.canonical_bytes());
        assert_eq!(a.hash, b.hash);
        assert!(a.canonical_bytes().starts_with(b"SVAUDIT\x01"));
    }

    #[test]
    fn entries_are_paginated() {
        let chain = chain_of(7);
        let page: Vec<u64> = chain.entries(5, 10).iter().map(|e| e.sequence).collect();
        assert_eq!(page, vec![5, 6]);
        assert!(chain.entries(9, 3).is_empty());
        assert_eq!(chain.entries(0, 3).len(), 3);
    }

    #[test]
    fn entry_json_roundtrip() {
        let chain = chain_of(2);
        let entries = chain.entries(0, 2);
        let json = serde_json::to_string(&entries).unwrap();
        let restored: Vec<AuditEntry> = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, entries);
        let chain = AuditChain::new(MemAuditStore::from(restored));
        assert_eq!(chain.verify(), ChainStatus::Intact { total: 2 });
    }

    #[test]
    fn concurrent_appends_do_not_fork() {
        let chain = Arc::new(AuditChain::default());
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let chain = Arc::clone(&chain);
                thread::spawn(move || {
                    for i in 0..50 {
                        chain
                            .append(
                                EventKind::BallotCast,
                                &Actor::voter(format!("{}-{}", t, i)),
                                json!({ "thread": t, "i": i }),
                            )
                            .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(chain.verify(), ChainStatus::Intact { total: 400 });
        let previous: HashSet<ChainHash> = chain
            .entries(0, 400)
            .iter()
            .map(|e| e.previous_hash)
            .collect();
        assert_eq!(previous.len(), 400);
    }

    fn mutate(entry: &mut AuditEntry, field: u8) {
        match field {
            0 => entry.sequence += 100,
            1 => {
                entry.kind = if entry.kind == EventKind::Login {
                    EventKind::FailedLogin
                } else {
                    EventKind::Login
                }
            }
            2 => entry.actor.id.push('x'),
            3 => entry.actor.role = Role::Auditor,
            4 => entry.timestamp_ms ^= 1,
            5 => entry.payload = serde_json::json!({ "mutated": true }),
            6 => entry.previous_hash.0[0] ^= 0x80,
            _ => entry.hash.0[31] ^= 0x01,
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(48))]

        #[test]
        fn any_single_field_mutation_is_detected(
            k in 2usize..12,
            i_seed in any::<usize>(),
            field in 0u8..8,
        ) {
            let chain = chain_of(k);
            let i = 1 + i_seed % (k - 1);
            chain.with_store(|store| mutate(store.get_mut(i as u64).unwrap(), field));
            match chain.verify() {
                ChainStatus::CompromisedAt { sequence, .. } => prop_assert!(sequence >= i as u64),
                ChainStatus::Intact { .. } => prop_assert!(false, "mutation of field {} at {} undetected", field, i),
            }
        }
    }
}
