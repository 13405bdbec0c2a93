//! Election orchestrator: ballot intake, close, trustee shares and the final
//! tally, with every step recorded in the audit chain.

use crate::*;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Lifecycle of an election. Transitions only move forward.
#[derive(Serialize, Deserialize, Copy, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ElectionState {
    Open,
    Closed,
    Tallying,
    Tallied,
}

impl std::fmt::Display for ElectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let name = match self {
            ElectionState::Open => "open",
            ElectionState::Closed => "closed",
            ElectionState::Tallying => "tallying",
            ElectionState::Tallied => "tallied",
        };
        write!(f, "{}", name)
    }
}

struct Inner {
    state: ElectionState,
    ballots: Vec<EncryptedBallot>,
    shares: BTreeMap<u8, Share>,
    aggregates: Option<IndexMap<String, Ciphertext>>,
}

/// One election: its public key, candidates, ballots and audit chain.
///
/// All methods take `&self`; state, ballots and shares sit behind a single
/// lock so a ballot can never be accepted after `close` returns.
pub struct Election {
    id: Uuid,
    split_id: Uuid,
    candidates: Vec<String>,
    trustees: usize,
    threshold: usize,
    public_key: PublicKey,
    audit: Arc<AuditChain>,
    inner: Mutex<Inner>,
}

impl Election {
    /// Open a new election under `public_key`, whose private half was dealt
    /// as split `split_id` to `trustees` trustees with reconstruction
    /// threshold `threshold`. Only shares of that split are accepted.
    pub fn new(
        public_key: PublicKey,
        split_id: Uuid,
        candidates: Vec<String>,
        trustees: usize,
        threshold: usize,
        audit: Arc<AuditChain>,
        creator: &Actor,
    ) -> Result<Self, Error> {
        check_parameters(trustees, threshold)?;
        if candidates.is_empty() {
            return Err(Error::InvalidParameter(
                "an election needs at least one candidate".to_owned(),
            ));
        }
        for (i, candidate) in candidates.iter().enumerate() {
            if candidates[..i].contains(candidate) {
                return Err(Error::InvalidParameter(format!(
                    "duplicate candidate {}",
                    candidate
                )));
            }
        }

        let id = Uuid::new_v4();
        audit.append(
            EventKind::ElectionCreated,
            creator,
            json!({
                "election": id.to_string(),
                "candidates": candidates,
                "key": public_key.id().to_string(),
                "split": split_id.to_string(),
                "trustees": trustees,
                "threshold": threshold,
            }),
        )?;
        info!(election = %id, candidates = candidates.len(), "election opened");

        Ok(Election {
            id,
            split_id,
            candidates,
            trustees,
            threshold,
            public_key,
            audit,
            inner: Mutex::new(Inner {
                state: ElectionState::Open,
                ballots: Vec::new(),
                shares: BTreeMap::new(),
                aggregates: None,
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn candidates(&self) -> &[String] {
        &self.candidates
    }

    /// Split the election key was dealt under.
    pub fn split_id(&self) -> Uuid {
        self.split_id
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    pub fn audit(&self) -> &Arc<AuditChain> {
        &self.audit
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    pub fn trustees(&self) -> usize {
        self.trustees
    }

    pub fn state(&self) -> ElectionState {
        self.lock().state
    }

    pub fn ballots_cast(&self) -> u64 {
        self.lock().ballots.len() as u64
    }

    /// Number of distinct trustee shares received so far.
    pub fn shares_received(&self) -> usize {
        self.lock().shares.len()
    }

    /// Accept a ballot while the election is open.
    ///
    /// Eligibility and one-vote-per-voter are decided by the caller.
    pub fn submit_ballot(
        &self,
        voter: &Actor,
        ballot: EncryptedBallot,
    ) -> Result<BallotReceipt, Error> {
        let mut inner = self.lock();
        if inner.state != ElectionState::Open {
            return Err(Error::AlreadyClosed);
        }

        ballot.validate(&self.public_key, &self.candidates)?;
        let cast = inner.ballots.len() as u64 + 1;
        if !self.public_key.can_hold(cast) {
            return Err(Error::Domain(format!(
                "{} ballots would overflow the plaintext space",
                cast
            )));
        }

        let receipt = BallotReceipt::issue(&self.id, voter, &ballot)?;
        self.audit.append(
            EventKind::BallotCast,
            voter,
            json!({
                "election": self.id.to_string(),
                "receipt": receipt.short(),
            }),
        )?;
        inner.ballots.push(ballot);

        debug!(election = %self.id, receipt = %receipt.short(), "ballot accepted");
        Ok(receipt)
    }

    /// Stop accepting ballots.
    pub fn close(&self, actor: &Actor) -> Result<(), Error> {
        let mut inner = self.lock();
        if inner.state != ElectionState::Open {
            return Err(Error::AlreadyClosed);
        }

        self.audit.append(
            EventKind::ElectionClosed,
            actor,
            json!({
                "election": self.id.to_string(),
                "ballots": inner.ballots.len(),
            }),
        )?;
        inner.state = ElectionState::Closed;

        info!(election = %self.id, ballots = inner.ballots.len(), "election closed");
        Ok(())
    }

    /// Combine every lane's ciphertexts. Nothing is decrypted yet.
    pub fn begin_tally(&self, actor: &Actor) -> Result<(), Error> {
        let mut inner = self.lock();
        expect_state(inner.state, ElectionState::Closed)?;

        let aggregates = aggregate_lanes(&self.public_key, &self.candidates, &inner.ballots)?;
        self.audit.append(
            EventKind::TallyStarted,
            actor,
            json!({
                "election": self.id.to_string(),
                "ballots": inner.ballots.len(),
            }),
        )?;
        inner.aggregates = Some(aggregates);
        inner.state = ElectionState::Tallying;

        info!(election = %self.id, "tally started");
        Ok(())
    }

    /// Hand in one trustee's share of the election key.
    ///
    /// Returns the number of distinct shares now held. Resubmitting the same
    /// share is harmless.
    pub fn submit_share(&self, trustee: &Actor, share: Share) -> Result<usize, Error> {
        let mut inner = self.lock();
        if inner.state != ElectionState::Closed && inner.state != ElectionState::Tallying {
            return Err(Error::InvalidState {
                expected: ElectionState::Closed,
                found: inner.state,
            });
        }

        share.verify()?;
        if share.split_id != self.split_id {
            warn!(election = %self.id, index = share.index, "share from a different key split");
            return Err(Error::CorruptShare(share.index));
        }
        if share.total as usize != self.trustees || share.threshold as usize != self.threshold {
            warn!(election = %self.id, index = share.index, "share dealt for different parameters");
            return Err(Error::CorruptShare(share.index));
        }
        match inner.shares.get(&share.index) {
            Some(held) if *held == share => return Ok(inner.shares.len()),
            Some(_) => return Err(Error::CorruptShare(share.index)),
            None => {}
        }

        self.audit.append(
            EventKind::ShareSubmitted,
            trustee,
            json!({
                "election": self.id.to_string(),
                "index": share.index,
            }),
        )?;
        inner.shares.insert(share.index, share);

        debug!(election = %self.id, received = inner.shares.len(), "trustee share accepted");
        Ok(inner.shares.len())
    }

    /// Rebuild the key from the submitted shares and decrypt each lane once.
    pub fn finalize_tally(&self, actor: &Actor) -> Result<TallyResult, Error> {
        let mut inner = self.lock();
        expect_state(inner.state, ElectionState::Tallying)?;

        if inner.shares.len() < self.threshold {
            return Err(Error::ReconstructionIncomplete {
                need: self.threshold,
                found: inner.shares.len(),
            });
        }

        let aggregates = match &inner.aggregates {
            Some(aggregates) => aggregates,
            None => {
                return Err(Error::InvalidState {
                    expected: ElectionState::Tallying,
                    found: inner.state,
                })
            }
        };

        let shares: Vec<Share> = inner.shares.values().cloned().collect();
        let counts = {
            let private = KeyCeremony::recover_private_key(&self.public_key, &shares, self.threshold)?;
            decrypt_lanes(&private, aggregates)?
        };

        let ballots_cast = inner.ballots.len() as u64;
        self.audit.append(
            EventKind::TallyComputed,
            actor,
            json!({
                "election": self.id.to_string(),
                "ballots": ballots_cast,
                "counts": counts,
            }),
        )?;
        inner.state = ElectionState::Tallied;

        let chain = self.audit.verify();
        info!(election = %self.id, ballots_cast, %chain, "tally computed");

        Ok(TallyResult {
            election: self.id,
            counts,
            ballots_cast,
            chain,
        })
    }
}

fn expect_state(found: ElectionState, expected: ElectionState) -> Result<(), Error> {
    if found != expected {
        return Err(Error::InvalidState { expected, found });
    }
    Ok(())
}
