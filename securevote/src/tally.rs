use crate::*;
use indexmap::IndexMap;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Homomorphically sum every ballot lane.
///
/// Lanes are independent and reduced in parallel. A lane with no ballots is a
/// fresh encryption of zero.
pub fn aggregate_lanes(
    public: &PublicKey,
    candidates: &[String],
    ballots: &[EncryptedBallot],
) -> Result<IndexMap<String, Ciphertext>, Error> {
    let sums = candidates
        .par_iter()
        .map(|candidate| -> Result<(String, Ciphertext), Error> {
            let lane = ballots
                .iter()
                .map(|ballot| {
                    ballot
                        .get(candidate)
                        .cloned()
                        .ok_or_else(|| Error::UnknownCandidate(candidate.clone()))
                })
                .collect::<Result<Vec<Ciphertext>, Error>>()?;

            let sum = if lane.is_empty() {
                public.encrypt_u64(0)?
            } else {
                combine_all(&lane)?
            };
            Ok((candidate.clone(), sum))
        })
        .collect::<Result<Vec<(String, Ciphertext)>, Error>>()?;

    Ok(sums.into_iter().collect())
}

/// Decrypt each lane aggregate exactly once.
pub fn decrypt_lanes(
    private: &PrivateKey,
    aggregates: &IndexMap<String, Ciphertext>,
) -> Result<IndexMap<String, u64>, Error> {
    let mut counts = IndexMap::with_capacity(aggregates.len());
    for (candidate, sum) in aggregates {
        counts.insert(candidate.clone(), private.decrypt_u64(sum)?);
    }
    Ok(counts)
}

/// Final result of an election.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct TallyResult {
    pub election: Uuid,

    /// Votes per candidate, in ballot order
    pub counts: IndexMap<String, u64>,

    pub ballots_cast: u64,

    /// Audit chain status at the moment the tally was computed
    pub chain: ChainStatus,
}

impl TallyResult {
    pub fn total_votes(&self) -> u64 {
        self.counts.values().sum()
    }

    /// Percentage of all votes that went to `candidate`.
    pub fn share_of(&self, candidate: &str) -> Option<f64> {
        let count = *self.counts.get(candidate)?;
        match self.total_votes() {
            0 => Some(0.0),
            total => Some(count as f64 * 100.0 / total as f64),
        }
    }

    /// Percentage of `eligible` voters who cast a ballot.
    pub fn turnout(&self, eligible: u64) -> Option<f64> {
        if eligible == 0 {
            return None;
        }
        Some(self.ballots_cast as f64 * 100.0 / eligible as f64)
    }

    /// Candidates with the highest count. More than one on a tie.
    pub fn leaders(&self) -> Vec<&str> {
        let max = match self.counts.values().max() {
            Some(max) => *max,
            None => return Vec::new(),
        };
        self.counts
            .iter()
            .filter(|(_, count)| **count == max)
            .map(|(candidate, _)| candidate.as_str())
            .collect()
    }
}
