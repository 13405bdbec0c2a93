use crate::*;
use digest::Digest;
use indexmap::IndexMap;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use uuid::Uuid;

const RECEIPT_DOMAIN: &[u8] = b"securevote/receipt/v1";

/// One voter's ballot: a ciphertext per candidate lane, in candidate order.
///
/// Each lane encrypts `1` for the chosen candidate and `0` for the others, so
/// summing a lane across ballots counts that candidate's votes.
#[derive(Clone, Debug, PartialEq)]
pub struct EncryptedBallot {
    lanes: IndexMap<String, Ciphertext>,
}

#[derive(Serialize, Deserialize)]
struct BallotWire {
    version: u8,
    lanes: IndexMap<String, Vec<u8>>,
}

impl EncryptedBallot {
    pub fn new(lanes: IndexMap<String, Ciphertext>) -> Self {
        EncryptedBallot { lanes }
    }

    /// Encrypt a single-choice ballot for `chosen` under the election key.
    pub fn encrypt_choice(
        public: &PublicKey,
        candidates: &[String],
        chosen: &str,
    ) -> Result<Self, Error> {
        if !candidates.iter().any(|c| c == chosen) {
            return Err(Error::UnknownCandidate(chosen.to_owned()));
        }

        let mut lanes = IndexMap::with_capacity(candidates.len());
        for candidate in candidates {
            let vote = if candidate == chosen { 1 } else { 0 };
            lanes.insert(candidate.clone(), public.encrypt_u64(vote)?);
        }
        Ok(EncryptedBallot { lanes })
    }

    pub fn lanes(&self) -> &IndexMap<String, Ciphertext> {
        &self.lanes
    }

    pub fn get(&self, candidate: &str) -> Option<&Ciphertext> {
        self.lanes.get(candidate)
    }

    /// Check that the lanes are exactly `candidates` and every lane is an
    /// integer (exponent 0) encrypted under `public`.
    pub fn validate(&self, public: &PublicKey, candidates: &[String]) -> Result<(), Error> {
        for candidate in candidates {
            if !self.lanes.contains_key(candidate) {
                return Err(Error::UnknownCandidate(candidate.clone()));
            }
        }
        for (candidate, ciphertext) in &self.lanes {
            if !candidates.contains(candidate) {
                return Err(Error::UnknownCandidate(candidate.clone()));
            }
            ciphertext.check_key(public)?;
            if ciphertext.exponent() != 0 {
                return Err(Error::Domain(format!(
                    "lane {} is not an integer encoding",
                    candidate
                )));
            }
        }
        Ok(())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, Error> {
        let mut lanes = IndexMap::with_capacity(self.lanes.len());
        for (candidate, ciphertext) in &self.lanes {
            lanes.insert(candidate.clone(), ciphertext.to_bytes()?);
        }
        let wire = BallotWire {
            version: WIRE_VERSION,
            lanes,
        };
        Ok(serde_cbor::to_vec(&wire)?)
    }

    pub fn from_bytes(public: &PublicKey, bytes: &[u8]) -> Result<Self, Error> {
        let wire: BallotWire = serde_cbor::from_slice(bytes)?;
        if wire.version != WIRE_VERSION {
            return Err(Error::UnsupportedVersion(wire.version));
        }
        let mut lanes = IndexMap::with_capacity(wire.lanes.len());
        for (candidate, bytes) in wire.lanes {
            lanes.insert(candidate, Ciphertext::from_bytes(public, &bytes)?);
        }
        Ok(EncryptedBallot { lanes })
    }
}

/// Anonymous receipt for a cast ballot.
///
/// A salted SHA-256 over the election, the voter and the ballot ciphertexts.
/// The salt is thrown away, so the receipt cannot be linked back to the voter
/// by recomputing it.
#[derive(Serialize, Deserialize, Copy, Clone, PartialEq, Eq, Hash)]
pub struct BallotReceipt(#[serde(with = "Digest32Hex")] pub [u8; 32]);

impl BallotReceipt {
    pub fn issue(election: &Uuid, voter: &Actor, ballot: &EncryptedBallot) -> Result<Self, Error> {
        let mut salt = [0u8; 16];
        rand::rngs::OsRng.fill_bytes(&mut salt);

        let mut hasher = Sha256::new();
        hasher.update(RECEIPT_DOMAIN);
        hasher.update(election.as_bytes());
        hasher.update(voter.id.as_bytes());
        hasher.update(salt);
        for ciphertext in ballot.lanes.values() {
            hasher.update(ciphertext.to_bytes()?);
        }

        let mut receipt = [0u8; 32];
        receipt.copy_from_slice(&hasher.finalize());
        Ok(BallotReceipt(receipt))
    }

    /// First 16 hex digits; this is what goes into the audit log.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..8])
    }
}

impl std::fmt::Display for BallotReceipt {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl std::fmt::Debug for BallotReceipt {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "BallotReceipt({})", self.short())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paillier::tests::TEST_KEYS;

    fn candidates() -> Vec<String> {
        vec!["alice".to_owned(), "bob".to_owned(), "carol".to_owned()]
    }

    #[test]
    fn choice_encrypts_one_hot() {
        let (public, private) = &*TEST_KEYS;
        let ballot = EncryptedBallot::encrypt_choice(public, &candidates(), "bob").unwrap();

        let decrypted: Vec<u64> = ballot
            .lanes()
            .values()
            .map(|c| private.decrypt_u64(c).unwrap())
            .collect();
        assert_eq!(decrypted, vec![0, 1, 0]);
        assert!(ballot.validate(public, &candidates()).is_ok());
    }

    #[test]
    fn unknown_choice_is_rejected() {
        let (public, _) = &*TEST_KEYS;
        assert!(matches!(
            EncryptedBallot::encrypt_choice(public, &candidates(), "mallory"),
            Err(Error::UnknownCandidate(name)) if name == "mallory"
        ));
    }

    #[test]
    fn validate_catches_missing_and_extra_lanes() {
        let (public, _) = &*TEST_KEYS;
        let ballot = EncryptedBallot::encrypt_choice(public, &candidates(), "alice").unwrap();

        let fewer = vec!["alice".to_owned(), "bob".to_owned()];
        assert!(matches!(
            ballot.validate(public, &fewer),
            Err(Error::UnknownCandidate(name)) if name == "carol"
        ));

        let more = vec![
            "alice".to_owned(),
            "bob".to_owned(),
            "carol".to_owned(),
            "dave".to_owned(),
        ];
        assert!(matches!(
            ballot.validate(public, &more),
            Err(Error::UnknownCandidate(name)) if name == "dave"
        ));
    }

    #[test]
    fn validate_rejects_encoded_lanes() {
        let (public, _) = &*TEST_KEYS;
        let mut lanes = IndexMap::new();
        lanes.insert("alice".to_owned(), public.encrypt_u64(1).unwrap());
        lanes.insert(
            "bob".to_owned(),
            public
                .encrypt_encoded(&num_bigint::BigUint::from(1u32), MAX_EXPONENT)
                .unwrap(),
        );
        lanes.insert("carol".to_owned(), public.encrypt_u64(0).unwrap());
        let ballot = EncryptedBallot::new(lanes);

        assert!(matches!(
            ballot.validate(public, &candidates()),
            Err(Error::Domain(_))
        ));
    }

    #[test]
    fn bytes_roundtrip() {
        let (public, _) = &*TEST_KEYS;
        let ballot = EncryptedBallot::encrypt_choice(public, &candidates(), "carol").unwrap();
        let bytes = ballot.to_bytes().unwrap();
        assert_eq!(EncryptedBallot::from_bytes(public, &bytes).unwrap(), ballot);
    }

    #[test]
    fn receipts_are_salted() {
        let (public, _) = &*TEST_KEYS;
        let election = Uuid::new_v4();
        let voter = Actor::voter("v-1");
        let ballot = EncryptedBallot::encrypt_choice(public, &candidates(), "alice").unwrap();

        let a = BallotReceipt::issue(&election, &voter, &ballot).unwrap();
        let b = BallotReceipt::issue(&election, &voter, &ballot).unwrap();
        assert_ne!(a, b);
        assert_eq!(a.short().len(), 16);
        assert!(a.to_string().starts_with(&a.short()));
    }
}
