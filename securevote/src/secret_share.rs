use crate::*;
use digest::Digest;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use sharks::Sharks;
use std::collections::BTreeMap;
use std::convert::TryFrom;
use tracing::{debug, info};
use uuid::Uuid;

const SHARE_TAG_DOMAIN: &[u8] = b"securevote/share/v1";

/// Sharks works over GF(256), so x-coordinates are 1..=255.
pub const MAX_SHARES: usize = 255;

/// One trustee's fragment of a split secret.
///
/// The tag binds the fragment to its split (`split_id`), its position and the
/// split parameters, so a damaged or foreign share is rejected instead of
/// silently interpolating to the wrong secret.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Share {
    pub index: u8,
    pub threshold: u8,
    pub total: u8,
    pub split_id: Uuid,

    #[serde(with = "hex_serde")]
    pub value: Vec<u8>,

    #[serde(with = "Digest32Hex")]
    pub tag: [u8; 32],
}

impl Share {
    fn compute_tag(split_id: &Uuid, index: u8, threshold: u8, total: u8, value: &[u8]) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(SHARE_TAG_DOMAIN);
        hasher.update(split_id.as_bytes());
        hasher.update([index, threshold, total]);
        hasher.update(value);

        let mut tag = [0u8; 32];
        tag.copy_from_slice(&hasher.finalize());
        tag
    }

    /// Check the share's tag and basic shape.
    pub fn verify(&self) -> Result<(), Error> {
        if self.index == 0
            || self.index > self.total
            || self.threshold == 0
            || self.threshold > self.total
            || self.value.is_empty()
        {
            return Err(Error::CorruptShare(self.index));
        }

        let expected = Share::compute_tag(
            &self.split_id,
            self.index,
            self.threshold,
            self.total,
            &self.value,
        );
        if expected != self.tag {
            return Err(Error::CorruptShare(self.index));
        }
        Ok(())
    }

    /// Whether two shares were dealt by the same split.
    pub fn same_split(&self, other: &Share) -> bool {
        self.split_id == other.split_id
            && self.threshold == other.threshold
            && self.total == other.total
            && self.value.len() == other.value.len()
    }

    fn to_sharks(&self) -> Result<sharks::Share, Error> {
        let mut bytes = Vec::with_capacity(self.value.len() + 1);
        bytes.push(self.index);
        bytes.extend_from_slice(&self.value);
        sharks::Share::try_from(bytes.as_slice()).map_err(|_| Error::CorruptShare(self.index))
    }
}

/// Check a share count / threshold pair: `1 <= threshold <= num_shares <= 255`.
pub fn check_parameters(num_shares: usize, threshold: usize) -> Result<(), Error> {
    if threshold < 1 {
        return Err(Error::InvalidParameter("threshold must be at least 1".to_owned()));
    }
    if threshold > num_shares {
        return Err(Error::InvalidParameter(format!(
            "threshold {} exceeds number of shares {}",
            threshold, num_shares
        )));
    }
    if num_shares > MAX_SHARES {
        return Err(Error::InvalidParameter(format!(
            "at most {} shares are supported, got {}",
            MAX_SHARES, num_shares
        )));
    }
    Ok(())
}

/// Split `secret` into `num_shares` shares, any `threshold` of which recover it.
///
/// Uses Shamir secret sharing over GF(256): fewer than `threshold` shares are
/// consistent with every possible secret of the same length.
pub fn split(secret: &[u8], num_shares: usize, threshold: usize) -> Result<Vec<Share>, Error> {
    check_parameters(num_shares, threshold)?;
    if secret.is_empty() {
        return Err(Error::InvalidParameter("cannot split an empty secret".to_owned()));
    }

    // Both fit in a u8, checked above
    let (total, threshold) = (num_shares as u8, threshold as u8);
    let split_id = Uuid::new_v4();
    let sharks = Sharks(threshold);
    let dealer = sharks.dealer(secret);

    let shares: Vec<Share> = dealer
        .take(num_shares)
        .map(|s| {
            let bytes = Vec::from(&s);
            let (index, value) = (bytes[0], bytes[1..].to_vec());
            Share {
                index,
                threshold,
                total,
                split_id,
                tag: Share::compute_tag(&split_id, index, threshold, total, &value),
                value,
            }
        })
        .collect();

    debug!(%split_id, total, threshold, "dealt secret shares");
    Ok(shares)
}

/// Recover the secret from at least `threshold` shares of one split.
pub fn reconstruct(shares: &[Share], threshold: usize) -> Result<Vec<u8>, Error> {
    if threshold < 1 || threshold > MAX_SHARES {
        return Err(Error::InvalidParameter(format!("invalid threshold {}", threshold)));
    }

    let reference = match shares.first() {
        Some(share) => share,
        None => {
            return Err(Error::InsufficientShares {
                need: threshold,
                found: 0,
            })
        }
    };

    let mut distinct: BTreeMap<u8, &Share> = BTreeMap::new();
    for share in shares {
        share.verify()?;
        if !share.same_split(reference) {
            return Err(Error::CorruptShare(share.index));
        }
        if let Some(existing) = distinct.insert(share.index, share) {
            if existing != share {
                return Err(Error::CorruptShare(share.index));
            }
        }
    }

    if reference.threshold as usize != threshold {
        return Err(Error::InvalidParameter(format!(
            "shares were dealt with threshold {}, not {}",
            reference.threshold, threshold
        )));
    }

    if distinct.len() < threshold {
        return Err(Error::InsufficientShares {
            need: threshold,
            found: distinct.len(),
        });
    }

    let points = distinct
        .values()
        .map(|s| s.to_sharks())
        .collect::<Result<Vec<_>, _>>()?;

    let sharks = Sharks(threshold as u8);
    sharks
        .recover(&points)
        .map_err(|_| Error::InsufficientShares {
            need: threshold,
            found: distinct.len(),
        })
}

/// Key ceremony: generate the election keypair and deal its private half to
/// the trustees.
///
/// The private key only exists inside `run`; callers get the public key and
/// the shares to distribute.
#[derive(Debug, Clone)]
pub struct KeyCeremony {
    pub trustees: usize,
    pub threshold: usize,
    pub generator: KeyGenerator,
}

impl KeyCeremony {
    pub fn new(trustees: usize, threshold: usize, generator: KeyGenerator) -> Self {
        KeyCeremony {
            trustees,
            threshold,
            generator,
        }
    }

    pub fn from_config(config: &CoreConfig) -> Self {
        KeyCeremony::new(
            config.trustees,
            config.threshold,
            KeyGenerator::from_config(config),
        )
    }

    pub fn run(&self) -> Result<(PublicKey, Vec<Share>), Error> {
        check_parameters(self.trustees, self.threshold)?;

        let (public, private) = self.generator.generate()?;
        let secret = private.to_secret_bytes()?;
        let shares = split(&secret, self.trustees, self.threshold)?;

        info!(
            key = %public.id(),
            trustees = self.trustees,
            threshold = self.threshold,
            "key ceremony complete"
        );
        Ok((public, shares))
    }

    /// Rebuild the private key paired with `public` from trustee shares.
    pub fn recover_private_key(
        public: &PublicKey,
        shares: &[Share],
        threshold: usize,
    ) -> Result<PrivateKey, Error> {
        let secret = reconstruct(shares, threshold)?;
        PrivateKey::from_secret_bytes(public, &secret)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::seq::SliceRandom;
    use rand::RngCore;

    fn secret_64() -> Vec<u8> {
        let mut secret = vec![0u8; 64];
        rand::thread_rng().fill_bytes(&mut secret);
        secret
    }

    fn pick(shares: &[Share], indexes: &[u8]) -> Vec<Share> {
        shares
            .iter()
            .filter(|s| indexes.contains(&s.index))
            .cloned()
            .collect()
    }

    #[test]
    fn three_of_five_any_subset() {
        let secret = secret_64();
        let shares = split(&secret, 5, 3).unwrap();
        assert_eq!(shares.len(), 5);
        let indexes: Vec<u8> = shares.iter().map(|s| s.index).collect();
        assert_eq!(indexes, vec![1, 2, 3, 4, 5]);

        assert_eq!(reconstruct(&pick(&shares, &[1, 3, 5]), 3).unwrap(), secret);
        assert_eq!(reconstruct(&pick(&shares, &[2, 4, 5]), 3).unwrap(), secret);
        assert_eq!(reconstruct(&shares, 3).unwrap(), secret);
    }

    #[test]
    fn threshold_of_one_and_all() {
        let secret = b"trustee quorum".to_vec();
        let shares = split(&secret, 3, 1).unwrap();
        for share in &shares {
            assert_eq!(reconstruct(&[share.clone()], 1).unwrap(), secret);
        }

        let shares = split(&secret, 4, 4).unwrap();
        assert_eq!(reconstruct(&shares, 4).unwrap(), secret);
        assert!(matches!(
            reconstruct(&shares[..3], 4),
            Err(Error::InsufficientShares { need: 4, found: 3 })
        ));
    }

    #[test]
    fn bad_parameters() {
        let secret = secret_64();
        assert!(matches!(split(&secret, 3, 4), Err(Error::InvalidParameter(_))));
        assert!(matches!(split(&secret, 3, 0), Err(Error::InvalidParameter(_))));
        assert!(matches!(split(&secret, 256, 2), Err(Error::InvalidParameter(_))));
        assert!(matches!(split(&[], 3, 2), Err(Error::InvalidParameter(_))));
        assert!(split(&secret, 255, 200).is_ok());

        let shares = split(&secret, 5, 3).unwrap();
        assert!(matches!(reconstruct(&shares, 0), Err(Error::InvalidParameter(_))));
        assert!(matches!(reconstruct(&shares, 2), Err(Error::InvalidParameter(_))));
    }

    #[test]
    fn too_few_shares() {
        let secret = secret_64();
        let shares = split(&secret, 5, 3).unwrap();
        assert!(matches!(
            reconstruct(&pick(&shares, &[2, 4]), 3),
            Err(Error::InsufficientShares { need: 3, found: 2 })
        ));
        assert!(matches!(
            reconstruct(&[], 3),
            Err(Error::InsufficientShares { need: 3, found: 0 })
        ));

        // A repeated share is not a new share
        let repeated = vec![shares[0].clone(), shares[0].clone(), shares[1].clone()];
        assert!(matches!(
            reconstruct(&repeated, 3),
            Err(Error::InsufficientShares { need: 3, found: 2 })
        ));
    }

    #[test]
    fn corrupt_shares_are_detected() {
        let secret = secret_64();
        let shares = split(&secret, 5, 3).unwrap();

        let mut tampered = pick(&shares, &[1, 2, 3]);
        tampered[1].value[7] ^= 0x01;
        assert!(matches!(reconstruct(&tampered, 3), Err(Error::CorruptShare(2))));

        let mut relabeled = pick(&shares, &[1, 2, 3]);
        relabeled[2].index = 4;
        assert!(matches!(reconstruct(&relabeled, 3), Err(Error::CorruptShare(4))));

        // Same index, different split
        let other = split(&secret, 5, 3).unwrap();
        let mut mixed = pick(&shares, &[1, 2]);
        mixed.push(other[2].clone());
        assert!(matches!(reconstruct(&mixed, 3), Err(Error::CorruptShare(3))));
    }

    #[test]
    fn conflicting_duplicate_is_corrupt() {
        let secret = secret_64();
        let shares = split(&secret, 5, 3).unwrap();
        let mut forged = shares[0].clone();
        forged.value[0] ^= 0xff;
        forged.tag = Share::compute_tag(
            &forged.split_id,
            forged.index,
            forged.threshold,
            forged.total,
            &forged.value,
        );
        let set = vec![shares[0].clone(), forged, shares[1].clone(), shares[2].clone()];
        assert!(matches!(reconstruct(&set, 3), Err(Error::CorruptShare(1))));
    }

    #[test]
    fn fewer_than_threshold_reveals_nothing() {
        // Interpolating below the threshold yields a value unrelated to the
        // secret; over many trials it never lands on it.
        for _ in 0..100 {
            let secret = secret_64();
            let shares = split(&secret, 5, 3).unwrap();
            let points: Vec<sharks::Share> = shares[..2].iter().map(|s| s.to_sharks().unwrap()).collect();
            let guess = Sharks(2).recover(&points).unwrap();
            assert_ne!(guess, secret);
        }
    }

    fn chi_square(histogram: &[u64; 256]) -> f64 {
        let total: u64 = histogram.iter().sum();
        let expected = total as f64 / 256.0;
        histogram
            .iter()
            .map(|observed| (*observed as f64 - expected).powi(2) / expected)
            .sum()
    }

    #[test]
    fn sub_threshold_shares_look_alike_for_any_secret() {
        // T - 1 shares of all-zero and all-0xff secrets should both be
        // uniform bytes. With 255 degrees of freedom the statistic averages
        // 255 (sd ~23); 400 leaves a wide margin.
        for secret in [[0x00u8; 64], [0xffu8; 64]] {
            let mut histogram = [0u64; 256];
            for _ in 0..200 {
                let shares = split(&secret, 5, 3).unwrap();
                for share in &shares[..2] {
                    for byte in &share.value {
                        histogram[*byte as usize] += 1;
                    }
                }
            }
            let statistic = chi_square(&histogram);
            assert!(statistic < 400.0, "chi-square {} for secret {:02x}", statistic, secret[0]);
        }
    }

    #[test]
    fn share_json_roundtrip() {
        let shares = split(b"abc", 2, 2).unwrap();
        let json = serde_json::to_string(&shares[0]).unwrap();
        let restored: Share = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, shares[0]);
        restored.verify().unwrap();
    }

    #[test]
    fn ceremony_recovers_working_key() {
        let ceremony = KeyCeremony::new(5, 3, KeyGenerator::new(256));
        let (public, shares) = ceremony.run().unwrap();
        let private =
            KeyCeremony::recover_private_key(&public, &pick(&shares, &[2, 3, 5]), 3).unwrap();
        let c = public.encrypt_u64(11).unwrap();
        assert_eq!(private.decrypt_u64(&c).unwrap(), 11);

        let bad = KeyCeremony::new(2, 3, KeyGenerator::new(256));
        assert!(matches!(bad.run(), Err(Error::InvalidParameter(_))));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn any_threshold_subset_reconstructs(
            secret in prop::collection::vec(any::<u8>(), 1..80),
            n in 1usize..12,
            t_seed in any::<usize>(),
            extra in any::<usize>(),
        ) {
            let t = t_seed % n + 1;
            let shares = split(&secret, n, t).unwrap();
            let mut rng = rand::thread_rng();
            let take = t + extra % (n - t + 1);
            let subset: Vec<Share> = shares.choose_multiple(&mut rng, take).cloned().collect();
            prop_assert_eq!(reconstruct(&subset, t).unwrap(), secret.clone());

            if t > 1 {
                let below: Vec<Share> = shares.choose_multiple(&mut rng, t - 1).cloned().collect();
                prop_assert!(reconstruct(&below, t).is_err());
            }
        }
    }
}
