//! Arbitrary-precision helpers shared by the Paillier cipher.
//!
//! Everything here works on `num_bigint::BigUint`. Randomness is always taken
//! from the caller so key material can come from `OsRng` while tests may use a
//! seeded generator.

use crate::*;
use num_bigint::{BigUint, RandBigInt};
use num_integer::Integer;
use num_traits::{One, Zero};
use rand::{CryptoRng, Rng};
use tracing::debug;

/// Odd primes below 256, used to discard most candidates before Miller-Rabin.
const SMALL_PRIMES: [u32; 53] = [
    3, 5, 7, 11, 13, 17, 19, 23, 29, 31, 37, 41, 43, 47, 53, 59, 61, 67, 71, 73, 79, 83, 89, 97,
    101, 103, 107, 109, 113, 127, 131, 137, 139, 149, 151, 157, 163, 167, 173, 179, 181, 191, 193,
    197, 199, 211, 223, 227, 229, 233, 239, 241, 251,
];

/// Uniformly random value in `[1, n)` that is coprime to `n`.
pub fn random_unit<R: Rng + CryptoRng>(rng: &mut R, n: &BigUint) -> BigUint {
    let one = BigUint::one();
    loop {
        let r = rng.gen_biguint_range(&one, n);
        if r.gcd(n).is_one() {
            return r;
        }
    }
}

/// Miller-Rabin probabilistic primality test with `rounds` random witnesses.
pub fn is_probable_prime<R: Rng + CryptoRng>(rng: &mut R, n: &BigUint, rounds: usize) -> bool {
    let two = BigUint::from(2u32);
    if *n < two {
        return false;
    }
    for p in SMALL_PRIMES.iter() {
        let p = BigUint::from(*p);
        if *n == p {
            return true;
        }
        if (n % &p).is_zero() {
            return false;
        }
    }
    if n.is_even() {
        return *n == two;
    }

    let n_minus_1 = n - 1u32;
    // n is odd and > 2, so n - 1 is even and non-zero
    let s = n_minus_1.trailing_zeros().unwrap_or(0);
    let d = &n_minus_1 >> s;

    'witness: for _ in 0..rounds {
        let a = rng.gen_biguint_range(&two, &n_minus_1);
        let mut x = a.modpow(&d, n);
        if x.is_one() || x == n_minus_1 {
            continue;
        }
        for _ in 1..s {
            x = x.modpow(&two, n);
            if x == n_minus_1 {
                continue 'witness;
            }
        }
        return false;
    }

    true
}

/// Search for a random prime of exactly `bits` bits with its two top bits set.
///
/// Setting both top bits guarantees the product of two such primes has exactly
/// `2 * bits` bits. Gives up with `KeyGeneration` after `max_attempts` candidates.
pub fn generate_prime<R: Rng + CryptoRng>(
    rng: &mut R,
    bits: u64,
    rounds: usize,
    max_attempts: usize,
) -> Result<BigUint, Error> {
    if bits < 8 {
        return Err(Error::InvalidParameter(format!(
            "prime size of {} bits is too small",
            bits
        )));
    }

    let top = (BigUint::one() << (bits - 1)) | (BigUint::one() << (bits - 2));
    for attempt in 1..=max_attempts {
        let candidate = rng.gen_biguint(bits) | &top | BigUint::one();
        if is_probable_prime(rng, &candidate, rounds) {
            debug!(bits, attempt, "found prime candidate");
            return Ok(candidate);
        }
    }

    Err(Error::KeyGeneration {
        bits,
        attempts: max_attempts,
    })
}

/// Multiplicative inverse of `a` modulo `m`, if it exists.
pub fn mod_inverse(a: &BigUint, m: &BigUint) -> Option<BigUint> {
    a.modinv(m)
}

/// Paillier's `L(x) = (x - 1) / n`.
pub fn l_function(x: &BigUint, n: &BigUint) -> BigUint {
    (x - 1u32) / n
}

/// Least common multiple.
pub fn lcm(a: &BigUint, b: &BigUint) -> BigUint {
    a.lcm(b)
}
