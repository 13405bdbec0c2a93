//! Additively homomorphic Paillier encryption.
//!
//! Ballots are small non-negative integers encrypted under the election's
//! single public key. Multiplying ciphertexts modulo `n^2` adds the underlying
//! plaintexts, which is all the tally needs.
//!
//! A ciphertext is an encoded number: a `(value, exponent)` pair whose
//! plaintext is `mantissa * ENCODING_BASE^exponent`. Integers are encrypted
//! with exponent `0`; ciphertexts with different exponents are aligned before
//! they are combined.

use crate::*;
use digest::Digest;
use num_bigint::BigUint;
use num_integer::Integer;
use num_traits::{One, ToPrimitive, Zero};
use rand::{CryptoRng, Rng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

/// Base of the encoded-number exponent.
pub const ENCODING_BASE: u32 = 16;

/// Largest exponent accepted for an encoded number. Exponent alignment costs a
/// scalar multiplication by `ENCODING_BASE^diff`, so this bounds that work.
pub const MAX_EXPONENT: u32 = 32;

/// Version tag written into every serialized key and ciphertext.
pub const WIRE_VERSION: u8 = 1;

const KEY_ID_DOMAIN: &[u8] = b"securevote/paillier/v1";

/// Smallest modulus we agree to generate.
pub const MIN_KEY_BITS: u64 = 64;

/// Fingerprint of a public key: SHA-256 over the modulus.
///
/// Every ciphertext carries the fingerprint of the key it was produced under,
/// which is how key/ciphertext mismatches are detected before any arithmetic.
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct KeyId(pub [u8; 32]);

impl KeyId {
    fn of(n: &BigUint) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(KEY_ID_DOMAIN);
        hasher.update(n.to_bytes_be());
        let mut id = [0u8; 32];
        id.copy_from_slice(&hasher.finalize());
        KeyId(id)
    }

    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let mut id = [0u8; 32];
        if bytes.len() != id.len() {
            return None;
        }
        id.copy_from_slice(bytes);
        Some(KeyId(id))
    }
}

impl fmt::Display for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "KeyId({})", &hex::encode(self.0)[..16])
    }
}

struct PublicKeyInner {
    n: BigUint,
    n_squared: BigUint,
    g: BigUint,
    id: KeyId,
}

/// Paillier public key: the modulus `n` and the derived generator `g = n + 1`.
///
/// Cloning is cheap; all clones share one immutable key.
#[derive(Clone, Serialize, Deserialize)]
#[serde(try_from = "PublicKeyWire", into = "PublicKeyWire")]
pub struct PublicKey {
    inner: Arc<PublicKeyInner>,
}

#[derive(Serialize, Deserialize)]
struct PublicKeyWire {
    version: u8,
    #[serde(with = "BigUintHex")]
    n: BigUint,
}

impl PublicKey {
    /// Build a public key from a modulus.
    pub fn from_modulus(n: BigUint) -> Result<Self, Error> {
        if n.bits() < MIN_KEY_BITS || n.is_even() {
            return Err(Error::InvalidParameter(format!(
                "modulus must be odd and at least {} bits",
                MIN_KEY_BITS
            )));
        }
        let n_squared = &n * &n;
        let g = &n + 1u32;
        let id = KeyId::of(&n);

        Ok(PublicKey {
            inner: Arc::new(PublicKeyInner {
                n,
                n_squared,
                g,
                id,
            }),
        })
    }

    pub fn n(&self) -> &BigUint {
        &self.inner.n
    }

    pub fn n_squared(&self) -> &BigUint {
        &self.inner.n_squared
    }

    pub fn g(&self) -> &BigUint {
        &self.inner.g
    }

    pub fn id(&self) -> KeyId {
        self.inner.id
    }

    /// Size of the modulus in bits
    pub fn bits(&self) -> u64 {
        self.inner.n.bits()
    }

    /// Encrypt an integer in `[0, n)` with fresh OS randomness.
    pub fn encrypt(&self, plaintext: &BigUint) -> Result<Ciphertext, Error> {
        self.encrypt_with_rng(&mut rand::rngs::OsRng, plaintext, 0)
    }

    pub fn encrypt_u64(&self, plaintext: u64) -> Result<Ciphertext, Error> {
        self.encrypt(&BigUint::from(plaintext))
    }

    /// Encrypt the encoded number `mantissa * ENCODING_BASE^exponent`.
    pub fn encrypt_encoded(&self, mantissa: &BigUint, exponent: u32) -> Result<Ciphertext, Error> {
        self.encrypt_with_rng(&mut rand::rngs::OsRng, mantissa, exponent)
    }

    pub fn encrypt_with_rng<R: Rng + CryptoRng>(
        &self,
        rng: &mut R,
        mantissa: &BigUint,
        exponent: u32,
    ) -> Result<Ciphertext, Error> {
        check_exponent(exponent)?;
        let n = self.n();
        if mantissa >= n {
            return Err(Error::Domain(format!(
                "plaintext must be below the {}-bit modulus",
                self.bits()
            )));
        }

        // g^m = (1 + n)^m = 1 + m*n (mod n^2)
        let n_squared = self.n_squared();
        let gm = (mantissa * n + 1u32) % n_squared;
        let r = bigint::random_unit(rng, n);
        let value = gm * r.modpow(n, n_squared) % n_squared;

        Ok(Ciphertext {
            key: self.clone(),
            value,
            exponent,
        })
    }

    /// Whether a tally of `total` stays below the modulus.
    pub fn can_hold(&self, total: u64) -> bool {
        BigUint::from(total) < *self.n()
    }
}

impl PartialEq for PublicKey {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner) || self.inner.id == other.inner.id
    }
}

impl Eq for PublicKey {}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("PublicKey")
            .field("bits", &self.bits())
            .field("id", &self.id())
            .finish()
    }
}

impl TryFrom<PublicKeyWire> for PublicKey {
    type Error = Error;

    fn try_from(wire: PublicKeyWire) -> Result<Self, Self::Error> {
        if wire.version != WIRE_VERSION {
            return Err(Error::UnsupportedVersion(wire.version));
        }
        PublicKey::from_modulus(wire.n)
    }
}

impl From<PublicKey> for PublicKeyWire {
    fn from(key: PublicKey) -> Self {
        PublicKeyWire {
            version: WIRE_VERSION,
            n: key.n().clone(),
        }
    }
}

/// Paillier private key: the two prime factors of `n` and the values derived
/// from them.
///
/// It is never serialized on its own; `to_secret_bytes` exists only to feed
/// the threshold ceremony.
pub struct PrivateKey {
    public: PublicKey,
    p: BigUint,
    q: BigUint,
    lambda: BigUint,
    mu: BigUint,
}

#[derive(Serialize, Deserialize)]
struct PrivateKeyWire {
    version: u8,
    #[serde(with = "BigUintHex")]
    p: BigUint,
    #[serde(with = "BigUintHex")]
    q: BigUint,
}

impl PrivateKey {
    /// Pair the primes `p` and `q` with `public`.
    ///
    /// Fails with `KeyMismatch` unless `p * q` is exactly the public modulus.
    pub fn from_primes(public: &PublicKey, p: BigUint, q: BigUint) -> Result<Self, Error> {
        if p == q || &p * &q != *public.n() {
            return Err(Error::KeyMismatch);
        }

        let n = public.n();
        let lambda = bigint::lcm(&(&p - 1u32), &(&q - 1u32));
        let u = public.g().modpow(&lambda, public.n_squared());
        let mu = bigint::mod_inverse(&bigint::l_function(&u, n), n).ok_or(Error::KeyMismatch)?;

        Ok(PrivateKey {
            public: public.clone(),
            p,
            q,
            lambda,
            mu,
        })
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public
    }

    /// Secret material handed to the threshold ceremony.
    pub fn to_secret_bytes(&self) -> Result<Vec<u8>, Error> {
        let wire = PrivateKeyWire {
            version: WIRE_VERSION,
            p: self.p.clone(),
            q: self.q.clone(),
        };
        Ok(serde_cbor::to_vec(&wire)?)
    }

    /// Rebuild the private key paired with `public` from ceremony output.
    pub fn from_secret_bytes(public: &PublicKey, bytes: &[u8]) -> Result<Self, Error> {
        let wire: PrivateKeyWire = serde_cbor::from_slice(bytes).map_err(|_| Error::KeyMismatch)?;
        if wire.version != WIRE_VERSION {
            return Err(Error::UnsupportedVersion(wire.version));
        }
        PrivateKey::from_primes(public, wire.p, wire.q)
    }

    pub fn decrypt(&self, ciphertext: &Ciphertext) -> Result<BigUint, Error> {
        ciphertext.check_key(&self.public)?;

        let n = self.public.n();
        let u = ciphertext.value.modpow(&self.lambda, self.public.n_squared());
        let mantissa = bigint::l_function(&u, n) * &self.mu % n;

        if ciphertext.exponent == 0 {
            Ok(mantissa)
        } else {
            Ok(mantissa * BigUint::from(ENCODING_BASE).pow(ciphertext.exponent))
        }
    }

    /// Decrypt a value expected to fit in a `u64`, such as a tally.
    pub fn decrypt_u64(&self, ciphertext: &Ciphertext) -> Result<u64, Error> {
        let value = self.decrypt(ciphertext)?;
        value
            .to_u64()
            .ok_or_else(|| Error::Domain(format!("decrypted value has {} bits", value.bits())))
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("PrivateKey")
            .field("public", &self.public)
            .finish_non_exhaustive()
    }
}

/// Produces fresh, independent keypairs.
#[derive(Debug, Clone)]
pub struct KeyGenerator {
    pub bits: u64,
    pub miller_rabin_rounds: usize,
    pub prime_attempts: usize,
}

impl KeyGenerator {
    pub fn new(bits: u64) -> Self {
        KeyGenerator {
            bits,
            ..KeyGenerator::from_config(&CoreConfig::default())
        }
    }

    pub fn from_config(config: &CoreConfig) -> Self {
        KeyGenerator {
            bits: config.key_bits,
            miller_rabin_rounds: config.miller_rabin_rounds,
            prime_attempts: config.prime_attempts,
        }
    }

    pub fn generate(&self) -> Result<(PublicKey, PrivateKey), Error> {
        self.generate_with_rng(&mut rand::rngs::OsRng)
    }

    pub fn generate_with_rng<R: Rng + CryptoRng>(
        &self,
        rng: &mut R,
    ) -> Result<(PublicKey, PrivateKey), Error> {
        if self.bits < MIN_KEY_BITS || self.bits % 2 != 0 {
            return Err(Error::InvalidParameter(format!(
                "key size must be even and at least {} bits, got {}",
                MIN_KEY_BITS, self.bits
            )));
        }

        let prime_bits = self.bits / 2;
        let p = bigint::generate_prime(rng, prime_bits, self.miller_rabin_rounds, self.prime_attempts)?;
        let mut q =
            bigint::generate_prime(rng, prime_bits, self.miller_rabin_rounds, self.prime_attempts)?;
        if p == q {
            debug!("prime collision, searching again");
            q = bigint::generate_prime(rng, prime_bits, self.miller_rabin_rounds, self.prime_attempts)?;
            if p == q {
                return Err(Error::KeyGeneration {
                    bits: prime_bits,
                    attempts: self.prime_attempts,
                });
            }
        }

        let public = PublicKey::from_modulus(&p * &q)?;
        let private = PrivateKey::from_primes(&public, p, q)?;
        info!(bits = self.bits, key = %public.id(), "generated paillier keypair");

        Ok((public, private))
    }
}

/// Generate a fresh keypair with a `bits`-bit modulus.
pub fn generate_keypair(bits: u64) -> Result<(PublicKey, PrivateKey), Error> {
    KeyGenerator::new(bits).generate()
}

/// Encrypt `plaintext` under `public`.
pub fn encrypt(public: &PublicKey, plaintext: &BigUint) -> Result<Ciphertext, Error> {
    public.encrypt(plaintext)
}

/// Decrypt `ciphertext` with `private`.
pub fn decrypt(private: &PrivateKey, ciphertext: &Ciphertext) -> Result<BigUint, Error> {
    private.decrypt(ciphertext)
}

/// Homomorphic sum of two ciphertexts under the same key.
pub fn combine(a: &Ciphertext, b: &Ciphertext) -> Result<Ciphertext, Error> {
    a.combine(b)
}

/// Homomorphic sum of many ciphertexts, reduced in parallel.
pub fn combine_all(ciphertexts: &[Ciphertext]) -> Result<Ciphertext, Error> {
    ciphertexts
        .par_iter()
        .cloned()
        .map(Ok::<Ciphertext, Error>)
        .try_reduce_with(|a, b| a.combine(&b))
        .unwrap_or_else(|| {
            Err(Error::InvalidParameter(
                "cannot combine an empty set of ciphertexts".to_owned(),
            ))
        })
}

fn check_exponent(exponent: u32) -> Result<(), Error> {
    if exponent > MAX_EXPONENT {
        return Err(Error::Domain(format!(
            "exponent {} exceeds the maximum of {}",
            exponent, MAX_EXPONENT
        )));
    }
    Ok(())
}

/// An encrypted encoded number bound to one public key.
#[derive(Clone)]
pub struct Ciphertext {
    key: PublicKey,
    value: BigUint,
    exponent: u32,
}

#[derive(Serialize, Deserialize)]
struct CiphertextWire {
    version: u8,
    #[serde(with = "KeyIdHex")]
    key: KeyId,
    #[serde(with = "BigUintHex")]
    value: BigUint,
    exponent: u32,
}

impl Ciphertext {
    pub fn value(&self) -> &BigUint {
        &self.value
    }

    pub fn exponent(&self) -> u32 {
        self.exponent
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.key
    }

    pub fn key_id(&self) -> KeyId {
        self.key.id()
    }

    /// Validate that this ciphertext belongs to `key`.
    ///
    /// A Paillier ciphertext is a unit modulo `n^2`; anything else was not
    /// produced under this key.
    pub fn check_key(&self, key: &PublicKey) -> Result<(), Error> {
        if self.key != *key {
            return Err(Error::KeyMismatch);
        }
        if self.value.is_zero() || self.value >= *key.n_squared() || !self.value.gcd(key.n()).is_one() {
            return Err(Error::KeyMismatch);
        }
        Ok(())
    }

    /// Homomorphic addition: decrypts to the sum of both plaintexts.
    pub fn combine(&self, other: &Ciphertext) -> Result<Ciphertext, Error> {
        if self.key != other.key {
            return Err(Error::KeyMismatch);
        }

        let (a, b) = match self.exponent.cmp(&other.exponent) {
            std::cmp::Ordering::Equal => (self.clone(), other.clone()),
            std::cmp::Ordering::Greater => (self.lower_exponent(other.exponent), other.clone()),
            std::cmp::Ordering::Less => (self.clone(), other.lower_exponent(self.exponent)),
        };

        let value = a.value * &b.value % self.key.n_squared();
        Ok(Ciphertext {
            key: self.key.clone(),
            value,
            exponent: a.exponent,
        })
    }

    /// Homomorphic multiplication by a plaintext scalar.
    pub fn scale(&self, factor: &BigUint) -> Ciphertext {
        Ciphertext {
            key: self.key.clone(),
            value: self.value.modpow(factor, self.key.n_squared()),
            exponent: self.exponent,
        }
    }

    // Same plaintext, represented with a smaller exponent
    fn lower_exponent(&self, exponent: u32) -> Ciphertext {
        debug_assert!(exponent <= self.exponent);
        let factor = BigUint::from(ENCODING_BASE).pow(self.exponent - exponent);
        let mut scaled = self.scale(&factor);
        scaled.exponent = exponent;
        scaled
    }

    /// Pack into bytes. Both the value and the exponent are written.
    pub fn to_bytes(&self) -> Result<Vec<u8>, Error> {
        let wire = CiphertextWire {
            version: WIRE_VERSION,
            key: self.key.id(),
            value: self.value.clone(),
            exponent: self.exponent,
        };
        Ok(serde_cbor::to_vec(&wire)?)
    }

    /// Unpack from bytes produced under `key`.
    pub fn from_bytes(key: &PublicKey, bytes: &[u8]) -> Result<Self, Error> {
        let wire: CiphertextWire = serde_cbor::from_slice(bytes)?;
        if wire.version != WIRE_VERSION {
            return Err(Error::UnsupportedVersion(wire.version));
        }
        if wire.key != key.id() {
            return Err(Error::KeyMismatch);
        }
        check_exponent(wire.exponent)?;

        let ciphertext = Ciphertext {
            key: key.clone(),
            value: wire.value,
            exponent: wire.exponent,
        };
        ciphertext.check_key(key)?;
        Ok(ciphertext)
    }
}

impl PartialEq for Ciphertext {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key && self.value == other.value && self.exponent == other.exponent
    }
}

impl Eq for Ciphertext {}

impl fmt::Debug for Ciphertext {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Ciphertext")
            .field("key", &self.key.id())
            .field("bits", &self.value.bits())
            .field("exponent", &self.exponent)
            .finish()
    }
}
