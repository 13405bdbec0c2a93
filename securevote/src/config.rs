use crate::*;
use figment::{
    providers::{Env, Format, Serialized, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Prefix for environment overrides, e.g. `SECUREVOTE_KEY_BITS=3072`.
pub const ENV_PREFIX: &str = "SECUREVOTE_";

/// Tunables for key generation and the key ceremony.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// Paillier modulus size in bits
    pub key_bits: u64,

    /// Candidates tried per prime before giving up
    pub prime_attempts: usize,

    pub miller_rabin_rounds: usize,

    /// Trustees receiving a share of the election key
    pub trustees: usize,

    /// Shares needed to rebuild the election key
    pub threshold: usize,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            key_bits: 2048,
            prime_attempts: 10_000,
            miller_rabin_rounds: 40,
            trustees: 5,
            threshold: 3,
        }
    }
}

impl CoreConfig {
    /// Load defaults, then the YAML file at `path` (if any), then
    /// `SECUREVOTE_*` environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self, Error> {
        let mut figment = Figment::from(Serialized::defaults(CoreConfig::default()));
        if let Some(path) = path {
            figment = figment.merge(Yaml::file(path));
        }
        let config: CoreConfig = figment.merge(Env::prefixed(ENV_PREFIX)).extract()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.key_bits < MIN_KEY_BITS || self.key_bits % 2 != 0 {
            return Err(Error::InvalidParameter(format!(
                "key_bits must be an even number of at least {}, got {}",
                MIN_KEY_BITS, self.key_bits
            )));
        }
        if self.prime_attempts == 0 || self.miller_rabin_rounds == 0 {
            return Err(Error::InvalidParameter(
                "prime_attempts and miller_rabin_rounds must be positive".to_owned(),
            ));
        }
        check_parameters(self.trustees, self.threshold)
    }
}
