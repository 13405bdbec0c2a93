//! Integrity core for online elections: an additively homomorphic tally, a
//! threshold key ceremony for the election key, and a hash-chained audit log.

mod audit;
pub mod bigint;
mod ballot;
mod config;
mod election;
mod error;
mod paillier;
mod secret_share;
mod serde_hex;
mod store;
mod tally;

pub use audit::*;
pub use ballot::*;
pub use config::*;
pub use election::*;
pub use error::*;
pub use paillier::*;
pub use secret_share::*;
pub use serde_hex::*;
pub use store::*;
pub use tally::*;
