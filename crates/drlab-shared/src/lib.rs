//! # drlab-shared
//!
//! Types shared by every layer of the DrLab messaging core: opaque ids,
//! the realtime wire protocol, symmetric message crypto, and the key
//! wrapping/unlock primitives used for end-to-end encryption.

pub mod constants;
pub mod crypto;
pub mod error;
pub mod keys;
pub mod protocol;
pub mod types;

pub use error::{CryptoError, KeyError};
