//! Handshake verification and permission checks
//!
//! The broker holds the same project keys its clients use:
//! - `R` keys allow subscribing
//! - `W` keys allow publishing
//! - `A` keys allow both

mod keyring;

pub use keyring::{AuthError, KeyRing, Principal, MAX_CLOCK_SKEW};
