//! In-memory access-token cache
//!
//! Maps an account identifier to a previously obtained access token with an
//! expiry deadline. Lookups refuse to hand out a token once the current time
//! is within a buffer margin of expiry, so a token never expires mid-use.
//! There is no background sweep: stale entries linger until the next `get`
//! for their key.

pub mod token_cache;

pub use token_cache::{TokenCache, DEFAULT_TOKEN_BUFFER_SECONDS};
