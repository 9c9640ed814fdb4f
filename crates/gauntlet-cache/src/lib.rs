//! Gauntlet Result Cache
//!
//! Stores the outcome of each scenario run on disk so that re-running an
//! unchanged scenario under an unchanged configuration is free.
//!
//! # Core Concepts
//!
//! - [`Fingerprint`]: Blake3 digest of canonical JSON
//! - [`CacheKey`]: scenario id + run number + configuration fingerprint
//! - [`CachedResult`]: the stored outcome, tagged with the scenario fingerprint
//! - [`ResultCache`]: one file per key; a hit needs both fingerprints to match
//!
//! # Example
//!
//! ```rust,ignore
//! use gauntlet_cache::prelude::*;
//!
//! let cache = ResultCache::from_env("/tmp/gauntlet-cache");
//! let key = CacheKey::new("scenario_1", 1, Fingerprint::of_json(&config)?);
//! if let Some(hit) = cache.lookup(&key, &Fingerprint::of_json(&scenario)?) {
//!     println!("cached: {:?}", hit.success);
//! }
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod cache;
mod error;
mod fingerprint;

pub use cache::{CacheKey, CachedResult, ResultCache, CACHE_DIR_ENV};
pub use error::{CacheError, FingerprintError, Result};
pub use fingerprint::{Fingerprint, SHORT_LEN};

/// Common imports
pub mod prelude {
    pub use crate::{CacheKey, CachedResult, Fingerprint, ResultCache};
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
