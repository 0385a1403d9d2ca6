//! A time-based lookup cache for inventory discovery calls.
//!
//! Discovery calls (like listing the subscriptions or resource groups visible to a collector)
//! are comparatively expensive and their results change rarely. The [`LookupCache`] memoizes
//! such results for a limited time, so that parallel discovery within one collection cycle and
//! consecutive cycles within the TTL window do not hit the inventory again.
//!
//! Entries only ever expire by time. A lapsed entry is never returned, even if it has not been
//! physically removed from the cache yet.

#![warn(missing_docs)]

mod lookup;

pub use lookup::*;
