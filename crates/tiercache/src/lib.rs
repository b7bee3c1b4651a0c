//! # tiercache
//!
//! A generic, two-tier content cache: an in-process store of decoded
//! values backed by a capacity-bounded persistent store of encoded
//! bytes, with pluggable value sources and named per-format transform
//! pipelines.
//!
//! ## Cache layers
//!
//! Every [`Cache`] manages a set of named [`Format`]s. Each format owns
//! two tiers:
//!
//! - A volatile memory tier ([moka]-backed) holding decoded values. It
//!   is unbounded by policy and cleared wholesale on a memory-pressure
//!   signal; it is an accelerator, never the source of truth.
//! - A directory-backed disk tier holding encoded bytes, bounded by the
//!   format's capacity budget and evicted least-recently-used by file
//!   access time. All mutation and size accounting for one store runs
//!   on a single ordered worker, so the running size is exact after the
//!   queue drains.
//!
//! A lookup goes through the layers in order:
//! - First the memory tier; a hit resolves synchronously and refreshes
//!   the disk entry's access time in the background.
//! - On miss, the disk tier; bytes are read and decoded asynchronously
//!   and the memory tier is populated.
//! - On miss, an optional [`Fetcher`] acquires a fresh value, which is
//!   run through the format's transform pipeline and written to both
//!   tiers.
//!
//! Results are delivered through a [`Fetch`], a single-resolution
//! future result with success/failure callback registration and
//! synchronous state inspection.
//!
//! ## Values
//!
//! Anything implementing [`CacheValue`] (decode-from-bytes and
//! encode-to-bytes) can be cached; implementations for `Vec<u8>`,
//! `String` and `serde_json::Value` ship with the crate. Formats can
//! override the encoding per store.
//!
//! ## Errors
//!
//! All failures surface as [`CacheError`], which carries a stable
//! numeric [`code`](CacheError::code) alongside its description.
//! Internal bookkeeping failures (a file that cannot be touched or
//! evicted) are logged via [`tracing`] and never abort an in-progress
//! operation.
//!
//! [moka]: https://docs.rs/moka

mod cache;
mod config;
mod disk;
mod error;
mod fetch;
mod fetcher;
mod format;
mod key;
mod memory;
mod value;

#[cfg(test)]
mod tests;

pub use cache::Cache;
pub use config::Config;
pub use disk::DiskCache;
pub use error::{CacheContents, CacheError};
pub use fetch::{FailureFn, Fetch, SuccessFn};
pub use fetcher::{DiskFetcher, Fetcher, NetworkFetcher, SimpleFetcher};
pub use format::{Format, ORIGINAL_FORMAT};
pub use key::filename_for_key;
pub use memory::MemoryCache;
pub use value::CacheValue;
