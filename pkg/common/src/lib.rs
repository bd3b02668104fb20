//! Ubiquitous types and helpers shared by every crate in the workspace:
//! the `Result`/`Error` alias, a stable non-cryptographic hash used for
//! colocation hashing, and small byte-wrangling helpers used by the
//! tuple/row codecs.

#[macro_use]
extern crate macros;

pub extern crate async_std;
pub extern crate bytes;
pub extern crate failure;
pub extern crate uuid;

pub mod errors;
pub mod hash;
pub mod varint;

/// Ceiling division, used when picking the narrowest byte width that can
/// hold a given bit count (varint length prefixes, offset tables, ...).
pub fn ceil_div(n: usize, d: usize) -> usize {
    (n + d - 1) / d
}

/// Initializes the process-wide `tracing` subscriber. Safe to call more than
/// once; subsequent calls are no-ops.
pub fn init_logging() {
    use std::sync::Once;
    static ONCE: Once = Once::new();
    ONCE.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    });
}
