//! Re-exports the `failure` crate's error type under the names used
//! throughout the workspace. Any type implementing `std::error::Error +
//! Send + Sync + 'static` converts into `Error` for free via `failure`'s
//! blanket `Fail` impl, so leaf crates can define plain enums and still use
//! `?` against this `Result`.

pub use failure::err_msg;
pub use failure::format_err;
pub use failure::Error;

pub type Result<T, E = Error> = core::result::Result<T, E>;
