#![forbid(unsafe_code)]
#![warn(
    unused,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    missing_docs
)]
#![allow(clippy::module_name_repetitions)]

//! Configuration for the scribe file engine.
//!
//! Layout: `defaults.rs` (policy constants), `model.rs` (typed config),
//! `validate.rs` (consistency checks), `loader.rs` (file and environment
//! layering), `error.rs` (error type).

pub mod defaults;
pub mod error;
pub mod loader;
pub mod model;
pub mod validate;

pub use error::{ConfigError, ConfigResult};
pub use loader::{CONFIG_PATH_ENV, from_env, from_file, from_lookup};
pub use model::{ChunkSettings, EngineConfig};
pub use validate::{legacy_encoding, validate};
