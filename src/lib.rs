//! buildstash - build directory cache
//!
//! Keeps directories of a build workspace (dependency and compiler caches)
//! in a store on the control node, moving them to and from the executor as
//! single compressed archives.

pub mod archive;
pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod executor;
pub mod remote;
pub mod ui;

pub use error::{StashError, StashResult};
