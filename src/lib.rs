//! Builds, browses, and marks a restore-time directory tree, then
//! synthesizes the storage bootstrap record (BSR) that drives tape/disk
//! replay for the selected files.
//!
//! See [`session`] for the top-level restore-session facade; the other
//! modules are its building blocks, usable standalone.

pub mod bsr;
pub mod builder;
pub mod cancel;
pub mod config;
pub mod counters;
pub mod delta;
pub mod error;
pub mod hardlink;
pub mod intern;
pub mod lstat;
pub mod node;
pub mod selection;
pub mod serialize;
pub mod session;
pub mod tree;
