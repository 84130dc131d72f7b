//! Static navigation-lattice blob engine.
//!
//! `nav-core` has no I/O and no async: it is the pure-computation half of
//! the navigation system — coordinate math, the paged/registry concurrency
//! primitives, the immutable blob format, and the geometry-probe-driven
//! baker. Asset loading, the streaming lifecycle, and the dashboard live in
//! the `nav-runtime` crate, which depends on this one.

pub mod baker;
pub mod blob;
pub mod coords;
pub mod error;
pub mod lattice;
pub mod morton;
pub mod paged;
pub mod registry;

pub use error::{NavError, Result};
