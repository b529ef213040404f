//! Synthetic PE images for unit tests.
//!
//! The builder is also compiled into the integration tests through `#[path]`, so it does not
//! depend on anything inside the crate.


pub use builder::*;
