#![deny(
    clippy::nursery,
    clippy::pedantic,
    missing_docs,
    clippy::missing_docs_in_private_items,
)]
//! # tf-core – shared plumbing for the Tokenflow crates
//!
//! Holds the pieces every Tokenflow binary and library needs regardless of what it simulates:
//! subscriber setup for [`tracing`] and the error vocabulary ([`errors`]) used to tell build
//! failures, configuration mistakes and expression-evaluation failures apart.

pub mod errors;
pub mod logging;
