//! # pyjail
//!
//! An HTTP service that runs untrusted Python scripts inside an `nsjail` sandbox and returns the
//! value produced by their `main()` function.
//!
//! The heavy lifting is done by the [`pyjail_exec`] crate; this crate only contains the plumbing
//! around it: command line options, logging setup and the HTTP server.

#[macro_use]
extern crate log;

pub mod error;
pub mod opt;
pub mod server;

pub use opt::*;
pub use server::*;
