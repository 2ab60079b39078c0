#![forbid(unsafe_code)]

//! Edge provider agent: keeps one authenticated, self-healing session to the
//! storage coordinator and serves its pin, unpin, upload, and download
//! commands against the local IPFS node.

pub mod claim;
pub mod config;
pub mod credentials;
pub mod dispatcher;
pub mod errors;
pub mod protocol;
pub mod session;
pub mod store;
pub mod transport;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};
