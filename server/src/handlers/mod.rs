//! Request handlers for the sync protocol.

mod pull;
mod push;

pub use pull::*;
pub use push::*;
