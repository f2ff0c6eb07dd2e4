//! In-memory record database for the reference authority.

mod clock;
mod records;

pub use clock::*;
pub use records::*;
