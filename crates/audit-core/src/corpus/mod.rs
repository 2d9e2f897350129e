//! Pure, stateless parsing of the raw corpus files.

pub mod chunker;
pub mod email;
pub mod ledger;

pub use chunker::Chunker;
pub use email::{Email, EmailParser};
pub use ledger::{Ledger, Transaction};
