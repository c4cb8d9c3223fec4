//! Fleet Module
//!
//! Pure planning primitives: turning a requested (start, count, end) triple
//! into a concrete node range, deriving deterministic node identities from
//! it, and generating interface MAC addresses.

pub mod range;
pub mod naming;
pub mod mac;

pub use range::*;
pub use naming::*;
pub use mac::*;
