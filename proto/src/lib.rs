//! The dsad protocol types. These are the shapes that cross the boundary between the
//! name resolution core and its collaborators: distinguished names, chaining arguments,
//! continuation references, operation arguments and results, and errors.
//!
//! Nothing in here performs I/O or encodes bytes for the wire.

#![deny(warnings)]
#![warn(unused_extern_crates)]
#![deny(clippy::todo)]
#![deny(clippy::unimplemented)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![deny(clippy::await_holding_lock)]
#![deny(clippy::needless_pass_by_value)]
#![deny(clippy::trivially_copy_pass_by_ref)]

pub mod arguments;
pub mod chaining;
pub mod constants;
pub mod dn;
pub mod filter;
pub mod internal;
pub mod results;
pub mod service;

pub mod prelude {
    pub use crate::arguments::*;
    pub use crate::chaining::*;
    pub use crate::dn::{
        AttributeType, AttributeTypeAndValue, AttributeValue, DistinguishedName, Rdn,
    };
    pub use crate::filter::*;
    pub use crate::internal::*;
    pub use crate::results::*;
    pub use crate::service::*;
}
