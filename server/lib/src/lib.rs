//! The dsad server library. This implements the core of a directory system agent: the
//! model of the local part of the DIT, name resolution (Find DSE), one level and subtree
//! traversal for list and search, continuation reference construction and the access
//! control glue that gates every step.

#![deny(warnings)]
#![recursion_limit = "512"]
#![warn(unused_extern_crates)]
// Enable some groups of clippy lints.
#![deny(clippy::suspicious)]
#![deny(clippy::perf)]
// Specific lints to enforce.
#![deny(clippy::todo)]
#![deny(clippy::unimplemented)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![deny(clippy::await_holding_lock)]
#![deny(clippy::needless_pass_by_value)]
#![deny(clippy::trivially_copy_pass_by_ref)]
#![deny(clippy::disallowed_types)]
#![deny(clippy::manual_let_else)]
#![allow(clippy::unreachable)]

#[macro_use]
extern crate tracing;

// This has to be before the other modules so the macros are in scope for their tests.
#[macro_use]
pub mod macros;

pub mod be;
pub mod config;
pub mod dit;
pub mod filter;
pub mod schema;
pub mod server;
pub mod session;
pub mod testkit;
pub mod time;

/// A prelude of imports that should be imported by all other dsad modules to
/// help make imports cleaner.
pub mod prelude {
    pub use dsad_proto::constants::*;
    pub use dsad_proto::prelude::*;
    pub use sketching::{
        admin_debug, admin_error, admin_info, admin_warn, perf_trace, request_error,
        request_info, request_trace, request_warn, resolve_error, resolve_info, resolve_trace,
        resolve_warn, security_access, security_critical, security_debug, security_error,
        security_info, tagged_event, EventTag,
    };
    pub use std::sync::Arc;
    pub use std::time::Duration;

    pub use crate::be::{DitStore, SubordinateFilter};
    pub use crate::config::{DsaConfiguration, Limits};
    pub use crate::dit::{
        AdministrativeRoles, Dse, DseType, EntryId, Subordinates, Vertex,
    };
    pub use crate::schema::MatchingRuleRegistry;
    pub use crate::server::state::OperationDispatcherState;
    pub use crate::server::DsaContext;
    pub use crate::session::{Invocation, Session};
    pub use crate::time::{duration_from_epoch_now, Clock};

    #[cfg(test)]
    pub use dsad_lib_macros::*;
}
