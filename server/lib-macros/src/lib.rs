#![deny(warnings)]
#![warn(unused_extern_crates)]
#![deny(clippy::todo)]
#![deny(clippy::unimplemented)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![deny(clippy::unreachable)]
#![deny(clippy::await_holding_lock)]
#![deny(clippy::needless_pass_by_value)]
#![deny(clippy::trivially_copy_pass_by_ref)]

mod entry;

#[allow(unused_extern_crates)]
extern crate proc_macro;

use proc_macro::TokenStream;

/// Run an `async fn(&TestDsa)` against a freshly seeded in memory DSA. Arguments
/// override fields of `testkit::TestConfiguration`, for example
/// `#[dsa_test(eager_subordinates = 0)]`.
#[proc_macro_attribute]
pub fn dsa_test(args: TokenStream, item: TokenStream) -> TokenStream {
    entry::dsa_test(&args, item)
}
