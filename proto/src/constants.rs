//! Because consistency is great!

use std::time::Duration;

pub const ATTR_OBJECTCLASS: &str = "objectclass";
pub const ATTR_ALIASED_ENTRY_NAME: &str = "aliasedentryname";
pub const ATTR_MEMBER: &str = "member";
pub const ATTR_UNIQUE_MEMBER: &str = "uniquemember";
pub const ATTR_CN: &str = "cn";
pub const ATTR_ADMINISTRATIVE_ROLE: &str = "administrativerole";
pub const ATTR_ACCESS_CONTROL_SCHEME: &str = "accesscontrolscheme";

pub const OC_TOP: &str = "top";
pub const OC_ALIAS: &str = "alias";
pub const OC_SUBENTRY: &str = "subentry";
pub const OC_PARENT: &str = "parent";
pub const OC_CHILD: &str = "child";

/// Basic access control.
pub const BASIC_ACCESS_CONTROL_SCHEME: &str = "2.5.28.1";
/// Simplified access control, which ignores entry ACI.
pub const SIMPLIFIED_ACCESS_CONTROL_SCHEME: &str = "2.5.28.2";

/// Length in bytes of a paged results query reference.
pub const QUERY_REFERENCE_LEN: usize = 16;

pub const DEFAULT_FIND_DSE_ITERATION_CEILING: usize = 10_000;
pub const DEFAULT_MAX_ALIAS_CHAIN: usize = 32;
pub const DEFAULT_FAST_PATH_SUBORDINATE_THRESHOLD: usize = 100;
pub const DEFAULT_SUBORDINATE_BATCH_SIZE: usize = 100;
pub const DEFAULT_MAX_PAGED_QUERIES_PER_CONNECTION: usize = 5;
pub const DEFAULT_MAX_SORT_KEYS: usize = 3;
pub const DEFAULT_SIZE_LIMIT: usize = 1_000;
pub const DEFAULT_MAX_SIZE_LIMIT: usize = 10_000;
pub const DEFAULT_TIME_LIMIT: Duration = Duration::from_secs(30);
pub const DEFAULT_MAX_TIME_LIMIT: Duration = Duration::from_secs(300);
