//! The DSA configuration as read from `dsa.toml`. This describes how this DSA names
//! itself to others, what it knows about its superior, and the limits that bound the
//! work a single operation may do.

use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use dsad_proto::chaining::AccessPoint;
use dsad_proto::constants::*;
use dsad_proto::dn::DistinguishedName;
use dsad_proto::internal::OperationError;
use serde::Deserialize;
use sketching::{admin_error, LogLevel};

/// Bounds on the work of a single operation.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct Limits {
    /// Hard ceiling on Find DSE loop iterations, so that a corrupt DIT still terminates.
    pub find_dse_iteration_ceiling: usize,
    pub max_alias_chain: usize,
    /// Subordinate counts at or above this use the store's RDN index instead of a scan.
    pub fast_path_subordinate_threshold: usize,
    pub subordinate_batch_size: usize,
    pub max_paged_queries_per_connection: usize,
    pub max_sort_keys: usize,
    pub default_size_limit: usize,
    pub max_size_limit: usize,
    pub default_time_limit_secs: u64,
    pub max_time_limit_secs: u64,
}

impl Default for Limits {
    fn default() -> Self {
        Limits {
            find_dse_iteration_ceiling: DEFAULT_FIND_DSE_ITERATION_CEILING,
            max_alias_chain: DEFAULT_MAX_ALIAS_CHAIN,
            fast_path_subordinate_threshold: DEFAULT_FAST_PATH_SUBORDINATE_THRESHOLD,
            subordinate_batch_size: DEFAULT_SUBORDINATE_BATCH_SIZE,
            max_paged_queries_per_connection: DEFAULT_MAX_PAGED_QUERIES_PER_CONNECTION,
            max_sort_keys: DEFAULT_MAX_SORT_KEYS,
            default_size_limit: DEFAULT_SIZE_LIMIT,
            max_size_limit: DEFAULT_MAX_SIZE_LIMIT,
            default_time_limit_secs: DEFAULT_TIME_LIMIT.as_secs(),
            max_time_limit_secs: DEFAULT_MAX_TIME_LIMIT.as_secs(),
        }
    }
}

impl Limits {
    /// The size limit in force for a request, clamped to the configured maximum.
    pub fn size_limit(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(self.default_size_limit)
            .min(self.max_size_limit)
    }

    pub fn time_limit(&self, requested: Option<u64>) -> Duration {
        Duration::from_secs(
            requested
                .unwrap_or(self.default_time_limit_secs)
                .min(self.max_time_limit_secs),
        )
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AccessPointConfig {
    /// The application entity title, as a distinguished name string.
    pub ae_title: String,
    pub addresses: Vec<String>,
}

impl TryFrom<&AccessPointConfig> for AccessPoint {
    type Error = OperationError;

    fn try_from(value: &AccessPointConfig) -> Result<Self, Self::Error> {
        Ok(AccessPoint {
            ae_title: DistinguishedName::from_str(&value.ae_title)?,
            address: value.addresses.clone(),
            protocol_information: Vec::new(),
        })
    }
}

/// This is the DSA configuration as read from `dsa.toml`.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DsaConfigToml {
    pub my_access_point: AccessPointConfig,
    /// Where to send operations this DSA can not resolve at all. Leave this empty for a
    /// first level DSA.
    #[serde(default)]
    pub superior_knowledge: Vec<AccessPointConfig>,
    /// The log level, one of info, debug, trace. Defaults to "info" if not set.
    pub log_level: Option<LogLevel>,
    #[serde(default)]
    pub limits: Limits,
}

#[derive(Debug, Clone, Default)]
pub struct DsaConfiguration {
    pub my_access_point: AccessPoint,
    pub superior_knowledge: Vec<AccessPoint>,
    pub log_level: LogLevel,
    pub limits: Limits,
}

impl DsaConfiguration {
    pub fn new<P: AsRef<Path>>(config_path: P) -> Result<Self, OperationError> {
        let mut f = File::open(config_path.as_ref()).map_err(|e| {
            admin_error!(?e, path = ?config_path.as_ref(), "Unable to open config file");
            OperationError::InvalidState(format!("unable to open config file: {e}"))
        })?;

        let mut contents = String::new();
        f.read_to_string(&mut contents).map_err(|e| {
            admin_error!(?e, "Unable to read contents of config file");
            OperationError::InvalidState(format!("unable to read config file: {e}"))
        })?;

        Self::from_toml_str(contents.as_str())
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, OperationError> {
        let raw: DsaConfigToml = toml::from_str(contents).map_err(|e| {
            admin_error!(?e, "Unable to parse config");
            OperationError::InvalidState(format!("unable to parse config: {e}"))
        })?;

        let my_access_point = AccessPoint::try_from(&raw.my_access_point)?;
        let superior_knowledge = raw
            .superior_knowledge
            .iter()
            .map(AccessPoint::try_from)
            .collect::<Result<Vec<_>, _>>()?;

        if raw.limits.subordinate_batch_size == 0 || raw.limits.max_paged_queries_per_connection == 0 {
            return Err(OperationError::InvalidState(
                "subordinate_batch_size and max_paged_queries_per_connection must be non zero"
                    .to_string(),
            ));
        }

        Ok(DsaConfiguration {
            my_access_point,
            superior_knowledge,
            log_level: raw.log_level.unwrap_or_default(),
            limits: raw.limits,
        })
    }

    pub fn new_for_test() -> Self {
        DsaConfiguration {
            my_access_point: AccessPoint {
                ae_title: DistinguishedName::from_rdns(vec![dsad_proto::dn::Rdn::single(
                    "cn", "dsa1",
                )]),
                address: vec!["dsa1.example.com:102".to_string()],
                protocol_information: Vec::new(),
            },
            superior_knowledge: Vec::new(),
            log_level: LogLevel::Trace,
            limits: Limits::default(),
        }
    }

    pub fn is_first_level(&self) -> bool {
        self.superior_knowledge.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_parse_with_defaults() {
        let config = DsaConfiguration::from_toml_str(
            r#"
            log_level = "debug"

            [my_access_point]
            ae_title = "cn=dsa1,o=Example,c=US"
            addresses = ["dsa1.example.com:102"]

            [[superior_knowledge]]
            ae_title = "cn=root-dsa"
            addresses = ["root.example.com:102"]

            [limits]
            max_sort_keys = 1
            "#,
        )
        .expect("config");

        assert_eq!(config.log_level, LogLevel::Debug);
        assert_eq!(config.my_access_point.ae_title.len(), 3);
        assert!(!config.is_first_level());
        assert_eq!(config.limits.max_sort_keys, 1);
        assert_eq!(
            config.limits.find_dse_iteration_ceiling,
            DEFAULT_FIND_DSE_ITERATION_CEILING
        );
    }

    #[test]
    fn test_config_rejects_unknown_fields() {
        assert!(DsaConfiguration::from_toml_str(
            r#"
            [my_access_point]
            ae_title = "cn=dsa1"
            addresses = []
            colour = "blue"
            "#,
        )
        .is_err());
    }

    #[test]
    fn test_limits_clamp() {
        let limits = Limits::default();
        assert_eq!(limits.size_limit(None), DEFAULT_SIZE_LIMIT);
        assert_eq!(limits.size_limit(Some(usize::MAX)), DEFAULT_MAX_SIZE_LIMIT);
        assert_eq!(limits.time_limit(Some(5)), Duration::from_secs(5));
    }
}
