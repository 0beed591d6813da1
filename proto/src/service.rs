use serde::{Deserialize, Serialize};

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct ServiceControlOptions: u32 {
        const PREFER_CHAINING = 1 << 0;
        const CHAINING_PROHIBITED = 1 << 1;
        const LOCAL_SCOPE = 1 << 2;
        const DONT_USE_COPY = 1 << 3;
        const DONT_DEREFERENCE_ALIASES = 1 << 4;
        const SUBENTRIES = 1 << 5;
        const COPY_SHALL_DO = 1 << 6;
        const PARTIAL_NAME_RESOLUTION = 1 << 7;
        const MANAGE_DSAIT = 1 << 8;
        const NO_SUBTYPE_MATCH = 1 << 9;
        const NO_SUBTYPE_SELECTION = 1 << 10;
        const COUNT_FAMILY = 1 << 11;
        const DONT_SELECT_FRIENDS = 1 << 12;
        const DONT_MATCH_FRIENDS = 1 << 13;
        const ALLOW_WRITEABLE_COPY = 1 << 14;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ServiceControls {
    pub options: ServiceControlOptions,
    /// Seconds.
    pub time_limit: Option<u64>,
    pub size_limit: Option<usize>,
    /// Extensions the requester marked critical, by extension number.
    pub critical_extensions: Vec<u32>,
}

impl ServiceControls {
    pub fn has(&self, option: ServiceControlOptions) -> bool {
        self.options.contains(option)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationCode {
    Read,
    Compare,
    List,
    Search,
    AddEntry,
    RemoveEntry,
    ModifyEntry,
    ModifyDn,
}

impl OperationCode {
    pub fn is_update(self) -> bool {
        matches!(
            self,
            OperationCode::AddEntry
                | OperationCode::RemoveEntry
                | OperationCode::ModifyEntry
                | OperationCode::ModifyDn
        )
    }

    pub fn is_enumerative(self) -> bool {
        matches!(self, OperationCode::List | OperationCode::Search)
    }

    pub fn is_read_style(self) -> bool {
        !self.is_update()
    }

    /// Updates act on the alias entry itself, so the final RDN is never dereferenced.
    pub fn dereferences_final_alias(self) -> bool {
        !self.is_update()
    }
}
