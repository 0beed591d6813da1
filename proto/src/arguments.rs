use serde::{Deserialize, Serialize};

use crate::dn::{AttributeType, AttributeTypeAndValue, DistinguishedName};
use crate::filter::Filter;
use crate::service::ServiceControls;

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttributeSelection {
    #[default]
    AllUserAttributes,
    Select(Vec<AttributeType>),
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EntryInformationSelection {
    pub attributes: AttributeSelection,
    pub types_only: bool,
}

impl EntryInformationSelection {
    pub fn select(names: &[&str]) -> Self {
        EntryInformationSelection {
            attributes: AttributeSelection::Select(
                names.iter().map(|n| AttributeType::new(n)).collect(),
            ),
            types_only: false,
        }
    }

    pub fn wants(&self, atype: &AttributeType) -> bool {
        match &self.attributes {
            AttributeSelection::AllUserAttributes => true,
            AttributeSelection::Select(names) => names.contains(atype),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SortKey {
    pub atype: AttributeType,
    pub ordering_rule: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PagedResultsRequest {
    NewRequest {
        page_size: usize,
        sort_keys: Vec<SortKey>,
        reverse: bool,
        unmerged: bool,
    },
    QueryReference(Vec<u8>),
    AbandonQuery(Vec<u8>),
}

impl PagedResultsRequest {
    pub fn new_request(page_size: usize) -> Self {
        PagedResultsRequest::NewRequest {
            page_size,
            sort_keys: Vec::new(),
            reverse: false,
            unmerged: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadArgument {
    pub object: DistinguishedName,
    pub selection: EntryInformationSelection,
    pub service_controls: ServiceControls,
}

impl ReadArgument {
    pub fn new(object: DistinguishedName) -> Self {
        ReadArgument {
            object,
            selection: EntryInformationSelection::default(),
            service_controls: ServiceControls::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompareArgument {
    pub object: DistinguishedName,
    pub purported: AttributeTypeAndValue,
    pub service_controls: ServiceControls,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListArgument {
    pub object: DistinguishedName,
    pub paged_results: Option<PagedResultsRequest>,
    pub list_family: bool,
    pub service_controls: ServiceControls,
}

impl ListArgument {
    pub fn new(object: DistinguishedName) -> Self {
        ListArgument {
            object,
            paged_results: None,
            list_family: false,
            service_controls: ServiceControls::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchSubset {
    BaseObject,
    OneLevel,
    #[default]
    WholeSubtree,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchArgument {
    pub base_object: DistinguishedName,
    pub subset: SearchSubset,
    pub filter: Filter,
    pub search_aliases: bool,
    pub selection: EntryInformationSelection,
    pub paged_results: Option<PagedResultsRequest>,
    pub search_family: bool,
    pub service_controls: ServiceControls,
}

impl SearchArgument {
    pub fn new(base_object: DistinguishedName, subset: SearchSubset, filter: Filter) -> Self {
        SearchArgument {
            base_object,
            subset,
            filter,
            search_aliases: true,
            selection: EntryInformationSelection::default(),
            paged_results: None,
            search_family: false,
            service_controls: ServiceControls::default(),
        }
    }
}
