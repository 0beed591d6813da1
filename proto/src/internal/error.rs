use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::dn::DistinguishedName;

/* ===== errors ===== */
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum NameProblem {
    NoSuchObject,
    AliasProblem,
    InvalidAttributeSyntax,
    AliasDereferencingProblem,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ServiceProblem {
    Busy,
    Unavailable,
    UnwillingToPerform,
    ChainingRequired,
    UnableToProceed,
    InvalidReference,
    TimeLimitExceeded,
    AdministrativeLimitExceeded,
    LoopDetected,
    UnavailableCriticalExtension,
    OutOfScope,
    DitError,
    InvalidQueryReference,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SecurityProblem {
    InappropriateAuthentication,
    InvalidCredentials,
    InsufficientAccessRights,
    InvalidSignature,
    ProtectionRequired,
    NoInformation,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProtectionRequest {
    #[default]
    None,
    Signed,
}

/// Metadata attached to an error on its way back to the requester. It is produced by
/// the security parameters collaborator of the dispatcher, never by name resolution.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct SecurityParameters {
    pub target: ProtectionRequest,
    pub recipient: Option<DistinguishedName>,
    pub error_code: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "lowercase")]
pub enum OperationError {
    Name {
        problem: NameProblem,
        matched: DistinguishedName,
    },
    Service(ServiceProblem),
    Security(SecurityProblem),
    Abandoned,
    // Faults of the local DSA rather than of the request.
    Backend(String),
    CorruptedEntry(u64),
    InvalidEntryId(u64),
    MalformedArgument(String),
    InvalidState(String),
}

impl OperationError {
    pub fn no_such_object(matched: DistinguishedName) -> Self {
        OperationError::Name {
            problem: NameProblem::NoSuchObject,
            matched,
        }
    }

    pub fn name(problem: NameProblem, matched: DistinguishedName) -> Self {
        OperationError::Name { problem, matched }
    }

    /// Errors that must escape every enclosing traversal untouched, including the
    /// alias dereferencing boundary that otherwise folds inner failures into an
    /// alias problem.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            OperationError::Abandoned
                | OperationError::Service(ServiceProblem::TimeLimitExceeded)
                | OperationError::Service(ServiceProblem::LoopDetected)
                | OperationError::Service(ServiceProblem::AdministrativeLimitExceeded)
        )
    }

    pub fn matched(&self) -> Option<&DistinguishedName> {
        match self {
            OperationError::Name { matched, .. } => Some(matched),
            _ => None,
        }
    }

    /// Return the message associated with the error if there is one.
    pub fn message(&self) -> Option<String> {
        match self {
            Self::Name { matched, .. } if !matched.is_root() => {
                Some(format!("matched {matched}"))
            }
            Self::Name { .. } => None,
            Self::Service(ServiceProblem::LoopDetected) => {
                Some("The operation visited the same name more than once.".into())
            }
            Self::Service(ServiceProblem::InvalidQueryReference) => {
                Some("The paged results query reference is unknown to this connection.".into())
            }
            Self::Service(_) => None,
            Self::Security(SecurityProblem::InsufficientAccessRights) => {
                Some("The requester lacks the permissions this operation needs.".into())
            }
            Self::Security(_) => None,
            Self::Abandoned => None,
            Self::Backend(msg) => Some(msg.clone()),
            Self::CorruptedEntry(_) => None,
            Self::InvalidEntryId(_) => None,
            Self::MalformedArgument(msg) => Some(msg.clone()),
            Self::InvalidState(msg) => Some(msg.clone()),
        }
    }

    fn kind(&self) -> String {
        match self {
            Self::Name { problem, .. } => format!("{problem:?}"),
            Self::Service(problem) => format!("{problem:?}"),
            Self::Security(problem) => format!("{problem:?}"),
            Self::CorruptedEntry(id) => format!("CorruptedEntry({id})"),
            Self::InvalidEntryId(id) => format!("InvalidEntryId({id})"),
            Self::Abandoned => "Abandoned".into(),
            Self::Backend(_) => "Backend".into(),
            Self::MalformedArgument(_) => "MalformedArgument".into(),
            Self::InvalidState(_) => "InvalidState".into(),
        }
    }
}

impl PartialEq for OperationError {
    fn eq(&self, other: &Self) -> bool {
        // Only the kind of problem is compared, diagnostics like the matched name are
        // ignored. Generally we only use PartialEq for TESTING anyway.
        match (self, other) {
            (Self::Name { problem: a, .. }, Self::Name { problem: b, .. }) => a == b,
            (Self::Service(a), Self::Service(b)) => a == b,
            (Self::Security(a), Self::Security(b)) => a == b,
            _ => std::mem::discriminant(self) == std::mem::discriminant(other),
        }
    }
}

impl Display for OperationError {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        let mut output = self.kind();
        if let Some(msg) = self.message() {
            output += &format!(" - {}", msg);
        };
        f.write_str(&output)
    }
}

/// An error as it is handed back to the requester.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ErrorResponse {
    pub error: OperationError,
    pub security_parameters: Option<SecurityParameters>,
}

impl From<OperationError> for ErrorResponse {
    fn from(error: OperationError) -> Self {
        ErrorResponse {
            error,
            security_parameters: None,
        }
    }
}

#[test]
fn test_operationerror_as_nice_string() {
    use std::str::FromStr;

    assert_eq!(
        OperationError::Service(ServiceProblem::TimeLimitExceeded).to_string(),
        "TimeLimitExceeded".to_string()
    );
    assert_eq!(
        OperationError::Service(ServiceProblem::LoopDetected).to_string(),
        "LoopDetected - The operation visited the same name more than once.".to_string()
    );
    assert_eq!(
        OperationError::no_such_object(DistinguishedName::root()).to_string(),
        "NoSuchObject".to_string()
    );
    let matched = DistinguishedName::from_str("c=US").expect("parse");
    assert_eq!(
        OperationError::no_such_object(matched).to_string(),
        "NoSuchObject - matched c=US".to_string()
    );
    assert_eq!(
        OperationError::CorruptedEntry(12345).to_string(),
        "CorruptedEntry(12345)".to_string()
    );
}

#[test]
fn test_operationerror_eq_ignores_diagnostics() {
    use std::str::FromStr;

    let us = DistinguishedName::from_str("c=US").expect("parse");
    assert_eq!(
        OperationError::no_such_object(us),
        OperationError::no_such_object(DistinguishedName::root())
    );
    assert_ne!(
        OperationError::name(NameProblem::AliasProblem, DistinguishedName::root()),
        OperationError::no_such_object(DistinguishedName::root())
    );
    assert_ne!(
        OperationError::Service(ServiceProblem::Busy),
        OperationError::Service(ServiceProblem::Unavailable)
    );
    assert!(OperationError::Abandoned.is_fatal());
    assert!(!OperationError::Security(SecurityProblem::InsufficientAccessRights).is_fatal());
}
