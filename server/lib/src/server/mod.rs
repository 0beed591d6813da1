//! `server` contains the name resolution core and the dispatcher that coordinates it
//! with the list and search procedures and with chaining to other DSAs.

use crate::filter::{BasicFilterEvaluator, FilterEvaluator};
use crate::prelude::*;
use crate::time::SystemClock;

use self::access::{
    effective_admin_points, AccessControlContext, AccessControlDecision, BasicAcdf,
    BasicTuplePreprocessor, GroupMembershipChecker, StoreGroupMembership, TuplePreprocessor,
};
use self::suitability::{BasicSuitability, SuitabilityCheck};

pub mod access;
pub mod continuation;
pub mod dispatch;
pub mod find_dse;
pub mod list;
pub mod search;
pub mod state;
pub mod suitability;

/// Everything name resolution and traversal consult that does not change per operation.
#[derive(Clone)]
pub struct DsaContext {
    pub config: Arc<DsaConfiguration>,
    pub store: Arc<dyn DitStore>,
    pub acdf: Arc<dyn AccessControlDecision>,
    pub preprocessor: Arc<dyn TuplePreprocessor>,
    pub groups: Arc<dyn GroupMembershipChecker>,
    pub filter_evaluator: Arc<dyn FilterEvaluator>,
    pub suitability: Arc<dyn SuitabilityCheck>,
    pub registry: Arc<MatchingRuleRegistry>,
    pub clock: Arc<dyn Clock>,
}

impl DsaContext {
    /// A context with the bundled collaborators.
    pub fn new(config: Arc<DsaConfiguration>, store: Arc<dyn DitStore>) -> Self {
        let registry = Arc::new(MatchingRuleRegistry::default());
        DsaContext {
            config,
            groups: Arc::new(StoreGroupMembership::new(store.clone(), registry.clone())),
            store,
            acdf: Arc::new(BasicAcdf),
            preprocessor: Arc::new(BasicTuplePreprocessor),
            filter_evaluator: Arc::new(BasicFilterEvaluator::new(registry.clone())),
            suitability: Arc::new(BasicSuitability::default()),
            registry,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_acdf(mut self, acdf: Arc<dyn AccessControlDecision>) -> Self {
        self.acdf = acdf;
        self
    }

    pub fn with_preprocessor(mut self, preprocessor: Arc<dyn TuplePreprocessor>) -> Self {
        self.preprocessor = preprocessor;
        self
    }

    pub fn with_groups(mut self, groups: Arc<dyn GroupMembershipChecker>) -> Self {
        self.groups = groups;
        self
    }

    pub fn with_suitability(mut self, suitability: Arc<dyn SuitabilityCheck>) -> Self {
        self.suitability = suitability;
        self
    }

    pub fn limits(&self) -> &Limits {
        &self.config.limits
    }

    /// The name this DSA goes by in traces and access points.
    pub fn this_dsa(&self) -> &DistinguishedName {
        &self.config.my_access_point.ae_title
    }

    /// Access control for `vertex`, given the administrative points above it.
    pub async fn access_at(
        &self,
        inv: &Invocation,
        adm_points: &[Arc<Vertex>],
        vertex: &Arc<Vertex>,
    ) -> Result<AccessControlContext, OperationError> {
        let points = effective_admin_points(adm_points, vertex);
        AccessControlContext::for_vertex(self, inv, &points, vertex).await
    }
}
