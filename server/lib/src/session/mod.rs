//! Per connection state: who is bound, which invocations are in flight, and the paged
//! results table.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use hashbrown::HashMap;
use tokio::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use crate::prelude::*;
use crate::server::access::{CredentialVerifier, Credentials};

pub mod paging;

pub use self::paging::{
    render_reference, validate_sort_keys, ListCursor, PagedResultsTable, PagedState,
    SearchCursor, SearchLevel,
};

/// One operation in flight. Traversal checks it cooperatively, there is no preemption.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub invoke_id: u64,
    pub requester: Option<DistinguishedName>,
    pub authentication_level: AuthenticationLevel,
    abandon: Arc<AtomicBool>,
    deadline: Duration,
    clock: Arc<dyn Clock>,
}

impl Invocation {
    pub fn new(
        invoke_id: u64,
        requester: Option<DistinguishedName>,
        authentication_level: AuthenticationLevel,
        deadline: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Invocation {
            invoke_id,
            requester,
            authentication_level,
            abandon: Arc::new(AtomicBool::new(false)),
            deadline,
            clock,
        }
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    /// Tighten the deadline, such as to one carried in by chaining arguments.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = self.deadline.min(deadline);
        self
    }

    pub fn abandon(&self) {
        self.abandon.store(true, Ordering::Release);
    }

    pub fn is_abandoned(&self) -> bool {
        self.abandon.load(Ordering::Acquire)
    }

    pub fn time_exceeded(&self) -> bool {
        self.clock.now() >= self.deadline
    }

    pub fn check(&self) -> Result<(), OperationError> {
        if self.is_abandoned() {
            request_info!(invoke_id = self.invoke_id, "invocation abandoned");
            return Err(OperationError::Abandoned);
        }
        if self.time_exceeded() {
            request_warn!(invoke_id = self.invoke_id, "time limit exceeded");
            return Err(OperationError::Service(ServiceProblem::TimeLimitExceeded));
        }
        Ok(())
    }
}

pub struct Session {
    pub id: Uuid,
    requester: Option<DistinguishedName>,
    authentication_level: AuthenticationLevel,
    paging: Mutex<PagedResultsTable>,
    in_flight: Mutex<HashMap<u64, Arc<AtomicBool>>>,
    next_invoke_id: AtomicU64,
    clock: Arc<dyn Clock>,
}

impl Session {
    pub fn new(max_paged_queries: usize, clock: Arc<dyn Clock>) -> Self {
        Session {
            id: Uuid::new_v4(),
            requester: None,
            authentication_level: AuthenticationLevel::None,
            paging: Mutex::new(PagedResultsTable::new(max_paged_queries)),
            in_flight: Mutex::new(HashMap::new()),
            next_invoke_id: AtomicU64::new(1),
            clock,
        }
    }

    pub fn requester(&self) -> Option<&DistinguishedName> {
        self.requester.as_ref()
    }

    #[instrument(level = "debug", skip_all, fields(session = %self.id))]
    pub async fn bind(
        &mut self,
        verifier: &dyn CredentialVerifier,
        credentials: Credentials,
    ) -> Result<(), OperationError> {
        if !verifier.verify(&credentials).await? {
            security_info!(name = ?credentials.name(), "bind rejected");
            return Err(OperationError::Security(SecurityProblem::InvalidCredentials));
        }
        self.authentication_level = credentials.authentication_level();
        self.requester = credentials.name().cloned();
        security_info!(name = ?self.requester, level = ?self.authentication_level, "bound");
        Ok(())
    }

    /// Start an invocation bounded by `time_limit` from now.
    pub async fn begin(&self, time_limit: Duration) -> Invocation {
        let invoke_id = self.next_invoke_id.fetch_add(1, Ordering::Relaxed);
        let inv = Invocation::new(
            invoke_id,
            self.requester.clone(),
            self.authentication_level,
            self.clock.now() + time_limit,
            self.clock.clone(),
        );
        self.in_flight
            .lock()
            .await
            .insert(invoke_id, inv.abandon.clone());
        inv
    }

    pub async fn finish(&self, inv: &Invocation) {
        self.in_flight.lock().await.remove(&inv.invoke_id);
    }

    /// Returns false when no such invocation is in flight.
    pub async fn abandon(&self, invoke_id: u64) -> bool {
        match self.in_flight.lock().await.get(&invoke_id) {
            Some(flag) => {
                flag.store(true, Ordering::Release);
                true
            }
            None => false,
        }
    }

    pub async fn paging(&self) -> MutexGuard<'_, PagedResultsTable> {
        self.paging.lock().await
    }

    /// Called when the connection goes away. All paged state is dropped and any work
    /// still running is abandoned.
    pub async fn teardown(&self) {
        let mut in_flight = self.in_flight.lock().await;
        for flag in in_flight.values() {
            flag.store(true, Ordering::Release);
        }
        in_flight.clear();
        self.paging.lock().await.clear();
        admin_info!(session = %self.id, "session torn down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::{StaticCredentials, TestClock};
    use async_trait::async_trait;

    struct RejectAll;

    #[async_trait]
    impl CredentialVerifier for RejectAll {
        async fn verify(&self, _credentials: &Credentials) -> Result<bool, OperationError> {
            Ok(false)
        }
    }

    #[tokio::test]
    async fn test_session_bind_abandon_teardown() {
        let clock = Arc::new(TestClock::new(0));
        let mut session = Session::new(2, clock.clone());

        let creds = Credentials::Simple {
            name: dn!("cn=Alice,o=Example,c=US"),
            password: b"secret".to_vec(),
        };
        assert_eq!(
            session.bind(&RejectAll, creds.clone()).await,
            Err(OperationError::Security(SecurityProblem::InvalidCredentials))
        );
        assert!(session.requester().is_none());
        session
            .bind(&StaticCredentials::default(), creds)
            .await
            .expect("bind");
        assert_eq!(session.requester(), Some(&dn!("cn=Alice,o=Example,c=US")));

        let inv = session.begin(Duration::from_secs(10)).await;
        assert_eq!(inv.authentication_level, AuthenticationLevel::Simple);
        assert!(inv.check().is_ok());
        assert!(session.abandon(inv.invoke_id).await);
        assert_eq!(inv.check(), Err(OperationError::Abandoned));
        session.finish(&inv).await;
        assert!(!session.abandon(inv.invoke_id).await);

        let other = session.begin(Duration::from_secs(10)).await;
        let reference = {
            let mut paging = session.paging().await;
            let r = paging.allocate_reference();
            paging.insert(
                r.clone(),
                PagedState::List(ListCursor {
                    request: ListArgument::new(DistinguishedName::root()),
                    page_size: 1,
                    after: None,
                }),
            );
            r
        };
        session.teardown().await;
        assert!(other.is_abandoned());
        assert!(session.paging().await.get(&reference).is_none());
    }

    #[test]
    fn test_invocation_deadline() {
        let clock = Arc::new(TestClock::new(0));
        let inv = Invocation::new(
            1,
            None,
            AuthenticationLevel::None,
            Duration::from_secs(5),
            clock.clone(),
        );
        assert!(inv.check().is_ok());
        clock.advance(Duration::from_secs(5));
        assert_eq!(
            inv.check(),
            Err(OperationError::Service(ServiceProblem::TimeLimitExceeded))
        );
        let tightened = Invocation::new(2, None, AuthenticationLevel::None, Duration::from_secs(50), clock)
            .with_deadline(Duration::from_secs(1));
        assert_eq!(tightened.deadline(), Duration::from_secs(1));
    }
}
