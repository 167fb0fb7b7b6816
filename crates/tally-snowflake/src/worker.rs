use crate::error::Error;
use async_trait::async_trait;

/// Network identity handed to the coordination service so it can tell live
/// allocator instances apart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeIdentity {
    pub host: String,
    pub port: u16,
}

impl NodeIdentity {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

/// External coordination service that assigns worker ids.
///
/// Queried exactly once, at allocator construction. The service is trusted
/// to guarantee at most one live holder per worker id; this crate only
/// validates the returned range.
#[async_trait]
pub trait WorkerIdProvider: Send + Sync + 'static {
    /// Returns the worker id for this instance, or a
    /// [`Coordination`](Error::Coordination) failure, in which case
    /// construction fails fast.
    async fn assign(&self, identity: &NodeIdentity) -> Result<u16, Error>;
}

/// Fixed worker-id assignment, for tests and deployments where ids are
/// provisioned out of band.
#[derive(Debug, Clone, Copy)]
pub struct StaticWorkerId(pub u16);

#[async_trait]
impl WorkerIdProvider for StaticWorkerId {
    async fn assign(&self, _identity: &NodeIdentity) -> Result<u16, Error> {
        Ok(self.0)
    }
}
