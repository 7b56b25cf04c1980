use std::fmt;
use std::sync::Arc;

use crate::client::{HostClient, LoadBalancingMetric, ProxyRequest, ProxyResponse, RequestContext};
use crate::error::ProxyError;

use super::{Origin, OriginId};

/// Read-only pairing of an origin with the client that dispatches to it.
///
/// Re-derived from the inventory on every snapshot; owning one does not keep
/// the origin registered.
#[derive(Clone)]
pub struct RemoteHost {
    origin: Origin,
    client: Arc<dyn HostClient>,
}

impl RemoteHost {
    pub fn new(origin: Origin, client: Arc<dyn HostClient>) -> Self {
        Self { origin, client }
    }

    pub fn id(&self) -> &OriginId {
        self.origin.id()
    }

    pub fn origin(&self) -> &Origin {
        &self.origin
    }

    pub fn host_client(&self) -> &Arc<dyn HostClient> {
        &self.client
    }

    pub fn load_balancing_metric(&self) -> LoadBalancingMetric {
        self.client.load_balancing_metric()
    }

    /// Dispatches a request to this origin.
    pub async fn handle(
        &self,
        request: ProxyRequest,
        context: &RequestContext,
    ) -> Result<ProxyResponse, ProxyError> {
        self.client.send_request(request, context).await
    }
}

impl PartialEq for RemoteHost {
    fn eq(&self, other: &Self) -> bool {
        self.origin == other.origin
    }
}

impl Eq for RemoteHost {}

impl fmt::Debug for RemoteHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteHost")
            .field("origin", &self.origin)
            .field("metric", &self.load_balancing_metric())
            .finish()
    }
}
