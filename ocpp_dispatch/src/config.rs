use crate::listeners::ErrorSink;
use crate::signature::{NoSignatures, SignaturePolicy};
use crate::timeout::Timeout;
use ocpp_frame::NodeId;
use std::sync::Arc;
use std::time::Duration;

/// Startup configuration of a [NetworkingNode](crate::NetworkingNode).
#[derive(Clone)]
pub struct NodeConfig {
    pub local_id: NodeId,
    /// Used for outbound requests that do not carry their own timeout.
    pub request_timeout: Timeout,
    pub signature_policy: Arc<dyn SignaturePolicy>,
    /// Always put destination and network path into outgoing frames, even for direct neighbours.
    pub network_extension: bool,
}

impl NodeConfig {
    pub fn new(local_id: impl Into<NodeId>) -> Self {
        NodeConfig {
            local_id: local_id.into(),
            request_timeout: Timeout::Default,
            signature_policy: Arc::new(NoSignatures),
            network_extension: false,
        }
    }

    pub fn with_request_timeout(mut self, timeout: impl Into<Timeout>) -> Self {
        self.request_timeout = timeout.into();
        self
    }

    pub fn with_signature_policy(mut self, policy: impl SignaturePolicy + 'static) -> Self {
        self.signature_policy = Arc::new(policy);
        self
    }

    pub fn with_network_extension(mut self, enabled: bool) -> Self {
        self.network_extension = enabled;
        self
    }
}

/// The narrow set of capabilities every adapter of a node shares.
pub struct NodeContext {
    pub local: NodeId,
    pub signature_policy: Arc<dyn SignaturePolicy>,
    pub default_timeout: Duration,
    pub network_extension: bool,
    pub errors: ErrorSink,
}

impl NodeContext {
    pub fn new(config: NodeConfig) -> Self {
        NodeContext {
            local: config.local_id,
            signature_policy: config.signature_policy,
            default_timeout: config.request_timeout.duration(),
            network_extension: config.network_extension,
            errors: ErrorSink::default(),
        }
    }
}
