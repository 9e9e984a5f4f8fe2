//! Protocol alias registry.
//!
//! The supervisor owns one registry and resolves each configured group's
//! `protocol` alias through it. Registration happens once at startup;
//! lookups at steady state only take the read side of the lock.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::errors::BackendError;
use crate::limiter::ServerLimiter;
use crate::protocols::v3::V3HttpGroup;
use crate::protocols::v3_grpc::V3GrpcGroup;
use crate::types::{BackendConfig, ServerClient};

/// Builds one group client from its configuration and limiter.
pub type ProtocolInit =
    Arc<dyn Fn(BackendConfig, ServerLimiter) -> Result<Arc<dyn ServerClient>, BackendError> + Send + Sync>;

pub struct ProtocolRegistry {
    inits: RwLock<HashMap<String, ProtocolInit>>,
}

impl ProtocolRegistry {
    pub fn new() -> Self {
        ProtocolRegistry {
            inits: RwLock::new(HashMap::new()),
        }
    }

    /// Registry pre-populated with every protocol this build supports.
    pub fn with_defaults() -> Self {
        let registry = Self::new();

        registry.register(
            &["carbonapi_v3_pb", "proto_v3_pb", "v3_pb"],
            Arc::new(|config, limiter| {
                Ok(Arc::new(V3HttpGroup::new(config, limiter)?) as Arc<dyn ServerClient>)
            }),
        );
        registry.register(
            &["carbonapi_v3_grpc", "proto_v3_grpc", "v3_grpc"],
            Arc::new(|config, _limiter| {
                Ok(Arc::new(V3GrpcGroup::new(&config)?) as Arc<dyn ServerClient>)
            }),
        );

        registry
    }

    pub fn register(&self, aliases: &[&str], init: ProtocolInit) {
        let mut inits = self.inits.write().expect("protocol registry lock poisoned");
        for alias in aliases {
            inits.insert(alias.to_string(), init.clone());
        }
    }

    pub fn supported(&self) -> Vec<String> {
        let inits = self.inits.read().expect("protocol registry lock poisoned");
        let mut aliases: Vec<String> = inits.keys().cloned().collect();
        aliases.sort();
        aliases
    }

    pub fn construct(
        &self,
        config: BackendConfig,
        limiter: ServerLimiter,
    ) -> Result<Arc<dyn ServerClient>, BackendError> {
        let init = {
            let inits = self.inits.read().expect("protocol registry lock poisoned");
            inits.get(&config.protocol).cloned()
        };

        let init = init.ok_or_else(|| {
            BackendError::InvalidConfig(format!("unknown backend protocol {}", config.protocol))
        })?;

        init(config, limiter)
    }
}

impl Default for ProtocolRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}
