use std::sync::Arc;

use tracing::debug;

use gridlink_pool::{BoxFuture, PoolError, PoolableFactory};
use gridlink_protocol::{AccountIdentity, PipelineConfiguration};

use crate::connection::ServerConnection;
use crate::connector::Connector;
use crate::credential::CredentialStore;
use crate::error::ConnectionError;

/// How an idle session is checked before it is handed out again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LivenessProbe {
    /// Only sessions that saw an error are rejected.
    #[default]
    Passive,
    /// Additionally round-trips a `Ping`.
    Ping,
}

/// Builds, checks and tears down [`ServerConnection`]s for the pools.
#[derive(Clone)]
pub struct ServerConnectionFactory {
    credentials: Arc<CredentialStore>,
    connector: Arc<dyn Connector>,
    config: PipelineConfiguration,
    probe: LivenessProbe,
}

impl ServerConnectionFactory {
    pub fn new(
        credentials: Arc<CredentialStore>,
        connector: Arc<dyn Connector>,
        config: PipelineConfiguration,
        probe: LivenessProbe,
    ) -> Self {
        Self {
            credentials,
            connector,
            config,
            probe,
        }
    }
}

impl PoolableFactory<AccountIdentity, ServerConnection> for ServerConnectionFactory {
    fn make_object<'a>(
        &'a self,
        key: &'a AccountIdentity,
    ) -> BoxFuture<'a, Result<ServerConnection, PoolError>> {
        Box::pin(async move {
            let credential = self.credentials.get(key).ok_or_else(|| {
                PoolError::factory(ConnectionError::MissingCredential(key.to_string()))
            })?;
            ServerConnection::open(key, &credential, &self.config, self.connector.as_ref())
                .await
                .map_err(PoolError::factory)
        })
    }

    fn destroy_object<'a>(
        &'a self,
        key: &'a AccountIdentity,
        object: ServerConnection,
    ) -> BoxFuture<'a, Result<(), PoolError>> {
        Box::pin(async move {
            debug!(account = %key, "closing pooled session");
            object.shutdown().await.map_err(PoolError::factory)
        })
    }

    fn validate_object<'a>(
        &'a self,
        _key: &'a AccountIdentity,
        object: &'a mut ServerConnection,
    ) -> BoxFuture<'a, bool> {
        Box::pin(async move {
            if object.is_poisoned() {
                return false;
            }
            match self.probe {
                LivenessProbe::Passive => true,
                LivenessProbe::Ping => object.ping().await.is_ok(),
            }
        })
    }
}
