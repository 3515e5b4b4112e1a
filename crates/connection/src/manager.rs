use std::sync::Arc;

use tracing::{Instrument, Span, debug, info, info_span};

use gridlink_pool::{KeyedPool, PoolStats, PooledObject, SingleSlotPool};
use gridlink_protocol::{AccountIdentity, ClientConfig, PipelineConfiguration};

use crate::connection::ServerConnection;
use crate::connector::Connector;
use crate::credential::{Credential, CredentialStore};
use crate::error::ConnectionError;
use crate::factory::{LivenessProbe, ServerConnectionFactory};

/// A borrowed session. Hand it back with `release()`, or `invalidate()` it
/// after a failure.
pub type PooledConnection = PooledObject<AccountIdentity, ServerConnection>;

/// Hands out authenticated sessions per account.
///
/// Accounts whose credential is single-use share one session through a
/// [`SingleSlotPool`]; everyone else draws from a [`KeyedPool`] bounded by
/// `pool.max_per_account`.
pub struct ConnectionManager {
    config: ClientConfig,
    credentials: Arc<CredentialStore>,
    shared_pool: KeyedPool<AccountIdentity, ServerConnection>,
    single_pool: SingleSlotPool<AccountIdentity, ServerConnection>,
    span: Span,
}

impl ConnectionManager {
    pub fn new(config: ClientConfig, connector: Arc<dyn Connector>) -> Self {
        Self::with_liveness_probe(config, connector, LivenessProbe::default())
    }

    pub fn with_liveness_probe(
        config: ClientConfig,
        connector: Arc<dyn Connector>,
        probe: LivenessProbe,
    ) -> Self {
        let credentials = Arc::new(CredentialStore::new());
        let factory = Arc::new(ServerConnectionFactory::new(
            Arc::clone(&credentials),
            connector,
            config.pipeline.clone(),
            probe,
        ));
        let shared_pool = KeyedPool::new(factory.clone(), config.pool.clone());
        let single_pool = SingleSlotPool::new(factory, config.pool.clone());

        Self {
            config,
            credentials,
            shared_pool,
            single_pool,
            span: Span::current(),
        }
    }

    /// Runs session setup inside `span`.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Stores the credential used to log `account` in.
    ///
    /// Registering again for a single-use account permits one fresh login.
    pub fn register_account(&self, account: &AccountIdentity, credential: Credential) {
        self.credentials.insert(account.clone(), credential);
        if account.auth_scheme.requires_session_reuse() {
            self.single_pool.reset(account);
        }
        debug!(%account, scheme = ?account.auth_scheme, "account registered");
    }

    pub fn forget_account(&self, account: &AccountIdentity) {
        self.credentials.remove(account);
    }

    /// Borrows a session for `account`, logging in if none is idle.
    pub async fn borrow(
        &self,
        account: &AccountIdentity,
    ) -> Result<PooledConnection, ConnectionError> {
        let span = info_span!(parent: &self.span, "borrow", %account);
        let borrowed = if account.auth_scheme.requires_session_reuse() {
            self.single_pool.borrow(account).instrument(span).await
        } else {
            self.shared_pool.borrow(account).instrument(span).await
        };
        borrowed.map_err(ConnectionError::from)
    }

    pub fn stats(&self, account: &AccountIdentity) -> PoolStats {
        if account.auth_scheme.requires_session_reuse() {
            self.single_pool.stats(account)
        } else {
            self.shared_pool.stats(account)
        }
    }

    /// Client-side pipeline settings, before negotiation.
    pub fn pipeline(&self) -> &PipelineConfiguration {
        &self.config.pipeline
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Closes both pools and logs out every idle session.
    pub async fn shutdown(&self) {
        self.shared_pool.destroy().await;
        self.single_pool.destroy().await;
        info!("connection manager shut down");
    }
}
