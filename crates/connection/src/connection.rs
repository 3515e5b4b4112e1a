use std::fmt;
use std::sync::Arc;

use tokio::io::{AsyncWriteExt, BufStream};
use tracing::{debug, info, warn};

use gridlink_crypto::{CryptoError, NegotiatedSession, NegotiationEngine};
use gridlink_data_channel::{DataChannelError, read_control, write_control};
use gridlink_protocol::control::error_code;
use gridlink_protocol::{
    AccountIdentity, CLIENT_VERSION, ControlMessage, NegotiationOutcome, PipelineConfiguration,
};

use crate::connector::{BoxedStream, Connector};
use crate::credential::Credential;
use crate::error::ConnectionError;

/// Buffered session socket.
pub type SessionStream = BufStream<BoxedStream>;

/// One authenticated session with a storage server.
///
/// Control messages are strictly request/response. Data frames for a
/// transfer range are read and written directly on [`stream_mut`](Self::stream_mut)
/// between a `StreamRange` request and its `RangeAck`.
pub struct ServerConnection {
    account: AccountIdentity,
    stream: SessionStream,
    session: Arc<NegotiatedSession>,
    config: Arc<PipelineConfiguration>,
    poisoned: bool,
}

impl ServerConnection {
    /// Connects and runs the full session handshake.
    pub async fn open(
        account: &AccountIdentity,
        credential: &Credential,
        config: &PipelineConfiguration,
        connector: &dyn Connector,
    ) -> Result<Self, ConnectionError> {
        let raw = connector.connect(account, config.connect_timeout()).await?;
        let mut stream = buffered(raw, config);

        write_control(
            &mut stream,
            &ControlMessage::Startup {
                user_name: account.user_name.clone(),
                zone: account.zone.clone(),
                client_version: CLIENT_VERSION.to_string(),
                client_host: client_host(),
                request_negotiation: true,
            },
        )
        .await?;

        let engine = NegotiationEngine::new(config.clone());
        write_control(&mut stream, &ControlMessage::Negotiate(engine.capabilities())).await?;

        let server_caps = match read_control(&mut stream).await? {
            ControlMessage::ServerNegotiation(caps) => caps,
            other => return Err(unexpected("server_negotiation", other)),
        };

        let outcome = NegotiationOutcome::resolve(config.ssl_policy, server_caps.policy);
        write_control(&mut stream, &ControlMessage::NegotiationResult { outcome }).await?;
        let session = Arc::new(engine.negotiate(&server_caps)?);

        if session.is_ssl() {
            stream.flush().await?;
            let secured = connector.secure(stream.into_inner(), account).await?;
            stream = buffered(secured, config);

            engine.derive_key(&session)?;
            let key = session
                .export_key()
                .ok_or_else(|| CryptoError::Encryption("derived key is missing".into()))?;
            write_control(&mut stream, &ControlMessage::SharedSecret { key: key.to_vec() })
                .await?;
            expect_ok(read_control(&mut stream).await?)?;
            debug!(%account, "session key shared");
        }

        let challenge = match read_control(&mut stream).await? {
            ControlMessage::AuthChallenge { challenge } => challenge,
            other => return Err(unexpected("auth_challenge", other)),
        };
        write_control(
            &mut stream,
            &ControlMessage::AuthResponse {
                user_name: account.user_name.clone(),
                zone: account.zone.clone(),
                response: credential.respond(&challenge),
            },
        )
        .await?;

        match read_control(&mut stream).await? {
            ControlMessage::Ok => {}
            ControlMessage::Error { code, message } if code == error_code::AUTH_FAILED => {
                return Err(ConnectionError::AuthFailed(message));
            }
            other => return Err(unexpected("ok", other)),
        }

        info!(%account, ssl = session.is_ssl(), "session established");
        let effective = engine.effective_config(&session);
        Ok(Self {
            account: account.clone(),
            stream,
            session,
            config: Arc::new(effective),
            poisoned: false,
        })
    }

    pub fn account(&self) -> &AccountIdentity {
        &self.account
    }

    pub fn session(&self) -> &Arc<NegotiatedSession> {
        &self.session
    }

    /// Configuration in effect for this session, carrying the negotiated
    /// encryption parameters.
    pub fn config(&self) -> &PipelineConfiguration {
        &self.config
    }

    pub fn is_ssl(&self) -> bool {
        self.session.is_ssl()
    }

    pub async fn send(&mut self, message: &ControlMessage) -> Result<(), ConnectionError> {
        let result = write_control(&mut self.stream, message).await;
        self.track(result)
    }

    pub async fn receive(&mut self) -> Result<ControlMessage, ConnectionError> {
        let result = read_control(&mut self.stream).await;
        self.track(result)
    }

    /// Sends a request and returns the reply. A server `Error` reply becomes
    /// [`ConnectionError::Server`]; the session stays usable.
    pub async fn request(
        &mut self,
        message: &ControlMessage,
    ) -> Result<ControlMessage, ConnectionError> {
        self.send(message).await?;
        match self.receive().await? {
            ControlMessage::Error { code, message } => {
                Err(ConnectionError::Server { code, message })
            }
            reply => Ok(reply),
        }
    }

    /// Round-trips a `Ping`.
    pub async fn ping(&mut self) -> Result<(), ConnectionError> {
        match self.request(&ControlMessage::Ping).await? {
            ControlMessage::Pong => Ok(()),
            other => {
                self.poisoned = true;
                Err(unexpected("pong", other))
            }
        }
    }

    /// Raw socket for data frames.
    pub fn stream_mut(&mut self) -> &mut SessionStream {
        &mut self.stream
    }

    /// Marks the session as unusable, e.g. after a data frame error.
    pub fn poison(&mut self) {
        if !self.poisoned {
            debug!(account = %self.account, "session poisoned");
        }
        self.poisoned = true;
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    /// Says goodbye to the server and closes the socket. A poisoned session
    /// skips the `Disconnect` message.
    pub async fn shutdown(mut self) -> Result<(), ConnectionError> {
        if !self.poisoned
            && let Err(e) = write_control(&mut self.stream, &ControlMessage::Disconnect).await
        {
            warn!(account = %self.account, error = %e, "disconnect message failed");
        }
        self.stream.shutdown().await?;
        debug!(account = %self.account, "session closed");
        Ok(())
    }

    fn track<T>(&mut self, result: Result<T, DataChannelError>) -> Result<T, ConnectionError> {
        result.map_err(|e| {
            self.poisoned = true;
            ConnectionError::from(e)
        })
    }
}

impl fmt::Debug for ServerConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerConnection")
            .field("account", &self.account.to_string())
            .field("ssl", &self.session.is_ssl())
            .field("poisoned", &self.poisoned)
            .finish()
    }
}

fn buffered(stream: BoxedStream, config: &PipelineConfiguration) -> SessionStream {
    let size = config.control_buffer_size.max(1024);
    BufStream::with_capacity(size, size, stream)
}

fn client_host() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "localhost".into())
}

fn expect_ok(reply: ControlMessage) -> Result<(), ConnectionError> {
    match reply {
        ControlMessage::Ok => Ok(()),
        other => Err(unexpected("ok", other)),
    }
}

fn unexpected(wanted: &str, got: ControlMessage) -> ConnectionError {
    match got {
        ControlMessage::Error { code, message } => ConnectionError::Server { code, message },
        other => ConnectionError::Protocol(format!(
            "expected {wanted}, got {}",
            other.kind()
        )),
    }
}
