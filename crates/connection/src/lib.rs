//! Authenticated server sessions for gridlink.
//!
//! [`ServerConnection::open`] runs the session handshake (startup, SSL
//! negotiation, optional key exchange, challenge/response login).
//! [`ConnectionManager`] pools those sessions per account, sharing a single
//! session for accounts whose credential can only be used once.

mod connection;
mod connector;
mod credential;
mod error;
mod factory;
mod manager;

pub use connection::{ServerConnection, SessionStream};
pub use connector::{AsyncStream, BoxedStream, Connector, TcpConnector};
pub use credential::{Credential, CredentialStore};
pub use error::ConnectionError;
pub use factory::{LivenessProbe, ServerConnectionFactory};
pub use manager::{ConnectionManager, PooledConnection};
