use std::fmt;

use serde::{Deserialize, Serialize};

/// How an account proves its identity to the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum AuthScheme {
    #[default]
    #[serde(rename = "standard")]
    Standard,
    #[serde(rename = "pam")]
    Pam,
    /// A credential the server accepts exactly once.
    #[serde(rename = "one_time_password")]
    OneTimePassword,
}

impl AuthScheme {
    /// Returns `true` when a second connection cannot be authenticated with
    /// the same credential, so the first session has to be shared.
    pub fn requires_session_reuse(self) -> bool {
        matches!(self, AuthScheme::OneTimePassword)
    }
}

/// Who and where to connect. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountIdentity {
    pub host: String,
    pub port: u16,
    pub zone: String,
    pub user_name: String,
    #[serde(default)]
    pub auth_scheme: AuthScheme,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub default_resource: String,
    pub home_directory: String,
}

impl AccountIdentity {
    /// Creates a standard account with the conventional home directory
    /// `/{zone}/home/{user}`.
    pub fn new(
        host: impl Into<String>,
        port: u16,
        user_name: impl Into<String>,
        zone: impl Into<String>,
    ) -> Self {
        let user_name = user_name.into();
        let zone = zone.into();
        let home_directory = format!("/{zone}/home/{user_name}");
        Self {
            host: host.into(),
            port,
            zone,
            user_name,
            auth_scheme: AuthScheme::Standard,
            default_resource: String::new(),
            home_directory,
        }
    }

    pub fn with_auth_scheme(mut self, scheme: AuthScheme) -> Self {
        self.auth_scheme = scheme;
        self
    }

    pub fn with_default_resource(mut self, resource: impl Into<String>) -> Self {
        self.default_resource = resource.into();
        self
    }

    pub fn with_home_directory(mut self, home: impl Into<String>) -> Self {
        self.home_directory = home.into();
        self
    }

    /// `host:port` suitable for socket address resolution.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for AccountIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}@{}:{}", self.user_name, self.zone, self.host, self.port)
    }
}
