//! Origin identity and addressing.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Arc<str>);

        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(Arc::from(value))
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(Arc::from(value))
            }
        }
    };
}

string_id!(
    /// Identifies a backend application (a group of interchangeable origins).
    AppId
);

string_id!(
    /// Identifies one origin within an application. Stable across host migrations.
    OriginId
);

/// TLS settings for connecting to an origin.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TlsSettings {
    pub trust_all_certs: bool,
    pub sni_host: Option<String>,
    pub protocols: Vec<String>,
}

/// One backend host instance of an application.
///
/// Equality is structural: the same id with a different host or port is a
/// different value, which the inventory treats as an update.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Origin {
    app_id: AppId,
    id: OriginId,
    host: String,
    port: u16,
    tls: Option<TlsSettings>,
}

impl Origin {
    pub fn new(
        app_id: impl Into<AppId>,
        id: impl Into<OriginId>,
        host: impl Into<String>,
        port: u16,
    ) -> Self {
        Self {
            app_id: app_id.into(),
            id: id.into(),
            host: host.into(),
            port,
            tls: None,
        }
    }

    pub fn with_tls(mut self, tls: TlsSettings) -> Self {
        self.tls = Some(tls);
        self
    }

    pub fn app_id(&self) -> &AppId {
        &self.app_id
    }

    pub fn id(&self) -> &OriginId {
        &self.id
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn tls(&self) -> Option<&TlsSettings> {
        self.tls.as_ref()
    }

    /// Returns "host:port", bracketing IPv6 literals.
    pub fn host_and_port(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// Rejects origin sets that reuse an id or a host:port pair.
    pub fn check_distinct<'a, I>(origins: I) -> Result<(), ConfigError>
    where
        I: IntoIterator<Item = &'a Origin>,
    {
        let mut ids = HashSet::new();
        let mut addresses = HashSet::new();

        for origin in origins {
            if !ids.insert(origin.id.clone()) {
                return Err(ConfigError::InvalidOrigins(format!(
                    "duplicate origin id '{}'",
                    origin.id
                )));
            }
            if !addresses.insert(origin.host_and_port()) {
                return Err(ConfigError::InvalidOrigins(format!(
                    "duplicate host and port '{}'",
                    origin.host_and_port()
                )));
            }
        }
        Ok(())
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.app_id, self.id, self.host_and_port())
    }
}
