//! Endpoint records and identifiers

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Identifier assigned to an endpoint by the record store
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EndpointId(pub u64);

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for EndpointId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(EndpointId)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub u64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TeamId(pub u64);

impl fmt::Display for TeamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One of the three mutual-TLS credential files kept per endpoint
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TlsFileKind {
    /// CA certificate used to verify the daemon
    Ca,
    /// Client certificate presented to the daemon
    Cert,
    /// Private key for the client certificate
    Key,
}

impl TlsFileKind {
    pub const ALL: [TlsFileKind; 3] = [TlsFileKind::Ca, TlsFileKind::Cert, TlsFileKind::Key];

    /// File name used when the material is stored on disk
    pub fn file_name(&self) -> &'static str {
        match self {
            TlsFileKind::Ca => "ca.pem",
            TlsFileKind::Cert => "cert.pem",
            TlsFileKind::Key => "key.pem",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TlsFileKind::Ca => "ca",
            TlsFileKind::Cert => "cert",
            TlsFileKind::Key => "key",
        }
    }
}

impl fmt::Display for TlsFileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, PartialEq)]
#[error("Unknown TLS file kind: {0}")]
pub struct UnknownTlsFileKind(pub String);

impl FromStr for TlsFileKind {
    type Err = UnknownTlsFileKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ca" => Ok(TlsFileKind::Ca),
            "cert" => Ok(TlsFileKind::Cert),
            "key" => Ok(TlsFileKind::Key),
            other => Err(UnknownTlsFileKind(other.to_string())),
        }
    }
}

/// A registered container-runtime daemon
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Endpoint {
    #[serde(rename = "Id")]
    pub id: EndpointId,
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "URL")]
    pub url: String,
    #[serde(rename = "TLS")]
    pub tls: bool,
    #[serde(rename = "TLSCACert", default)]
    pub tls_ca_cert_path: String,
    #[serde(rename = "TLSCert", default)]
    pub tls_cert_path: String,
    #[serde(rename = "TLSKey", default)]
    pub tls_key_path: String,
    /// Users allowed to see this endpoint. Empty means nobody individually.
    #[serde(rename = "AuthorizedUsers", default)]
    pub authorized_users: Vec<UserId>,
    /// Teams allowed to see this endpoint. Empty means no team.
    #[serde(rename = "AuthorizedTeams", default)]
    pub authorized_teams: Vec<TeamId>,
}

impl Endpoint {
    /// Build an unsaved record; the store assigns the real id on insert.
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: EndpointId(0),
            name: name.into(),
            url: url.into(),
            tls: false,
            tls_ca_cert_path: String::new(),
            tls_cert_path: String::new(),
            tls_key_path: String::new(),
            authorized_users: Vec::new(),
            authorized_teams: Vec::new(),
        }
    }

    /// Path recorded for one credential slot (empty when unset)
    pub fn credential_path(&self, kind: TlsFileKind) -> &str {
        match kind {
            TlsFileKind::Ca => &self.tls_ca_cert_path,
            TlsFileKind::Cert => &self.tls_cert_path,
            TlsFileKind::Key => &self.tls_key_path,
        }
    }

    pub fn set_credential_path(&mut self, kind: TlsFileKind, path: String) {
        match kind {
            TlsFileKind::Ca => self.tls_ca_cert_path = path,
            TlsFileKind::Cert => self.tls_cert_path = path,
            TlsFileKind::Key => self.tls_key_path = path,
        }
    }

    /// Turn TLS off and forget every credential path
    pub fn clear_credentials(&mut self) {
        self.tls = false;
        self.tls_ca_cert_path.clear();
        self.tls_cert_path.clear();
        self.tls_key_path.clear();
    }

    /// True when the TLS flag agrees with the credential paths: all three set
    /// when TLS is on, none set when it is off.
    pub fn credentials_consistent(&self) -> bool {
        let set = TlsFileKind::ALL
            .iter()
            .filter(|kind| !self.credential_path(**kind).is_empty())
            .count();
        if self.tls {
            set == TlsFileKind::ALL.len()
        } else {
            set == 0
        }
    }
}
