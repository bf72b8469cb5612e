//! Request and response bodies for endpoint management

use crate::{EndpointId, TeamId, UserId};
use serde::{Deserialize, Serialize};

/// Request to register a new endpoint
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CreateEndpoint {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "URL")]
    pub url: String,
    #[serde(rename = "TLS", default)]
    pub tls: bool,
}

/// Identifier returned once an endpoint has been created
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CreatedEndpoint {
    #[serde(rename = "Id")]
    pub id: EndpointId,
}

/// Request to change an endpoint's address or TLS state.
///
/// Empty or missing `name`/`url` leave the current value untouched. `tls` is
/// the desired state; omitting it disables TLS.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdateEndpoint {
    #[serde(rename = "Name", default)]
    pub name: Option<String>,
    #[serde(rename = "URL", default)]
    pub url: Option<String>,
    #[serde(rename = "TLS", default)]
    pub tls: bool,
}

/// Replacement of an endpoint's access lists. A missing list is left as is,
/// a present one (even empty) replaces the stored list.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AccessUpdate {
    #[serde(rename = "AuthorizedUsers", default)]
    pub authorized_users: Option<Vec<UserId>>,
    #[serde(rename = "AuthorizedTeams", default)]
    pub authorized_teams: Option<Vec<TeamId>>,
}
