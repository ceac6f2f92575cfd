// SPDX-License-Identifier: MIT

//! Client-side contract for the rooter: a separate privileged service
//! that applies/tears down network routes for a task's guest traffic.
//! Only the request/reply shapes are modeled here — the rooter itself
//! (VPN pools, iptables manipulation) is a distinct, privileged service
//! out of this node's scope.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplyRouteRequest {
    pub ip: String,
    #[serde(rename = "type")]
    pub route_type: String,
    #[serde(default)]
    pub options: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteReply {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Opaque handle the caller must present to `disable_route` later.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handle: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisableRouteRequest {
    pub handle: String,
}
