//! Response types of the request/response endpoints.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Snapshot of the API and instance state, returned by `GET /1.0`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstanceInfo {
    pub api_version: String,
    pub location: String,
    pub instance_type: String,
    pub state: String,
}

/// Devices attached to the instance: device name → device config.
pub type Devices = BTreeMap<String, BTreeMap<String, String>>;
