use crate::ocpp_action;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct HeartbeatRequest {}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatResponse {
    pub current_time: DateTime<Utc>,
}

impl HeartbeatResponse {
    pub fn now() -> Self {
        HeartbeatResponse {
            current_time: Utc::now(),
        }
    }
}

ocpp_action!("Heartbeat", HeartbeatRequest => HeartbeatResponse);
