use crate::ocpp_action;
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ResetRequest {
    #[serde(rename = "type")]
    pub kind: ResetType,
    /// Reset only this EVSE instead of the whole charging station.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evse_id: Option<u32>,
}

#[derive(Serialize, Deserialize, Copy, Clone, Debug, PartialEq, Eq)]
pub enum ResetType {
    Immediate,
    OnIdle,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ResetResponse {
    pub status: ResetStatus,
}

#[derive(Serialize, Deserialize, Copy, Clone, Debug, PartialEq, Eq)]
pub enum ResetStatus {
    Accepted,
    Rejected,
    Scheduled,
}

ocpp_action!("Reset", ResetRequest => ResetResponse);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{OcppRequest, round_trip};
    use serde_json::json;

    #[test]
    fn reset_round_trip() {
        let request = ResetRequest {
            kind: ResetType::OnIdle,
            evse_id: Some(2),
        };
        assert_eq!(request.to_json(), json!({"type": "OnIdle", "evseId": 2}));
        let response = ResetResponse {
            status: ResetStatus::Scheduled,
        };
        assert_eq!(round_trip(&request, &response), (request, response));

        let whole_station = ResetRequest {
            kind: ResetType::Immediate,
            evse_id: None,
        };
        assert_eq!(whole_station.to_json(), json!({"type": "Immediate"}));
        let rejected = ResetResponse {
            status: ResetStatus::Rejected,
        };
        assert_eq!(
            round_trip(&whole_station, &rejected),
            (whole_station, rejected)
        );
    }
}
