use crate::ocpp_action;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BootNotificationRequest {
    pub charging_station: ChargingStation,
    pub reason: BootReason,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChargingStation {
    pub model: String,
    pub vendor_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serial_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub firmware_version: Option<String>,
}

#[derive(Serialize, Deserialize, Copy, Clone, Debug, PartialEq, Eq)]
pub enum BootReason {
    ApplicationReset,
    FirmwareUpdate,
    LocalReset,
    PowerUp,
    RemoteReset,
    ScheduledReset,
    Triggered,
    Unknown,
    Watchdog,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BootNotificationResponse {
    pub current_time: DateTime<Utc>,
    /// Heartbeat interval in seconds if accepted, retry interval otherwise.
    pub interval: u32,
    pub status: RegistrationStatus,
}

#[derive(Serialize, Deserialize, Copy, Clone, Debug, PartialEq, Eq)]
pub enum RegistrationStatus {
    Accepted,
    Pending,
    Rejected,
}

ocpp_action!("BootNotification", BootNotificationRequest => BootNotificationResponse);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{OcppResponse, round_trip};
    use serde_json::json;

    #[test]
    fn wire_shape() {
        let request: BootNotificationRequest = serde_json::from_value(json!({
            "chargingStation": {"model": "SingleSocketCharger", "vendorName": "VendorX"},
            "reason": "PowerUp"
        }))
        .unwrap();
        assert_eq!(request.charging_station.serial_number, None);
        assert_eq!(request.reason, BootReason::PowerUp);

        let response = BootNotificationResponse::try_parse(&json!({
            "currentTime": "2026-01-02T03:04:05Z",
            "interval": 300,
            "status": "Accepted"
        }))
        .unwrap();
        assert_eq!(response.status, RegistrationStatus::Accepted);
        assert_eq!(response.to_json()["currentTime"], json!("2026-01-02T03:04:05Z"));
    }

    #[test]
    fn boot_notification_round_trip() {
        let request = BootNotificationRequest {
            charging_station: ChargingStation {
                model: "SingleSocketCharger".into(),
                vendor_name: "VendorX".into(),
                serial_number: Some("SN-0001".into()),
                firmware_version: Some("1.2.3".into()),
            },
            reason: BootReason::Watchdog,
        };
        let response = BootNotificationResponse {
            current_time: Utc::now(),
            interval: 60,
            status: RegistrationStatus::Pending,
        };
        assert_eq!(
            round_trip(&request, &response),
            (request.clone(), response.clone())
        );
    }
}
