//! Payload types of a few OCPP 2.0.1 actions, enough to run a charging station handshake.
//!
//! The dispatch core never looks inside them, it only parses and serializes them through
//! [OcppRequest] and [OcppResponse].

mod boot_notification;
mod data_transfer;
mod heartbeat;
mod reset;

pub use boot_notification::{
    BootNotificationRequest, BootNotificationResponse, BootReason, ChargingStation,
    RegistrationStatus,
};
pub use data_transfer::{DataTransferRequest, DataTransferResponse, DataTransferStatus};
pub use heartbeat::{HeartbeatRequest, HeartbeatResponse};
pub use reset::{ResetRequest, ResetResponse, ResetStatus, ResetType};

pub use ocpp_dispatch::{OcppRequest, OcppResponse};

/// Binds a request type to its action name and response type, using the serde based codec.
macro_rules! ocpp_action {
    ($action:literal, $request:ty => $response:ty) => {
        impl $crate::OcppRequest for $request {
            const ACTION: &'static str = $action;
            type Response = $response;
        }

        impl $crate::OcppResponse for $response {}
    };
}
pub(crate) use ocpp_action;

/// Parses back what `to_json` produced for both halves of an action.
#[cfg(test)]
pub(crate) fn round_trip<T: OcppRequest>(request: &T, response: &T::Response) -> (T, T::Response) {
    use ocpp_dispatch::ParseContext;
    use ocpp_dispatch::ocpp_frame::{NetworkPath, NodeId, RequestId};

    let context = ParseContext {
        request_id: &RequestId::from("R1"),
        destination: &NodeId::from("CSMS"),
        path: &NetworkPath::new(NodeId::from("CP1")),
    };
    let request = T::try_parse(&request.to_json(), &context).unwrap();
    let response = T::Response::try_parse(&response.to_json()).unwrap();
    (request, response)
}
