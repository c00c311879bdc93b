use ocpp_dispatch::ocpp_frame::Value;
use ocpp_dispatch::{OcppRequest, OcppResponse, ParseContext};
use serde::{Deserialize, Serialize};

const MAX_VENDOR_ID_LEN: usize = 255;
const MAX_MESSAGE_ID_LEN: usize = 50;

/// Vendor specific payload, `data` is opaque JSON.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DataTransferRequest {
    pub vendor_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DataTransferResponse {
    pub status: DataTransferStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

#[derive(Serialize, Deserialize, Copy, Clone, Debug, PartialEq, Eq)]
pub enum DataTransferStatus {
    Accepted,
    Rejected,
    UnknownMessageId,
    UnknownVendorId,
}

impl OcppRequest for DataTransferRequest {
    const ACTION: &'static str = "DataTransfer";
    type Response = DataTransferResponse;

    fn try_parse(payload: &Value, _context: &ParseContext<'_>) -> Result<Self, String> {
        let request = Self::deserialize(payload).map_err(|e| e.to_string())?;
        if request.vendor_id.is_empty() || request.vendor_id.len() > MAX_VENDOR_ID_LEN {
            return Err(format!(
                "vendorId must be 1..={MAX_VENDOR_ID_LEN} characters long"
            ));
        }
        if request
            .message_id
            .as_ref()
            .is_some_and(|id| id.len() > MAX_MESSAGE_ID_LEN)
        {
            return Err(format!(
                "messageId must be at most {MAX_MESSAGE_ID_LEN} characters long"
            ));
        }
        Ok(request)
    }
}

impl OcppResponse for DataTransferResponse {}
