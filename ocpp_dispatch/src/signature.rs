use ocpp_frame::{NodeId, RequestId, Value};

/// What a signature policy gets to know about the message besides its JSON.
#[derive(Copy, Clone, Debug)]
pub struct MessageInfo<'a> {
    pub action: &'a str,
    pub request_id: &'a RequestId,
    /// Node that originated the message.
    pub source: &'a NodeId,
}

/// Pluggable authenticity gate for requests and responses.
///
/// Verification failures are reported as `Err(description)` and never panic, callers branch on
/// the result. Signing may add signature material to the payload in place.
/// Implementations are shared between all concurrently processed messages and must not keep
/// per-message state.
pub trait SignaturePolicy: Send + Sync {
    fn verify_request(&self, info: &MessageInfo<'_>, payload: &Value) -> Result<(), String>;

    fn verify_response(&self, info: &MessageInfo<'_>, payload: &Value) -> Result<(), String>;

    fn sign_request(&self, info: &MessageInfo<'_>, payload: &mut Value) -> Result<(), String>;

    fn sign_response(&self, info: &MessageInfo<'_>, payload: &mut Value) -> Result<(), String>;
}

/// Accepts everything and signs nothing.
#[derive(Copy, Clone, Debug, Default)]
pub struct NoSignatures;

impl SignaturePolicy for NoSignatures {
    fn verify_request(&self, _info: &MessageInfo<'_>, _payload: &Value) -> Result<(), String> {
        Ok(())
    }

    fn verify_response(&self, _info: &MessageInfo<'_>, _payload: &Value) -> Result<(), String> {
        Ok(())
    }

    fn sign_request(&self, _info: &MessageInfo<'_>, _payload: &mut Value) -> Result<(), String> {
        Ok(())
    }

    fn sign_response(&self, _info: &MessageInfo<'_>, _payload: &mut Value) -> Result<(), String> {
        Ok(())
    }
}
