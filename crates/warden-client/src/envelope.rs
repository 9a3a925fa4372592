//! Decoding of the daemon's uniform reply envelope.
//!
//! Numbers keep full precision (the serde_json `arbitrary_precision` path)
//! and `result` is retained raw so each operation decodes it into its own
//! type on demand.  Decode failures carry the offending bytes.

use serde::de::DeserializeOwned;
use serde_json::value::RawValue;
use warden_protocol::{Envelope, WireError};

use crate::error::{ClientError, ServerError};

/// How much of an undecodable body makes it into the error message.
const BODY_SNIPPET_LIMIT: usize = 1024;

fn snippet(body: &[u8]) -> String {
    String::from_utf8_lossy(&body[..body.len().min(BODY_SNIPPET_LIMIT)]).into_owned()
}

/// Parse a reply body as an [`Envelope`].  Trailing content after the
/// top-level JSON value is a decode failure, not ignored.
pub(crate) fn parse_envelope(body: &[u8]) -> Result<Envelope, ClientError> {
    serde_json::from_slice(body).map_err(|e| {
        ClientError::ProtocolShape(format!(
            "cannot decode response envelope: {e} (body: {:?})",
            snippet(body)
        ))
    })
}

/// Lift an `error` envelope into the typed server error.  An error without a
/// message is rejected here, at the envelope boundary.
pub(crate) fn lift_error(env: &Envelope, http_status: u16) -> ClientError {
    let status = if env.status_code != 0 {
        env.status_code
    } else {
        http_status
    };
    let Some(raw) = env.result.as_deref() else {
        return ClientError::ProtocolShape("error response without result".to_owned());
    };
    match serde_json::from_str::<WireError>(raw.get()) {
        Ok(wire) if !wire.message.is_empty() => {
            ClientError::Server(ServerError::from_wire(wire, status))
        }
        Ok(_) => ClientError::ProtocolShape("error response with empty message".to_owned()),
        Err(e) => ClientError::ProtocolShape(format!(
            "cannot decode error response: {e} (body: {:?})",
            snippet(raw.get().as_bytes())
        )),
    }
}

/// Decode a sync/async `result` into `T`, naming the operation on failure.
pub(crate) fn decode_result<T: DeserializeOwned>(
    result: Option<&RawValue>,
    what: &str,
) -> Result<T, ClientError> {
    let raw = result.ok_or_else(|| {
        ClientError::ProtocolShape(format!("response for {what} has no result"))
    })?;
    serde_json::from_str(raw.get()).map_err(|e| {
        ClientError::ProtocolShape(format!(
            "cannot decode {what}: {e} (body: {:?})",
            snippet(raw.get().as_bytes())
        ))
    })
}
