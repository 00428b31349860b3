//! Gateway webhook signatures.
//!
//! The signature is the hex HMAC-SHA256 of the event's fields, sorted by key
//! and joined as `key=value` pairs separated by `&`:
//!
//! ```text
//! gatewayRef=sbx_4f1c...&status=CAPTURED
//! ```
//!
//! Values containing `&` or `=` are refused, so two different events can
//! never share a canonical message.

use crate::metrics;
use crate::signing;
use ferry_core::error::{EngineError, EngineResult};
use ferry_core::payment::GatewayEvent;
use std::collections::BTreeMap;

/// Canonical message for a set of fields
///
/// # Errors
///
/// Returns [`EngineError::Validation`] if a value contains `&` or `=`.
pub fn canonical_string(fields: &BTreeMap<&str, &str>) -> EngineResult<String> {
    if let Some((key, _)) = fields.iter().find(|(_, value)| value.contains(['&', '='])) {
        return Err(EngineError::Validation(format!(
            "webhook field '{key}' contains a reserved character"
        )));
    }
    Ok(fields
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join("&"))
}

/// Builds a correctly signed event, as the gateway would send it
///
/// # Errors
///
/// Returns [`EngineError::Validation`] if the key is rejected or a field
/// contains a reserved character.
pub fn sign_event(secret: &str, gateway_ref: &str, status: &str) -> EngineResult<GatewayEvent> {
    let mut event = GatewayEvent {
        gateway_ref: gateway_ref.to_string(),
        status: status.to_string(),
        signature: String::new(),
    };
    event.signature = signing::sign_hex(secret, canonical_string(&event.signed_fields())?.as_bytes())?;
    Ok(event)
}

/// Checks an event's signature
///
/// # Errors
///
/// Returns [`EngineError::InvalidSignature`] on mismatch. The rejection is
/// logged and counted as an alert. Returns [`EngineError::Validation`] for
/// fields with reserved characters.
pub fn verify_event(secret: &str, event: &GatewayEvent) -> EngineResult<()> {
    let message = canonical_string(&event.signed_fields()).inspect_err(|_| {
        metrics::record_gateway_event("rejected");
    })?;
    if signing::verify_hex(secret, message.as_bytes(), &event.signature) {
        return Ok(());
    }
    tracing::error!(
        gateway_ref = %event.gateway_ref,
        status = %event.status,
        "ALERT: gateway webhook signature mismatch"
    );
    metrics::record_alert("webhook_signature");
    metrics::record_gateway_event("rejected");
    Err(EngineError::InvalidSignature { context: "gateway webhook" })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_string_sorts_keys() {
        let fields = BTreeMap::from([("status", "AUTHORIZED"), ("gatewayRef", "ref-9")]);
        assert_eq!(canonical_string(&fields).unwrap(), "gatewayRef=ref-9&status=AUTHORIZED");
    }

    #[test]
    fn test_reserved_characters_cannot_forge_a_field() {
        let smuggled = BTreeMap::from([("gatewayRef", "a&status=X"), ("status", "Y")]);
        let honest = BTreeMap::from([("gatewayRef", "a"), ("status", "X&status=Y")]);
        assert!(matches!(canonical_string(&smuggled), Err(EngineError::Validation(_))));
        assert!(matches!(canonical_string(&honest), Err(EngineError::Validation(_))));

        assert!(sign_event("whsec", "a&status=X", "Y").is_err());
        let event = GatewayEvent {
            gateway_ref: "a&status=X".to_string(),
            status: "Y".to_string(),
            signature: signing::sign_hex("whsec", b"gatewayRef=a&status=X&status=Y").unwrap(),
        };
        assert!(matches!(verify_event("whsec", &event), Err(EngineError::Validation(_))));
    }

    #[test]
    fn test_tampered_status_fails_verification() {
        let mut event = sign_event("whsec", "ref-9", "FAILED").unwrap();
        assert!(verify_event("whsec", &event).is_ok());

        event.status = "CAPTURED".to_string();
        assert_eq!(
            verify_event("whsec", &event),
            Err(EngineError::InvalidSignature { context: "gateway webhook" })
        );
    }
}
