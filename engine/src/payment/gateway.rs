//! Sandbox card gateway for local runs.
//!
//! Every payment is accepted. Outcomes still arrive as signed webhook events,
//! which the caller delivers with [`sign_event`](super::webhook::sign_event).

use ferry_core::environment::{
    BoxFuture, GatewayError, GatewayInitiation, GatewayRequest, PaymentGateway,
};
use ferry_core::types::Money;
use std::sync::Arc;

/// Gateway that accepts every payment (always succeeds for development)
#[derive(Clone, Debug)]
pub struct SandboxGateway {
    checkout_base: String,
}

impl SandboxGateway {
    /// Creates a sandbox gateway redirecting to `checkout_base`
    #[must_use]
    pub fn new(checkout_base: impl Into<String>) -> Self {
        Self {
            checkout_base: checkout_base.into(),
        }
    }

    /// Creates an Arc-wrapped instance for sharing
    #[must_use]
    pub fn shared() -> Arc<dyn PaymentGateway> {
        Arc::new(Self::default())
    }
}

impl Default for SandboxGateway {
    fn default() -> Self {
        Self::new("https://sandbox.gateway.local/checkout")
    }
}

impl PaymentGateway for SandboxGateway {
    fn initiate(
        &self,
        request: GatewayRequest,
    ) -> BoxFuture<'_, Result<GatewayInitiation, GatewayError>> {
        Box::pin(async move {
            let gateway_ref = format!("sbx_{}", uuid::Uuid::new_v4().simple());

            tracing::info!(
                booking_id = %request.booking_id,
                amount = request.amount.cents(),
                currency = %request.currency,
                gateway_ref = %gateway_ref,
                "Sandbox payment initiated"
            );

            Ok(GatewayInitiation {
                redirect_url: Some(format!("{}/{gateway_ref}", self.checkout_base)),
                gateway_ref,
            })
        })
    }

    fn capture<'a>(
        &'a self,
        gateway_ref: &'a str,
        amount: Money,
    ) -> BoxFuture<'a, Result<(), GatewayError>> {
        Box::pin(async move {
            tracing::info!(
                gateway_ref = %gateway_ref,
                amount = amount.cents(),
                "Sandbox payment captured"
            );
            Ok(())
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use ferry_core::types::{BookingId, Currency};

    #[tokio::test]
    async fn test_sandbox_initiate_and_capture() {
        let gateway = SandboxGateway::new("https://pay.example");

        let initiation = gateway
            .initiate(GatewayRequest {
                booking_id: BookingId::new(),
                amount: Money::from_cents(12_000),
                currency: Currency::mvr(),
                description: "Booking ABC234".to_string(),
            })
            .await
            .unwrap();

        assert!(initiation.gateway_ref.starts_with("sbx_"));
        assert_eq!(
            initiation.redirect_url.as_deref(),
            Some(format!("https://pay.example/{}", initiation.gateway_ref).as_str())
        );
        assert!(gateway.capture(&initiation.gateway_ref, Money::from_cents(12_000)).await.is_ok());
    }
}
