use async_trait::async_trait;
use reqwest::{Client, Method, Response, StatusCode};
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, instrument, warn};
use url::Url;

use super::{
    wire::{
        self, ApiEnvelope, ConfirmPaymentRequest, CreateOrderRequest, Operation,
        PaymentConfirmation, PaymentLinkRequest,
    },
    StorefrontBackend,
};
use crate::{
    config::ApiConfig,
    errors::CheckoutError,
    models::{OrderId, PayableReference, RemotePaymentStatus},
    services::payments::payment_link::derive_order_code,
};

const ORDERS_PATH: &str = "orders";
const PAYMENT_LINK_PATH: &str = "payments/payment-link";
const PAYMENT_STATUS_PATH: &str = "payments/status/";
const CONFIRM_PAYMENT_PATH: &str = "payments/confirm";

/// `reqwest` implementation of [`StorefrontBackend`].
#[derive(Clone)]
pub struct HttpStorefrontBackend {
    client: Client,
    base_url: Url,
    auth_token: Option<String>,
}

impl HttpStorefrontBackend {
    pub fn new(config: &ApiConfig) -> Result<Self, CheckoutError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        Self::with_client(client, &config.base_url, config.auth_token.clone())
    }

    pub fn with_client(
        client: Client,
        base_url: &str,
        auth_token: Option<String>,
    ) -> Result<Self, CheckoutError> {
        // Url::join drops the last segment unless the base ends with '/'
        let normalized = if base_url.ends_with('/') {
            base_url.to_string()
        } else {
            format!("{}/", base_url)
        };
        let base_url = Url::parse(&normalized)
            .map_err(|e| CheckoutError::Validation(format!("invalid backend url: {}", e)))?;
        Ok(Self {
            client,
            base_url,
            auth_token,
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, CheckoutError> {
        self.base_url
            .join(path)
            .map_err(|e| CheckoutError::Validation(format!("invalid endpoint {}: {}", path, e)))
    }

    async fn call<B: Serialize + ?Sized>(
        &self,
        operation: Operation,
        method: Method,
        url: Url,
        body: Option<&B>,
    ) -> Result<ApiEnvelope, CheckoutError> {
        let mut request = self.client.request(method, url);
        if let Some(token) = &self.auth_token {
            request = request.bearer_auth(token);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(|e| {
            warn!(%operation, error = %e, "backend request failed");
            CheckoutError::from(e)
        })?;
        Self::read_envelope(operation, response).await
    }

    async fn read_envelope(
        operation: Operation,
        response: Response,
    ) -> Result<ApiEnvelope, CheckoutError> {
        let status = response.status();
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            warn!(%operation, %status, "backend unavailable");
            return Err(CheckoutError::Transport(format!(
                "{} returned {}",
                operation, status
            )));
        }

        let bytes = response.bytes().await?;
        debug!(%operation, %status, body_len = bytes.len(), "backend responded");

        match serde_json::from_slice::<ApiEnvelope>(&bytes) {
            Ok(envelope) if status.is_client_error() => {
                // A 4xx is a refusal even when the body forgets to say so
                Err(operation.rejected(envelope.failure_message()))
            }
            Ok(envelope) => Ok(envelope),
            Err(_) if status.is_client_error() => Err(operation.rejected(format!(
                "{} returned {}",
                operation, status
            ))),
            Err(e) => Err(CheckoutError::UnrecognizedResponse(format!(
                "{} response is not a JSON envelope: {}",
                operation, e
            ))),
        }
    }
}

#[async_trait]
impl StorefrontBackend for HttpStorefrontBackend {
    #[instrument(skip(self, request), fields(new_order_id = %request.order.new_order_id))]
    async fn create_order(&self, request: &CreateOrderRequest) -> Result<OrderId, CheckoutError> {
        let url = self.endpoint(ORDERS_PATH)?;
        let envelope = self
            .call(Operation::CreateOrder, Method::POST, url, Some(request))
            .await?;
        wire::normalize_order_created(envelope)
    }

    #[instrument(skip(self, request), fields(order_id = %request.order.order_id))]
    async fn create_payment_link(
        &self,
        request: &PaymentLinkRequest,
    ) -> Result<PayableReference, CheckoutError> {
        let url = self.endpoint(PAYMENT_LINK_PATH)?;
        let envelope = self
            .call(Operation::CreatePaymentLink, Method::POST, url, Some(request))
            .await?;
        let fallback_code = derive_order_code(&OrderId::new(request.order.order_id.clone()));
        wire::normalize_payment_link(envelope, request, fallback_code)
    }

    #[instrument(skip(self))]
    async fn payment_status(
        &self,
        order_id: &OrderId,
    ) -> Result<RemotePaymentStatus, CheckoutError> {
        let url = self.endpoint(&format!("{}{}", PAYMENT_STATUS_PATH, order_id))?;
        let envelope = self
            .call::<()>(Operation::PaymentStatus, Method::GET, url, None)
            .await?;
        wire::normalize_payment_status(envelope)
    }

    #[instrument(skip(self, request), fields(order_id = %request.order_id))]
    async fn confirm_payment(
        &self,
        request: &ConfirmPaymentRequest,
    ) -> Result<PaymentConfirmation, CheckoutError> {
        let url = self.endpoint(CONFIRM_PAYMENT_PATH)?;
        let envelope = self
            .call(Operation::ConfirmPayment, Method::POST, url, Some(request))
            .await?;
        wire::normalize_confirmation(envelope)
    }
}
