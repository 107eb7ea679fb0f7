//! HTTP boundary tests: request shapes, response normalization and error
//! mapping against a mock storefront API.

use assert_matches::assert_matches;
use chrono::Utc;
use serde_json::json;
use storefront_checkout::{
    backend::{
        wire::{
            CartItemPayload, OrderPayload, PaymentLinkMetadata, PaymentLinkOrder,
        },
        ConfirmPaymentRequest, CreateOrderRequest, HttpStorefrontBackend, PaymentLinkRequest,
        StorefrontBackend,
    },
    config::ApiConfig,
    errors::CheckoutError,
    models::{OrderId, PaymentMethod, PaymentStatus},
};
use wiremock::matchers::{bearer_token, body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const ORDER_ID: &str = "665f1c2b9a7e4d0012ab34cd";

async fn backend(server: &MockServer) -> HttpStorefrontBackend {
    let config = ApiConfig {
        base_url: format!("{}/api/v1", server.uri()),
        auth_token: Some("test-token".to_string()),
        request_timeout_secs: 5,
    };
    HttpStorefrontBackend::new(&config).expect("backend client")
}

fn order_request() -> CreateOrderRequest {
    CreateOrderRequest {
        order: OrderPayload {
            new_order_id: "0123456789abcdef01234567".to_string(),
            user_id: "user-42".to_string(),
            delivery_address_id: "64b7f0c2a1d3e4f5a6b7c8d9".to_string(),
            cart_items: vec![CartItemPayload {
                product_id: "tea-set".to_string(),
                quantity: 2,
                price: 300_000,
            }],
            subtotal: 600_000,
            discount: 50_000,
            shipping_fee: 0,
            total: 550_000,
            payment_method: PaymentMethod::BankTransfer,
            payment_status: PaymentStatus::Pending,
            note: None,
        },
    }
}

fn link_request() -> PaymentLinkRequest {
    PaymentLinkRequest {
        order: PaymentLinkOrder {
            order_id: ORDER_ID.to_string(),
            amount: 550_000,
            description: "ORDER 0012AB34CD".to_string(),
            items: vec![],
        },
        meta_data: PaymentLinkMetadata {
            cancel_url: "storefront://checkout/cancel".to_string(),
            return_url: "storefront://checkout/return".to_string(),
        },
    }
}

#[tokio::test]
async fn create_order_posts_camel_case_body_with_bearer_token() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/orders"))
        .and(bearer_token("test-token"))
        .and(body_partial_json(json!({
            "order": {
                "newOrderId": "0123456789abcdef01234567",
                "deliveryAddressId": "64b7f0c2a1d3e4f5a6b7c8d9",
                "shippingFee": 0,
                "total": 550000,
                "paymentMethod": "BANK_TRANSFER",
                "cartItems": [{"productId": "tea-set", "quantity": 2, "price": 300000}]
            }
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "success": true,
            "data": {"orderId": ORDER_ID}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let id = backend(&server)
        .await
        .create_order(&order_request())
        .await
        .unwrap();
    assert_eq!(id.as_str(), ORDER_ID);
}

#[tokio::test]
async fn create_order_accepts_nested_order_shape() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/orders"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "data": {"order": {"_id": ORDER_ID, "status": "pending"}}
        })))
        .mount(&server)
        .await;

    let id = backend(&server)
        .await
        .create_order(&order_request())
        .await
        .unwrap();
    assert_eq!(id.as_str(), ORDER_ID);
}

#[tokio::test]
async fn create_order_rejection_and_outage_are_distinguished() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/orders"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "success": false,
            "message": "Product tea-set is out of stock"
        })))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1/orders"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let backend = backend(&server).await;
    assert_matches!(
        backend.create_order(&order_request()).await,
        Err(CheckoutError::OrderRejected(msg)) if msg.contains("out of stock")
    );
    let outage = backend.create_order(&order_request()).await.unwrap_err();
    assert_matches!(outage, CheckoutError::Transport(_));
    assert!(outage.is_retryable());
}

#[tokio::test]
async fn unknown_order_shape_is_rejected_not_guessed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/orders"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "data": {"items": []}
        })))
        .mount(&server)
        .await;

    assert_matches!(
        backend(&server).await.create_order(&order_request()).await,
        Err(CheckoutError::UnrecognizedResponse(_))
    );
}

#[tokio::test]
async fn payment_link_is_normalized() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/payments/payment-link"))
        .and(body_partial_json(json!({
            "order": {"orderId": ORDER_ID, "amount": 550000},
            "metaData": {"returnUrl": "storefront://checkout/return"}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "data": {
                "checkoutUrl": "https://pay.example/web/abc",
                "qrCode": "00020101021238570010A000000727",
                "accountNumber": "0123456789",
                "reference": "FT24001",
                "paymentLinkId": "plink_abc",
                "counterAccountBankId": "970422",
                "counterAccountBankName": "MB Bank",
                "counterAccountName": "STOREFRONT JSC",
                "counterAccountNumber": "0123456789"
            }
        })))
        .mount(&server)
        .await;

    let reference = backend(&server)
        .await
        .create_payment_link(&link_request())
        .await
        .unwrap();
    assert_eq!(reference.payment_url.as_deref(), Some("https://pay.example/web/abc"));
    assert_eq!(reference.amount, 550_000);
    assert_eq!(reference.description, "ORDER 0012AB34CD");
    assert_eq!(reference.order_code, 0x4d0012ab34cd);
    assert_eq!(reference.counter_account.bank_name.as_deref(), Some("MB Bank"));
}

#[tokio::test]
async fn payment_status_reads_either_field_name() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("/api/v1/payments/status/{}", ORDER_ID)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "data": {"order": {"status": "PAID", "amount": 550000}}
        })))
        .mount(&server)
        .await;

    let status = backend(&server)
        .await
        .payment_status(&OrderId::new(ORDER_ID))
        .await
        .unwrap();
    assert_eq!(status.status, "PAID");
    assert_eq!(status.amount, Some(550_000));
}

#[tokio::test]
async fn confirm_payment_uses_code_envelope() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/payments/confirm"))
        .and(body_partial_json(json!({
            "orderId": ORDER_ID,
            "orderCode": 42,
            "currency": "VND",
            "paymentMethod": "BANK_TRANSFER"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": "00",
            "desc": "success",
            "data": {"orderCode": 42}
        })))
        .mount(&server)
        .await;

    let request = ConfirmPaymentRequest {
        order_id: ORDER_ID.to_string(),
        order_code: 42,
        amount: 550_000,
        currency: "VND".to_string(),
        payment_method: PaymentMethod::BankTransfer,
        account_number: "0123456789".to_string(),
        reference: "FT24001".to_string(),
        description: "ORDER 0012AB34CD".to_string(),
        transaction_date_time: Utc::now(),
    };
    let ack = backend(&server)
        .await
        .confirm_payment(&request)
        .await
        .unwrap();
    assert_eq!(ack.code.as_deref(), Some("00"));
}

#[tokio::test]
async fn non_json_body_is_unrecognized() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("/api/v1/payments/status/{}", ORDER_ID)))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
        .mount(&server)
        .await;

    assert_matches!(
        backend(&server)
            .await
            .payment_status(&OrderId::new(ORDER_ID))
            .await,
        Err(CheckoutError::UnrecognizedResponse(_))
    );
}
