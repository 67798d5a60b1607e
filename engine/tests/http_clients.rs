//! reqwest-backed provider clients against a mock HTTP server.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use serde_json::json;
use slotledger_engine::providers::ProviderError;
use slotledger_engine::providers::paypal_api::{HttpPayPalApi, Money, PayPalApi};
use slotledger_engine::providers::stripe_api::{HttpStripeApi, StripeApi};
use slotledger_testing::fixtures;
use wiremock::matchers::{body_string_contains, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn paypal(server: &MockServer) -> HttpPayPalApi {
    HttpPayPalApi::new(reqwest::Client::new(), server.uri(), server.uri())
}

fn stripe(server: &MockServer) -> HttpStripeApi {
    HttpStripeApi::new(reqwest::Client::new(), server.uri())
}

async fn mount_token(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/v1/oauth2/token"))
        .and(body_string_contains("grant_type=client_credentials"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "A21",
            "token_type": "Bearer",
            "expires_in": 32400
        })))
        .expect(1)
        .mount(server)
        .await;
}

#[tokio::test]
async fn paypal_token_is_cached_across_calls() {
    let server = MockServer::start().await;
    mount_token(&server).await;
    Mock::given(method("GET"))
        .and(path("/v2/checkout/orders/ORD1"))
        .and(header("authorization", "Bearer A21"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "ORD1",
            "status": "COMPLETED",
            "purchase_units": []
        })))
        .expect(2)
        .mount(&server)
        .await;

    let api = paypal(&server);
    let merchant = fixtures::paypal_merchant("M1");
    let first = api.get_order(&merchant, "ORD1").await.unwrap();
    let second = api.get_order(&merchant, "ORD1").await.unwrap();

    assert_eq!(first.id, "ORD1");
    assert_eq!(second.status, "COMPLETED");
}

#[tokio::test]
async fn paypal_verification_failure_is_false() {
    let server = MockServer::start().await;
    mount_token(&server).await;
    Mock::given(method("POST"))
        .and(path("/v1/notifications/verify-webhook-signature"))
        .and(body_string_contains("\"webhook_id\":\"WH-1\""))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"verification_status": "FAILURE"})),
        )
        .mount(&server)
        .await;

    let request = slotledger_engine::providers::paypal_api::VerifySignatureRequest {
        auth_algo: "SHA256withRSA".to_string(),
        cert_url: "https://api.paypal.com/cert".to_string(),
        transmission_id: "trans-1".to_string(),
        transmission_sig: "sig".to_string(),
        transmission_time: "2025-01-01T00:00:00Z".to_string(),
        webhook_id: "WH-1".to_string(),
        webhook_event: json!({"id": "WH-EVT"}),
    };

    let verified = paypal(&server)
        .verify_signature(&fixtures::paypal_merchant("M1"), &request)
        .await
        .unwrap();
    assert!(!verified);
}

#[tokio::test]
async fn paypal_refund_posts_amount() {
    let server = MockServer::start().await;
    mount_token(&server).await;
    Mock::given(method("POST"))
        .and(path("/v2/payments/captures/CAP1/refund"))
        .and(body_string_contains("\"value\":\"75.00\""))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "id": "RF1",
            "status": "COMPLETED",
            "links": [{"href": "https://api.paypal.com/v2/payments/captures/CAP1", "rel": "up"}]
        })))
        .mount(&server)
        .await;

    let amount = Money {
        value: "75.00".to_string(),
        currency_code: "USD".to_string(),
    };
    let refund = paypal(&server)
        .refund_capture(&fixtures::paypal_merchant("M1"), "CAP1", &amount)
        .await
        .unwrap();

    assert_eq!(refund.id, "RF1");
    assert_eq!(refund.capture_id().as_deref(), Some("CAP1"));
}

#[tokio::test]
async fn paypal_error_status_is_remote_failure() {
    let server = MockServer::start().await;
    mount_token(&server).await;
    Mock::given(method("GET"))
        .and(path("/v2/checkout/orders/MISSING"))
        .respond_with(ResponseTemplate::new(404).set_body_string("RESOURCE_NOT_FOUND"))
        .mount(&server)
        .await;

    let err = paypal(&server)
        .get_order(&fixtures::paypal_merchant("M1"), "MISSING")
        .await
        .unwrap_err();

    assert!(err.is_dependency_failure());
    assert!(matches!(
        err,
        ProviderError::Remote { status: 404, ref message, .. } if message == "RESOURCE_NOT_FOUND"
    ));
}

#[tokio::test]
async fn unreachable_provider_is_transport_failure() {
    let api = HttpPayPalApi::new(reqwest::Client::new(), "http://127.0.0.1:1", "http://127.0.0.1:1");
    let err = api
        .get_order(&fixtures::paypal_merchant("M1"), "ORD1")
        .await
        .unwrap_err();
    assert!(matches!(err, ProviderError::Transport { .. }));
}

#[tokio::test]
async fn stripe_session_is_fetched_with_expanded_products() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/checkout/sessions/cs_1"))
        .and(header("authorization", "Bearer sk_test_123"))
        .and(query_param("expand[]", "line_items.data.price.product"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "cs_1",
            "payment_intent": "pi_1",
            "payment_status": "paid",
            "line_items": {"data": [{
                "id": "li_1",
                "quantity": 2,
                "amount_total": 5000,
                "price": {"id": "price_1", "unit_amount": 2500,
                          "product": {"id": "prod_1", "name": "Sunset cruise",
                                      "metadata": {"sku": "12AM1700000000"}}}
            }]}
        })))
        .mount(&server)
        .await;

    let session = stripe(&server)
        .get_checkout_session(&fixtures::stripe_merchant("M1"), "cs_1")
        .await
        .unwrap();

    assert_eq!(session.payment_intent.as_deref(), Some("pi_1"));
    assert_eq!(session.line_items.unwrap().data[0].quantity, Some(2));
}

#[tokio::test]
async fn stripe_connected_account_header_on_refund() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/refunds"))
        .and(header("stripe-account", "acct_conn"))
        .and(body_string_contains("payment_intent=pi_1"))
        .and(body_string_contains("amount=5000"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "re_1",
            "amount": 5000,
            "status": "succeeded"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let mut merchant = fixtures::stripe_merchant("M1");
    if let Some(settings) = merchant.stripe.as_mut() {
        settings.connected_account = Some("acct_conn".to_string());
    }

    let refund = stripe(&server)
        .create_refund(&merchant, "pi_1", 5000)
        .await
        .unwrap();
    assert_eq!(refund.id, "re_1");
}

#[tokio::test]
async fn stripe_session_lookup_by_payment_intent() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/checkout/sessions"))
        .and(query_param("payment_intent", "pi_1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{"id": "cs_1", "payment_intent": "pi_1", "payment_status": "paid"}],
            "has_more": false
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/checkout/sessions/cs_1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "cs_1",
            "payment_intent": "pi_1",
            "payment_status": "paid"
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/checkout/sessions"))
        .and(query_param("payment_intent", "pi_none"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"data": [], "has_more": false})),
        )
        .mount(&server)
        .await;

    let api = stripe(&server);
    let merchant = fixtures::stripe_merchant("M1");

    let found = api.find_checkout_session(&merchant, "pi_1").await.unwrap();
    let missing = api.find_checkout_session(&merchant, "pi_none").await.unwrap();

    assert_eq!(found.unwrap().id, "cs_1");
    assert!(missing.is_none());
}

#[tokio::test]
async fn stripe_transfer_reversal_uses_platform_key() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/transfers/tr_1/reversals"))
        .and(header("authorization", "Bearer sk_test_123"))
        .and(body_string_contains("amount=4000"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"id": "trr_1", "amount": 4000})),
        )
        .mount(&server)
        .await;

    let reversal = stripe(&server)
        .reverse_transfer(&fixtures::stripe_merchant("M1"), "tr_1", 4000)
        .await
        .unwrap();
    assert_eq!(reversal.amount, 4000);
}

#[tokio::test]
async fn stripe_refunds_listed_by_payment_intent() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/refunds"))
        .and(header("authorization", "Bearer sk_test_123"))
        .and(query_param("payment_intent", "pi_1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "object": "list",
            "data": [
                {"id": "re_2", "amount": 2500, "status": "failed"},
                {"id": "re_1", "amount": 5000, "status": "succeeded"}
            ],
            "has_more": false
        })))
        .expect(1)
        .mount(&server)
        .await;

    let refunds = stripe(&server)
        .list_refunds(&fixtures::stripe_merchant("M1"), "pi_1")
        .await
        .unwrap();

    let ids: Vec<&str> = refunds.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, ["re_2", "re_1"]);
    assert!(!refunds[0].is_effective());
    assert!(refunds[1].is_effective());
}
