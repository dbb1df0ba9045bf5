use axum::{
    body::Bytes,
    extract::{Json, Path, State},
    http::HeaderMap,
    routing::post,
    Router,
};
use tracing::info;

use super::caller_from;
use crate::auth::OptionalUser;
use crate::errors::ServiceError;
use crate::handlers::AppState;
use crate::services::checkout::{
    ConfirmOrderRequest, ConfirmedOrder, InitiatePaymentRequest, InitiatedPayment, WebhookAck,
};

/// Payment routes scoped under `/api/v1/payments`.
///
/// Responses use the storefront's checkout contract directly, without the
/// `ApiResponse` envelope.
pub fn payment_routes() -> Router<AppState> {
    Router::new()
        .route("/:gateway/initiate", post(initiate_payment))
        .route("/:gateway/confirm-order", post(confirm_order))
        .route("/:gateway/webhook", post(payment_webhook))
}

/// Price the cart and open a payment with the gateway
#[utoipa::path(
    post,
    path = "/api/v1/payments/{gateway}/initiate",
    params(("gateway" = String, Path, description = "Payment gateway slug, e.g. paystack")),
    request_body = InitiatePaymentRequest,
    responses(
        (status = 200, description = "Payment initialized", body = InitiatedPayment),
        (status = 400, description = "Validation or business-rule rejection", body = crate::errors::ErrorResponse),
        (status = 403, description = "Cart belongs to someone else", body = crate::errors::ErrorResponse),
        (status = 404, description = "Unknown gateway, cart, product or variant", body = crate::errors::ErrorResponse),
        (status = 500, description = "Gateway or internal failure", body = crate::errors::ErrorResponse)
    ),
    tag = "payments"
)]
pub async fn initiate_payment(
    State(state): State<AppState>,
    Path(gateway): Path<String>,
    OptionalUser(user): OptionalUser,
    headers: HeaderMap,
    Json(request): Json<InitiatePaymentRequest>,
) -> Result<Json<InitiatedPayment>, ServiceError> {
    let method = state.services.payments.get(&gateway)?;
    let caller = caller_from(user, &headers);
    let initiated = method.initiate_payment(&caller, request).await?;
    Ok(Json(initiated))
}

/// Verify a payment and create the order
#[utoipa::path(
    post,
    path = "/api/v1/payments/{gateway}/confirm-order",
    params(("gateway" = String, Path, description = "Payment gateway slug, e.g. paystack")),
    request_body = ConfirmOrderRequest,
    responses(
        (status = 200, description = "Order created or already confirmed", body = ConfirmedOrder),
        (status = 400, description = "Unknown reference or payment not completed", body = crate::errors::ErrorResponse),
        (status = 404, description = "Unknown gateway", body = crate::errors::ErrorResponse),
        (status = 500, description = "Gateway or internal failure", body = crate::errors::ErrorResponse)
    ),
    tag = "payments"
)]
pub async fn confirm_order(
    State(state): State<AppState>,
    Path(gateway): Path<String>,
    OptionalUser(user): OptionalUser,
    headers: HeaderMap,
    Json(request): Json<ConfirmOrderRequest>,
) -> Result<Json<ConfirmedOrder>, ServiceError> {
    let method = state.services.payments.get(&gateway)?;
    let caller = caller_from(user, &headers);
    let confirmed = method.confirm_order(&caller, request).await?;
    Ok(Json(confirmed))
}

/// Signed gateway callback; `charge.success` confirms the order
#[utoipa::path(
    post,
    path = "/api/v1/payments/{gateway}/webhook",
    params(("gateway" = String, Path, description = "Payment gateway slug, e.g. paystack")),
    request_body(
        content = String,
        content_type = "application/json",
        description = "Raw signed webhook payload"
    ),
    responses(
        (status = 200, description = "Event acknowledged", body = WebhookAck),
        (status = 401, description = "Invalid signature", body = crate::errors::ErrorResponse),
        (status = 404, description = "Unknown gateway", body = crate::errors::ErrorResponse)
    ),
    tag = "payments"
)]
pub async fn payment_webhook(
    State(state): State<AppState>,
    Path(gateway): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAck>, ServiceError> {
    let method = state.services.payments.get(&gateway)?;
    let ack = method.handle_webhook(&headers, &body).await?;
    info!(%gateway, event = %ack.event, "Webhook processed");
    Ok(Json(ack))
}
