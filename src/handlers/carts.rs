use axum::{
    extract::{Json, Path, State},
    http::{HeaderMap, StatusCode},
    routing::{patch, post},
    Router,
};
use serde::Deserialize;
use utoipa::ToSchema;
use uuid::Uuid;

use super::caller_from;
use crate::auth::OptionalUser;
use crate::errors::ServiceError;
use crate::handlers::AppState;
use crate::services::carts::{AddToCartInput, CartView, CreatedCart};
use crate::{ApiResponse, ApiResult};

/// Cart routes scoped under `/api/v1/carts`.
pub fn cart_routes() -> Router<AppState> {
    Router::new()
        .route("/", post(create_cart))
        .route("/:id", axum::routing::get(get_cart))
        .route("/:id/items", post(add_item))
        .route("/:id/items/:item_id", patch(update_item).delete(remove_item))
}

#[derive(Debug, Default, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateCartRequest {
    /// ISO 4217 code; the configured default when omitted
    #[schema(example = "NGN")]
    pub currency: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateQuantityRequest {
    /// New quantity, 0 removes the line
    pub quantity: i32,
}

/// Create a cart for the caller
#[utoipa::path(
    post,
    path = "/api/v1/carts",
    request_body = CreateCartRequest,
    responses(
        (status = 201, description = "Cart created", body = ApiResponse<CreatedCart>),
        (status = 400, description = "Unsupported currency", body = crate::errors::ErrorResponse)
    ),
    tag = "carts"
)]
pub async fn create_cart(
    State(state): State<AppState>,
    OptionalUser(user): OptionalUser,
    headers: HeaderMap,
    body: Option<Json<CreateCartRequest>>,
) -> Result<(StatusCode, Json<ApiResponse<CreatedCart>>), ServiceError> {
    let caller = caller_from(user, &headers);
    let request = body.map(|Json(b)| b).unwrap_or_default();
    let created = state
        .services
        .carts
        .create_cart(&caller, request.currency)
        .await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(created))))
}

/// Get a cart with its items
#[utoipa::path(
    get,
    path = "/api/v1/carts/{id}",
    params(("id" = Uuid, Path, description = "Cart ID")),
    responses(
        (status = 200, description = "Cart", body = ApiResponse<CartView>),
        (status = 403, description = "Not the cart owner", body = crate::errors::ErrorResponse),
        (status = 404, description = "Cart not found", body = crate::errors::ErrorResponse)
    ),
    tag = "carts"
)]
pub async fn get_cart(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    OptionalUser(user): OptionalUser,
    headers: HeaderMap,
) -> ApiResult<CartView> {
    let caller = caller_from(user, &headers);
    let cart = state.services.carts.get_cart(id, &caller).await?;
    Ok(Json(ApiResponse::success(cart)))
}

/// Add an item, merging into an existing line for the same product and variant
#[utoipa::path(
    post,
    path = "/api/v1/carts/{id}/items",
    params(("id" = Uuid, Path, description = "Cart ID")),
    request_body = AddToCartInput,
    responses(
        (status = 200, description = "Updated cart", body = ApiResponse<CartView>),
        (status = 400, description = "Invalid quantity, purchased cart or missing price", body = crate::errors::ErrorResponse),
        (status = 404, description = "Cart, product or variant not found", body = crate::errors::ErrorResponse)
    ),
    tag = "carts"
)]
pub async fn add_item(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    OptionalUser(user): OptionalUser,
    headers: HeaderMap,
    Json(input): Json<AddToCartInput>,
) -> ApiResult<CartView> {
    let caller = caller_from(user, &headers);
    let cart = state.services.carts.add_item(id, &caller, input).await?;
    Ok(Json(ApiResponse::success(cart)))
}

/// Set the quantity of a cart line
#[utoipa::path(
    patch,
    path = "/api/v1/carts/{id}/items/{item_id}",
    params(
        ("id" = Uuid, Path, description = "Cart ID"),
        ("item_id" = Uuid, Path, description = "Cart item ID")
    ),
    request_body = UpdateQuantityRequest,
    responses(
        (status = 200, description = "Updated cart", body = ApiResponse<CartView>),
        (status = 404, description = "Cart or item not found", body = crate::errors::ErrorResponse)
    ),
    tag = "carts"
)]
pub async fn update_item(
    State(state): State<AppState>,
    Path((id, item_id)): Path<(Uuid, Uuid)>,
    OptionalUser(user): OptionalUser,
    headers: HeaderMap,
    Json(request): Json<UpdateQuantityRequest>,
) -> ApiResult<CartView> {
    let caller = caller_from(user, &headers);
    let cart = state
        .services
        .carts
        .update_item_quantity(id, item_id, &caller, request.quantity)
        .await?;
    Ok(Json(ApiResponse::success(cart)))
}

/// Remove a cart line
#[utoipa::path(
    delete,
    path = "/api/v1/carts/{id}/items/{item_id}",
    params(
        ("id" = Uuid, Path, description = "Cart ID"),
        ("item_id" = Uuid, Path, description = "Cart item ID")
    ),
    responses(
        (status = 200, description = "Updated cart", body = ApiResponse<CartView>),
        (status = 404, description = "Cart or item not found", body = crate::errors::ErrorResponse)
    ),
    tag = "carts"
)]
pub async fn remove_item(
    State(state): State<AppState>,
    Path((id, item_id)): Path<(Uuid, Uuid)>,
    OptionalUser(user): OptionalUser,
    headers: HeaderMap,
) -> ApiResult<CartView> {
    let caller = caller_from(user, &headers);
    let cart = state.services.carts.remove_item(id, item_id, &caller).await?;
    Ok(Json(ApiResponse::success(cart)))
}
