use crate::auth::AuthenticatedUser;
use crate::errors::ServiceError;
use crate::handlers::common::{success_response, PaginatedResponse, PaginationParams};
use crate::services::orders::OrderResponse;
use crate::AppState;
use axum::{
    extract::{Path, Query, State},
    response::Response,
};
use uuid::Uuid;

/// List the signed-in customer's orders, newest first.
#[utoipa::path(
    get,
    path = "/api/v1/orders",
    params(PaginationParams),
    responses(
        (status = 200, description = "Orders for the signed-in customer"),
        (status = 401, description = "Not signed in", body = crate::errors::ErrorResponse),
    ),
    security(("bearer_auth" = [])),
    tag = "orders"
)]
pub async fn list_orders(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(params): Query<PaginationParams>,
) -> Result<Response, ServiceError> {
    let (orders, total) = state
        .services
        .orders
        .list_for_customer(user.id, params.page, params.per_page)
        .await?;

    let data = orders
        .into_iter()
        .map(|order| OrderResponse::from_model(order, Vec::new()))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(success_response(PaginatedResponse::new(
        data,
        params.page,
        params.per_page,
        total,
    )))
}

/// Fetch one of the customer's orders, items included. Another customer's
/// order returns 404, not 403.
#[utoipa::path(
    get,
    path = "/api/v1/orders/{id}",
    params(("id" = Uuid, Path, description = "Order id")),
    responses(
        (status = 200, description = "Order with items", body = OrderResponse),
        (status = 401, description = "Not signed in", body = crate::errors::ErrorResponse),
        (status = 404, description = "No such order for this customer", body = crate::errors::ErrorResponse),
    ),
    security(("bearer_auth" = [])),
    tag = "orders"
)]
pub async fn get_order(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<Response, ServiceError> {
    let order = state
        .services
        .orders
        .get_order_for_customer(id, user.id)
        .await?;
    let items = state.services.orders.get_order_items(id).await?;
    Ok(success_response(OrderResponse::from_model(order, items)?))
}
