use crate::auth::AuthenticatedUser;
use crate::errors::ServiceError;
use crate::handlers::common::{
    created_response, success_response, PaginatedResponse, PaginationParams,
};
use crate::services::catalog::CreateProductInput;
use crate::AppState;
use axum::{
    extract::{Path, Query, State},
    response::Response,
    Json,
};
use uuid::Uuid;

/// List active products. Public; the storefront calls this without a
/// session.
#[utoipa::path(
    get,
    path = "/api/v1/products",
    params(PaginationParams),
    responses((status = 200, description = "Active products")),
    tag = "products"
)]
pub async fn list_products(
    State(state): State<AppState>,
    Query(params): Query<PaginationParams>,
) -> Result<Response, ServiceError> {
    let (products, total) = state
        .services
        .catalog
        .list_products(params.page, params.per_page)
        .await?;
    Ok(success_response(PaginatedResponse::new(
        products,
        params.page,
        params.per_page,
        total,
    )))
}

#[utoipa::path(
    get,
    path = "/api/v1/products/{id}",
    params(("id" = Uuid, Path, description = "Product id")),
    responses(
        (status = 200, description = "Product"),
        (status = 404, description = "Unknown or inactive product", body = crate::errors::ErrorResponse),
    ),
    tag = "products"
)]
pub async fn get_product(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Response, ServiceError> {
    let product = state.services.catalog.get_product(id).await?;
    Ok(success_response(product))
}

/// Add a product to the catalog.
#[utoipa::path(
    post,
    path = "/api/v1/products",
    request_body = CreateProductInput,
    responses(
        (status = 201, description = "Product created"),
        (status = 400, description = "Invalid payload", body = crate::errors::ErrorResponse),
        (status = 401, description = "Not signed in", body = crate::errors::ErrorResponse),
    ),
    security(("bearer_auth" = [])),
    tag = "products"
)]
pub async fn create_product(
    State(state): State<AppState>,
    _user: AuthenticatedUser,
    Json(input): Json<CreateProductInput>,
) -> Result<Response, ServiceError> {
    let product = state.services.catalog.create_product(input).await?;
    Ok(created_response(product))
}
