use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, put},
    Router,
};
use bigdecimal::{BigDecimal, RoundingMode};
use chrono::{DateTime, Utc};
use num_traits::FromPrimitive;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::Db;
use crate::handlers::{
    BookingHandler, CatalogHandler, NotificationHandler, OrderDraft, OrderHandler, OrderLine,
};
use crate::models::*;

pub const BOOKING_STATUSES: &[&str] = &["pending", "confirmed", "completed", "cancelled"];
pub const ORDER_STATUSES: &[&str] = &["pending", "confirmed", "shipped", "delivered", "cancelled"];

#[derive(Clone)]
pub struct AppState {
    pub db: Db,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);
type ApiResult<T> = Result<Json<T>, ApiError>;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/products", get(list_products).post(create_product))
        .route(
            "/products/:id",
            get(get_product).put(update_product).delete(delete_product),
        )
        .route("/services", get(list_services).post(create_service))
        .route("/services/:id", put(update_service).delete(delete_service))
        .route("/bookings", get(list_bookings).post(create_booking))
        .route("/bookings/:id", get(get_booking).delete(delete_booking))
        .route("/bookings/:id/status", put(update_booking_status))
        .route("/orders", get(list_orders).post(create_order))
        .route("/orders/:id", get(get_order).delete(delete_order))
        .route("/orders/:id/status", put(update_order_status))
        .route("/notifications", get(list_notifications))
        .route("/notifications/:id", axum::routing::delete(delete_notification))
        .route("/notifications/:id/read", put(mark_notification_read))
        .route("/notifications/read-all", put(mark_all_notifications_read))
        .route("/health", get(health_check))
        .with_state(state)
        .layer(
            tower_http::cors::CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
        )
}

pub async fn health_check() -> &'static str {
    "OK"
}

// ---- products -------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct CreateProductRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub price: f64,
    pub image_url: Option<String>,
    pub category: Option<String>,
    pub in_stock: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateProductRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub price: Option<f64>,
    pub image_url: Option<String>,
    pub category: Option<String>,
    pub in_stock: Option<bool>,
}

pub async fn list_products(State(state): State<AppState>) -> ApiResult<Vec<Product>> {
    let rows = CatalogHandler::new(state.db)
        .list_products()
        .await
        .map_err(map_db_error)?;
    Ok(Json(rows))
}

pub async fn get_product(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Product> {
    match CatalogHandler::new(state.db).get_product(id).await {
        Ok(Some(product)) => Ok(Json(product)),
        Ok(None) => Err(not_found_response("product")),
        Err(e) => Err(map_db_error(e)),
    }
}

pub async fn create_product(
    State(state): State<AppState>,
    Json(request): Json<CreateProductRequest>,
) -> Result<(StatusCode, Json<Product>), ApiError> {
    require_non_empty(&request.name, "name")?;
    let price = parse_price(request.price)?;

    let new_product = NewProduct {
        id: Uuid::new_v4(),
        name: request.name,
        description: request.description,
        price,
        image_url: request.image_url,
        category: request.category,
        in_stock: request.in_stock.unwrap_or(true),
    };

    let product = CatalogHandler::new(state.db)
        .create_product(new_product)
        .await
        .map_err(map_db_error)?;
    Ok((StatusCode::CREATED, Json(product)))
}

pub async fn update_product(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateProductRequest>,
) -> ApiResult<Product> {
    if let Some(name) = &request.name {
        require_non_empty(name, "name")?;
    }
    let price = request.price.map(parse_price).transpose()?;

    let changes = ProductChangeset {
        name: request.name,
        description: request.description,
        price,
        image_url: request.image_url,
        category: request.category,
        in_stock: request.in_stock,
        updated_at: Some(Utc::now()),
    };

    let product = CatalogHandler::new(state.db)
        .update_product(id, changes)
        .await
        .map_err(map_db_error)?;
    Ok(Json(product))
}

pub async fn delete_product(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    CatalogHandler::new(state.db)
        .delete_product(id)
        .await
        .map_err(map_db_error)?;
    Ok(StatusCode::NO_CONTENT)
}

// ---- services -------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct CreateServiceRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub duration_minutes: i32,
    pub price: f64,
    pub active: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateServiceRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub duration_minutes: Option<i32>,
    pub price: Option<f64>,
    pub active: Option<bool>,
}

pub async fn list_services(State(state): State<AppState>) -> ApiResult<Vec<Service>> {
    let rows = CatalogHandler::new(state.db)
        .list_services()
        .await
        .map_err(map_db_error)?;
    Ok(Json(rows))
}

pub async fn create_service(
    State(state): State<AppState>,
    Json(request): Json<CreateServiceRequest>,
) -> Result<(StatusCode, Json<Service>), ApiError> {
    require_non_empty(&request.name, "name")?;
    if request.duration_minutes <= 0 {
        return Err(bad_request("duration_minutes must be positive"));
    }
    let price = parse_price(request.price)?;

    let new_service = NewService {
        id: Uuid::new_v4(),
        name: request.name,
        description: request.description,
        duration_minutes: request.duration_minutes,
        price,
        active: request.active.unwrap_or(true),
    };

    let service = CatalogHandler::new(state.db)
        .create_service(new_service)
        .await
        .map_err(map_db_error)?;
    Ok((StatusCode::CREATED, Json(service)))
}

pub async fn update_service(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateServiceRequest>,
) -> ApiResult<Service> {
    if let Some(name) = &request.name {
        require_non_empty(name, "name")?;
    }
    if matches!(request.duration_minutes, Some(minutes) if minutes <= 0) {
        return Err(bad_request("duration_minutes must be positive"));
    }
    let price = request.price.map(parse_price).transpose()?;

    let changes = ServiceChangeset {
        name: request.name,
        description: request.description,
        duration_minutes: request.duration_minutes,
        price,
        active: request.active,
        updated_at: Some(Utc::now()),
    };

    let service = CatalogHandler::new(state.db)
        .update_service(id, changes)
        .await
        .map_err(map_db_error)?;
    Ok(Json(service))
}

pub async fn delete_service(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    CatalogHandler::new(state.db)
        .delete_service(id)
        .await
        .map_err(map_db_error)?;
    Ok(StatusCode::NO_CONTENT)
}

// ---- bookings -------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct CreateBookingRequest {
    pub patient_name: String,
    pub email: String,
    pub phone: Option<String>,
    pub service_id: Option<Uuid>,
    pub scheduled_for: DateTime<Utc>,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: String,
}

#[derive(Debug, Deserialize)]
pub struct ListBookingsQuery {
    pub status: Option<String>,
}

pub async fn create_booking(
    State(state): State<AppState>,
    Json(request): Json<CreateBookingRequest>,
) -> Result<(StatusCode, Json<Booking>), ApiError> {
    require_non_empty(&request.patient_name, "patient_name")?;
    require_non_empty(&request.email, "email")?;

    let new_booking = NewBooking {
        id: Uuid::new_v4(),
        patient_name: request.patient_name,
        email: request.email,
        phone: request.phone,
        service_id: request.service_id,
        scheduled_for: request.scheduled_for,
        notes: request.notes,
        status: "pending".to_string(),
    };

    let booking = BookingHandler::new(state.db)
        .create_booking(new_booking)
        .await
        .map_err(map_db_error)?;
    Ok((StatusCode::CREATED, Json(booking)))
}

pub async fn list_bookings(
    State(state): State<AppState>,
    Query(query): Query<ListBookingsQuery>,
) -> ApiResult<Vec<Booking>> {
    if let Some(status) = &query.status {
        validate_status(status, BOOKING_STATUSES)?;
    }
    let rows = BookingHandler::new(state.db)
        .list_bookings(query.status)
        .await
        .map_err(map_db_error)?;
    Ok(Json(rows))
}

pub async fn get_booking(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Booking> {
    match BookingHandler::new(state.db).get_booking(id).await {
        Ok(Some(booking)) => Ok(Json(booking)),
        Ok(None) => Err(not_found_response("booking")),
        Err(e) => Err(map_db_error(e)),
    }
}

pub async fn update_booking_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateStatusRequest>,
) -> ApiResult<Booking> {
    validate_status(&request.status, BOOKING_STATUSES)?;
    let booking = BookingHandler::new(state.db)
        .update_status(id, request.status)
        .await
        .map_err(map_db_error)?;
    Ok(Json(booking))
}

pub async fn delete_booking(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    BookingHandler::new(state.db)
        .delete_booking(id)
        .await
        .map_err(map_db_error)?;
    Ok(StatusCode::NO_CONTENT)
}

// ---- orders ---------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct OrderItemRequest {
    pub product_id: Uuid,
    pub quantity: i32,
}

#[derive(Debug, Deserialize)]
pub struct CreateOrderRequest {
    pub customer_name: String,
    pub email: String,
    pub phone: Option<String>,
    pub items: Vec<OrderItemRequest>,
}

#[derive(Debug, Serialize)]
pub struct OrderResponse {
    pub order: Order,
    pub items: Vec<OrderItem>,
}

pub async fn create_order(
    State(state): State<AppState>,
    Json(request): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<OrderResponse>), ApiError> {
    require_non_empty(&request.customer_name, "customer_name")?;
    require_non_empty(&request.email, "email")?;
    if request.items.is_empty() {
        return Err(bad_request("order must contain at least one item"));
    }
    if request.items.iter().any(|item| item.quantity <= 0) {
        return Err(bad_request("item quantity must be positive"));
    }

    let draft = OrderDraft {
        customer_name: request.customer_name,
        email: request.email,
        phone: request.phone,
        lines: request
            .items
            .into_iter()
            .map(|item| OrderLine {
                product_id: item.product_id,
                quantity: item.quantity,
            })
            .collect(),
    };

    let (order, items) = OrderHandler::new(state.db)
        .create_order(draft)
        .await
        .map_err(map_db_error)?;
    Ok((StatusCode::CREATED, Json(OrderResponse { order, items })))
}

pub async fn list_orders(State(state): State<AppState>) -> ApiResult<Vec<Order>> {
    let rows = OrderHandler::new(state.db)
        .list_orders()
        .await
        .map_err(map_db_error)?;
    Ok(Json(rows))
}

pub async fn get_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<OrderResponse> {
    match OrderHandler::new(state.db).get_order(id).await {
        Ok(Some((order, items))) => Ok(Json(OrderResponse { order, items })),
        Ok(None) => Err(not_found_response("order")),
        Err(e) => Err(map_db_error(e)),
    }
}

pub async fn update_order_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateStatusRequest>,
) -> ApiResult<Order> {
    validate_status(&request.status, ORDER_STATUSES)?;
    let order = OrderHandler::new(state.db)
        .update_status(id, request.status)
        .await
        .map_err(map_db_error)?;
    Ok(Json(order))
}

pub async fn delete_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    OrderHandler::new(state.db)
        .delete_order(id)
        .await
        .map_err(map_db_error)?;
    Ok(StatusCode::NO_CONTENT)
}

// ---- notifications --------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct ListNotificationsQuery {
    pub unread: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct MarkAllReadResponse {
    pub updated: usize,
}

pub async fn list_notifications(
    State(state): State<AppState>,
    Query(query): Query<ListNotificationsQuery>,
) -> ApiResult<Vec<Notification>> {
    let rows = NotificationHandler::new(state.db)
        .list(query.unread.unwrap_or(false))
        .await
        .map_err(map_db_error)?;
    Ok(Json(rows))
}

pub async fn mark_notification_read(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Notification> {
    let notification = NotificationHandler::new(state.db)
        .mark_read(id)
        .await
        .map_err(map_db_error)?;
    Ok(Json(notification))
}

pub async fn mark_all_notifications_read(
    State(state): State<AppState>,
) -> ApiResult<MarkAllReadResponse> {
    let updated = NotificationHandler::new(state.db)
        .mark_all_read()
        .await
        .map_err(map_db_error)?;
    Ok(Json(MarkAllReadResponse { updated }))
}

pub async fn delete_notification(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    NotificationHandler::new(state.db)
        .delete(id)
        .await
        .map_err(map_db_error)?;
    Ok(StatusCode::NO_CONTENT)
}

// ---- validation and error mapping -----------------------------------------

fn parse_price(price: f64) -> Result<BigDecimal, ApiError> {
    if !price.is_finite() || price < 0.0 {
        return Err(bad_request("price must be a non-negative number"));
    }
    BigDecimal::from_f64(price)
        .map(|d| d.with_scale_round(2, RoundingMode::HalfUp))
        .ok_or_else(|| bad_request("price must be a non-negative number"))
}

fn require_non_empty(value: &str, field: &str) -> Result<(), ApiError> {
    if value.trim().is_empty() {
        return Err(bad_request(&format!("{field} must not be empty")));
    }
    Ok(())
}

fn validate_status(status: &str, allowed: &[&str]) -> Result<(), ApiError> {
    if !allowed.contains(&status) {
        return Err(bad_request(&format!(
            "unknown status {status:?}, expected one of {allowed:?}"
        )));
    }
    Ok(())
}

fn bad_request(message: &str) -> ApiError {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse { error: message.to_string() }),
    )
}

fn not_found_response(what: &str) -> ApiError {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorResponse { error: format!("{what} not found") }),
    )
}

/// Maps surfaced database errors onto HTTP statuses: not-found to 404,
/// constraint violations to 409, exhausted transient failures to 503,
/// everything else to 500 with the original message.
fn map_db_error(err: anyhow::Error) -> ApiError {
    use diesel::result::{DatabaseErrorKind, Error as DieselError};

    let status = match err.downcast_ref::<DieselError>() {
        Some(DieselError::NotFound) => StatusCode::NOT_FOUND,
        Some(DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _))
        | Some(DieselError::DatabaseError(DatabaseErrorKind::ForeignKeyViolation, _)) => {
            StatusCode::CONFLICT
        }
        _ if shared::is_transient(&err) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };

    if status.is_server_error() {
        tracing::error!("Database operation failed: {:#}", err);
    }

    (status, Json(ErrorResponse { error: format!("{err:#}") }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use diesel::result::{DatabaseErrorKind, Error as DieselError};

    #[test]
    fn parse_price_scales_to_cents() {
        assert_eq!(parse_price(19.9).unwrap().to_string(), "19.90");
        assert_eq!(parse_price(0.0).unwrap().to_string(), "0.00");
    }

    #[test]
    fn parse_price_rejects_invalid_input() {
        assert!(parse_price(-1.0).is_err());
        assert!(parse_price(f64::NAN).is_err());
        assert!(parse_price(f64::INFINITY).is_err());
    }

    #[test]
    fn status_values_are_checked_against_the_table() {
        assert!(validate_status("pending", BOOKING_STATUSES).is_ok());
        assert!(validate_status("confirmed", ORDER_STATUSES).is_ok());
        assert!(validate_status("rejected", BOOKING_STATUSES).is_err());
        assert!(validate_status("", ORDER_STATUSES).is_err());
    }

    #[test]
    fn blank_fields_are_rejected() {
        assert!(require_non_empty("Dr. Adams", "name").is_ok());
        assert!(require_non_empty("   ", "name").is_err());
    }

    #[test]
    fn not_found_maps_to_404() {
        let (status, _) = map_db_error(DieselError::NotFound.into());
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[test]
    fn unique_violation_maps_to_409() {
        let err = DieselError::DatabaseError(
            DatabaseErrorKind::UniqueViolation,
            Box::new("duplicate key".to_string()),
        );
        let (status, _) = map_db_error(err.into());
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[test]
    fn surfaced_transient_error_maps_to_503() {
        let (status, _) = map_db_error(anyhow!("connection reset by peer"));
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn unclassified_errors_map_to_500() {
        let (status, _) = map_db_error(anyhow!("something unexpected"));
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    }
}
