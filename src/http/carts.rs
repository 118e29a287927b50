//! Cart handlers.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use validator::Validate;

use super::AppState;
use crate::domain::aggregates::cart::{Address, Cart, ShippingMethod};
use crate::domain::value_objects::{Money, Quantity};
use crate::CheckoutError;

fn validated<T: Validate>(req: T) -> Result<T, CheckoutError> {
    req.validate().map_err(|e| CheckoutError::Validation(e.to_string()))?;
    Ok(req)
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateCartRequest {
    #[validate(length(min = 3, max = 3))]
    pub currency: String,
    #[validate(email)]
    pub email: Option<String>,
}

pub async fn create_cart(
    State(state): State<AppState>,
    Json(req): Json<CreateCartRequest>,
) -> Result<(StatusCode, Json<Cart>), CheckoutError> {
    let req = validated(req)?;
    let mut cart = Cart::new(&req.currency.to_lowercase());
    if let Some(email) = &req.email {
        cart.set_email(email)?;
    }
    state.carts.insert(&cart).await?;
    Ok((StatusCode::CREATED, Json(cart)))
}

pub async fn get_cart(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Cart>, CheckoutError> {
    state
        .carts
        .get(&id)
        .await?
        .map(Json)
        .ok_or(CheckoutError::NotFound { kind: "cart", id })
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateCartRequest {
    #[validate(email)]
    pub email: Option<String>,
    pub shipping_address: Option<Address>,
    pub billing_address: Option<Address>,
    pub shipping_method: Option<ShippingMethodRequest>,
    #[validate(range(min = 0))]
    pub discount_total: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct ShippingMethodRequest {
    pub name: String,
    pub amount: i64,
}

pub async fn update_cart(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<UpdateCartRequest>,
) -> Result<Json<Cart>, CheckoutError> {
    let req = validated(req)?;
    let mut cart = state
        .carts
        .get(&id)
        .await?
        .ok_or(CheckoutError::NotFound { kind: "cart", id })?;
    if let Some(email) = &req.email {
        cart.set_email(email)?;
    }
    if let Some(address) = req.shipping_address {
        cart.set_shipping_address(address)?;
    }
    if let Some(address) = req.billing_address {
        cart.set_billing_address(address)?;
    }
    if let Some(method) = req.shipping_method {
        cart.set_shipping_method(ShippingMethod {
            name: method.name,
            amount: Money::new(method.amount, cart.currency()),
        })?;
    }
    if let Some(discount) = req.discount_total {
        cart.apply_discount(Money::new(discount, cart.currency()))?;
    }
    state.carts.update(&cart).await?;
    Ok(Json(cart))
}

#[derive(Debug, Deserialize, Validate)]
pub struct AddItemRequest {
    #[validate(length(min = 1))]
    pub variant_id: String,
    #[validate(length(min = 1))]
    pub title: String,
    #[validate(range(min = 1))]
    pub quantity: u32,
    /// Price snapshot in minor units, fixed at add time.
    #[validate(range(min = 0))]
    pub unit_price: i64,
}

pub async fn add_item(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<AddItemRequest>,
) -> Result<(StatusCode, Json<Cart>), CheckoutError> {
    let req = validated(req)?;
    let mut cart = state
        .carts
        .get(&id)
        .await?
        .ok_or(CheckoutError::NotFound { kind: "cart", id })?;
    let quantity = Quantity::new(req.quantity)
        .map_err(|e| CheckoutError::Validation(e.to_string()))?;
    cart.add_item(
        &req.variant_id,
        &req.title,
        quantity,
        Money::new(req.unit_price, cart.currency()),
    )?;
    state.carts.update(&cart).await?;
    Ok((StatusCode::CREATED, Json(cart)))
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateItemRequest {
    #[validate(range(min = 1))]
    pub quantity: u32,
}

pub async fn update_item(
    State(state): State<AppState>,
    Path((id, item_id)): Path<(String, String)>,
    Json(req): Json<UpdateItemRequest>,
) -> Result<Json<Cart>, CheckoutError> {
    let req = validated(req)?;
    let mut cart = state
        .carts
        .get(&id)
        .await?
        .ok_or(CheckoutError::NotFound { kind: "cart", id })?;
    let quantity = Quantity::new(req.quantity)
        .map_err(|e| CheckoutError::Validation(e.to_string()))?;
    cart.update_quantity(&item_id, quantity)?;
    state.carts.update(&cart).await?;
    Ok(Json(cart))
}

pub async fn remove_item(
    State(state): State<AppState>,
    Path((id, item_id)): Path<(String, String)>,
) -> Result<Json<Cart>, CheckoutError> {
    let mut cart = state
        .carts
        .get(&id)
        .await?
        .ok_or(CheckoutError::NotFound { kind: "cart", id })?;
    cart.remove_item(&item_id)?;
    state.carts.update(&cart).await?;
    Ok(Json(cart))
}
