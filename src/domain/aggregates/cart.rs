//! Cart Aggregate

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::value_objects::{Money, Quantity};

/// Mutable pre-purchase aggregate: line items, addresses, totals.
///
/// Unit prices are snapshotted into line items when they are added and never
/// re-priced afterwards, so a catalog price change mid-checkout cannot move
/// the total under the customer. Once `completed_at` is set the cart rejects
/// every mutation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Cart {
    id: String,
    currency: String,
    items: Vec<LineItem>,
    email: Option<String>,
    shipping_address: Option<Address>,
    billing_address: Option<Address>,
    shipping_method: Option<ShippingMethod>,
    discount_total: Money,
    completed_at: Option<DateTime<Utc>>,
    version: u64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LineItem {
    pub id: String,
    pub variant_id: String,
    pub title: String,
    pub quantity: Quantity,
    pub unit_price: Money,
}

impl LineItem {
    pub fn line_total(&self) -> Money {
        self.unit_price.multiply(self.quantity.value())
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Address {
    pub first_name: String,
    pub last_name: String,
    pub address_1: String,
    pub address_2: Option<String>,
    pub city: String,
    pub province: Option<String>,
    pub postal_code: String,
    pub country_code: String,
    pub phone: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ShippingMethod {
    pub name: String,
    pub amount: Money,
}

impl Cart {
    pub fn new(currency: &str) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            currency: currency.to_string(),
            items: vec![],
            email: None,
            shipping_address: None,
            billing_address: None,
            shipping_method: None,
            discount_total: Money::zero(currency),
            completed_at: None,
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn currency(&self) -> &str {
        &self.currency
    }

    pub fn items(&self) -> &[LineItem] {
        &self.items
    }

    pub fn email(&self) -> Option<&str> {
        self.email.as_deref()
    }

    pub fn shipping_address(&self) -> Option<&Address> {
        self.shipping_address.as_ref()
    }

    pub fn billing_address(&self) -> Option<&Address> {
        self.billing_address.as_ref()
    }

    pub fn shipping_method(&self) -> Option<&ShippingMethod> {
        self.shipping_method.as_ref()
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    pub fn is_completed(&self) -> bool {
        self.completed_at.is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Add an item with its price snapshot. Quantities merge for an already
    /// present variant.
    pub fn add_item(
        &mut self,
        variant_id: &str,
        title: &str,
        quantity: Quantity,
        unit_price: Money,
    ) -> Result<(), CartError> {
        self.ensure_open()?;
        if unit_price.currency() != self.currency {
            return Err(CartError::CurrencyMismatch);
        }
        if let Some(existing) = self.items.iter_mut().find(|i| i.variant_id == variant_id) {
            existing.quantity = existing.quantity.add(quantity);
        } else {
            self.items.push(LineItem {
                id: Uuid::new_v4().to_string(),
                variant_id: variant_id.to_string(),
                title: title.to_string(),
                quantity,
                unit_price,
            });
        }
        self.touch();
        Ok(())
    }

    pub fn update_quantity(&mut self, line_item_id: &str, quantity: Quantity) -> Result<(), CartError> {
        self.ensure_open()?;
        let item = self
            .items
            .iter_mut()
            .find(|i| i.id == line_item_id)
            .ok_or(CartError::ItemNotFound)?;
        item.quantity = quantity;
        self.touch();
        Ok(())
    }

    pub fn remove_item(&mut self, line_item_id: &str) -> Result<(), CartError> {
        self.ensure_open()?;
        let before = self.items.len();
        self.items.retain(|i| i.id != line_item_id);
        if self.items.len() == before {
            return Err(CartError::ItemNotFound);
        }
        self.touch();
        Ok(())
    }

    pub fn set_email(&mut self, email: &str) -> Result<(), CartError> {
        self.ensure_open()?;
        self.email = Some(email.to_string());
        self.touch();
        Ok(())
    }

    pub fn set_shipping_address(&mut self, address: Address) -> Result<(), CartError> {
        self.ensure_open()?;
        self.shipping_address = Some(address);
        self.touch();
        Ok(())
    }

    pub fn set_billing_address(&mut self, address: Address) -> Result<(), CartError> {
        self.ensure_open()?;
        self.billing_address = Some(address);
        self.touch();
        Ok(())
    }

    pub fn set_shipping_method(&mut self, method: ShippingMethod) -> Result<(), CartError> {
        self.ensure_open()?;
        if method.amount.currency() != self.currency {
            return Err(CartError::CurrencyMismatch);
        }
        self.shipping_method = Some(method);
        self.touch();
        Ok(())
    }

    pub fn apply_discount(&mut self, discount: Money) -> Result<(), CartError> {
        self.ensure_open()?;
        if discount.currency() != self.currency {
            return Err(CartError::CurrencyMismatch);
        }
        self.discount_total = discount;
        self.touch();
        Ok(())
    }

    pub fn subtotal(&self) -> Money {
        self.items.iter().fold(Money::zero(&self.currency), |acc, i| {
            acc.add(&i.line_total()).unwrap_or(acc)
        })
    }

    pub fn shipping_total(&self) -> Money {
        self.shipping_method
            .as_ref()
            .map(|m| m.amount.clone())
            .unwrap_or_else(|| Money::zero(&self.currency))
    }

    pub fn discount_total(&self) -> &Money {
        &self.discount_total
    }

    /// total = subtotal + shipping - discounts
    pub fn total(&self) -> Money {
        let with_shipping = self
            .subtotal()
            .add(&self.shipping_total())
            .unwrap_or_else(|_| self.subtotal());
        with_shipping
            .subtract(&self.discount_total)
            .unwrap_or(with_shipping)
    }

    /// Everything still missing before this cart can be paid for and
    /// committed. Empty means ready.
    pub fn missing_requirements(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.items.is_empty() {
            missing.push("items");
        }
        if self.email.is_none() {
            missing.push("email");
        }
        if self.shipping_address.is_none() {
            missing.push("shipping_address");
        }
        missing
    }

    pub fn mark_completed(&mut self) -> Result<(), CartError> {
        self.ensure_open()?;
        self.completed_at = Some(Utc::now());
        self.touch();
        Ok(())
    }

    fn ensure_open(&self) -> Result<(), CartError> {
        if self.is_completed() {
            return Err(CartError::Completed);
        }
        Ok(())
    }

    fn touch(&mut self) {
        self.version += 1;
        self.updated_at = Utc::now();
    }
}

#[derive(Debug, Clone, Error)]
pub enum CartError {
    #[error("cart is completed and immutable")]
    Completed,
    #[error("line item not found")]
    ItemNotFound,
    #[error("currency mismatch")]
    CurrencyMismatch,
}
