//! The settlement record handed to the ERP.
//!
//! The serialized form is stored on the purchase verbatim. Cancellation replays
//! that stored JSON with `deleted` set instead of rebuilding it.

use crate::{
    entities::{Address, LineItem, Product, Purchase},
    errors::ServiceError,
    services::pricing::line_amount,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

pub const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementPayload {
    pub schema_version: u32,
    pub deleted: bool,
    pub header: SettlementHeader,
    pub lines: Vec<SettlementLine>,
    pub shipments: Vec<ShipmentBlock>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementHeader {
    pub purchase_key: Uuid,
    pub payment_intent_id: String,
    pub customer_key: Option<Uuid>,
    pub email: Option<String>,
    pub currency: String,
    pub amount: i64,
    pub coupon_discount: i64,
    pub payable: i64,
    pub purchase_time: Option<DateTime<Utc>>,
    pub billing_address_key: Option<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementLine {
    pub line_key: Uuid,
    pub product_key: Uuid,
    pub sku: String,
    pub name: String,
    pub unit_price: i64,
    pub tax_rate_bps: i32,
    pub quantity: i32,
    pub line_amount: i64,
    pub address_key: Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShipmentAddress {
    pub address_key: Uuid,
    pub recipient: String,
    pub line1: String,
    pub line2: Option<String>,
    pub city: String,
    pub region: Option<String>,
    pub postal_code: String,
    pub country: String,
    pub phone: Option<String>,
}

impl From<&Address> for ShipmentAddress {
    fn from(a: &Address) -> Self {
        Self {
            address_key: a.key,
            recipient: a.recipient.clone(),
            line1: a.line1.clone(),
            line2: a.line2.clone(),
            city: a.city.clone(),
            region: a.region.clone(),
            postal_code: a.postal_code.clone(),
            country: a.country.clone(),
            phone: a.phone.clone(),
        }
    }
}

/// One block per distinct destination, listing the lines shipped there.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShipmentBlock {
    pub address: ShipmentAddress,
    pub line_keys: Vec<Uuid>,
}

impl SettlementPayload {
    pub fn builder(purchase: &Purchase) -> SettlementPayloadBuilder<'_> {
        SettlementPayloadBuilder {
            purchase,
            lines: &[],
            products: &[],
            addresses: &[],
        }
    }

    pub fn to_snapshot(&self) -> Result<String, ServiceError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn to_value(&self) -> Result<Value, ServiceError> {
        Ok(serde_json::to_value(self)?)
    }
}

/// Parses a stored snapshot and flags it as a deletion, leaving every other field as stored.
pub fn deletion_replay(snapshot: &str) -> Result<Value, ServiceError> {
    let mut value: Value = serde_json::from_str(snapshot)?;
    match value.as_object_mut() {
        Some(obj) => {
            obj.insert("deleted".to_string(), Value::Bool(true));
            Ok(value)
        }
        None => Err(ServiceError::SerializationError(
            "settlement snapshot is not a JSON object".to_string(),
        )),
    }
}

pub struct SettlementPayloadBuilder<'a> {
    purchase: &'a Purchase,
    lines: &'a [LineItem],
    products: &'a [Product],
    addresses: &'a [Address],
}

impl<'a> SettlementPayloadBuilder<'a> {
    pub fn lines(mut self, lines: &'a [LineItem]) -> Self {
        self.lines = lines;
        self
    }

    pub fn products(mut self, products: &'a [Product]) -> Self {
        self.products = products;
        self
    }

    pub fn addresses(mut self, addresses: &'a [Address]) -> Self {
        self.addresses = addresses;
        self
    }

    /// Every line needs its product and a resolved address.
    pub fn build(self) -> Result<SettlementPayload, ServiceError> {
        let products: HashMap<Uuid, &Product> = self.products.iter().map(|p| (p.key, p)).collect();
        let addresses: HashMap<Uuid, &Address> =
            self.addresses.iter().map(|a| (a.key, a)).collect();

        let mut lines = Vec::with_capacity(self.lines.len());
        let mut shipments: Vec<ShipmentBlock> = Vec::new();

        for line in self.lines {
            let product = products.get(&line.product_key).ok_or_else(|| {
                ServiceError::InternalError(format!(
                    "product {} missing for line {}",
                    line.product_key, line.key
                ))
            })?;
            let address_key = line.address_key.ok_or_else(|| {
                ServiceError::InternalError(format!("line {} has no address", line.key))
            })?;

            match shipments
                .iter_mut()
                .find(|s| s.address.address_key == address_key)
            {
                Some(block) => block.line_keys.push(line.key),
                None => {
                    let address = addresses.get(&address_key).ok_or_else(|| {
                        ServiceError::InternalError(format!("address {} missing", address_key))
                    })?;
                    shipments.push(ShipmentBlock {
                        address: ShipmentAddress::from(*address),
                        line_keys: vec![line.key],
                    });
                }
            }

            lines.push(SettlementLine {
                line_key: line.key,
                product_key: line.product_key,
                sku: product.sku.clone(),
                name: product.name.clone(),
                unit_price: line.unit_price,
                tax_rate_bps: line.tax_rate_bps,
                quantity: line.quantity,
                line_amount: line_amount(line.unit_price, line.tax_rate_bps, line.quantity)?,
                address_key,
            });
        }

        let purchase = self.purchase;
        Ok(SettlementPayload {
            schema_version: SCHEMA_VERSION,
            deleted: false,
            header: SettlementHeader {
                purchase_key: purchase.key,
                payment_intent_id: purchase.payment_intent_id.clone(),
                customer_key: purchase.customer_key,
                email: purchase.email.clone(),
                currency: purchase.currency.clone(),
                amount: purchase.amount,
                coupon_discount: purchase.coupon_discount,
                payable: purchase.payable(),
                purchase_time: purchase.purchase_time,
                billing_address_key: purchase.address_key,
            },
            lines,
            shipments,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{PurchaseStatus, ShippingStatus};
    use chrono::TimeZone;
    use serde_json::json;

    fn uuid(n: u128) -> Uuid {
        Uuid::from_u128(n)
    }

    fn fixture() -> (Purchase, Vec<LineItem>, Vec<Product>, Vec<Address>) {
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let purchase = Purchase {
            key: uuid(1),
            customer_key: Some(uuid(2)),
            payment_intent_id: "pi_123".to_string(),
            amount: 3300,
            coupon_discount: 300,
            coupon_code_hash: None,
            currency: "usd".to_string(),
            status: PurchaseStatus::Succeeded,
            email: Some("ada@example.com".to_string()),
            address_key: Some(uuid(20)),
            creation_time: at,
            purchase_time: Some(at),
            refund_time: None,
            settlement_snapshot: None,
            settlement_pushed_at: None,
        };
        let line = |key: u128, quantity: i32, address: u128| LineItem {
            key: uuid(key),
            customer_key: Some(uuid(2)),
            product_key: uuid(30),
            purchase_key: Some(uuid(1)),
            unit_price: 1000,
            tax_rate_bps: 1000,
            quantity,
            address_key: Some(uuid(address)),
            shipping_status: ShippingStatus::Unshipped,
            created_at: at,
            updated_at: at,
            shipped_at: None,
        };
        let lines = vec![line(10, 1, 20), line(11, 1, 21), line(12, 1, 20)];
        let products = vec![Product {
            key: uuid(30),
            sku: "TEA-01".to_string(),
            name: "Assam".to_string(),
            unit_price: 1000,
            tax_rate_bps: 1000,
        }];
        let address = |key: u128, city: &str| Address {
            key: uuid(key),
            customer_key: Some(uuid(2)),
            recipient: "Ada".to_string(),
            line1: "1 Main St".to_string(),
            line2: None,
            city: city.to_string(),
            region: None,
            postal_code: "00001".to_string(),
            country: "US".to_string(),
            phone: None,
            is_default: false,
            created_at: at,
        };
        let addresses = vec![address(20, "Springfield"), address(21, "Shelbyville")];
        (purchase, lines, products, addresses)
    }

    #[test]
    fn payload_snapshot() {
        let (purchase, lines, products, addresses) = fixture();
        let payload = SettlementPayload::builder(&purchase)
            .lines(&lines)
            .products(&products)
            .addresses(&addresses)
            .build()
            .unwrap();

        let line_json = |key: u128, address: u128| {
            json!({
                "lineKey": uuid(key),
                "productKey": uuid(30),
                "sku": "TEA-01",
                "name": "Assam",
                "unitPrice": 1000,
                "taxRateBps": 1000,
                "quantity": 1,
                "lineAmount": 1100,
                "addressKey": uuid(address),
            })
        };
        let address_json = |key: u128, city: &str| {
            json!({
                "addressKey": uuid(key),
                "recipient": "Ada",
                "line1": "1 Main St",
                "line2": null,
                "city": city,
                "region": null,
                "postalCode": "00001",
                "country": "US",
                "phone": null,
            })
        };

        let expected = json!({
            "schemaVersion": 1,
            "deleted": false,
            "header": {
                "purchaseKey": uuid(1),
                "paymentIntentId": "pi_123",
                "customerKey": uuid(2),
                "email": "ada@example.com",
                "currency": "usd",
                "amount": 3300,
                "couponDiscount": 300,
                "payable": 3000,
                "purchaseTime": "2024-03-01T12:00:00Z",
                "billingAddressKey": uuid(20),
            },
            "lines": [line_json(10, 20), line_json(11, 21), line_json(12, 20)],
            "shipments": [
                { "address": address_json(20, "Springfield"), "lineKeys": [uuid(10), uuid(12)] },
                { "address": address_json(21, "Shelbyville"), "lineKeys": [uuid(11)] },
            ],
        });

        assert_eq!(payload.to_value().unwrap(), expected);
    }

    #[test]
    fn deletion_replay_only_flips_the_flag() {
        let (purchase, lines, products, addresses) = fixture();
        let payload = SettlementPayload::builder(&purchase)
            .lines(&lines)
            .products(&products)
            .addresses(&addresses)
            .build()
            .unwrap();
        let snapshot = payload.to_snapshot().unwrap();

        let replay = deletion_replay(&snapshot).unwrap();
        let mut original: Value = serde_json::from_str(&snapshot).unwrap();
        original["deleted"] = Value::Bool(true);
        assert_eq!(replay, original);
    }

    #[test]
    fn deletion_replay_rejects_non_objects() {
        assert!(deletion_replay("[1,2]").is_err());
        assert!(deletion_replay("not json").is_err());
    }

    #[test]
    fn build_requires_addresses_on_every_line() {
        let (purchase, mut lines, products, addresses) = fixture();
        lines[1].address_key = None;
        let result = SettlementPayload::builder(&purchase)
            .lines(&lines)
            .products(&products)
            .addresses(&addresses)
            .build();
        assert!(matches!(result, Err(ServiceError::InternalError(_))));
    }
}
