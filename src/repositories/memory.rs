use super::{verify_split, LineSplit, SettleTransition, SettlementRepository};
use crate::{
    entities::{
        Address, Coupon, Customer, LineItem, Product, Purchase, PurchaseStatus, ShippingStatus,
    },
    errors::ServiceError,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

#[derive(Debug, Clone, Default)]
struct State {
    customers: BTreeMap<Uuid, Customer>,
    addresses: BTreeMap<Uuid, Address>,
    products: BTreeMap<Uuid, Product>,
    coupons: BTreeMap<Uuid, Coupon>,
    purchases: BTreeMap<Uuid, Purchase>,
    line_items: BTreeMap<Uuid, LineItem>,
}

impl State {
    fn sorted_lines<'a>(lines: impl Iterator<Item = &'a LineItem>) -> Vec<LineItem> {
        let mut out: Vec<LineItem> = lines.cloned().collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.key.cmp(&b.key)));
        out
    }
}

/// Process-local storage for tests and local runs.
///
/// Units of work run against a copy of the state that replaces the live one
/// only when the whole unit succeeds.
#[derive(Debug, Default)]
pub struct InMemoryRepository {
    state: Mutex<State>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn unit_of_work<T>(
        &self,
        work: impl FnOnce(&mut State) -> Result<T, ServiceError>,
    ) -> Result<T, ServiceError> {
        let mut guard = self.lock();
        let mut draft = guard.clone();
        let value = work(&mut draft)?;
        *guard = draft;
        Ok(value)
    }

    pub fn insert_customer(&self, customer: Customer) {
        self.lock().customers.insert(customer.key, customer);
    }

    pub fn insert_address(&self, address: Address) {
        self.lock().addresses.insert(address.key, address);
    }

    pub fn insert_product(&self, product: Product) {
        self.lock().products.insert(product.key, product);
    }

    pub fn insert_coupon(&self, coupon: Coupon) {
        self.lock().coupons.insert(coupon.key, coupon);
    }

    pub fn insert_purchase(&self, purchase: Purchase) {
        self.lock().purchases.insert(purchase.key, purchase);
    }

    /// Every stored line, in creation order.
    pub fn all_line_items(&self) -> Vec<LineItem> {
        State::sorted_lines(self.lock().line_items.values())
    }
}

#[async_trait]
impl SettlementRepository for InMemoryRepository {
    async fn find_customer(&self, key: Uuid) -> Result<Option<Customer>, ServiceError> {
        Ok(self.lock().customers.get(&key).cloned())
    }

    async fn customer_addresses(&self, customer_key: Uuid) -> Result<Vec<Address>, ServiceError> {
        let mut out: Vec<Address> = self
            .lock()
            .addresses
            .values()
            .filter(|a| a.customer_key == Some(customer_key))
            .cloned()
            .collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.key.cmp(&b.key)));
        Ok(out)
    }

    async fn find_addresses(&self, keys: &[Uuid]) -> Result<Vec<Address>, ServiceError> {
        let state = self.lock();
        Ok(keys
            .iter()
            .filter_map(|k| state.addresses.get(k).cloned())
            .collect())
    }

    async fn find_product(&self, key: Uuid) -> Result<Option<Product>, ServiceError> {
        Ok(self.lock().products.get(&key).cloned())
    }

    async fn find_products(&self, keys: &[Uuid]) -> Result<Vec<Product>, ServiceError> {
        let state = self.lock();
        Ok(keys
            .iter()
            .filter_map(|k| state.products.get(k).cloned())
            .collect())
    }

    async fn find_coupon_by_hash(&self, code_hash: &str) -> Result<Option<Coupon>, ServiceError> {
        Ok(self
            .lock()
            .coupons
            .values()
            .find(|c| c.code_hash == code_hash)
            .cloned())
    }

    async fn count_coupon_redemptions(&self, code_hash: &str) -> Result<u64, ServiceError> {
        Ok(self
            .lock()
            .purchases
            .values()
            .filter(|p| {
                p.status == PurchaseStatus::Succeeded
                    && p.coupon_code_hash.as_deref() == Some(code_hash)
            })
            .count() as u64)
    }

    async fn insert_line_item(&self, line: LineItem) -> Result<LineItem, ServiceError> {
        self.unit_of_work(|state| {
            if state.line_items.contains_key(&line.key) {
                return Err(ServiceError::Conflict(format!(
                    "Line item {} already exists",
                    line.key
                )));
            }
            state.line_items.insert(line.key, line.clone());
            Ok(line)
        })
    }

    async fn find_line_item(&self, key: Uuid) -> Result<Option<LineItem>, ServiceError> {
        Ok(self.lock().line_items.get(&key).cloned())
    }

    async fn find_line_items(&self, keys: &[Uuid]) -> Result<Vec<LineItem>, ServiceError> {
        let state = self.lock();
        Ok(State::sorted_lines(
            state
                .line_items
                .values()
                .filter(|l| keys.contains(&l.key)),
        ))
    }

    async fn customer_line_items(&self, customer_key: Uuid) -> Result<Vec<LineItem>, ServiceError> {
        let state = self.lock();
        Ok(State::sorted_lines(
            state
                .line_items
                .values()
                .filter(|l| l.customer_key == Some(customer_key)),
        ))
    }

    async fn update_line_quantity(
        &self,
        line_key: Uuid,
        quantity: i32,
    ) -> Result<LineItem, ServiceError> {
        self.unit_of_work(|state| {
            let line = state.line_items.get_mut(&line_key).ok_or_else(|| {
                ServiceError::NotFound(format!("Line item {} not found", line_key))
            })?;
            line.quantity = quantity;
            line.updated_at = Utc::now();
            Ok(line.clone())
        })
    }

    async fn delete_line_item(&self, line_key: Uuid) -> Result<(), ServiceError> {
        self.unit_of_work(|state| {
            state
                .line_items
                .remove(&line_key)
                .map(|_| ())
                .ok_or_else(|| ServiceError::NotFound(format!("Line item {} not found", line_key)))
        })
    }

    async fn find_purchase(&self, key: Uuid) -> Result<Option<Purchase>, ServiceError> {
        Ok(self.lock().purchases.get(&key).cloned())
    }

    async fn find_purchases(&self, keys: &[Uuid]) -> Result<Vec<Purchase>, ServiceError> {
        let state = self.lock();
        Ok(keys
            .iter()
            .filter_map(|k| state.purchases.get(k).cloned())
            .collect())
    }

    async fn find_purchase_by_intent(
        &self,
        payment_intent_id: &str,
    ) -> Result<Option<Purchase>, ServiceError> {
        Ok(self
            .lock()
            .purchases
            .values()
            .find(|p| p.payment_intent_id == payment_intent_id)
            .cloned())
    }

    async fn purchase_line_items(&self, purchase_key: Uuid) -> Result<Vec<LineItem>, ServiceError> {
        let state = self.lock();
        Ok(State::sorted_lines(
            state
                .line_items
                .values()
                .filter(|l| l.purchase_key == Some(purchase_key)),
        ))
    }

    async fn create_purchase(
        &self,
        purchase: Purchase,
        line_keys: &[Uuid],
        splits: &[LineSplit],
    ) -> Result<Purchase, ServiceError> {
        self.unit_of_work(|state| {
            if state
                .purchases
                .values()
                .any(|p| p.payment_intent_id == purchase.payment_intent_id)
            {
                return Err(ServiceError::Conflict(format!(
                    "Intent {} already has a purchase",
                    purchase.payment_intent_id
                )));
            }
            let now = Utc::now();
            for key in line_keys {
                let line = state.line_items.get(key).ok_or_else(|| {
                    ServiceError::Conflict(format!("Line item {} is gone", key))
                })?;
                let settled = line.purchase_key.is_some_and(|bound| {
                    state.purchases.get(&bound).map(|p| p.status) != Some(PurchaseStatus::Created)
                });
                if settled {
                    return Err(ServiceError::Conflict(format!(
                        "Line item {} has already been purchased",
                        key
                    )));
                }
            }

            state.purchases.insert(purchase.key, purchase.clone());
            for key in line_keys {
                let Some(line) = state.line_items.get_mut(key) else {
                    continue;
                };
                line.purchase_key = Some(purchase.key);
                line.updated_at = now;
            }

            for split in splits {
                let Some((first, extra)) = split.destinations.split_first() else {
                    continue;
                };
                let origin = state.line_items.get(&split.line_key).cloned().ok_or_else(|| {
                    ServiceError::NotFound(format!("Line item {} not found", split.line_key))
                })?;

                let mut derived = Vec::with_capacity(split.destinations.len());
                for dest in extra {
                    let clone = origin.clone_for_destination(dest.quantity, dest.address_key);
                    state.line_items.insert(clone.key, clone.clone());
                    derived.push(clone);
                }

                if let Some(line) = state.line_items.get_mut(&origin.key) {
                    line.quantity = first.quantity;
                    line.address_key = Some(first.address_key);
                    line.updated_at = now;
                    derived.insert(0, line.clone());
                }
                derived.retain(|l| l.purchase_key == Some(purchase.key));
                verify_split(split, &derived)?;
            }

            Ok(purchase)
        })
    }

    async fn apply_quote(
        &self,
        purchase_key: Uuid,
        amount: i64,
        discount: i64,
        code_hash: Option<String>,
    ) -> Result<Purchase, ServiceError> {
        self.unit_of_work(|state| {
            let purchase = state.purchases.get_mut(&purchase_key).ok_or_else(|| {
                ServiceError::NotFound(format!("Purchase {} not found", purchase_key))
            })?;
            if purchase.status != PurchaseStatus::Created {
                return Err(ServiceError::Conflict(format!(
                    "Purchase {} is no longer open",
                    purchase_key
                )));
            }
            purchase.amount = amount;
            purchase.coupon_discount = discount;
            purchase.coupon_code_hash = code_hash;
            Ok(purchase.clone())
        })
    }

    async fn mark_succeeded(
        &self,
        payment_intent_id: &str,
        transition: &SettleTransition,
    ) -> Result<bool, ServiceError> {
        self.unit_of_work(|state| {
            let Some(purchase) = state.purchases.values_mut().find(|p| {
                p.payment_intent_id == payment_intent_id && p.status == PurchaseStatus::Created
            }) else {
                return Ok(false);
            };
            purchase.status = PurchaseStatus::Succeeded;
            purchase.purchase_time = Some(transition.purchase_time);
            purchase.email = Some(transition.email.clone());
            purchase.customer_key = Some(transition.customer_key);
            purchase.address_key = Some(transition.address_key);
            Ok(true)
        })
    }

    async fn assign_fallback_address(
        &self,
        purchase_key: Uuid,
        address_key: Uuid,
    ) -> Result<u64, ServiceError> {
        self.unit_of_work(|state| {
            let now = Utc::now();
            let mut changed = 0;
            for line in state
                .line_items
                .values_mut()
                .filter(|l| l.purchase_key == Some(purchase_key) && l.address_key.is_none())
            {
                line.address_key = Some(address_key);
                line.updated_at = now;
                changed += 1;
            }
            Ok(changed)
        })
    }

    async fn store_settlement_snapshot(
        &self,
        purchase_key: Uuid,
        snapshot: String,
        pushed_at: Option<DateTime<Utc>>,
    ) -> Result<bool, ServiceError> {
        self.unit_of_work(|state| {
            let Some(purchase) = state.purchases.get_mut(&purchase_key) else {
                return Ok(false);
            };
            if purchase.settlement_snapshot.is_some() {
                return Ok(false);
            }
            purchase.settlement_snapshot = Some(snapshot);
            purchase.settlement_pushed_at = pushed_at;
            Ok(true)
        })
    }

    async fn cancel_purchase(
        &self,
        purchase_key: Uuid,
        refund_time: Option<DateTime<Utc>>,
    ) -> Result<bool, ServiceError> {
        self.unit_of_work(|state| {
            match state.purchases.get_mut(&purchase_key) {
                Some(p) if p.status == PurchaseStatus::Succeeded => {
                    p.status = PurchaseStatus::Canceled;
                    if refund_time.is_some() {
                        p.refund_time = refund_time;
                    }
                }
                _ => return Ok(false),
            }

            let now = Utc::now();
            for line in state
                .line_items
                .values_mut()
                .filter(|l| l.purchase_key == Some(purchase_key))
            {
                line.shipping_status = ShippingStatus::Canceled;
                line.updated_at = now;
            }
            Ok(true)
        })
    }

    async fn mark_lines_shipped(
        &self,
        purchase_key: Uuid,
        line_keys: &[Uuid],
        shipped_at: DateTime<Utc>,
    ) -> Result<u64, ServiceError> {
        self.unit_of_work(|state| {
            let mut changed = 0;
            for line in state.line_items.values_mut().filter(|l| {
                l.purchase_key == Some(purchase_key)
                    && line_keys.contains(&l.key)
                    && l.shipping_status == ShippingStatus::Unshipped
            }) {
                line.shipping_status = ShippingStatus::Shipped;
                line.shipped_at = Some(shipped_at);
                line.updated_at = shipped_at;
                changed += 1;
            }
            Ok(changed)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repositories::Destination;

    fn line(customer: Uuid) -> LineItem {
        let now = Utc::now();
        LineItem {
            key: Uuid::new_v4(),
            customer_key: Some(customer),
            product_key: Uuid::new_v4(),
            purchase_key: None,
            unit_price: 1000,
            tax_rate_bps: 1000,
            quantity: 3,
            address_key: None,
            shipping_status: ShippingStatus::Unshipped,
            created_at: now,
            updated_at: now,
            shipped_at: None,
        }
    }

    fn purchase(customer: Uuid) -> Purchase {
        Purchase {
            key: Uuid::new_v4(),
            customer_key: Some(customer),
            payment_intent_id: format!("pi_{}", Uuid::new_v4().simple()),
            amount: 3300,
            coupon_discount: 0,
            coupon_code_hash: None,
            currency: "usd".to_string(),
            status: PurchaseStatus::Created,
            email: None,
            address_key: None,
            creation_time: Utc::now(),
            purchase_time: None,
            refund_time: None,
            settlement_snapshot: None,
            settlement_pushed_at: None,
        }
    }

    #[tokio::test]
    async fn failed_unit_of_work_leaves_state_untouched() {
        let repo = InMemoryRepository::new();
        let customer = Uuid::new_v4();
        let origin = repo.insert_line_item(line(customer)).await.unwrap();

        // The origin is never bound, so no derived line belongs to the purchase.
        let split = LineSplit {
            line_key: origin.key,
            destinations: vec![
                Destination { address_key: Uuid::new_v4(), quantity: 1 },
                Destination { address_key: Uuid::new_v4(), quantity: 2 },
            ],
        };
        let result = repo.create_purchase(purchase(customer), &[], &[split]).await;

        assert!(matches!(result, Err(ServiceError::InternalError(_))));
        assert_eq!(repo.all_line_items(), vec![origin]);
        assert!(repo.lock().purchases.is_empty());
    }

    #[tokio::test]
    async fn snapshot_is_written_once() {
        let repo = InMemoryRepository::new();
        let p = purchase(Uuid::new_v4());
        let key = p.key;
        repo.insert_purchase(p);

        assert!(repo
            .store_settlement_snapshot(key, "{\"first\":true}".into(), None)
            .await
            .unwrap());
        assert!(!repo
            .store_settlement_snapshot(key, "{\"second\":true}".into(), Some(Utc::now()))
            .await
            .unwrap());

        let stored = repo.find_purchase(key).await.unwrap().unwrap();
        assert_eq!(stored.settlement_snapshot.as_deref(), Some("{\"first\":true}"));
        assert!(stored.settlement_pushed_at.is_none());
    }

    #[tokio::test]
    async fn lines_of_settled_purchases_are_not_rebound() {
        let repo = InMemoryRepository::new();
        let customer = Uuid::new_v4();
        let origin = repo.insert_line_item(line(customer)).await.unwrap();

        let mut settled = purchase(customer);
        settled.status = PurchaseStatus::Succeeded;
        repo.insert_purchase(settled.clone());
        repo.lock()
            .line_items
            .entry(origin.key)
            .and_modify(|l| l.purchase_key = Some(settled.key));

        let next = purchase(customer);
        let result = repo.create_purchase(next.clone(), &[origin.key], &[]).await;

        assert!(matches!(result, Err(ServiceError::Conflict(_))));
        assert!(repo.find_purchase(next.key).await.unwrap().is_none());
        let line = repo.find_line_item(origin.key).await.unwrap().unwrap();
        assert_eq!(line.purchase_key, Some(settled.key));
    }
}
