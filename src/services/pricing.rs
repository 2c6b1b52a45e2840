use crate::{
    entities::{Coupon, CouponKind, LineItem},
    environment::Environment,
    errors::ServiceError,
};
use rust_decimal::{prelude::ToPrimitive, Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, instrument};

/// Order total and the coupon discount applied to it, in minor units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quote {
    pub total: i64,
    pub discount: i64,
}

impl Quote {
    pub fn payable(&self) -> i64 {
        (self.total - self.discount).max(0)
    }
}

fn round_minor(value: Decimal) -> Result<i64, ServiceError> {
    value
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
        .ok_or_else(|| ServiceError::ValidationError("amount out of range".to_string()))
}

/// `1 + tax_rate`, with the rate given in basis points.
pub fn tax_multiplier(tax_rate_bps: i32) -> Decimal {
    Decimal::ONE + Decimal::new(tax_rate_bps as i64, 4)
}

/// `round(unit_price * (1 + tax_rate) * quantity)`, half away from zero.
pub fn line_amount(unit_price: i64, tax_rate_bps: i32, quantity: i32) -> Result<i64, ServiceError> {
    round_minor(Decimal::from(unit_price) * tax_multiplier(tax_rate_bps) * Decimal::from(quantity))
}

fn percent_of(reward: i64, total: i64) -> Result<i64, ServiceError> {
    round_minor(Decimal::from(reward) * Decimal::from(total) / Decimal::ONE_HUNDRED)
}

fn is_well_formed(coupon: &Coupon) -> bool {
    coupon.target >= 0
        && coupon.reward >= 0
        && (!coupon.kind.is_product_scoped() || coupon.product_key.is_some())
}

/// Discount a coupon grants over `lines` whose summed amount is `total`.
///
/// Malformed coupons grant nothing, and no coupon grants more than `total`.
pub fn coupon_discount(coupon: &Coupon, lines: &[LineItem], total: i64) -> Result<i64, ServiceError> {
    if !is_well_formed(coupon) {
        return Ok(0);
    }
    Ok(raw_discount(coupon, lines, total)?.clamp(0, total.max(0)))
}

fn raw_discount(coupon: &Coupon, lines: &[LineItem], total: i64) -> Result<i64, ServiceError> {
    let product_quantity = || -> i64 {
        lines
            .iter()
            .filter(|l| Some(l.product_key) == coupon.product_key)
            .map(|l| l.quantity as i64)
            .sum()
    };

    match coupon.kind {
        CouponKind::ThresholdFlat if total >= coupon.target => Ok(coupon.reward),
        CouponKind::ThresholdPercent if total >= coupon.target => percent_of(coupon.reward, total),
        CouponKind::ProductQuantityFlat if product_quantity() >= coupon.target => Ok(coupon.reward),
        CouponKind::ProductQuantityPercent if product_quantity() >= coupon.target => {
            percent_of(coupon.reward, total)
        }
        _ => Ok(0),
    }
}

pub fn compute_total(lines: &[LineItem], coupon: Option<&Coupon>) -> Result<Quote, ServiceError> {
    let mut total: i64 = 0;
    for line in lines {
        let amount = line_amount(line.unit_price, line.tax_rate_bps, line.quantity)?;
        total = total
            .checked_add(amount)
            .ok_or_else(|| ServiceError::ValidationError("order total out of range".to_string()))?;
    }

    let discount = match coupon {
        Some(c) => coupon_discount(c, lines, total)?,
        None => 0,
    };

    Ok(Quote { total, discount })
}

/// Trimmed, upper-cased form of a coupon code; `None` when nothing is left.
pub fn normalize_coupon_code(code: &str) -> Option<String> {
    let trimmed = code.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_uppercase())
    }
}

pub fn hash_coupon_code(code: &str) -> Option<String> {
    normalize_coupon_code(code).map(|normalized| hex::encode(Sha256::digest(normalized.as_bytes())))
}

/// Rejects payable amounts the gateway cannot charge.
pub fn ensure_chargeable(payable: i64, minimum_charge: i64) -> Result<(), ServiceError> {
    if payable > 0 && payable < minimum_charge {
        return Err(ServiceError::ValidationError(format!(
            "amount {} is below the minimum charge of {}",
            payable, minimum_charge
        )));
    }
    Ok(())
}

/// Price quote plus the hash to persist when the coupon actually applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PricedCart {
    pub quote: Quote,
    pub coupon_code_hash: Option<String>,
}

/// Coupon lookup and pricing against the store.
pub struct PricingEngine<'a> {
    env: &'a Environment,
}

impl<'a> PricingEngine<'a> {
    pub fn new(env: &'a Environment) -> Self {
        Self { env }
    }

    /// Looks up a redeemable coupon. Unknown and exhausted codes resolve to `None`.
    #[instrument(skip(self, code))]
    pub async fn find_redeemable_coupon(&self, code: &str) -> Result<Option<Coupon>, ServiceError> {
        match hash_coupon_code(code) {
            Some(code_hash) => self.find_redeemable_by_hash(&code_hash).await,
            None => Ok(None),
        }
    }

    async fn find_redeemable_by_hash(&self, code_hash: &str) -> Result<Option<Coupon>, ServiceError> {
        let Some(coupon) = self.env.repository.find_coupon_by_hash(code_hash).await? else {
            debug!("coupon code not found");
            return Ok(None);
        };

        if let Some(max_uses) = coupon.max_uses {
            let used = self
                .env
                .repository
                .count_coupon_redemptions(&coupon.code_hash)
                .await?;
            if used >= max_uses.max(0) as u64 {
                debug!(coupon_key = %coupon.key, used, max_uses, "coupon exhausted");
                return Ok(None);
            }
        }

        Ok(Some(coupon))
    }

    pub async fn price(
        &self,
        lines: &[LineItem],
        coupon_code: Option<&str>,
    ) -> Result<PricedCart, ServiceError> {
        let coupon = match coupon_code {
            Some(code) => self.find_redeemable_coupon(code).await?,
            None => None,
        };
        Self::quote_with(lines, coupon)
    }

    /// Prices lines against a coupon already recorded on a purchase.
    pub async fn price_with_hash(
        &self,
        lines: &[LineItem],
        coupon_code_hash: Option<&str>,
    ) -> Result<PricedCart, ServiceError> {
        let coupon = match coupon_code_hash {
            Some(hash) => self.find_redeemable_by_hash(hash).await?,
            None => None,
        };
        Self::quote_with(lines, coupon)
    }

    fn quote_with(lines: &[LineItem], coupon: Option<Coupon>) -> Result<PricedCart, ServiceError> {
        let quote = compute_total(lines, coupon.as_ref())?;
        let coupon_code_hash = coupon
            .filter(|_| quote.discount > 0)
            .map(|c| c.code_hash);

        Ok(PricedCart {
            quote,
            coupon_code_hash,
        })
    }
}
