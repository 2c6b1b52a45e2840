pub mod address;
pub mod coupon;
pub mod customer;
pub mod line_item;
pub mod product;
pub mod purchase;

pub use coupon::CouponKind;
pub use line_item::ShippingStatus;
pub use purchase::PurchaseStatus;

pub type Address = address::Model;
pub type Coupon = coupon::Model;
pub type Customer = customer::Model;
pub type LineItem = line_item::Model;
pub type Product = product::Model;
pub type Purchase = purchase::Model;
