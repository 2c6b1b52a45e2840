//! Settlement engines. Each borrows the shared [`Environment`](crate::environment::Environment)
//! for the duration of one operation.

pub mod addresses;
pub mod cancellation;
pub mod cart;
pub mod finalization;
pub mod fulfillment;
pub mod intents;
pub mod pricing;

pub use cancellation::{CancelOutcome, CancellationEngine};
pub use cart::CartService;
pub use finalization::{FinalizationEngine, FinalizeOutcome, FinalizeRequest};
pub use fulfillment::{FulfillmentHandler, ShipmentOutcome, ShipmentStatus};
pub use intents::{AddressAssignment, IntentCoordinator, IntentCreated, IntentUpdated};
pub use pricing::{PricingEngine, Quote};
