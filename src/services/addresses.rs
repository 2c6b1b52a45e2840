use crate::{entities::Address, errors::ServiceError};
use uuid::Uuid;

/// Picks the address used for billing and for lines that never got one.
///
/// Order: the requested address when the customer owns it, then the default
/// address, then the oldest address. `addresses` must belong to one customer
/// and be sorted oldest first.
pub fn resolve_fallback_address(
    requested_key: Option<Uuid>,
    addresses: &[Address],
) -> Result<Address, ServiceError> {
    let requested = requested_key.and_then(|key| addresses.iter().find(|a| a.key == key));

    requested
        .or_else(|| addresses.iter().find(|a| a.is_default))
        .or_else(|| addresses.first())
        .cloned()
        .ok_or_else(|| ServiceError::NotFound("Customer has no address on file".to_string()))
}
