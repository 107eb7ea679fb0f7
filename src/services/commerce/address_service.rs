use crate::{
    errors::CheckoutError,
    models::{DeliveryAddress, DeliveryAddressRef},
};
use tracing::warn;

/// Picks and validates the delivery address an order ships to.
///
/// The identifier format is checked before anything touches the network.
#[derive(Clone, Copy, Debug, Default)]
pub struct AddressResolver;

impl AddressResolver {
    pub fn new() -> Self {
        Self
    }

    /// Validates `selection` against the shopper's address book.
    ///
    /// The raw selection must match the id pattern exactly; padding is not
    /// stripped.
    pub fn resolve(
        &self,
        addresses: &[DeliveryAddress],
        selection: Option<&str>,
    ) -> Result<DeliveryAddressRef, CheckoutError> {
        let selected = selection
            .filter(|s| !s.trim().is_empty())
            .ok_or(CheckoutError::NoAddressSelected)?;

        let address_ref = DeliveryAddressRef::parse(selected).map_err(|e| {
            warn!(address_id = %selected, "Rejected malformed address id");
            e
        })?;

        if !addresses
            .iter()
            .any(|a| a.id.eq_ignore_ascii_case(address_ref.as_str()))
        {
            return Err(CheckoutError::Validation(format!(
                "address {} is not in the address book",
                address_ref
            )));
        }

        Ok(address_ref)
    }

    /// The address to preselect: the one flagged default, else the first.
    pub fn preferred<'a>(&self, addresses: &'a [DeliveryAddress]) -> Option<&'a DeliveryAddress> {
        addresses
            .iter()
            .find(|a| a.is_default)
            .or_else(|| addresses.first())
    }
}
