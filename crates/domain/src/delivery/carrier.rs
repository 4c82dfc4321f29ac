//! Carrier and address-validation capability.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;

use crate::value_objects::Address;

use super::DeliveryError;

#[async_trait]
pub trait CarrierClient: Send + Sync {
    /// Fails with `AddressRejected` when the carrier cannot resolve the address.
    async fn validate_address(&self, address: &Address) -> Result<(), DeliveryError>;

    async fn is_in_range(&self, address: &Address) -> Result<bool, DeliveryError>;
}

/// Carrier with a configurable coverage map.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCarrier {
    blocked_postal_codes: HashSet<String>,
    /// `None` serves every country.
    served_countries: Option<HashSet<String>>,
    unavailable: Arc<AtomicBool>,
}

impl InMemoryCarrier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn block_postal_code(mut self, postal_code: impl Into<String>) -> Self {
        self.blocked_postal_codes.insert(postal_code.into());
        self
    }

    pub fn serve_countries(mut self, countries: &[&str]) -> Self {
        self.served_countries = Some(countries.iter().map(|c| c.to_uppercase()).collect());
        self
    }

    /// Makes every call fail as if the carrier API were down.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), DeliveryError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(DeliveryError::CarrierUnavailable(
                "carrier API not responding".into(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl CarrierClient for InMemoryCarrier {
    async fn validate_address(&self, address: &Address) -> Result<(), DeliveryError> {
        self.check_available()?;
        if let Some(field) = address.missing_field() {
            return Err(DeliveryError::AddressRejected {
                reason: format!("missing {field}"),
            });
        }
        if self.blocked_postal_codes.contains(address.postal_code.trim()) {
            return Err(DeliveryError::AddressRejected {
                reason: format!("postal code {} not recognised", address.postal_code),
            });
        }
        Ok(())
    }

    async fn is_in_range(&self, address: &Address) -> Result<bool, DeliveryError> {
        self.check_available()?;
        Ok(self
            .served_countries
            .as_ref()
            .is_none_or(|served| served.contains(&address.country.to_uppercase())))
    }
}
