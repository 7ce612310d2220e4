use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

/// Human-readable delivery key, `PREFIX-yyyymmdd-HEX8`.
///
/// Every piece of tracking state (local map, shared cache keys, broker
/// channels, hub subscriptions) is addressed by this identifier, never by the
/// internal order UUID.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeliveryId(String);

impl DeliveryId {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn generate(prefix: &str, at: DateTime<Utc>) -> Self {
        let unique = Uuid::new_v4().simple().to_string();
        Self(format!(
            "{}-{}-{}",
            prefix,
            at.format("%Y%m%d"),
            unique[..8].to_uppercase()
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_well_formed(&self) -> bool {
        let mut parts = self.0.split('-');
        let (Some(prefix), Some(date), Some(suffix), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return false;
        };

        !prefix.is_empty()
            && prefix.chars().all(|c| c.is_ascii_alphanumeric())
            && date.len() == 8
            && NaiveDate::parse_from_str(date, "%Y%m%d").is_ok()
            && suffix.len() == 8
            && suffix.chars().all(|c| c.is_ascii_hexdigit())
    }
}

impl fmt::Display for DeliveryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An order reference as external callers send it: either the internal UUID
/// or the delivery identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderRef {
    Internal(Uuid),
    Delivery(DeliveryId),
}

impl FromStr for OrderRef {
    type Err = AppError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(AppError::InvalidInput("order reference cannot be empty".to_string()));
        }

        match Uuid::parse_str(raw) {
            Ok(id) => Ok(OrderRef::Internal(id)),
            Err(_) => Ok(OrderRef::Delivery(DeliveryId::new(raw))),
        }
    }
}

/// What the order directory knows about an order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderRecord {
    pub order_id: Uuid,
    pub delivery_id: DeliveryId,
    pub courier_id: Uuid,
    pub destination: GeoPoint,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use uuid::Uuid;

    use super::{DeliveryId, OrderRef};

    #[test]
    fn generated_ids_are_well_formed() {
        let at = Utc.with_ymd_and_hms(2026, 10, 18, 9, 30, 0).unwrap();
        let id = DeliveryId::generate("DLV", at);

        assert!(id.as_str().starts_with("DLV-20261018-"));
        assert!(id.is_well_formed());
    }

    #[test]
    fn malformed_ids_are_rejected() {
        assert!(!DeliveryId::new("DLV-2026-1A2B3C4D").is_well_formed());
        assert!(!DeliveryId::new("DLV-20261399-1A2B3C4D").is_well_formed());
        assert!(!DeliveryId::new("DLV-20261018-XYZ").is_well_formed());
        assert!(!DeliveryId::new("-20261018-1A2B3C4D").is_well_formed());
        assert!(!DeliveryId::new("DLV-20261018-1A2B3C4D-extra").is_well_formed());
    }

    #[test]
    fn order_ref_prefers_uuid() {
        let id = Uuid::new_v4();
        assert_eq!(id.to_string().parse::<OrderRef>().unwrap(), OrderRef::Internal(id));
        assert_eq!(
            "NYG-20260101-ABCDEF12".parse::<OrderRef>().unwrap(),
            OrderRef::Delivery(DeliveryId::new("NYG-20260101-ABCDEF12"))
        );
        assert!("   ".parse::<OrderRef>().is_err());
    }
}
