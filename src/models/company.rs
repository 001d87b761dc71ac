//! Company listings and the partial records extracted from pages.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Mean Earth radius used for great-circle distances.
const EARTH_RADIUS_KM: f64 = 6371.0;

/// A resolved WGS84 position.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lng: f64,
}

impl Coordinates {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// Haversine distance in kilometres.
    pub fn distance_km(&self, other: &Coordinates) -> f64 {
        let d_lat = (other.lat - self.lat).to_radians();
        let d_lng = (other.lng - self.lng).to_radians();
        let a = (d_lat / 2.0).sin().powi(2)
            + self.lat.to_radians().cos() * other.lat.to_radians().cos() * (d_lng / 2.0).sin().powi(2);
        let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
        EARTH_RADIUS_KM * c
    }
}

/// Price hints parsed from listing text. Unmatched values are 0.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prices {
    pub base_price: u32,
    pub price_per_hour: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimum_hours: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
}

impl Contact {
    /// Overlay the fields present in `other`.
    pub fn merge(&mut self, other: &Contact) {
        if other.phone.is_some() {
            self.phone = other.phone.clone();
        }
        if other.email.is_some() {
            self.email = other.email.clone();
        }
        if other.website.is_some() {
            self.website = other.website.clone();
        }
    }
}

/// One listing as extracted from a page, before enrichment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartialCompanyRecord {
    pub name: String,
    pub address: Option<String>,
    pub services: BTreeSet<String>,
    pub prices: Option<Prices>,
    pub contact: Contact,
}

impl PartialCompanyRecord {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: None,
            services: BTreeSet::new(),
            prices: None,
            contact: Contact::default(),
        }
    }
}

/// A persisted company row, unique by name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Company {
    pub id: Uuid,
    pub name: String,
    pub address: Option<String>,
    pub coordinates: Option<Coordinates>,
    pub services: BTreeSet<String>,
    pub prices: Prices,
    pub contact: Contact,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Company {
    /// Build a new row from an extracted record.
    pub fn from_record(
        record: PartialCompanyRecord,
        coordinates: Option<Coordinates>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: record.name,
            address: record.address,
            coordinates,
            services: record.services,
            prices: record.prices.unwrap_or_default(),
            contact: record.contact,
            created_at: now,
            updated_at: now,
        }
    }

    /// Apply a field update in place.
    pub fn apply(&mut self, changes: &CompanyChanges) {
        if let Some(ref address) = changes.address {
            self.address = Some(address.clone());
        }
        if let Some(coordinates) = changes.coordinates {
            self.coordinates = Some(coordinates);
        }
        if let Some(ref services) = changes.services {
            self.services = services.clone();
        }
        if let Some(prices) = changes.prices {
            self.prices = prices;
        }
        self.contact.merge(&changes.contact);
        self.updated_at = changes.updated_at;
    }
}

/// Fields to overwrite on an existing company. `None` leaves a field as is.
#[derive(Debug, Clone, PartialEq)]
pub struct CompanyChanges {
    pub address: Option<String>,
    pub coordinates: Option<Coordinates>,
    pub services: Option<BTreeSet<String>>,
    pub prices: Option<Prices>,
    pub contact: Contact,
    pub updated_at: DateTime<Utc>,
}

impl CompanyChanges {
    pub fn from_record(
        record: PartialCompanyRecord,
        coordinates: Option<Coordinates>,
        updated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            address: record.address,
            coordinates,
            services: Some(record.services),
            prices: record.prices,
            contact: record.contact,
            updated_at,
        }
    }
}
