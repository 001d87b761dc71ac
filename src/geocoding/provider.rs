//! Nominatim-compatible search requests and responses.

use serde_json::Value;

use super::{GeocodeError, GeocodeResult};
use crate::models::Coordinates;

pub const DEFAULT_PROVIDER_URL: &str = "https://nominatim.openstreetmap.org";

/// Collapse runs of whitespace and trim.
pub fn clean_address(address: &str) -> String {
    address.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Cache key for an address: cleaned and lowercased.
pub fn cache_key(address: &str) -> String {
    format!("geocoding:{}", clean_address(address).to_lowercase())
}

/// Search URL returning at most one match.
pub fn search_url(base_url: &str, address: &str) -> String {
    format!(
        "{}/search?q={}&format=json&limit=1",
        base_url.trim_end_matches('/'),
        urlencoding::encode(address)
    )
}

fn decimal(value: &Value) -> Option<f64> {
    match value {
        Value::String(s) => s.trim().parse().ok(),
        Value::Number(n) => n.as_f64(),
        _ => None,
    }
}

/// Parse the first match, `None` on an empty result array.
pub fn parse_search_response(body: &str) -> GeocodeResult<Option<Coordinates>> {
    let value: Value = serde_json::from_str(body)
        .map_err(|e| GeocodeError::InvalidResponse(format!("not JSON: {}", e)))?;

    let places = value
        .as_array()
        .ok_or_else(|| GeocodeError::InvalidResponse("expected an array".to_string()))?;

    let Some(place) = places.first() else {
        return Ok(None);
    };

    let lat = place.get("lat").and_then(decimal);
    let lng = place.get("lon").or_else(|| place.get("lng")).and_then(decimal);
    match (lat, lng) {
        (Some(lat), Some(lng)) => Ok(Some(Coordinates::new(lat, lng))),
        _ => Err(GeocodeError::InvalidResponse(
            "match without lat/lon".to_string(),
        )),
    }
}
