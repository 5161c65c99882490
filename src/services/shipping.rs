//! Shipping data intake.
//!
//! Clients have sent shipping details in several shapes over time. `normalize`
//! accepts all of them and never fails; `validate` is strict and is the only
//! way to obtain a [`ShippingAddress`].

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use utoipa::ToSchema;

/// ISO 3166-1 alpha-2 codes accepted for shipping. Shared with account
/// address validation.
pub const COUNTRY_CODES: &[&str] = &[
    "AD", "AE", "AF", "AG", "AI", "AL", "AM", "AO", "AQ", "AR", "AS", "AT", "AU", "AW", "AX",
    "AZ", "BA", "BB", "BD", "BE", "BF", "BG", "BH", "BI", "BJ", "BL", "BM", "BN", "BO", "BQ",
    "BR", "BS", "BT", "BV", "BW", "BY", "BZ", "CA", "CC", "CD", "CF", "CG", "CH", "CI", "CK",
    "CL", "CM", "CN", "CO", "CR", "CU", "CV", "CW", "CX", "CY", "CZ", "DE", "DJ", "DK", "DM",
    "DO", "DZ", "EC", "EE", "EG", "EH", "ER", "ES", "ET", "FI", "FJ", "FK", "FM", "FO", "FR",
    "GA", "GB", "GD", "GE", "GF", "GG", "GH", "GI", "GL", "GM", "GN", "GP", "GQ", "GR", "GS",
    "GT", "GU", "GW", "GY", "HK", "HM", "HN", "HR", "HT", "HU", "ID", "IE", "IL", "IM", "IN",
    "IO", "IQ", "IR", "IS", "IT", "JE", "JM", "JO", "JP", "KE", "KG", "KH", "KI", "KM", "KN",
    "KP", "KR", "KW", "KY", "KZ", "LA", "LB", "LC", "LI", "LK", "LR", "LS", "LT", "LU", "LV",
    "LY", "MA", "MC", "MD", "ME", "MF", "MG", "MH", "MK", "ML", "MM", "MN", "MO", "MP", "MQ",
    "MR", "MS", "MT", "MU", "MV", "MW", "MX", "MY", "MZ", "NA", "NC", "NE", "NF", "NG", "NI",
    "NL", "NO", "NP", "NR", "NU", "NZ", "OM", "PA", "PE", "PF", "PG", "PH", "PK", "PL", "PM",
    "PN", "PR", "PS", "PT", "PW", "PY", "QA", "RE", "RO", "RS", "RU", "RW", "SA", "SB", "SC",
    "SD", "SE", "SG", "SH", "SI", "SJ", "SK", "SL", "SM", "SN", "SO", "SR", "SS", "ST", "SV",
    "SX", "SY", "SZ", "TC", "TD", "TF", "TG", "TH", "TJ", "TK", "TL", "TM", "TN", "TO", "TR",
    "TT", "TV", "TW", "TZ", "UA", "UG", "UM", "US", "UY", "UZ", "VA", "VC", "VE", "VG", "VI",
    "VN", "VU", "WF", "WS", "YE", "YT", "ZA", "ZM", "ZW",
];

const NESTED_KEYS: &[&str] = &["shippingAddress", "shipping_address", "shippingInfo"];

const ADDRESS_KEYS: &[&str] = &["address", "street", "line1"];
const POSTAL_CODE_KEYS: &[&str] = &["postalCode", "zip", "postal_code"];
const PHONE_KEYS: &[&str] = &["phone", "phoneNumber"];
const NAME_KEYS: &[&str] = &["name", "fullName"];

/// Shipping details as received, every field optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedShippingInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub postal_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl NormalizedShippingInfo {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

/// A validated shipping address, as stored on orders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ShippingAddress {
    pub address: String,
    pub city: String,
    pub state: String,
    pub postal_code: String,
    /// Upper-case ISO 3166-1 alpha-2 code
    pub country: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ShippingError {
    #[error("{0} is required")]
    Missing(&'static str),

    #[error("Unsupported country code: {0}")]
    UnsupportedCountry(String),
}

impl ShippingError {
    /// Name of the offending field, in the canonical camelCase form.
    pub fn field(&self) -> &'static str {
        match self {
            Self::Missing(field) => field,
            Self::UnsupportedCountry(_) => "country",
        }
    }
}

fn coerce(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn pick(sources: &[&Map<String, Value>], keys: &[&str]) -> Option<String> {
    sources
        .iter()
        .flat_map(|source| keys.iter().filter_map(move |key| source.get(*key)))
        .find_map(coerce)
}

/// Coerces any tolerated shipping payload into the canonical field set.
///
/// Returns `None` only for an absent or JSON `null` payload.
pub fn normalize(raw: Option<&Value>) -> Option<NormalizedShippingInfo> {
    let raw = match raw {
        None | Some(Value::Null) => return None,
        Some(value) => value,
    };

    let Some(top) = raw.as_object() else {
        return Some(NormalizedShippingInfo::default());
    };

    let nested = NESTED_KEYS
        .iter()
        .find_map(|key| top.get(*key).and_then(Value::as_object));

    // Nested fields win over top-level ones when both are present.
    let sources: Vec<&Map<String, Value>> = match nested {
        Some(inner) => vec![inner, top],
        None => vec![top],
    };

    Some(NormalizedShippingInfo {
        address: pick(&sources, ADDRESS_KEYS),
        city: pick(&sources, &["city"]),
        state: pick(&sources, &["state"]),
        postal_code: pick(&sources, POSTAL_CODE_KEYS),
        country: pick(&sources, &["country"]),
        phone: pick(&sources, PHONE_KEYS),
        name: pick(&sources, NAME_KEYS),
    })
}

/// Strictly checks a normalized record. The first failing field wins.
pub fn validate(info: &NormalizedShippingInfo) -> Result<ShippingAddress, ShippingError> {
    fn required(value: &Option<String>, field: &'static str) -> Result<String, ShippingError> {
        value
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
            .ok_or(ShippingError::Missing(field))
    }

    let address = required(&info.address, "address")?;
    let city = required(&info.city, "city")?;
    let state = required(&info.state, "state")?;
    let postal_code = required(&info.postal_code, "postalCode")?;
    let country = required(&info.country, "country")?.to_uppercase();

    if !COUNTRY_CODES.contains(&country.as_str()) {
        return Err(ShippingError::UnsupportedCountry(country));
    }

    Ok(ShippingAddress {
        address,
        city,
        state,
        postal_code,
        country,
        phone: info.phone.clone(),
        name: info.name.clone(),
    })
}

/// Normalizes and validates in one step.
pub fn normalize_and_validate(raw: Option<&Value>) -> Result<ShippingAddress, ShippingError> {
    let normalized = normalize(raw).unwrap_or_default();
    validate(&normalized)
}
