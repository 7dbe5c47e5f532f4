//! Shipping address type.

use serde::{Deserialize, Serialize};

/// Errors that can occur when validating an [`Address`].
#[derive(thiserror::Error, Debug, Clone)]
pub enum AddressError {
    /// A required field is empty.
    #[error("address field `{0}` cannot be empty")]
    EmptyField(&'static str),
    /// A field exceeds the maximum length.
    #[error("address field `{field}` must be at most {max} characters")]
    TooLong {
        /// Field name.
        field: &'static str,
        /// Maximum allowed length.
        max: usize,
    },
    /// The country code is not two ASCII letters.
    #[error("country must be an ISO 3166-1 alpha-2 code")]
    InvalidCountry,
}

/// A structured shipping address.
///
/// The original store accepted a free-form address object; here every order
/// carries a validated address so downstream fulfilment never sees garbage.
///
/// ## Constraints
///
/// - `line1`, `city`, `postal_code` non-empty, at most 255 characters
/// - `line2` optional, at most 255 characters
/// - `country` exactly two ASCII letters, stored uppercase
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Address {
    line1: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    line2: Option<String>,
    city: String,
    postal_code: String,
    country: String,
}

impl Address {
    /// Maximum length of any single address field.
    pub const MAX_FIELD_LENGTH: usize = 255;

    /// Validate and construct an `Address`.
    ///
    /// # Errors
    ///
    /// Returns an error if a required field is empty, any field exceeds
    /// [`Self::MAX_FIELD_LENGTH`], or the country is not a two-letter code.
    pub fn parse(
        line1: &str,
        line2: Option<&str>,
        city: &str,
        postal_code: &str,
        country: &str,
    ) -> Result<Self, AddressError> {
        let line1 = validated_field("line1", line1)?;
        let line2 = match line2 {
            Some(l2) if !l2.trim().is_empty() => Some(validated_field("line2", l2)?),
            _ => None,
        };
        let city = validated_field("city", city)?;
        let postal_code = validated_field("postalCode", postal_code)?;

        let country = country.trim();
        if country.len() != 2 || !country.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(AddressError::InvalidCountry);
        }

        Ok(Self {
            line1,
            line2,
            city,
            postal_code,
            country: country.to_ascii_uppercase(),
        })
    }

    /// Re-validate an address that arrived through deserialization.
    ///
    /// Serde gives us the struct shape but not the field constraints; call
    /// this before trusting a deserialized value.
    ///
    /// # Errors
    ///
    /// Same conditions as [`Self::parse`].
    pub fn validate(&self) -> Result<(), AddressError> {
        Self::parse(
            &self.line1,
            self.line2.as_deref(),
            &self.city,
            &self.postal_code,
            &self.country,
        )
        .map(|_| ())
    }

    /// First address line.
    #[must_use]
    pub fn line1(&self) -> &str {
        &self.line1
    }

    /// Optional second address line.
    #[must_use]
    pub fn line2(&self) -> Option<&str> {
        self.line2.as_deref()
    }

    /// City name.
    #[must_use]
    pub fn city(&self) -> &str {
        &self.city
    }

    /// Postal or ZIP code.
    #[must_use]
    pub fn postal_code(&self) -> &str {
        &self.postal_code
    }

    /// ISO 3166-1 alpha-2 country code, uppercase.
    #[must_use]
    pub fn country(&self) -> &str {
        &self.country
    }
}

fn validated_field(name: &'static str, value: &str) -> Result<String, AddressError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(AddressError::EmptyField(name));
    }
    if value.len() > Address::MAX_FIELD_LENGTH {
        return Err(AddressError::TooLong {
            field: name,
            max: Address::MAX_FIELD_LENGTH,
        });
    }
    Ok(value.to_owned())
}
