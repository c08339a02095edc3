//! Parsing of Kubernetes resource quantity strings
//!
//! Quantities are compared numerically when enforcing configured bounds, so
//! the suffixed string forms ("250m", "1Gi") need a numeric interpretation.

use crate::resources::GenerateError;

const DECIMAL_SUFFIXES: [(&str, f64); 9] = [
    ("n", 1e-9),
    ("u", 1e-6),
    ("m", 1e-3),
    ("k", 1e3),
    ("M", 1e6),
    ("G", 1e9),
    ("T", 1e12),
    ("P", 1e15),
    ("E", 1e18),
];

const BINARY_SUFFIXES: [(&str, f64); 6] = [
    ("Ki", 1024f64),
    ("Mi", 1048576f64),
    ("Gi", 1073741824f64),
    ("Ti", 1099511627776f64),
    ("Pi", 1125899906842624f64),
    ("Ei", 1152921504606846976f64),
];

/// Parse a quantity string into its numeric value in base units.
///
/// Plain and exponent forms parse directly; otherwise a binary (Ki..Ei) or
/// decimal (n..E) suffix scales the numeric prefix. Anything else is a
/// configuration error.
pub fn parse_quantity(value: &str) -> Result<f64, GenerateError> {
    let value = value.trim();

    if let Ok(number) = value.parse::<f64>() {
        return Ok(number);
    }

    for (suffix, multiplier) in BINARY_SUFFIXES {
        if let Some(prefix) = value.strip_suffix(suffix) {
            if let Ok(number) = prefix.parse::<f64>() {
                return Ok(number * multiplier);
            }
        }
    }

    for (suffix, multiplier) in DECIMAL_SUFFIXES {
        if let Some(prefix) = value.strip_suffix(suffix) {
            if let Ok(number) = prefix.parse::<f64>() {
                return Ok(number * multiplier);
            }
        }
    }

    Err(GenerateError::UnparsableQuantity(value.to_string()))
}
