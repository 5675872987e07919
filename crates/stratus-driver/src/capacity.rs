//! Capacity-range policy
//!
//! Translates the CSI capacity range into a concrete volume size in bytes,
//! clamped to what the Stratus control plane supports.

use stratus_proto::csi::CapacityRange;
use thiserror::Error;

/// A kibibyte
pub const KIB: i64 = 1024;
/// A mebibyte
pub const MIB: i64 = KIB * 1024;
/// A gibibyte
pub const GIB: i64 = MIB * 1024;
/// A tebibyte
pub const TIB: i64 = GIB * 1024;

/// Smallest volume the control plane will provision
pub const MINIMUM_VOLUME_SIZE: i64 = GIB;

/// Largest volume the control plane will provision
pub const MAXIMUM_VOLUME_SIZE: i64 = 2 * TIB;

/// Size used when the request does not constrain it
pub const DEFAULT_VOLUME_SIZE: i64 = 10 * GIB;

/// Unsatisfiable capacity range
#[derive(Error, Debug, PartialEq, Eq)]
pub enum CapacityError {
    #[error("limit ({}) can not be less than required ({}) size", format_bytes(*.limit), format_bytes(*.required))]
    LimitBelowRequired { required: i64, limit: i64 },

    #[error("{what} ({}) can not be less than minimum supported volume size ({})", format_bytes(*.value), format_bytes(MINIMUM_VOLUME_SIZE))]
    BelowMinimum { what: &'static str, value: i64 },

    #[error("{what} ({}) can not exceed maximum supported volume size ({})", format_bytes(*.value), format_bytes(MAXIMUM_VOLUME_SIZE))]
    AboveMaximum { what: &'static str, value: i64 },
}

/// Extract the storage size in bytes from the given capacity range.
///
/// Returns the default size when the range does not constrain it, and an
/// error when the range falls outside the supported bounds.
///
/// # Errors
///
/// [`CapacityError`] when the range is unsatisfiable.
pub fn extract_storage(cap_range: Option<&CapacityRange>) -> Result<i64, CapacityError> {
    let Some(range) = cap_range else {
        return Ok(DEFAULT_VOLUME_SIZE);
    };

    let required = range.required_bytes;
    let required_set = required > 0;
    let limit = range.limit_bytes;
    let limit_set = limit > 0;

    if !required_set && !limit_set {
        return Ok(DEFAULT_VOLUME_SIZE);
    }

    if required_set && limit_set && limit < required {
        return Err(CapacityError::LimitBelowRequired { required, limit });
    }

    if required_set && !limit_set && required < MINIMUM_VOLUME_SIZE {
        return Err(CapacityError::BelowMinimum {
            what: "required",
            value: required,
        });
    }

    if limit_set && limit < MINIMUM_VOLUME_SIZE {
        return Err(CapacityError::BelowMinimum {
            what: "limit",
            value: limit,
        });
    }

    if required_set && required > MAXIMUM_VOLUME_SIZE {
        return Err(CapacityError::AboveMaximum {
            what: "required",
            value: required,
        });
    }

    if !required_set && limit_set && limit > MAXIMUM_VOLUME_SIZE {
        return Err(CapacityError::AboveMaximum {
            what: "limit",
            value: limit,
        });
    }

    if required_set && limit_set && required == limit {
        return Ok(required);
    }

    if required_set {
        return Ok(required);
    }

    if limit_set {
        return Ok(limit);
    }

    Ok(DEFAULT_VOLUME_SIZE)
}

/// Render a byte count with a binary-unit suffix ("10Gi", "1.5Ti")
#[must_use]
pub fn format_bytes(input: i64) -> String {
    #[allow(clippy::cast_precision_loss)]
    let mut output = input as f64;
    let unit = match input {
        _ if input >= TIB => {
            output /= TIB as f64;
            "Ti"
        }
        _ if input >= GIB => {
            output /= GIB as f64;
            "Gi"
        }
        _ if input >= MIB => {
            output /= MIB as f64;
            "Mi"
        }
        _ if input >= KIB => {
            output /= KIB as f64;
            "Ki"
        }
        0 => return "0".to_string(),
        _ => "",
    };

    let mut result = format!("{output:.1}");
    if let Some(stripped) = result.strip_suffix(".0") {
        result = stripped.to_string();
    }
    result + unit
}
