//! Error taxonomy shared by every operator.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, FilterError>;

/// Errors returned by filterlab operators.
///
/// Parameter problems are always reported before any pixel is touched, so an
/// `Err` never corresponds to a partially applied filter.
#[derive(Debug, Error)]
pub enum FilterError {
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("internal failure: {0}")]
    InternalFailure(String),

    #[error("image codec error: {0}")]
    Codec(#[from] image::ImageError),
}

impl FilterError {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        FilterError::InvalidParameter(msg.into())
    }

    pub(crate) fn unsupported(msg: impl Into<String>) -> Self {
        FilterError::UnsupportedFormat(msg.into())
    }
}

/// Reject values outside an inclusive range.
pub(crate) fn ensure_range<T>(name: &str, value: T, min: T, max: T) -> Result<()>
where
    T: PartialOrd + std::fmt::Display + Copy,
{
    if value < min || value > max {
        return Err(FilterError::invalid(format!(
            "{name} must be in [{min}, {max}], got {value}"
        )));
    }
    Ok(())
}

/// Reject kernel sizes that are even, below 3 or above `max`.
pub(crate) fn ensure_odd_kernel(name: &str, size: usize, max: usize) -> Result<()> {
    if size < 3 || size % 2 == 0 || size > max {
        return Err(FilterError::invalid(format!(
            "{name} must be odd and in [3, {max}], got {size}"
        )));
    }
    Ok(())
}

/// Reject strictly non-positive or non-finite values that must lie in (0, max].
pub(crate) fn ensure_positive(name: &str, value: f32, max: f32) -> Result<()> {
    if !value.is_finite() || value <= 0.0 || value > max {
        return Err(FilterError::invalid(format!(
            "{name} must be in (0, {max}], got {value}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_odd_kernel_rules() {
        assert!(ensure_odd_kernel("k", 3, 99).is_ok());
        assert!(ensure_odd_kernel("k", 4, 99).is_err());
        assert!(ensure_odd_kernel("k", 1, 99).is_err());
        assert!(ensure_odd_kernel("k", 101, 99).is_err());
    }

    #[test]
    fn test_messages_name_the_parameter() {
        let err = ensure_range("k", 11usize, 2, 10).unwrap_err();
        assert!(err.to_string().contains("k must be in [2, 10]"));
        assert!(matches!(err, FilterError::InvalidParameter(_)));
    }

    #[test]
    fn test_positive_rejects_nan() {
        assert!(ensure_positive("gamma", f32::NAN, 10.0).is_err());
        assert!(ensure_positive("gamma", 0.0, 10.0).is_err());
        assert!(ensure_positive("gamma", 2.2, 10.0).is_ok());
    }
}
