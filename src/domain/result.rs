//! Result type alias for Meridian

use super::errors::MeridianError;

/// Result type alias for Meridian operations
///
/// # Examples
///
/// ```
/// use meridian::domain::result::Result;
/// use meridian::domain::errors::MeridianError;
///
/// fn failing_function() -> Result<()> {
///     Err(MeridianError::Validation("payload is empty".to_string()))
/// }
///
/// assert!(failing_function().is_err());
/// ```
pub type Result<T> = std::result::Result<T, MeridianError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_with_question_mark() -> Result<()> {
        fn inner() -> Result<i32> {
            Ok(42)
        }

        let value = inner()?;
        assert_eq!(value, 42);
        Ok(())
    }
}
