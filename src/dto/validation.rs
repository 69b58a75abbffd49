//! Validation helpers for action payloads.

use validator::ValidationError;

/// Validates a wager amount against the bounds in effect for the wagering
/// player.
///
/// The bounds are dynamic (they depend on the player's current score), so
/// this runs as a plain function at submission time rather than as a derive
/// attribute. The server re-checks the same bounds and its verdict wins.
pub fn validate_wager(amount: i64, min: i64, max: i64) -> Result<(), ValidationError> {
    if amount < min || amount > max {
        let mut err = ValidationError::new("wager_out_of_range");
        err.message = Some(format!("Wager must be between {min} and {max} (got {amount})").into());
        return Err(err);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_wager_within_bounds() {
        assert!(validate_wager(5, 5, 2000).is_ok());
        assert!(validate_wager(2000, 5, 2000).is_ok());
        assert!(validate_wager(700, 5, 2000).is_ok());
    }

    #[test]
    fn test_validate_wager_out_of_bounds() {
        assert!(validate_wager(4, 5, 2000).is_err()); // below minimum
        assert!(validate_wager(2001, 5, 2000).is_err()); // above maximum
        assert!(validate_wager(-1, 0, 2000).is_err()); // negative
    }
}
