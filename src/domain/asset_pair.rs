//! Asset pair value type.

use crate::domain::error::MigratorError;
use std::fmt;

/// A tradable instrument: identifier plus the number of decimal places
/// prices are rounded to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AssetPair {
    id: String,
    accuracy: u32,
}

impl AssetPair {
    /// Largest accuracy accepted. `10^accuracy` must stay exactly
    /// representable as an f64.
    pub const MAX_ACCURACY: i64 = 15;

    pub fn new(id: impl Into<String>, accuracy: i64) -> Result<Self, MigratorError> {
        let id = id.into();
        let trimmed = id.trim();
        if trimmed.is_empty() {
            return Err(MigratorError::InvalidAssetPair {
                reason: "asset pair id must not be empty".into(),
            });
        }
        if accuracy < 0 {
            return Err(MigratorError::InvalidAssetPair {
                reason: format!("accuracy for {trimmed} must be non-negative, got {accuracy}"),
            });
        }
        if accuracy > Self::MAX_ACCURACY {
            return Err(MigratorError::InvalidAssetPair {
                reason: format!(
                    "accuracy for {trimmed} must be at most {}, got {accuracy}",
                    Self::MAX_ACCURACY
                ),
            });
        }
        Ok(Self {
            id: trimmed.to_string(),
            accuracy: accuracy as u32,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn accuracy(&self) -> u32 {
        self.accuracy
    }

    /// Round a price to this pair's accuracy.
    pub fn round_price(&self, price: f64) -> f64 {
        let factor = 10f64.powi(self.accuracy as i32);
        (price * factor).round() / factor
    }
}

impl fmt::Display for AssetPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}
