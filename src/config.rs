/// Default floor of the external dependency download progress.
pub const DEFAULT_PROGRESS_FLOOR: f32 = 0.75;

/// Tunables of the [`Loader`].
///
/// [`Loader`]: ./struct.Loader.html
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct Config {
    /// Percentage the external download operation reports before any byte is fetched.
    /// Subtracted from raw progress which is then rescaled to `[0, 1]`.
    ///
    /// Depends on the version of the wrapped service and may require recalibration.
    pub progress_floor: f32,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            progress_floor: DEFAULT_PROGRESS_FLOOR,
        }
    }
}

impl Config {
    /// Returns config with values forced into valid ranges.
    pub fn sanitized(mut self) -> Self {
        if !(0.0..1.0).contains(&self.progress_floor) {
            let floor = if self.progress_floor.is_nan() {
                DEFAULT_PROGRESS_FLOOR
            } else {
                self.progress_floor.max(0.0).min(0.99)
            };
            tracing::warn!(
                "Progress floor {} is out of [0, 1) range. Using {}",
                self.progress_floor,
                floor
            );
            self.progress_floor = floor;
        }
        self
    }
}
