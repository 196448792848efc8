//! Types for global one-time configuration of the runtime parameters used by
//! the reclamation scheme.

use conquer_once::OnceCell;

include!(concat!(env!("OUT_DIR"), "/build_constants.rs"));

/// Global one-time configuration for the default domain.
///
/// Must be initialized before the default domain is first used, later
/// initialization has no effect on it.
pub static CONFIG: OnceCell<Config> = OnceCell::uninit();

////////////////////////////////////////////////////////////////////////////////////////////////////
// ConfigError
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Errors returned when validating configuration parameters.
#[derive(Copy, Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum ConfigError {
    /// A scan threshold of 0 was requested.
    #[error("scan threshold must be greater than 0")]
    ZeroScanThreshold,
    /// The scan threshold is used as a bit mask and must be a power of two.
    #[error("scan threshold must be a power of two (got {0})")]
    ScanThresholdNotPowerOfTwo(u32),
    /// Bucket and lock counts must be non-zero powers of two.
    #[error("{kind} count must be a non-zero power of two (got {count})")]
    InvalidShardCount {
        /// Either `"bucket"` or `"lock"`.
        kind: &'static str,
        /// The rejected count.
        count: usize,
    },
    /// The global [`CONFIG`] has already been set.
    #[error("global configuration is already initialized")]
    AlreadyInitialized,
}

////////////////////////////////////////////////////////////////////////////////////////////////////
// Config
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Runtime configuration parameters of a [`Domain`][crate::Domain].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Config {
    scan_threshold: u32,
}

/********** impl Default **************************************************************************/

impl Default for Config {
    #[inline]
    fn default() -> Self {
        Self { scan_threshold: DEFAULT_SCAN_THRESHOLD }
    }
}

/********** impl inherent *************************************************************************/

impl Config {
    /// Creates a new [`Config`] with the given parameters.
    ///
    /// # Errors
    ///
    /// Fails if `scan_threshold` is 0 or not a power of two.
    #[inline]
    pub fn with_params(scan_threshold: u32) -> Result<Self, ConfigError> {
        match scan_threshold {
            0 => Err(ConfigError::ZeroScanThreshold),
            n if !n.is_power_of_two() => Err(ConfigError::ScanThresholdNotPowerOfTwo(n)),
            _ => Ok(Self { scan_threshold }),
        }
    }

    /// Returns the scan threshold.
    ///
    /// Every `scan_threshold`-th retired record triggers an attempt to
    /// reclaim all records retired in the same domain.
    #[inline]
    pub fn scan_threshold(&self) -> u32 {
        self.scan_threshold
    }

    /// Sets `self` as the configuration of the default domain.
    ///
    /// # Errors
    ///
    /// Fails if the global configuration has already been set.
    #[inline]
    pub fn init_global(self) -> Result<(), ConfigError> {
        CONFIG.try_init_once(|| self).map_err(|_| ConfigError::AlreadyInitialized)
    }

    #[inline]
    pub(crate) fn scan_mask(&self) -> usize {
        self.scan_threshold as usize - 1
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
// ConfigBuilder
////////////////////////////////////////////////////////////////////////////////////////////////////

/// A builder type for gradually initializing a [`Config`].
#[derive(Copy, Clone, Debug, Default)]
pub struct ConfigBuilder {
    scan_threshold: Option<u32>,
}

impl ConfigBuilder {
    /// Creates a new [`ConfigBuilder`] with default values.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the scan threshold.
    #[inline]
    pub fn scan_threshold(mut self, scan_threshold: u32) -> Self {
        self.scan_threshold = Some(scan_threshold);
        self
    }

    /// Consumes the [`ConfigBuilder`] and returns a validated [`Config`].
    ///
    /// Unspecified parameters are initialized with their default values.
    #[inline]
    pub fn build(self) -> Result<Config, ConfigError> {
        Config::with_params(self.scan_threshold.unwrap_or(DEFAULT_SCAN_THRESHOLD))
    }
}

#[cfg(test)]
mod tests {
    use matches::assert_matches;

    use super::{Config, ConfigBuilder, ConfigError, DEFAULT_SCAN_THRESHOLD};

    #[test]
    fn defaults() {
        let config = ConfigBuilder::new().build().unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.scan_threshold(), DEFAULT_SCAN_THRESHOLD);
        assert_eq!(config.scan_mask() + 1, DEFAULT_SCAN_THRESHOLD as usize);
    }

    #[test]
    fn invalid_threshold() {
        assert_matches!(Config::with_params(0), Err(ConfigError::ZeroScanThreshold));
        assert_matches!(
            ConfigBuilder::new().scan_threshold(100).build(),
            Err(ConfigError::ScanThresholdNotPowerOfTwo(100))
        );
        assert_eq!(Config::with_params(1).unwrap().scan_mask(), 0);
    }
}
