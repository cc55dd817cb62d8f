//! Subflow list negotiation settings.
//!
//! The kernel cannot report how large a subflow list is before it is read.
//! Listing starts with a small buffer and grows it each time the kernel
//! answers "too small", up to the limits set here.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::SUB_IDS_HDRLEN;

/// Default size of the first list attempt, in bytes.
pub const DEFAULT_INITIAL_SIZE: usize = 40;

/// Default growth per retry, in bytes.
pub const DEFAULT_INCREMENT: usize = 20;

/// Default number of getsockopt calls before giving up.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 32;

/// Default largest buffer ever offered to the kernel.
pub const DEFAULT_MAX_SIZE: usize = 64 * 1024;

/// Buffer growth policy for listing subflows.
///
/// # Example
///
/// ```
/// use mptcp_subflow::ListConfig;
///
/// let config = ListConfig::new()
///     .initial_size(64)
///     .increment(64)
///     .max_attempts(8);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ListConfig {
    /// Buffer size of the first attempt.
    pub initial_size: usize,
    /// Bytes added after each "too small" answer.
    pub increment: usize,
    /// Maximum number of attempts.
    pub max_attempts: u32,
    /// Maximum buffer size.
    pub max_size: usize,
}

impl Default for ListConfig {
    fn default() -> Self {
        Self {
            initial_size: DEFAULT_INITIAL_SIZE,
            increment: DEFAULT_INCREMENT,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            max_size: DEFAULT_MAX_SIZE,
        }
    }
}

impl ListConfig {
    /// Create the default policy.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the first attempt's buffer size.
    pub fn initial_size(mut self, size: usize) -> Self {
        self.initial_size = size;
        self
    }

    /// Set the growth per retry.
    pub fn increment(mut self, bytes: usize) -> Self {
        self.increment = bytes;
        self
    }

    /// Set the maximum number of attempts.
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Set the maximum buffer size.
    pub fn max_size(mut self, size: usize) -> Self {
        self.max_size = size;
        self
    }

    /// Buffer size for a given zero-based attempt.
    pub fn size_for_attempt(&self, attempt: u32) -> usize {
        self.initial_size
            .saturating_add(self.increment.saturating_mul(attempt as usize))
    }

    /// Check that the policy can make progress.
    pub fn validate(&self) -> Result<()> {
        if self.initial_size < SUB_IDS_HDRLEN {
            return Err(Error::InvalidConfig(format!(
                "initial_size {} is smaller than the {}-byte list header",
                self.initial_size, SUB_IDS_HDRLEN
            )));
        }
        if self.increment == 0 {
            return Err(Error::InvalidConfig("increment must be non-zero".into()));
        }
        if self.max_attempts == 0 {
            return Err(Error::InvalidConfig("max_attempts must be non-zero".into()));
        }
        if self.max_size < self.initial_size {
            return Err(Error::InvalidConfig(format!(
                "max_size {} is below initial_size {}",
                self.max_size, self.initial_size
            )));
        }
        Ok(())
    }
}
