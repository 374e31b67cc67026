// SPDX-License-Identifier: Apache-2.0 or BSD-3-Clause

//! Result codes returned to the guest by every nvmap ioctl.

use std::fmt::{self, Display};

/// Mapping of handler outcomes to the driver's result codes.
///
/// The values are the negated errno numbers the driver hands back, guest
/// code compares against them directly.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum NvResult {
    Success = 0,
    OutOfMemory = -12,
    InvalidInput = -22,
    NotSupported = -25,
}

impl NvResult {
    /// Raw value written into the guest's ioctl return slot.
    pub const fn as_raw(self) -> i32 {
        self as i32
    }

    pub const fn is_success(self) -> bool {
        matches!(self, Self::Success)
    }
}

impl From<NvResult> for i32 {
    fn from(result: NvResult) -> Self {
        result.as_raw()
    }
}

impl Display for NvResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Success => "success",
            Self::OutOfMemory => "out of memory",
            Self::InvalidInput => "invalid input",
            Self::NotSupported => "not supported",
        };
        write!(f, "{name} ({})", self.as_raw())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_values() {
        assert_eq!(NvResult::Success.as_raw(), 0);
        assert_eq!(NvResult::OutOfMemory.as_raw(), -12);
        assert_eq!(NvResult::InvalidInput.as_raw(), -22);
        assert_eq!(i32::from(NvResult::NotSupported), -25);
    }

    #[test]
    fn test_display() {
        assert_eq!(NvResult::InvalidInput.to_string(), "invalid input (-22)");
        assert!(NvResult::Success.is_success());
        assert!(!NvResult::OutOfMemory.is_success());
    }
}
