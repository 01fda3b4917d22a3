//! Store session abstraction
//!
//! The transfer loop only needs two capabilities from the archive link:
//! store one object, and release the link at the end. Keeping that behind a
//! trait lets the folder bookkeeping be exercised without a live archive.

use std::fmt;

use dicom_object::DefaultDicomObject;

use crate::error::Result;

/// DIMSE status of a store response. Zero is success; anything else is
/// treated as a rejection of the object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreStatus(pub u16);

impl StoreStatus {
    pub const SUCCESS: StoreStatus = StoreStatus(0);

    pub fn is_success(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for StoreStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:04x}", self.0)
    }
}

/// An established association that can store objects.
pub trait StoreSession {
    /// Store one object on the archive and return its response status.
    ///
    /// An `Err` means the request could not be carried out at all (broken
    /// link, no matching presentation context); a non-success status means
    /// the archive answered and refused.
    fn store(&mut self, object: &DefaultDicomObject) -> Result<StoreStatus>;

    /// Release the association gracefully.
    fn release(self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_display_and_success() {
        assert!(StoreStatus::SUCCESS.is_success());
        assert!(!StoreStatus(0xA700).is_success());
        assert_eq!(StoreStatus(0xA700).to_string(), "0xa700");
        assert_eq!(StoreStatus::SUCCESS.to_string(), "0x0000");
    }
}
