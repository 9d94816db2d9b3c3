//! Status codes for navigation mesh operations
//!
//! A status is a bitmask: one of the high-level flags (failure, success,
//! in progress) combined with any number of detail flags. Fallible core
//! operations return [`Result`], carrying a failure status in the error
//! position; successful results with details carry the status alongside the
//! value.

use std::fmt;

/// Result type for navigation mesh operations
pub type Result<T> = std::result::Result<T, Status>;

/// Status bitmask for navigation mesh operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Status(pub u32);

// High level status flags
impl Status {
    /// Operation failed
    pub const FAILURE: u32 = 1u32 << 31;
    /// Operation succeeded
    pub const SUCCESS: u32 = 1u32 << 30;
    /// Operation still in progress
    pub const IN_PROGRESS: u32 = 1u32 << 29;

    // Detail information for status
    pub const DETAIL_MASK: u32 = 0x0ff_ffff;
    /// Input data is not recognized
    pub const WRONG_MAGIC: u32 = 1 << 0;
    /// Input data is in wrong version
    pub const WRONG_VERSION: u32 = 1 << 1;
    /// Operation ran out of memory
    pub const OUT_OF_MEMORY: u32 = 1 << 2;
    /// An input parameter was invalid
    pub const INVALID_PARAM: u32 = 1 << 3;
    /// Result buffer for the query was too small to store all results
    pub const BUFFER_TOO_SMALL: u32 = 1 << 4;
    /// Query ran out of nodes during search
    pub const OUT_OF_NODES: u32 = 1 << 5;
    /// Query did not reach the end location, returning best guess
    pub const PARTIAL_RESULT: u32 = 1 << 6;
    /// A tile has already been assigned to the given x,y,layer coordinate
    pub const ALREADY_OCCUPIED: u32 = 1 << 7;

    /// Creates a new status with the given flags
    pub const fn new(flags: u32) -> Self {
        Self(flags)
    }

    /// Creates a success status
    pub const fn success() -> Self {
        Self(Self::SUCCESS)
    }

    /// Creates a failure status
    pub const fn failure() -> Self {
        Self(Self::FAILURE)
    }

    /// Creates a failure status with detail
    pub const fn failure_detail(detail: u32) -> Self {
        Self(Self::FAILURE | detail)
    }

    /// Creates a success status with detail
    pub const fn success_detail(detail: u32) -> Self {
        Self(Self::SUCCESS | detail)
    }

    /// Creates an in-progress status
    pub const fn in_progress() -> Self {
        Self(Self::IN_PROGRESS)
    }

    /// Shorthand for `FAILURE | INVALID_PARAM`
    pub const fn invalid_param() -> Self {
        Self(Self::FAILURE | Self::INVALID_PARAM)
    }

    /// Raw bit value
    pub const fn bits(&self) -> u32 {
        self.0
    }

    /// Returns a copy with the given detail flags added
    #[must_use]
    pub const fn with_detail(self, detail: u32) -> Self {
        Self(self.0 | (detail & Self::DETAIL_MASK))
    }

    /// Returns true if status is success
    pub fn is_success(&self) -> bool {
        (self.0 & Self::SUCCESS) != 0
    }

    /// Returns true if status is failure
    pub fn is_failure(&self) -> bool {
        (self.0 & Self::FAILURE) != 0
    }

    /// Returns true if status is in progress
    pub fn is_in_progress(&self) -> bool {
        (self.0 & Self::IN_PROGRESS) != 0
    }

    /// Returns true if specific detail is set
    pub fn has_detail(&self, detail: u32) -> bool {
        (self.0 & detail) != 0
    }

    /// Gets the detail mask
    pub fn detail(&self) -> u32 {
        self.0 & Self::DETAIL_MASK
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_success() {
            write!(f, "Success")?;
        } else if self.is_failure() {
            write!(f, "Failure")?;
        } else if self.is_in_progress() {
            write!(f, "In Progress")?;
        } else {
            write!(f, "Unknown")?;
        }

        const DETAILS: [(u32, &str); 8] = [
            (Status::WRONG_MAGIC, "Wrong Magic"),
            (Status::WRONG_VERSION, "Wrong Version"),
            (Status::OUT_OF_MEMORY, "Out of Memory"),
            (Status::INVALID_PARAM, "Invalid Param"),
            (Status::BUFFER_TOO_SMALL, "Buffer Too Small"),
            (Status::OUT_OF_NODES, "Out of Nodes"),
            (Status::PARTIAL_RESULT, "Partial Result"),
            (Status::ALREADY_OCCUPIED, "Already Occupied"),
        ];

        let details: Vec<&str> = DETAILS
            .iter()
            .filter(|(bit, _)| self.has_detail(*bit))
            .map(|(_, name)| *name)
            .collect();

        if !details.is_empty() {
            write!(f, " ({})", details.join(", "))?;
        }

        Ok(())
    }
}

impl Default for Status {
    fn default() -> Self {
        Self::success()
    }
}

impl std::error::Error for Status {}

impl From<divert_common::Error> for Status {
    fn from(err: divert_common::Error) -> Self {
        match err {
            divert_common::Error::WrongMagic(_) => Status::failure_detail(Status::WRONG_MAGIC),
            divert_common::Error::WrongVersion(_) => Status::failure_detail(Status::WRONG_VERSION),
            _ => Status::invalid_param(),
        }
    }
}

impl From<std::collections::TryReserveError> for Status {
    fn from(_: std::collections::TryReserveError) -> Self {
        Status::failure_detail(Status::OUT_OF_MEMORY)
    }
}
