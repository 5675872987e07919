//! Composite identifier codec
//!
//! Volume and node IDs cross the CSI wire as `<grid>@<integer>`: an opaque
//! grid (partition) tag plus the remote numeric ID. Earlier driver
//! generations carried two structurally identical ID types; one type now
//! serves both.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

const DELIMITER: char = '@';

/// Malformed composite identifier
#[derive(Error, Debug, PartialEq, Eq)]
pub enum IdParseError {
    #[error("no ID found")]
    Empty,

    #[error("ID does not contain enough information: {0}")]
    MissingDelimiter(String),

    #[error("ID contains too many delimiter characters: {0}")]
    ExtraDelimiter(String),

    #[error("failed to convert '{0}' into an integer")]
    BadNumber(String),
}

/// `<grid>@<integer>` identifier for a remote volume or node
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct RemoteId {
    /// Grid (partition) tag; never contains the delimiter
    pub grid: String,
    /// Remote numeric ID
    pub id: u64,
}

impl RemoteId {
    #[must_use]
    pub fn new(grid: impl Into<String>, id: u64) -> Self {
        Self {
            grid: grid.into(),
            id,
        }
    }
}

impl FromStr for RemoteId {
    type Err = IdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(IdParseError::Empty);
        }

        let mut parts = s.split(DELIMITER);
        let grid = parts.next().unwrap_or_default();
        let Some(number) = parts.next() else {
            return Err(IdParseError::MissingDelimiter(s.to_string()));
        };
        if parts.next().is_some() {
            return Err(IdParseError::ExtraDelimiter(s.to_string()));
        }

        let id = number
            .parse::<u64>()
            .map_err(|_| IdParseError::BadNumber(number.to_string()))?;

        Ok(Self {
            grid: grid.to_string(),
            id,
        })
    }
}

impl fmt::Display for RemoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.grid, DELIMITER, self.id)
    }
}
