use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use log::debug;
use thiserror::Error;

/// A dotted numeric release version such as `1.2.0`.
///
/// Missing trailing components compare as zero, so `1.2` and `1.2.0` are
/// equal.
#[derive(Debug, Clone)]
pub struct Version {
    components: Vec<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VersionParseError {
    #[error("version string is empty")]
    Empty,
    #[error("version component '{component}' is not a non-negative integer")]
    InvalidComponent { component: String },
}

impl Version {
    /// Parse a version after stripping any non-numeric prefix such as `v`.
    ///
    /// # Errors
    /// Returns an error when nothing numeric remains or when any dot-separated
    /// component is not a non-negative integer.
    pub fn parse(raw: &str) -> Result<Self, VersionParseError> {
        let normalized = normalize(raw);
        if normalized.is_empty() {
            return Err(VersionParseError::Empty);
        }

        let components = normalized
            .split('.')
            .map(|part| {
                part.parse::<u64>()
                    .map_err(|_| VersionParseError::InvalidComponent {
                        component: part.to_string(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { components })
    }

    #[must_use]
    pub fn components(&self) -> &[u64] {
        &self.components
    }

    fn component(&self, index: usize) -> u64 {
        self.components.get(index).copied().unwrap_or(0)
    }
}

impl FromStr for Version {
    type Err = VersionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for component in &self.components {
            if !first {
                f.write_str(".")?;
            }
            write!(f, "{component}")?;
            first = false;
        }
        Ok(())
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.components.len().max(other.components.len());
        (0..len)
            .map(|index| self.component(index).cmp(&other.component(index)))
            .find(|ordering| ordering.is_ne())
            .unwrap_or(Ordering::Equal)
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Version {}

/// Strip surrounding whitespace and any leading non-digit characters
/// (`v1.2.3` and `release-1.2.3` both become `1.2.3`).
#[must_use]
pub fn normalize(raw: &str) -> &str {
    raw.trim().trim_start_matches(|ch: char| !ch.is_ascii_digit())
}

/// Whether `candidate` is a strictly newer release than `current`.
///
/// Fails closed: if either side does not parse, the answer is `false`.
#[must_use]
pub fn is_newer(candidate: &str, current: &str) -> bool {
    match (Version::parse(candidate), Version::parse(current)) {
        (Ok(candidate), Ok(current)) => candidate > current,
        (Err(error), _) => {
            debug!("Ignoring unparseable candidate version '{candidate}': {error}");
            false
        }
        (_, Err(error)) => {
            debug!("Ignoring comparison against unparseable version '{current}': {error}");
            false
        }
    }
}
