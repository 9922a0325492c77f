use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Maximum length of a VM name.
///
/// The control socket lives at `<state_root>/<name>/<name>.sock`, which must
/// fit in the 108-byte `sun_path` of a Unix socket address.
pub const MAX_NAME_LEN: usize = 32;

/// Caller-chosen unique identifier of a VM.
///
/// Names are used verbatim as path components, so only ASCII alphanumerics,
/// `-` and `_` are accepted and the first character must be alphanumeric.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VmName(String);

impl VmName {
    /// Validates and wraps a VM name.
    ///
    /// # Errors
    /// Returns [`CoreError::InvalidName`] if the name is empty, too long,
    /// or contains characters outside `[A-Za-z0-9_-]`.
    pub fn new(name: impl Into<String>) -> Result<Self, CoreError> {
        let name = name.into();
        validate(&name)?;
        Ok(Self(name))
    }

    /// Returns the name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn validate(name: &str) -> Result<(), CoreError> {
    let invalid = |reason| CoreError::InvalidName { name: name.to_owned(), reason };

    let Some(first) = name.chars().next() else {
        return Err(invalid("name must not be empty"));
    };
    if name.len() > MAX_NAME_LEN {
        return Err(invalid("name must be at most 32 characters"));
    }
    if !first.is_ascii_alphanumeric() {
        return Err(invalid("name must start with an ASCII letter or digit"));
    }
    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
        return Err(invalid("name may only contain ASCII letters, digits, '-' and '_'"));
    }
    Ok(())
}

impl fmt::Display for VmName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for VmName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for VmName {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for VmName {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<VmName> for String {
    fn from(name: VmName) -> Self {
        name.0
    }
}
