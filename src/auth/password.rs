use std::fmt;

use crate::config::PasswordSettings;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CharClass {
    Lower,
    Upper,
    Digit,
    Special,
}

impl CharClass {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "lower" => Some(Self::Lower),
            "upper" => Some(Self::Upper),
            "digit" => Some(Self::Digit),
            "spec" => Some(Self::Special),
            _ => None,
        }
    }

    fn matches(self, c: char) -> bool {
        match self {
            Self::Lower => c.is_lowercase(),
            Self::Upper => c.is_uppercase(),
            Self::Digit => c.is_ascii_digit(),
            Self::Special => !c.is_alphanumeric() && !c.is_whitespace(),
        }
    }
}

impl fmt::Display for CharClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Lower => "lowercase letter",
            Self::Upper => "uppercase letter",
            Self::Digit => "digit",
            Self::Special => "special character",
        })
    }
}

/// Minimum length plus required character classes.
#[derive(Debug, Clone)]
pub struct PasswordPolicy {
    pub min_length: usize,
    pub complexity: Vec<CharClass>,
}

impl PasswordPolicy {
    /// Unknown class names are rejected so a typo never disables a check.
    pub fn from_settings(settings: &PasswordSettings) -> Result<Self> {
        let complexity = settings
            .complexity
            .iter()
            .map(|name| {
                CharClass::parse(name)
                    .ok_or_else(|| Error::Config(format!("unknown password class '{name}'")))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            min_length: settings.min_length,
            complexity,
        })
    }

    pub fn check(&self, password: &str) -> Result<()> {
        if password.chars().count() < self.min_length {
            return Err(Error::Validation(format!(
                "password must be at least {} characters",
                self.min_length
            )));
        }

        let missing: Vec<String> = self
            .complexity
            .iter()
            .filter(|class| !password.chars().any(|c| class.matches(c)))
            .map(ToString::to_string)
            .collect();
        if !missing.is_empty() {
            return Err(Error::Validation(format!(
                "password must contain at least one {}",
                missing.join(", ")
            )));
        }
        Ok(())
    }
}
