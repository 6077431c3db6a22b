//! Password strength rules
//!
//! Four independent checks that a caller composes as needed. [`PasswordValidator::validate`]
//! runs every applicable rule and reports all violations instead of stopping at the first.
//!
//! The common password list is loaded once at startup into a [`CommonPasswordSet`]
//! and shared behind an `Arc`.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

const EMBEDDED_LIST: &str = include_str!("common-passwords.txt");

/// A single failed rule
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PasswordViolation {
    #[error("password is too short, should be at least {min_length} characters long")]
    TooShort { min_length: usize },

    #[error("password is too similar to the user attribute")]
    TooSimilar,

    #[error("the password cannot be entirely numeric")]
    EntirelyNumeric,

    #[error("password is too common")]
    TooCommon,
}

/// Failure to load a common password list
#[derive(Debug, Error)]
pub enum CommonPasswordError {
    #[error("Failed to read common password list {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Common password list {0} is empty")]
    Empty(String),
}

/// Lowercased, trimmed common passwords
#[derive(Debug, Clone, Default)]
pub struct CommonPasswordSet {
    passwords: HashSet<String>,
}

impl CommonPasswordSet {
    /// The list bundled with the binary
    pub fn embedded() -> Self {
        Self::parse(EMBEDDED_LIST)
    }

    /// One password per line
    pub fn parse(text: &str) -> Self {
        let passwords = text
            .lines()
            .map(normalize)
            .filter(|line| !line.is_empty())
            .collect();
        Self { passwords }
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, CommonPasswordError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| CommonPasswordError::Read {
            path: path.display().to_string(),
            source,
        })?;

        let set = Self::parse(&text);
        if set.is_empty() {
            return Err(CommonPasswordError::Empty(path.display().to_string()));
        }
        Ok(set)
    }

    /// Load from `path` when given, otherwise the embedded list
    pub fn load(path: Option<&Path>) -> Result<Self, CommonPasswordError> {
        match path {
            Some(path) => Self::from_file(path),
            None => Ok(Self::embedded()),
        }
    }

    pub fn contains(&self, password: &str) -> bool {
        self.passwords.contains(&normalize(password))
    }

    pub fn len(&self) -> usize {
        self.passwords.len()
    }

    pub fn is_empty(&self) -> bool {
        self.passwords.is_empty()
    }
}

fn normalize(value: &str) -> String {
    value.trim().to_lowercase()
}

/// What a full validation pass looks at
#[derive(Debug, Clone, Copy)]
pub struct PasswordInput<'a> {
    pub password: &'a str,
    pub username: Option<&'a str>,
    pub email: Option<&'a str>,
}

impl<'a> PasswordInput<'a> {
    pub fn new(password: &'a str) -> Self {
        Self {
            password,
            username: None,
            email: None,
        }
    }

    pub fn with_username(mut self, username: &'a str) -> Self {
        self.username = Some(username);
        self
    }

    pub fn with_email(mut self, email: &'a str) -> Self {
        self.email = Some(email);
        self
    }
}

/// Password rule engine
#[derive(Debug, Clone)]
pub struct PasswordValidator {
    common: Arc<CommonPasswordSet>,
    min_length: usize,
}

impl PasswordValidator {
    pub fn new(common: Arc<CommonPasswordSet>, min_length: usize) -> Self {
        Self { common, min_length }
    }

    pub fn min_length(&self) -> usize {
        self.min_length
    }

    /// Fails when the password has fewer than `min_length` characters
    pub fn minimum_length(password: &str, min_length: usize) -> Result<(), PasswordViolation> {
        if password.chars().count() < min_length {
            return Err(PasswordViolation::TooShort { min_length });
        }
        Ok(())
    }

    /// Fails when the password is a substring of the username or the email
    ///
    /// Case-sensitive. Missing attributes are not checked.
    pub fn user_attribute_similarity(
        password: &str,
        username: Option<&str>,
        email: Option<&str>,
    ) -> Result<(), PasswordViolation> {
        let similar = [username, email]
            .into_iter()
            .flatten()
            .any(|attribute| attribute.contains(password));
        if similar {
            return Err(PasswordViolation::TooSimilar);
        }
        Ok(())
    }

    /// Fails when the whole password parses as a non-zero number
    ///
    /// A password that parses to zero ("0", "0000", "0.0") passes this check.
    /// NaN and infinities count as non-zero.
    pub fn numeric_only(password: &str) -> Result<(), PasswordViolation> {
        match password.parse::<f64>() {
            Ok(value) if value != 0.0 => Err(PasswordViolation::EntirelyNumeric),
            _ => Ok(()),
        }
    }

    /// Fails when the trimmed, lowercased password is in the common list
    pub fn common_password(&self, password: &str) -> Result<(), PasswordViolation> {
        if self.common.contains(password) {
            return Err(PasswordViolation::TooCommon);
        }
        Ok(())
    }

    /// Run every rule and collect all violations
    pub fn validate(&self, input: &PasswordInput<'_>) -> Result<(), Vec<PasswordViolation>> {
        let violations: Vec<PasswordViolation> = [
            Self::minimum_length(input.password, self.min_length),
            Self::user_attribute_similarity(input.password, input.username, input.email),
            Self::numeric_only(input.password),
            self.common_password(input.password),
        ]
        .into_iter()
        .filter_map(Result::err)
        .collect();

        if violations.is_empty() {
            Ok(())
        } else {
            Err(violations)
        }
    }
}
