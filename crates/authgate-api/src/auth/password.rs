//! Password hashing and verification using Argon2id
//!
//! Records are self-describing so that historical hashes stay verifiable
//! after the configured cost parameters change:
//!
//! ```text
//! argon2$argon2id$v=19$m=102400,t=2,p=8$<salt>$<key>
//! ```
//!
//! - Salt and key: base64 URL-safe alphabet, no padding
//! - Salt: 16 random bytes from the OS RNG (default)
//! - Key: 32 bytes (default)
//! - Verification re-derives with the parameters embedded in the record and
//!   compares in constant time

use argon2::{Algorithm, Argon2, Params, Version};
use authgate_core::PasswordConfig;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::{rngs::OsRng, RngCore};
use std::fmt;
use subtle::ConstantTimeEq;
use thiserror::Error;

/// Scheme tag in the first field of every record
pub const SCHEME: &str = "argon2";

const FIELD_COUNT: usize = 6;

/// Password hashing and verification errors
#[derive(Debug, Error)]
pub enum PasswordError {
    #[error("Failed to hash password: {0}")]
    HashingFailed(String),

    #[error("Invalid password hash format: {0}")]
    InvalidHashFormat(String),

    #[error("Password task failed: {0}")]
    TaskFailed(String),
}

fn invalid(reason: impl Into<String>) -> PasswordError {
    PasswordError::InvalidHashFormat(reason.into())
}

/// Argon2 cost parameters
///
/// These parameters are tuned for security while maintaining acceptable performance.
/// Increasing memory or iterations improves security but slows down hashing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Argon2Params {
    /// Memory cost in KiB (default: 102400 = 100 MiB)
    pub memory_cost: u32,
    /// Time cost (iterations, default: 2)
    pub time_cost: u32,
    /// Parallelism (lanes, default: 8)
    pub parallelism: u32,
    /// Derived key length in bytes (default: 32)
    pub key_length: u32,
}

impl Default for Argon2Params {
    fn default() -> Self {
        Self {
            memory_cost: 102_400,
            time_cost: 2,
            parallelism: 8,
            key_length: 32,
        }
    }
}

impl Argon2Params {
    /// Create Argon2 parameters from this configuration
    fn to_params(self) -> Result<Params, argon2::Error> {
        Params::new(
            self.memory_cost,
            self.time_cost,
            self.parallelism,
            Some(self.key_length as usize),
        )
    }

    fn parse(field: &str, key_length: usize) -> Result<Self, PasswordError> {
        let mut memory_cost = None;
        let mut time_cost = None;
        let mut parallelism = None;

        for pair in field.split(',') {
            let (name, value) = pair
                .split_once('=')
                .ok_or_else(|| invalid("malformed parameter"))?;
            let value: u32 = value
                .parse()
                .map_err(|_| invalid(format!("parameter {name} is not a number")))?;
            let slot = match name {
                "m" => &mut memory_cost,
                "t" => &mut time_cost,
                "p" => &mut parallelism,
                _ => return Err(invalid(format!("unknown parameter {name}"))),
            };
            if slot.replace(value).is_some() {
                return Err(invalid(format!("duplicate parameter {name}")));
            }
        }

        let key_length =
            u32::try_from(key_length).map_err(|_| invalid("derived key is too long"))?;

        Ok(Self {
            memory_cost: memory_cost.ok_or_else(|| invalid("missing m"))?,
            time_cost: time_cost.ok_or_else(|| invalid("missing t"))?,
            parallelism: parallelism.ok_or_else(|| invalid("missing p"))?,
            key_length,
        })
    }
}

impl From<&PasswordConfig> for Argon2Params {
    fn from(config: &PasswordConfig) -> Self {
        Self {
            memory_cost: config.memory_cost,
            time_cost: config.time_cost,
            parallelism: config.parallelism,
            key_length: config.key_length,
        }
    }
}

/// A decoded password record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PasswordRecord {
    pub algorithm: Algorithm,
    pub version: Version,
    pub params: Argon2Params,
    pub salt: Vec<u8>,
    pub key: Vec<u8>,
}

impl PasswordRecord {
    /// Parse an encoded record without running the KDF.
    pub fn parse(encoded: &str) -> Result<Self, PasswordError> {
        let fields: Vec<&str> = encoded.split('$').collect();
        if fields.len() != FIELD_COUNT {
            return Err(invalid(format!(
                "expected {FIELD_COUNT} fields, found {}",
                fields.len()
            )));
        }

        if fields[0] != SCHEME {
            return Err(invalid(format!("unsupported scheme {}", fields[0])));
        }

        let algorithm = match fields[1] {
            "argon2id" => Algorithm::Argon2id,
            "argon2i" => Algorithm::Argon2i,
            "argon2d" => Algorithm::Argon2d,
            other => return Err(invalid(format!("unsupported variant {other}"))),
        };

        let version = fields[2]
            .strip_prefix("v=")
            .and_then(|v| v.parse::<u32>().ok())
            .and_then(|v| Version::try_from(v).ok())
            .ok_or_else(|| invalid("bad version"))?;

        let salt = URL_SAFE_NO_PAD
            .decode(fields[4])
            .map_err(|_| invalid("salt is not base64"))?;
        let key = URL_SAFE_NO_PAD
            .decode(fields[5])
            .map_err(|_| invalid("hash is not base64"))?;

        if salt.len() < argon2::MIN_SALT_LEN {
            return Err(invalid("salt is too short"));
        }
        if key.len() < Params::MIN_OUTPUT_LEN {
            return Err(invalid("hash is too short"));
        }

        let params = Argon2Params::parse(fields[3], key.len())?;
        // Reject parameter sets Argon2 itself would refuse before doing any work.
        params
            .to_params()
            .map_err(|e| invalid(format!("bad parameters: {e}")))?;

        Ok(Self {
            algorithm,
            version,
            params,
            salt,
            key,
        })
    }

    /// Re-derive from `password` with the embedded parameters and compare.
    fn matches(&self, password: &str) -> Result<bool, PasswordError> {
        let derived = derive_key(password, &self.salt, self.algorithm, self.version, self.params)?;
        Ok(bool::from(derived.ct_eq(&self.key)))
    }
}

impl fmt::Display for PasswordRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{SCHEME}${}$v={}$m={},t={},p={}${}${}",
            self.algorithm.as_str(),
            u32::from(self.version),
            self.params.memory_cost,
            self.params.time_cost,
            self.params.parallelism,
            URL_SAFE_NO_PAD.encode(&self.salt),
            URL_SAFE_NO_PAD.encode(&self.key),
        )
    }
}

fn derive_key(
    password: &str,
    salt: &[u8],
    algorithm: Algorithm,
    version: Version,
    params: Argon2Params,
) -> Result<Vec<u8>, PasswordError> {
    let argon2 = Argon2::new(
        algorithm,
        version,
        params
            .to_params()
            .map_err(|e| PasswordError::HashingFailed(e.to_string()))?,
    );

    let mut key = vec![0u8; params.key_length as usize];
    argon2
        .hash_password_into(password.as_bytes(), salt, &mut key)
        .map_err(|e| PasswordError::HashingFailed(e.to_string()))?;
    Ok(key)
}

/// Argon2id hasher carrying the current cost parameters
#[derive(Debug, Clone)]
pub struct PasswordHasher {
    params: Argon2Params,
    salt_length: usize,
}

impl Default for PasswordHasher {
    fn default() -> Self {
        Self::new(Argon2Params::default(), 16)
    }
}

impl PasswordHasher {
    pub fn new(params: Argon2Params, salt_length: usize) -> Self {
        Self {
            params,
            salt_length,
        }
    }

    pub fn from_config(config: &PasswordConfig) -> Self {
        Self::new(Argon2Params::from(config), config.salt_length)
    }

    pub fn params(&self) -> Argon2Params {
        self.params
    }

    /// Hash a plaintext password with a fresh random salt
    ///
    /// # Arguments
    ///
    /// * `password` - The plaintext password to hash
    ///
    /// # Returns
    ///
    /// * `Ok(String)` - Encoded record (scheme, variant, version, params, salt, hash)
    /// * `Err(PasswordError)` - If the parameters are rejected by Argon2
    ///
    /// # Example
    ///
    /// ```no_run
    /// use authgate_api::auth::password::PasswordHasher;
    ///
    /// let hasher = PasswordHasher::default();
    /// let record = hasher.hash("SecureP@ssw0rd!").expect("Failed to hash password");
    /// assert!(record.starts_with("argon2$argon2id$v=19$m=102400,t=2,p=8$"));
    /// ```
    pub fn hash(&self, password: &str) -> Result<String, PasswordError> {
        let mut salt = vec![0u8; self.salt_length];
        OsRng.fill_bytes(&mut salt);

        let key = derive_key(
            password,
            &salt,
            Algorithm::Argon2id,
            Version::V0x13,
            self.params,
        )?;

        let record = PasswordRecord {
            algorithm: Algorithm::Argon2id,
            version: Version::V0x13,
            params: self.params,
            salt,
            key,
        };
        Ok(record.to_string())
    }

    /// Verify a plaintext password against an encoded record
    ///
    /// The record's own parameters are used, never this hasher's.
    ///
    /// # Returns
    ///
    /// * `Ok(true)` - Password matches
    /// * `Ok(false)` - Password does not match
    /// * `Err(PasswordError::InvalidHashFormat)` - The record is structurally corrupt;
    ///   returned before any key derivation runs
    pub fn verify(&self, encoded: &str, password: &str) -> Result<bool, PasswordError> {
        PasswordRecord::parse(encoded)?.matches(password)
    }

    /// True when `encoded` was produced with parameters other than the current ones
    pub fn needs_rehash(&self, encoded: &str) -> Result<bool, PasswordError> {
        let record = PasswordRecord::parse(encoded)?;
        Ok(record.algorithm != Algorithm::Argon2id
            || record.version != Version::V0x13
            || record.params != self.params
            || record.salt.len() != self.salt_length)
    }

    /// [`hash`](Self::hash) on the blocking thread pool
    pub async fn hash_blocking(&self, password: String) -> Result<String, PasswordError> {
        let hasher = self.clone();
        tokio::task::spawn_blocking(move || hasher.hash(&password))
            .await
            .map_err(|e| PasswordError::TaskFailed(e.to_string()))?
    }

    /// [`verify`](Self::verify) on the blocking thread pool
    pub async fn verify_blocking(
        &self,
        encoded: String,
        password: String,
    ) -> Result<bool, PasswordError> {
        let hasher = self.clone();
        tokio::task::spawn_blocking(move || hasher.verify(&encoded, &password))
            .await
            .map_err(|e| PasswordError::TaskFailed(e.to_string()))?
    }
}
