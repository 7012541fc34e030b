//! Password hashing using Argon2id

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2, Params, Version,
};
use meshbank_types::{BankError, Result};
use zeroize::Zeroizing;

use crate::config::PasswordConfig;

/// Password service for hashing and verification
#[derive(Clone)]
pub struct PasswordService {
    config: PasswordConfig,
    min_length: usize,
}

impl PasswordService {
    pub fn new(config: PasswordConfig, min_length: usize) -> Self {
        Self { config, min_length }
    }

    fn peppered(&self, password: &str) -> Zeroizing<String> {
        match &self.config.pepper {
            Some(pepper) => Zeroizing::new(format!("{password}{pepper}")),
            None => Zeroizing::new(password.to_string()),
        }
    }

    /// Hash a password using Argon2id
    pub fn hash_password(&self, password: &str) -> Result<String> {
        self.validate_password(password)?;

        let salt = SaltString::generate(&mut OsRng);
        let params = Params::new(
            self.config.memory_cost,
            self.config.time_cost,
            self.config.parallelism,
            Some(self.config.hash_length as usize),
        )
        .map_err(|e| BankError::Internal(format!("Invalid Argon2 params: {e}")))?;

        let argon2 = Argon2::new(argon2::Algorithm::Argon2id, Version::V0x13, params);
        let hash = argon2
            .hash_password(self.peppered(password).as_bytes(), &salt)
            .map_err(|e| BankError::Internal(format!("Password hashing failed: {e}")))?;

        Ok(hash.to_string())
    }

    /// Verify a password against a stored hash. A malformed hash never
    /// verifies.
    pub fn verify_password(&self, password: &str, hash: &str) -> bool {
        let Ok(parsed) = PasswordHash::new(hash) else {
            tracing::warn!("Stored password hash is malformed");
            return false;
        };
        Argon2::default()
            .verify_password(self.peppered(password).as_bytes(), &parsed)
            .is_ok()
    }

    pub fn validate_password(&self, password: &str) -> Result<()> {
        if password.chars().count() < self.min_length {
            return Err(BankError::validation(format!(
                "Password must be at least {} characters",
                self.min_length
            )));
        }
        if password.len() > 128 {
            return Err(BankError::validation("Password must be at most 128 characters"));
        }
        Ok(())
    }
}
