use permsync_core::{AppError, AppResult};

use crate::UidGenerator;

/// Length of generated role UIDs.
pub const ROLE_UID_LENGTH: usize = 14;

const UID_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Generates short lower-case alphanumeric role UIDs from the OS random source.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomUidGenerator;

impl UidGenerator for RandomUidGenerator {
    fn generate(&self) -> AppResult<String> {
        let mut bytes = [0u8; ROLE_UID_LENGTH];
        getrandom::fill(&mut bytes)
            .map_err(|error| AppError::Internal(format!("failed to generate role uid: {error}")))?;

        Ok(bytes
            .iter()
            .map(|byte| char::from(UID_ALPHABET[usize::from(*byte) % UID_ALPHABET.len()]))
            .collect())
    }
}
