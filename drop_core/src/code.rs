//! Room codes.
//!
//! Senders hand out 6-digit numeric codes. The relay only needs an opaque,
//! comparable token and rejects nothing beyond empty, oversized or
//! control-character codes.

use rand::Rng;
use thiserror::Error;

/// Number of digits in a generated room code
pub const ROOM_CODE_DIGITS: usize = 6;

/// Longest token the relay accepts as a room code
pub const MAX_ROOM_CODE_LENGTH: usize = 64;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RoomCodeError {
    #[error("room code is empty")]
    Empty,
    #[error("room code is {0} characters long, maximum is {MAX_ROOM_CODE_LENGTH}")]
    TooLong(usize),
    #[error("room code contains control characters")]
    ControlCharacters,
}

/// Generate a random 6-digit code in `100000..=999999`
pub fn generate_room_code() -> String {
    let code: u32 = rand::rng().random_range(100_000..=999_999);
    code.to_string()
}

/// Check a client-supplied room code before it reaches the registry
pub fn validate_room_code(code: &str) -> Result<(), RoomCodeError> {
    if code.trim().is_empty() {
        return Err(RoomCodeError::Empty);
    }
    if code.len() > MAX_ROOM_CODE_LENGTH {
        return Err(RoomCodeError::TooLong(code.len()));
    }
    if code.chars().any(|c| c.is_control()) {
        return Err(RoomCodeError::ControlCharacters);
    }
    Ok(())
}

/// True when `code` has the shape of a generated code (6 ASCII digits)
pub fn is_numeric_room_code(code: &str) -> bool {
    code.len() == ROOM_CODE_DIGITS && code.chars().all(|c| c.is_ascii_digit())
}
