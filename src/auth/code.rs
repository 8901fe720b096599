use rand::rngs::OsRng;
use rand::RngCore;

use crate::error::AppError;

// Largest multiple of 10 that fits in a byte; anything above would bias low digits.
const UNBIASED_BYTE_LIMIT: u8 = 250;

/// Numeric one-time code of exactly `length` digits drawn from the OS CSPRNG.
///
/// An entropy-source failure is returned as an internal error, never retried.
pub fn generate_code(length: usize) -> Result<String, AppError> {
    let mut code = String::with_capacity(length);
    let mut buf = [0u8; 32];

    while code.len() < length {
        OsRng
            .try_fill_bytes(&mut buf)
            .map_err(|e| AppError::InternalError(format!("entropy source failure: {}", e)))?;

        for byte in buf.iter().filter(|b| **b < UNBIASED_BYTE_LIMIT) {
            if code.len() == length {
                break;
            }
            code.push(char::from(b'0' + byte % 10));
        }
    }

    Ok(code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_has_requested_length_and_only_digits() {
        for length in [1, 4, 6, 8, 40] {
            let code = generate_code(length).unwrap();
            assert_eq!(code.len(), length);
            assert!(code.chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[test]
    fn test_zero_length_code_is_empty() {
        assert_eq!(generate_code(0).unwrap(), "");
    }

    #[test]
    fn test_every_digit_appears() {
        let sample = generate_code(2000).unwrap();
        for digit in '0'..='9' {
            assert!(sample.contains(digit), "digit {} never generated", digit);
        }
    }

    #[test]
    fn test_codes_differ() {
        let a = generate_code(12).unwrap();
        let b = generate_code(12).unwrap();
        assert_ne!(a, b);
    }
}
