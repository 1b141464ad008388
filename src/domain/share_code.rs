//! Invite Code Generation
//!
//! Short human-readable codes used to join a list ("A1B-2C3").

use rand::Rng;

const CODE_CHARS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Number of random characters in a code (the dash is extra)
pub const CODE_LENGTH: usize = 6;

/// Generate a random invite code, a dash splitting the halves.
///
/// Uniqueness is not guaranteed here; callers check the store and retry.
pub fn generate() -> String {
    let mut rng = rand::thread_rng();
    let mut code = String::with_capacity(CODE_LENGTH + 1);
    for i in 0..CODE_LENGTH {
        let c = CODE_CHARS[rng.gen_range(0..CODE_CHARS.len())] as char;
        code.push(c);
        if i == CODE_LENGTH / 2 - 1 {
            code.push('-');
        }
    }
    code
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_format() {
        let code = generate();
        assert_eq!(code.len(), CODE_LENGTH + 1);
        assert_eq!(code.chars().nth(CODE_LENGTH / 2), Some('-'));
        for (i, c) in code.chars().enumerate() {
            if i == CODE_LENGTH / 2 {
                continue;
            }
            assert!(c.is_ascii_uppercase() || c.is_ascii_digit(), "unexpected char {c}");
        }
    }

    #[test]
    fn test_codes_vary() {
        let codes: std::collections::HashSet<String> = (0..32).map(|_| generate()).collect();
        assert!(codes.len() > 1);
    }
}
