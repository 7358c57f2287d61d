//! pin parsing and validation
//!
//! the pin is validated before anything cryptographic happens, so a typo
//! never burns a network round trip or a pake handle.

use std::fmt;

use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::{Error, Result};

/// required pin length in digits
pub const PIN_LEN: usize = 6;

/// a validated 6-digit pin. storage is zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Pin(String);

impl Pin {
    /// parse user input. surrounding whitespace is tolerated, everything
    /// else must be exactly six ascii digits.
    pub fn parse(input: &str) -> Result<Self> {
        let trimmed = input.trim();
        if trimmed.len() != PIN_LEN || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
            return Err(Error::InvalidInput("pin must be exactly 6 digits".into()));
        }
        Ok(Self(trimmed.to_owned()))
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Debug for Pin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Pin(******)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid() {
        let pin = Pin::parse("842119").unwrap();
        assert_eq!(pin.as_bytes(), b"842119");
    }

    #[test]
    fn test_parse_trims_whitespace() {
        let pin = Pin::parse("  842119\n").unwrap();
        assert_eq!(pin.as_bytes(), b"842119");
    }

    #[test]
    fn test_parse_rejects_wrong_length() {
        assert!(matches!(Pin::parse("84211"), Err(Error::InvalidInput(_))));
        assert!(matches!(Pin::parse("8421199"), Err(Error::InvalidInput(_))));
        assert!(matches!(Pin::parse(""), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_parse_rejects_non_digits() {
        assert!(matches!(Pin::parse("84211a"), Err(Error::InvalidInput(_))));
        assert!(matches!(Pin::parse("84 119"), Err(Error::InvalidInput(_))));
        // fullwidth digits are not ascii digits
        assert!(matches!(Pin::parse("８４２１１９"), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_debug_hides_digits() {
        let pin = Pin::parse("842119").unwrap();
        assert_eq!(format!("{pin:?}"), "Pin(******)");
    }
}
