//! Protocol errors and field validation

use crate::constants::MAX_NAME_LEN;
use crate::frame::Command;

/// Errors raised when a peer violates the wire format
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("unsupported protocol version {got:#04x} (expected {expected:#04x})")]
    VersionMismatch { expected: u8, got: u8 },

    #[error("unknown command byte {0:#04x}")]
    UnknownCommand(u8),

    #[error("unexpected command: expected {expected}, got {got}")]
    UnexpectedCommand { expected: Command, got: Command },

    #[error("invalid name length {len} (must be 1..={limit})")]
    InvalidNameLength { len: usize, limit: usize },

    #[error("name is not valid UTF-8")]
    InvalidNameEncoding,

    #[error("unknown address type {0:#04x}")]
    UnknownAddressType(u8),

    #[error("address type {atype:#04x} does not match {len} address bytes")]
    AddressLengthMismatch { atype: u8, len: usize },

    #[error("invalid address '{0}': expected ip:port")]
    InvalidAddress(String),
}

/// Check an agent name against the length-prefix limits.
pub fn validate_name(name: &str) -> Result<(), ProtocolError> {
    let len = name.len();
    if len == 0 || len > MAX_NAME_LEN {
        return Err(ProtocolError::InvalidNameLength {
            len,
            limit: MAX_NAME_LEN,
        });
    }
    Ok(())
}

/// Check a length byte read off the wire before consuming the name itself.
pub(crate) fn validate_name_len(len: u8) -> Result<usize, ProtocolError> {
    let len = usize::from(len);
    if len == 0 || len > MAX_NAME_LEN {
        return Err(ProtocolError::InvalidNameLength {
            len,
            limit: MAX_NAME_LEN,
        });
    }
    Ok(len)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_bounds() {
        assert!(validate_name("a").is_ok());
        assert!(validate_name(&"x".repeat(MAX_NAME_LEN)).is_ok());
        assert!(validate_name("").is_err());
        assert!(matches!(
            validate_name(&"x".repeat(MAX_NAME_LEN + 1)),
            Err(ProtocolError::InvalidNameLength { len: 65, .. })
        ));
    }

    #[test]
    fn test_name_len_byte() {
        assert_eq!(validate_name_len(1).unwrap(), 1);
        assert_eq!(validate_name_len(64).unwrap(), 64);
        assert!(validate_name_len(0).is_err());
        assert!(validate_name_len(65).is_err());
        assert!(validate_name_len(255).is_err());
    }
}
