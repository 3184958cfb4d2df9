//! Raw byte traffic for link debugging (`rawout` / `rawin`)

use core::fmt::Write as _;

use crate::{Result, TransportError};

/// Most bytes moved by one raw write or reported by one raw read
pub const MAX_RAW: usize = 120;

/// Parse space-separated hex bytes (`"81 1 0 0 0"`, `0x` prefix optional).
/// Input beyond [`MAX_RAW`] bytes is ignored.
pub fn parse_hex_bytes(text: &str) -> Result<Vec<u8>> {
    text.split_whitespace()
        .take(MAX_RAW)
        .map(|token| {
            let digits = token
                .strip_prefix("0x")
                .or_else(|| token.strip_prefix("0X"))
                .unwrap_or(token);
            u8::from_str_radix(digits, 16).map_err(|_| TransportError::InvalidRawByte {
                token: token.to_string(),
            })
        })
        .collect()
}

/// Format bytes as `"xx xx \n"`, one broadcast line
pub fn format_hex(bytes: &[u8]) -> String {
    let mut line = String::with_capacity(bytes.len() * 3 + 1);
    for byte in bytes {
        let _ = write!(line, "{:02x} ", byte);
    }
    line.push('\n');
    line
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hex_bytes() {
        assert_eq!(parse_hex_bytes("81 1 0 0 0").unwrap(), vec![0x81, 0x01, 0, 0, 0]);
        assert_eq!(parse_hex_bytes("  0xAC\tff \n").unwrap(), vec![0xAC, 0xFF]);
        assert!(parse_hex_bytes("").unwrap().is_empty());
    }

    #[test]
    fn test_parse_rejects_bad_tokens() {
        assert!(matches!(
            parse_hex_bytes("01 zz"),
            Err(TransportError::InvalidRawByte { token }) if token == "zz"
        ));
        assert!(matches!(
            parse_hex_bytes("100"),
            Err(TransportError::InvalidRawByte { .. })
        ));
    }

    #[test]
    fn test_parse_caps_length() {
        let text = vec!["aa"; MAX_RAW + 10].join(" ");
        assert_eq!(parse_hex_bytes(&text).unwrap().len(), MAX_RAW);
    }

    #[test]
    fn test_format_hex() {
        assert_eq!(format_hex(&[0x81, 0x01, 0x2a]), "81 01 2a \n");
        assert_eq!(format_hex(&[]), "\n");
    }
}
