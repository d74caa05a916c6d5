// SPDX-License-Identifier: GPL-3.0-only
//! Sensor line protocol
//!
//! The sensor sends one ASCII line per reading, terminated by `\n`
//! (`\r\n` tolerated):
//!
//! ```text
//! 412
//! 412*07
//! ```
//!
//! The optional suffix is `*` followed by two hex digits: the XOR of the
//! reading's ASCII bytes.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("empty frame")]
    Empty,

    #[error("not a reading: {0:?}")]
    NotANumber(String),

    #[error("malformed checksum: {0:?}")]
    MalformedChecksum(String),

    #[error("checksum mismatch: frame says {expected:02X}, computed {actual:02X}")]
    BadChecksum { expected: u8, actual: u8 },
}

/// XOR of all bytes
pub fn frame_checksum(body: &[u8]) -> u8 {
    body.iter().fold(0, |acc, b| acc ^ b)
}

/// Decode one line into a raw sensor reading
pub fn decode_frame(line: &[u8]) -> Result<u32, FrameError> {
    let text = String::from_utf8_lossy(line);
    let text = text.trim();
    if text.is_empty() {
        return Err(FrameError::Empty);
    }

    let body = match text.split_once('*') {
        Some((body, sum)) => {
            let expected = u8::from_str_radix(sum, 16)
                .ok()
                .filter(|_| sum.len() == 2)
                .ok_or_else(|| FrameError::MalformedChecksum(sum.to_string()))?;
            let actual = frame_checksum(body.as_bytes());
            if expected != actual {
                return Err(FrameError::BadChecksum { expected, actual });
            }
            body
        }
        None => text,
    };

    body.parse::<u32>()
        .map_err(|_| FrameError::NotANumber(body.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_reading() {
        assert_eq!(decode_frame(b"412\n"), Ok(412));
        assert_eq!(decode_frame(b"7\r\n"), Ok(7));
    }

    #[test]
    fn test_checksummed_reading() {
        // '4' ^ '1' ^ '2' = 0x34 ^ 0x31 ^ 0x32
        assert_eq!(frame_checksum(b"412"), 0x37);
        assert_eq!(decode_frame(b"412*37\n"), Ok(412));
        assert_eq!(
            decode_frame(b"412*3a\n"),
            Err(FrameError::BadChecksum {
                expected: 0x3A,
                actual: 0x37
            })
        );
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert_eq!(decode_frame(b"\n"), Err(FrameError::Empty));
        assert!(matches!(decode_frame(b"lux=12\n"), Err(FrameError::NotANumber(_))));
        assert!(matches!(decode_frame(b"-3\n"), Err(FrameError::NotANumber(_))));
        assert!(matches!(
            decode_frame(b"12*g\n"),
            Err(FrameError::MalformedChecksum(_))
        ));
    }
}
