//! CAN-FD length-code mapping
//!
//! Above 8 bytes CAN-FD length codes step through fixed buckets instead of
//! counting bytes. Codes 0-8 map 1:1; 9..=15 map to 12, 16, 20, 24, 32, 48
//! and 64 bytes. `length_code` rounds a byte count up to the next bucket and
//! saturates at the 64-byte bucket.

/// Byte counts for length codes 9..=15
const FD_BUCKETS: [usize; 7] = [12, 16, 20, 24, 32, 48, 64];

/// Maximum payload length in bytes
pub const MAX_PAYLOAD_LEN: usize = 64;

/// Map a byte count to its CAN-FD length code (rounding up, saturating)
pub fn length_code(byte_count: usize) -> u8 {
    if byte_count <= 8 {
        return byte_count as u8;
    }
    for (i, bucket) in FD_BUCKETS.iter().enumerate() {
        if byte_count <= *bucket {
            return (9 + i) as u8;
        }
    }
    15
}

/// Map a length code to its canonical byte count (codes above 15 saturate)
pub fn code_to_length(code: u8) -> usize {
    if code <= 8 {
        code as usize
    } else {
        FD_BUCKETS[usize::min(code as usize - 9, FD_BUCKETS.len() - 1)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_region() {
        for n in 0..=8 {
            assert_eq!(length_code(n), n as u8);
            assert_eq!(code_to_length(n as u8), n);
        }
    }

    #[test]
    fn test_fd_buckets() {
        assert_eq!(length_code(12), 9);
        assert_eq!(length_code(16), 10);
        assert_eq!(length_code(20), 11);
        assert_eq!(length_code(24), 12);
        assert_eq!(length_code(32), 13);
        assert_eq!(length_code(48), 14);
        assert_eq!(length_code(64), 15);
    }

    #[test]
    fn test_round_up() {
        assert_eq!(length_code(9), 9); // rounds up to the 12-byte bucket
        assert_eq!(length_code(13), 10);
        assert_eq!(length_code(33), 14);
        assert_eq!(length_code(49), 15);
    }

    #[test]
    fn test_saturation() {
        assert_eq!(length_code(65), 15);
        assert_eq!(length_code(1000), 15);
        assert_eq!(code_to_length(15), 64);
        assert_eq!(code_to_length(200), 64);
    }

    #[test]
    fn test_monotonic() {
        let mut last = 0;
        for n in 0..=128 {
            let code = length_code(n);
            assert!(code >= last, "code regressed at {} bytes", n);
            last = code;
        }
    }

    #[test]
    fn test_idempotent_round_trip() {
        // Mapping to a code and back to the bucket's canonical byte count is
        // stable under re-application.
        for n in 0..=80 {
            let canonical = code_to_length(length_code(n));
            assert_eq!(code_to_length(length_code(canonical)), canonical);
            assert!(canonical >= usize::min(n, MAX_PAYLOAD_LEN));
        }
    }
}
