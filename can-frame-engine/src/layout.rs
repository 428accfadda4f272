//! Signal extraction from raw payload bytes
//!
//! Extracts raw signal values from a payload according to the catalog bit
//! layout (endianness, sign) and applies scale/offset to produce physical
//! values. Unlike a best-effort decoder, `decode_signals` fails as a whole
//! when any signal does not fit the buffer: the engine's decode ladder needs
//! a tagged failure it can inspect before falling back.

use std::collections::BTreeMap;

use crate::catalog::{ByteOrder, MessageDefinition, SignalDefinition, ValueType};
use crate::types::{EngineError, Result, SignalValue};

/// Decode every signal of a message from `data`
pub(crate) fn decode_signals(
    data: &[u8],
    def: &MessageDefinition,
) -> Result<BTreeMap<String, SignalValue>> {
    let mut signals = BTreeMap::new();
    for signal in &def.signals {
        let value = decode_signal(data, signal)?;
        signals.insert(signal.name.clone(), value);
    }
    Ok(signals)
}

/// Decode a single signal: raw bit extraction plus physical conversion
fn decode_signal(data: &[u8], signal: &SignalDefinition) -> Result<SignalValue> {
    let raw = extract_raw(data, signal)?;

    if signal.scale == 1.0 && signal.offset == 0.0 {
        Ok(SignalValue::Integer(raw))
    } else {
        Ok(SignalValue::Float(signal.offset + signal.scale * raw as f64))
    }
}

/// Extract the raw (pre-scaling) signal value
fn extract_raw(data: &[u8], signal: &SignalDefinition) -> Result<i64> {
    let start_bit = signal.start_bit as usize;
    let length = signal.length as usize;

    // The catalog rejects these at load; re-checked here so a degenerate
    // definition surfaces as a ladder failure, never a shift/sub overflow.
    if length == 0 || length > 64 {
        return Err(EngineError::InvalidDefinition(format!(
            "signal '{}': bit length {} outside 1..=64",
            signal.name, length
        )));
    }

    let required_bytes = (start_bit + length + 7) / 8;
    if required_bytes > data.len() {
        return Err(EngineError::SignalOutOfFrame {
            signal: signal.name.clone(),
            required: required_bytes,
            available: data.len(),
        });
    }

    let raw = match signal.byte_order {
        ByteOrder::LittleEndian => extract_little_endian(data, start_bit, length),
        ByteOrder::BigEndian => extract_big_endian(data, start_bit, length),
    };

    Ok(match signal.value_type {
        ValueType::Unsigned => raw as i64,
        ValueType::Signed => sign_extend(raw, length),
    })
}

/// Little-endian (Intel) extraction: start bit is the LSB, bits numbered
/// LSB-first within each byte.
fn extract_little_endian(data: &[u8], start_bit: usize, length: usize) -> u64 {
    let mut result: u64 = 0;
    for i in 0..length {
        let bit_pos = start_bit + i;
        let byte_idx = bit_pos / 8;
        let bit_in_byte = bit_pos % 8;
        let bit = (data[byte_idx] >> bit_in_byte) & 0x01;
        result |= (bit as u64) << i;
    }
    result
}

/// Big-endian (Motorola) extraction: start bit is the MSB of the signal,
/// bit 0 is the MSB of byte 0.
fn extract_big_endian(data: &[u8], start_bit: usize, length: usize) -> u64 {
    let mut result: u64 = 0;
    for i in 0..length {
        let bit_pos = start_bit + i;
        let byte_idx = bit_pos / 8;
        let bit_in_byte = 7 - (bit_pos % 8);
        let bit = (data[byte_idx] >> bit_in_byte) & 0x01;
        result |= (bit as u64) << (length - 1 - i);
    }
    result
}

/// Sign-extend an N-bit value to i64
fn sign_extend(value: u64, bit_length: usize) -> i64 {
    if bit_length >= 64 {
        return value as i64;
    }
    let sign_bit = 1u64 << (bit_length - 1);
    if (value & sign_bit) != 0 {
        (value | (!0u64 << bit_length)) as i64
    } else {
        value as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sig(start_bit: u16, length: u16) -> SignalDefinition {
        SignalDefinition {
            name: "S".to_string(),
            start_bit,
            length,
            byte_order: ByteOrder::LittleEndian,
            value_type: ValueType::Unsigned,
            scale: 1.0,
            offset: 0.0,
            min: None,
            max: None,
            unit: None,
            initial: None,
        }
    }

    #[test]
    fn test_extract_little_endian_simple() {
        let data = [0xAB, 0xCD, 0xEF, 0x12];
        assert_eq!(extract_little_endian(&data, 0, 8), 0xAB);
    }

    #[test]
    fn test_extract_little_endian_cross_byte() {
        let data = [0xAB, 0xCD, 0xEF, 0x12];
        assert_eq!(extract_little_endian(&data, 0, 16), 0xCDAB);
    }

    #[test]
    fn test_extract_big_endian_simple() {
        let data = [0xAB, 0xCD, 0xEF, 0x12];
        assert_eq!(extract_big_endian(&data, 0, 8), 0xAB);
    }

    #[test]
    fn test_extract_big_endian_cross_byte() {
        let data = [0xAB, 0xCD, 0xEF, 0x12];
        assert_eq!(extract_big_endian(&data, 0, 16), 0xABCD);
    }

    #[test]
    fn test_sign_extend() {
        assert_eq!(sign_extend(0x7F, 8), 127);
        assert_eq!(sign_extend(0xFF, 8), -1);
        assert_eq!(sign_extend(0x8000, 16), -32768);
    }

    #[test]
    fn test_signal_out_of_frame() {
        let data = [0xAB, 0xCD];
        let err = extract_raw(&data, &sig(8, 16)).unwrap_err();
        match err {
            EngineError::SignalOutOfFrame {
                required,
                available,
                ..
            } => {
                assert_eq!(required, 3);
                assert_eq!(available, 2);
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_degenerate_bit_length_is_error_not_panic() {
        let data = [0xFF; 8];

        let err = extract_raw(&data, &sig(0, 0)).unwrap_err();
        assert!(matches!(err, EngineError::InvalidDefinition(_)));

        let mut wide = sig(0, 100);
        wide.value_type = ValueType::Signed;
        let err = extract_raw(&data, &wide).unwrap_err();
        assert!(matches!(err, EngineError::InvalidDefinition(_)));
    }

    #[test]
    fn test_scaled_signal_is_float() {
        let data = [0x64, 0x00]; // raw 100
        let mut s = sig(0, 16);
        s.scale = 0.1;
        s.offset = -5.0;
        let value = decode_signal(&data, &s).unwrap();
        assert_eq!(value, SignalValue::Float(5.0));
    }

    #[test]
    fn test_unscaled_signal_is_integer() {
        let data = [0x64, 0x00];
        let value = decode_signal(&data, &sig(0, 16)).unwrap();
        assert_eq!(value, SignalValue::Integer(100));
    }

    #[test]
    fn test_signed_extraction() {
        let data = [0xFF, 0xFF]; // raw -1 as i16
        let mut s = sig(0, 16);
        s.value_type = ValueType::Signed;
        let value = decode_signal(&data, &s).unwrap();
        assert_eq!(value, SignalValue::Integer(-1));
    }
}
