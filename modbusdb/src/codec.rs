//! Typed value <-> register byte encoding, endianness/word-swap handling, and
//! bit helpers for register-scope `Bit` entries.

use crate::error::Error;

/// The value types a register-scope entry may declare. State-scope entries
/// are always `Bit` (see `Entry::validate` in `crate::datamap`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterType {
    Int16,
    UInt16,
    Int32,
    UInt32,
    Float,
    /// A single bit inside one 16-bit word.
    Bit,
}

impl RegisterType {
    /// Number of 16-bit registers this type occupies on the wire.
    pub const fn register_count(self) -> u16 {
        match self {
            RegisterType::Int32 | RegisterType::UInt32 | RegisterType::Float => 2,
            RegisterType::Int16 | RegisterType::UInt16 | RegisterType::Bit => 1,
        }
    }
}

/// A decoded or pre-encode application value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl Value {
    pub fn as_f64(self) -> f64 {
        match self {
            Value::Int(i) => i as f64,
            Value::Float(f) => f,
            Value::Bool(b) => b as i64 as f64,
        }
    }
}

/// Encodes `value` as `2 * register_count(ty)` bytes.
///
/// `big_endian` governs the byte/word order of a *multi*-register value; a
/// single register is one atomic 16-bit unit with no internal byte order to
/// choose, so `Int16`/`UInt16`/`Bit` always encode big-endian (the bytes a
/// single Modbus register is transmitted as) regardless of `big_endian`.
pub fn encode(value: Value, ty: RegisterType, big_endian: bool) -> Result<Vec<u8>, Error> {
    let bytes = match ty {
        RegisterType::Int16 => (as_i64(value)? as i16).to_be_bytes().to_vec(),
        RegisterType::UInt16 | RegisterType::Bit => (as_i64(value)? as u16).to_be_bytes().to_vec(),
        RegisterType::Int32 => {
            let v = as_i64(value)? as i32;
            if big_endian { v.to_be_bytes() } else { v.to_le_bytes() }.to_vec()
        }
        RegisterType::UInt32 => {
            let v = as_i64(value)? as u32;
            if big_endian { v.to_be_bytes() } else { v.to_le_bytes() }.to_vec()
        }
        RegisterType::Float => {
            let v = value.as_f64() as f32;
            if big_endian { v.to_be_bytes() } else { v.to_le_bytes() }.to_vec()
        }
    };
    Ok(bytes)
}

fn as_i64(value: Value) -> Result<i64, Error> {
    match value {
        Value::Int(i) => Ok(i),
        Value::Bool(b) => Ok(b as i64),
        Value::Float(_) => Err(Error::TypeMismatch),
    }
}

/// Decodes `buffer` (exactly `2 * register_count(ty)` bytes) into a [`Value`].
///
/// As in [`encode`], `big_endian` only applies to multi-register types;
/// `Int16`/`UInt16`/`Bit` always decode the buffer as the big-endian bytes
/// of the one register they occupy.
pub fn decode(buffer: &[u8], ty: RegisterType, big_endian: bool) -> Result<Value, Error> {
    let want = 2 * ty.register_count() as usize;
    if buffer.len() != want {
        return Err(Error::BufferLength { want, got: buffer.len() });
    }
    Ok(match ty {
        RegisterType::Int16 => Value::Int(read_i16(buffer, true) as i64),
        RegisterType::UInt16 | RegisterType::Bit => Value::Int(read_u16(buffer, true) as i64),
        RegisterType::Int32 => Value::Int(read_i32(buffer, big_endian) as i64),
        RegisterType::UInt32 => Value::Int(read_u32(buffer, big_endian) as i64),
        RegisterType::Float => Value::Float(read_f32(buffer, big_endian) as f64),
    })
}

const LEN_CHECKED_BY_DECODE: &str = "decode() already validated buffer.len() against register_count(ty)";

fn read_i16(b: &[u8], be: bool) -> i16 {
    let a: [u8; 2] = b.try_into().expect(LEN_CHECKED_BY_DECODE);
    if be { i16::from_be_bytes(a) } else { i16::from_le_bytes(a) }
}

fn read_u16(b: &[u8], be: bool) -> u16 {
    let a: [u8; 2] = b.try_into().expect(LEN_CHECKED_BY_DECODE);
    if be { u16::from_be_bytes(a) } else { u16::from_le_bytes(a) }
}

fn read_i32(b: &[u8], be: bool) -> i32 {
    let a: [u8; 4] = b.try_into().expect(LEN_CHECKED_BY_DECODE);
    if be { i32::from_be_bytes(a) } else { i32::from_le_bytes(a) }
}

fn read_u32(b: &[u8], be: bool) -> u32 {
    let a: [u8; 4] = b.try_into().expect(LEN_CHECKED_BY_DECODE);
    if be { u32::from_be_bytes(a) } else { u32::from_le_bytes(a) }
}

fn read_f32(b: &[u8], be: bool) -> f32 {
    let a: [u8; 4] = b.try_into().expect(LEN_CHECKED_BY_DECODE);
    if be { f32::from_be_bytes(a) } else { f32::from_le_bytes(a) }
}

/// Swaps the two 16-bit halves of a 4-byte buffer (2-register types only).
pub fn swap_words(buf: &[u8]) -> Result<Vec<u8>, Error> {
    if buf.len() != 4 {
        return Err(Error::BufferLength { want: 4, got: buf.len() });
    }
    Ok(vec![buf[2], buf[3], buf[0], buf[1]])
}

/// Reads bit `i` (0..=15) of `word`.
pub fn get_bit(word: u16, i: u8) -> Result<bool, Error> {
    if i > 15 {
        return Err(Error::InvalidBit(i));
    }
    Ok((word >> i) & 1 == 1)
}

/// Returns `word` with bit `i` set to `on`.
pub fn set_bit(word: u16, i: u8, on: bool) -> Result<u16, Error> {
    if i > 15 {
        return Err(Error::InvalidBit(i));
    }
    Ok(if on { word | (1 << i) } else { word & !(1 << i) })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int16_round_trips_through_encode_decode() {
        let encoded = encode(Value::Int(123), RegisterType::Int16, false).unwrap();
        let decoded = decode(&encoded, RegisterType::Int16, false).unwrap();
        assert_eq!(decoded, Value::Int(123));
    }

    #[test]
    fn single_register_types_ignore_big_endian_and_encode_to_the_wire_value() {
        // A single register is one atomic 16-bit unit; `big_endian` only
        // governs how multi-register values are assembled, not this.
        for big_endian in [false, true] {
            let encoded = encode(Value::Int(123), RegisterType::UInt16, big_endian).unwrap();
            assert_eq!(encoded, vec![0x00, 0x7B], "big_endian={big_endian}");
            assert_eq!(decode(&encoded, RegisterType::UInt16, big_endian).unwrap(), Value::Int(123));
        }
    }

    #[test]
    fn swap_words_is_an_involution_on_a_sample() {
        let buf = [0x01, 0x02, 0x03, 0x04];
        let swapped = swap_words(&buf).unwrap();
        assert_eq!(swapped, vec![0x03, 0x04, 0x01, 0x02]);
        let back = swap_words(&swapped).unwrap();
        assert_eq!(back, buf);
    }

    #[test]
    fn bit_helpers() {
        assert!(get_bit(0x0004, 2).unwrap());
        assert!(!get_bit(0x0003, 2).unwrap());
        let w = set_bit(0, 3, true).unwrap();
        assert!(get_bit(w, 3).unwrap());
        let w = set_bit(w, 3, false).unwrap();
        assert!(!get_bit(w, 3).unwrap());
    }

    #[quickcheck_macros::quickcheck]
    fn prop_swap_words_involution(a: u8, b: u8, c: u8, d: u8) -> bool {
        let buf = [a, b, c, d];
        swap_words(&swap_words(&buf).unwrap()).unwrap() == buf
    }

    #[quickcheck_macros::quickcheck]
    fn prop_set_bit_idempotent(word: u16, i_pick: u8, on: bool) -> bool {
        let i = i_pick % 16;
        let once = set_bit(word, i, on).unwrap();
        let twice = set_bit(once, i, on).unwrap();
        once == twice && get_bit(once, i).unwrap() == on
    }

    #[quickcheck_macros::quickcheck]
    fn prop_int16_round_trip(v: i16, big_endian: bool) -> bool {
        let encoded = encode(Value::Int(v as i64), RegisterType::Int16, big_endian).unwrap();
        decode(&encoded, RegisterType::Int16, big_endian).unwrap() == Value::Int(v as i64)
    }

    #[quickcheck_macros::quickcheck]
    fn prop_uint16_round_trip(v: u16, big_endian: bool) -> bool {
        let encoded = encode(Value::Int(v as i64), RegisterType::UInt16, big_endian).unwrap();
        decode(&encoded, RegisterType::UInt16, big_endian).unwrap() == Value::Int(v as i64)
    }

    #[quickcheck_macros::quickcheck]
    fn prop_int32_round_trip(v: i32, big_endian: bool) -> bool {
        let encoded = encode(Value::Int(v as i64), RegisterType::Int32, big_endian).unwrap();
        decode(&encoded, RegisterType::Int32, big_endian).unwrap() == Value::Int(v as i64)
    }

    #[quickcheck_macros::quickcheck]
    fn prop_uint32_round_trip(v: u32, big_endian: bool) -> bool {
        let encoded = encode(Value::Int(v as i64), RegisterType::UInt32, big_endian).unwrap();
        decode(&encoded, RegisterType::UInt32, big_endian).unwrap() == Value::Int(v as i64)
    }

    #[quickcheck_macros::quickcheck]
    fn prop_float_round_trips_bit_exactly(v: f32, big_endian: bool) -> bool {
        let encoded = encode(Value::Float(v as f64), RegisterType::Float, big_endian).unwrap();
        match decode(&encoded, RegisterType::Float, big_endian).unwrap() {
            Value::Float(got) => (got as f32).to_bits() == v.to_bits(),
            _ => false,
        }
    }
}
