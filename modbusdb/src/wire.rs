//! Read/write packing: turns one planned [`Select`] into driver calls,
//! applying endianness, word-swap, scale and bit handling.

use std::collections::HashMap;

use modbusdb_driver::Driver;

use crate::codec::{self, RegisterType, Value};
use crate::datamap::Select;
use crate::entry::Entry;
use crate::error::Error;
use crate::key::Scope;
use crate::transaction::TransactionData;

const MIN_SPAN: u32 = 1;
const MAX_SPAN: u32 = 999;

fn check_span(select: &Select) -> Result<u16, Error> {
    let span = select.span();
    if !(MIN_SPAN..=MAX_SPAN).contains(&span) {
        return Err(Error::SpanOutOfRange(span));
    }
    Ok(span as u16)
}

/// Applies `scale` (integer register types only) when decoding a read value.
fn apply_scale_read(value: Value, scale: Option<u8>) -> Value {
    match (value, scale) {
        (Value::Int(i), Some(scale)) => Value::Float(i as f64 / 10f64.powi(scale as i32)),
        (other, _) => other,
    }
}

/// Applies `scale` (integer register types only) when encoding a write
/// value. Always floors rather than truncates, so a negative fractional
/// value with no declared scale (`scale = None`, equivalent to `10^0`)
/// rounds toward negative infinity instead of toward zero.
fn apply_scale_write(raw: f64, scale: Option<u8>) -> i64 {
    let scaled = match scale {
        Some(scale) => raw * 10f64.powi(scale as i32),
        None => raw,
    };
    scaled.floor() as i64
}

/// Executes a read [`Select`] and returns the per-key decoded values.
pub async fn read(select: &Select, driver: &dyn Driver) -> Result<TransactionData, Error> {
    let anchor = select.anchor_address();
    let count = check_span(select)?;

    match select.scope {
        Scope::PhysicalState | Scope::InternalState => {
            let response = if select.scope == Scope::PhysicalState {
                driver.read_input_states(select.unit, anchor, count).await?
            } else {
                driver.read_output_states(select.unit, anchor, count).await?
            };
            if response.data.len() != count as usize {
                return Err(Error::LengthMismatch { want: count as usize, got: response.data.len() });
            }
            let mut out = TransactionData::new();
            for entry in &select.entries {
                let idx = (entry.address - anchor) as usize;
                let bit = *response.data.get(idx).ok_or(Error::MissingResponseValue(entry.address))?;
                out.insert(entry.key.as_u32(), Value::Bool(bit != 0));
            }
            Ok(out)
        }
        Scope::PhysicalRegister | Scope::InternalRegister => {
            let response = if select.scope == Scope::PhysicalRegister {
                driver.read_input_registers(select.unit, anchor, count).await?
            } else {
                driver.read_output_registers(select.unit, anchor, count).await?
            };
            if response.data.len() != count as usize {
                return Err(Error::LengthMismatch { want: count as usize, got: response.data.len() });
            }
            let words = &response.data;
            let mut out = TransactionData::new();
            for entry in &select.entries {
                let value = decode_entry(entry, words, anchor, select.swap_words, select.big_endian)?;
                out.insert(entry.key.as_u32(), value);
            }
            Ok(out)
        }
    }
}

/// Decodes one declared entry's value out of the full word array returned
/// for a register-scope [`Select`]. Each wire register is always
/// reconstructed big-endian (per Modbus); `big_endian`/`swap_words` then
/// control how multi-register values are assembled at the application level.
fn decode_entry(entry: &Entry, words: &[u16], anchor: u16, swap_words: bool, big_endian: bool) -> Result<Value, Error> {
    if entry.ty == RegisterType::Bit {
        let offset = (entry.address - anchor) as usize;
        let word = *words.get(offset).ok_or(Error::MissingResponseValue(entry.address))?;
        let bit = codec::get_bit(word, entry.bit)?;
        return Ok(Value::Bool(bit));
    }

    let offset = (entry.address - anchor) as usize;
    let reg_count = entry.ty.register_count() as usize;
    let slice = words.get(offset..offset + reg_count).ok_or(Error::MissingResponseValue(entry.address))?;

    let mut buffer = Vec::with_capacity(reg_count * 2);
    for word in slice {
        buffer.extend_from_slice(&word.to_be_bytes());
    }
    let buffer = if reg_count == 2 && swap_words { codec::swap_words(&buffer)? } else { buffer };

    let decoded = codec::decode(&buffer, entry.ty, big_endian)?;
    Ok(apply_scale_read(decoded, entry.scale))
}

/// Requested write values, keyed by the packed `u32` key.
pub type WriteValues = HashMap<u32, f64>;

/// Executes a write [`Select`]. Performs a read-modify-write first when any
/// entry is a register-scope `Bit`.
pub async fn write(select: &Select, values: &WriteValues, driver: &dyn Driver) -> Result<TransactionData, Error> {
    match select.scope {
        Scope::PhysicalState => Err(Error::ScopeNotWritable(select.scope)),
        Scope::InternalState => write_states(select, values, driver).await,
        Scope::PhysicalRegister => Err(Error::ScopeNotWritable(select.scope)),
        Scope::InternalRegister => write_registers(select, values, driver).await,
    }
}

async fn write_states(select: &Select, values: &WriteValues, driver: &dyn Driver) -> Result<TransactionData, Error> {
    let anchor = select.anchor_address();
    let mut bits = Vec::with_capacity(select.entries.len());
    let mut out = TransactionData::new();
    for entry in &select.entries {
        let raw = *values.get(&entry.key.as_u32()).ok_or(Error::UnknownKey(entry.key.as_u32()))?;
        bits.push(raw > 0.0);
        out.insert(entry.key.as_u32(), Value::Bool(raw > 0.0));
    }

    if bits.len() > 1 || select.force_write_many {
        driver.write_states(select.unit, anchor, &bits).await?;
    } else {
        driver.write_state(select.unit, anchor, bits[0]).await?;
    }
    Ok(out)
}

async fn write_registers(select: &Select, values: &WriteValues, driver: &dyn Driver) -> Result<TransactionData, Error> {
    let anchor = select.anchor_address();
    let count = check_span(select)?;

    let current_words = if select.entries.iter().any(|e| e.ty == RegisterType::Bit) {
        let response = driver.read_output_registers(select.unit, anchor, count).await?;
        if response.data.len() != count as usize {
            return Err(Error::LengthMismatch { want: count as usize, got: response.data.len() });
        }
        Some(response.data)
    } else {
        None
    };

    let mut payload = Vec::with_capacity(count as usize * 2);
    let mut out = TransactionData::new();

    for entry in &select.entries {
        let raw = *values.get(&entry.key.as_u32()).ok_or(Error::UnknownKey(entry.key.as_u32()))?;

        if entry.ty == RegisterType::Bit {
            let words = current_words.as_ref().expect("read-modify-write fetched current words");
            let offset = (entry.address - anchor) as usize;
            let word = *words.get(offset).ok_or(Error::MissingResponseValue(entry.address))?;
            let updated = codec::set_bit(word, entry.bit, raw > 0.0)?;
            payload.extend_from_slice(&updated.to_be_bytes());
            out.insert(entry.key.as_u32(), Value::Bool(raw > 0.0));
            continue;
        }

        let value = if entry.ty == RegisterType::Float {
            Value::Float(raw)
        } else {
            Value::Int(apply_scale_write(raw, entry.scale))
        };
        let encoded = codec::encode(value, entry.ty, select.big_endian)?;
        let encoded = if encoded.len() == 4 && select.swap_words { codec::swap_words(&encoded)? } else { encoded };
        payload.extend_from_slice(&encoded);
        out.insert(entry.key.as_u32(), Value::Float(raw));
    }

    if payload.len() > 2 || select.force_write_many {
        driver.write_registers(select.unit, anchor, &payload).await?;
    } else {
        let single: [u8; 2] = payload.clone().try_into().map_err(|_| Error::BufferLength { want: 2, got: payload.len() })?;
        driver.write_register(select.unit, anchor, single).await?;
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datamap::{Datamap, Method};
    use crate::entry::{EntrySchema, UnitConfig};
    use crate::key::create_register_key;
    use modbusdb_driver::{DriverError, ReadResponse, UnitId};
    use async_trait::async_trait;

    struct FixedDriver {
        registers: std::sync::Mutex<Vec<u16>>,
    }

    #[async_trait]
    impl Driver for FixedDriver {
        async fn read_input_states(&self, _: UnitId, _: u16, count: u16) -> Result<ReadResponse<u8>, DriverError> {
            Ok(ReadResponse::new(vec![], vec![0; count as usize]))
        }
        async fn read_output_states(&self, _: UnitId, _: u16, count: u16) -> Result<ReadResponse<u8>, DriverError> {
            Ok(ReadResponse::new(vec![], vec![0; count as usize]))
        }
        async fn read_input_registers(&self, _: UnitId, _: u16, count: u16) -> Result<ReadResponse<u16>, DriverError> {
            Ok(ReadResponse::new(vec![], vec![0; count as usize]))
        }
        async fn read_output_registers(&self, _: UnitId, address: u16, count: u16) -> Result<ReadResponse<u16>, DriverError> {
            let regs = self.registers.lock().unwrap();
            let slice: Vec<u16> = (0..count).map(|i| *regs.get(address as usize + i as usize).unwrap_or(&0)).collect();
            Ok(ReadResponse::new(vec![], slice))
        }
        async fn write_state(&self, _: UnitId, _: u16, _: bool) -> Result<(), DriverError> {
            Ok(())
        }
        async fn write_states(&self, _: UnitId, _: u16, _: &[bool]) -> Result<(), DriverError> {
            Ok(())
        }
        async fn write_register(&self, _: UnitId, address: u16, value: [u8; 2]) -> Result<(), DriverError> {
            let mut regs = self.registers.lock().unwrap();
            if regs.len() <= address as usize {
                regs.resize(address as usize + 1, 0);
            }
            regs[address as usize] = u16::from_be_bytes(value);
            Ok(())
        }
        async fn write_registers(&self, _: UnitId, address: u16, values: &[u8]) -> Result<(), DriverError> {
            let mut regs = self.registers.lock().unwrap();
            for (i, chunk) in values.chunks(2).enumerate() {
                let idx = address as usize + i;
                if regs.len() <= idx {
                    regs.resize(idx + 1, 0);
                }
                regs[idx] = u16::from_be_bytes([chunk[0], chunk[1]]);
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn bit_read_extracts_one_bit_from_a_register_scope_word() {
        let schema = EntrySchema {
            unit: 1,
            scope: Scope::InternalRegister,
            address: 15,
            bit: 2,
            ty: RegisterType::Bit,
            scale: None,
            freq: None,
        };
        let dm = Datamap::new(vec![schema], vec![UnitConfig::default_for(1)]).unwrap();
        let key = create_register_key(1, Scope::InternalRegister as u8, 15, 2).unwrap();
        let select = dm.select_one(Method::Read, key).unwrap();

        let driver = FixedDriver { registers: std::sync::Mutex::new(vec![0; 16]) };
        {
            let mut regs = driver.registers.lock().unwrap();
            regs[15] = 0x0004;
        }
        let result = read(&select, &driver).await.unwrap();
        assert_eq!(result.get(&key.as_u32()), Some(&Value::Bool(true)));

        {
            let mut regs = driver.registers.lock().unwrap();
            regs[15] = 0x0003;
        }
        let result = read(&select, &driver).await.unwrap();
        assert_eq!(result.get(&key.as_u32()), Some(&Value::Bool(false)));
    }

    #[tokio::test]
    async fn scaled_write_is_floored_and_decoded_value_matches() {
        let schema = EntrySchema {
            unit: 1,
            scope: Scope::InternalRegister,
            address: 10,
            bit: 0,
            ty: RegisterType::Int16,
            scale: Some(2),
            freq: None,
        };
        let dm = Datamap::new(vec![schema], vec![UnitConfig::default_for(1)]).unwrap();
        let key = create_register_key(1, Scope::InternalRegister as u8, 10, 0).unwrap();
        let select = dm.select_one(Method::Write, key).unwrap();

        let driver = FixedDriver { registers: std::sync::Mutex::new(vec![0; 16]) };
        let mut values = WriteValues::new();
        values.insert(key.as_u32(), 1.23);
        write(&select, &values, &driver).await.unwrap();

        let regs = driver.registers.lock().unwrap();
        assert_eq!(regs[10], 123);
    }

    #[tokio::test]
    async fn unscaled_negative_fraction_floors_toward_negative_infinity() {
        let schema = EntrySchema {
            unit: 1,
            scope: Scope::InternalRegister,
            address: 10,
            bit: 0,
            ty: RegisterType::Int16,
            scale: None,
            freq: None,
        };
        let dm = Datamap::new(vec![schema], vec![UnitConfig::default_for(1)]).unwrap();
        let key = create_register_key(1, Scope::InternalRegister as u8, 10, 0).unwrap();
        let select = dm.select_one(Method::Write, key).unwrap();

        let driver = FixedDriver { registers: std::sync::Mutex::new(vec![0; 16]) };
        let mut values = WriteValues::new();
        values.insert(key.as_u32(), -0.5);
        write(&select, &values, &driver).await.unwrap();

        let regs = driver.registers.lock().unwrap();
        assert_eq!(regs[10] as i16, -1, "floor(-0.5) must be -1, not a zero-truncating cast");
    }
}
