//! The 32-bit packed coordinate: `unit:8 | scope:4 | address:16 | bit:4`.
//!
//! Packing the whole Modbus coordinate into one `u32` keeps it usable as a
//! primitive `HashMap`/`BTreeMap` key instead of a multi-field struct.
//! [`RegisterKey`] wraps the raw integer so the numeric ordering it derives
//! — and that the planner's sort in
//! [`crate::datamap::Datamap::select_all`] depends on — stays unit-major,
//! scope-major, address-major, matching the packed bit layout exactly.

use crate::error::Error;
use std::fmt;

/// One of the four Modbus address spaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Scope {
    /// fc 2, read-only bits.
    PhysicalState = 1,
    /// fc 1/5/15, read-write bits.
    InternalState = 2,
    /// fc 4, read-only 16-bit words.
    PhysicalRegister = 3,
    /// fc 3/6/16, read-write 16-bit words.
    InternalRegister = 4,
}

impl Scope {
    pub fn from_u8(v: u8) -> Result<Self, Error> {
        match v {
            1 => Ok(Scope::PhysicalState),
            2 => Ok(Scope::InternalState),
            3 => Ok(Scope::PhysicalRegister),
            4 => Ok(Scope::InternalRegister),
            _ => Err(Error::InvalidScope(v)),
        }
    }

    pub const fn is_bit_scope(self) -> bool {
        matches!(self, Scope::PhysicalState | Scope::InternalState)
    }

    /// All four scopes have a read function code; unlike [`Self::is_writable`],
    /// there is no read-restricted scope to guard against.
    pub const fn is_readable(self) -> bool {
        true
    }

    pub const fn is_writable(self) -> bool {
        matches!(self, Scope::InternalState | Scope::InternalRegister)
    }
}

const UNIT_SHIFT: u32 = 24;
const SCOPE_SHIFT: u32 = 20;
const ADDRESS_SHIFT: u32 = 4;
const BIT_SHIFT: u32 = 0;

const UNIT_MASK: u32 = 0xFF;
const SCOPE_MASK: u32 = 0xF;
const ADDRESS_MASK: u32 = 0xFFFF;
const BIT_MASK: u32 = 0xF;

/// The packed 32-bit coordinate for one addressable item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RegisterKey(u32);

impl RegisterKey {
    pub fn as_u32(self) -> u32 {
        self.0
    }

    pub fn unit(self) -> u8 {
        ((self.0 >> UNIT_SHIFT) & UNIT_MASK) as u8
    }

    pub fn scope(self) -> Scope {
        Scope::from_u8(((self.0 >> SCOPE_SHIFT) & SCOPE_MASK) as u8)
            .expect("RegisterKey always carries a scope validated at construction")
    }

    pub fn address(self) -> u16 {
        ((self.0 >> ADDRESS_SHIFT) & ADDRESS_MASK) as u16
    }

    pub fn bit(self) -> u8 {
        ((self.0 >> BIT_SHIFT) & BIT_MASK) as u8
    }
}

impl fmt::Display for RegisterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<RegisterKey> for u32 {
    fn from(key: RegisterKey) -> Self {
        key.0
    }
}

/// Packs `(unit, scope, address, bit)` into a [`RegisterKey`], validating
/// every field's legal range.
pub fn create_register_key(unit: u8, scope: u8, address: u16, bit: u8) -> Result<RegisterKey, Error> {
    let scope = Scope::from_u8(scope)?;
    if bit > 15 {
        return Err(Error::InvalidBit(bit));
    }
    if scope.is_bit_scope() && bit != 0 {
        return Err(Error::BitNotAllowedForScope(scope));
    }

    let packed = ((unit as u32) << UNIT_SHIFT)
        | ((scope as u32) << SCOPE_SHIFT)
        | ((address as u32) << ADDRESS_SHIFT)
        | (bit as u32);
    Ok(RegisterKey(packed))
}

/// Unpacks a raw `u32` back into its four fields.
pub fn parse_register_key(key: u32) -> Result<(u8, Scope, u16, u8), Error> {
    let unit = ((key >> UNIT_SHIFT) & UNIT_MASK) as u8;
    let scope = Scope::from_u8(((key >> SCOPE_SHIFT) & SCOPE_MASK) as u8)?;
    let address = ((key >> ADDRESS_SHIFT) & ADDRESS_MASK) as u16;
    let bit = ((key >> BIT_SHIFT) & BIT_MASK) as u8;
    Ok((unit, scope, address, bit))
}
