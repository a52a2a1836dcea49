//! Declared rows of the datamap: [`Entry`] and [`UnitConfig`].

use crate::codec::RegisterType;
use crate::error::Error;
use crate::key::{create_register_key, RegisterKey, Scope};

/// One declared item: a register, a coil, a discrete input, or a bit inside
/// a register.
#[derive(Debug, Clone)]
pub struct Entry {
    pub key: RegisterKey,
    pub unit: u8,
    pub scope: Scope,
    pub address: u16,
    pub bit: u8,
    pub ty: RegisterType,
    /// Applies only to integer register types. A read value is divided by
    /// `10^scale`; a write value is multiplied by `10^scale` and floored.
    pub scale: Option<u8>,
    /// Polling frequency, requests per round. `0`/`None` means unwatched.
    pub freq: Option<u8>,
}

/// Declares one entry before it is validated and keyed into a [`Datamap`](crate::datamap::Datamap).
#[derive(Debug, Clone)]
pub struct EntrySchema {
    pub unit: u8,
    pub scope: Scope,
    pub address: u16,
    pub bit: u8,
    pub ty: RegisterType,
    pub scale: Option<u8>,
    pub freq: Option<u8>,
}

impl EntrySchema {
    pub fn validate(self) -> Result<Entry, Error> {
        // I3: state-scope entries are always Bit, bit 0, no scale.
        if self.scope.is_bit_scope() {
            if self.ty != RegisterType::Bit {
                return Err(Error::BitNotAllowedForScope(self.scope));
            }
            if self.bit != 0 {
                return Err(Error::InvalidBit(self.bit));
            }
            if self.scale.is_some() {
                return Err(Error::TypeMismatch);
            }
        } else {
            // I4: register-scope Bit entries need a well-defined bit; others have bit = 0.
            match self.ty {
                RegisterType::Bit => {
                    if self.bit > 15 {
                        return Err(Error::InvalidBit(self.bit));
                    }
                }
                _ => {
                    if self.bit != 0 {
                        return Err(Error::InvalidBit(self.bit));
                    }
                }
            }
        }

        if let Some(scale) = self.scale {
            if scale > 3 {
                return Err(Error::InvalidScale(scale));
            }
            if matches!(self.ty, RegisterType::Float | RegisterType::Bit) {
                return Err(Error::TypeMismatch);
            }
        }

        if let Some(freq) = self.freq {
            if freq > 60 {
                return Err(Error::InvalidFreq(freq));
            }
        }

        let key = create_register_key(self.unit, self.scope as u8, self.address, self.bit)?;

        Ok(Entry {
            key,
            unit: self.unit,
            scope: self.scope,
            address: self.address,
            bit: self.bit,
            ty: self.ty,
            scale: self.scale,
            freq: self.freq,
        })
    }
}

/// Per-unit request-shaping configuration.
#[derive(Debug, Clone, Copy)]
pub struct UnitConfig {
    pub address: u8,
    pub max_request_size: u16,
    pub force_write_many: bool,
    pub big_endian: bool,
    pub swap_words: bool,
    pub request_with_gaps: bool,
}

impl UnitConfig {
    /// `select_all` copies these flags into every `Select`; the unit
    /// config's `big_endian` wins over any other layer's default, since
    /// nothing downstream can override what it copies forward.
    pub fn validate(self) -> Result<Self, Error> {
        if self.max_request_size < 1 {
            return Err(Error::InvalidMaxRequestSize);
        }
        Ok(self)
    }

    pub fn default_for(unit: u8) -> Self {
        UnitConfig {
            address: unit,
            max_request_size: 120,
            force_write_many: false,
            big_endian: false,
            swap_words: false,
            request_with_gaps: false,
        }
    }

    /// The largest address gap the planner may bridge between two
    /// consecutive entries into a single request: `round(max_request_size *
    /// 0.25)`, gated on `request_with_gaps`, `max_request_size > 2`, and the
    /// operation being a read (writes never bridge gaps — bridging a write
    /// would silently overwrite the skipped addresses).
    pub fn max_gap(self, is_read: bool) -> u16 {
        if self.request_with_gaps && self.max_request_size > 2 && is_read {
            ((self.max_request_size as f64) * 0.25).round() as u16
        } else {
            0
        }
    }
}
