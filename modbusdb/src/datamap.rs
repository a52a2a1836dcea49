//! The datamap: declared entries, per-unit configs, the freq watch index,
//! and the planner (`select_all`/`select_one`) that groups keys into minimal
//! wire requests.

use std::collections::{BTreeSet, HashMap};

use crate::entry::{Entry, EntrySchema, UnitConfig};
use crate::error::Error;
use crate::key::{RegisterKey, Scope};

/// Whether a planned [`Select`] will read or write the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Read,
    Write,
}

/// One group of entries fit for a single wire request.
#[derive(Debug, Clone)]
pub struct Select {
    pub method: Method,
    pub unit: u8,
    pub scope: Scope,
    pub entries: Vec<Entry>,
    pub big_endian: bool,
    pub swap_words: bool,
    pub force_write_many: bool,
}

impl Select {
    pub fn anchor_address(&self) -> u16 {
        self.entries[0].address
    }

    /// `last.address + register_count(last.type) - anchor.address`.
    pub fn span(&self) -> u32 {
        let anchor = self.anchor_address() as u32;
        let last = self.entries.last().expect("Select always has >= 1 entry");
        last.address as u32 + last.ty.register_count() as u32 - anchor
    }
}

/// Registry of declared entries, unit configs, and the freq -> keys index.
pub struct Datamap {
    entries: HashMap<u32, Entry>,
    units: HashMap<u8, UnitConfig>,
    watch: HashMap<u8, BTreeSet<u32>>,
}

impl Datamap {
    /// Validates and indexes every declared entry. Declares a default unit
    /// config for any unit an entry references that wasn't explicitly
    /// declared.
    pub fn new(schema: Vec<EntrySchema>, unit_configs: Vec<UnitConfig>) -> Result<Self, Error> {
        let mut units: HashMap<u8, UnitConfig> = HashMap::new();
        for config in unit_configs {
            units.insert(config.address, config.validate()?);
        }

        let mut entries: HashMap<u32, Entry> = HashMap::new();
        let mut watch: HashMap<u8, BTreeSet<u32>> = HashMap::new();

        for raw in schema {
            let unit = raw.unit;
            let entry = raw.validate()?;
            let key = entry.key.as_u32();

            if entries.contains_key(&key) {
                return Err(Error::DuplicateKey(key));
            }

            units.entry(unit).or_insert_with(|| UnitConfig::default_for(unit));

            if let Some(freq) = entry.freq {
                if freq > 0 {
                    watch.entry(freq).or_default().insert(key);
                }
            }

            entries.insert(key, entry);
        }

        Ok(Datamap { entries, units, watch })
    }

    pub fn entry(&self, key: RegisterKey) -> Result<&Entry, Error> {
        self.entries.get(&key.as_u32()).ok_or(Error::UnknownKey(key.as_u32()))
    }

    pub fn unit(&self, id: u8) -> Result<&UnitConfig, Error> {
        self.units.get(&id).ok_or(Error::UnknownUnit(id))
    }

    /// Keys declared at the given freq, or an empty set if none.
    pub fn watched_keys(&self, freq: u8) -> Vec<u32> {
        self.watch.get(&freq).map(|s| s.iter().copied().collect()).unwrap_or_default()
    }

    /// The planner: groups `keys` into the minimal ordered list of [`Select`]s
    /// that respect each referenced unit's request-size and gap constraints.
    pub fn select_all(&self, method: Method, keys: &[RegisterKey]) -> Result<Vec<Select>, Error> {
        if keys.is_empty() {
            return Err(Error::EmptyKeySet);
        }

        // 1. Sort ascending: the packed key's bit layout already yields
        // unit-major, scope-major, address-major order.
        let mut sorted: Vec<RegisterKey> = keys.to_vec();
        sorted.sort();

        let mut selects: Vec<Select> = Vec::new();
        let mut group: Vec<Entry> = Vec::new();

        for key in sorted {
            let entry = self.entry(key)?.clone();

            // All four scopes are readable in the Modbus address model; only
            // the two write function codes are scope-restricted.
            if method == Method::Write && !entry.scope.is_writable() {
                return Err(Error::ScopeNotWritable(entry.scope));
            }

            let unit_config = *self.unit(entry.unit)?;

            let joins = match group.last() {
                None => false,
                Some(prev) => {
                    let anchor = &group[0];
                    let same_unit_scope = anchor.unit == entry.unit && anchor.scope == entry.scope;
                    if !same_unit_scope {
                        false
                    } else {
                        let is_read = method == Method::Read;
                        let max_gap = unit_config.max_gap(is_read) as i64;
                        let gap = entry.address as i64 - prev.address as i64 - prev.ty.register_count() as i64;
                        let span = (entry.address as i64 - anchor.address as i64) + entry.ty.register_count() as i64;
                        gap <= max_gap && span <= unit_config.max_request_size as i64
                    }
                }
            };

            if !joins && !group.is_empty() {
                selects.push(self.finish_select(method, std::mem::take(&mut group))?);
            }

            group.push(entry);
        }

        if !group.is_empty() {
            selects.push(self.finish_select(method, group)?);
        }

        Ok(selects)
    }

    fn finish_select(&self, method: Method, entries: Vec<Entry>) -> Result<Select, Error> {
        let anchor = &entries[0];
        let unit_config = *self.unit(anchor.unit)?;
        Ok(Select {
            method,
            unit: anchor.unit,
            scope: anchor.scope,
            entries,
            big_endian: unit_config.big_endian,
            swap_words: unit_config.swap_words,
            force_write_many: unit_config.force_write_many,
        })
    }

    /// Plans a single key and asserts exactly one [`Select`] resulted.
    pub fn select_one(&self, method: Method, key: RegisterKey) -> Result<Select, Error> {
        let mut selects = self.select_all(method, std::slice::from_ref(&key))?;
        if selects.len() != 1 {
            return Err(Error::NotExactlyOneSelect(selects.len()));
        }
        Ok(selects.remove(0))
    }
}
