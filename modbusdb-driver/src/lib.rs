//! Transport trait for Modbus function codes 1, 2, 3, 4, 5, 6, 15 and 16.
//!
//! `modbusdb` never frames a PDU or opens a socket itself; every wire
//! operation goes through a single [`Driver`] implementation supplied by the
//! caller, so the core depends only on this trait and never on a concrete
//! RTU/TCP transport, serial library, or socket type.

use async_trait::async_trait;

/// Opaque failure from a driver operation.
///
/// The core treats every driver failure identically: it does not attempt to
/// distinguish a CRC error from a dropped socket from a slave exception.
/// Implementors wrap whatever their transport produces.
#[derive(Debug, thiserror::Error)]
#[error("driver error: {0}")]
pub struct DriverError(#[from] Box<dyn std::error::Error + Send + Sync + 'static>);

impl DriverError {
    pub fn new<E>(source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self(Box::new(source))
    }
}

/// The result of a register or state read: the raw response body plus the
/// decoded word/bit array. `data.len()` must equal the requested count.
#[derive(Debug, Clone)]
pub struct ReadResponse<T> {
    pub buffer: Vec<u8>,
    pub data: Vec<T>,
}

impl<T> ReadResponse<T> {
    pub fn new(buffer: Vec<u8>, data: Vec<T>) -> Self {
        Self { buffer, data }
    }
}

/// A Modbus unit (slave) address. Semantically 1..=250, wire range 0..=255.
pub type UnitId = u8;

/// Eight Modbus primitives, one per supported function code.
///
/// Reads take a starting address and a count and return one value per
/// requested address. Writes take either a single value or an array and
/// report success or an opaque [`DriverError`]. All multi-byte values on the
/// wire are big-endian per the Modbus spec; this trait does not interpret
/// register payloads at all, it only moves bytes and bits.
#[async_trait]
pub trait Driver: Send + Sync {
    /// fc 2 — read discrete inputs (`PhysicalState`).
    async fn read_input_states(
        &self,
        unit: UnitId,
        address: u16,
        count: u16,
    ) -> Result<ReadResponse<u8>, DriverError>;

    /// fc 1 — read coils (`InternalState`).
    async fn read_output_states(
        &self,
        unit: UnitId,
        address: u16,
        count: u16,
    ) -> Result<ReadResponse<u8>, DriverError>;

    /// fc 4 — read input registers (`PhysicalRegister`).
    async fn read_input_registers(
        &self,
        unit: UnitId,
        address: u16,
        count: u16,
    ) -> Result<ReadResponse<u16>, DriverError>;

    /// fc 3 — read holding registers (`InternalRegister`).
    async fn read_output_registers(
        &self,
        unit: UnitId,
        address: u16,
        count: u16,
    ) -> Result<ReadResponse<u16>, DriverError>;

    /// fc 5 — write single coil.
    async fn write_state(&self, unit: UnitId, address: u16, value: bool) -> Result<(), DriverError>;

    /// fc 15 — write multiple coils.
    async fn write_states(&self, unit: UnitId, address: u16, values: &[bool]) -> Result<(), DriverError>;

    /// fc 6 — write single holding register.
    async fn write_register(&self, unit: UnitId, address: u16, value: [u8; 2]) -> Result<(), DriverError>;

    /// fc 16 — write multiple holding registers.
    async fn write_registers(&self, unit: UnitId, address: u16, values: &[u8]) -> Result<(), DriverError>;
}
