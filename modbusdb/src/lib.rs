//! A Modbus protocol abstraction: a typed key/address codec, a register
//! value codec, a request planner, a single-concurrency transaction
//! executor, and a divisor-aligned polling scheduler, assembled behind one
//! facade.
//!
//! Wire I/O is delegated entirely to a caller-supplied
//! [`modbusdb_driver::Driver`] implementation; this crate never opens a
//! socket or a serial port itself.

pub mod codec;
pub mod datamap;
pub mod entry;
pub mod error;
pub mod events;
pub mod executor;
pub mod key;
pub mod scheduler;
pub mod stats;
pub mod transaction;
pub mod wire;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use modbusdb_driver::Driver;
use tokio::sync::broadcast;

pub use codec::{RegisterType, Value};
pub use datamap::{Datamap, Method, Select};
pub use entry::{Entry, EntrySchema, UnitConfig};
pub use error::Error;
pub use events::Event;
pub use key::{create_register_key, parse_register_key, RegisterKey, Scope};
pub use transaction::{Priority, TransactionData, TransactionSnapshot};

use events::EventBus;
use executor::Executor;
pub use scheduler::SchedulerState;
use scheduler::{Scheduler, SchedulerConfig};

const DEFAULT_INTERVAL_SECS: u64 = 60;
const DEFAULT_ROUND_SIZE: u32 = 12;
const DEFAULT_TIMEOUT_SECS: u64 = 60;
const MIN_TIMEOUT_MS: u64 = 1_000;
const MAX_TIMEOUT_MS: u64 = 900_000;

/// Clamped construction options: `interval_secs` and `round_size` are
/// clamped by [`scheduler::SchedulerConfig`], `timeout` here to `[1, 900]`
/// seconds per the documented public surface (sub-second precision is kept,
/// only the clamp bounds are whole seconds).
#[derive(Debug, Clone, Copy)]
pub struct ModbusdbOptions {
    pub interval_secs: u64,
    pub round_size: u32,
    pub timeout: Duration,
}

impl ModbusdbOptions {
    pub fn new(interval_secs: u64, round_size: u32, timeout: Duration) -> Self {
        let timeout_ms = (timeout.as_millis() as u64).clamp(MIN_TIMEOUT_MS, MAX_TIMEOUT_MS);
        ModbusdbOptions { interval_secs, round_size, timeout: Duration::from_millis(timeout_ms) }
    }
}

impl Default for ModbusdbOptions {
    fn default() -> Self {
        ModbusdbOptions::new(DEFAULT_INTERVAL_SECS, DEFAULT_ROUND_SIZE, Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }
}

/// The outcome of a multi-key `mget`/`mset` call: every transaction the
/// planner produced, successful or not, plus the merged payload of the
/// ones that succeeded. A transaction failing (driver error, timeout, or
/// per-unit backoff) never aborts the other transactions in the same call;
/// callers that need all-or-nothing semantics should inspect `transactions`
/// for an error before trusting `payload`.
#[derive(Debug, Clone)]
pub struct BatchResult {
    pub total_time: Duration,
    pub transactions: Vec<TransactionSnapshot>,
    pub payload: TransactionData,
}

/// The public facade: owns the datamap, the executor, and the scheduler for
/// one driver instance.
pub struct Modbusdb {
    datamap: Arc<Datamap>,
    executor: Executor,
    scheduler: Arc<Scheduler>,
    events: EventBus,
    timeout: Duration,
    scheduler_handle: std::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl Modbusdb {
    /// Validates `schema`/`units` into a [`Datamap`] and starts the executor
    /// worker. The polling scheduler is built but not started; call
    /// [`Self::watch`] to begin ticking.
    pub fn new(
        driver: Arc<dyn Driver>,
        schema: Vec<EntrySchema>,
        units: Vec<UnitConfig>,
        options: ModbusdbOptions,
    ) -> Result<Self, Error> {
        let datamap = Arc::new(Datamap::new(schema, units)?);
        let events = EventBus::new();
        let executor = Executor::new(driver, events.clone());

        let scheduler_config = SchedulerConfig::new(options.interval_secs, options.round_size, options.timeout);
        let scheduler = Arc::new(Scheduler::new(datamap.clone(), executor.clone(), events.clone(), scheduler_config));

        Ok(Modbusdb {
            datamap,
            executor,
            scheduler,
            events,
            timeout: options.timeout,
            scheduler_handle: std::sync::Mutex::new(None),
        })
    }

    /// Starts the polling scheduler's tick loop. Idempotent: a second call
    /// while the loop is already running is a no-op.
    pub fn watch(&self) {
        let mut handle = self.scheduler_handle.lock().unwrap();
        if handle.is_some() {
            return;
        }
        *handle = Some(self.scheduler.clone().start());
    }

    /// The scheduler's current round/tick position and whether it is
    /// running ([`Self::watch`] was called and [`Self::destroy`] was not).
    pub fn state(&self) -> SchedulerState {
        self.scheduler.state()
    }

    /// Reads one declared key.
    pub async fn get(&self, key: RegisterKey) -> Result<Value, Error> {
        let select = self.datamap.select_one(Method::Read, key)?;
        let outcome = self.executor.request(select, None, Priority::Normal, self.timeout).await?;
        let mut data = outcome.result?;
        data.remove(&key.as_u32()).ok_or(Error::UnknownKey(key.as_u32()))
    }

    /// Reads a set of declared keys, grouped into the minimal number of wire
    /// requests the planner can produce. One Select failing a driver call
    /// does not prevent the others from completing; inspect
    /// [`BatchResult::transactions`] to see which ones did.
    pub async fn mget(&self, keys: &[RegisterKey]) -> Result<BatchResult, Error> {
        let started = std::time::Instant::now();
        let selects = self.datamap.select_all(Method::Read, keys)?;
        let mut transactions = Vec::with_capacity(selects.len());
        let mut payload = TransactionData::new();
        for select in selects {
            let outcome = self.executor.request(select, None, Priority::Normal, self.timeout).await?;
            if let Ok(data) = &outcome.result {
                payload.extend(data.clone());
            }
            transactions.push(outcome.snapshot);
        }
        Ok(BatchResult { total_time: started.elapsed(), transactions, payload })
    }

    /// Writes one declared key.
    pub async fn set(&self, key: RegisterKey, value: f64) -> Result<(), Error> {
        let select = self.datamap.select_one(Method::Write, key)?;
        let mut values = wire::WriteValues::new();
        values.insert(key.as_u32(), value);
        let outcome = self.executor.request(select, Some(values), Priority::High, self.timeout).await?;
        outcome.result?;
        Ok(())
    }

    /// Writes a set of declared keys, grouped into the minimal number of
    /// wire requests the planner can produce. One Select failing a driver
    /// call does not prevent the others from being sent; inspect
    /// [`BatchResult::transactions`] to see which ones did.
    pub async fn mset(&self, values: HashMap<RegisterKey, f64>) -> Result<BatchResult, Error> {
        let started = std::time::Instant::now();
        let keys: Vec<RegisterKey> = values.keys().copied().collect();
        let by_raw: wire::WriteValues = values.into_iter().map(|(k, v)| (k.as_u32(), v)).collect();
        let selects = self.datamap.select_all(Method::Write, &keys)?;
        let mut transactions = Vec::with_capacity(selects.len());
        let mut payload = TransactionData::new();
        for select in selects {
            let outcome = self.executor.request(select, Some(by_raw.clone()), Priority::High, self.timeout).await?;
            if let Ok(data) = &outcome.result {
                payload.extend(data.clone());
            }
            transactions.push(outcome.snapshot);
        }
        Ok(BatchResult { total_time: started.elapsed(), transactions, payload })
    }

    /// Keys declared at the given polling frequency.
    pub fn watched_keys(&self, freq: u8) -> Vec<u32> {
        self.datamap.watched_keys(freq)
    }

    /// Subscribes to the `tick`/`request`/`response`/`data` event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    pub fn unit(&self, id: u8) -> Result<UnitConfig, Error> {
        self.datamap.unit(id).map(|u| *u)
    }

    pub fn entry(&self, key: RegisterKey) -> Result<Entry, Error> {
        self.datamap.entry(key).map(|e| e.clone())
    }

    /// Stops the scheduler's tick loop (if [`Self::watch`] was ever called)
    /// and the executor's worker; queued and in-flight requests resolve to
    /// [`Error::Aborted`].
    pub fn destroy(&self) {
        self.scheduler.destroy();
        self.executor.destroy();
        if let Some(handle) = self.scheduler_handle.lock().unwrap().take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use modbusdb_driver::{DriverError, ReadResponse, UnitId};

    struct MemoryDriver {
        registers: std::sync::Mutex<Vec<u16>>,
    }

    #[async_trait]
    impl Driver for MemoryDriver {
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

    fn build(driver: MemoryDriver) -> Modbusdb {
        let schema = vec![
            EntrySchema { unit: 1, scope: Scope::InternalRegister, address: 10, bit: 0, ty: RegisterType::UInt16, scale: None, freq: Some(5) },
            EntrySchema { unit: 1, scope: Scope::InternalRegister, address: 11, bit: 0, ty: RegisterType::UInt16, scale: None, freq: None },
            EntrySchema { unit: 1, scope: Scope::InternalRegister, address: 50, bit: 0, ty: RegisterType::UInt16, scale: None, freq: None },
        ];
        let units = vec![UnitConfig::default_for(1)];
        Modbusdb::new(Arc::new(driver), schema, units, ModbusdbOptions::default()).unwrap()
    }

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let db = build(MemoryDriver { registers: std::sync::Mutex::new(vec![0; 16]) });
        let key = create_register_key(1, Scope::InternalRegister as u8, 10, 0).unwrap();
        db.set(key, 42.0).await.unwrap();
        let value = db.get(key).await.unwrap();
        assert_eq!(value, Value::Int(42));
        db.destroy();
    }

    #[tokio::test]
    async fn mget_merges_adjacent_keys_but_keeps_a_distant_one_separate() {
        let db = build(MemoryDriver { registers: std::sync::Mutex::new(vec![0; 64]) });
        let k1 = create_register_key(1, Scope::InternalRegister as u8, 10, 0).unwrap();
        let k2 = create_register_key(1, Scope::InternalRegister as u8, 11, 0).unwrap();
        let k3 = create_register_key(1, Scope::InternalRegister as u8, 50, 0).unwrap();
        db.set(k1, 1.0).await.unwrap();
        db.set(k2, 2.0).await.unwrap();
        db.set(k3, 3.0).await.unwrap();
        let result = db.mget(&[k1, k2, k3]).await.unwrap();
        assert_eq!(result.payload.get(&k1.as_u32()), Some(&Value::Int(1)));
        assert_eq!(result.payload.get(&k2.as_u32()), Some(&Value::Int(2)));
        assert_eq!(result.payload.get(&k3.as_u32()), Some(&Value::Int(3)));
        // 10 and 11 are directly adjacent (gap 0) so the planner merges them into
        // one Select regardless of gap-coalescing; 50 is far enough to stay separate.
        assert_eq!(result.transactions.len(), 2);
        db.destroy();
    }

    #[tokio::test]
    async fn watched_keys_reports_declared_freq() {
        let db = build(MemoryDriver { registers: std::sync::Mutex::new(vec![0; 16]) });
        let k1 = create_register_key(1, Scope::InternalRegister as u8, 10, 0).unwrap();
        assert_eq!(db.watched_keys(5), vec![k1.as_u32()]);
        assert!(db.watched_keys(1).is_empty());
        db.destroy();
    }

    #[tokio::test]
    async fn watch_is_idempotent_and_reflected_in_state() {
        let db = build(MemoryDriver { registers: std::sync::Mutex::new(vec![0; 16]) });
        assert!(!db.state().running);
        db.watch();
        db.watch();
        assert!(db.state().running);
        db.destroy();
        assert!(!db.state().running);
    }
}
