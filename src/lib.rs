//! Feeder Monitor Library
//!
//! This library polls the relay and analyzer registers of electrical feeders and
//! turns the raw register values into the formatted metrics shown on feeder cards.

pub mod acquisition_scheduler;
pub mod display_builder;
pub mod error;
pub mod feeder_config;
pub mod formula;
pub mod gateway_reader;
pub mod mapping_resolver;
pub mod modbus_reader;
pub mod register_reader;
pub mod register_store;
pub mod value_formatter;

// Re-export commonly used types for easier access
pub use acquisition_scheduler::{AcquisitionScheduler, OverlapPolicy, SchedulerOptions};
pub use display_builder::{build_card, build_side, DisplaySide, DisplayValue, FeederCard};
pub use feeder_config::{ConnectionOverride, EquipmentClass, FeederConfig, TargetKey};
pub use gateway_reader::GatewayReader;
pub use mapping_resolver::{resolve, CardMapping};
pub use modbus_reader::ModbusTcpReader;
pub use register_reader::{RawRegister, RegisterReader, SimulatedRegisterReader};
pub use register_store::{MeasurementState, RegisterSnapshot, SequencePolicy};
