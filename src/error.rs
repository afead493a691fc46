use std::fmt;

use thiserror::Error;

/// Failure of a single register read. Absorbed by the scheduler tick.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReadError {
    /// Device unreachable, address unresolvable, or the transport dropped.
    #[error("connection error: {0}")]
    Connection(String),
    /// The device (or gateway) answered, but the answer was unusable.
    #[error("protocol error: {0}")]
    Protocol(String),
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum EvaluationError {
    #[error("unexpected character '{ch}' at position {pos}")]
    UnexpectedChar { ch: char, pos: usize },
    #[error("unexpected end of expression")]
    UnexpectedEnd,
    #[error("unexpected token at position {0}")]
    UnexpectedToken(usize),
    #[error("invalid number literal '{0}'")]
    InvalidNumber(String),
    #[error("unknown identifier '{0}'")]
    UnknownIdentifier(String),
    #[error("expression nested too deeply")]
    TooDeep,
    #[error("result is not a finite number")]
    NonFinite,
}

/// Connection settings that prevent a target from being started.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigValidationError {
    #[error("missing host")]
    MissingHost,
    #[error("missing port")]
    MissingPort,
    #[error("invalid port {0}")]
    InvalidPort(f64),
    #[error("invalid start address {0}")]
    InvalidStartAddress(f64),
    #[error("invalid register count {0}")]
    InvalidRegisterCount(f64),
    #[error("register range {start}+{count} exceeds the address space")]
    AddressRangeOverflow { start: u16, count: u16 },
    #[error("invalid poll period {0}s")]
    InvalidPeriod(f64),
}

/// Which half of a feeder card a mapping entry belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CardSection {
    Top,
    Bottom,
}

impl fmt::Display for CardSection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CardSection::Top => write!(f, "top"),
            CardSection::Bottom => write!(f, "bottom"),
        }
    }
}

/// Something the mapping resolver had to correct. These are reported, never returned as failures.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum MappingIssue {
    #[error("mapping is not an object, using empty mapping")]
    NotAnObject,
    #[error("{section}: unknown title id '{title_id}'")]
    UnknownTitle {
        section: CardSection,
        title_id: String,
    },
    #[error("{section}: slot count is not a number")]
    InvalidSlotCount { section: CardSection },
    #[error("{section}: slot count {from} clamped to {to}")]
    SlotCountClamped {
        section: CardSection,
        from: f64,
        to: usize,
    },
    #[error("{section} slot {slot}: invalid source address")]
    InvalidSourceAddress { section: CardSection, slot: usize },
    #[error("{section} slot {slot}: unknown equipment '{value}', using relay")]
    UnknownEquipment {
        section: CardSection,
        slot: usize,
        value: String,
    },
}
