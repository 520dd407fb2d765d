//! SPI transactions

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SpiDirection {
    #[default]
    Read,
    Write,
}

impl SpiDirection {
    pub fn code(self) -> u8 {
        match self {
            SpiDirection::Read => 0,
            SpiDirection::Write => 1,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(SpiDirection::Read),
            1 => Some(SpiDirection::Write),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SpiMessage {
    pub direction: SpiDirection,
    /// Memory map select
    pub mms: u8,
    pub address: u16,
    pub payload: Vec<u8>,
}

impl SpiMessage {
    pub fn read(mms: u8, address: u16, len: usize) -> Self {
        Self { direction: SpiDirection::Read, mms, address, payload: vec![0; len] }
    }

    pub fn write(mms: u8, address: u16, payload: impl Into<Vec<u8>>) -> Self {
        Self { direction: SpiDirection::Write, mms, address, payload: payload.into() }
    }
}
