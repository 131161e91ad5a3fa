use std::error::Error;
use std::fmt;

#[derive(Debug)]
pub enum SimulatorError {
    // Program image errors
    ProgramTooLarge { size: usize, memory: usize },
    MisalignedProgramImage(usize),

    // Configuration errors
    InvalidConfiguration(String),

    // System errors
    IoError(std::io::Error),
}

impl fmt::Display for SimulatorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SimulatorError::ProgramTooLarge { size, memory } => {
                write!(
                    f,
                    "Program image of {} bytes does not fit in {} bytes of memory",
                    size, memory
                )
            },
            SimulatorError::MisalignedProgramImage(size) => {
                write!(
                    f,
                    "Program image size {} is not a multiple of the instruction word size",
                    size
                )
            },
            SimulatorError::InvalidConfiguration(reason) => {
                write!(f, "Invalid configuration: {}", reason)
            },
            SimulatorError::IoError(err) => write!(f, "I/O error: {}", err),
        }
    }
}

impl Error for SimulatorError {}

impl From<std::io::Error> for SimulatorError {
    fn from(error: std::io::Error) -> Self {
        SimulatorError::IoError(error)
    }
}

/// A fetch-path trap raised by the MMU. Traps never propagate past the fetch
/// stage; the fetch unit converts them into NOP-with-exception payload
/// entries that surface as deferred recovery at retire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trap {
    InstructionAccessFault(u64),
    InstructionAddressMisaligned(u64),
}

impl Trap {
    pub fn cause(&self) -> u64 {
        match self {
            Trap::InstructionAddressMisaligned(_) => 0,
            Trap::InstructionAccessFault(_) => 1,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Trap::InstructionAddressMisaligned(_) => "instruction address misaligned",
            Trap::InstructionAccessFault(_) => "instruction access fault",
        }
    }
}

impl fmt::Display for Trap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trap::InstructionAccessFault(pc) | Trap::InstructionAddressMisaligned(pc) => {
                write!(f, "{} at 0x{:08X}", self.name(), pc)
            },
        }
    }
}
