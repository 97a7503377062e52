use std::fmt;
use std::str::FromStr;

use serde::Serialize;

/// Bytes per encoded instruction: opcode, arg1, arg2.
pub const INSTRUCTION_SIZE: usize = 12;
pub const WORD_SIZE: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Opcode {
    LoadValue,
    Increment,
    AddValue,
    ShowReg,
    Sleep,
    Terminate,
    MapSharedMem,
    AcquireLock,
    ReleaseLock,
    SignalEvent,
    WaitEvent,
    Alloc,
    FreeMemory,
    MemoryStats,
    WriteMem,
}

pub const OPCODES: [Opcode; 15] = [
    Opcode::LoadValue,
    Opcode::Increment,
    Opcode::AddValue,
    Opcode::ShowReg,
    Opcode::Sleep,
    Opcode::Terminate,
    Opcode::MapSharedMem,
    Opcode::AcquireLock,
    Opcode::ReleaseLock,
    Opcode::SignalEvent,
    Opcode::WaitEvent,
    Opcode::Alloc,
    Opcode::FreeMemory,
    Opcode::MemoryStats,
    Opcode::WriteMem,
];

impl Opcode {
    pub fn name(self) -> &'static str {
        match self {
            Opcode::LoadValue => "LOAD_VALUE",
            Opcode::Increment => "INCREMENT",
            Opcode::AddValue => "ADD_VALUE",
            Opcode::ShowReg => "SHOW_REG",
            Opcode::Sleep => "SLEEP",
            Opcode::Terminate => "TERMINATE",
            Opcode::MapSharedMem => "MAP_SHARED_MEM",
            Opcode::AcquireLock => "ACQUIRE_LOCK",
            Opcode::ReleaseLock => "RELEASE_LOCK",
            Opcode::SignalEvent => "SIGNAL_EVENT",
            Opcode::WaitEvent => "WAIT_EVENT",
            Opcode::Alloc => "ALLOC",
            Opcode::FreeMemory => "FREE_MEMORY",
            Opcode::MemoryStats => "MEMORY_STATS",
            Opcode::WriteMem => "WRITE_MEM",
        }
    }

    pub fn ordinal(self) -> i32 {
        self as i32
    }
}

pub fn decode_opcode(x: i32) -> Option<Opcode> {
    usize::try_from(x).ok().and_then(|i| OPCODES.get(i).copied())
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Opcode {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let upper = input.to_ascii_uppercase();
        OPCODES
            .iter()
            .copied()
            .find(|op| op.name() == upper)
            .ok_or_else(|| format!("unknown opcode: {}", input))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instruction {
    pub opcode: Opcode,
    pub arg1: i32,
    pub arg2: i32,
}

impl Instruction {
    pub fn new(opcode: Opcode, arg1: i32, arg2: i32) -> Instruction {
        Instruction { opcode, arg1, arg2 }
    }

    pub fn encode(&self) -> [u8; INSTRUCTION_SIZE] {
        let mut xs = [0u8; INSTRUCTION_SIZE];
        pack_word(&mut xs, 0, self.opcode.ordinal());
        pack_word(&mut xs, 4, self.arg1);
        pack_word(&mut xs, 8, self.arg2);
        xs
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} {} {}", self.opcode, self.arg1, self.arg2)
    }
}

/// Serializes a program into its in-memory image.
pub fn encode_program(program: &[Instruction]) -> Vec<u8> {
    program.iter().flat_map(|inst| inst.encode()).collect()
}

/// Big-endian store of `x` at `memory[addr..addr + 4]`.
pub fn pack_word(memory: &mut [u8], addr: usize, x: i32) {
    memory[addr..addr + WORD_SIZE].copy_from_slice(&x.to_be_bytes());
}

pub fn unpack_word(memory: &[u8], addr: usize) -> i32 {
    let mut xs = [0u8; WORD_SIZE];
    xs.copy_from_slice(&memory[addr..addr + WORD_SIZE]);
    i32::from_be_bytes(xs)
}
