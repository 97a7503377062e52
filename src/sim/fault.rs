use super::os::proc::Pid;

/// A failure of a single simulated process. Faults never escape the
/// execution slice that raised them: the engine turns them into a
/// termination of the faulting process.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    #[error("page fault for pid {pid} at address {addr:#x}")]
    PageFault { pid: Pid, addr: i32 },

    #[error("unaligned word access for pid {pid} at address {addr:#x}")]
    UnalignedAccess { pid: Pid, addr: i32 },

    #[error("invalid shared region {region} requested by pid {pid}")]
    InvalidSharedRegion { pid: Pid, region: i32 },

    #[error("unknown opcode {code} for pid {pid} at ip {ip:#x}")]
    UnknownOpcode { pid: Pid, ip: i32, code: i32 },

    #[error("register index {index} out of range for pid {pid}")]
    InvalidRegister { pid: Pid, index: i32 },

    #[error("pid {pid} ran past the end of its program at ip {ip:#x}")]
    EndOfProgram { pid: Pid, ip: i32 },

    #[error("no free virtual page for a shared mapping in pid {pid}")]
    AddressSpaceFull { pid: Pid },

    #[error("physical memory exhausted while serving pid {pid}")]
    OutOfMemory { pid: Pid },

    #[error("no process is running")]
    NoRunningProcess,
}

impl Fault {
    pub fn pid(&self) -> Option<Pid> {
        match self {
            Fault::PageFault { pid, .. }
            | Fault::UnalignedAccess { pid, .. }
            | Fault::InvalidSharedRegion { pid, .. }
            | Fault::UnknownOpcode { pid, .. }
            | Fault::InvalidRegister { pid, .. }
            | Fault::EndOfProgram { pid, .. }
            | Fault::AddressSpaceFull { pid }
            | Fault::OutOfMemory { pid } => Some(*pid),
            Fault::NoRunningProcess => None,
        }
    }
}

pub type Res<T> = Result<T, Fault>;
