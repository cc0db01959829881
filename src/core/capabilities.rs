//! Capability descriptor
//!
//! A fixed table of which file and VFS operations the bzz backend serves
//! from the blob store, which ones are inert (answer success without doing
//! anything) and which ones always fail. The table is a `static` and is
//! never mutated; the file adapter consults it when it refuses an operation.

use std::fmt;

/// Every operation the engine can invoke on the VFS or on an open file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    // File-level
    Close,
    Read,
    Write,
    Truncate,
    Sync,
    FileSize,
    Lock,
    Unlock,
    CheckReservedLock,
    FileControl,
    SectorSize,
    DeviceCharacteristics,
    ShmMap,
    ShmLock,
    ShmBarrier,
    ShmUnmap,
    Fetch,
    Unfetch,
    // VFS-level
    Open,
    Delete,
    Access,
    FullPathname,
    DlOpen,
    DlError,
    DlSym,
    DlClose,
    Randomness,
    Sleep,
    CurrentTime,
    GetLastError,
    CurrentTimeInt64,
    SetSystemCall,
    GetSystemCall,
    NextSystemCall,
}

impl Operation {
    pub const ALL: [Operation; 34] = [
        Operation::Close,
        Operation::Read,
        Operation::Write,
        Operation::Truncate,
        Operation::Sync,
        Operation::FileSize,
        Operation::Lock,
        Operation::Unlock,
        Operation::CheckReservedLock,
        Operation::FileControl,
        Operation::SectorSize,
        Operation::DeviceCharacteristics,
        Operation::ShmMap,
        Operation::ShmLock,
        Operation::ShmBarrier,
        Operation::ShmUnmap,
        Operation::Fetch,
        Operation::Unfetch,
        Operation::Open,
        Operation::Delete,
        Operation::Access,
        Operation::FullPathname,
        Operation::DlOpen,
        Operation::DlError,
        Operation::DlSym,
        Operation::DlClose,
        Operation::Randomness,
        Operation::Sleep,
        Operation::CurrentTime,
        Operation::GetLastError,
        Operation::CurrentTimeInt64,
        Operation::SetSystemCall,
        Operation::GetSystemCall,
        Operation::NextSystemCall,
    ];

    /// Name used in diagnostic records
    pub fn name(self) -> &'static str {
        match self {
            Operation::Close => "close",
            Operation::Read => "read",
            Operation::Write => "write",
            Operation::Truncate => "truncate",
            Operation::Sync => "sync",
            Operation::FileSize => "file_size",
            Operation::Lock => "lock",
            Operation::Unlock => "unlock",
            Operation::CheckReservedLock => "check_reserved_lock",
            Operation::FileControl => "file_control",
            Operation::SectorSize => "sector_size",
            Operation::DeviceCharacteristics => "device_characteristics",
            Operation::ShmMap => "shm_map",
            Operation::ShmLock => "shm_lock",
            Operation::ShmBarrier => "shm_barrier",
            Operation::ShmUnmap => "shm_unmap",
            Operation::Fetch => "fetch",
            Operation::Unfetch => "unfetch",
            Operation::Open => "open",
            Operation::Delete => "delete",
            Operation::Access => "access",
            Operation::FullPathname => "full_pathname",
            Operation::DlOpen => "dl_open",
            Operation::DlError => "dl_error",
            Operation::DlSym => "dl_sym",
            Operation::DlClose => "dl_close",
            Operation::Randomness => "randomness",
            Operation::Sleep => "sleep",
            Operation::CurrentTime => "current_time",
            Operation::GetLastError => "get_last_error",
            Operation::CurrentTimeInt64 => "current_time_int64",
            Operation::SetSystemCall => "set_system_call",
            Operation::GetSystemCall => "get_system_call",
            Operation::NextSystemCall => "next_system_call",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// How the backend answers an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Support {
    /// Served by the storage bridge or the host
    Native,
    /// Accepted and reported as successful, with no effect
    Inert,
    /// Reported as a fixed constant or fixed answer
    Fixed,
    /// Always refused with an error
    Unsupported,
}

/// Static capability table for the bzz backend
#[derive(Debug)]
pub struct Capabilities {
    entries: &'static [(Operation, Support)],
}

pub static CAPABILITIES: Capabilities = Capabilities {
    entries: &[
        (Operation::Close, Support::Native),
        (Operation::Read, Support::Native),
        (Operation::Write, Support::Unsupported),
        (Operation::Truncate, Support::Unsupported),
        (Operation::Sync, Support::Unsupported),
        (Operation::FileSize, Support::Native),
        (Operation::Lock, Support::Inert),
        (Operation::Unlock, Support::Inert),
        (Operation::CheckReservedLock, Support::Fixed),
        (Operation::FileControl, Support::Unsupported),
        (Operation::SectorSize, Support::Fixed),
        (Operation::DeviceCharacteristics, Support::Fixed),
        (Operation::ShmMap, Support::Inert),
        (Operation::ShmLock, Support::Inert),
        (Operation::ShmBarrier, Support::Inert),
        (Operation::ShmUnmap, Support::Inert),
        (Operation::Fetch, Support::Inert),
        (Operation::Unfetch, Support::Inert),
        (Operation::Open, Support::Native),
        (Operation::Delete, Support::Inert),
        (Operation::Access, Support::Fixed),
        (Operation::FullPathname, Support::Native),
        (Operation::DlOpen, Support::Unsupported),
        (Operation::DlError, Support::Fixed),
        (Operation::DlSym, Support::Unsupported),
        (Operation::DlClose, Support::Inert),
        (Operation::Randomness, Support::Native),
        (Operation::Sleep, Support::Native),
        (Operation::CurrentTime, Support::Native),
        (Operation::GetLastError, Support::Native),
        (Operation::CurrentTimeInt64, Support::Native),
        (Operation::SetSystemCall, Support::Unsupported),
        (Operation::GetSystemCall, Support::Unsupported),
        (Operation::NextSystemCall, Support::Unsupported),
    ],
};

impl Capabilities {
    /// Look up how `op` is handled
    pub fn support(&self, op: Operation) -> Support {
        self.entries
            .iter()
            .find(|(o, _)| *o == op)
            .map(|(_, s)| *s)
            .unwrap_or(Support::Unsupported)
    }

    /// True if the operation actually reaches the store or the host
    pub fn is_native(&self, op: Operation) -> bool {
        self.support(op) == Support::Native
    }

    /// Operations that always fail
    pub fn unsupported(&self) -> impl Iterator<Item = Operation> + '_ {
        self.entries
            .iter()
            .filter(|(_, s)| *s == Support::Unsupported)
            .map(|(o, _)| *o)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_operation_declared_once() {
        for op in Operation::ALL {
            let count = CAPABILITIES.entries.iter().filter(|(o, _)| *o == op).count();
            assert_eq!(count, 1, "{} declared {} times", op, count);
        }
        assert_eq!(CAPABILITIES.entries.len(), Operation::ALL.len());
    }

    #[test]
    fn test_read_only_surface() {
        assert!(CAPABILITIES.is_native(Operation::Read));
        assert!(CAPABILITIES.is_native(Operation::FileSize));
        assert!(CAPABILITIES.is_native(Operation::Open));

        let refused: Vec<_> = CAPABILITIES.unsupported().collect();
        assert!(refused.contains(&Operation::Write));
        assert!(refused.contains(&Operation::Truncate));
        assert!(refused.contains(&Operation::Sync));
        assert!(!refused.contains(&Operation::Lock));
    }

    #[test]
    fn test_locking_is_inert() {
        assert_eq!(CAPABILITIES.support(Operation::Lock), Support::Inert);
        assert_eq!(CAPABILITIES.support(Operation::Unlock), Support::Inert);
        assert_eq!(CAPABILITIES.support(Operation::CheckReservedLock), Support::Fixed);
    }
}
