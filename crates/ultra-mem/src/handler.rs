use core::fmt;
use std::sync::Arc;

use bitflags::bitflags;

/// Read/write entry points for one region's backing storage or device.
///
/// Handlers are invoked through shared references; implementations that need
/// mutable state use interior mutability, the same contract as the device
/// register models elsewhere in the emulator. Addresses passed in are full
/// bus addresses, not region-relative offsets.
pub trait MemoryHandler {
    /// 32-bit read at `address`.
    fn read(&self, address: u32) -> u32;

    /// 32-bit write at `address`. Only bits set in `mask` carry data; the
    /// handler merges them over the existing word.
    fn write(&self, address: u32, value: u32, mask: u32);
}

/// The content of one dispatch slot.
///
/// Cloning a handler copies the entry points (an `Arc` bump for device
/// handlers), never the state they refer to. Every slot holds a valid
/// handler at all times; "unmapped" is itself a handler, not an absence.
#[derive(Clone)]
pub enum Handler {
    /// No installed mapping. Reads return the unmapped sentinel, writes are
    /// dropped.
    Unmapped,
    /// Externally supplied device or memory handler.
    Device(Arc<dyn MemoryHandler>),
    /// Shared debug-interception marker. While a region's breakpoint mask is
    /// nonzero its live slot holds this and the displaced handler is only
    /// recoverable from the shadow slot.
    Traced,
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Handler::Unmapped => f.write_str("Unmapped"),
            Handler::Device(_) => f.write_str("Device(..)"),
            Handler::Traced => f.write_str("Traced"),
        }
    }
}

/// Coarse classification of a region, for tooling and disassembly. Not
/// consulted by dispatch itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionKind {
    Unmapped,
    Ram,
    Rom,
    Registers,
}

/// Binds an inclusive address range to a handler and kind tag.
///
/// Mapping granularity is always a whole 64 KiB region: a range that covers
/// any byte of a region applies to the entire region. Overlapping mappings
/// installed in sequence follow last-write-wins per region.
#[derive(Debug, Clone)]
pub struct Mapping {
    pub begin: u32,
    /// Inclusive end address.
    pub end: u32,
    pub kind: RegionKind,
    pub handler: Handler,
}

bitflags! {
    /// Per-region breakpoint-active mask.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct BreakKind: u8 {
        const READ = 0x1;
        const WRITE = 0x2;
    }
}

bitflags! {
    /// Flags attached to a reported breakpoint hit.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct HitFlags: u32 {
        const ENABLED = 0x1;
        const READ = 0x2;
        const WRITE = 0x4;
    }
}

/// A memory access that landed on a region with an active breakpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessHit {
    /// Address of the instruction that issued the access.
    pub pc: u32,
    /// The accessed bus address.
    pub address: u32,
    /// Access width in bytes.
    pub size: u32,
    pub flags: HitFlags,
}

/// External breakpoint registry consulted by the bus.
///
/// The bus only ever asks two things of the debugger: whether a range
/// already carries an enabled breakpoint (so installing a mapping does not
/// clobber it), and delivery of a hit so the debugger can pause or log.
pub trait BreakpointProbe {
    /// Whether an enabled breakpoint overlaps `[start, start + len)`.
    fn has_enabled_breakpoint(&self, start: u32, len: u32) -> bool;

    /// Deliver a breakpoint hit.
    fn report_access(&self, hit: AccessHit);
}
