//! Address-space virtualization for the emulated console's 32-bit physical
//! bus.
//!
//! Two cooperating components:
//!
//! - [`Bus`]: a region-granular dispatch table. The 4 GiB address space is
//!   split into 65536 regions of 64 KiB; every load/store resolves to the
//!   region's live handler in O(1). A breakpoint overlay can transparently
//!   intercept a single region's reads and/or writes without the CPU core or
//!   the displaced handler noticing.
//! - [`MemBase`]: the five fixed flat memories (main RAM, cart ROM,
//!   coprocessor scratch, auxiliary ROM, boot ROM+RAM) plus a bounds-checked
//!   resolver that translates an address straight to a buffer location. Used
//!   by out-of-band consumers (save state, disassembly, tooling) only; the
//!   CPU's execution path always goes through the [`Bus`] so breakpoints
//!   remain effective.
//!
//! The memory-map constants both components agree on live in the
//! `ultra-mem-map` crate.

mod bus;
mod flat;
mod handler;

pub use bus::{Bus, UNMAPPED_READ_VALUE};
pub use flat::{translate, FlatBuffer, FlatSlot, HostAlloc, MemBase, MemBaseError, SystemAlloc};
pub use handler::{
    AccessHit, BreakKind, BreakpointProbe, Handler, HitFlags, Mapping, MemoryHandler, RegionKind,
};
