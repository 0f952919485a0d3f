use std::mem;
use std::sync::Arc;

use tracing::trace;
use ultra_mem_map::{REGION_COUNT, REGION_SHIFT, REGION_SIZE};

use crate::handler::{
    AccessHit, BreakKind, BreakpointProbe, Handler, HitFlags, Mapping, RegionKind,
};

/// Value returned by reads from unmapped regions. Unmapped accesses are
/// common for probing/logging hardware and are not an error.
pub const UNMAPPED_READ_VALUE: u32 = 0;

/// Region-granular dispatch table for the 32-bit physical bus.
///
/// The address space is partitioned into 65536 regions of 64 KiB; each region
/// holds the live handler actually invoked for it. Breakpoint interception
/// swaps the live slot for the shared [`Handler::Traced`] marker and parks
/// the displaced handler in a parallel shadow slot, so neither the CPU core
/// nor the handler needs to know a breakpoint is active.
///
/// The table assumes a single-owner model: dispatch (`&self`) and table
/// mutation (`&mut self`) are expected to run on one execution context or
/// under an external mutual-exclusion guarantee. No locking is done here.
pub struct Bus {
    live: Box<[Handler]>,
    shadow: Box<[Handler]>,
    breaks: Box<[BreakKind]>,
    kinds: Box<[RegionKind]>,
    /// Debug capability. `None` disables interception queries entirely.
    probe: Option<Arc<dyn BreakpointProbe>>,
}

impl Bus {
    /// Build a table with every region unmapped, then apply `mappings` in
    /// order. If `probe` is supplied it is retained as the table's fixed
    /// interception collaborator.
    pub fn new(mappings: &[Mapping], probe: Option<Arc<dyn BreakpointProbe>>) -> Self {
        let mut bus = Self {
            live: vec![Handler::Unmapped; REGION_COUNT].into_boxed_slice(),
            shadow: vec![Handler::Unmapped; REGION_COUNT].into_boxed_slice(),
            breaks: vec![BreakKind::empty(); REGION_COUNT].into_boxed_slice(),
            kinds: vec![RegionKind::Unmapped; REGION_COUNT].into_boxed_slice(),
            probe,
        };
        for mapping in mappings {
            bus.apply_mapping(mapping);
        }
        bus
    }

    /// Install a mapping over every region its range touches (inclusive on
    /// both ends, whole-region granularity).
    ///
    /// Not safe to call concurrently with dispatch; expected only during
    /// setup or exceptional remapping events.
    pub fn apply_mapping(&mut self, mapping: &Mapping) {
        let begin = (mapping.begin >> REGION_SHIFT) as usize;
        let end = (mapping.end >> REGION_SHIFT) as usize;
        for region in begin..=end {
            self.map_region(region, mapping.kind, &mapping.handler);
        }
    }

    fn map_region(&mut self, region: usize, kind: RegionKind, handler: &Handler) {
        self.kinds[region] = kind;

        // Installing a mapping must not clobber interception the debugger
        // already has on this region: the new handler goes to the shadow
        // slot and the live slot keeps (or gains) the interception marker.
        let intercepted = !self.breaks[region].is_empty()
            || self.probe.as_ref().is_some_and(|probe| {
                probe.has_enabled_breakpoint((region as u32) << REGION_SHIFT, REGION_SIZE)
            });

        if intercepted {
            self.shadow[region] = handler.clone();
            self.live[region] = Handler::Traced;
        } else {
            self.live[region] = handler.clone();
        }
    }

    /// Activate breakpoint interception of `kind` accesses for the region
    /// containing `address`. Idempotent.
    pub fn activate_break(&mut self, address: u32, kind: BreakKind) {
        let region = Self::region(address);

        // First activation of either kind captures the live handler and
        // swaps in the interception marker, in one indivisible step. The
        // live slot may already hold the marker if a mapping was installed
        // over a registry-known breakpoint; the shadow is valid then.
        if self.breaks[region].is_empty() && !matches!(self.live[region], Handler::Traced) {
            self.shadow[region] = mem::replace(&mut self.live[region], Handler::Traced);
        }
        self.breaks[region] |= kind;
    }

    /// Deactivate breakpoint interception of `kind` accesses for the region
    /// containing `address`. Restores the displaced handler once neither
    /// kind remains active. Deactivating a kind that was not active is a
    /// no-op.
    pub fn deactivate_break(&mut self, address: u32, kind: BreakKind) {
        let region = Self::region(address);

        let before = self.breaks[region];
        self.breaks[region] &= !kind;
        if !before.is_empty() && self.breaks[region].is_empty() {
            self.live[region] = mem::replace(&mut self.shadow[region], Handler::Unmapped);
        }
    }

    /// Dispatch a 32-bit read. `pc` is the address of the issuing
    /// instruction, forwarded to the debugger on a breakpoint hit.
    pub fn read(&self, pc: u32, address: u32) -> u32 {
        let region = Self::region(address);
        if let Handler::Traced = self.live[region] {
            if self.breaks[region].contains(BreakKind::READ) {
                self.report(pc, address, HitFlags::READ);
            }
            // The live slot holds the marker, so the real handler is only
            // recoverable from the shadow slot.
            Self::invoke_read(&self.shadow[region], address)
        } else {
            Self::invoke_read(&self.live[region], address)
        }
    }

    /// Dispatch a masked 32-bit write. Never fails from the caller's point
    /// of view.
    pub fn write(&self, pc: u32, address: u32, value: u32, mask: u32) {
        let region = Self::region(address);
        if let Handler::Traced = self.live[region] {
            if self.breaks[region].contains(BreakKind::WRITE) {
                self.report(pc, address, HitFlags::WRITE);
            }
            Self::invoke_write(&self.shadow[region], address, value, mask);
        } else {
            Self::invoke_write(&self.live[region], address, value, mask);
        }
    }

    /// Kind tag of the region containing `address`, regardless of breakpoint
    /// state.
    pub fn region_kind(&self, address: u32) -> RegionKind {
        self.kinds[Self::region(address)]
    }

    /// Breakpoint-active mask of the region containing `address`.
    pub fn break_mask(&self, address: u32) -> BreakKind {
        self.breaks[Self::region(address)]
    }

    fn report(&self, pc: u32, address: u32, access: HitFlags) {
        if let Some(probe) = &self.probe {
            probe.report_access(AccessHit {
                pc,
                address,
                size: 4,
                flags: HitFlags::ENABLED | access,
            });
        }
    }

    fn invoke_read(handler: &Handler, address: u32) -> u32 {
        match handler {
            Handler::Device(handler) => handler.read(address),
            // The shadow slot never holds the interception marker, so both
            // remaining arms behave as an unmapped read.
            Handler::Unmapped | Handler::Traced => {
                trace!(address, "read from unmapped region");
                UNMAPPED_READ_VALUE
            }
        }
    }

    fn invoke_write(handler: &Handler, address: u32, value: u32, mask: u32) {
        match handler {
            Handler::Device(handler) => handler.write(address, value, mask),
            Handler::Unmapped | Handler::Traced => {
                trace!(address, value, "write to unmapped region dropped");
            }
        }
    }

    #[inline]
    fn region(address: u32) -> usize {
        (address >> REGION_SHIFT) as usize
    }
}
