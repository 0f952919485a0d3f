use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use ultra_mem::{
    AccessHit, BreakKind, BreakpointProbe, Bus, Handler, HitFlags, Mapping, MemBase, MemoryHandler,
    RegionKind, UNMAPPED_READ_VALUE,
};
use ultra_mem_map::{MM_RDRAM_REGS, REGION_SIZE};

/// Word-granular RAM handler with interior mutability, as device models
/// provide to the bus.
#[derive(Default)]
struct SharedRam {
    words: Mutex<HashMap<u32, u32>>,
}

impl MemoryHandler for SharedRam {
    fn read(&self, address: u32) -> u32 {
        self.words
            .lock()
            .unwrap()
            .get(&(address >> 2))
            .copied()
            .unwrap_or(0)
    }

    fn write(&self, address: u32, value: u32, mask: u32) {
        let mut words = self.words.lock().unwrap();
        let word = words.entry(address >> 2).or_insert(0);
        *word = (*word & !mask) | (value & mask);
    }
}

/// Breakpoint registry stub: a list of breakpointed addresses plus a hit log.
#[derive(Default)]
struct RecordingProbe {
    enabled: Mutex<Vec<u32>>,
    hits: Mutex<Vec<AccessHit>>,
}

impl RecordingProbe {
    fn hits(&self) -> Vec<AccessHit> {
        self.hits.lock().unwrap().clone()
    }
}

impl BreakpointProbe for RecordingProbe {
    fn has_enabled_breakpoint(&self, start: u32, len: u32) -> bool {
        self.enabled
            .lock()
            .unwrap()
            .iter()
            .any(|&address| address >= start && address - start < len)
    }

    fn report_access(&self, hit: AccessHit) {
        self.hits.lock().unwrap().push(hit);
    }
}

fn ram_mapping(begin: u32, end: u32) -> (Arc<SharedRam>, Mapping) {
    let ram = Arc::new(SharedRam::default());
    let mapping = Mapping {
        begin,
        end,
        kind: RegionKind::Ram,
        handler: Handler::Device(ram.clone()),
    };
    (ram, mapping)
}

#[test]
fn break_round_trip_restores_original_dispatch() {
    let (_ram, mapping) = ram_mapping(0x0010_0000, 0x0010_ffff);
    let probe = Arc::new(RecordingProbe::default());
    let mut bus = Bus::new(&[mapping], Some(probe.clone()));

    bus.write(0, 0x0010_0040, 0xcafe_f00d, 0xffff_ffff);

    bus.activate_break(0x0010_0040, BreakKind::READ);
    // Intercepted reads still return the real handler's data.
    assert_eq!(bus.read(0x8000_1234, 0x0010_0040), 0xcafe_f00d);

    bus.deactivate_break(0x0010_0040, BreakKind::READ);
    assert_eq!(bus.read(0x8000_1238, 0x0010_0040), 0xcafe_f00d);
    assert_eq!(bus.break_mask(0x0010_0040), BreakKind::empty());

    // Exactly one hit, from the intercepted read only.
    let hits = probe.hits();
    assert_eq!(hits.len(), 1);
    assert_eq!(
        hits[0],
        AccessHit {
            pc: 0x8000_1234,
            address: 0x0010_0040,
            size: 4,
            flags: HitFlags::ENABLED | HitFlags::READ,
        }
    );
}

#[test]
fn read_break_does_not_intercept_writes() {
    let (ram, mapping) = ram_mapping(0x0010_0000, 0x0010_ffff);
    let probe = Arc::new(RecordingProbe::default());
    let mut bus = Bus::new(&[mapping], Some(probe.clone()));

    bus.activate_break(0x0010_0000, BreakKind::READ);

    // Writes forward to the real handler and report nothing.
    bus.write(0x8000_0000, 0x0010_0008, 0x1122_3344, 0xffff_ffff);
    assert!(probe.hits().is_empty());
    assert_eq!(ram.read(0x0010_0008), 0x1122_3344);

    // A write breakpoint on top starts reporting writes too.
    bus.activate_break(0x0010_0000, BreakKind::WRITE);
    bus.write(0x8000_0004, 0x0010_0008, 0x5566_7788, 0xffff_ffff);
    let hits = probe.hits();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].flags, HitFlags::ENABLED | HitFlags::WRITE);
    assert_eq!(ram.read(0x0010_0008), 0x5566_7788);
}

#[test]
fn install_over_breakpointed_region_keeps_interception() {
    let probe = Arc::new(RecordingProbe::default());
    probe.enabled.lock().unwrap().push(0x0020_0010);
    let mut bus = Bus::new(&[], Some(probe.clone()));

    // The registry already holds an enabled breakpoint in this region, so
    // installing a mapping must park the handler behind the interception.
    let (ram, mapping) = ram_mapping(0x0020_0000, 0x0020_ffff);
    bus.apply_mapping(&mapping);
    bus.activate_break(0x0020_0010, BreakKind::WRITE);

    bus.write(0x8000_0000, 0x0020_0010, 0xaabb_ccdd, 0xffff_ffff);
    assert_eq!(probe.hits().len(), 1);
    assert_eq!(ram.read(0x0020_0010), 0xaabb_ccdd);

    // Removing the breakpoint restores the mapping installed "underneath".
    bus.deactivate_break(0x0020_0010, BreakKind::WRITE);
    assert_eq!(bus.read(0, 0x0020_0010), 0xaabb_ccdd);
    assert_eq!(bus.region_kind(0x0020_0010), RegionKind::Ram);
}

#[test]
fn unmapped_region_with_active_break_still_reports() {
    let probe = Arc::new(RecordingProbe::default());
    let mut bus = Bus::new(&[], Some(probe.clone()));

    bus.activate_break(0x0030_0000, BreakKind::READ);
    assert_eq!(bus.read(0x8000_0000, 0x0030_0004), UNMAPPED_READ_VALUE);
    assert_eq!(probe.hits().len(), 1);

    bus.deactivate_break(0x0030_0000, BreakKind::READ);
    assert_eq!(bus.read(0x8000_0000, 0x0030_0004), UNMAPPED_READ_VALUE);
    assert_eq!(probe.hits().len(), 1);
}

#[test]
fn ram_round_trip_at_register_space_boundary() {
    // Allocate the real flat buffers, then drive a RAM handler mapped over
    // the region containing the register-space boundary through the bus.
    let _base = MemBase::new().expect("flat buffer allocation");

    // The last RAM region below the register space.
    let region_begin = (MM_RDRAM_REGS - 1) & !(REGION_SIZE - 1);
    let (_ram, mapping) = ram_mapping(region_begin, MM_RDRAM_REGS - 1);
    let bus = Bus::new(&[mapping], None);

    let address = MM_RDRAM_REGS - 4;
    bus.write(0, address, 0x0bad_cafe, 0xffff_ffff);
    assert_eq!(bus.read(0, address), 0x0bad_cafe);
}

#[test]
fn masked_writes_merge_through_dispatch() {
    let (ram, mapping) = ram_mapping(0x0000_0000, 0x0000_ffff);
    let bus = Bus::new(&[mapping], None);

    bus.write(0, 0x0000_0100, 0xffff_ffff, 0xffff_ffff);
    bus.write(0, 0x0000_0100, 0x0000_1234, 0x0000_ffff);
    assert_eq!(bus.read(0, 0x0000_0100), 0xffff_1234);
    assert_eq!(ram.read(0x0000_0100), 0xffff_1234);
}
