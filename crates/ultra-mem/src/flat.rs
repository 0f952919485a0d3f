use core::fmt;
use std::alloc::{self, Layout};
use std::ptr::NonNull;
use std::sync::Arc;

use thiserror::Error;
use tracing::error;

use ultra_mem_map::{
    CART_ROM_MAX_SIZE, DD_ROM_MAX_SIZE, DD_ROM_WINDOW_MASK, MEM_BASE_ALIGNMENT, MM_CART_ROM,
    MM_DD_ROM, MM_PIF_MEM, MM_RDRAM_DRAM2, MM_RDRAM_REGS, MM_RSP_MEM, PIF_MEM_WINDOW_MASK,
    PIF_RAM_SIZE, PIF_ROM_SIZE, RDRAM_ALIGNMENT, RDRAM_MEMORY_SIZE, RSP_MEM_WINDOW_MASK,
    SP_MEM_SIZE,
};

/// One of the five flat backing buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlatBuffer {
    /// Main RAM.
    Rdram,
    /// Cartridge ROM (maximum size; actual ROMs may be smaller).
    CartRom,
    /// Coprocessor scratch memory (DMEM + IMEM).
    SpMem,
    /// Auxiliary (64DD IPL) ROM.
    DdRom,
    /// Boot ROM followed by boot RAM.
    PifMem,
}

impl FlatBuffer {
    /// Allocation order. Fixed: error reporting and the partial-cleanup
    /// contract are defined in terms of it.
    pub const ALL: [FlatBuffer; 5] = [
        FlatBuffer::Rdram,
        FlatBuffer::CartRom,
        FlatBuffer::SpMem,
        FlatBuffer::DdRom,
        FlatBuffer::PifMem,
    ];

    /// Fixed byte size of this buffer.
    pub fn size(self) -> usize {
        match self {
            FlatBuffer::Rdram => RDRAM_MEMORY_SIZE,
            FlatBuffer::CartRom => CART_ROM_MAX_SIZE,
            FlatBuffer::SpMem => SP_MEM_SIZE,
            FlatBuffer::DdRom => DD_ROM_MAX_SIZE,
            FlatBuffer::PifMem => PIF_ROM_SIZE + PIF_RAM_SIZE,
        }
    }

    /// Host allocation alignment. Main RAM is stricter than the rest.
    pub fn alignment(self) -> usize {
        match self {
            FlatBuffer::Rdram => RDRAM_ALIGNMENT,
            _ => MEM_BASE_ALIGNMENT,
        }
    }
}

impl fmt::Display for FlatBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FlatBuffer::Rdram => "rdram",
            FlatBuffer::CartRom => "cart-rom",
            FlatBuffer::SpMem => "sp-mem",
            FlatBuffer::DdRom => "dd-rom",
            FlatBuffer::PifMem => "pif-mem",
        })
    }
}

/// A resolved location inside one flat buffer. `offset` is always strictly
/// within the buffer's bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlatSlot {
    pub buffer: FlatBuffer,
    pub offset: usize,
}

/// Pure address-to-buffer translation with the fixed window priority order.
///
/// Evaluated top to bottom, first match wins:
/// 1. below the register-space boundary: primary main-RAM window,
/// 2. at or above the cart-ROM base: boot (PIF) window if the address falls
///    inside it, otherwise cart ROM,
/// 3. the auxiliary-ROM window,
/// 4. the coprocessor scratch window,
/// 5. at or above the secondary main-RAM base: main RAM past the
///    register-space boundary.
///
/// Unlike the pointer arithmetic this replaces, the offset is checked against
/// the backing buffer size: an address inside a window but past its buffer
/// translates to `None` instead of an out-of-bounds location.
pub fn translate(address: u32) -> Option<FlatSlot> {
    let (buffer, offset) = if address < MM_RDRAM_REGS {
        (FlatBuffer::Rdram, address)
    } else if address >= MM_CART_ROM {
        if address & PIF_MEM_WINDOW_MASK == MM_PIF_MEM {
            (FlatBuffer::PifMem, address - MM_PIF_MEM)
        } else {
            (FlatBuffer::CartRom, address - MM_CART_ROM)
        }
    } else if address & DD_ROM_WINDOW_MASK == MM_DD_ROM {
        (FlatBuffer::DdRom, address - MM_DD_ROM)
    } else if address & RSP_MEM_WINDOW_MASK == MM_RSP_MEM {
        (FlatBuffer::SpMem, address - MM_RSP_MEM)
    } else if address >= MM_RDRAM_DRAM2 {
        (FlatBuffer::Rdram, address - MM_RDRAM_DRAM2 + MM_RDRAM_REGS)
    } else {
        return None;
    };

    let offset = offset as usize;
    (offset < buffer.size()).then_some(FlatSlot { buffer, offset })
}

/// Startup failure allocating the flat buffer set.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum MemBaseError {
    /// The host refused one of the five backing allocations.
    #[error("failed to allocate {buffer} buffer ({size} bytes, align {align})")]
    Allocation {
        buffer: FlatBuffer,
        size: usize,
        align: usize,
    },
}

/// Aligned-allocation seam between [`MemBase`] and the host platform.
///
/// One uniform allocate/release contract regardless of how the target
/// platform spells aligned allocation. The default implementation uses the
/// global allocator; tests substitute failing allocators to exercise
/// partial-allocation cleanup.
pub trait HostAlloc {
    /// Allocate zeroed memory for `layout`, or `None` on failure.
    fn alloc_zeroed(&self, layout: Layout) -> Option<NonNull<u8>>;

    /// Release memory previously returned by [`HostAlloc::alloc_zeroed`].
    ///
    /// # Safety
    /// `ptr` must have been returned by `alloc_zeroed` on this allocator
    /// with the same `layout`, and must not be released twice.
    unsafe fn dealloc(&self, ptr: NonNull<u8>, layout: Layout);
}

/// [`HostAlloc`] backed by the global allocator.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemAlloc;

impl HostAlloc for SystemAlloc {
    fn alloc_zeroed(&self, layout: Layout) -> Option<NonNull<u8>> {
        // Safety: every layout this crate allocates has a nonzero size.
        NonNull::new(unsafe { alloc::alloc_zeroed(layout) })
    }

    unsafe fn dealloc(&self, ptr: NonNull<u8>, layout: Layout) {
        alloc::dealloc(ptr.as_ptr(), layout);
    }
}

/// Owned, aligned, zero-initialized host allocation. Never moves or resizes;
/// released exactly once on drop.
struct AlignedBuf {
    ptr: NonNull<u8>,
    layout: Layout,
    alloc: Arc<dyn HostAlloc>,
}

impl AlignedBuf {
    fn new(alloc: &Arc<dyn HostAlloc>, size: usize, align: usize) -> Option<Self> {
        let layout = Layout::from_size_align(size, align).ok()?;
        let ptr = alloc.alloc_zeroed(layout)?;
        Some(Self {
            ptr,
            layout,
            alloc: Arc::clone(alloc),
        })
    }

    fn as_slice(&self) -> &[u8] {
        // Safety: `ptr` covers `layout.size()` initialized bytes owned by
        // this value.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.layout.size()) }
    }

    fn as_mut_slice(&mut self) -> &mut [u8] {
        // Safety: as above; `&mut self` guarantees unique access.
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.layout.size()) }
    }
}

impl Drop for AlignedBuf {
    fn drop(&mut self) {
        // Safety: `ptr`/`layout` came from this allocator and drop runs once.
        unsafe { self.alloc.dealloc(self.ptr, self.layout) };
    }
}

/// The five fixed flat memories, allocated once per emulated session.
///
/// This is the direct-access side of the memory system: save-state code,
/// disassembly and external tooling resolve addresses against it. The CPU's
/// normal execution path must instead go through the dispatch table so
/// breakpoints remain effective.
pub struct MemBase {
    rdram: AlignedBuf,
    cart_rom: AlignedBuf,
    sp_mem: AlignedBuf,
    dd_rom: AlignedBuf,
    pif_mem: AlignedBuf,
}

impl MemBase {
    /// Allocate the buffer set from the global allocator.
    pub fn new() -> Result<Self, MemBaseError> {
        Self::with_alloc(Arc::new(SystemAlloc))
    }

    /// Allocate the buffer set through a caller-supplied allocator.
    ///
    /// Buffers are allocated in [`FlatBuffer::ALL`] order. On failure every
    /// buffer already allocated by this call is released before the error,
    /// naming the buffer that failed, is returned.
    pub fn with_alloc(alloc: Arc<dyn HostAlloc>) -> Result<Self, MemBaseError> {
        let rdram = Self::alloc_buffer(&alloc, FlatBuffer::Rdram)?;
        let cart_rom = Self::alloc_buffer(&alloc, FlatBuffer::CartRom)?;
        let sp_mem = Self::alloc_buffer(&alloc, FlatBuffer::SpMem)?;
        let dd_rom = Self::alloc_buffer(&alloc, FlatBuffer::DdRom)?;
        let pif_mem = Self::alloc_buffer(&alloc, FlatBuffer::PifMem)?;
        Ok(Self {
            rdram,
            cart_rom,
            sp_mem,
            dd_rom,
            pif_mem,
        })
    }

    fn alloc_buffer(
        alloc: &Arc<dyn HostAlloc>,
        buffer: FlatBuffer,
    ) -> Result<AlignedBuf, MemBaseError> {
        let (size, align) = (buffer.size(), buffer.alignment());
        AlignedBuf::new(alloc, size, align).ok_or_else(|| {
            error!(%buffer, size, align, "flat memory allocation failed");
            MemBaseError::Allocation {
                buffer,
                size,
                align,
            }
        })
    }

    /// Resolve a bus address to a location in one of the owned buffers.
    /// See [`translate`] for the window priority order.
    pub fn resolve(&self, address: u32) -> Option<FlatSlot> {
        translate(address)
    }

    /// 32-bit load for out-of-band consumers. The low two address bits are
    /// ignored; returns `None` exactly where [`MemBase::resolve`] does.
    pub fn load_u32(&self, address: u32) -> Option<u32> {
        let slot = self.resolve(address & !3)?;
        let bytes = self.buffer(slot.buffer);
        let word = bytes.get(slot.offset..slot.offset + 4)?;
        Some(u32::from_ne_bytes(word.try_into().ok()?))
    }

    /// Masked 32-bit store: only bits set in `mask` are replaced. Returns
    /// `false` if the address resolves to no buffer.
    pub fn store_u32(&mut self, address: u32, value: u32, mask: u32) -> bool {
        let Some(slot) = self.resolve(address & !3) else {
            return false;
        };
        let bytes = self.buffer_mut(slot.buffer);
        let Some(word) = bytes.get_mut(slot.offset..slot.offset + 4) else {
            return false;
        };
        let old = u32::from_ne_bytes([word[0], word[1], word[2], word[3]]);
        let merged = (old & !mask) | (value & mask);
        word.copy_from_slice(&merged.to_ne_bytes());
        true
    }

    /// Raw bytes of one flat buffer, e.g. for ROM loading or save-state
    /// serialization.
    pub fn buffer(&self, buffer: FlatBuffer) -> &[u8] {
        match buffer {
            FlatBuffer::Rdram => self.rdram.as_slice(),
            FlatBuffer::CartRom => self.cart_rom.as_slice(),
            FlatBuffer::SpMem => self.sp_mem.as_slice(),
            FlatBuffer::DdRom => self.dd_rom.as_slice(),
            FlatBuffer::PifMem => self.pif_mem.as_slice(),
        }
    }

    /// Mutable raw bytes of one flat buffer.
    pub fn buffer_mut(&mut self, buffer: FlatBuffer) -> &mut [u8] {
        match buffer {
            FlatBuffer::Rdram => self.rdram.as_mut_slice(),
            FlatBuffer::CartRom => self.cart_rom.as_mut_slice(),
            FlatBuffer::SpMem => self.sp_mem.as_mut_slice(),
            FlatBuffer::DdRom => self.dd_rom.as_mut_slice(),
            FlatBuffer::PifMem => self.pif_mem.as_mut_slice(),
        }
    }
}
