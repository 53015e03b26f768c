// ============================================================================
// src/stream/bdl.rs - Buffer Descriptor List
// ============================================================================
//!
//! ハードウェアが直接読むバッファディスクリプタリスト。
//! エントリは 16 バイト: 64 ビット物理アドレス、32 ビット長、32 ビット IOC。

use x86_64::PhysAddr;

use crate::hal::DmaRegion;

/// Interrupt on completion
pub const BDL_IOC: u32 = 1 << 0;

/// Buffer Descriptor List Entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C, align(16))]
pub struct BdlEntry {
    /// Physical address of buffer (low 32 bits)
    pub addr_low: u32,
    /// Physical address of buffer (high 32 bits)
    pub addr_high: u32,
    /// Length of buffer in bytes
    pub length: u32,
    /// Interrupt on completion flag
    pub ioc: u32,
}

const _: () = assert!(core::mem::size_of::<BdlEntry>() == 16);

impl BdlEntry {
    pub fn new(addr: PhysAddr, length: u32, ioc: bool) -> Self {
        Self {
            addr_low: addr.as_u64() as u32,
            addr_high: (addr.as_u64() >> 32) as u32,
            length,
            ioc: if ioc { BDL_IOC } else { 0 },
        }
    }

    pub fn addr(&self) -> u64 {
        (self.addr_high as u64) << 32 | self.addr_low as u64
    }

    /// Store as entry `index` of a BDL region
    pub fn write_to(&self, region: &DmaRegion, index: usize) {
        let base = index * 4;
        region.write_u32(base, self.addr_low);
        region.write_u32(base + 1, self.addr_high);
        region.write_u32(base + 2, self.length);
        region.write_u32(base + 3, self.ioc);
    }

    pub fn read_from(region: &DmaRegion, index: usize) -> Self {
        let base = index * 4;
        Self {
            addr_low: region.read_u32(base),
            addr_high: region.read_u32(base + 1),
            length: region.read_u32(base + 2),
            ioc: region.read_u32(base + 3),
        }
    }
}

/// Fill `bdl` with `entries` equal chunks covering `wave`, each raising IOC
pub fn build(bdl: &DmaRegion, wave: &DmaRegion, entries: usize, chunk_size: usize) {
    let base = wave.phys().as_u64();
    for i in 0..entries {
        let addr = PhysAddr::new(base + (i * chunk_size) as u64);
        BdlEntry::new(addr, chunk_size as u32, true).write_to(bdl, i);
    }
}
