// ============================================================================
// src/regs.rs - Intel High Definition Audio Register Definitions
// ============================================================================
//!
//! # Intel HD Audio レジスタ定義
//!
//! Intel High Definition Audio Specification Rev 1.0a に基づくレジスタ定義。
//! オフセットと幅はハードウェアで固定されており、ビット単位で一致させること。
//!
//! - グローバルレジスタ (0x00 - 0x3F)
//! - CORB/RIRB レジスタ (0x40 - 0x5F)
//! - ストリームディスクリプタ (0x80 から 0x20 バイトずつ)

use bitflags::bitflags;

// ============================================================================
// Global Registers (Offset 0x00 - 0x3F)
// ============================================================================

/// Global Capabilities (GCAP) - 16-bit, RO
pub const REG_GCAP: u32 = 0x00;

/// Minor Version (VMIN) - 8-bit, RO
pub const REG_VMIN: u32 = 0x02;

/// Major Version (VMAJ) - 8-bit, RO
pub const REG_VMAJ: u32 = 0x03;

/// Output Payload Capability (OUTPAY) - 16-bit, RO
pub const REG_OUTPAY: u32 = 0x04;

/// Input Payload Capability (INPAY) - 16-bit, RO
pub const REG_INPAY: u32 = 0x06;

/// Global Control (GCTL) - 32-bit, RW
pub const REG_GCTL: u32 = 0x08;

/// Wake Enable (WAKEEN) - 16-bit, RW
pub const REG_WAKEEN: u32 = 0x0C;

/// State Change Status (STATESTS) - 16-bit, RW1C
pub const REG_STATESTS: u32 = 0x0E;

/// Global Status (GSTS) - 16-bit, RW1C
pub const REG_GSTS: u32 = 0x10;

/// Output Stream Payload Capability (OUTSTRMPAY) - 16-bit, RO
pub const REG_OUTSTRMPAY: u32 = 0x18;

/// Input Stream Payload Capability (INSTRMPAY) - 16-bit, RO
pub const REG_INSTRMPAY: u32 = 0x1A;

/// Interrupt Control (INTCTL) - 32-bit, RW
pub const REG_INTCTL: u32 = 0x20;

/// Interrupt Status (INTSTS) - 32-bit, RO
pub const REG_INTSTS: u32 = 0x24;

/// Wall Clock Counter (WALCLK) - 32-bit, RO
pub const REG_WALCLK: u32 = 0x30;

/// Stream Synchronization (SSYNC) - 32-bit, RW
pub const REG_SSYNC: u32 = 0x38;

// GCAP fields
pub const GCAP_64OK: u16 = 1 << 0;
pub const GCAP_BSS_SHIFT: u16 = 3;
pub const GCAP_BSS_MASK: u16 = 0x1F;
pub const GCAP_ISS_SHIFT: u16 = 8;
pub const GCAP_OSS_SHIFT: u16 = 12;
pub const GCAP_SS_MASK: u16 = 0x0F;

/// Controller Reset
pub const GCTL_CRST: u32 = 1 << 0;
/// Flush Control
pub const GCTL_FCNTRL: u32 = 1 << 1;
/// Accept Unsolicited Response Enable
pub const GCTL_UNSOL: u32 = 1 << 8;

/// STATESTS の有効ビット（SDIN 0-14）
pub const STATESTS_SDIWAKE_MASK: u16 = 0x7FFF;

/// Stream Interrupt Enable (bits 0-29)
pub const INTCTL_SIE_MASK: u32 = 0x3FFF_FFFF;
/// Controller Interrupt Enable
pub const INTCTL_CIE: u32 = 1 << 30;
/// Global Interrupt Enable
pub const INTCTL_GIE: u32 = 1 << 31;

/// Stream Interrupt Status (bits 0-29)
pub const INTSTS_SIS_MASK: u32 = 0x3FFF_FFFF;
/// Controller Interrupt Status
pub const INTSTS_CIS: u32 = 1 << 30;
/// Global Interrupt Status
pub const INTSTS_GIS: u32 = 1 << 31;

/// INTSTS で表現できるストリーム数
pub const MAX_STREAM_INTERRUPTS: u32 = 30;

// ============================================================================
// CORB Registers (Offset 0x40 - 0x4F)
// ============================================================================

/// CORB Lower Base Address - 32-bit, RW
pub const REG_CORBLBASE: u32 = 0x40;

/// CORB Upper Base Address - 32-bit, RW
pub const REG_CORBUBASE: u32 = 0x44;

/// CORB Write Pointer - 16-bit, RW
pub const REG_CORBWP: u32 = 0x48;

/// CORB Read Pointer - 16-bit, RW
pub const REG_CORBRP: u32 = 0x4A;

/// CORB Control - 8-bit, RW
pub const REG_CORBCTL: u32 = 0x4C;

/// CORB Status - 8-bit, RW1C
pub const REG_CORBSTS: u32 = 0x4D;

/// CORB Size - 8-bit, RW
pub const REG_CORBSIZE: u32 = 0x4E;

/// CORB Memory Error Interrupt Enable
pub const CORBCTL_CMEIE: u8 = 1 << 0;
/// Enable CORB DMA Engine
pub const CORBCTL_CORBRUN: u8 = 1 << 1;

/// CORB Memory Error Indication
pub const CORBSTS_CMEI: u8 = 1 << 0;

/// CORB Read Pointer Reset
pub const CORBRP_RST: u16 = 1 << 15;

/// 8ビットのリングポインタ
pub const RING_PTR_MASK: u16 = 0xFF;

// ============================================================================
// RIRB Registers (Offset 0x50 - 0x5F)
// ============================================================================

/// RIRB Lower Base Address - 32-bit, RW
pub const REG_RIRBLBASE: u32 = 0x50;

/// RIRB Upper Base Address - 32-bit, RW
pub const REG_RIRBUBASE: u32 = 0x54;

/// RIRB Write Pointer - 16-bit, RW
pub const REG_RIRBWP: u32 = 0x58;

/// Response Interrupt Count - 16-bit, RW
pub const REG_RINTCNT: u32 = 0x5A;

/// RIRB Control - 8-bit, RW
pub const REG_RIRBCTL: u32 = 0x5C;

/// RIRB Status - 8-bit, RW1C
pub const REG_RIRBSTS: u32 = 0x5D;

/// RIRB Size - 8-bit, RW
pub const REG_RIRBSIZE: u32 = 0x5E;

/// RIRB Write Pointer Reset
pub const RIRBWP_RST: u16 = 1 << 15;

/// Response Interrupt Control
pub const RIRBCTL_RINTCTL: u8 = 1 << 0;
/// RIRB DMA Enable
pub const RIRBCTL_DMAEN: u8 = 1 << 1;
/// Response Overrun Interrupt Control
pub const RIRBCTL_OIC: u8 = 1 << 2;

/// Response Interrupt Flag
pub const RIRBSTS_RINTFL: u8 = 1 << 0;
/// Response Overrun Interrupt Status
pub const RIRBSTS_OIS: u8 = 1 << 2;

// CORBSIZE / RIRBSIZE share one layout
pub const RINGSIZE_SZCAP_SHIFT: u8 = 4;
pub const RINGSIZE_CAP_2: u8 = 1 << 0;
pub const RINGSIZE_CAP_16: u8 = 1 << 1;
pub const RINGSIZE_CAP_256: u8 = 1 << 2;
pub const RINGSIZE_SIZE_MASK: u8 = 0x03;
pub const RINGSIZE_2: u8 = 0x00;
pub const RINGSIZE_16: u8 = 0x01;
pub const RINGSIZE_256: u8 = 0x02;

// ============================================================================
// Immediate Command / DMA Position (Offset 0x60 - 0x77)
// ============================================================================

/// Immediate Command Output Interface - 32-bit, RW
pub const REG_ICOI: u32 = 0x60;

/// Immediate Command Input Interface - 32-bit, RO
pub const REG_ICII: u32 = 0x64;

/// Immediate Command Status - 16-bit, RW
pub const REG_ICIS: u32 = 0x68;

/// DMA Position Lower Base Address - 32-bit, RW
pub const REG_DPLBASE: u32 = 0x70;

/// DMA Position Upper Base Address - 32-bit, RW
pub const REG_DPUBASE: u32 = 0x74;

// ============================================================================
// Stream Descriptor Registers (0x80 + n * 0x20)
// ============================================================================

/// 最初のストリームディスクリプタのオフセット
pub const REG_SDESC_BASE: u32 = 0x80;

/// ストリームディスクリプタ 1 個分のサイズ
pub const STREAM_DESC_SIZE: u32 = 0x20;

/// Stream Descriptor Control, byte 0 - 8-bit, RW
pub const REG_SD_CTL0: u32 = 0x00;
/// Stream Descriptor Control, byte 2 - 8-bit, RW
pub const REG_SD_CTL2: u32 = 0x02;
/// Stream Descriptor Status - 8-bit, RW1C
pub const REG_SD_STS: u32 = 0x03;
/// Link Position in Buffer - 32-bit, RO
pub const REG_SD_LPIB: u32 = 0x04;
/// Cyclic Buffer Length - 32-bit, RW
pub const REG_SD_CBL: u32 = 0x08;
/// Last Valid Index - 16-bit, RW
pub const REG_SD_LVI: u32 = 0x0C;
/// FIFO Size - 16-bit, RO
pub const REG_SD_FIFOS: u32 = 0x10;
/// Format - 16-bit, RW
pub const REG_SD_FMT: u32 = 0x12;
/// BDL Pointer Lower - 32-bit, RW
pub const REG_SD_BDPL: u32 = 0x18;
/// BDL Pointer Upper - 32-bit, RW
pub const REG_SD_BDPU: u32 = 0x1C;

/// Stream Number field in CTL byte 2
pub const SD_CTL2_STRM_SHIFT: u8 = 4;
pub const SD_CTL2_STRM_MASK: u8 = 0xF0;

/// ストリームディスクリプタ `index` の先頭オフセット
#[inline]
pub const fn stream_desc_offset(index: u8) -> u32 {
    REG_SDESC_BASE + index as u32 * STREAM_DESC_SIZE
}

bitflags! {
    /// SDnCTL byte 0
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct StreamCtl: u8 {
        /// Stream Reset
        const SRST = 1 << 0;
        /// Stream Run
        const RUN = 1 << 1;
        /// Interrupt On Completion Enable
        const IOCE = 1 << 2;
        /// FIFO Error Interrupt Enable
        const FEIE = 1 << 3;
        /// Descriptor Error Interrupt Enable
        const DEIE = 1 << 4;
    }
}

bitflags! {
    /// SDnSTS
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct StreamStatus: u8 {
        /// Buffer Completion Interrupt Status
        const BCIS = 1 << 2;
        /// FIFO Error
        const FIFOE = 1 << 3;
        /// Descriptor Error
        const DESE = 1 << 4;
        /// FIFO Ready
        const FIFORDY = 1 << 5;
    }
}

impl StreamStatus {
    /// 割り込みを発生させる write-1-to-clear ビット
    pub const INTERRUPT_BITS: Self = Self::BCIS.union(Self::FIFOE).union(Self::DESE);
}

// ============================================================================
// GCAP
// ============================================================================

/// Parsed Global Capabilities
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Gcap {
    pub output_streams: u8,
    pub input_streams: u8,
    pub bidir_streams: u8,
    pub addr64: bool,
}

impl From<u16> for Gcap {
    fn from(raw: u16) -> Self {
        Self {
            output_streams: ((raw >> GCAP_OSS_SHIFT) & GCAP_SS_MASK) as u8,
            input_streams: ((raw >> GCAP_ISS_SHIFT) & GCAP_SS_MASK) as u8,
            bidir_streams: ((raw >> GCAP_BSS_SHIFT) & GCAP_BSS_MASK) as u8,
            addr64: raw & GCAP_64OK != 0,
        }
    }
}

impl Gcap {
    /// 全ストリームディスクリプタの数
    pub fn total_streams(&self) -> u8 {
        self.output_streams + self.input_streams + self.bidir_streams
    }
}

// ============================================================================
// Tests
// ============================================================================
