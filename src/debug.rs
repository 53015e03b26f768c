// ============================================================================
// src/debug.rs - Register and Topology Dumps
// ============================================================================
//!
//! 診断用のスナップショット。ホストのシェルやログからそのまま表示できるよう
//! すべて `Display` を実装する。

use core::fmt;

use crate::codec::{Codec, WidgetType};
use crate::hal::HardwareTransport;
use crate::regs::*;

/// Global and CORB/RIRB registers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlobalRegs {
    pub gcap: u16,
    pub vmaj: u8,
    pub vmin: u8,
    pub gctl: u32,
    pub wakeen: u16,
    pub statests: u16,
    pub intctl: u32,
    pub intsts: u32,
    pub corbwp: u16,
    pub corbrp: u16,
    pub corbctl: u8,
    pub corbsts: u8,
    pub corbsize: u8,
    pub rirbwp: u16,
    pub rintcnt: u16,
    pub rirbctl: u8,
    pub rirbsts: u8,
    pub rirbsize: u8,
}

impl GlobalRegs {
    pub fn read<H: HardwareTransport>(hw: &H) -> Self {
        Self {
            gcap: hw.read16(REG_GCAP),
            vmaj: hw.read8(REG_VMAJ),
            vmin: hw.read8(REG_VMIN),
            gctl: hw.read32(REG_GCTL),
            wakeen: hw.read16(REG_WAKEEN),
            statests: hw.read16(REG_STATESTS),
            intctl: hw.read32(REG_INTCTL),
            intsts: hw.read32(REG_INTSTS),
            corbwp: hw.read16(REG_CORBWP),
            corbrp: hw.read16(REG_CORBRP),
            corbctl: hw.read8(REG_CORBCTL),
            corbsts: hw.read8(REG_CORBSTS),
            corbsize: hw.read8(REG_CORBSIZE),
            rirbwp: hw.read16(REG_RIRBWP),
            rintcnt: hw.read16(REG_RINTCNT),
            rirbctl: hw.read8(REG_RIRBCTL),
            rirbsts: hw.read8(REG_RIRBSTS),
            rirbsize: hw.read8(REG_RIRBSIZE),
        }
    }
}

impl fmt::Display for GlobalRegs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let gcap = Gcap::from(self.gcap);
        writeln!(
            f,
            "GCAP     {:04x}  (OSS {} ISS {} BSS {}{})  VER {}.{}",
            self.gcap,
            gcap.output_streams,
            gcap.input_streams,
            gcap.bidir_streams,
            if gcap.addr64 { " 64OK" } else { "" },
            self.vmaj,
            self.vmin
        )?;
        writeln!(f, "GCTL     {:08x}  WAKEEN {:04x}  STATESTS {:04x}", self.gctl, self.wakeen, self.statests)?;
        writeln!(f, "INTCTL   {:08x}  INTSTS {:08x}", self.intctl, self.intsts)?;
        writeln!(
            f,
            "CORB     WP {:04x} RP {:04x} CTL {:02x} STS {:02x} SIZE {:02x}",
            self.corbwp, self.corbrp, self.corbctl, self.corbsts, self.corbsize
        )?;
        write!(
            f,
            "RIRB     WP {:04x} RINTCNT {:04x} CTL {:02x} STS {:02x} SIZE {:02x}",
            self.rirbwp, self.rintcnt, self.rirbctl, self.rirbsts, self.rirbsize
        )
    }
}

/// One stream descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamDescriptorRegs {
    pub index: u8,
    /// CTL bytes 0-2
    pub ctl: u32,
    pub sts: u8,
    pub lpib: u32,
    pub cbl: u32,
    pub lvi: u16,
    pub fifos: u16,
    pub fmt: u16,
    pub bdpl: u32,
    pub bdpu: u32,
}

impl StreamDescriptorRegs {
    pub fn read<H: HardwareTransport>(hw: &H, index: u8) -> Self {
        let sd = stream_desc_offset(index);
        let ctl = hw.read8(sd + REG_SD_CTL0) as u32
            | (hw.read8(sd + REG_SD_CTL0 + 1) as u32) << 8
            | (hw.read8(sd + REG_SD_CTL2) as u32) << 16;
        Self {
            index,
            ctl,
            sts: hw.read8(sd + REG_SD_STS),
            lpib: hw.read32(sd + REG_SD_LPIB),
            cbl: hw.read32(sd + REG_SD_CBL),
            lvi: hw.read16(sd + REG_SD_LVI),
            fifos: hw.read16(sd + REG_SD_FIFOS),
            fmt: hw.read16(sd + REG_SD_FMT),
            bdpl: hw.read32(sd + REG_SD_BDPL),
            bdpu: hw.read32(sd + REG_SD_BDPU),
        }
    }

    pub fn control(&self) -> StreamCtl {
        StreamCtl::from_bits_truncate(self.ctl as u8)
    }

    pub fn status(&self) -> StreamStatus {
        StreamStatus::from_bits_truncate(self.sts)
    }

    /// Stream number programmed in CTL byte 2
    pub fn stream_tag(&self) -> u8 {
        ((self.ctl >> 16) as u8 & SD_CTL2_STRM_MASK) >> SD_CTL2_STRM_SHIFT
    }
}

impl fmt::Display for StreamDescriptorRegs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "SD{}      CTL {:06x} ({:?}) tag {}  STS {:02x} ({:?})",
            self.index,
            self.ctl,
            self.control(),
            self.stream_tag(),
            self.sts,
            self.status()
        )?;
        write!(
            f,
            "         LPIB {:08x} CBL {:08x} LVI {:04x} FIFOS {:04x} FMT {:04x} BDL {:08x}{:08x}",
            self.lpib, self.cbl, self.lvi, self.fifos, self.fmt, self.bdpu, self.bdpl
        )
    }
}

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Codec {}: {:04x}:{:04x}",
            self.address,
            self.vendor(),
            self.device()
        )?;
        let Some(afg) = self.afg.as_ref() else {
            return write!(f, " (no audio function group)");
        };
        write!(f, "\n  AFG node {}", afg.nid)?;
        for w in &afg.widgets {
            write!(f, "\n  [{:3}] {:<14} caps {:08x}", w.nid, w.widget_type.name(), w.raw_caps)?;
            if w.widget_type == WidgetType::PinComplex {
                write!(f, " pin {:08x}", w.pin_caps.bits())?;
            }
            if !w.connections.is_empty() {
                write!(f, " <- {:?}", w.connections)?;
            }
            if let Some(next) = w.out_path {
                write!(f, " -> {}", next)?;
            }
            if let Some(tag) = w.stream_tag {
                write!(f, " tag {}", tag)?;
            }
        }
        Ok(())
    }
}
