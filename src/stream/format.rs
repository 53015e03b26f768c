// ============================================================================
// src/stream/format.rs - PCM Format Negotiation
// ============================================================================
//!
//! 要求された PCM フォーマットをストリームフォーマットレジスタ (SDnFMT) の
//! 16 ビットコードに変換する。
//!
//! `[TYPE:1][BASE:1][MULT:3][DIV:3][rsv:1][BITS:3][CHAN:4]`
//!
//! サンプルレートは固定テーブルのみ受け付け、リサンプリングはしない。

use core::fmt;

use bitflags::bitflags;

use crate::config::Quirks;
use crate::convert::Converter;
use crate::error::{HdaError, HdaResult};

/// 44.1 kHz base (48 kHz when clear)
pub const FMT_BASE_44K: u16 = 1 << 14;
pub const FMT_MULT_SHIFT: u16 = 11;
pub const FMT_DIV_SHIFT: u16 = 8;
pub const FMT_BITS_SHIFT: u16 = 4;
pub const FMT_CHAN_MASK: u16 = 0x0F;

/// Channel range of a stream descriptor
pub const MIN_CHANNELS: u8 = 1;
pub const MAX_CHANNELS: u8 = 16;

/// Fixed rate table: (rate, 44.1 kHz base, multiplier, divider)
pub const SUPPORTED_RATES: [(u32, bool, u16, u16); 11] = [
    (8_000, false, 1, 6),
    (11_025, true, 1, 4),
    (16_000, false, 1, 3),
    (22_050, true, 1, 2),
    (32_000, false, 2, 3),
    (44_100, true, 1, 1),
    (48_000, false, 1, 1),
    (88_200, true, 2, 1),
    (96_000, false, 2, 1),
    (176_400, true, 4, 1),
    (192_000, false, 4, 1),
];

/// Sample sizes in BITS field order
pub const SUPPORTED_BITS: [u8; 5] = [8, 16, 20, 24, 32];

/// Interleaved PCM format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcmFormat {
    pub rate: u32,
    pub bits: u8,
    pub channels: u8,
}

impl PcmFormat {
    pub const fn new(rate: u32, bits: u8, channels: u8) -> Self {
        Self {
            rate,
            bits,
            channels,
        }
    }

    /// Bytes per sample frame
    pub fn frame_size(&self) -> usize {
        self.bits.div_ceil(8) as usize * self.channels as usize
    }
}

impl fmt::Display for PcmFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} Hz/{}-bit/{}ch", self.rate, self.bits, self.channels)
    }
}

/// SDnFMT / converter format value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatCode(pub u16);

impl FormatCode {
    /// Encode a format; every field must be representable
    pub fn encode(format: &PcmFormat) -> HdaResult<Self> {
        let &(_, base44, mult, div) = SUPPORTED_RATES
            .iter()
            .find(|(rate, ..)| *rate == format.rate)
            .ok_or(HdaError::UnsupportedRate(format.rate))?;
        let bits = SUPPORTED_BITS
            .iter()
            .position(|&b| b == format.bits)
            .ok_or(HdaError::UnsupportedBitDepth(format.bits))? as u16;
        if !(MIN_CHANNELS..=MAX_CHANNELS).contains(&format.channels) {
            return Err(HdaError::UnsupportedChannels(format.channels));
        }

        let mut code = ((mult - 1) << FMT_MULT_SHIFT) | ((div - 1) << FMT_DIV_SHIFT);
        if base44 {
            code |= FMT_BASE_44K;
        }
        code |= bits << FMT_BITS_SHIFT;
        code |= (format.channels - 1) as u16 & FMT_CHAN_MASK;
        Ok(Self(code))
    }

    /// Decode back to rate/bits/channels. `None` for reserved field values.
    pub fn decode(self) -> Option<PcmFormat> {
        let base = if self.0 & FMT_BASE_44K != 0 { 44_100 } else { 48_000 };
        let mult = ((self.0 >> FMT_MULT_SHIFT) & 0x7) as u32 + 1;
        let div = ((self.0 >> FMT_DIV_SHIFT) & 0x7) as u32 + 1;
        if mult > 4 {
            return None;
        }
        let bits = *SUPPORTED_BITS.get(((self.0 >> FMT_BITS_SHIFT) & 0x7) as usize)?;
        Some(PcmFormat {
            rate: base * mult / div,
            bits,
            channels: (self.0 & FMT_CHAN_MASK) as u8 + 1,
        })
    }
}

/// Result of [`negotiate`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Negotiated {
    /// What the client submits
    pub requested: PcmFormat,
    /// What the DMA engine plays
    pub device: PcmFormat,
    pub code: FormatCode,
    pub converter: Converter,
}

/// Map a requested format onto the device format and pick a converter.
///
/// Channel count is raised to the hardware minimum (two under
/// `FORCE_STEREO`); more than 16 channels is rejected.
pub fn negotiate(mut requested: PcmFormat, quirks: Quirks) -> HdaResult<Negotiated> {
    let min_channels = if quirks.contains(Quirks::FORCE_STEREO) {
        2
    } else {
        MIN_CHANNELS
    };
    if requested.channels > MAX_CHANNELS {
        return Err(HdaError::UnsupportedChannels(requested.channels));
    }
    // 0 チャンネル要求はクライアント側も最小値として扱う
    if requested.channels == 0 {
        requested.channels = min_channels;
    }

    let mut device = requested;
    device.channels = requested.channels.max(min_channels);
    if device.bits == 8 && quirks.contains(Quirks::WIDEN_8BIT) {
        device.bits = 16;
    }

    let code = FormatCode::encode(&device)?;
    let converter = Converter::select(&requested, &device)?;
    Ok(Negotiated {
        requested,
        device,
        code,
        converter,
    })
}

// ============================================================================
// Capabilities
// ============================================================================

bitflags! {
    /// Formats reported to the client (rate kHz, mono/stereo, bits)
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct WaveFormats: u32 {
        const F1M08 = 0x0000_0001;
        const F1S08 = 0x0000_0002;
        const F1M16 = 0x0000_0004;
        const F1S16 = 0x0000_0008;
        const F2M08 = 0x0000_0010;
        const F2S08 = 0x0000_0020;
        const F2M16 = 0x0000_0040;
        const F2S16 = 0x0000_0080;
        const F4M08 = 0x0000_0100;
        const F4S08 = 0x0000_0200;
        const F4M16 = 0x0000_0400;
        const F4S16 = 0x0000_0800;
    }
}

impl WaveFormats {
    const TABLE: [(WaveFormats, u32, u8, u8); 12] = [
        (Self::F1M08, 11_025, 8, 1),
        (Self::F1S08, 11_025, 8, 2),
        (Self::F1M16, 11_025, 16, 1),
        (Self::F1S16, 11_025, 16, 2),
        (Self::F2M08, 22_050, 8, 1),
        (Self::F2S08, 22_050, 8, 2),
        (Self::F2M16, 22_050, 16, 1),
        (Self::F2S16, 22_050, 16, 2),
        (Self::F4M08, 44_100, 8, 1),
        (Self::F4S08, 44_100, 8, 2),
        (Self::F4M16, 44_100, 16, 1),
        (Self::F4S16, 44_100, 16, 2),
    ];

    /// Flags whose format [`negotiate`] accepts under `quirks`
    pub fn supported(quirks: Quirks) -> Self {
        Self::TABLE
            .iter()
            .filter(|&&(_, rate, bits, channels)| {
                negotiate(PcmFormat::new(rate, bits, channels), quirks).is_ok()
            })
            .fold(Self::empty(), |acc, &(flag, ..)| acc | flag)
    }

    /// The format a single flag stands for
    pub fn format_of(flag: WaveFormats) -> Option<PcmFormat> {
        Self::TABLE
            .iter()
            .find(|(f, ..)| *f == flag)
            .map(|&(_, rate, bits, channels)| PcmFormat::new(rate, bits, channels))
    }
}

/// Output device capabilities
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputCaps {
    pub vendor_id: u16,
    pub device_id: u16,
    pub channels: u8,
    pub formats: WaveFormats,
}
