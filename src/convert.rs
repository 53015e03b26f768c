// ============================================================================
// src/convert.rs - Sample Converter
// ============================================================================
//!
//! クライアント形式からデバイス形式へのサンプル変換。
//!
//! 変換はすべて純粋関数で、`dest` と `src` の小さい方に収まる分だけ変換し、
//! 実際に消費/生成したバイト数を返す。入力の容量を超えて読み書きしない。

use crate::error::{HdaError, HdaResult};
use crate::stream::PcmFormat;

/// Bytes moved by one conversion call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Converted {
    /// Device-format bytes written to `dest`
    pub produced: usize,
    /// Client-format bytes read from `src`
    pub consumed: usize,
}

/// Converter chosen at format negotiation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Converter {
    /// Byte copy
    Identity,
    /// Unsigned 8-bit mono to signed 8-bit stereo
    MonoU8ToStereoS8,
    /// Unsigned 8-bit mono to signed 16-bit little-endian stereo
    MonoU8ToStereoS16,
}

impl Converter {
    /// Converter turning `requested` samples into `device` samples
    pub fn select(requested: &PcmFormat, device: &PcmFormat) -> HdaResult<Self> {
        if requested.bits == device.bits && requested.channels == device.channels {
            return Ok(Self::Identity);
        }
        match (requested.bits, requested.channels, device.bits, device.channels) {
            (8, 1, 16, 2) => Ok(Self::MonoU8ToStereoS16),
            (8, 1, 8, 2) => Ok(Self::MonoU8ToStereoS8),
            _ => Err(HdaError::UnimplementedConversion {
                from: *requested,
                to: *device,
            }),
        }
    }

    pub fn convert(&self, dest: &mut [u8], src: &[u8]) -> Converted {
        match self {
            Self::Identity => identity(dest, src),
            Self::MonoU8ToStereoS8 => mono_u8_to_stereo_s8(dest, src),
            Self::MonoU8ToStereoS16 => mono_u8_to_stereo_s16(dest, src),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Identity => "identity",
            Self::MonoU8ToStereoS8 => "1u8->2s8",
            Self::MonoU8ToStereoS16 => "1u8->2s16",
        }
    }
}

fn identity(dest: &mut [u8], src: &[u8]) -> Converted {
    let n = dest.len().min(src.len());
    dest[..n].copy_from_slice(&src[..n]);
    Converted {
        produced: n,
        consumed: n,
    }
}

#[inline]
fn unbias(sample: u8) -> i8 {
    sample.wrapping_sub(0x80) as i8
}

fn mono_u8_to_stereo_s8(dest: &mut [u8], src: &[u8]) -> Converted {
    let n = src.len().min(dest.len() / 2);
    for (frame, &s) in dest.chunks_exact_mut(2).zip(&src[..n]) {
        let sample = unbias(s) as u8;
        frame[0] = sample;
        frame[1] = sample;
    }
    Converted {
        produced: n * 2,
        consumed: n,
    }
}

fn mono_u8_to_stereo_s16(dest: &mut [u8], src: &[u8]) -> Converted {
    let n = src.len().min(dest.len() / 4);
    for (frame, &s) in dest.chunks_exact_mut(4).zip(&src[..n]) {
        let sample = ((unbias(s) as i16) << 8).to_le_bytes();
        frame[..2].copy_from_slice(&sample);
        frame[2..].copy_from_slice(&sample);
    }
    Converted {
        produced: n * 4,
        consumed: n,
    }
}
