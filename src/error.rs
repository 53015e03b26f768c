// ============================================================================
// src/error.rs - HDA Error Types
// ============================================================================
//!
//! HDA ドライバコアの統一エラー型。
//!
//! 各バリアントは [`ErrorKind`] に分類され、呼び出し側は種類単位で
//! 致命的かどうかを判断できる。自動リトライは一切行わない。

use core::fmt;

use crate::stream::PcmFormat;

/// Result alias used across the driver core
pub type HdaResult<T> = Result<T, HdaError>;

/// ハードウェア障害の発生源
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// コントローラ全体の障害（INTSTS.CIS）。回復不能
    Controller,
    /// ストリームの FIFO エラー
    Fifo { stream: u8 },
    /// ストリームのディスクリプタエラー
    Descriptor { stream: u8 },
}

/// HDA Driver Error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HdaError {
    /// CORB was not consumed, or a response did not arrive, in time
    CommandTimeout,
    /// A solicited response arrived after the batch was complete
    ExcessResponse,
    /// CORB read pointer did not match the write pointer before a batch
    RingNotIdle,
    /// Batch larger than the command ring can hold
    BatchTooLarge { requested: usize, capacity: usize },
    /// Sample rate outside the fixed rate table
    UnsupportedRate(u32),
    /// Bit depth other than 8/16/20/24/32
    UnsupportedBitDepth(u8),
    /// Channel count outside the hardware range
    UnsupportedChannels(u8),
    /// No converter exists for this format pair
    UnimplementedConversion { from: PcmFormat, to: PcmFormat },
    /// DMA memory or queue capacity exhausted
    ResourceExhausted,
    /// Hardware reported an error status
    HardwareFault(Fault),
    /// Controller did not enter or leave reset
    ResetTimeout,
    /// No codec answered on the link
    NoCodec,
    /// Operation not valid in the current state
    InvalidState(&'static str),
}

/// エラーの分類
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    CommandTimeout,
    ProtocolViolation,
    UnsupportedFormat,
    UnimplementedConversion,
    ResourceExhausted,
    HardwareFault,
    InvalidState,
}

impl HdaError {
    /// このエラーの分類を返す
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::CommandTimeout | Self::ResetTimeout => ErrorKind::CommandTimeout,
            Self::ExcessResponse | Self::RingNotIdle | Self::BatchTooLarge { .. } => {
                ErrorKind::ProtocolViolation
            }
            Self::UnsupportedRate(_)
            | Self::UnsupportedBitDepth(_)
            | Self::UnsupportedChannels(_) => ErrorKind::UnsupportedFormat,
            Self::UnimplementedConversion { .. } => ErrorKind::UnimplementedConversion,
            Self::ResourceExhausted => ErrorKind::ResourceExhausted,
            Self::HardwareFault(_) | Self::NoCodec => ErrorKind::HardwareFault,
            Self::InvalidState(_) => ErrorKind::InvalidState,
        }
    }

    /// 初期化やストリーム操作を継続できないエラーか
    pub fn is_fatal(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::CommandTimeout | ErrorKind::ProtocolViolation
        ) || matches!(self, Self::HardwareFault(Fault::Controller))
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Controller => write!(f, "controller error"),
            Self::Fifo { stream } => write!(f, "FIFO error on stream {}", stream),
            Self::Descriptor { stream } => write!(f, "descriptor error on stream {}", stream),
        }
    }
}

impl fmt::Display for HdaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CommandTimeout => write!(f, "command ring timed out"),
            Self::ExcessResponse => write!(f, "excess solicited response in RIRB"),
            Self::RingNotIdle => write!(f, "CORB not drained before new batch"),
            Self::BatchTooLarge {
                requested,
                capacity,
            } => write!(
                f,
                "command batch of {} exceeds ring capacity {}",
                requested, capacity
            ),
            Self::UnsupportedRate(rate) => write!(f, "unsupported sample rate {} Hz", rate),
            Self::UnsupportedBitDepth(bits) => write!(f, "unsupported bit depth {}", bits),
            Self::UnsupportedChannels(ch) => write!(f, "unsupported channel count {}", ch),
            Self::UnimplementedConversion { from, to } => {
                write!(f, "no converter from {} to {}", from, to)
            }
            Self::ResourceExhausted => write!(f, "resources exhausted"),
            Self::HardwareFault(fault) => write!(f, "hardware fault: {}", fault),
            Self::ResetTimeout => write!(f, "controller reset timed out"),
            Self::NoCodec => write!(f, "no codec present"),
            Self::InvalidState(what) => write!(f, "invalid state: {}", what),
        }
    }
}
