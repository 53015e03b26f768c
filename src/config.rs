// ============================================================================
// src/config.rs - Controller Configuration and Hardware Quirks
// ============================================================================
//!
//! コントローラ設定とハードウェア固有のクセ (quirk)。
//!
//! クセはすべて実機/エミュレータで経験的に必要だと分かっている挙動で、
//! ホストが検出したハードウェアに応じて上書きできる。

use bitflags::bitflags;

use crate::transport::COMMAND_TIMEOUT_US;

/// Bytes refilled per buffer-completion interrupt
pub const STREAM_CHUNK_SIZE: usize = 4096;
/// Buffer descriptor list length
pub const BDL_ENTRIES: usize = 64;
/// Stream tag assigned to the output converter
pub const OUTPUT_STREAM_TAG: u8 = 1;
/// Controller and stream reset bound
pub const RESET_TIMEOUT_US: u64 = 1_000_000;
/// Codecs need 521 us after CRST to request a state change
pub const CODEC_WAKE_DELAY_US: u64 = 521;
/// Submitted blocks not yet handed back to the client
pub const MAX_PENDING_BLOCKS: usize = 64;

bitflags! {
    /// Device-specific behavior switches
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Quirks: u32 {
        /// Never open fewer than two channels
        const FORCE_STEREO = 1 << 0;
        /// Enable EAPD on every pin that advertises it
        const EAPD_ENABLE = 1 << 1;
        /// Set DigEn on digital output converters
        const DIGITAL_OUT_ENABLE = 1 << 2;
        /// Program RINTCNT to 255 instead of 1
        const RINTCNT_MAX = 1 << 3;
        /// Device path takes 16-bit samples only; 8-bit requests are widened
        const WIDEN_8BIT = 1 << 4;
    }
}

impl Default for Quirks {
    fn default() -> Self {
        Self::FORCE_STEREO | Self::EAPD_ENABLE | Self::DIGITAL_OUT_ENABLE | Self::RINTCNT_MAX
    }
}

impl Quirks {
    /// RINTCNT value to program
    pub fn rintcnt(&self) -> u16 {
        if self.contains(Self::RINTCNT_MAX) { 255 } else { 1 }
    }
}

/// Controller configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerConfig {
    pub chunk_size: usize,
    pub bdl_entries: usize,
    pub output_stream_tag: u8,
    pub command_timeout_us: u64,
    pub reset_timeout_us: u64,
    pub max_pending_blocks: usize,
    pub quirks: Quirks,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            chunk_size: STREAM_CHUNK_SIZE,
            bdl_entries: BDL_ENTRIES,
            output_stream_tag: OUTPUT_STREAM_TAG,
            command_timeout_us: COMMAND_TIMEOUT_US,
            reset_timeout_us: RESET_TIMEOUT_US,
            max_pending_blocks: MAX_PENDING_BLOCKS,
            quirks: Quirks::default(),
        }
    }
}

impl ControllerConfig {
    /// Total cyclic buffer length in bytes
    pub fn buffer_size(&self) -> usize {
        self.chunk_size * self.bdl_entries
    }

    pub fn with_quirks(mut self, quirks: Quirks) -> Self {
        self.quirks = quirks;
        self
    }
}
