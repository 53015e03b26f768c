// ============================================================================
// src/codec/verb.rs - Codec Verbs and Parameters
// ============================================================================
//!
//! コーデックコマンドの符号化とレスポンスの解釈。
//!
//! コマンドワード: `[CAd:4][NID:8][Verb:20]`
//! 12 ビット verb は下位 8 ビットがペイロード、4 ビット verb（フォーマット設定、
//! アンプ設定）は下位 16 ビットがペイロード。定数は verb をペイロード込みの
//! 20 ビットフィールドとして表し、ペイロードを OR して使う。

/// Node identifier inside a codec
pub type NodeId = u8;

/// Root node of every codec
pub const ROOT_NODE: NodeId = 0;

// ============================================================================
// Verbs (20-bit field, payload ORed in)
// ============================================================================

pub const VERB_GET_PARAM: u32 = 0xF0000;
pub const VERB_SET_CONN_SEL: u32 = 0x70100;
pub const VERB_GET_CONN_LIST: u32 = 0xF0200;
pub const VERB_SET_POWER: u32 = 0x70500;
pub const VERB_SET_CONV_STREAM: u32 = 0x70600;
pub const VERB_GET_PIN_CTL: u32 = 0xF0700;
pub const VERB_SET_PIN_CTL: u32 = 0x70700;
pub const VERB_SET_EAPD: u32 = 0x70C00;
pub const VERB_GET_DIG_CVT: u32 = 0xF0D00;
pub const VERB_SET_DIG_CVT_1: u32 = 0x70D00;
pub const VERB_SET_CONV_CHAN_COUNT: u32 = 0x72D00;

/// Set Converter Format (4-bit verb, 16-bit payload)
pub const VERB_SET_CONV_FMT: u32 = 0x20000;
/// Set Amplifier Gain/Mute (4-bit verb, 16-bit payload)
pub const VERB_SET_AMP_GAIN: u32 = 0x30000;

// ============================================================================
// Parameters (GET_PARAM payload)
// ============================================================================

pub const PARAM_VENDOR_ID: u8 = 0x00;
pub const PARAM_REVISION_ID: u8 = 0x02;
pub const PARAM_SUB_NODE_COUNT: u8 = 0x04;
pub const PARAM_FUNC_GROUP_TYPE: u8 = 0x05;
pub const PARAM_WIDGET_CAPS: u8 = 0x09;
pub const PARAM_PCM_CAPS: u8 = 0x0A;
pub const PARAM_PIN_CAPS: u8 = 0x0C;
pub const PARAM_IN_AMP_CAPS: u8 = 0x0D;
pub const PARAM_CONN_LIST_LEN: u8 = 0x0E;
pub const PARAM_OUT_AMP_CAPS: u8 = 0x12;

/// Function group type: audio
pub const FUNC_GROUP_AUDIO: u32 = 0x01;

/// Power state D0
pub const POWER_STATE_D0: u32 = 0x00;

// Pin widget control
pub const PIN_CTL_IN_EN: u32 = 1 << 5;
pub const PIN_CTL_OUT_EN: u32 = 1 << 6;
pub const PIN_CTL_HP_EN: u32 = 1 << 7;

/// EAPD bit of the EAPD/BTL enable payload
pub const EAPD_ENABLE: u32 = 1 << 1;

/// Digital converter control: DigEn
pub const DIG_CVT_DIGEN: u32 = 1 << 0;

// Amplifier gain/mute payload
pub const AMP_SET_OUTPUT: u32 = 1 << 15;
pub const AMP_SET_INPUT: u32 = 1 << 14;
pub const AMP_SET_LEFT: u32 = 1 << 13;
pub const AMP_SET_RIGHT: u32 = 1 << 12;
pub const AMP_MUTE: u32 = 1 << 7;
pub const AMP_GAIN_MASK: u32 = 0x7F;

/// Connection list length: long form flag
pub const CONN_LIST_LONG_FORM: u32 = 1 << 7;
/// Connection list length: entry count
pub const CONN_LIST_LEN_MASK: u32 = 0x7F;

// ============================================================================
// Command word
// ============================================================================

/// Build a CORB command entry
/// Format: [Codec Address (4)] [Node ID (8)] [Verb (20)]
#[inline]
pub fn make_command(codec_addr: u8, node_id: NodeId, verb: u32) -> u32 {
    ((codec_addr as u32 & 0x0F) << 28) | ((node_id as u32) << 20) | (verb & 0xFFFFF)
}

/// GET_PARAM command for `param`
#[inline]
pub fn get_param(codec_addr: u8, node_id: NodeId, param: u8) -> u32 {
    make_command(codec_addr, node_id, VERB_GET_PARAM | param as u32)
}

/// Fields of a command word
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Command {
    pub codec_addr: u8,
    pub node_id: NodeId,
    /// 20-bit verb field including payload
    pub verb: u32,
}

impl Command {
    pub fn decode(word: u32) -> Self {
        Self {
            codec_addr: (word >> 28) as u8,
            node_id: (word >> 20) as u8,
            verb: word & 0xFFFFF,
        }
    }

    /// 12-bit verb id, or the 4-bit id shifted into the same position
    pub fn verb_id(&self) -> u32 {
        match self.verb >> 16 {
            0x2 | 0x3 | 0xA | 0xB => self.verb & 0xF0000,
            _ => self.verb & 0xFFF00,
        }
    }

    pub fn payload(&self) -> u32 {
        self.verb & !self.verb_id()
    }
}

// ============================================================================
// RIRB Entry
// ============================================================================

/// RIRB Response Entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct RirbEntry {
    /// Response data
    pub response: u32,
    /// Response extended (codec address, unsolicited flag)
    pub response_ex: u32,
}

/// Unsolicited flag in `response_ex`
pub const RIRB_EX_UNSOL: u32 = 1 << 4;

impl RirbEntry {
    /// Get codec address from response
    pub fn codec_addr(&self) -> u8 {
        (self.response_ex & 0x0F) as u8
    }

    /// Check if this is an unsolicited response
    pub fn is_unsolicited(&self) -> bool {
        (self.response_ex & RIRB_EX_UNSOL) != 0
    }
}

// ============================================================================
// Response field helpers
// ============================================================================

/// SUB_NODE_COUNT response: (first node, count)
#[inline]
pub fn sub_nodes(response: u32) -> (NodeId, u8) {
    (((response >> 16) & 0xFF) as u8, (response & 0xFF) as u8)
}

/// OUTPUT_AMP_CAPS response: number of gain steps (max gain code)
#[inline]
pub fn amp_num_steps(response: u32) -> u32 {
    (response >> 8) & 0x7F
}
