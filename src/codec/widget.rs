// ============================================================================
// src/codec/widget.rs - Codec, Function Group and Widget Model
// ============================================================================
//!
//! コーデックのノードツリーをメモリ上に表現する型。
//!
//! ウィジェットはファンクショングループ内の配列に格納され、
//! ノード ID からインデックスで引く（アリーナ方式）。

use alloc::vec::Vec;

use bitflags::bitflags;

use super::verb::NodeId;

/// Connection list entries kept per widget
pub const MAX_CONNECTIONS: usize = 16;

// ============================================================================
// Widget type
// ============================================================================

/// Audio widget type (capability bits 20-23)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WidgetType {
    AudioOutput,
    AudioInput,
    Mixer,
    Selector,
    PinComplex,
    Power,
    VolumeKnob,
    BeepGenerator,
    VendorDefined,
    Unknown(u8),
}

pub const WIDGET_TYPE_AUDIO_OUTPUT: u8 = 0x0;
pub const WIDGET_TYPE_AUDIO_INPUT: u8 = 0x1;
pub const WIDGET_TYPE_MIXER: u8 = 0x2;
pub const WIDGET_TYPE_SELECTOR: u8 = 0x3;
pub const WIDGET_TYPE_PIN_COMPLEX: u8 = 0x4;
pub const WIDGET_TYPE_POWER: u8 = 0x5;
pub const WIDGET_TYPE_VOLUME_KNOB: u8 = 0x6;
pub const WIDGET_TYPE_BEEP_GEN: u8 = 0x7;
pub const WIDGET_TYPE_VENDOR: u8 = 0xF;

pub const WIDGET_TYPE_SHIFT: u32 = 20;

impl From<u8> for WidgetType {
    fn from(v: u8) -> Self {
        match v {
            WIDGET_TYPE_AUDIO_OUTPUT => WidgetType::AudioOutput,
            WIDGET_TYPE_AUDIO_INPUT => WidgetType::AudioInput,
            WIDGET_TYPE_MIXER => WidgetType::Mixer,
            WIDGET_TYPE_SELECTOR => WidgetType::Selector,
            WIDGET_TYPE_PIN_COMPLEX => WidgetType::PinComplex,
            WIDGET_TYPE_POWER => WidgetType::Power,
            WIDGET_TYPE_VOLUME_KNOB => WidgetType::VolumeKnob,
            WIDGET_TYPE_BEEP_GEN => WidgetType::BeepGenerator,
            WIDGET_TYPE_VENDOR => WidgetType::VendorDefined,
            _ => WidgetType::Unknown(v),
        }
    }
}

impl WidgetType {
    /// Type from a raw AUDIO_WIDGET_CAPS response
    pub fn from_caps(raw: u32) -> Self {
        Self::from(((raw >> WIDGET_TYPE_SHIFT) & 0x0F) as u8)
    }

    pub fn name(&self) -> &'static str {
        match self {
            WidgetType::AudioOutput => "Audio Output",
            WidgetType::AudioInput => "Audio Input",
            WidgetType::Mixer => "Audio Mixer",
            WidgetType::Selector => "Audio Selector",
            WidgetType::PinComplex => "Pin Complex",
            WidgetType::Power => "Power",
            WidgetType::VolumeKnob => "Volume Knob",
            WidgetType::BeepGenerator => "Beep Generator",
            WidgetType::VendorDefined => "Vendor Defined",
            WidgetType::Unknown(_) => "Unknown",
        }
    }
}

// ============================================================================
// Capability flags
// ============================================================================

bitflags! {
    /// Audio widget capability flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct WidgetCaps: u32 {
        const STEREO = 1 << 0;
        const IN_AMP = 1 << 1;
        const OUT_AMP = 1 << 2;
        const AMP_OVERRIDE = 1 << 3;
        const FORMAT_OVERRIDE = 1 << 4;
        const STRIPE = 1 << 5;
        const PROCESSING = 1 << 6;
        const UNSOL = 1 << 7;
        const CONN_LIST = 1 << 8;
        const DIGITAL = 1 << 9;
        const POWER_CTL = 1 << 10;
        const LR_SWAP = 1 << 11;
    }
}

bitflags! {
    /// Pin capability flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PinCaps: u32 {
        const IMPEDANCE_SENSE = 1 << 0;
        const TRIGGER_REQUIRED = 1 << 1;
        const PRESENCE_DETECT = 1 << 2;
        const HEADPHONE_DRIVE = 1 << 3;
        const OUTPUT = 1 << 4;
        const INPUT = 1 << 5;
        const BALANCED = 1 << 6;
        const HDMI = 1 << 7;
        const EAPD = 1 << 16;
        const DISPLAY_PORT = 1 << 24;
        const HBR = 1 << 27;
    }
}

// ============================================================================
// Widget
// ============================================================================

/// One widget node inside an audio function group
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Widget {
    pub nid: NodeId,
    pub widget_type: WidgetType,
    /// Raw AUDIO_WIDGET_CAPS response
    pub raw_caps: u32,
    pub caps: WidgetCaps,
    pub pin_caps: PinCaps,
    /// Candidate inputs, in list order
    pub connections: Vec<u16>,
    /// Next hop toward an Audio Output, once routed
    pub out_path: Option<NodeId>,
    /// Stream tag of a routed Audio Output
    pub stream_tag: Option<u8>,
}

impl Widget {
    pub fn new(nid: NodeId, raw_caps: u32) -> Self {
        Self {
            nid,
            widget_type: WidgetType::from_caps(raw_caps),
            raw_caps,
            caps: WidgetCaps::from_bits_truncate(raw_caps),
            pin_caps: PinCaps::empty(),
            connections: Vec::new(),
            out_path: None,
            stream_tag: None,
        }
    }

    /// Pin Complex able to drive an output
    pub fn is_output_pin(&self) -> bool {
        self.widget_type == WidgetType::PinComplex && self.pin_caps.contains(PinCaps::OUTPUT)
    }

    pub fn has_out_amp(&self) -> bool {
        self.caps.contains(WidgetCaps::OUT_AMP)
    }

    pub fn is_digital(&self) -> bool {
        self.caps.contains(WidgetCaps::DIGITAL)
    }
}

// ============================================================================
// Function group / codec
// ============================================================================

/// Audio function group with its contiguous widget range
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionGroup {
    pub nid: NodeId,
    pub widget_start: NodeId,
    /// Widgets in node id order; `widgets[i].nid == widget_start + i`
    pub widgets: Vec<Widget>,
}

impl FunctionGroup {
    pub fn new(nid: NodeId, widget_start: NodeId) -> Self {
        Self {
            nid,
            widget_start,
            widgets: Vec::new(),
        }
    }

    /// Arena index of `nid`, if it is inside this group's range
    pub fn index_of(&self, nid: u16) -> Option<usize> {
        let start = self.widget_start as u16;
        if nid >= start && ((nid - start) as usize) < self.widgets.len() {
            Some((nid - start) as usize)
        } else {
            None
        }
    }

    pub fn contains(&self, nid: u16) -> bool {
        self.index_of(nid).is_some()
    }

    pub fn widget(&self, nid: NodeId) -> Option<&Widget> {
        self.index_of(nid as u16).map(|i| &self.widgets[i])
    }

    pub fn widget_mut(&mut self, nid: NodeId) -> Option<&mut Widget> {
        self.index_of(nid as u16).map(move |i| &mut self.widgets[i])
    }

    /// Audio Output widgets carrying `tag`
    pub fn converters_for(&self, tag: u8) -> impl Iterator<Item = &Widget> {
        self.widgets
            .iter()
            .filter(move |w| w.widget_type == WidgetType::AudioOutput && w.stream_tag == Some(tag))
    }
}

/// A codec on the HDA link
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Codec {
    /// Link address (0-15)
    pub address: u8,
    /// Vendor (high 16 bits) / device (low 16 bits)
    pub vendor_id: u32,
    /// First audio function group, if any
    pub afg: Option<FunctionGroup>,
}

impl Codec {
    pub fn vendor(&self) -> u16 {
        (self.vendor_id >> 16) as u16
    }

    pub fn device(&self) -> u16 {
        self.vendor_id as u16
    }
}
