//! Generic OnOff messages.

use std::any::Any;

use crate::access::message::{MeshMessage, MessageKind, StaticMessage};

pub const GENERIC_ON_OFF_GET: u32 = 0x8201;
pub const GENERIC_ON_OFF_SET: u32 = 0x8202;
pub const GENERIC_ON_OFF_SET_UNACKNOWLEDGED: u32 = 0x8203;
pub const GENERIC_ON_OFF_STATUS: u32 = 0x8204;

/// Generic Default Transition Time format: 6-bit steps, 2-bit resolution.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TransitionTime(u8);

impl TransitionTime {
    /// Steps value reserved for "unknown".
    const UNKNOWN_STEPS: u8 = 0x3F;

    pub fn new(steps: u8, resolution: u8) -> Self {
        Self((resolution & 0x03) << 6 | (steps & 0x3F))
    }

    /// Smallest resolution that can express `ms`, rounded up to whole steps.
    pub fn from_ms(ms: u64) -> Self {
        for (resolution, unit) in [(0u8, 100u64), (1, 1_000), (2, 10_000), (3, 600_000)] {
            let steps = ms.div_ceil(unit);
            if steps < u64::from(Self::UNKNOWN_STEPS) {
                return Self::new(steps as u8, resolution);
            }
        }
        Self::new(Self::UNKNOWN_STEPS - 1, 3)
    }

    pub fn from_raw(raw: u8) -> Self {
        Self(raw)
    }

    pub fn raw(&self) -> u8 {
        self.0
    }

    pub fn steps(&self) -> u8 {
        self.0 & 0x3F
    }

    pub fn is_known(&self) -> bool {
        self.steps() != Self::UNKNOWN_STEPS
    }

    /// Duration in milliseconds, `None` when unknown.
    pub fn as_ms(&self) -> Option<u64> {
        if !self.is_known() {
            return None;
        }
        let unit = match self.0 >> 6 {
            0 => 100,
            1 => 1_000,
            2 => 10_000,
            _ => 600_000,
        };
        Some(u64::from(self.steps()) * unit)
    }
}

/// Transition requested by a Set message.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Transition {
    /// The server's default transition applies.
    #[default]
    Default,
    /// Explicit transition, starting after `delay` × 5 ms.
    Timed { time: TransitionTime, delay: u8 },
}

impl Transition {
    fn encode(&self, out: &mut Vec<u8>) {
        if let Transition::Timed { time, delay } = self {
            out.push(time.raw());
            out.push(*delay);
        }
    }

    fn decode(data: &[u8]) -> Option<Self> {
        match data {
            [] => Some(Transition::Default),
            [time, delay] => Some(Transition::Timed {
                time: TransitionTime::from_raw(*time),
                delay: *delay,
            }),
            _ => None,
        }
    }
}

fn decode_on_off(byte: u8) -> Option<bool> {
    match byte {
        0 => Some(false),
        1 => Some(true),
        _ => None,
    }
}

// ============================================================================
// Get
// ============================================================================

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GenericOnOffGet;

impl MeshMessage for GenericOnOffGet {
    fn opcode(&self) -> u32 {
        GENERIC_ON_OFF_GET
    }

    fn parameters(&self) -> Vec<u8> {
        Vec::new()
    }

    fn kind(&self) -> MessageKind {
        MessageKind::Acknowledged {
            response_opcode: GENERIC_ON_OFF_STATUS,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl StaticMessage for GenericOnOffGet {
    const OPCODE: u32 = GENERIC_ON_OFF_GET;

    fn decode(parameters: &[u8]) -> Option<Self> {
        parameters.is_empty().then_some(GenericOnOffGet)
    }
}

// ============================================================================
// Set
// ============================================================================

/// Generic OnOff Set and Set Unacknowledged share this layout:
/// `[OnOff][TID]` optionally followed by `[TransitionTime][Delay]`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OnOffSetParameters {
    pub on: bool,
    /// Assigned by the Access Layer when `None`.
    pub tid: Option<u8>,
    pub transition: Transition,
    pub continue_transaction: bool,
}

impl OnOffSetParameters {
    pub fn new(on: bool) -> Self {
        Self {
            on,
            tid: None,
            transition: Transition::Default,
            continue_transaction: false,
        }
    }

    fn encode(&self) -> Vec<u8> {
        let mut out = vec![u8::from(self.on), self.tid.unwrap_or(0)];
        self.transition.encode(&mut out);
        out
    }

    fn decode(parameters: &[u8]) -> Option<Self> {
        if parameters.len() != 2 && parameters.len() != 4 {
            return None;
        }
        Some(Self {
            on: decode_on_off(parameters[0])?,
            tid: Some(parameters[1]),
            transition: Transition::decode(&parameters[2..])?,
            continue_transaction: false,
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GenericOnOffSet(pub OnOffSetParameters);

impl GenericOnOffSet {
    pub fn new(on: bool) -> Self {
        Self(OnOffSetParameters::new(on))
    }

    pub fn with_transition(mut self, transition: Transition) -> Self {
        self.0.transition = transition;
        self
    }

    pub fn continuing(mut self) -> Self {
        self.0.continue_transaction = true;
        self
    }
}

impl MeshMessage for GenericOnOffSet {
    fn opcode(&self) -> u32 {
        GENERIC_ON_OFF_SET
    }

    fn parameters(&self) -> Vec<u8> {
        self.0.encode()
    }

    fn kind(&self) -> MessageKind {
        MessageKind::Acknowledged {
            response_opcode: GENERIC_ON_OFF_STATUS,
        }
    }

    fn tid_mut(&mut self) -> Option<&mut Option<u8>> {
        Some(&mut self.0.tid)
    }

    fn continues_transaction(&self) -> bool {
        self.0.continue_transaction
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl StaticMessage for GenericOnOffSet {
    const OPCODE: u32 = GENERIC_ON_OFF_SET;

    fn decode(parameters: &[u8]) -> Option<Self> {
        OnOffSetParameters::decode(parameters).map(Self)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GenericOnOffSetUnacknowledged(pub OnOffSetParameters);

impl GenericOnOffSetUnacknowledged {
    pub fn new(on: bool) -> Self {
        Self(OnOffSetParameters::new(on))
    }

    pub fn continuing(mut self) -> Self {
        self.0.continue_transaction = true;
        self
    }
}

impl MeshMessage for GenericOnOffSetUnacknowledged {
    fn opcode(&self) -> u32 {
        GENERIC_ON_OFF_SET_UNACKNOWLEDGED
    }

    fn parameters(&self) -> Vec<u8> {
        self.0.encode()
    }

    fn kind(&self) -> MessageKind {
        MessageKind::Unacknowledged
    }

    fn tid_mut(&mut self) -> Option<&mut Option<u8>> {
        Some(&mut self.0.tid)
    }

    fn continues_transaction(&self) -> bool {
        self.0.continue_transaction
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl StaticMessage for GenericOnOffSetUnacknowledged {
    const OPCODE: u32 = GENERIC_ON_OFF_SET_UNACKNOWLEDGED;

    fn decode(parameters: &[u8]) -> Option<Self> {
        OnOffSetParameters::decode(parameters).map(Self)
    }
}

// ============================================================================
// Status
// ============================================================================

/// Progress of an OnOff transition reported in a Status.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OnOffTransition {
    #[default]
    Idle,
    InProgress { target: bool, remaining: TransitionTime },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GenericOnOffStatus {
    pub present: bool,
    pub transition: OnOffTransition,
}

impl GenericOnOffStatus {
    pub fn new(present: bool) -> Self {
        Self {
            present,
            transition: OnOffTransition::Idle,
        }
    }
}

impl MeshMessage for GenericOnOffStatus {
    fn opcode(&self) -> u32 {
        GENERIC_ON_OFF_STATUS
    }

    fn parameters(&self) -> Vec<u8> {
        let mut out = vec![u8::from(self.present)];
        if let OnOffTransition::InProgress { target, remaining } = self.transition {
            out.push(u8::from(target));
            out.push(remaining.raw());
        }
        out
    }

    fn kind(&self) -> MessageKind {
        MessageKind::Response
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl StaticMessage for GenericOnOffStatus {
    const OPCODE: u32 = GENERIC_ON_OFF_STATUS;

    fn decode(parameters: &[u8]) -> Option<Self> {
        match parameters {
            [present] => Some(Self::new(decode_on_off(*present)?)),
            [present, target, remaining] => Some(Self {
                present: decode_on_off(*present)?,
                transition: OnOffTransition::InProgress {
                    target: decode_on_off(*target)?,
                    remaining: TransitionTime::from_raw(*remaining),
                },
            }),
            _ => None,
        }
    }
}
