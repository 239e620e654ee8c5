//! Settings codec: named configuration fields over a [`MemoryImage`].
//!
//! Every field lives at a fixed byte offset. Three encodings exist:
//! - raw bytes, read and written as-is;
//! - flags, `true` only when the byte is exactly 1 and written as 0 or 1;
//! - the motor KV rating, stored as `(kv - 20) / 40` and truncated.
//!
//! Encoding only touches the bytes named in the [`OffsetMap`]; everything
//! else in the image is carried over untouched.

use std::borrow::Cow;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{ProtocolError, ProtocolResult};
use crate::image::MemoryImage;

pub const KV_BASE: u16 = 20;
pub const KV_STEP: u16 = 40;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Field {
    Power,
    Range,
    StopPower,
    Timing,
    Beep,
    Ramp,
    Kv,
    Poles,
    BrakeOnStop,
    Reverse,
    CompensatedPwm,
    VariablePwm,
    StallProtection,
    AntiStuckProtection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Raw,
    Flag,
    Kv,
}

impl Field {
    pub const ALL: [Field; 14] = [
        Field::Power,
        Field::Range,
        Field::StopPower,
        Field::Timing,
        Field::Beep,
        Field::Ramp,
        Field::Kv,
        Field::Poles,
        Field::BrakeOnStop,
        Field::Reverse,
        Field::CompensatedPwm,
        Field::VariablePwm,
        Field::StallProtection,
        Field::AntiStuckProtection,
    ];

    /// Flags forced on in a synthesised image.
    pub const SAFETY_FLAGS: [Field; 3] = [
        Field::CompensatedPwm,
        Field::StallProtection,
        Field::AntiStuckProtection,
    ];

    pub fn encoding(self) -> Encoding {
        match self {
            Field::Kv => Encoding::Kv,
            Field::BrakeOnStop
            | Field::Reverse
            | Field::CompensatedPwm
            | Field::VariablePwm
            | Field::StallProtection
            | Field::AntiStuckProtection => Encoding::Flag,
            Field::Power
            | Field::Range
            | Field::StopPower
            | Field::Timing
            | Field::Beep
            | Field::Ramp
            | Field::Poles => Encoding::Raw,
        }
    }

    /// The kebab-case name used in settings files.
    pub fn name(self) -> &'static str {
        match self {
            Field::Power => "power",
            Field::Range => "range",
            Field::StopPower => "stop-power",
            Field::Timing => "timing",
            Field::Beep => "beep",
            Field::Ramp => "ramp",
            Field::Kv => "kv",
            Field::Poles => "poles",
            Field::BrakeOnStop => "brake-on-stop",
            Field::Reverse => "reverse",
            Field::CompensatedPwm => "compensated-pwm",
            Field::VariablePwm => "variable-pwm",
            Field::StallProtection => "stall-protection",
            Field::AntiStuckProtection => "anti-stuck-protection",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldOffset {
    pub field: Field,
    pub offset: usize,
}

const fn at(field: Field, offset: usize) -> FieldOffset {
    FieldOffset { field, offset }
}

// Ramp has no known backing byte on this device family.
const STANDARD_ENTRIES: [FieldOffset; 13] = [
    at(Field::Reverse, 17),
    at(Field::CompensatedPwm, 20),
    at(Field::VariablePwm, 21),
    at(Field::AntiStuckProtection, 22),
    at(Field::Timing, 23),
    at(Field::Power, 25),
    at(Field::Kv, 26),
    at(Field::Poles, 27),
    at(Field::BrakeOnStop, 28),
    at(Field::StallProtection, 29),
    at(Field::Beep, 30),
    at(Field::Range, 40),
    at(Field::StopPower, 41),
];

/// Field-to-offset table for one device family. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OffsetMap {
    entries: Cow<'static, [FieldOffset]>,
}

impl OffsetMap {
    pub fn standard() -> Self {
        Self {
            entries: Cow::Borrowed(&STANDARD_ENTRIES),
        }
    }

    /// Build a custom map. Each field and each offset may appear once.
    pub fn new(entries: Vec<FieldOffset>) -> ProtocolResult<Self> {
        for (i, entry) in entries.iter().enumerate() {
            for other in entries.iter().skip(i + 1) {
                if other.field == entry.field {
                    return Err(ProtocolError::InvalidConfig(format!(
                        "field {:?} mapped twice",
                        entry.field
                    )));
                }
                if other.offset == entry.offset {
                    return Err(ProtocolError::InvalidConfig(format!(
                        "offset {} shared by {:?} and {:?}",
                        entry.offset, entry.field, other.field
                    )));
                }
            }
        }
        Ok(Self {
            entries: Cow::Owned(entries),
        })
    }

    pub fn entries(&self) -> &[FieldOffset] {
        &self.entries
    }

    pub fn offset_of(&self, field: Field) -> Option<usize> {
        self.entries
            .iter()
            .find(|e| e.field == field)
            .map(|e| e.offset)
    }

    pub fn covers(&self, offset: usize) -> bool {
        self.entries.iter().any(|e| e.offset == offset)
    }

    /// Fail if any entry falls outside an image of `len` bytes.
    pub fn check_fits(&self, len: usize) -> ProtocolResult<()> {
        match self.entries.iter().find(|e| e.offset >= len) {
            Some(entry) => Err(ProtocolError::OffsetOutOfRange {
                offset: entry.offset,
                len,
            }),
            None => Ok(()),
        }
    }
}

impl Default for OffsetMap {
    fn default() -> Self {
        Self::standard()
    }
}

/// A decoded field value, used for comparisons and display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Number(u16),
    Flag(bool),
    Unset,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SettingsRecord {
    pub power: u8,
    pub range: u8,
    pub stop_power: u8,
    pub timing: u8,
    pub beep: u8,
    /// Not persisted on the standard map; carried by the application only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ramp: Option<u8>,
    pub kv: u16,
    pub poles: u8,
    pub brake_on_stop: bool,
    pub reverse: bool,
    pub compensated_pwm: bool,
    pub variable_pwm: bool,
    pub stall_protection: bool,
    pub anti_stuck_protection: bool,
}

impl Default for SettingsRecord {
    /// What an all-zero image decodes to.
    fn default() -> Self {
        Self {
            power: 0,
            range: 0,
            stop_power: 0,
            timing: 0,
            beep: 0,
            ramp: None,
            kv: KV_BASE,
            poles: 0,
            brake_on_stop: false,
            reverse: false,
            compensated_pwm: false,
            variable_pwm: false,
            stall_protection: false,
            anti_stuck_protection: false,
        }
    }
}

impl SettingsRecord {
    pub fn get(&self, field: Field) -> FieldValue {
        match field {
            Field::Power => FieldValue::Number(self.power.into()),
            Field::Range => FieldValue::Number(self.range.into()),
            Field::StopPower => FieldValue::Number(self.stop_power.into()),
            Field::Timing => FieldValue::Number(self.timing.into()),
            Field::Beep => FieldValue::Number(self.beep.into()),
            Field::Ramp => self
                .ramp
                .map_or(FieldValue::Unset, |r| FieldValue::Number(r.into())),
            Field::Kv => FieldValue::Number(self.kv),
            Field::Poles => FieldValue::Number(self.poles.into()),
            Field::BrakeOnStop => FieldValue::Flag(self.brake_on_stop),
            Field::Reverse => FieldValue::Flag(self.reverse),
            Field::CompensatedPwm => FieldValue::Flag(self.compensated_pwm),
            Field::VariablePwm => FieldValue::Flag(self.variable_pwm),
            Field::StallProtection => FieldValue::Flag(self.stall_protection),
            Field::AntiStuckProtection => FieldValue::Flag(self.anti_stuck_protection),
        }
    }

    /// Fields whose values differ between `self` and `other`.
    pub fn changed_fields(&self, other: &SettingsRecord) -> Vec<Field> {
        Field::ALL
            .into_iter()
            .filter(|&f| self.get(f) != other.get(f))
            .collect()
    }

    fn apply_byte(&mut self, field: Field, byte: u8) {
        let flag = byte == 1;
        match field {
            Field::Power => self.power = byte,
            Field::Range => self.range = byte,
            Field::StopPower => self.stop_power = byte,
            Field::Timing => self.timing = byte,
            Field::Beep => self.beep = byte,
            Field::Ramp => self.ramp = Some(byte),
            Field::Kv => self.kv = decode_kv(byte),
            Field::Poles => self.poles = byte,
            Field::BrakeOnStop => self.brake_on_stop = flag,
            Field::Reverse => self.reverse = flag,
            Field::CompensatedPwm => self.compensated_pwm = flag,
            Field::VariablePwm => self.variable_pwm = flag,
            Field::StallProtection => self.stall_protection = flag,
            Field::AntiStuckProtection => self.anti_stuck_protection = flag,
        }
    }

    /// The byte to store for `field`, or `None` when the record holds no
    /// value for it.
    fn byte_for(&self, field: Field) -> Option<u8> {
        match self.get(field) {
            FieldValue::Unset => None,
            FieldValue::Flag(on) => Some(u8::from(on)),
            FieldValue::Number(_) if field == Field::Kv => Some(encode_kv(self.kv)),
            FieldValue::Number(n) => u8::try_from(n).ok(),
        }
    }
}

pub fn decode_kv(raw: u8) -> u16 {
    u16::from(raw) * KV_STEP + KV_BASE
}

/// Inverse of [`decode_kv`], truncating and saturating to a byte.
pub fn encode_kv(kv: u16) -> u8 {
    u8::try_from(kv.saturating_sub(KV_BASE) / KV_STEP).unwrap_or(u8::MAX)
}

pub fn decode_settings(image: &MemoryImage, map: &OffsetMap) -> ProtocolResult<SettingsRecord> {
    let mut record = SettingsRecord::default();
    for entry in map.entries() {
        record.apply_byte(entry.field, image.get(entry.offset)?);
    }
    Ok(record)
}

/// What a stored byte decodes to for `field`.
fn value_of_byte(field: Field, byte: u8) -> FieldValue {
    match field.encoding() {
        Encoding::Flag => FieldValue::Flag(byte == 1),
        Encoding::Kv => FieldValue::Number(decode_kv(byte)),
        Encoding::Raw => FieldValue::Number(byte.into()),
    }
}

/// Overlay `record` onto a copy of `image`.
///
/// Only fields whose value differs from what `image` already decodes to are
/// rewritten, so an unchanged field keeps its stored byte exactly.
pub fn encode_settings(
    image: &MemoryImage,
    record: &SettingsRecord,
    map: &OffsetMap,
) -> ProtocolResult<MemoryImage> {
    map.check_fits(image.len())?;
    let mut out = image.clone();
    for entry in map.entries() {
        let stored = image.get(entry.offset)?;
        if record.get(entry.field) == value_of_byte(entry.field, stored) {
            continue;
        }
        if let Some(byte) = record.byte_for(entry.field) {
            out.set(entry.offset, byte)?;
        }
    }
    Ok(out)
}

impl MemoryImage {
    /// Image used when nothing has been read from the device: all zeros
    /// except the protection flags, which are forced on.
    pub fn safe_default(map: &OffsetMap, region_length: usize) -> ProtocolResult<Self> {
        map.check_fits(region_length)?;
        let mut image = MemoryImage::zeroed(region_length);
        for field in Field::SAFETY_FLAGS {
            if let Some(offset) = map.offset_of(field) {
                image.set(offset, 1)?;
            }
        }
        Ok(image)
    }
}
