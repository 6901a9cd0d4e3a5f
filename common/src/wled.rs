use serde::{Deserialize, Serialize};

// Transition times are in milliseconds
pub const SET_TRANSITION_MS: u32 = 250;
pub const REVERT_TRANSITION_MS: u32 = 500;

/// The preset every timed command falls back to
pub const DEFAULT_PRESET: i64 = 1;

/// An RGB triple as WLED expects it. Values are not clamped, the firmware
/// does that itself.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Color {
    pub r: i64,
    pub g: i64,
    pub b: i64,
}

impl Color {
    pub const BLACK: Color = Color::new(0, 0, 0);

    pub const fn new(r: i64, g: i64, b: i64) -> Self {
        Self { r, g, b }
    }

    pub fn as_array(&self) -> [i64; 3] {
        [self.r, self.g, self.b]
    }
}

impl core::fmt::Display for Color {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "RGB({},{},{})", self.r, self.g, self.b)
    }
}

/// A preset slot, either numeric or whatever the caller handed us.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PresetId {
    Number(i64),
    Name(String),
}

impl From<&str> for PresetId {
    /// Only text that reads back identically becomes a number, so `"03"` or
    /// `" 3"` reach the device as written.
    fn from(value: &str) -> Self {
        match value.parse::<i64>() {
            Ok(number) if number.to_string() == value => PresetId::Number(number),
            _ => PresetId::Name(value.to_string()),
        }
    }
}

impl core::fmt::Display for PresetId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            PresetId::Number(number) => write!(f, "{}", number),
            PresetId::Name(name) => write!(f, "{}", name),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    pub col: Vec<[i64; 3]>,
}

/// `{"on":true,"seg":[{"col":[...]}],"tt":250}`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColorState {
    pub on: bool,
    pub seg: Vec<Segment>,
    pub tt: u32,
}

/// `{"on":true,"ps":3,"tt":250}`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresetState {
    pub on: bool,
    pub ps: PresetId,
    pub tt: u32,
}

/// A command as it goes over the wire to the WLED controller
#[derive(Clone, Debug, Serialize)]
#[serde(untagged)]
pub enum WledCommand {
    Color(ColorState),
    Preset(PresetState),
    /// Caller supplied JSON, forwarded untouched. Key order and number text
    /// matter to WLED, so this is kept as text rather than a parsed value.
    #[cfg(feature = "std")]
    Raw(Box<serde_json::value::RawValue>),
}

impl PartialEq for WledCommand {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (WledCommand::Color(a), WledCommand::Color(b)) => a == b,
            (WledCommand::Preset(a), WledCommand::Preset(b)) => a == b,
            #[cfg(feature = "std")]
            (WledCommand::Raw(a), WledCommand::Raw(b)) => a.get() == b.get(),
            _ => false,
        }
    }
}

impl WledCommand {
    /// True for the command that puts the strip back on the default preset
    pub fn is_revert(&self) -> bool {
        matches!(
            self,
            WledCommand::Preset(PresetState {
                ps: PresetId::Number(DEFAULT_PRESET),
                tt: REVERT_TRANSITION_MS,
                ..
            })
        )
    }

    /// Serialize into a single newline terminated JSON line
    #[cfg(feature = "std")]
    pub fn to_line(&self) -> Result<String, serde_json::Error> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}
