use common::Color;
use log::debug;

use crate::error::BridgeError;

pub const MISSING_COLOR: &str = "Missing color parameters";

/// Named colors the `/color/:name` endpoint understands. Names are matched
/// lower-cased.
pub const COLOR_TABLE: &[(&str, Color)] = &[
    ("red", Color::new(255, 0, 0)),
    ("green", Color::new(0, 255, 0)),
    ("blue", Color::new(0, 0, 255)),
    ("white", Color::new(255, 255, 255)),
    ("warmwhite", Color::new(255, 180, 100)),
    ("yellow", Color::new(255, 255, 0)),
    ("orange", Color::new(255, 165, 0)),
    ("purple", Color::new(128, 0, 128)),
    ("pink", Color::new(255, 105, 180)),
    ("cyan", Color::new(0, 255, 255)),
    ("magenta", Color::new(255, 0, 255)),
    ("off", Color::new(0, 0, 0)),
];

pub fn lookup(name: &str) -> Option<Color> {
    let name = name.trim().to_lowercase();
    COLOR_TABLE
        .iter()
        .find(|(entry, _)| *entry == name)
        .map(|(_, color)| *color)
}

/// The loose inputs a color request can carry: a name from the path or the
/// `color` query, and/or raw `r`, `g`, `b` query values.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ColorRequest {
    pub name: Option<String>,
    pub r: Option<String>,
    pub g: Option<String>,
    pub b: Option<String>,
}

impl ColorRequest {
    /// A known name wins. Otherwise all three channels have to be present and
    /// parse as integers.
    pub fn resolve(&self) -> Result<Color, BridgeError> {
        if let Some(color) = self.name.as_deref().and_then(lookup) {
            return Ok(color);
        }

        if let Some(name) = &self.name {
            debug!("Unknown color name '{}', falling back to RGB", name);
        }

        let channel = |value: &Option<String>| {
            value
                .as_deref()
                .and_then(|v| v.trim().parse::<i64>().ok())
                .ok_or(BridgeError::MissingParameters(MISSING_COLOR))
        };

        Ok(Color::new(
            channel(&self.r)?,
            channel(&self.g)?,
            channel(&self.b)?,
        ))
    }
}
