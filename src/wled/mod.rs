use std::time::Duration;

use common::{
    Color, ColorState, PresetId, PresetState, Segment, WledCommand, DEFAULT_PRESET,
    REVERT_TRANSITION_MS, SET_TRANSITION_MS,
};
use serde_json::{value::RawValue, Map, Value};

use crate::{error::BridgeError, uart::SessionStep};

pub const MISSING_JSON: &str = "Missing JSON body";
pub const MISSING_PRESET: &str = "Missing preset number";
pub const MISSING_PORT_OR_COLOR: &str = "Missing portPath or color";

/// Gap between the two writes of [`red_then_blue`]
pub const CHAIN_DELAY: Duration = Duration::from_secs(3);

/// Light the first segment with `color`. WLED wants three colour slots per
/// segment, the two trailing ones are left black.
pub fn color_command(color: Color) -> WledCommand {
    WledCommand::Color(ColorState {
        on: true,
        seg: vec![Segment {
            col: vec![
                color.as_array(),
                Color::BLACK.as_array(),
                Color::BLACK.as_array(),
            ],
        }],
        tt: SET_TRANSITION_MS,
    })
}

pub fn preset_command(preset: PresetId) -> WledCommand {
    WledCommand::Preset(PresetState {
        on: true,
        ps: preset,
        tt: SET_TRANSITION_MS,
    })
}

/// Back to the default preset, with a slower fade
pub fn revert_command() -> WledCommand {
    WledCommand::Preset(PresetState {
        on: true,
        ps: PresetId::Number(DEFAULT_PRESET),
        tt: REVERT_TRANSITION_MS,
    })
}

/// Wrap a request body as-is. Only an empty body, something that isn't a
/// JSON object, or an empty object is refused. The shape is otherwise the
/// caller's business.
pub fn raw_command(body: &[u8]) -> Result<WledCommand, BridgeError> {
    let missing = || BridgeError::MissingParameters(MISSING_JSON);

    // Checked as an object, but forwarded as the text the caller sent
    let object: Map<String, Value> = serde_json::from_slice(body).map_err(|_| missing())?;
    if object.is_empty() {
        return Err(missing());
    }

    let text = std::str::from_utf8(body).map_err(|_| missing())?;
    Ok(WledCommand::Raw(RawValue::from_string(compact(text))?))
}

/// Drop whitespace outside of strings so the command fits on one line
fn compact(json: &str) -> String {
    let mut compacted = String::with_capacity(json.len());
    let mut in_string = false;
    let mut escaped = false;

    for c in json.chars() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
        } else if c == '"' {
            in_string = true;
        } else if matches!(c, ' ' | '\t' | '\n' | '\r') {
            continue;
        }
        compacted.push(c);
    }

    compacted
}

/// The two step demo sequence for a persistent session: `color` straight
/// away, then blue once [`CHAIN_DELAY`] has passed.
pub fn red_then_blue(color: Color) -> Vec<SessionStep> {
    vec![
        SessionStep {
            delay: Duration::ZERO,
            label: "Red".to_string(),
            command: color_command(color),
        },
        SessionStep {
            delay: CHAIN_DELAY,
            label: "Blue".to_string(),
            command: color_command(Color::new(0, 0, 255)),
        },
    ]
}
