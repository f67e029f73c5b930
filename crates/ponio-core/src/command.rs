//! Command vocabulary understood by a Ponio server.
//!
//! Each [`Command`] renders (via `Display`) to exactly one line of the
//! command channel, without the trailing `\n`; the channel appends the
//! delimiter when it writes.
//!
//! ```text
//! CONNECT:Ponio Android Gamepad [TCP]
//! BTN_A:1
//! LJOY:-0.250,1.000
//! RJOY:0.000,0.000
//! DISCONNECT
//! ```

use std::fmt;
use std::str::FromStr;

// MARK: - Button

/// Face, shoulder, menu and D-pad buttons of the virtual gamepad.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Button {
    A,
    B,
    X,
    Y,
    L1,
    R1,
    L2,
    R2,
    Start,
    Select,
    DpadUp,
    DpadDown,
    DpadLeft,
    DpadRight,
}

impl Button {
    pub const ALL: [Button; 14] = [
        Self::A,
        Self::B,
        Self::X,
        Self::Y,
        Self::L1,
        Self::R1,
        Self::L2,
        Self::R2,
        Self::Start,
        Self::Select,
        Self::DpadUp,
        Self::DpadDown,
        Self::DpadLeft,
        Self::DpadRight,
    ];

    /// Wire name of the button.
    pub fn name(&self) -> &'static str {
        match self {
            Self::A => "BTN_A",
            Self::B => "BTN_B",
            Self::X => "BTN_X",
            Self::Y => "BTN_Y",
            Self::L1 => "BTN_L1",
            Self::R1 => "BTN_R1",
            Self::L2 => "BTN_L2",
            Self::R2 => "BTN_R2",
            Self::Start => "BTN_START",
            Self::Select => "BTN_SELECT",
            Self::DpadUp => "DPAD_UP",
            Self::DpadDown => "DPAD_DOWN",
            Self::DpadLeft => "DPAD_LEFT",
            Self::DpadRight => "DPAD_RIGHT",
        }
    }
}

impl FromStr for Button {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_uppercase();
        Self::ALL
            .into_iter()
            .find(|b| b.name() == wanted)
            .ok_or_else(|| format!("unknown button '{}'", s))
    }
}

// MARK: - Stick

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stick {
    Left,
    Right,
}

impl Stick {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Left => "LJOY",
            Self::Right => "RJOY",
        }
    }
}

// MARK: - Axis encoding

/// Map a stick position expressed as a fraction of its travel (`0.0` = full
/// negative, `0.5` = centred, `1.0` = full positive) onto the `[-1, 1]` axis
/// range. Out-of-range input is clamped.
pub fn axis_from_fraction(fraction: f32) -> f32 {
    fraction.clamp(0.0, 1.0) * 2.0 - 1.0
}

/// Fixed three-decimal rendering of one axis. Values are clamped to
/// `[-1, 1]`, non-finite values become `0`, and negative zero prints as
/// `0.000` so a centred stick always reads `0.000,0.000`.
fn format_axis(value: f32) -> String {
    let value = if value.is_finite() {
        value.clamp(-1.0, 1.0)
    } else {
        0.0
    };
    let rounded = (value * 1000.0).round() / 1000.0;
    let rounded = if rounded == 0.0 { 0.0 } else { rounded };
    format!("{:.3}", rounded)
}

// MARK: - Command

/// A single command line sent over the channel.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Handshake sent right after the stream opens. `protocol` is the label
    /// of the transport in use, e.g. `TCP`.
    Connect { client_name: String, protocol: String },
    /// Farewell sent before the stream closes.
    Disconnect,
    Button { button: Button, pressed: bool },
    /// Stick deflection, each axis in `[-1, 1]`.
    Joystick { stick: Stick, x: f32, y: f32 },
    /// Pre-formatted text, forwarded verbatim.
    Raw(String),
}

impl Command {
    pub fn connect(client_name: impl Into<String>, protocol: impl Into<String>) -> Self {
        Self::Connect {
            client_name: client_name.into(),
            protocol: protocol.into(),
        }
    }

    pub fn press(button: Button) -> Self {
        Self::Button { button, pressed: true }
    }

    pub fn release(button: Button) -> Self {
        Self::Button { button, pressed: false }
    }

    pub fn joystick(stick: Stick, x: f32, y: f32) -> Self {
        Self::Joystick { stick, x, y }
    }

    /// Stick returned to centre.
    pub fn joystick_released(stick: Stick) -> Self {
        Self::Joystick { stick, x: 0.0, y: 0.0 }
    }

    /// Stick position given as travel fractions, see [`axis_from_fraction`].
    pub fn joystick_from_fractions(stick: Stick, fx: f32, fy: f32) -> Self {
        Self::Joystick {
            stick,
            x: axis_from_fraction(fx),
            y: axis_from_fraction(fy),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connect { client_name, protocol } => {
                write!(f, "CONNECT:{} [{}]", client_name, protocol)
            }
            Self::Disconnect => f.write_str("DISCONNECT"),
            Self::Button { button, pressed } => {
                write!(f, "{}:{}", button.name(), u8::from(*pressed))
            }
            Self::Joystick { stick, x, y } => {
                write!(f, "{}:{},{}", stick.name(), format_axis(*x), format_axis(*y))
            }
            Self::Raw(text) => f.write_str(text),
        }
    }
}

impl From<Command> for String {
    fn from(command: Command) -> Self {
        command.to_string()
    }
}
