//! Client capability data.
//!
//! Sent by the client as a JSON object during login. Only a handful of
//! keys matter to the gateway; everything else is ignored.

use serde::Deserialize;

use crate::SessionError;

/// The platform a client runs on. Only cosmetic choices depend on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeviceOs {
    #[default]
    Unknown,
    Android,
    Ios,
    MacOs,
    FireOs,
    Windows,
    PlayStation,
    Switch,
    Xbox,
}

impl DeviceOs {
    fn from_code(code: i64) -> Self {
        match code {
            1 => Self::Android,
            2 => Self::Ios,
            3 => Self::MacOs,
            4 => Self::FireOs,
            7 | 8 => Self::Windows,
            11 => Self::PlayStation,
            12 => Self::Switch,
            13 => Self::Xbox,
            _ => Self::Unknown,
        }
    }

    /// Touch-first platforms.
    pub fn is_mobile(self) -> bool {
        matches!(self, Self::Android | Self::Ios | Self::FireOs)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InputMode {
    #[default]
    Unknown,
    Mouse,
    Touch,
    GamePad,
    MotionController,
}

impl InputMode {
    fn from_code(code: i64) -> Self {
        match code {
            1 => Self::Mouse,
            2 => Self::Touch,
            3 => Self::GamePad,
            4 => Self::MotionController,
            _ => Self::Unknown,
        }
    }
}

#[derive(Deserialize)]
struct RawClientData {
    #[serde(rename = "LanguageCode")]
    language_code: Option<String>,
    #[serde(rename = "DeviceOS")]
    device_os: Option<i64>,
    #[serde(rename = "CurrentInputMode")]
    input_mode: Option<i64>,
    #[serde(rename = "ViewDistance", alias = "RenderDistance")]
    view_distance: Option<i32>,
    #[serde(rename = "DeviceModel")]
    device_model: Option<String>,
    #[serde(rename = "GameVersion")]
    game_version: Option<String>,
}

pub const DEFAULT_LANGUAGE: &str = "en_US";

/// Parsed client capability data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientData {
    pub language_code: String,
    pub device_os: DeviceOs,
    pub input_mode: InputMode,
    pub view_distance: Option<i32>,
    pub device_model: Option<String>,
    pub game_version: Option<String>,
}

impl Default for ClientData {
    fn default() -> Self {
        Self {
            language_code: DEFAULT_LANGUAGE.to_string(),
            device_os: DeviceOs::Unknown,
            input_mode: InputMode::Unknown,
            view_distance: None,
            device_model: None,
            game_version: None,
        }
    }
}

impl ClientData {
    /// Parses the JSON payload.
    ///
    /// Unknown keys are ignored. Missing keys take their defaults. A
    /// payload that is not an object, or a known key holding the wrong
    /// type, is [`SessionError::MalformedClientData`].
    pub fn parse(json: &str) -> Result<Self, SessionError> {
        let raw: RawClientData = serde_json::from_str(json)
            .map_err(|e| SessionError::MalformedClientData(e.to_string()))?;
        Ok(Self {
            language_code: raw
                .language_code
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| DEFAULT_LANGUAGE.to_string()),
            device_os: raw.device_os.map_or(DeviceOs::Unknown, DeviceOs::from_code),
            input_mode: raw.input_mode.map_or(InputMode::Unknown, InputMode::from_code),
            view_distance: raw.view_distance,
            device_model: raw.device_model,
            game_version: raw.game_version,
        })
    }

    /// The language code as the backend expects it (`en_us`).
    pub fn locale(&self) -> String {
        self.language_code.to_ascii_lowercase()
    }
}
