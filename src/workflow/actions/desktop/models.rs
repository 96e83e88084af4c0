use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue, json};

fn default_button() -> String {
    "left".to_string()
}

fn default_confidence() -> f64 {
    0.8
}

fn default_wait_ms() -> u64 {
    10_000
}

/// One operation performed by the desktop agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum DesktopConfig {
    /// Click at absolute screen coordinates.
    Click {
        x: f64,
        y: f64,
        #[serde(default = "default_button")]
        button: String,
    },
    /// Click the center of an on-screen match of a reference image, falling
    /// back to the recorded coordinates when nothing matches.
    ClickImage {
        #[serde(default)]
        image_path: Option<String>,
        #[serde(default = "default_confidence")]
        confidence: f64,
        #[serde(default)]
        x: Option<f64>,
        #[serde(default)]
        y: Option<f64>,
        #[serde(default = "default_button")]
        button: String,
    },
    Type {
        value: String,
    },
    WaitForImage {
        image_path: String,
        #[serde(default = "default_wait_ms")]
        timeout_ms: u64,
    },
}

/// Body of the agent's `POST /run`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentRequest {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub data: JsonValue,
}

impl DesktopConfig {
    /// Operation name on the agent's wire.
    pub fn agent_type(&self) -> &'static str {
        match self {
            DesktopConfig::Click {
                ..
            } => "desktop_click",
            DesktopConfig::ClickImage {
                ..
            } => "desktop_click_image",
            DesktopConfig::Type {
                ..
            } => "desktop_type",
            DesktopConfig::WaitForImage {
                ..
            } => "desktop_wait_for_image",
        }
    }

    pub fn request(&self) -> AgentRequest {
        let data = match self {
            DesktopConfig::Click {
                x,
                y,
                button,
            } => json!({"x": x, "y": y, "button": button}),
            DesktopConfig::ClickImage {
                image_path,
                confidence,
                x,
                y,
                button,
            } => {
                let mut data = Map::new();
                if let Some(path) = image_path {
                    data.insert("imagePath".into(), json!(path));
                }
                data.insert("confidence".into(), json!(confidence));
                if let (Some(x), Some(y)) = (x, y) {
                    data.insert("x".into(), json!(x));
                    data.insert("y".into(), json!(y));
                    data.insert("button".into(), json!(button));
                }
                JsonValue::Object(data)
            }
            DesktopConfig::Type {
                value,
            } => json!({"value": value}),
            DesktopConfig::WaitForImage {
                image_path,
                timeout_ms,
            } => json!({"imagePath": image_path, "timeoutMs": timeout_ms}),
        };
        AgentRequest {
            kind: self.agent_type(),
            data,
        }
    }

    pub fn schema() -> JsonValue {
        let button = json!({ "type": "string", "enum": ["left", "right", "middle"] });
        json!({
            "type": "object",
            "required": ["action"],
            "oneOf": [
                {
                    "properties": {
                        "action": { "const": "click" },
                        "x": { "type": "number" },
                        "y": { "type": "number" },
                        "button": button
                    },
                    "required": ["x", "y"]
                },
                {
                    "properties": {
                        "action": { "const": "click_image" },
                        "image_path": { "type": "string" },
                        "confidence": { "type": "number", "exclusiveMinimum": 0, "maximum": 1 },
                        "x": { "type": "number" },
                        "y": { "type": "number" },
                        "button": button
                    },
                    "anyOf": [
                        { "required": ["image_path"] },
                        { "required": ["x", "y"] }
                    ]
                },
                {
                    "properties": {
                        "action": { "const": "type" },
                        "value": { "type": "string" }
                    },
                    "required": ["value"]
                },
                {
                    "properties": {
                        "action": { "const": "wait_for_image" },
                        "image_path": { "type": "string" },
                        "timeout_ms": { "type": "integer", "minimum": 0 }
                    },
                    "required": ["image_path"]
                }
            ]
        })
    }
}

/// Result of the agent's `GET /preflight`: whether it can reach a display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preflight {
    pub ok: bool,
    #[serde(default)]
    pub display: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screen: Option<Screen>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Screen {
    pub width: u32,
    pub height: u32,
}
