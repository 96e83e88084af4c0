use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Value as JsonValue, json};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuthorizationType {
    #[default]
    NoAuth,
    ApiKey(ApiKeyType),
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ApiKeyType {
    Basic,
    Bearer,
    Custom,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq, strum::AsRefStr)]
pub enum HttpRequestMethod {
    #[default]
    GET,
    POST,
    PUT,
    PATCH,
    DELETE,
    HEAD,
    OPTIONS,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ContentType {
    None,
    Text,
    Html,
    #[default]
    Json,
    #[serde(rename = "urlencoded")]
    UrlEncoded,
    FormData,
    Binary,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuthorizationConfig {
    #[serde(default)]
    pub auth_type: AuthorizationType,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub header: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HttpBody {
    #[serde(default)]
    pub content_type: ContentType,
    #[serde(default)]
    pub data: Option<JsonValue>,
}

/// Canned response used instead of the network when the run is in test mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MockResponse {
    #[serde(default = "default_mock_status")]
    pub status: u16,
    #[serde(default)]
    pub body: JsonValue,
}

fn default_mock_status() -> u16 {
    200
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpRequestConfig {
    pub url: String,
    #[serde(default)]
    pub method: HttpRequestMethod,
    #[serde(default)]
    pub auth: AuthorizationConfig,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub params: HashMap<String, String>,
    #[serde(default)]
    pub body: HttpBody,
    #[serde(default)]
    pub mock: Option<MockResponse>,
}

impl HttpRequestConfig {
    pub fn schema() -> JsonValue {
        json!({
            "type": "object",
            "required": ["url"],
            "properties": {
                "url": { "type": "string" },
                "method": {
                    "type": "string",
                    "enum": ["GET", "POST", "PUT", "PATCH", "DELETE", "HEAD", "OPTIONS"]
                },
                "auth": {
                    "type": "object",
                    "properties": {
                        "auth_type": {
                            "oneOf": [
                                { "const": "no_auth" },
                                {
                                    "type": "object",
                                    "properties": {
                                        "api_key": {
                                            "type": "string",
                                            "enum": ["basic", "bearer", "custom"]
                                        }
                                    }
                                }
                            ]
                        },
                        "api_key": { "type": ["string", "null"] },
                        "header": { "type": ["string", "null"] }
                    }
                },
                "headers": {
                    "type": "object",
                    "additionalProperties": { "type": "string" }
                },
                "params": {
                    "type": "object",
                    "additionalProperties": { "type": "string" }
                },
                "body": {
                    "type": "object",
                    "properties": {
                        "content_type": {
                            "type": "string",
                            "enum": ["none", "text", "html", "json", "urlencoded", "form-data", "binary"]
                        },
                        "data": {}
                    }
                },
                "mock": {
                    "type": "object",
                    "properties": {
                        "status": { "type": "integer", "minimum": 100, "maximum": 599 },
                        "body": {}
                    }
                }
            }
        })
    }
}
