use std::collections::HashMap;

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, InvalidHeaderValue};
use serde_json::{Value, json};

use crate::{
    AutoflowError, Result,
    runtime::{ExecutionContext, RunScope},
    workflow::{
        actions::{Action, ActionOutput, NodeConfig, NodeKind},
        node::NodeId,
    },
};

use super::models::*;

const STATUS_CODE_KEY: &str = "status_code";
const BODY_KEY: &str = "body";
const HEADERS_KEY: &str = "headers";

#[derive(Debug, Clone, Default)]
pub struct HttpRequestAction {
    client: reqwest::Client,
}

impl HttpRequestAction {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply authorization headers based on auth config
    fn apply_auth_headers(
        config: &HttpRequestConfig,
        headers: &mut HeaderMap,
    ) -> Result<()> {
        match &config.auth.auth_type {
            AuthorizationType::NoAuth => {}
            AuthorizationType::ApiKey(api_key_type) => {
                let api_key = config.auth.api_key.as_ref().ok_or_else(|| AutoflowError::Action("api_key is required for api-key authorization".to_string()))?;

                let header_name = config.auth.header.as_deref().unwrap_or("Authorization");
                let header_key: HeaderName = header_name.parse().map_err(|err: reqwest::header::InvalidHeaderName| AutoflowError::Action(err.to_string()))?;

                let header_value = match api_key_type {
                    ApiKeyType::Bearer => format!("Bearer {}", api_key),
                    ApiKeyType::Basic => {
                        let encoded = if api_key.contains(':') {
                            STANDARD.encode(api_key.as_bytes())
                        } else {
                            api_key.clone()
                        };
                        format!("Basic {}", encoded)
                    }
                    ApiKeyType::Custom => api_key.clone(),
                };

                headers.insert(
                    header_key,
                    header_value.parse().map_err(|err: InvalidHeaderValue| AutoflowError::Action(err.to_string()))?,
                );
            }
        }
        Ok(())
    }

    fn build_request(
        &self,
        config: &HttpRequestConfig,
    ) -> Result<reqwest::RequestBuilder> {
        let mut headers = HeaderMap::new();
        headers.insert(HeaderName::from_static("accept"), HeaderValue::from_static("*/*"));

        Self::apply_auth_headers(config, &mut headers)?;

        for (key, value) in &config.headers {
            headers.insert(
                key.parse::<HeaderName>().map_err(|err| AutoflowError::Action(err.to_string()))?,
                value.parse().map_err(|err: InvalidHeaderValue| AutoflowError::Action(err.to_string()))?,
            );
        }

        let query: Vec<(&String, &String)> = config.params.iter().collect();
        let method = config.method.as_ref().parse::<reqwest::Method>().map_err(|_| AutoflowError::Action(format!("invalid method '{:?}'", config.method)))?;

        let mut request = self.client.request(method, &config.url).headers(headers).query(&query);

        let mismatch = || AutoflowError::Action("content-type did not match the body content".to_string());
        match config.body.content_type {
            ContentType::Text | ContentType::Html => {
                if let Some(text) = &config.body.data {
                    let data = text.as_str().ok_or_else(mismatch)?;
                    request = request.body::<String>(data.to_string());
                }
            }
            ContentType::Json => {
                if let Some(json) = &config.body.data {
                    request = request.header("content-type", "application/json").body(serde_json::to_vec(json)?);
                }
            }
            ContentType::FormData | ContentType::UrlEncoded => {
                if let Some(form) = &config.body.data {
                    let data = form.as_object().ok_or_else(mismatch)?;
                    request = request.form(data);
                }
            }
            ContentType::Binary => {
                if let Some(value) = &config.body.data {
                    let data = value.as_str().ok_or_else(mismatch)?;
                    let data = STANDARD.decode(data).map_err(|err| AutoflowError::Action(err.to_string()))?;
                    request = request.body(data);
                }
            }
            ContentType::None => {}
        }

        Ok(request)
    }
}

fn response_output(
    status: u16,
    headers: Value,
    body: Value,
) -> Result<ActionOutput> {
    if status >= 400 {
        return Err(AutoflowError::Action(format!("http request failed with status {}", status)));
    }
    Ok(ActionOutput::value(json!({
        STATUS_CODE_KEY: status,
        HEADERS_KEY: headers,
        BODY_KEY: body,
    })))
}

#[async_trait]
impl Action for HttpRequestAction {
    fn kind(&self) -> NodeKind {
        NodeKind::HttpRequest
    }

    async fn run(
        &self,
        nid: &NodeId,
        config: &NodeConfig,
        _ctx: &mut ExecutionContext,
        scope: &RunScope,
    ) -> Result<ActionOutput> {
        let NodeConfig::HttpRequest(config) = config else {
            return Err(config.mismatch(NodeKind::HttpRequest));
        };

        if scope.test_mode {
            if let Some(mock) = &config.mock {
                tracing::debug!(run_id = %scope.run_id, node_id = %nid, status = mock.status, "http_request served from mock");
                return response_output(mock.status, json!({}), mock.body.clone());
            }
        }

        let request = self.build_request(config)?;
        let res = request.send().await.map_err(|err| AutoflowError::Action(format!("http error: {}", err)))?;

        let status = res.status().as_u16();
        let headers_map: HashMap<String, String> = res.headers().iter().map(|(k, v)| (k.to_string(), v.to_str().unwrap_or("").to_string())).collect();
        let text = res.text().await.map_err(|err| AutoflowError::Action(err.to_string()))?;
        let body = serde_json::from_str::<Value>(&text).unwrap_or(Value::String(text));

        response_output(status, serde_json::to_value(headers_map)?, body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scope(test_mode: bool) -> RunScope {
        RunScope {
            run_id: "r1".into(),
            workflow_id: "wf".into(),
            test_mode,
        }
    }

    fn config(value: Value) -> NodeConfig {
        NodeConfig::parse(NodeKind::HttpRequest, &value).unwrap()
    }

    #[tokio::test]
    async fn test_mock_response_in_test_mode() {
        let action = HttpRequestAction::new();
        let mut ctx = ExecutionContext::default();
        let config = config(json!({
            "url": "http://example.invalid/users",
            "mock": {"body": {"id": 7}}
        }));

        let output = action.run(&"fetch".to_string(), &config, &mut ctx, &scope(true)).await.unwrap();
        let value = output.value.unwrap();
        assert_eq!(value[STATUS_CODE_KEY], json!(200));
        assert_eq!(value[BODY_KEY]["id"], json!(7));
    }

    #[tokio::test]
    async fn test_error_status_fails_the_attempt() {
        let action = HttpRequestAction::new();
        let mut ctx = ExecutionContext::default();
        let config = config(json!({
            "url": "http://example.invalid",
            "mock": {"status": 503}
        }));

        let err = action.run(&"fetch".to_string(), &config, &mut ctx, &scope(true)).await.unwrap_err();
        assert!(err.to_string().contains("503"));
    }

    #[test]
    fn test_bearer_auth_header() {
        let config = HttpRequestConfig {
            url: "http://localhost".into(),
            method: HttpRequestMethod::GET,
            auth: AuthorizationConfig {
                auth_type: AuthorizationType::ApiKey(ApiKeyType::Bearer),
                api_key: Some("token".into()),
                header: None,
            },
            headers: HashMap::new(),
            params: HashMap::new(),
            body: HttpBody::default(),
            mock: None,
        };
        let mut headers = HeaderMap::new();
        HttpRequestAction::apply_auth_headers(&config, &mut headers).unwrap();
        assert_eq!(headers.get("authorization").unwrap(), "Bearer token");
    }
}
