//! # REST Coordination Store
//!
//! Talks to a Redis-compatible store over its HTTPS REST interface:
//!
//! - single command: `POST {url}` with body `["INCR", "key"]`
//! - pipeline: `POST {url}/pipeline` with body `[["INCR", "key"], ["EXPIRE", "key", "300"]]`
//! - replies: `{"result": ...}` or `{"error": "..."}` (an array of those for pipelines)
//!
//! Every request carries `Authorization: Bearer {token}` and is bounded by the
//! store timeout. A store without URL or token is constructed anyway and
//! reports [`StoreError::NotConfigured`] on each call, which callers treat as
//! unavailable (fail-open).

use super::{CoordinationStore, StoreCommand, StoreReply};
use crate::config::StoreConfig;
use crate::errors::{StoreError, StoreResult};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Deserialize)]
struct RestReply {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RestCoordinationStore {
    client: Client,
    base_url: Option<String>,
    token: Option<String>,
}

impl RestCoordinationStore {
    pub fn new(config: &StoreConfig, request_timeout: Duration) -> StoreResult<Self> {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| StoreError::NotConfigured(format!("HTTP client build failed: {e}")))?;

        if !config.is_configured() {
            warn!("Coordination store URL or token missing; coordination will fail open");
        }

        Ok(Self {
            client,
            base_url: config
                .rest_url
                .as_ref()
                .map(|url| url.trim_end_matches('/').to_string()),
            token: config.rest_token.clone(),
        })
    }

    fn endpoint(&self) -> StoreResult<(&str, &str)> {
        match (self.base_url.as_deref(), self.token.as_deref()) {
            (Some(url), Some(token)) if !url.is_empty() && !token.is_empty() => Ok((url, token)),
            _ => Err(StoreError::NotConfigured(
                "rest_url and rest_token are required".to_string(),
            )),
        }
    }

    async fn post(&self, url: String, token: &str, body: Value) -> StoreResult<Value> {
        let response = self
            .client
            .post(&url)
            .bearer_auth(token)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;

        if status.is_server_error() || status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(StoreError::Connection(format!("HTTP {status}: {text}")));
        }

        serde_json::from_str::<Value>(&text).map_err(|_| {
            if status.is_success() {
                StoreError::UnexpectedReply {
                    command: url.clone(),
                    reply: text.clone(),
                }
            } else {
                StoreError::Connection(format!("HTTP {status}: {text}"))
            }
        })
    }
}

#[async_trait]
impl CoordinationStore for RestCoordinationStore {
    fn backend_name(&self) -> &'static str {
        "rest"
    }

    async fn execute(&self, command: StoreCommand) -> StoreResult<StoreReply> {
        let (url, token) = self.endpoint()?;
        let name = command.name();
        let body = Value::from(command.to_args());

        debug!(command = name, "Coordination store request");
        let value = self.post(url.to_string(), token, body).await?;
        let reply: RestReply =
            serde_json::from_value(value).map_err(|e| StoreError::UnexpectedReply {
                command: name.to_string(),
                reply: e.to_string(),
            })?;
        decode_reply(name, reply)
    }

    async fn pipeline(&self, commands: Vec<StoreCommand>) -> StoreResult<Vec<StoreReply>> {
        if commands.is_empty() {
            return Ok(Vec::new());
        }
        let (url, token) = self.endpoint()?;
        let names: Vec<&'static str> = commands.iter().map(StoreCommand::name).collect();
        let body = Value::from(
            commands
                .iter()
                .map(|command| Value::from(command.to_args()))
                .collect::<Vec<_>>(),
        );

        debug!(commands = names.len(), "Coordination store pipeline");
        let value = self.post(format!("{url}/pipeline"), token, body).await?;
        let replies: Vec<RestReply> =
            serde_json::from_value(value).map_err(|e| StoreError::UnexpectedReply {
                command: "PIPELINE".to_string(),
                reply: e.to_string(),
            })?;

        if replies.len() != names.len() {
            return Err(StoreError::UnexpectedReply {
                command: "PIPELINE".to_string(),
                reply: format!("expected {} replies, got {}", names.len(), replies.len()),
            });
        }

        names
            .into_iter()
            .zip(replies)
            .map(|(name, reply)| decode_reply(name, reply))
            .collect()
    }
}

fn decode_reply(command: &str, reply: RestReply) -> StoreResult<StoreReply> {
    if let Some(reason) = reply.error {
        return Err(StoreError::Command {
            command: command.to_string(),
            reason,
        });
    }
    decode_value(command, reply.result.unwrap_or(Value::Null))
}

fn decode_value(command: &str, value: Value) -> StoreResult<StoreReply> {
    match value {
        Value::Null => Ok(StoreReply::Nil),
        Value::String(text) if text == "OK" && matches!(command, "SET" | "SETEX") => {
            Ok(StoreReply::Ok)
        }
        Value::String(text) => Ok(StoreReply::Text(text)),
        Value::Number(number) => {
            number
                .as_i64()
                .map(StoreReply::Int)
                .ok_or_else(|| StoreError::UnexpectedReply {
                    command: command.to_string(),
                    reply: number.to_string(),
                })
        }
        Value::Array(items) => items
            .into_iter()
            .map(|item| match item {
                Value::String(text) => Ok(text),
                Value::Number(number) => Ok(number.to_string()),
                other => Err(StoreError::UnexpectedReply {
                    command: command.to_string(),
                    reply: other.to_string(),
                }),
            })
            .collect::<StoreResult<Vec<_>>>()
            .map(StoreReply::List),
        other => Err(StoreError::UnexpectedReply {
            command: command.to_string(),
            reply: other.to_string(),
        }),
    }
}
