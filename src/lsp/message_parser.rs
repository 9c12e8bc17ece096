use crate::lsp::error::{LspError, Result};
use crate::lsp::types::{Message, Notification, Request, Response};
use tracing::warn;

/// Parse a full JSON payload (bytes) into a `Message`.
///
/// A body with `method` is a request when it also has `id`, otherwise a
/// notification. A body with `id` and exactly one of `result` or `error` is a
/// response.
pub fn parse_message_from_slice(body: &[u8]) -> Result<Message> {
    let json: serde_json::Value = serde_json::from_slice(body).map_err(LspError::MalformedBody)?;
    parse_message(json)
}

pub fn parse_message(json: serde_json::Value) -> Result<Message> {
    if !json.is_object() {
        return Err(LspError::UnexpectedMessage(format!(
            "expected a JSON object, got {}",
            json
        )));
    }

    if json.get("method").is_some() {
        if json.get("id").is_some() {
            let request: Request = from_value(json)?;
            return Ok(Message::Request(request));
        }
        let notification: Notification = from_value(json)?;
        return Ok(Message::Notification(notification));
    }

    if json.get("id").is_some() {
        match (json.get("result").is_some(), json.get("error").is_some()) {
            (true, true) => {
                return Err(LspError::UnexpectedMessage(format!(
                    "response carries both result and error: {}",
                    json
                )))
            }
            (false, false) => {
                return Err(LspError::UnexpectedMessage(format!(
                    "response carries neither result nor error: {}",
                    json
                )))
            }
            _ => {}
        }
        if json.get("jsonrpc").is_none() {
            warn!("response without \"jsonrpc\" member: {}", json);
        }
        let response: Response = from_value(json)?;
        return Ok(Message::Response(response));
    }

    Err(LspError::UnexpectedMessage(format!(
        "neither request, notification nor response: {}",
        json
    )))
}

fn from_value<T: serde::de::DeserializeOwned>(json: serde_json::Value) -> Result<T> {
    serde_json::from_value(json).map_err(|e| LspError::UnexpectedMessage(e.to_string()))
}
