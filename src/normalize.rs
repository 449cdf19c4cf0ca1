//! 把原始 [`HttpResponse`] 变成类型化的结果或 [`ApiError`]。
//!
//! 失败状态总是取后端给出的最具体的信息：非空的 `detail`，其次非空的
//! `error`，再次原始响应文本，最后才是调用方的 fallback。

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{ApiError, ApiResult};
use crate::transport::HttpResponse;

pub fn parse_response<T: DeserializeOwned>(response: &HttpResponse, fallback: &str) -> ApiResult<T> {
    let payload = parse_value(response, fallback)?;
    serde_json::from_value(payload).map_err(|err| {
        ApiError::payload(format!("invalid response body: unexpected shape ({err})"))
    })
}

/// 第一步：只判定成功/失败，得到未定型的 JSON
pub fn parse_value(response: &HttpResponse, fallback: &str) -> ApiResult<Value> {
    let success = response.is_success();

    let Some(text) = response.body.as_deref() else {
        return if success {
            Ok(empty_object())
        } else {
            Err(ApiError::http_status(response.status, fallback))
        };
    };

    let parsed = if text.trim().is_empty() {
        None
    } else {
        match serde_json::from_str::<Value>(text) {
            Ok(value) => Some(value),
            Err(err) if success => {
                return Err(ApiError::payload(format!("invalid response body: {err}")));
            }
            // 非 JSON 的失败响应：原文就是最具体的信息
            Err(_) => return Err(ApiError::http_status(response.status, text)),
        }
    };

    if !success {
        let message = parsed
            .as_ref()
            .and_then(|value| string_field(value, "detail").or_else(|| string_field(value, "error")))
            .map(str::to_string)
            .unwrap_or_else(|| {
                if text.trim().is_empty() {
                    fallback.to_string()
                } else {
                    text.to_string()
                }
            });
        return Err(ApiError::http_status(response.status, message));
    }

    Ok(parsed.unwrap_or_else(empty_object))
}

/// 空字符串等同于没有这个字段
fn string_field<'a>(value: &'a Value, name: &str) -> Option<&'a str> {
    value
        .get(name)
        .and_then(Value::as_str)
        .filter(|text| !text.trim().is_empty())
}

fn empty_object() -> Value {
    Value::Object(serde_json::Map::new())
}
