//! Helpers for the AWS Query protocol (form-encoded requests, XML responses)
//! used by EC2 and SNS.

use crate::error::{is_throttling_code, CloudProviderError};
use std::collections::BTreeMap;

/// `application/x-www-form-urlencoded` body with RFC 3986 encoding, keys sorted.
pub fn form_encode(params: &BTreeMap<String, String>) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

/// Text of the first `<tag>...</tag>` element. Self-closing and empty
/// elements yield `None`.
pub fn xml_tag<'a>(body: &'a str, tag: &str) -> Option<&'a str> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let start = body.find(&open)? + open.len();
    let end = body[start..].find(&close)? + start;
    Some(body[start..end].trim()).filter(|text| !text.is_empty())
}

/// Map a non-2xx Query-protocol response to an error.
///
/// Error documents carry `<Code>` and `<Message>` inside `<Error>`.
pub fn parse_query_error(service: &str, status: u16, body: &str) -> CloudProviderError {
    match xml_tag(body, "Code") {
        Some(code) if is_throttling_code(code) => CloudProviderError::RateLimited {
            service: service.to_string(),
        },
        Some(code) => CloudProviderError::ApiResponseError {
            service: service.to_string(),
            code: code.to_string(),
            message: xml_tag(body, "Message").unwrap_or("Unknown").to_string(),
        },
        None if status == 429 || status == 503 => CloudProviderError::RateLimited {
            service: service.to_string(),
        },
        None => CloudProviderError::HttpError {
            service: service.to_string(),
            status,
            body: body.to_string(),
        },
    }
}
