//! Codec for `Basic` credentials as carried by the `Proxy-Authorization` header.

use crate::error::{CommonError, Result};
use base64::{Engine as _, engine::general_purpose::STANDARD};

pub const BASIC_SCHEME: &str = "Basic";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasicCredentials {
    pub username: String,
    pub password: String,
}

/// Builds a `Basic <base64(username:password)>` header value.
pub fn encode_basic_credentials(username: &str, password: &str) -> String {
    let token = STANDARD.encode(format!("{}:{}", username, password));
    format!("{} {}", BASIC_SCHEME, token)
}

/// Parses a `Basic <token>` header value.
///
/// The value must consist of exactly two tokens separated by a single space,
/// and the decoded payload is split at its first `:` only, so passwords may
/// themselves contain colons.
pub fn decode_basic_credentials(value: &str) -> Result<BasicCredentials> {
    let parts: Vec<&str> = value.split(' ').collect();
    let [scheme, token] = parts.as_slice() else {
        return Err(CommonError::MalformedCredentials(parts.len()));
    };

    if *scheme != BASIC_SCHEME {
        return Err(CommonError::UnsupportedScheme(scheme.to_string()));
    }

    let decoded = STANDARD.decode(token)?;
    let payload = String::from_utf8(decoded).map_err(|_| CommonError::InvalidUtf8)?;
    let (username, password) = payload
        .split_once(':')
        .ok_or(CommonError::MissingSeparator)?;

    Ok(BasicCredentials {
        username: username.to_string(),
        password: password.to_string(),
    })
}
