use thiserror::Error;

#[derive(Error, Debug)]
pub enum CommonError {
    #[error("Malformed credentials: expected `<scheme> <token>`, got {0} tokens")]
    MalformedCredentials(usize),

    #[error("Unsupported authorization scheme: {0}")]
    UnsupportedScheme(String),

    #[error("Base64 decode error: {0}")]
    Base64Decode(#[from] base64::DecodeError),

    #[error("Credentials are not valid UTF-8")]
    InvalidUtf8,

    #[error("Credentials are missing the ':' separator")]
    MissingSeparator,
}

pub type Result<T> = std::result::Result<T, CommonError>;
