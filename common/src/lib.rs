pub mod basic_auth;
pub mod error;

pub use basic_auth::{BASIC_SCHEME, BasicCredentials, decode_basic_credentials, encode_basic_credentials};
pub use error::{CommonError, Result};
