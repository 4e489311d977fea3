use common::{CommonError, decode_basic_credentials};
use http::header::HeaderValue;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("missing Proxy-Authorization header")]
    MissingHeader,

    #[error("Proxy-Authorization header is not valid text")]
    InvalidHeader,

    #[error("invalid credentials: {0}")]
    Credentials(#[from] CommonError),

    #[error("unknown user: {0}")]
    UnknownUser(String),

    #[error("wrong password for user: {0}")]
    WrongPassword(String),
}

/// Static username to password table.
#[derive(Clone, Default)]
pub struct CredentialStore {
    users: HashMap<String, String>,
}

impl CredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, username: impl Into<String>, password: impl Into<String>) {
        self.users.insert(username.into(), password.into());
    }

    pub fn verify(&self, username: &str, password: &str) -> Result<(), AuthError> {
        match self.users.get(username) {
            None => Err(AuthError::UnknownUser(username.to_string())),
            Some(expected) if expected == password => Ok(()),
            Some(_) => Err(AuthError::WrongPassword(username.to_string())),
        }
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

impl fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.users.keys().collect();
        names.sort();
        f.debug_struct("CredentialStore")
            .field("users", &names)
            .finish()
    }
}

impl<U, P> FromIterator<(U, P)> for CredentialStore
where
    U: Into<String>,
    P: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (U, P)>>(iter: I) -> Self {
        let mut store = Self::new();
        for (username, password) in iter {
            store.insert(username, password);
        }
        store
    }
}

/// Resolves a `Proxy-Authorization` header to a known username.
pub fn authenticate(
    header: Option<&HeaderValue>,
    store: &CredentialStore,
) -> Result<String, AuthError> {
    let header = header.ok_or(AuthError::MissingHeader)?;
    let value = header.to_str().map_err(|_| AuthError::InvalidHeader)?;
    let credentials = decode_basic_credentials(value)?;
    store.verify(&credentials.username, &credentials.password)?;
    Ok(credentials.username)
}
