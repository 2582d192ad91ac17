//! Error types for the directory connector

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// Deployment mistake: a realm or query was never registered, or a
    /// template is malformed. Raised before any directory I/O.
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid server URI '{uri}': {reason}")]
    InvalidUri { uri: String, reason: String },

    #[error("LDAP error: {0}")]
    Ldap(#[from] ldap3::LdapError),

    #[error("Directory operation failed: {0}")]
    Directory(String),

    #[error("LDAP connection pool error: {0}")]
    Pool(String),

    #[error(transparent)]
    Core(#[from] warden_core::Error),
}

impl Error {
    pub fn configuration(msg: impl Into<String>) -> Self {
        Error::Configuration(msg.into())
    }

    /// True for failures raised by the directory client (transport, bind,
    /// search or pool), as opposed to configuration mistakes.
    pub fn is_directory(&self) -> bool {
        matches!(self, Error::Ldap(_) | Error::Directory(_) | Error::Pool(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(Error::Directory("timeout".into()).is_directory());
        assert!(Error::Pool("closed".into()).is_directory());
        assert!(!Error::configuration("no login query").is_directory());
        assert!(!Error::InvalidUri {
            uri: "ldap://h:x".into(),
            reason: "invalid port".into()
        }
        .is_directory());
    }
}
