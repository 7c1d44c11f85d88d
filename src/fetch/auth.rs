//! Request authentication.
//!
//! Descriptors only name the environment variable holding a credential; the
//! value is read when a request is built and kept in a [`SecretString`].

use reqwest::RequestBuilder;
use secrecy::{ExposeSecret, SecretString};

use super::FetchError;
use crate::types::AuthConfig;

/// Resolved credentials for one repository.
#[derive(Debug, Default)]
pub enum Credentials {
    #[default]
    None,
    Basic {
        username: String,
        password: SecretString,
    },
    Bearer(SecretString),
    ApiKey {
        header: String,
        key: SecretString,
    },
}

impl Credentials {
    /// Read the variables referenced by `auth`. A missing or empty variable
    /// is an error rather than an anonymous request.
    pub fn resolve(repository: &str, auth: &AuthConfig) -> Result<Self, FetchError> {
        let read = |variable: &str| -> Result<SecretString, FetchError> {
            match std::env::var(variable) {
                Ok(value) if !value.is_empty() => Ok(SecretString::from(value)),
                _ => Err(FetchError::Credentials {
                    repository: repository.to_string(),
                    variable: variable.to_string(),
                }),
            }
        };

        Ok(match auth {
            AuthConfig::None => Credentials::None,
            AuthConfig::Basic {
                username,
                password_env,
            } => Credentials::Basic {
                username: username.clone(),
                password: read(password_env)?,
            },
            AuthConfig::Bearer { token_env } => Credentials::Bearer(read(token_env)?),
            AuthConfig::ApiKey { header, key_env } => Credentials::ApiKey {
                header: header.clone(),
                key: read(key_env)?,
            },
        })
    }

    pub fn apply(&self, request: RequestBuilder) -> RequestBuilder {
        match self {
            Credentials::None => request,
            Credentials::Basic { username, password } => {
                request.basic_auth(username, Some(password.expose_secret()))
            }
            Credentials::Bearer(token) => request.bearer_auth(token.expose_secret()),
            Credentials::ApiKey { header, key } => request.header(header.as_str(), key.expose_secret()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_none() {
        assert!(matches!(
            Credentials::resolve("r", &AuthConfig::None).unwrap(),
            Credentials::None
        ));
    }

    #[test]
    fn test_missing_variable() {
        let auth = AuthConfig::Bearer {
            token_env: "PKGMETA_TEST_TOKEN_THAT_IS_NEVER_SET".to_string(),
        };
        match Credentials::resolve("private", &auth) {
            Err(FetchError::Credentials { repository, variable }) => {
                assert_eq!(repository, "private");
                assert_eq!(variable, "PKGMETA_TEST_TOKEN_THAT_IS_NEVER_SET");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_api_key_header_applied() {
        let creds = Credentials::ApiKey {
            header: "X-Api-Key".to_string(),
            key: SecretString::from("s3cret".to_string()),
        };
        let request = creds
            .apply(reqwest::Client::new().get("https://example.com"))
            .build()
            .unwrap();
        assert_eq!(request.headers()["x-api-key"], "s3cret");
    }

    #[test]
    fn test_bearer_applied() {
        let creds = Credentials::Bearer(SecretString::from("tok".to_string()));
        let request = creds
            .apply(reqwest::Client::new().get("https://example.com"))
            .build()
            .unwrap();
        assert_eq!(request.headers()["authorization"], "Bearer tok");
    }

    #[test]
    fn test_basic_applied() {
        let creds = Credentials::Basic {
            username: "alice".to_string(),
            password: SecretString::from("s3cret".to_string()),
        };
        let request = creds
            .apply(reqwest::Client::new().get("https://example.com"))
            .build()
            .unwrap();
        assert_eq!(request.headers()["authorization"], "Basic YWxpY2U6czNjcmV0");
        assert!(request.headers()["authorization"].is_sensitive());
    }

    #[test]
    fn test_basic_password_variable_required() {
        let auth = AuthConfig::Basic {
            username: "alice".to_string(),
            password_env: "PKGMETA_TEST_PASSWORD_THAT_IS_NEVER_SET".to_string(),
        };
        assert!(matches!(
            Credentials::resolve("private", &auth),
            Err(FetchError::Credentials { variable, .. }) if variable == "PKGMETA_TEST_PASSWORD_THAT_IS_NEVER_SET"
        ));
    }
}
