//! Load server options from `.env` and the process environment.

use crate::config::types::{ServerOptions, DEFAULT_JWT_EXPIRATION, DEFAULT_MAX_CONNECTIONS, DEFAULT_PORT};
use crate::error::ConfigError;
use std::collections::HashMap;
use std::str::FromStr;

const DEFAULT_DATABASE_URL: &str = "postgres://localhost/blueprint";
const DEFAULT_SECURE_KEY: &str = "blueprint-sdk-insecure-default";

impl ServerOptions {
    /// Read a `.env` file when present, then the environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        if let Err(e) = dotenvy::dotenv() {
            if !e.not_found() {
                return Err(ConfigError::Load(format!(".env: {}", e)));
            }
        }
        Self::from_vars(std::env::vars().collect())
    }

    /// Build options from an explicit variable map; unset variables take their defaults.
    pub fn from_vars(vars: HashMap<String, String>) -> Result<Self, ConfigError> {
        let get = |key: &str| vars.get(key).map(|v| v.trim()).filter(|v| !v.is_empty());
        let mut options = ServerOptions::default();
        options.port = parse(&vars, "PORT")?.unwrap_or(DEFAULT_PORT);
        options.prefix = get("API_PREFIX").map(normalize_prefix).unwrap_or_default();
        options.sync_on_start = parse_flag(&vars, "DB_SYNC")?;

        options.database.url = get("DATABASE_URL").unwrap_or(DEFAULT_DATABASE_URL).to_string();
        options.database.max_connections = parse(&vars, "DATABASE_MAX_CONNECTIONS")?.unwrap_or(DEFAULT_MAX_CONNECTIONS);
        options.database.debug = parse_flag(&vars, "DATABASE_DEBUG")?;
        options.database.secure_key = match get("SECURE_KEY") {
            Some(key) => key.to_string(),
            None => {
                tracing::warn!("SECURE_KEY not set; secure fields use a built-in key");
                DEFAULT_SECURE_KEY.to_string()
            }
        };

        options.auth.jwt_secret = get("JWT_SECRET").unwrap_or_default().to_string();
        if options.auth.jwt_secret.is_empty() {
            tracing::warn!("JWT_SECRET not set; bearer tokens will not verify");
        }
        options.auth.jwt_expiration = parse(&vars, "JWT_EXPIRATION")?.unwrap_or(DEFAULT_JWT_EXPIRATION);

        if let Some(name) = get("SWAGGER_NAME") {
            options.swagger.name = name.to_string();
        }
        if let Some(version) = get("SWAGGER_VERSION") {
            options.swagger.version = version.to_string();
        }
        if let Some(description) = get("SWAGGER_DESCRIPTION") {
            options.swagger.description = description.to_string();
        }
        if let Some(scheme) = get("SWAGGER_SCHEME") {
            options.swagger.scheme = scheme.to_string();
        }
        options.swagger.host = get("SWAGGER_HOST").map(str::to_string);
        Ok(options)
    }
}

fn parse<T: FromStr>(vars: &HashMap<String, String>, key: &str) -> Result<Option<T>, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match vars.get(key).map(|v| v.trim()).filter(|v| !v.is_empty()) {
        None => Ok(None),
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|e| ConfigError::Load(format!("{}={}: {}", key, raw, e))),
    }
}

fn parse_flag(vars: &HashMap<String, String>, key: &str) -> Result<bool, ConfigError> {
    match vars.get(key).map(|v| v.trim().to_ascii_lowercase()).as_deref() {
        None | Some("") | Some("0") | Some("false") | Some("no") => Ok(false),
        Some("1") | Some("true") | Some("yes") => Ok(true),
        Some(other) => Err(ConfigError::Load(format!("{}={}: expected true or false", key, other))),
    }
}

/// `api/` and `/api` both become `/api`; `/` becomes empty.
fn normalize_prefix(raw: &str) -> String {
    let trimmed = raw.trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("/{}", trimmed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn defaults_when_unset() {
        let o = ServerOptions::from_vars(HashMap::new()).unwrap();
        assert_eq!(o.port, 3100);
        assert_eq!(o.prefix, "");
        assert_eq!(o.database.max_connections, 20);
        assert_eq!(o.auth.jwt_expiration, 86_400);
        assert!(!o.sync_on_start);
        assert!(!o.database.secure_key.is_empty());
    }

    #[test]
    fn reads_values() {
        let o = ServerOptions::from_vars(vars(&[
            ("PORT", "8080"),
            ("API_PREFIX", "api/"),
            ("DATABASE_URL", "postgres://db/app"),
            ("DATABASE_DEBUG", "true"),
            ("JWT_SECRET", "s3cret"),
            ("JWT_EXPIRATION", "60"),
            ("SWAGGER_HOST", "example.org"),
            ("DB_SYNC", "1"),
        ]))
        .unwrap();
        assert_eq!(o.port, 8080);
        assert_eq!(o.prefix, "/api");
        assert_eq!(o.database.url, "postgres://db/app");
        assert!(o.database.debug);
        assert_eq!(o.auth.jwt_secret, "s3cret");
        assert_eq!(o.auth.jwt_expiration, 60);
        assert_eq!(o.swagger.host.as_deref(), Some("example.org"));
        assert!(o.sync_on_start);
    }

    #[test]
    fn rejects_malformed_numbers_and_flags() {
        assert!(matches!(
            ServerOptions::from_vars(vars(&[("PORT", "http")])),
            Err(ConfigError::Load(_))
        ));
        assert!(ServerOptions::from_vars(vars(&[("DB_SYNC", "maybe")])).is_err());
    }
}
