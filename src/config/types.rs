//! Server options consumed by `run`.

use serde::{Deserialize, Serialize};

pub const DEFAULT_PORT: u16 = 3100;
pub const DEFAULT_MAX_CONNECTIONS: u32 = 20;
pub const DEFAULT_JWT_EXPIRATION: u64 = 86_400;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerOptions {
    pub port: u16,
    /// Path prefix every declared route is nested under, e.g. `/api`. Empty for none.
    #[serde(default)]
    pub prefix: String,
    pub auth: AuthOptions,
    pub database: DatabaseOptions,
    #[serde(default)]
    pub swagger: SwaggerOptions,
    /// Create missing tables before serving.
    #[serde(default)]
    pub sync_on_start: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuthOptions {
    pub jwt_secret: String,
    /// Access token lifetime in seconds.
    pub jwt_expiration: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DatabaseOptions {
    pub url: String,
    pub max_connections: u32,
    /// Log every statement at info level.
    #[serde(default)]
    pub debug: bool,
    /// Secret the field cipher key is derived from.
    pub secure_key: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SwaggerOptions {
    pub name: String,
    pub version: String,
    pub description: String,
    /// `http` or `https`.
    pub scheme: String,
    pub host: Option<String>,
}

impl Default for ServerOptions {
    fn default() -> Self {
        ServerOptions {
            port: DEFAULT_PORT,
            prefix: String::new(),
            auth: AuthOptions {
                jwt_secret: String::new(),
                jwt_expiration: DEFAULT_JWT_EXPIRATION,
            },
            database: DatabaseOptions {
                url: String::new(),
                max_connections: DEFAULT_MAX_CONNECTIONS,
                debug: false,
                secure_key: String::new(),
            },
            swagger: SwaggerOptions {
                name: env!("CARGO_PKG_NAME").to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                description: String::new(),
                scheme: "http".to_string(),
                host: None,
            },
            sync_on_start: false,
        }
    }
}
