use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub jwt_secret: String,
    #[serde(default)]
    pub cookie_secret: Option<String>,

    #[serde(default = "default_redis_mode")]
    pub redis_mode: String,
    #[serde(default = "default_redis_host")]
    pub redis_host: String,
    #[serde(default = "default_redis_port")]
    pub redis_port: u16,
    #[serde(default)]
    pub redis_password: Option<String>,
    #[serde(default)]
    pub redis_sentinel_host: Option<String>,
    #[serde(default = "default_redis_port")]
    pub redis_sentinel_port: u16,
    #[serde(default = "default_sentinel_name")]
    pub redis_sentinel_name: String,

    #[serde(default)]
    pub cors_origin: Option<String>,

    #[serde(default)]
    pub webhook_token: String,

    #[serde(default)]
    pub vapid_public_key: Option<String>,
    #[serde(default)]
    pub vapid_private_key: Option<String>,
    #[serde(default = "default_vapid_subject")]
    pub vapid_subject: String,

    #[serde(default)]
    pub telegram_bot_token: Option<String>,
    #[serde(default)]
    pub telegram_chat_id: Option<String>,

    #[serde(default = "default_node_env")]
    pub node_env: String,
}

fn default_port() -> u16 {
    3010
}
fn default_redis_mode() -> String {
    "standalone".into()
}
fn default_redis_host() -> String {
    "localhost".into()
}
fn default_redis_port() -> u16 {
    6379
}
fn default_sentinel_name() -> String {
    "mymaster".into()
}
fn default_vapid_subject() -> String {
    "mailto:admin@example.com".into()
}
fn default_node_env() -> String {
    "development".into()
}

impl AppConfig {
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .add_source(config::Environment::default().separator("__"))
            .build()?;

        let cfg: Self = config.try_deserialize().unwrap_or_else(|_| Self {
            port: default_port(),
            jwt_secret: String::new(),
            cookie_secret: None,
            redis_mode: default_redis_mode(),
            redis_host: default_redis_host(),
            redis_port: default_redis_port(),
            redis_password: None,
            redis_sentinel_host: None,
            redis_sentinel_port: default_redis_port(),
            redis_sentinel_name: default_sentinel_name(),
            cors_origin: None,
            webhook_token: String::new(),
            vapid_public_key: None,
            vapid_private_key: None,
            vapid_subject: default_vapid_subject(),
            telegram_bot_token: None,
            telegram_chat_id: None,
            node_env: default_node_env(),
        });

        cfg.check_fatal_conditions()?;
        Ok(cfg)
    }

    fn check_fatal_conditions(&self) -> anyhow::Result<()> {
        if self.jwt_secret.len() < 32 {
            anyhow::bail!(
                "JWT_SECRET is mandatory and must be at least 32 characters (got {})",
                self.jwt_secret.len()
            );
        }

        if self.webhook_token.is_empty() {
            anyhow::bail!("WEBHOOK_TOKEN is mandatory");
        }

        if self.is_production() && self.cors_origin.as_deref().unwrap_or("").is_empty() {
            anyhow::bail!("CORS_ORIGIN is mandatory in production");
        }

        Ok(())
    }

    pub fn is_production(&self) -> bool {
        self.node_env == "production"
    }

    pub fn cookie_secret(&self) -> &str {
        self.cookie_secret.as_deref().unwrap_or(&self.jwt_secret)
    }

    pub fn cors_origins(&self) -> Vec<String> {
        self.cors_origin
            .as_deref()
            .unwrap_or("")
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }

    pub fn vapid_configured(&self) -> bool {
        self.vapid_public_key.is_some() && self.vapid_private_key.is_some()
    }

    pub fn telegram_configured(&self) -> bool {
        self.telegram_bot_token.is_some() && self.telegram_chat_id.is_some()
    }
}
