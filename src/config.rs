use std::{env, net::SocketAddr};

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub bind_addr: SocketAddr,
}

impl AppConfig {
    /// Read configuration from the environment. `DATABASE_URL` is required;
    /// `MARKET_BIND_ADDR` defaults to a local listener.
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = env::var("DATABASE_URL")?;
        let bind_addr = env::var("MARKET_BIND_ADDR")
            .unwrap_or_else(|_| "127.0.0.1:3000".to_string())
            .parse::<SocketAddr>()?;
        Ok(Self {
            database_url,
            bind_addr,
        })
    }
}
