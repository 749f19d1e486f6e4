use crate::config::AppConfig;

/// Resolves the Redis connection URL the service should use, handling the
/// sentinel discovery case described in spec.md 4.2: the subscribe and
/// publish connections (and the inbox/push stores) all address a single
/// logical master, whose address may need to be resolved through a
/// sentinel group rather than read from a fixed host/port.
pub async fn resolve_redis_url(cfg: &AppConfig) -> anyhow::Result<String> {
    let auth = match &cfg.redis_password {
        Some(p) if !p.is_empty() => format!(":{p}@"),
        _ => String::new(),
    };

    match cfg.redis_mode.as_str() {
        "sentinel" => {
            let sentinel_host = cfg
                .redis_sentinel_host
                .as_deref()
                .ok_or_else(|| anyhow::anyhow!("REDIS_MODE=sentinel requires REDIS_SENTINEL_HOST"))?;

            let sentinel_url = format!("redis://{sentinel_host}:{}", cfg.redis_sentinel_port);
            let client = redis::Client::open(sentinel_url)?;
            let mut conn = client.get_multiplexed_async_connection().await?;

            let (master_host, master_port): (String, u16) = redis::cmd("SENTINEL")
                .arg("get-master-addr-by-name")
                .arg(&cfg.redis_sentinel_name)
                .query_async(&mut conn)
                .await?;

            tracing::info!(
                master_host = %master_host,
                master_port = master_port,
                "resolved redis master via sentinel"
            );

            Ok(format!("redis://{auth}{master_host}:{master_port}"))
        }
        _ => Ok(format!("redis://{auth}{}:{}", cfg.redis_host, cfg.redis_port)),
    }
}
