//! Sentinel address resolution
//!
//! Sentinels are asked, one after the other, for the address of the current
//! master. The first sentinel that knows the master wins.

use crate::commands::Cmd;
use crate::connection::Connection;
use kvwire_core::{
    config::{ConnectionConfig, Endpoint, ProtocolVersion},
    error::{KvError, KvResult},
    value::WireValue,
};
use tracing::{debug, warn};

/// Find the master named `master_name` through `sentinels`
pub async fn resolve_master(
    master_name: &str,
    sentinels: &[Endpoint],
    config: &ConnectionConfig,
) -> KvResult<Endpoint> {
    if sentinels.is_empty() {
        return Err(KvError::Config("No sentinel endpoints configured".to_string()));
    }

    // Sentinels have no databases and need no client name
    let sentinel_config = ConnectionConfig {
        database: 0,
        client_name: None,
        protocol_version: ProtocolVersion::Resp2,
        ..config.clone()
    };

    let mut failures = Vec::new();
    for sentinel in sentinels {
        match query_sentinel(sentinel, master_name, &sentinel_config).await {
            Ok(Some(master)) => {
                debug!(sentinel = %sentinel, master = %master, "Sentinel reported master");
                return Ok(master);
            }
            Ok(None) => {
                debug!(sentinel = %sentinel, master = %master_name, "Sentinel does not know master");
                failures.push(format!("{sentinel}: unknown master"));
            }
            Err(e) => {
                warn!(sentinel = %sentinel, error = %e, "Sentinel query failed");
                failures.push(format!("{sentinel}: {e}"));
            }
        }
    }

    Err(KvError::Sentinel(format!(
        "No sentinel could resolve master '{master_name}' ({})",
        failures.join("; ")
    )))
}

async fn query_sentinel(
    sentinel: &Endpoint,
    master_name: &str,
    config: &ConnectionConfig,
) -> KvResult<Option<Endpoint>> {
    let (_connection, mut driver) = Connection::connect_endpoint(sentinel, config).await?;
    let cmd = Cmd::new("SENTINEL")
        .arg("GET-MASTER-ADDR-BY-NAME")
        .arg(master_name);
    let reply = tokio::time::timeout(config.connect_timeout, driver.roundtrip(&cmd))
        .await
        .map_err(|_| KvError::Timeout)??;
    parse_master_reply(reply)
}

fn parse_master_reply(reply: WireValue) -> KvResult<Option<Endpoint>> {
    let address: Option<(String, u16)> = reply.decode()?;
    Ok(address.map(|(host, port)| Endpoint::new(host, port)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_master_reply() {
        let reply = WireValue::Array(vec![WireValue::from("10.0.0.5"), WireValue::from("6380")]);
        assert_eq!(
            parse_master_reply(reply).unwrap(),
            Some(Endpoint::new("10.0.0.5", 6380))
        );
        assert_eq!(parse_master_reply(WireValue::Null).unwrap(), None);
    }

    #[test]
    fn test_parse_master_reply_rejects_bad_port() {
        let reply = WireValue::Array(vec![WireValue::from("host"), WireValue::from("99999")]);
        assert!(parse_master_reply(reply).is_err());
    }

    #[tokio::test]
    async fn test_no_sentinels_is_config_error() {
        let err = resolve_master("mymaster", &[], &ConnectionConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, KvError::Config(_)));
    }
}
