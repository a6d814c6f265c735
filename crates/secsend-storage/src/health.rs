//! Reachability probe for the transfer store

use anyhow::{anyhow, Result};
use opendal::{ErrorKind, Operator};
use tracing::debug;

/// List the transfer prefix. An empty store without the prefix yet is healthy.
pub async fn check_health(op: &Operator, prefix: &str) -> Result<()> {
    let dir = format!("{}/", prefix.trim_end_matches('/'));
    match op.list(&dir).await {
        Ok(entries) => {
            debug!(prefix = %dir, entries = entries.len(), "transfer store reachable");
            Ok(())
        }
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(anyhow!("transfer store at '{dir}' unreachable: {e}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory() -> Operator {
        Operator::new(opendal::services::Memory::default())
            .unwrap()
            .finish()
    }

    #[test]
    fn test_empty_store_is_healthy() {
        let op = memory();
        tokio_test::block_on(check_health(&op, "transfers")).unwrap();
    }

    #[test]
    fn test_populated_prefix_is_healthy() {
        let op = memory();
        tokio_test::block_on(async {
            op.write("transfers/abc.metadata", "{}").await.unwrap();
            check_health(&op, "transfers/").await.unwrap();
        });
    }
}
