#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::super::common;
    use crate::config::CrdtConfig;
    use crate::error::{GatewayError, StorageError};
    use crate::storage::{CrdtStorage, StorageBackend};
    use crate::test_utils;

    fn config(peers: Vec<String>) -> CrdtConfig {
        CrdtConfig {
            node_id: String::new(),
            bind_addr: "127.0.0.1:0".to_string(),
            peers,
            gossip_interval: Duration::from_millis(50),
        }
    }

    #[tokio::test]
    async fn test_crdt_single_replica_operations() {
        let crdt = CrdtStorage::open(config(vec![]), test_utils::shared_clock())
            .await
            .unwrap();
        assert!(crdt.node_id().starts_with("replaygate-"), "generated node id");
        assert_ne!(crdt.gossip_addr().port(), 0);

        common::test_basic_operations(&crdt).await.unwrap();
        common::test_pipeline_operations(&crdt).await.unwrap();

        let err = crdt.delete("test_counter").await.unwrap_err();
        assert!(matches!(
            err,
            GatewayError::Storage(StorageError::Unsupported(_))
        ));

        crdt.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_crdt_expiry_follows_virtual_clock() {
        let clock = test_utils::virtual_clock();
        let crdt = CrdtStorage::open(config(vec![]), clock.clone()).await.unwrap();

        crdt.increment("bucket", 3).await.unwrap();
        assert!(crdt.expire("bucket", Duration::from_secs(10)).await.unwrap());
        assert!(crdt.exists("bucket").await.unwrap());

        clock.advance(Duration::from_secs(11));
        assert!(!crdt.exists("bucket").await.unwrap());
        assert_eq!(crdt.increment("bucket", 1).await.unwrap(), 1);

        crdt.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_crdt_bad_bind_address_fails_open() {
        let bad = CrdtConfig {
            bind_addr: "definitely not an address".to_string(),
            ..config(vec![])
        };
        let err = CrdtStorage::open(bad, test_utils::shared_clock())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            GatewayError::Storage(StorageError::Replication(_))
        ));
    }

    // Counts converge once both replicas have gossiped
    #[tokio::test]
    async fn test_crdt_replicas_converge() {
        let first = CrdtStorage::open(config(vec![]), test_utils::shared_clock())
            .await
            .unwrap();
        let second = CrdtStorage::open(
            config(vec![first.gossip_addr().to_string()]),
            test_utils::shared_clock(),
        )
        .await
        .unwrap();

        first.increment("shared", 10).await.unwrap();
        second.increment("shared", 5).await.unwrap();

        let mut converged = false;
        for _ in 0..60 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            let a = first.get("shared").await.unwrap();
            let b = second.get("shared").await.unwrap();
            if a.as_deref() == Some(b"15".as_slice()) && b.as_deref() == Some(b"15".as_slice()) {
                converged = true;
                break;
            }
        }
        assert!(converged, "replicas did not converge on 15");

        first.close().await.unwrap();
        second.close().await.unwrap();
    }
}
