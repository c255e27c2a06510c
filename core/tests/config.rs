//! Integration tests for loading worker configuration from disk

use chorus_core::{AllreduceAlgorithm, ChorusConfig, ChorusError};
use std::io::Write;
use tempfile::NamedTempFile;

#[test]
fn test_load_from_file() {
    let mut file = NamedTempFile::new().unwrap();
    write!(
        file,
        r#"{{
            "group": {{
                "rank": 1,
                "size": 2,
                "peers": ["127.0.0.1:7000", "127.0.0.1:7001"]
            }},
            "transport": {{ "connect_retries": 5 }},
            "scheduler": {{ "num_threads": 8 }},
            "collective": {{ "broadcast_barrier": false }}
        }}"#
    )
    .unwrap();

    let config = ChorusConfig::from_file(file.path()).unwrap();
    assert_eq!(config.group.rank, 1);
    assert_eq!(config.group.peers.len(), 2);
    assert_eq!(config.transport.connect_retries, 5);
    assert_eq!(config.transport.retry_interval_ms, 200);
    assert_eq!(config.scheduler.num_threads, 8);
    assert!(!config.collective.broadcast_barrier);
    assert_eq!(
        config.collective.allreduce,
        AllreduceAlgorithm::RegroupAllgather
    );

    let membership = config.membership().unwrap();
    assert_eq!(membership.left(), 0);
    assert!(!membership.is_leader());
}

#[test]
fn test_invalid_file_contents() {
    let mut file = NamedTempFile::new().unwrap();
    write!(file, r#"{{ "group": {{ "rank": 4, "size": 2 }} }}"#).unwrap();
    let err = ChorusConfig::from_file(file.path()).unwrap_err();
    assert!(matches!(err, ChorusError::Configuration { .. }));

    let mut file = NamedTempFile::new().unwrap();
    write!(file, r#"{{ "scheduler": {{ "num_threads": 0 }} }}"#).unwrap();
    assert!(ChorusConfig::from_file(file.path()).is_err());
}

#[test]
fn test_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let err = ChorusConfig::from_file(dir.path().join("absent.json")).unwrap_err();
    assert!(matches!(err, ChorusError::Configuration { .. }));
}
