mod common;

use std::sync::Arc;
use std::time::Duration;

use common::*;
use eventgraph_core::store::KvStore;
use eventgraph_core::{ShutdownSignal, SourceKind};

#[tokio::test]
async fn test_io_error_streak_reconnects_and_processing_resumes() {
    let mut config = test_config();
    config.processor.io_error_threshold = 3;
    config.processor.reconnect_backoff_ms = 10;
    let h = Harness::with_config(config);
    let processor = Arc::new(h.processor(SourceKind::News));

    h.ingress
        .submit_live(SourceKind::News, "z1", &news_payload("z1", &["AAPL"]))
        .await
        .unwrap();
    h.store.inject_connection_failures(3);

    let shutdown = ShutdownSignal::new();
    let worker = {
        let processor = Arc::clone(&processor);
        let shutdown = shutdown.clone();
        tokio::spawn(async move { processor.run(shutdown).await })
    };

    let mut processed = false;
    for _ in 0..200 {
        if h.store.exists("news:live:processed:z1").await.unwrap() {
            processed = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    shutdown.trigger();
    worker.await.unwrap();

    assert!(processed);
    assert_eq!(h.store.reconnect_count(), 1);
    assert!(!h.store.exists("news:live:raw:z1").await.unwrap());
}

#[tokio::test]
async fn test_short_io_error_streak_does_not_reconnect() {
    let mut config = test_config();
    config.processor.io_error_threshold = 3;
    config.processor.reconnect_backoff_ms = 10;
    let h = Harness::with_config(config);
    let processor = h.processor(SourceKind::News);

    h.ingress
        .submit_live(SourceKind::News, "z2", &news_payload("z2", &["MSFT"]))
        .await
        .unwrap();
    h.store.inject_connection_failures(2);

    assert!(processor.process_next().await.is_err());
    assert!(processor.process_next().await.is_err());
    processor.process_next().await.unwrap();

    assert_eq!(h.store.reconnect_count(), 0);
    assert!(h.store.exists("news:live:processed:z2").await.unwrap());
}
