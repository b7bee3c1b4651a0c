use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::routing::get;
use axum::Router;
use tiercache_test::{setup, tempdir, Server};
use tokio::sync::oneshot;

use crate::fetch::{FailureFn, SuccessFn};
use crate::*;

fn test_config(root: &Path) -> Config {
    Config {
        cache_root: root.to_path_buf(),
        ..Default::default()
    }
}

/// Awaits a [`Fetch`] resolution as a future.
async fn resolve<T: Clone + Send + 'static>(fetch: Fetch<T>) -> CacheContents<T> {
    let (tx, rx) = oneshot::channel();
    let tx = Arc::new(Mutex::new(Some(tx)));
    let tx2 = Arc::clone(&tx);
    let _fetch = fetch
        .on_success(move |value| {
            if let Some(tx) = tx.lock().unwrap().take() {
                let _ = tx.send(Ok(value));
            }
        })
        .on_failure(move |error| {
            if let Some(tx) = tx2.lock().unwrap().take() {
                let _ = tx.send(Err(error));
            }
        });
    tokio::time::timeout(Duration::from_secs(10), rx)
        .await
        .expect("fetch did not resolve")
        .expect("fetch dropped unresolved")
}

/// Waits until the disk queue of `format_name` has drained.
async fn drain_disk(cache: &Cache<Vec<u8>>, format_name: &str) -> u64 {
    cache.entry(format_name).unwrap().disk.size().await
}

#[tokio::test]
async fn test_set_then_fetch_is_synchronous_memory_hit() {
    setup();
    let tempdir = tempdir();
    let cache = Cache::<Vec<u8>>::new("e2e", test_config(tempdir.path()));

    cache.set(vec![7; 5], "k", ORIGINAL_FORMAT, None);

    let fetch = cache.fetch("k", ORIGINAL_FORMAT);
    assert!(fetch.has_succeeded());
    assert_eq!(resolve(fetch).await.unwrap(), vec![7; 5]);
}

#[tokio::test]
async fn test_fetch_falls_back_to_disk_after_memory_pressure() {
    setup();
    let tempdir = tempdir();
    let cache = Cache::<Vec<u8>>::new("e2e", test_config(tempdir.path()));

    cache.set(vec![7; 5], "k", ORIGINAL_FORMAT, None);
    drain_disk(&cache, ORIGINAL_FORMAT).await;

    cache.on_low_memory_signal();

    let fetch = cache.fetch("k", ORIGINAL_FORMAT);
    // not a memory hit anymore, the disk read is asynchronous
    assert!(!fetch.has_succeeded());
    assert_eq!(resolve(fetch).await.unwrap(), vec![7; 5]);

    // and the memory tier is populated again
    assert!(cache.fetch("k", ORIGINAL_FORMAT).has_succeeded());
}

#[tokio::test]
async fn test_zero_capacity_format_retains_nothing() {
    setup();
    let tempdir = tempdir();
    let cache = Cache::<Vec<u8>>::new("e2e", test_config(tempdir.path()));
    cache.add_format(Format::new("thumb").with_disk_capacity(0));

    cache.set(vec![1; 10], "k", "thumb", None);
    assert_eq!(drain_disk(&cache, "thumb").await, 0);

    cache.on_low_memory_signal();

    assert_eq!(
        resolve(cache.fetch("k", "thumb")).await,
        Err(CacheError::ObjectNotFound("k".into()))
    );
}

#[tokio::test]
async fn test_formats_are_isolated() {
    setup();
    let tempdir = tempdir();
    let cache = Cache::<Vec<u8>>::new("e2e", test_config(tempdir.path()));
    cache.add_format(Format::new("a"));
    cache.add_format(Format::new("b"));

    cache.set(vec![1, 2, 3], "k", "a", None);
    drain_disk(&cache, "a").await;

    assert_eq!(
        resolve(cache.fetch("k", "b")).await,
        Err(CacheError::ObjectNotFound("k".into()))
    );
    assert_eq!(resolve(cache.fetch("k", "a")).await.unwrap(), vec![1, 2, 3]);
}

#[tokio::test]
async fn test_unknown_format_fails_synchronously() {
    setup();
    let tempdir = tempdir();
    let cache = Cache::<Vec<u8>>::new("e2e", test_config(tempdir.path()));

    let fetch = cache.fetch("k", "nope");
    assert!(fetch.has_failed());
    assert_eq!(
        resolve(fetch).await,
        Err(CacheError::FormatNotFound("nope".into()))
    );
}

#[tokio::test]
#[should_panic(expected = "is not registered")]
async fn test_set_against_unknown_format_panics() {
    setup();
    let tempdir = tempdir();
    let cache = Cache::<Vec<u8>>::new("e2e", test_config(tempdir.path()));
    cache.set(vec![1], "k", "nope", None);
}

#[tokio::test]
async fn test_readding_a_format_keeps_existing_entries() {
    setup();
    let tempdir = tempdir();
    let cache = Cache::<Vec<u8>>::new("e2e", test_config(tempdir.path()));
    cache.add_format(Format::new("thumb"));
    cache.set(vec![1], "k", "thumb", None);

    cache.add_format(Format::new("thumb").with_disk_capacity(0));

    assert_eq!(resolve(cache.fetch("k", "thumb")).await.unwrap(), vec![1]);
    assert_eq!(cache.entry("thumb").unwrap().disk.capacity(), u64::MAX);
}

#[tokio::test]
async fn test_transform_pipeline() {
    setup();
    let tempdir = tempdir();
    let config = Config {
        cache_root: tempdir.path().to_path_buf(),
        ..Default::default()
    };
    let cache = Cache::<String>::new("e2e", config);
    cache.add_format(Format::new("upper").with_transform(|v: String| v.to_uppercase()));

    let (tx, rx) = oneshot::channel();
    let on_complete: SuccessFn<String> = Box::new(move |value| {
        tx.send(value).unwrap();
    });
    cache.set("hello".to_string(), "k", "upper", Some(on_complete));

    assert_eq!(rx.await.unwrap(), "HELLO");
    // the transformed value is what both tiers hold
    assert_eq!(resolve(cache.fetch("k", "upper")).await.unwrap(), "HELLO");

    cache.entry("upper").unwrap().disk.size().await;
    cache.on_low_memory_signal();
    assert_eq!(resolve(cache.fetch("k", "upper")).await.unwrap(), "HELLO");
}

/// A value whose expensive decoding step is modeled by a flag: `decode`
/// always yields a raw value, and only the format's prepare hook makes
/// it eager.
#[derive(Clone, Debug, PartialEq)]
struct Eager {
    body: String,
    ready: bool,
}

impl CacheValue for Eager {
    fn decode(bytes: &[u8]) -> Option<Self> {
        Some(Eager {
            body: String::decode(bytes)?,
            ready: false,
        })
    }

    fn encode(&self) -> Option<Vec<u8>> {
        self.body.encode()
    }
}

#[tokio::test]
async fn test_prepare_runs_for_values_read_from_disk() {
    setup();
    let tempdir = tempdir();
    let cache = Cache::<Eager>::new("e2e", test_config(tempdir.path()));
    cache.add_format(Format::new("eager").with_prepare(|mut v: Eager| {
        v.ready = true;
        v
    }));

    let raw = Eager {
        body: "pixels".into(),
        ready: false,
    };
    cache.set(raw, "k", "eager", None);

    // the memory tier holds the prepared value
    let value = resolve(cache.fetch("k", "eager")).await.unwrap();
    assert!(value.ready);

    // so does a value rebuilt from disk bytes
    cache.entry("eager").unwrap().disk.size().await;
    cache.on_low_memory_signal();
    let value = resolve(cache.fetch("k", "eager")).await.unwrap();
    assert_eq!(value.body, "pixels");
    assert!(value.ready);

    // and a memory hit right after still sees it prepared
    let value = resolve(cache.fetch("k", "eager")).await.unwrap();
    assert!(value.ready);
}

#[tokio::test]
async fn test_encode_override_controls_disk_bytes() {
    setup();
    let tempdir = tempdir();
    let config = Config {
        cache_root: tempdir.path().to_path_buf(),
        ..Default::default()
    };
    let cache = Cache::<String>::new("e2e", config.clone());
    cache.add_format(Format::new("fixed").with_encode(|_: &String| Some(b"override".to_vec())));

    cache.set("whatever".to_string(), "k", "fixed", None);
    cache.entry("fixed").unwrap().disk.size().await;

    let path = config.format_dir("e2e", "fixed").join(filename_for_key("k"));
    assert_eq!(std::fs::read(path).unwrap(), b"override");
}

#[tokio::test]
async fn test_corrupt_disk_entry_is_invalid_data() {
    setup();
    let tempdir = tempdir();
    let config = Config {
        cache_root: tempdir.path().to_path_buf(),
        ..Default::default()
    };
    let cache = Cache::<String>::new("e2e", config.clone());

    cache.set("valid".to_string(), "k", ORIGINAL_FORMAT, None);
    cache.entry(ORIGINAL_FORMAT).unwrap().disk.size().await;

    // corrupt the stored bytes behind the cache's back
    let path = config
        .format_dir("e2e", ORIGINAL_FORMAT)
        .join(filename_for_key("k"));
    std::fs::write(path, [0xff, 0xfe]).unwrap();

    cache.on_low_memory_signal();
    assert_eq!(
        resolve(cache.fetch("k", ORIGINAL_FORMAT)).await,
        Err(CacheError::InvalidData)
    );
}

struct CountingFetcher {
    key: String,
    value: Vec<u8>,
    calls: Arc<AtomicUsize>,
}

impl Fetcher<Vec<u8>> for CountingFetcher {
    fn key(&self) -> &str {
        &self.key
    }

    fn fetch(&self, _on_failure: FailureFn, on_success: SuccessFn<Vec<u8>>) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        on_success(self.value.clone());
    }
}

struct FailingFetcher {
    key: String,
}

impl Fetcher<Vec<u8>> for FailingFetcher {
    fn key(&self) -> &str {
        &self.key
    }

    fn fetch(&self, on_failure: FailureFn, _on_success: SuccessFn<Vec<u8>>) {
        on_failure(CacheError::Download("boom".into()));
    }
}

#[tokio::test]
async fn test_fetcher_populates_both_tiers_on_miss() {
    setup();
    let tempdir = tempdir();
    let cache = Cache::<Vec<u8>>::new("e2e", test_config(tempdir.path()));

    let calls = Arc::new(AtomicUsize::new(0));
    let fetcher = Arc::new(CountingFetcher {
        key: "k".into(),
        value: vec![9, 9, 9],
        calls: calls.clone(),
    });

    let value = resolve(cache.fetch_from(fetcher.clone(), ORIGINAL_FORMAT))
        .await
        .unwrap();
    assert_eq!(value, vec![9, 9, 9]);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // now a memory hit, the fetcher is not consulted again
    let fetch = cache.fetch_from(fetcher, ORIGINAL_FORMAT);
    assert!(fetch.has_succeeded());
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // and the disk tier has the bytes too
    drain_disk(&cache, ORIGINAL_FORMAT).await;
    cache.on_low_memory_signal();
    assert_eq!(
        resolve(cache.fetch("k", ORIGINAL_FORMAT)).await.unwrap(),
        vec![9, 9, 9]
    );
}

#[tokio::test]
async fn test_concurrent_misses_are_not_coalesced() {
    setup();
    let tempdir = tempdir();
    let cache = Cache::<Vec<u8>>::new("e2e", test_config(tempdir.path()));

    let calls = Arc::new(AtomicUsize::new(0));
    let fetcher = Arc::new(CountingFetcher {
        key: "k".into(),
        value: vec![1],
        calls: calls.clone(),
    });

    // both lookups miss the memory tier before either result lands
    let first = cache.fetch_from(fetcher.clone(), ORIGINAL_FORMAT);
    let second = cache.fetch_from(fetcher, ORIGINAL_FORMAT);

    assert_eq!(resolve(first).await.unwrap(), vec![1]);
    assert_eq!(resolve(second).await.unwrap(), vec![1]);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_fetcher_failure_propagates() {
    setup();
    let tempdir = tempdir();
    let cache = Cache::<Vec<u8>>::new("e2e", test_config(tempdir.path()));

    let fetcher = Arc::new(FailingFetcher { key: "k".into() });
    assert_eq!(
        resolve(cache.fetch_from(fetcher, ORIGINAL_FORMAT)).await,
        Err(CacheError::Download("boom".into()))
    );
}

#[tokio::test]
async fn test_fetcher_is_not_invoked_for_unknown_format() {
    setup();
    let tempdir = tempdir();
    let cache = Cache::<Vec<u8>>::new("e2e", test_config(tempdir.path()));

    let calls = Arc::new(AtomicUsize::new(0));
    let fetcher = Arc::new(CountingFetcher {
        key: "k".into(),
        value: vec![1],
        calls: calls.clone(),
    });

    assert_eq!(
        resolve(cache.fetch_from(fetcher, "nope")).await,
        Err(CacheError::FormatNotFound("nope".into()))
    );
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_remove_is_per_format() {
    setup();
    let tempdir = tempdir();
    let cache = Cache::<Vec<u8>>::new("e2e", test_config(tempdir.path()));
    cache.add_format(Format::new("other"));

    cache.set(vec![1], "k", ORIGINAL_FORMAT, None);
    cache.set(vec![2], "k", "other", None);
    drain_disk(&cache, ORIGINAL_FORMAT).await;
    drain_disk(&cache, "other").await;

    cache.remove("k", ORIGINAL_FORMAT);

    // removal runs in the background
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let entry = cache.entry(ORIGINAL_FORMAT).unwrap();
            if entry.memory.get("k").is_none() && !entry.disk.contains_key("k").await {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    assert_eq!(
        resolve(cache.fetch("k", ORIGINAL_FORMAT)).await,
        Err(CacheError::ObjectNotFound("k".into()))
    );
    assert_eq!(resolve(cache.fetch("k", "other")).await.unwrap(), vec![2]);
}

#[tokio::test]
async fn test_remove_all_for_key_spans_formats() {
    setup();
    let tempdir = tempdir();
    let cache = Cache::<Vec<u8>>::new("e2e", test_config(tempdir.path()));
    cache.add_format(Format::new("thumb"));

    cache.set(vec![1], "k", ORIGINAL_FORMAT, None);
    cache.set(vec![2], "k", "thumb", None);
    cache.set(vec![3], "other", ORIGINAL_FORMAT, None);
    drain_disk(&cache, ORIGINAL_FORMAT).await;
    drain_disk(&cache, "thumb").await;

    cache.remove_all_for_key("k").await;

    assert_eq!(
        resolve(cache.fetch("k", ORIGINAL_FORMAT)).await,
        Err(CacheError::ObjectNotFound("k".into()))
    );
    assert_eq!(
        resolve(cache.fetch("k", "thumb")).await,
        Err(CacheError::ObjectNotFound("k".into()))
    );
    assert_eq!(
        resolve(cache.fetch("other", ORIGINAL_FORMAT)).await.unwrap(),
        vec![3]
    );
}

#[tokio::test]
async fn test_remove_all_deletes_the_directory_tree() {
    setup();
    let tempdir = tempdir();
    let config = test_config(tempdir.path());
    let cache = Cache::<Vec<u8>>::new("e2e", config.clone());
    cache.add_format(Format::new("thumb"));

    cache.set(vec![1], "a", ORIGINAL_FORMAT, None);
    cache.set(vec![2], "b", "thumb", None);
    drain_disk(&cache, ORIGINAL_FORMAT).await;
    drain_disk(&cache, "thumb").await;

    cache.remove_all().await;

    assert!(!config.cache_dir("e2e").exists());
    assert_eq!(
        resolve(cache.fetch("a", ORIGINAL_FORMAT)).await,
        Err(CacheError::ObjectNotFound("a".into()))
    );

    // the cache stays usable, directories are re-created on write
    cache.set(vec![9], "a", ORIGINAL_FORMAT, None);
    drain_disk(&cache, ORIGINAL_FORMAT).await;
    cache.on_low_memory_signal();
    assert_eq!(
        resolve(cache.fetch("a", ORIGINAL_FORMAT)).await.unwrap(),
        vec![9]
    );
}

#[tokio::test]
async fn test_network_fetcher_roundtrip() {
    setup();
    let tempdir = tempdir();
    let cache = Cache::<String>::new(
        "net",
        Config {
            cache_root: tempdir.path().to_path_buf(),
            ..Default::default()
        },
    );

    let router = Router::new().route("/hello.txt", get(|| async { "hello world" }));
    let server = Server::with_router(router).await;

    let url: url::Url = server.url("/hello.txt").parse().unwrap();
    let fetcher = Arc::new(NetworkFetcher::<String>::new(reqwest::Client::new(), url));

    let value = resolve(cache.fetch_from(fetcher, ORIGINAL_FORMAT))
        .await
        .unwrap();
    assert_eq!(value, "hello world");

    // cached under the URL key now
    let fetch = cache.fetch(&server.url("/hello.txt"), ORIGINAL_FORMAT);
    assert!(fetch.has_succeeded());
}

#[tokio::test]
async fn test_network_fetcher_maps_status_codes() {
    setup();
    let router = Router::new().route(
        "/missing",
        get(|| async { axum::http::StatusCode::NOT_FOUND }),
    );
    let server = Server::with_router(router).await;

    let url: url::Url = server.url("/missing").parse().unwrap();
    let fetcher = NetworkFetcher::<Vec<u8>>::new(reqwest::Client::new(), url);

    let (tx, rx) = oneshot::channel();
    fetcher.fetch(
        Box::new(move |error| {
            tx.send(error).unwrap();
        }),
        Box::new(|_| panic!("unexpected success")),
    );
    assert_eq!(rx.await.unwrap(), CacheError::InvalidStatusCode(404));
}

#[tokio::test]
async fn test_network_fetcher_detects_short_body() {
    setup();
    let server = Server::with_truncated_body(b"abc".to_vec(), 10).await;

    let url: url::Url = server.url("/file").parse().unwrap();
    let fetcher = NetworkFetcher::<Vec<u8>>::new(reqwest::Client::new(), url);

    let (tx, rx) = oneshot::channel();
    fetcher.fetch(
        Box::new(move |error| {
            tx.send(error).unwrap();
        }),
        Box::new(|_| panic!("unexpected success")),
    );
    assert_eq!(
        rx.await.unwrap(),
        CacheError::MissingData {
            expected: 10,
            received: 3,
        }
    );
}

#[tokio::test]
async fn test_network_fetcher_cancel_suppresses_callbacks() {
    setup();
    let router = Router::new().route(
        "/slow",
        get(|| async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            "late"
        }),
    );
    let server = Server::with_router(router).await;

    let url: url::Url = server.url("/slow").parse().unwrap();
    let fetcher = NetworkFetcher::<String>::new(reqwest::Client::new(), url);

    fetcher.fetch(
        Box::new(|_| panic!("cancelled fetch must not fail")),
        Box::new(|_| panic!("cancelled fetch must not succeed")),
    );
    fetcher.cancel();

    tokio::time::sleep(Duration::from_millis(400)).await;
}

#[tokio::test]
async fn test_memory_hit_refreshes_disk_access_time() {
    setup();
    let tempdir = tempdir();
    let config = test_config(tempdir.path());
    let cache = Cache::<Vec<u8>>::new("e2e", config.clone());

    cache.set(vec![1], "k", ORIGINAL_FORMAT, None);
    drain_disk(&cache, ORIGINAL_FORMAT).await;

    let path = config
        .format_dir("e2e", ORIGINAL_FORMAT)
        .join(filename_for_key("k"));
    let old = filetime::FileTime::from_unix_time(1_000_000, 0);
    filetime::set_file_mtime(&path, old).unwrap();

    // a memory hit schedules an access-time refresh on disk
    assert!(cache.fetch("k", ORIGINAL_FORMAT).has_succeeded());
    drain_disk(&cache, ORIGINAL_FORMAT).await;

    let mtime =
        filetime::FileTime::from_last_modification_time(&path.metadata().unwrap());
    assert!(mtime > old);
}

#[tokio::test]
async fn test_memory_hit_restores_an_evicted_disk_entry() {
    setup();
    let tempdir = tempdir();
    let config = test_config(tempdir.path());
    let cache = Cache::<Vec<u8>>::new("e2e", config.clone());

    cache.set(vec![1, 2], "k", ORIGINAL_FORMAT, None);
    drain_disk(&cache, ORIGINAL_FORMAT).await;

    // drop the disk entry behind the cache's back
    let path = config
        .format_dir("e2e", ORIGINAL_FORMAT)
        .join(filename_for_key("k"));
    std::fs::remove_file(path).unwrap();

    // the lazy-bytes fallback re-writes it on the next memory hit
    assert!(cache.fetch("k", ORIGINAL_FORMAT).has_succeeded());
    let entry = cache.entry(ORIGINAL_FORMAT).unwrap();
    entry.disk.size().await;
    assert!(entry.disk.contains_key("k").await);
}
