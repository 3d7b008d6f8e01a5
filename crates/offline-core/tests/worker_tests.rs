use async_trait::async_trait;
use bytes::Bytes;
use http::{Method, StatusCode};
use offline_core::{
    CacheConfig, CacheManager, ControlMessage, ControlReply, OfflineWorker, Partition,
    PeriodicSyncTag, ServedFrom, SyncTag, WorkerConfig, WorkerState,
};
use offline_proxy::{FetchRequest, FetchResponse, Fetcher, ProxyError};
use offline_storage::{CacheStorage, MemoryStorage, MemorySubmissionStore, SubmissionStore};
use parking_lot::Mutex;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

const ORIGIN: &str = "https://vulkanlabs.dev";

#[derive(Clone)]
enum Reply {
    Ok(StatusCode, &'static str),
    Delayed(Duration, &'static str),
    /// Answers 200 once, then behaves as offline
    Once(&'static str),
    Offline,
}

/// Network double answering from a table of scripted replies
#[derive(Default)]
struct ScriptedFetcher {
    replies: Mutex<HashMap<String, Reply>>,
    calls: Mutex<Vec<(Method, String)>>,
}

impl ScriptedFetcher {
    fn reply(&self, url: &str, reply: Reply) {
        self.replies.lock().insert(url.to_string(), reply);
    }

    fn ok(&self, url: &str, body: &'static str) {
        self.reply(url, Reply::Ok(StatusCode::OK, body));
    }

    fn go_offline(&self) {
        for reply in self.replies.lock().values_mut() {
            *reply = Reply::Offline;
        }
    }

    fn calls_to(&self, url: &str) -> usize {
        self.calls.lock().iter().filter(|(_, u)| u == url).count()
    }

    fn clear_calls(&self) {
        self.calls.lock().clear();
    }
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, ProxyError> {
        let url = request.url.to_string();
        self.calls.lock().push((request.method.clone(), url.clone()));

        let reply = {
            let mut replies = self.replies.lock();
            let reply = replies.get(&url).cloned().unwrap_or(Reply::Offline);
            if matches!(reply, Reply::Once(_)) {
                replies.insert(url.clone(), Reply::Offline);
            }
            reply
        };

        match reply {
            Reply::Ok(status, body) => Ok(FetchResponse::new(status, Bytes::from(body))),
            Reply::Delayed(delay, body) => {
                tokio::time::sleep(delay).await;
                Ok(FetchResponse::new(StatusCode::OK, Bytes::from(body)))
            }
            Reply::Once(body) => Ok(FetchResponse::new(StatusCode::OK, Bytes::from(body))),
            Reply::Offline => Err(ProxyError::Unavailable(url)),
        }
    }
}

struct Harness {
    worker: OfflineWorker,
    fetcher: Arc<ScriptedFetcher>,
    storage: Arc<MemoryStorage>,
    submissions: Arc<MemorySubmissionStore>,
}

fn url(path: &str) -> String {
    format!("{}{}", ORIGIN, path)
}

fn config() -> WorkerConfig {
    let mut config = WorkerConfig::for_origin(Url::parse(ORIGIN).unwrap());
    config.cache_prefix = "site".to_string();
    config.version = "v2".to_string();
    config.static_assets = vec!["/".to_string(), "/style.css".to_string(), "/404.html".to_string()];
    config.external_assets = vec!["https://cdn.example.com/lib.css".to_string()];
    config.critical_assets = vec!["/".to_string(), "/style.css".to_string()];
    config
}

fn harness_with(config: WorkerConfig, storage: Arc<MemoryStorage>) -> Harness {
    let fetcher = Arc::new(ScriptedFetcher::default());
    fetcher.ok(&url("/"), "home");
    fetcher.ok(&url("/style.css"), "body{}");
    fetcher.ok(&url("/404.html"), "offline page");
    fetcher.ok("https://cdn.example.com/lib.css", "lib");

    let submissions = Arc::new(MemorySubmissionStore::new());
    let cache = Arc::new(CacheManager::new(
        storage.clone(),
        config.partitions(),
        CacheConfig::default(),
    ));
    let worker = OfflineWorker::new(config, cache, fetcher.clone(), submissions.clone());

    Harness {
        worker,
        fetcher,
        storage,
        submissions,
    }
}

fn harness() -> Harness {
    harness_with(config(), Arc::new(MemoryStorage::new()))
}

async fn installed() -> Harness {
    let h = harness();
    h.worker.install().await.unwrap();
    h.fetcher.clear_calls();
    h
}

fn get(path_or_url: &str) -> FetchRequest {
    let target = if path_or_url.starts_with('/') {
        url(path_or_url)
    } else {
        path_or_url.to_string()
    };
    FetchRequest::get(Url::parse(&target).unwrap())
}

#[tokio::test]
async fn install_caches_manifest_and_activates() {
    let h = harness();
    let report = h.worker.install().await.unwrap();

    assert_eq!(report.cached.len(), 4);
    assert!(report.failed_external.is_empty());
    assert_eq!(h.worker.state().await, WorkerState::Active);
    assert!(h.worker.lifecycle().await.clients_claimed);

    let keys = h.storage.keys("site-v2").await.unwrap();
    assert!(keys.contains(&url("/style.css")));
    assert!(keys.contains(&"https://cdn.example.com/lib.css".to_string()));
}

#[tokio::test]
async fn install_tolerates_failing_external_assets() {
    let mut config = config();
    config.static_assets = ["/", "/style.css", "/script.js"].map(String::from).to_vec();
    let h = harness_with(config, Arc::new(MemoryStorage::new()));
    h.fetcher.ok(&url("/script.js"), "main()");
    h.fetcher.reply("https://cdn.example.com/lib.css", Reply::Offline);

    let report = h.worker.install().await.unwrap();
    assert_eq!(report.failed_external, vec!["https://cdn.example.com/lib.css"]);
    assert_eq!(h.worker.state().await, WorkerState::Active);

    let keys = h.storage.keys("site-v2").await.unwrap();
    assert!(!keys.contains(&"https://cdn.example.com/lib.css".to_string()));

    h.fetcher.go_offline();
    h.fetcher.clear_calls();
    for (path, body) in [("/", "home"), ("/style.css", "body{}"), ("/script.js", "main()")] {
        let served = h.worker.handle_fetch(get(path)).await.unwrap();
        assert_eq!(served.source, ServedFrom::Cache, "{}", path);
        assert_eq!(served.response.body, Bytes::from(body), "{}", path);
    }
    assert!(h.fetcher.calls.lock().is_empty());
}

#[tokio::test]
async fn install_is_all_or_nothing_for_manifest() {
    let h = harness();
    h.fetcher.reply(&url("/style.css"), Reply::Ok(StatusCode::NOT_FOUND, "missing"));

    assert!(h.worker.install().await.is_err());
    assert_eq!(h.worker.state().await, WorkerState::Redundant);
    assert!(h.storage.keys("site-v2").await.unwrap().is_empty());

    // A redundant worker passes everything through
    let served = h.worker.handle_fetch(get("/")).await.unwrap();
    assert_eq!(served.source, ServedFrom::Bypass);
}

#[tokio::test]
async fn waiting_worker_activates_on_skip_waiting() {
    let mut config = config();
    config.skip_waiting = false;
    let h = harness_with(config, Arc::new(MemoryStorage::new()));

    h.worker.install().await.unwrap();
    assert_eq!(h.worker.state().await, WorkerState::Waiting);

    let reply = h.worker.handle_message(ControlMessage::SkipWaiting).await;
    assert_eq!(reply, ControlReply::Ack);
    assert_eq!(h.worker.state().await, WorkerState::Active);

    // Second time is a no-op
    let reply = h.worker.handle_message(ControlMessage::SkipWaiting).await;
    assert_eq!(reply, ControlReply::Ack);
    assert_eq!(h.worker.state().await, WorkerState::Active);
}

#[tokio::test]
async fn activation_removes_other_versions() {
    let storage = Arc::new(MemoryStorage::new());
    storage.open_partition("site-v1").await.unwrap();
    storage.open_partition("site-dynamic-v1").await.unwrap();

    let h = harness_with(config(), storage.clone());
    h.worker.install().await.unwrap();

    assert_eq!(storage.partitions().await.unwrap(), vec!["site-v2"]);
}

#[tokio::test]
async fn cached_asset_is_served_without_network() {
    let h = installed().await;

    let served = h.worker.handle_fetch(get("/style.css")).await.unwrap();
    assert_eq!(served.source, ServedFrom::Cache);
    assert_eq!(served.response.body, Bytes::from_static(b"body{}"));
    assert_eq!(h.fetcher.calls_to(&url("/style.css")), 0);
}

#[tokio::test]
async fn cached_document_is_refreshed_in_background() {
    let h = installed().await;
    h.fetcher.ok(&url("/"), "home v2");

    let request = get("/").with_header("sec-fetch-dest", "document");
    let served = h.worker.handle_fetch(request).await.unwrap();
    assert_eq!(served.source, ServedFrom::Cache);
    assert_eq!(served.response.body, Bytes::from_static(b"home"));

    let storage = h.storage.clone();
    let key = url("/");
    for _ in 0..100 {
        let entry = storage.get("site-v2", &key).await.unwrap().unwrap();
        if entry.body == Bytes::from_static(b"home v2") {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("document was not refreshed");
}

#[tokio::test]
async fn miss_is_fetched_and_stored_in_dynamic() {
    let h = installed().await;
    h.fetcher.ok(&url("/about"), "about");

    let served = h.worker.handle_fetch(get("/about")).await.unwrap();
    assert_eq!(served.source, ServedFrom::Network);
    assert_eq!(
        h.storage.keys("site-dynamic-v2").await.unwrap(),
        vec![url("/about")]
    );

    let again = h.worker.handle_fetch(get("/about")).await.unwrap();
    assert_eq!(again.source, ServedFrom::Cache);
    assert_eq!(h.fetcher.calls_to(&url("/about")), 1);
}

#[tokio::test]
async fn non_ok_responses_are_not_cached() {
    let h = installed().await;
    h.fetcher.reply(&url("/gone"), Reply::Ok(StatusCode::NOT_FOUND, "nope"));

    let served = h.worker.handle_fetch(get("/gone")).await.unwrap();
    assert_eq!(served.response.status, StatusCode::NOT_FOUND);
    assert!(h.storage.keys("site-dynamic-v2").await.unwrap().is_empty());
}

#[tokio::test]
async fn offline_navigation_gets_offline_page() {
    let h = installed().await;
    h.fetcher.go_offline();

    let request = get("/never-visited").with_header("sec-fetch-dest", "document");
    let served = h.worker.handle_fetch(request).await.unwrap();
    assert_eq!(served.source, ServedFrom::Offline);
    assert_eq!(served.response.status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(served.response.body, Bytes::from_static(b"offline page"));

    let asset = h.worker.handle_fetch(get("/missing.js")).await.unwrap();
    assert_eq!(asset.response.status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(asset.response.body, Bytes::from_static(b"Offline"));
}

#[tokio::test]
async fn offline_navigation_without_cached_page_is_plain_text() {
    let h = installed().await;
    h.storage.delete("site-v2", &url("/404.html")).await.unwrap();
    h.fetcher.go_offline();

    let request = get("/never-visited").with_header("sec-fetch-dest", "document");
    let served = h.worker.handle_fetch(request).await.unwrap();
    assert_eq!(served.response.status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(served.response.body, Bytes::from_static(b"Offline"));
}

#[tokio::test(start_paused = true)]
async fn slow_font_falls_back_to_cache_after_timeout() {
    let h = installed().await;
    let font = "https://fonts.example.com/inter.woff2";
    h.fetcher.ok(font, "font v1");

    // Online: network wins and refreshes the static partition
    let served = h.worker.handle_fetch(get(font)).await.unwrap();
    assert_eq!(served.source, ServedFrom::Network);

    h.fetcher.reply(font, Reply::Delayed(Duration::from_secs(10), "font v2"));
    let started = tokio::time::Instant::now();
    let served = h.worker.handle_fetch(get(font)).await.unwrap();

    assert_eq!(served.source, ServedFrom::Cache);
    assert_eq!(served.response.body, Bytes::from_static(b"font v1"));
    assert!(started.elapsed() < Duration::from_secs(4));
}

#[tokio::test]
async fn stylesheet_failure_without_cache_is_unavailable() {
    let h = installed().await;
    let css = "https://cdn.example.com/theme.css";

    let served = h.worker.handle_fetch(get(css)).await.unwrap();
    assert_eq!(served.source, ServedFrom::Offline);
    assert_eq!(served.response.status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn cross_origin_images_degrade_to_empty_response() {
    let h = installed().await;
    let image = "https://images.example.com/hero.png";

    let served = h.worker.handle_fetch(get(image)).await.unwrap();
    assert_eq!(served.response.status, StatusCode::NO_CONTENT);
    assert!(served.response.body.is_empty());

    h.fetcher.ok(image, "png");
    let served = h.worker.handle_fetch(get(image)).await.unwrap();
    assert_eq!(served.source, ServedFrom::Network);
    assert!(h
        .storage
        .keys("site-dynamic-v2")
        .await
        .unwrap()
        .contains(&image.to_string()));
}

#[tokio::test]
async fn non_get_requests_bypass_cache() {
    let h = installed().await;
    h.fetcher.ok(&url("/api/contact"), "sent");

    let mut request = get("/api/contact");
    request.method = Method::POST;
    let served = h.worker.handle_fetch(request).await.unwrap();

    assert_eq!(served.source, ServedFrom::Bypass);
    assert!(h.storage.keys("site-dynamic-v2").await.unwrap().is_empty());
}

#[tokio::test]
async fn non_get_requests_skip_cached_copies() {
    let h = installed().await;
    h.fetcher.ok(&url("/style.css"), "body{color:blue}");

    for method in [Method::POST, Method::HEAD] {
        h.fetcher.clear_calls();
        let mut request = get("/style.css");
        request.method = method.clone();
        let served = h.worker.handle_fetch(request).await.unwrap();

        assert_eq!(served.source, ServedFrom::Bypass, "{}", method);
        assert_eq!(served.response.body, Bytes::from_static(b"body{color:blue}"));
        assert_eq!(h.fetcher.calls_to(&url("/style.css")), 1);
    }

    // The cached copy is untouched
    let entry = h.storage.get("site-v2", &url("/style.css")).await.unwrap().unwrap();
    assert_eq!(entry.body, Bytes::from_static(b"body{}"));
}

#[tokio::test]
async fn bypass_surfaces_network_errors() {
    let h = installed().await;
    let mut request = get("/api/contact");
    request.method = Method::POST;

    assert!(h.worker.handle_fetch(request).await.is_err());
}

#[tokio::test]
async fn cache_urls_prewarms_dynamic_partition() {
    let h = installed().await;
    h.fetcher.ok(&url("/blog"), "blog");
    h.fetcher.ok(&url("/team"), "team");

    let reply = h
        .worker
        .handle_message(ControlMessage::CacheUrls {
            urls: vec!["/blog".to_string(), "/team".to_string()],
        })
        .await;
    assert_eq!(reply, ControlReply::Cached { cached: 2 });

    h.fetcher.clear_calls();
    let served = h.worker.handle_fetch(get("/blog")).await.unwrap();
    assert_eq!(served.source, ServedFrom::Cache);
    assert_eq!(served.response.body, Bytes::from_static(b"blog"));
    assert_eq!(h.fetcher.calls_to(&url("/blog")), 0);
}

#[tokio::test]
async fn cache_urls_writes_nothing_when_any_fails() {
    let h = installed().await;
    h.fetcher.ok(&url("/blog"), "blog");

    let reply = h
        .worker
        .handle_message(ControlMessage::CacheUrls {
            urls: vec!["/blog".to_string(), "/down".to_string()],
        })
        .await;
    assert_eq!(reply, ControlReply::Cached { cached: 0 });
    assert!(h.storage.keys("site-dynamic-v2").await.unwrap().is_empty());
}

#[tokio::test]
async fn clear_cache_is_idempotent() {
    let h = installed().await;
    h.fetcher.ok(&url("/about"), "about");
    h.worker.handle_fetch(get("/about")).await.unwrap();

    for _ in 0..2 {
        let reply = h.worker.handle_message(ControlMessage::ClearCache).await;
        assert_eq!(reply, ControlReply::Ack);
        assert!(h.storage.keys("site-dynamic-v2").await.unwrap().is_empty());
    }
    assert!(!h.storage.keys("site-v2").await.unwrap().is_empty());
}

#[tokio::test]
async fn get_version_and_unknown_messages() {
    let h = installed().await;

    let reply = h.worker.handle_raw_message(json!({"type": "GET_VERSION"})).await;
    assert_eq!(
        reply,
        ControlReply::Version {
            version: "site-v2".to_string()
        }
    );

    let reply = h.worker.handle_raw_message(json!({"type": "SELF_DESTRUCT"})).await;
    assert!(matches!(reply, ControlReply::Ignored { .. }));

    let reply = h.worker.handle_raw_message(json!("not an object")).await;
    assert!(matches!(reply, ControlReply::Ignored { .. }));
}

#[tokio::test]
async fn eviction_only_touches_dynamic_entries() {
    let storage = Arc::new(MemoryStorage::new());
    let fetcher = Arc::new(ScriptedFetcher::default());
    let config = config();
    let cache = Arc::new(CacheManager::new(
        storage.clone(),
        config.partitions(),
        CacheConfig {
            max_size: 30,
            ..Default::default()
        },
    ));
    let worker = OfflineWorker::new(
        config,
        cache.clone(),
        fetcher.clone(),
        Arc::new(MemorySubmissionStore::new()),
    );

    for path in ["/", "/style.css", "/404.html"] {
        fetcher.ok(&url(path), "0123456789");
    }
    worker.install().await.unwrap();

    for i in 0..4 {
        let path = format!("/page{}", i);
        fetcher.ok(&url(&path), "0123456789");
        worker.handle_fetch(get(&path)).await.unwrap();
    }

    let report = cache.cleanup_if_needed().await.unwrap();
    assert_eq!(report.evicted, vec![url("/page0")]);
    assert_eq!(storage.keys("site-v2").await.unwrap().len(), 3);
    assert_eq!(cache.keys(Partition::Dynamic).await.unwrap().len(), 3);
}

#[tokio::test]
async fn contact_sync_keeps_failed_submissions() {
    let h = installed().await;
    h.worker
        .queue_submission(Some("first".to_string()), json!({"name": "Ada"}))
        .await
        .unwrap();
    h.worker
        .queue_submission(Some("second".to_string()), json!({"name": "Grace"}))
        .await
        .unwrap();

    // Succeeds once, then the network drops
    h.fetcher.reply(&url("/api/contact"), Reply::Once("ok"));
    let report = h.worker.sync(SyncTag::ContactForm).await.unwrap();

    assert_eq!(report.replayed, 1);
    assert_eq!(report.remaining, 1);

    let pending = h.submissions.list().await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, "second");
}

#[tokio::test]
async fn contact_sync_retries_everything_next_time() {
    let h = installed().await;
    h.worker.queue_submission(None, json!({"a": 1})).await.unwrap();
    h.worker.queue_submission(None, json!({"b": 2})).await.unwrap();

    let report = h.worker.sync(SyncTag::ContactForm).await.unwrap();
    assert_eq!(report.remaining, 2);

    h.fetcher.reply(&url("/api/contact"), Reply::Ok(StatusCode::CREATED, ""));
    let report = h.worker.sync(SyncTag::ContactForm).await.unwrap();
    assert_eq!(report.replayed, 2);
    assert!(h.worker.pending_submissions().await.unwrap().is_empty());
}

#[tokio::test]
async fn analytics_sync_is_a_noop() {
    let h = installed().await;
    let report = h.worker.sync(SyncTag::Analytics).await.unwrap();
    assert_eq!(report.tag, "analytics-sync");
    assert_eq!(report.replayed, 0);
    assert!(h.fetcher.calls.lock().is_empty());
}

#[tokio::test]
async fn periodic_sync_refreshes_critical_assets() {
    let h = installed().await;
    h.fetcher.ok(&url("/style.css"), "body{color:red}");
    h.fetcher.reply(&url("/"), Reply::Offline);

    let report = h.worker.periodic_sync(PeriodicSyncTag::CacheUpdate).await.unwrap();
    assert_eq!(report.refreshed, vec!["/style.css"]);
    assert_eq!(report.failed, vec!["/"]);

    let entry = h.storage.get("site-v2", &url("/style.css")).await.unwrap().unwrap();
    assert_eq!(entry.body, Bytes::from_static(b"body{color:red}"));
    let home = h.storage.get("site-v2", &url("/")).await.unwrap().unwrap();
    assert_eq!(home.body, Bytes::from_static(b"home"));
}

#[tokio::test]
async fn push_builds_notification_with_defaults() {
    let h = installed().await;

    let notification = h.worker.push_notification(Some(b"{}")).unwrap().unwrap();
    assert_eq!(notification.title, "Vulkan Labs");
    assert_eq!(notification.body, "New update from Vulkan Labs");
    assert_eq!(notification.tag, "site-notification");
    assert_eq!(notification.icon, "/icon-192x192.png");
    assert!(notification.renotify);
    let actions: Vec<_> = notification.actions.iter().map(|a| a.action.as_str()).collect();
    assert_eq!(actions, vec!["view", "dismiss"]);

    let payload = br#"{"title":"Launch","body":"We shipped","url":"/blog/launch"}"#;
    let notification = h.worker.push_notification(Some(payload)).unwrap().unwrap();
    assert_eq!(notification.title, "Launch");
    assert_eq!(notification.data["url"], "/blog/launch");

    assert!(h.worker.push_notification(None).unwrap().is_none());
    assert!(h.worker.push_notification(Some(b"not json")).is_err());
}

#[tokio::test]
async fn notification_click_opens_target() {
    let h = installed().await;

    assert_eq!(
        h.worker.notification_click("view", &json!({"url": "/blog"})),
        Some("/blog".to_string())
    );
    assert_eq!(h.worker.notification_click("view", &json!({})), Some("/".to_string()));
    assert_eq!(h.worker.notification_click("dismiss", &json!({"url": "/blog"})), None);
}

#[tokio::test]
async fn retired_worker_stops_intercepting() {
    let h = installed().await;
    h.worker.retire().await;

    assert_eq!(h.worker.state().await, WorkerState::Redundant);
    let served = h.worker.handle_fetch(get("/style.css")).await.unwrap();
    assert_eq!(served.source, ServedFrom::Bypass);
}
