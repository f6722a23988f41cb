//! End-to-end: origin server ← HttpFetcher ← Worker/Proxy ← Server ← client,
//! all over real TCP on loopback, with a durable store.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cacheroute::cache::{CacheStore, FsCacheStore, RequestKey};
use cacheroute::clock::SystemClock;
use cacheroute::config::ServerConfig;
use cacheroute::fetch::{Fetch, FetchRequest, HttpFetcher};
use cacheroute::lifecycle::{Phase, Worker, WorkerSettings};
use cacheroute::proxy::{CACHE_HEADER, Proxy};
use cacheroute::router::RouteTable;
use cacheroute::server::Server;
use cacheroute::{Method, Request, Response, StatusCode};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

type Hits = Arc<Mutex<HashMap<String, usize>>>;

struct Origin {
    addr: SocketAddr,
    hits: Hits,
    stop: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl Origin {
    async fn start() -> Self {
        let server = Server::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr();
        let hits: Hits = Arc::default();
        let (stop, stopped) = oneshot::channel::<()>();

        let log = Arc::clone(&hits);
        let task = tokio::spawn(async move {
            server
                .run_until(
                    move |req: Request| {
                        let log = Arc::clone(&log);
                        async move {
                            *log.lock().unwrap().entry(req.target()).or_default() += 1;
                            let response = match req.path() {
                                "/missing.png" => Response::new(StatusCode::NotFound),
                                path => Response::new(StatusCode::Ok).body(format!("origin {path}")),
                            };
                            // No pooled connections survive shutdown.
                            response.keep_alive(false)
                        }
                    },
                    async {
                        let _ = stopped.await;
                    },
                )
                .await
                .unwrap();
        });

        Self {
            addr,
            hits,
            stop,
            task,
        }
    }

    fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    fn hits(&self, target: &str) -> usize {
        self.hits.lock().unwrap().get(target).copied().unwrap_or(0)
    }

    async fn shut_down(self) {
        self.stop.send(()).unwrap();
        self.task.await.unwrap();
    }
}

fn scratch_dir() -> PathBuf {
    std::env::temp_dir().join(format!("cacheroute-it-{}", uuid::Uuid::new_v4()))
}

async fn start_proxy(worker: Arc<Worker>) -> SocketAddr {
    let proxy = Proxy::new(worker, &ServerConfig::default());
    let server = Server::bind("127.0.0.1:0").await.unwrap();
    let addr = server.local_addr();
    tokio::spawn(server.run(move |req| {
        let proxy = proxy.clone();
        async move { proxy.respond(req).await }
    }));
    addr
}

async fn get(client: &HttpFetcher, proxy: SocketAddr, target: &str) -> Response {
    client
        .fetch(&FetchRequest::get(format!("http://{proxy}{target}")))
        .await
        .unwrap()
}

fn cache_header(response: &Response) -> Option<&str> {
    response.headers().get(CACHE_HEADER)
}

#[tokio::test]
async fn proxy_caches_survives_origin_outage_and_clears_on_command() {
    let origin = Origin::start().await;
    let dir = scratch_dir();
    let store = Arc::new(FsCacheStore::open(&dir, None).await.unwrap());
    let client = HttpFetcher::new().timeout(Duration::from_secs(5));

    let mut settings = WorkerSettings::new(origin.url(), "v1");
    settings.skip_waiting = true;
    let worker = Arc::new(Worker::new(
        settings,
        RouteTable::builtin(),
        store.clone(),
        Arc::new(HttpFetcher::new().timeout(Duration::from_secs(5))),
        Arc::new(SystemClock),
    ));
    worker.install().await.unwrap();
    assert_eq!(worker.phase().await, Phase::Active);
    assert_eq!(origin.hits("/index.html"), 1);

    let proxy = start_proxy(Arc::clone(&worker)).await;

    // cache-first: second request never reaches the origin.
    let first = get(&client, proxy, "/fonts/inter.woff2").await;
    assert_eq!(first.status(), StatusCode::Ok);
    assert_eq!(cache_header(&first), Some("miss"));
    let second = get(&client, proxy, "/fonts/inter.woff2").await;
    assert_eq!(cache_header(&second), Some("hit"));
    assert_eq!(second.body_ref().as_ref(), b"origin /fonts/inter.woff2");
    assert_eq!(origin.hits("/fonts/inter.woff2"), 1);

    // Non-2xx responses pass through and are not cached.
    let missing = get(&client, proxy, "/missing.png").await;
    assert_eq!(missing.status(), StatusCode::NotFound);
    get(&client, proxy, "/missing.png").await;
    assert_eq!(origin.hits("/missing.png"), 2);

    // Non-GET goes straight through.
    let post = client
        .fetch(
            &FetchRequest::new(Method::Post, format!("http://{proxy}/api/contact"))
                .with_body("hello"),
        )
        .await
        .unwrap();
    assert_eq!(post.status(), StatusCode::Ok);
    assert_eq!(cache_header(&post), Some("miss"));

    origin.shut_down().await;

    // network-first falls back to the precached shell.
    let shell = get(&client, proxy, "/index.html").await;
    assert_eq!(shell.status(), StatusCode::Ok);
    assert_eq!(cache_header(&shell), Some("hit"));
    assert_eq!(shell.body_ref().as_ref(), b"origin /index.html");

    // Nothing cached and no network: bad gateway.
    let offline = get(&client, proxy, "/api/projects").await;
    assert_eq!(offline.status(), StatusCode::BadGateway);

    // Entries are on disk.
    let reopened = FsCacheStore::open(&dir, None).await.unwrap();
    let font_url = format!("{}/fonts/inter.woff2", worker.settings().origin);
    let key = RequestKey::new(&Method::Get, &font_url);
    assert!(reopened.lookup(&key).await.unwrap().is_some());
    drop(reopened);

    // CLEAR_CACHE empties the store; the font is no longer available offline.
    let cleared = client
        .fetch(
            &FetchRequest::new(Method::Post, format!("http://{proxy}/__cacheroute/control"))
                .with_body(r#"{"type":"CLEAR_CACHE"}"#),
        )
        .await
        .unwrap();
    assert_eq!(cleared.status(), StatusCode::Accepted);
    assert!(store.list_namespaces().await.unwrap().is_empty());

    let gone = get(&client, proxy, "/fonts/inter.woff2").await;
    assert_eq!(gone.status(), StatusCode::BadGateway);

    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn new_version_reclaims_old_namespaces() {
    let origin = Origin::start().await;
    let dir = scratch_dir();
    let fetcher: Arc<dyn Fetch> = Arc::new(HttpFetcher::new().timeout(Duration::from_secs(5)));

    for version in ["v1", "v2"] {
        let store = Arc::new(FsCacheStore::open(&dir, None).await.unwrap());
        let worker = Worker::new(
            WorkerSettings::new(origin.url(), version),
            RouteTable::builtin(),
            store.clone(),
            Arc::clone(&fetcher),
            Arc::new(SystemClock),
        );
        worker.install().await.unwrap();
        assert_eq!(worker.phase().await, Phase::Installed);
        worker.activate().await.unwrap();

        let mut names = store.list_namespaces().await.unwrap();
        names.sort();
        assert_eq!(names, [format!("dynamic-{version}"), format!("static-{version}")]);
    }

    origin.shut_down().await;
    let _ = std::fs::remove_dir_all(&dir);
}
