use std::fs;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use brrtserver::middleware::StaticFilesMiddleware;
use brrtserver::static_files::{StaticFileCache, StaticFiles};
use brrtserver::{App, Router, RouterOptions, Session};
use tempfile::TempDir;

mod common;
use common::http_util::{get, parse_response, request, RawResponse};

fn site() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("index.html"), "<h1>home</h1>").unwrap();
    fs::write(dir.path().join("app.js"), "console.log(1)").unwrap();
    fs::create_dir(dir.path().join("docs")).unwrap();
    fs::write(dir.path().join("docs").join("guide.txt"), "v1").unwrap();
    dir
}

fn app_for(files: StaticFiles) -> App {
    let router = Router::builder(RouterOptions::default())
        .route("GET", "/api/ping", |_s: &mut Session| "pong")
        .build()
        .unwrap();
    App::new(router).with(StaticFilesMiddleware::new(files))
}

fn fetch(app: &App, path: &str) -> RawResponse {
    parse_response(&app.respond_to_bytes(&get(path)))
}

#[test]
fn test_serves_files_and_falls_through() {
    let dir = site();
    let app = app_for(StaticFiles::new(dir.path()).unwrap().mount("/files"));

    let res = fetch(&app, "/files/app.js");
    assert_eq!(res.status, 200);
    assert_eq!(res.text(), "console.log(1)");
    assert!(res.header("content-type").unwrap().contains("javascript"));
    assert!(res.header("last-modified").is_some());

    let res = fetch(&app, "/files/");
    assert_eq!(res.text(), "<h1>home</h1>");

    // Outside the mount, and missing files, reach the router.
    assert_eq!(fetch(&app, "/api/ping").text(), "pong");
    assert_eq!(fetch(&app, "/files/missing.txt").status, 404);
}

#[test]
fn test_traversal_never_escapes_root() {
    let outer = tempfile::tempdir().unwrap();
    fs::write(outer.path().join("secret.txt"), "top secret").unwrap();
    let root = outer.path().join("public");
    fs::create_dir(&root).unwrap();
    fs::write(root.join("ok.txt"), "fine").unwrap();
    let app = app_for(StaticFiles::new(&root).unwrap().mount("/files"));

    for path in [
        "/files/../secret.txt",
        "/files/../../etc/passwd",
        "/files/%2e%2e/secret.txt",
        "/files/%2E%2E%2Fsecret.txt",
        "/files/..%5Csecret.txt",
        "/files/ok.txt/../../secret.txt",
    ] {
        let res = fetch(&app, path);
        assert!(
            res.status == 403 || res.status == 404,
            "{path} answered {}",
            res.status
        );
        assert!(!res.text().contains("top secret"), "{path} leaked");
        assert!(!res.text().contains("root:"), "{path} leaked");
    }
    assert_eq!(fetch(&app, "/files/ok.txt").text(), "fine");
}

#[test]
fn test_conditional_get() {
    let dir = site();
    let app = app_for(StaticFiles::new(dir.path()).unwrap());
    let first = fetch(&app, "/app.js");
    let last_modified = first.header("last-modified").unwrap().to_string();

    let res = parse_response(&app.respond_to_bytes(&request(
        "GET",
        "/app.js",
        &[("If-Modified-Since", &last_modified)],
        b"",
    )));
    assert_eq!(res.status, 304);
    assert!(res.body.is_empty());

    let res = parse_response(&app.respond_to_bytes(&request(
        "GET",
        "/app.js",
        &[("If-Modified-Since", "Thu, 01 Jan 1970 00:00:00 GMT")],
        b"",
    )));
    assert_eq!(res.status, 200);
}

#[test]
fn test_directory_redirect_and_auto_index() {
    let dir = site();
    let app = app_for(StaticFiles::new(dir.path()).unwrap().auto_index(true));

    let res = fetch(&app, "/docs?x=1");
    assert_eq!(res.status, 301);
    assert_eq!(res.header("location"), Some("/docs/?x=1"));

    let res = fetch(&app, "/docs/");
    assert_eq!(res.status, 200);
    assert!(res.header("content-type").unwrap().starts_with("text/html"));
    assert!(res.text().contains(">guide.txt</a>"));
}

#[test]
fn test_cache_serves_stale_until_invalidated() {
    let dir = site();
    let files = StaticFiles::new(dir.path())
        .unwrap()
        .cache(StaticFileCache::new(Duration::from_secs(3600)));
    let cache = Arc::clone(files.cache_handle().unwrap());
    let guide = files.root().join("docs").join("guide.txt");
    let app = app_for(files);

    assert_eq!(fetch(&app, "/docs/guide.txt").text(), "v1");
    fs::write(&guide, "v2").unwrap();
    // Without a change notification the TTL entry keeps serving.
    assert_eq!(fetch(&app, "/docs/guide.txt").text(), "v1");
    assert!(cache.stats().hits >= 1);

    cache.invalidate(&guide);
    assert_eq!(fetch(&app, "/docs/guide.txt").text(), "v2");
}

#[test]
fn test_watcher_invalidates_changed_file() {
    let dir = site();
    let files = StaticFiles::new(dir.path())
        .unwrap()
        .cache(StaticFileCache::new(Duration::from_secs(3600)));
    let Ok(Some(_watcher)) = files.watch() else {
        eprintln!("filesystem notifications unavailable; skipping");
        return;
    };
    let guide = files.root().join("docs").join("guide.txt");
    let app = app_for(files);

    assert_eq!(fetch(&app, "/docs/guide.txt").text(), "v1");
    fs::write(&guide, "v2").unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        if fetch(&app, "/docs/guide.txt").text() == "v2" {
            break;
        }
        assert!(Instant::now() < deadline, "change notification never invalidated the entry");
        thread::sleep(Duration::from_millis(25));
    }
}
