use brrtserver::dispatcher::HandlerError;
use brrtserver::router::{Controller, RouteGroup};
use brrtserver::{handler, App, Json, Reply, Router, RouterOptions, Session};
use serde::{Deserialize, Serialize};

mod common;
use common::http_util::{get, parse_response, request, RawResponse};

#[derive(Debug, Serialize, Deserialize, PartialEq)]
struct User {
    login: String,
    year: i32,
}

#[handler(get("/user/{login}/{year}"))]
fn get_user(login: String, year: i32) -> Json<User> {
    Json(User { login, year })
}

#[handler(get("/search"))]
fn search(term: String) -> String {
    format!("searching {term}")
}

#[handler(get("/page"), get("/pages"), defaults(limit = 10))]
fn page(limit: u32, cursor: Option<String>) -> String {
    format!("limit={limit} cursor={}", cursor.unwrap_or_default())
}

#[handler(post("/users"))]
fn create_user(session: &mut Session) -> Result<(), HandlerError> {
    let user: User = session
        .read_json()
        .map_err(|e| HandlerError::new(400, e.to_string()))?;
    session.send_json(201, &user)?;
    Ok(())
}

#[handler(get("/teapot"))]
fn teapot() -> Result<String, HandlerError> {
    Err(HandlerError::new(418, "short and stout"))
}

#[handler(get("/boom"))]
fn boom() -> String {
    panic!("handler exploded")
}

#[handler(get("/health"), absolute)]
fn health() -> &'static str {
    "ok"
}

#[handler(get("/later/{n}"))]
fn later(n: u64) -> Result<Reply, HandlerError> {
    Reply::spawn(move || format!("computed {}", n * 2))
}

struct Admin;

impl Controller for Admin {
    fn prefix(&self) -> &str {
        "/admin"
    }

    fn routes(&self, group: &mut RouteGroup) {
        group.route("GET", "stats", |_s: &mut Session| "stats");
        group.handler(health_handler());
    }
}

fn app() -> App {
    let router = Router::builder(RouterOptions::default())
        .handler(get_user_handler())
        .handler(search_handler())
        .handler(page_handler())
        .handler(create_user_handler())
        .handler(teapot_handler())
        .handler(boom_handler())
        .handler(later_handler())
        .mount("/api/", &Admin)
        .build()
        .unwrap();
    App::new(router)
}

fn call(app: &App, raw: &[u8]) -> RawResponse {
    parse_response(&app.respond_to_bytes(raw))
}

#[test]
fn test_path_params_bind_and_convert() {
    let app = app();
    let res = call(&app, &get("/user/stratdev/2023"));
    assert_eq!(res.status, 200);
    assert_eq!(res.header("content-type"), Some("application/json"));
    let user: User = serde_json::from_slice(&res.body).unwrap();
    assert_eq!(
        user,
        User {
            login: "stratdev".into(),
            year: 2023
        }
    );

    // Matched route, unconvertible segment: a server-side conversion fault.
    assert_eq!(call(&app, &get("/user/stratdev/xx")).status, 500);
}

#[test]
fn test_missing_required_query_is_not_found() {
    let app = app();
    let res = call(&app, &get("/search"));
    assert_eq!(res.status, 404);
    let res = call(&app, &get("/search?term=rust+lang"));
    assert_eq!(res.status, 200);
    assert_eq!(res.text(), "searching rust lang");
}

#[test]
fn test_defaults_optionals_and_multiple_routes() {
    let app = app();
    assert_eq!(call(&app, &get("/page")).text(), "limit=10 cursor=");
    assert_eq!(call(&app, &get("/pages?limit=3&cursor=c1")).text(), "limit=3 cursor=c1");
    assert_eq!(call(&app, &get("/page?limit=-1")).status, 500);
}

#[test]
fn test_session_injection_and_json_body() {
    let app = app();
    let res = call(
        &app,
        &request(
            "POST",
            "/users",
            &[("Content-Type", "application/json")],
            br#"{"login":"ann","year":1999}"#,
        ),
    );
    assert_eq!(res.status, 201);
    assert!(res.text().contains("\"login\":\"ann\""));

    let res = call(&app, &request("POST", "/users", &[], b"not json"));
    assert_eq!(res.status, 400);
}

#[test]
fn test_handler_errors_and_panics() {
    let app = app();
    let res = call(&app, &get("/teapot"));
    assert_eq!(res.status, 418);
    assert!(res.text().contains("short and stout"));

    let res = call(&app, &get("/boom"));
    assert_eq!(res.status, 500);
    assert!(!res.text().contains("exploded"));

    // The connection survives an ordinary handler failure.
    let mut raw = get("/boom");
    raw.extend(get("/page"));
    let out = String::from_utf8(app.respond_to_bytes(&raw)).unwrap();
    assert!(out.contains("HTTP/1.1 500"));
    assert!(out.ends_with("limit=10 cursor="));
}

#[test]
fn test_task_reply_is_joined() {
    let res = call(&app(), &get("/later/21"));
    assert_eq!(res.status, 200);
    assert_eq!(res.text(), "computed 42");
}

#[test]
fn test_controller_mount_and_absolute() {
    let app = app();
    assert_eq!(call(&app, &get("/api/admin/stats")).text(), "stats");
    // The absolute registration ignores the mount and the controller prefix.
    assert_eq!(call(&app, &get("/health")).text(), "ok");
    assert_eq!(call(&app, &get("/api/admin/health")).status, 404);
}
