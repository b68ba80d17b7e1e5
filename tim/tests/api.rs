use axum::{
    body::Body,
    http::{Request, StatusCode},
    routing::{get, post, put},
    Json, Router,
};
use chrono::Utc;
use jsonwebtoken::{encode, EncodingKey, Header};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::future::IntoFuture;
use std::sync::Arc;
use std::time::Duration;
use tim::api::{router, AppState};
use tim::config::Config;
use tim_core::auth::Hs256Verifier;
use tim_core::block::AccessType;
use tim_core::db::TimDb;
use tim_core::events::{Event, EventBus};
use tim_core::plugin::{HttpPluginClient, PluginRegistry};
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tower::util::ServiceExt;

const SECRET: &str = "test-secret";

/// Plugin service that echoes the input back and saves it. An input with
/// `"broken": true` gets a reply without the `web` key.
async fn spawn_plugin() -> (String, JoinHandle<Result<(), std::io::Error>>) {
    let app = Router::new()
        .route("/reqs/", get(|| async { Json(json!({"js": []})) }))
        .route(
            "/html/",
            post(|Json(body): Json<Value>| async move {
                format!("<div>{}</div>", body["state"]["c"])
            }),
        )
        .route(
            "/multihtml/",
            post(|Json(calls): Json<Vec<Value>>| async move {
                let htmls: Vec<String> = calls
                    .iter()
                    .map(|call| format!("<p>{}</p>", call["taskID"].as_str().unwrap_or_default()))
                    .collect();
                Json(htmls)
            }),
        )
        .route(
            "/answer/",
            put(|Json(body): Json<Value>| async move {
                let input = body["input"].clone();
                if input["broken"] == json!(true) {
                    return Json(json!({"save": input}));
                }
                Json(json!({"web": {"echo": input}, "save": input}))
            }),
        );
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = tokio::spawn(axum::serve(listener, app.into_make_service()).into_future());
    (format!("http://{addr}/"), server)
}

struct TestApp {
    _dir: tempfile::TempDir,
    app: Router,
    db: Arc<RwLock<TimDb>>,
    events: EventBus,
    doc: i64,
    student: i64,
    plugin_server: JoinHandle<Result<(), std::io::Error>>,
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self.plugin_server.abort();
    }
}

async fn setup() -> TestApp {
    setup_with(|config| config.trust_user_header = true).await
}

async fn setup_with(configure: impl FnOnce(&mut Config)) -> TestApp {
    let dir = tempfile::tempdir().unwrap();
    let now = Utc::now();
    let mut db = TimDb::open(dir.path()).unwrap();
    db.create_user("teacher1", None, None, now).unwrap();
    let student = db.create_user("student1", None, None, now).unwrap();
    db.create_user("student2", None, None, now).unwrap();
    let teacher = db.principal_for_name(Some("teacher1"), now);
    let doc = db.create_document(&teacher, "users/teacher1/course", now).unwrap();
    let mut attrs = BTreeMap::new();
    attrs.insert("plugin".to_string(), "mcq".to_string());
    attrs.insert("taskId".to_string(), "t1".to_string());
    db.add_paragraph(&teacher, doc, "", attrs, None, now).unwrap();
    db.grant(&teacher, doc, "Logged-in users", AccessType::View, None, None, now)
        .unwrap();

    let (host, plugin_server) = spawn_plugin().await;
    let mut registry = PluginRegistry::new();
    registry.register("mcq", host);
    let mut config = Config {
        plugins: registry.clone(),
        ..Config::default()
    };
    configure(&mut config);
    let db = Arc::new(RwLock::new(db));
    let events = EventBus::new();
    let state = AppState {
        db: db.clone(),
        plugins: Arc::new(HttpPluginClient::new(
            registry,
            Duration::from_secs(5),
            Duration::from_secs(5),
        )),
        events: events.clone(),
        verifier: Arc::new(Hs256Verifier::new(SECRET)),
        config: Arc::new(config),
    };
    TestApp {
        _dir: dir,
        app: router(state),
        db,
        events,
        doc,
        student,
        plugin_server,
    }
}

impl TestApp {
    async fn call(&self, method: &str, uri: &str, user: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
        let mut req = Request::builder().method(method).uri(uri);
        if let Some(user) = user {
            req = req.header("X-User-Id", user);
        }
        let req = match body {
            Some(body) => req
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => req.body(Body::empty()).unwrap(),
        };
        send(&self.app, req).await
    }

    async fn answer(&self, user: &str, body: Value) -> (StatusCode, Value) {
        let uri = format!("/mcq/{}.t1/answer", self.doc);
        self.call("PUT", &uri, Some(user), Some(body)).await
    }
}

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
}

#[tokio::test]
async fn health_over_tcp() {
    let t = setup().await;
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = tokio::spawn(axum::serve(listener, t.app.clone().into_make_service()).into_future());

    let resp = reqwest::get(format!("http://{}/health", addr)).await.unwrap();
    assert!(resp.status().is_success());
    assert_eq!(resp.text().await.unwrap(), "OK");

    server.abort();
}

#[tokio::test]
async fn answers_are_visible_only_with_see_answers() {
    let t = setup().await;
    let (status, body) = t.answer("student1", json!({"input": {"c": 1}})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["web"], json!({"echo": {"c": 1}}));
    assert_eq!(body["state"], "saved");
    assert!(body["savedNew"].is_i64());

    let uri = format!("/answers/{}.t1/{}", t.doc, t.student);
    let (status, body) = t.call("GET", &uri, Some("student2"), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert!(body["error"].is_string());

    let (status, body) = t.call("GET", &uri, Some("student1"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);

    let (status, body) = t.call("GET", &uri, Some("teacher1"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body[0]["content"], r#"{"c":1}"#);

    let uri = format!("/getTaskUsers/{}.t1", t.doc);
    let (status, body) = t.call("GET", &uri, Some("teacher1"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body[0]["name"], "student1");
}

#[tokio::test]
async fn missing_web_key_is_a_bad_request() {
    let t = setup().await;
    let (status, body) = t.answer("student1", json!({"input": {"broken": true}})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], r#"The key "web" is missing in plugin response."#);
    let task = format!("{}.t1", t.doc);
    assert_eq!(t.db.read().await.answers.count_for_task(&task), 0);
}

#[tokio::test]
async fn save_answer_false_creates_no_answer() {
    let t = setup().await;
    let (status, body) = t
        .answer("teacher1", json!({"input": {"c": 2}, "abData": {"saveAnswer": false}}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["savedNew"], Value::Null);
    assert_eq!(body["state"], "no_answer");
    assert_eq!(body["web"], json!({"echo": {"c": 2}}));
    let task = format!("{}.t1", t.doc);
    assert_eq!(t.db.read().await.answers.count_for_task(&task), 0);
}

#[tokio::test]
async fn unsaved_run_needs_see_answers() {
    let t = setup().await;
    let (status, body) = t
        .answer("student2", json!({"input": {"c": 2}, "abData": {"saveAnswer": false}}))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert!(body["error"].is_string());
    assert!(body.get("web").is_none());
}

#[tokio::test]
async fn malformed_requests_get_json_errors() {
    let t = setup().await;
    let (status, body) = t.answer("student1", json!({"nope": 1})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("input"));

    let (status, body) = t.call("GET", "/docs/abc", Some("student1"), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());

    let uri = "/renameAnswers/t1/t2/users/teacher1/course?force=maybe";
    let (status, body) = t.call("PUT", uri, Some("teacher1"), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn user_header_is_ignored_unless_trusted() {
    let t = setup_with(|_| {}).await;
    let uri = format!("/docs/{}/paragraphs", t.doc);
    let (status, _) = t.call("POST", &uri, Some("teacher1"), Some(json!({"md": "x"}))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let token = encode(
        &Header::default(),
        &json!({"sub": "teacher1"}),
        &EncodingKey::from_secret(SECRET.as_bytes()),
    )
    .unwrap();
    let req = Request::builder()
        .method("POST")
        .uri(&uri)
        .header("Authorization", format!("Bearer {token}"))
        .header("content-type", "application/json")
        .body(Body::from(json!({"md": "x"}).to_string()))
        .unwrap();
    let (status, _) = send(&t.app, req).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn anonymous_users_cannot_answer() {
    let t = setup().await;
    let uri = format!("/mcq/{}.t1/answer", t.doc);
    let (status, _) = t.call("PUT", &uri, None, Some(json!({"input": {}}))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn folder_paths_are_validated() {
    let t = setup().await;
    for bad in ["users/teacher1/a b", "users/teacher1//x", "123/456"] {
        let (status, body) = t
            .call("POST", "/createFolder", Some("teacher1"), Some(json!({"path": bad})))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{bad}: {body}");
    }

    let (status, _) = t
        .call(
            "POST",
            "/createFolder",
            Some("teacher1"),
            Some(json!({"path": "users/teacher1/sub/deeper"})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let (status, body) = t
        .call("GET", "/getItems?folder=users/teacher1/sub", Some("teacher1"), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body[0]["name"], "deeper");

    let (status, _) = t
        .call("POST", "/createFolder", Some("teacher1"), Some(json!({"path": "users/teacher1/sub"})))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = t
        .call("POST", "/createFolder", None, Some(json!({"path": "anon"})))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn duplicate_read_marking_is_rejected() {
    let t = setup().await;
    let par_id = t.db.read().await.docs.paragraphs(t.doc).unwrap()[0].id().to_string();
    let uri = format!("/read/{}/{}/4", t.doc, par_id);
    let (status, _) = t.call("PUT", &uri, Some("student1"), None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, body) = t.call("PUT", &uri, Some("student1"), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());

    let bad_type = format!("/read/{}/{}/9", t.doc, par_id);
    let (status, _) = t.call("PUT", &bad_type, Some("student1"), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = t
        .call("GET", &format!("/read/{}", t.doc), Some("student1"), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);
    assert_eq!(body[0]["type"], 4);

    let (status, _) = t
        .call("PUT", &format!("/unread/{}/{}", t.doc, par_id), Some("student1"), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    let (_, body) = t
        .call("GET", &format!("/read/{}", t.doc), Some("student1"), None)
        .await;
    assert_eq!(body, json!([]));
}

#[tokio::test]
async fn bearer_token_identifies_user() {
    let t = setup().await;
    let token = encode(
        &Header::default(),
        &json!({"sub": "teacher1"}),
        &EncodingKey::from_secret(SECRET.as_bytes()),
    )
    .unwrap();
    let uri = format!("/docs/{}/paragraphs", t.doc);
    let req = Request::builder()
        .method("POST")
        .uri(&uri)
        .header("Authorization", format!("Bearer {token}"))
        .header("content-type", "application/json")
        .body(Body::from(json!({"md": "hello"}).to_string()))
        .unwrap();
    let (status, body) = send(&t.app, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["md"], "hello");

    let (status, _) = t.call("POST", &uri, None, Some(json!({"md": "nope"}))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = t.call("POST", &uri, Some("student1"), Some(json!({"md": "nope"}))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = t
        .call("GET", &format!("/docs/{}", t.doc), Some("student1"), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["paragraphs"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn renaming_answers_over_http() {
    let t = setup().await;
    let (status, _) = t.answer("student1", json!({"input": {"c": 1}})).await;
    assert_eq!(status, StatusCode::OK);

    let uri = "/renameAnswers/t1/t2/users/teacher1/course";
    let (status, _) = t.call("PUT", uri, Some("student1"), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, body) = t.call("PUT", uri, Some("teacher1"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["modified"], 1);
    assert_eq!(body["conflicts"], 0);
}

#[tokio::test]
async fn creating_a_document_publishes_an_event() {
    let t = setup().await;
    let mut rx = t.events.subscribe();
    let (status, body) = t
        .call(
            "POST",
            "/createDocument",
            Some("teacher1"),
            Some(json!({"path": "users/teacher1/notes"})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let id = body["id"].as_i64().unwrap();
    assert_eq!(
        rx.recv().await.unwrap(),
        Event::DocumentCreated {
            id,
            path: "users/teacher1/notes".into()
        }
    );
}

#[tokio::test]
async fn group_management_requires_admin() {
    let t = setup().await;
    let (status, _) = t.call("POST", "/groups/create/course-2024", Some("teacher1"), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    {
        let mut db = t.db.write().await;
        let id = db.users.user_by_name("teacher1").unwrap().id;
        db.make_admin(id, Utc::now()).unwrap();
    }
    let (status, _) = t.call("POST", "/groups/create/course-2024", Some("teacher1"), None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, body) = t
        .call(
            "PUT",
            "/groups/addmember/course-2024",
            Some("teacher1"),
            Some(json!({"names": ["student1", "ghost"]})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["added"], json!(["student1"]));
    assert_eq!(body["not_exist"], json!(["ghost"]));

    let (status, body) = t.call("GET", "/groups/show/course-2024", Some("teacher1"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body[0]["name"], "student1");

    let (status, _) = t.call("GET", "/groups/show/missing", Some("teacher1"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn task_html_uses_latest_answer_as_state() {
    let t = setup().await;
    let (status, _) = t.answer("student1", json!({"input": {"c": 7}})).await;
    assert_eq!(status, StatusCode::OK);

    let uri = format!("/taskhtml/{}.t1", t.doc);
    let (status, body) = t.call("GET", &uri, Some("student1"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["html"], "<div>7</div>");

    let (status, body) = t.call("GET", "/reqs/mcq", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"js": []}));
    let (status, body) = t.call("GET", "/reqs/unknown", None, None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Plugin does not exist: unknown");
}

#[tokio::test]
async fn document_plugins_render_through_multihtml() {
    let t = setup().await;
    let uri = format!("/docs/{}/plugins", t.doc);
    let (status, body) = t.call("GET", &uri, Some("student1"), None).await;
    assert_eq!(status, StatusCode::OK);
    let rendered = body.as_array().unwrap();
    assert_eq!(rendered.len(), 1);
    assert_eq!(rendered[0]["plugin"], "mcq");
    assert_eq!(rendered[0]["html"], format!("<p>{}.t1</p>", t.doc));
    assert_eq!(rendered[0]["needs_browser"], true);

    let (status, _) = t.call("GET", &uri, None, None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}
