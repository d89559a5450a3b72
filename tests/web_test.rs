#![cfg(feature = "web")]

use axum::{
    body::{to_bytes, Body},
    http::{header, Request, StatusCode},
    response::Response,
    Router,
};
use chrono::NaiveDate;
use image::{DynamicImage, ImageFormat};
use serde_json::Value;
use std::io::Cursor;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tower::ServiceExt;

use temple_attendance::app::{self, AppState, Config};
use temple_attendance::login::{self, NewUser};
use temple_attendance::mailer::{LogNotifier, Notifier};
use temple_attendance::models::{AttendanceStatus, DevoteeInput, SabhaType};
use temple_attendance::{AttendanceError, Database};

const BOUNDARY: &str = "XTEMPLEBOUNDARY";

struct TestApp {
    _dir: TempDir,
    router: Router,
    db: Arc<Database>,
    media_dir: PathBuf,
}

impl TestApp {
    fn new() -> Self {
        TestApp::build(Arc::new(LogNotifier), |_| {})
    }

    fn build(notifier: Arc<dyn Notifier>, tweak: impl FnOnce(&mut Config)) -> Self {
        let dir = TempDir::new().unwrap();
        let db = Database::open(dir.path().join("database")).unwrap();
        login::ensure_admin(&db, "admin", "admin@temple.com", "admin123").unwrap();
        login::create_user(
            &db,
            NewUser {
                username: "balsevak".to_string(),
                email: "bal@temple.com".to_string(),
                password: "bal123".to_string(),
                allowed_sabha_types: vec![SabhaType::Bal],
                is_admin: false,
                can_delete: false,
            },
        )
        .unwrap();

        let db = Arc::new(db);
        let mut config = Config {
            data_dir: dir.path().join("database"),
            media_dir: dir.path().join("media"),
            ..Default::default()
        };
        tweak(&mut config);
        let media_dir = config.media_dir.clone();
        let state = AppState::with_parts(Arc::clone(&db), notifier, config).unwrap();
        TestApp {
            router: app::router(Arc::new(state)),
            _dir: dir,
            db,
            media_dir,
        }
    }

    fn media_files(&self) -> usize {
        std::fs::read_dir(&self.media_dir).map_or(0, |entries| entries.count())
    }

    async fn send(&self, request: Request<Body>) -> Response {
        self.router.clone().oneshot(request).await.unwrap()
    }

    /// Log in and return the `Cookie` header value for the session.
    async fn login(&self, username: &str, password: &str) -> String {
        let response = self
            .send(form_post(
                "/login",
                None,
                &format!("username={}&password={}", username, password),
            ))
            .await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&response), "/");
        let set_cookie = response.headers()[header::SET_COOKIE].to_str().unwrap();
        set_cookie.split(';').next().unwrap().to_string()
    }
}

fn get(uri: &str, cookie: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().uri(uri);
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }
    builder.body(Body::empty()).unwrap()
}

fn ajax(uri: &str, cookie: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header(header::COOKIE, cookie)
        .header("X-Requested-With", "XMLHttpRequest")
        .body(Body::empty())
        .unwrap()
}

fn form_post(uri: &str, cookie: Option<&str>, body: &str) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded");
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn json_post(uri: &str, cookie: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::COOKIE, cookie)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn upload_post(cookie: &str, file_name: &str, contents: &str) -> Request<Body> {
    let body = format!(
        "--{b}\r\nContent-Disposition: form-data; name=\"excel_file\"; filename=\"{f}\"\r\n\
         Content-Type: text/csv\r\n\r\n{c}\r\n\
         --{b}\r\nContent-Disposition: form-data; name=\"sabha_type_filter\"\r\n\r\n\r\n\
         --{b}--\r\n",
        b = BOUNDARY,
        f = file_name,
        c = contents
    );
    Request::builder()
        .method("POST")
        .uri("/devotees/upload")
        .header(header::COOKIE, cookie)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(body))
        .unwrap()
}

/// Devotee form with a small PNG attached as `photo`.
fn devotee_form_post(cookie: &str, fields: &[(&str, &str)]) -> Request<Body> {
    let mut png = Cursor::new(Vec::new());
    DynamicImage::new_rgb8(12, 12)
        .write_to(&mut png, ImageFormat::Png)
        .unwrap();

    let mut body = Vec::new();
    for (name, value) in fields {
        body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"{}\"\r\n\r\n{}\r\n",
                BOUNDARY, name, value
            )
            .as_bytes(),
        );
    }
    body.extend_from_slice(
        format!(
            "--{}\r\nContent-Disposition: form-data; name=\"photo\"; filename=\"me.png\"\r\n\
             Content-Type: image/png\r\n\r\n",
            BOUNDARY
        )
        .as_bytes(),
    );
    body.extend_from_slice(&png.into_inner());
    body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());

    Request::builder()
        .method("POST")
        .uri("/devotees/add")
        .header(header::COOKIE, cookie)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(body))
        .unwrap()
}

fn devotee(devotee_id: &str, name: &str, phone: &str, sabha_type: SabhaType) -> DevoteeInput {
    DevoteeInput {
        devotee_id: devotee_id.to_string(),
        devotee_type: Default::default(),
        name: name.to_string(),
        contact_number: phone.to_string(),
        date_of_birth: None,
        gender: None,
        age: None,
        sabha_type,
        address_line: String::new(),
        landmark: String::new(),
        zone: String::new(),
        join_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
        photo_url: None,
    }
}

/// Remembers every notice and fails for one phone number.
#[derive(Default)]
struct RecordingNotifier {
    failing_phone: String,
    sent: Mutex<Vec<(String, String)>>,
}

impl Notifier for RecordingNotifier {
    fn send(&self, phone: &str, message: &str) -> temple_attendance::Result<()> {
        if phone == self.failing_phone {
            return Err(AttendanceError::Notify("gateway refused".to_string()));
        }
        self.sent
            .lock()
            .unwrap()
            .push((phone.to_string(), message.to_string()));
        Ok(())
    }
}

fn location(response: &Response) -> String {
    response.headers()[header::LOCATION]
        .to_str()
        .unwrap()
        .to_string()
}

async fn body_text(response: Response) -> String {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

async fn body_json(response: Response) -> Value {
    serde_json::from_str(&body_text(response).await).unwrap()
}

#[tokio::test]
async fn pages_require_a_session() {
    let app = TestApp::new();

    let response = app.send(get("/devotees", None)).await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), "/login");

    let response = app.send(get("/devotees", Some("session=made-up"))).await;
    assert_eq!(location(&response), "/login");

    let response = app.send(get("/login", None)).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn wrong_password_goes_back_to_login() {
    let app = TestApp::new();
    let response = app
        .send(form_post("/login", None, "username=admin&password=nope"))
        .await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert!(location(&response).starts_with("/login?error="));
    assert!(response.headers().get(header::SET_COOKIE).is_none());
}

#[tokio::test]
async fn logout_ends_the_session() {
    let app = TestApp::new();
    let cookie = app.login("admin", "admin123").await;

    let response = app.send(get("/", Some(&cookie))).await;
    assert_eq!(response.status(), StatusCode::OK);

    app.send(get("/logout", Some(&cookie))).await;
    let response = app.send(get("/", Some(&cookie))).await;
    assert_eq!(location(&response), "/login");
}

#[tokio::test]
async fn creating_a_sabha_and_marking_attendance() {
    let app = TestApp::new();
    let cookie = app.login("admin", "admin123").await;

    let response = app
        .send(upload_post(
            &cookie,
            "devotees.csv",
            "name,contact_number,sabha_type\nRam Patel,9876543210,yuvak\nShyam Shah,9876543211,yuvak\n",
        ))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let response = app
        .send(form_post("/devotees/upload/batch", Some(&cookie), ""))
        .await;
    let progress = body_json(response).await;
    assert_eq!(progress["complete"], true);
    assert_eq!(progress["created"], 2);

    let response = app
        .send(form_post(
            "/sabhas/add",
            Some(&cookie),
            "date=2024-03-10&sabha_type=yuvak&location=Main+Hall&start_time=18%3A30",
        ))
        .await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), "/sabhas?msg=Sabha%20created%20successfully%21");

    let sabha = app.db.list_sabhas(&[SabhaType::Yuvak]).unwrap().remove(0);
    let ram = app.db.find_devotee_by_number("y1").unwrap().unwrap();

    let response = app
        .send(ajax(&format!("/sabhas/{}/attendance", sabha.id), &cookie))
        .await;
    let listing = body_json(response).await;
    assert_eq!(listing["total_count"], 2);
    assert_eq!(listing["devotees"][0]["status"], "absent");

    let response = app
        .send(json_post(
            "/attendance/save",
            &cookie,
            serde_json::json!({
                "sabha_id": sabha.id,
                "devotee_id": ram.id,
                "status": "present",
                "notes": "early",
            }),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["success"], true);

    let response = app
        .send(ajax("/attendance/report?status=present", &cookie))
        .await;
    let report = body_json(response).await;
    assert_eq!(report["total_count"], 1);
    assert_eq!(report["present_count"], 1);
    assert_eq!(report["absent_count"], 1);
    assert_eq!(report["records"][0]["devotee_name"], "Ram Patel");
}

#[tokio::test]
async fn bad_status_is_a_json_error() {
    let app = TestApp::new();
    let cookie = app.login("admin", "admin123").await;

    let response = app
        .send(json_post(
            "/attendance/save",
            &cookie,
            serde_json::json!({ "sabha_id": "x", "devotee_id": "y", "status": "sleeping" }),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], "Invalid status: sleeping");
}

#[tokio::test]
async fn limited_users_stay_inside_their_types() {
    let app = TestApp::new();
    let cookie = app.login("balsevak", "bal123").await;

    let response = app.send(get("/admin", Some(&cookie))).await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert!(location(&response).starts_with("/?error="));

    let response = app
        .send(form_post(
            "/sabhas/add",
            Some(&cookie),
            "date=2024-03-10&sabha_type=yuvak",
        ))
        .await;
    assert!(location(&response).starts_with("/sabhas/add?error="));
    assert!(app.db.list_sabhas(&SabhaType::ALL).unwrap().is_empty());

    let response = app.send(get("/mandals", Some(&cookie))).await;
    assert!(location(&response).starts_with("/?error="));
}

#[tokio::test]
async fn upload_with_bad_rows_saves_nothing() {
    let app = TestApp::new();
    let cookie = app.login("admin", "admin123").await;

    let response = app
        .send(upload_post(
            &cookie,
            "devotees.csv",
            "name,contact_number,sabha_type\nGood,9876543210,bal\n,123,bal\n",
        ))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let page = body_text(response).await;
    assert!(page.contains("Phone number must be at least 10 digits"));

    let response = app
        .send(form_post("/devotees/upload/batch", Some(&cookie), ""))
        .await;
    assert_eq!(body_json(response).await["error"], "No upload data found");
    assert_eq!(app.db.count_devotees(&SabhaType::ALL).unwrap(), 0);
}

#[tokio::test]
async fn csv_export_is_an_attachment() {
    let app = TestApp::new();
    let cookie = app.login("admin", "admin123").await;

    let response = app.send(get("/attendance/export.csv", Some(&cookie))).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_DISPOSITION],
        "attachment; filename=\"attendance_report.csv\""
    );
    assert_eq!(
        body_text(response).await,
        "Devotee Name,Sabha Type,Date,Status,Notes\n"
    );
}

#[tokio::test]
async fn unknown_paths_are_not_found() {
    let app = TestApp::new();

    let response = app.send(get("/no/such/page", None)).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app
        .send(
            Request::builder()
                .uri("/no/such/page")
                .header("X-Requested-With", "XMLHttpRequest")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await["success"], false);
}

const THREE_ROWS: &str = "name,contact_number,sabha_type\n\
                          Ram Patel,9876543210,yuvak\n\
                          Shyam Shah,9876543211,yuvak\n\
                          Sita Shah,9876543212,mahila\n";

#[tokio::test]
async fn upload_is_imported_over_several_polls() {
    let app = TestApp::build(Arc::new(LogNotifier), |config| {
        config.batch_size = 1;
        config.workers = 2;
    });
    let cookie = app.login("admin", "admin123").await;

    let response = app
        .send(upload_post(&cookie, "devotees.csv", THREE_ROWS))
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let first = body_json(
        app.send(form_post("/devotees/upload/batch", Some(&cookie), ""))
            .await,
    )
    .await;
    assert_eq!(first["processed"], 2);
    assert_eq!(first["total"], 3);
    assert_eq!(first["complete"], false);

    let last = body_json(
        app.send(form_post("/devotees/upload/batch", Some(&cookie), ""))
            .await,
    )
    .await;
    assert_eq!(last["processed"], 3);
    assert_eq!(last["created"], 3);
    assert_eq!(last["complete"], true);

    // The finished job is gone from the session.
    let response = app
        .send(form_post("/devotees/upload/batch", Some(&cookie), ""))
        .await;
    assert_eq!(body_json(response).await["error"], "No upload data found");

    assert_eq!(app.db.count_devotees(&[SabhaType::Yuvak]).unwrap(), 2);
    assert_eq!(app.db.count_devotees(&[SabhaType::Mahila]).unwrap(), 1);
}

#[tokio::test]
async fn second_upload_waits_for_the_first() {
    let app = TestApp::new();
    let cookie = app.login("admin", "admin123").await;

    app.send(upload_post(&cookie, "devotees.csv", THREE_ROWS))
        .await;
    let response = app
        .send(upload_post(
            &cookie,
            "more.csv",
            "name,contact_number,sabha_type\nLata Joshi,9876543219,bal\n",
        ))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(body_text(response)
        .await
        .contains("Upload already in progress"));

    // The parked job is still the first file.
    let progress = body_json(
        app.send(form_post("/devotees/upload/batch", Some(&cookie), ""))
            .await,
    )
    .await;
    assert_eq!(progress["total"], 3);
    assert_eq!(progress["complete"], true);
    assert_eq!(app.db.count_devotees(&[SabhaType::Bal]).unwrap(), 0);
}

#[tokio::test]
async fn cancelled_upload_writes_nothing() {
    let app = TestApp::new();
    let cookie = app.login("admin", "admin123").await;

    app.send(upload_post(&cookie, "devotees.csv", THREE_ROWS))
        .await;
    let response = app
        .send(form_post("/devotees/upload/cancel", Some(&cookie), ""))
        .await;
    assert_eq!(body_json(response).await["success"], true);

    let response = app
        .send(form_post("/devotees/upload/batch", Some(&cookie), ""))
        .await;
    assert_eq!(body_json(response).await["error"], "No upload data found");
    assert_eq!(app.db.count_devotees(&SabhaType::ALL).unwrap(), 0);

    // A fresh upload is accepted again.
    let response = app
        .send(upload_post(&cookie, "devotees.csv", THREE_ROWS))
        .await;
    assert!(!body_text(response)
        .await
        .contains("Upload already in progress"));
}

#[tokio::test]
async fn admin_pages_turn_away_other_users() {
    let app = TestApp::new();
    let cookie = app.login("balsevak", "bal123").await;

    for uri in ["/admin", "/admin/users/add", "/mandals", "/mandals/add"] {
        let response = app.send(get(uri, Some(&cookie))).await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER, "{}", uri);
        assert!(location(&response).starts_with("/?error="), "{}", uri);
    }

    let response = app
        .send(form_post(
            "/mandals/add",
            Some(&cookie),
            "name=north&display_name=North",
        ))
        .await;
    assert!(location(&response).starts_with("/mandals/add?error="));
    assert!(app.db.list_mandals().unwrap().is_empty());
}

#[tokio::test]
async fn notify_reports_sent_and_failed_notices() {
    let notifier = Arc::new(RecordingNotifier {
        failing_phone: "9876543211".to_string(),
        ..Default::default()
    });
    let app = TestApp::build(notifier.clone(), |_| {});
    let cookie = app.login("admin", "admin123").await;

    app.db
        .insert_devotee(devotee("", "Ram Patel", "9876543210", SabhaType::Yuvak))
        .unwrap();
    app.db
        .insert_devotee(devotee("", "Shyam Shah", "9876543211", SabhaType::Yuvak))
        .unwrap();
    let here = app
        .db
        .insert_devotee(devotee("", "Hari Joshi", "9876543212", SabhaType::Yuvak))
        .unwrap();

    app.send(form_post(
        "/sabhas/add",
        Some(&cookie),
        "date=2024-03-10&sabha_type=yuvak",
    ))
    .await;
    let sabha = app.db.list_sabhas(&[SabhaType::Yuvak]).unwrap().remove(0);
    app.db
        .upsert_attendance(&sabha.id, &here.id, AttendanceStatus::Present, "")
        .unwrap();

    let response = app
        .send(form_post(
            &format!("/sabhas/{}/notify", sabha.id),
            Some(&cookie),
            "",
        ))
        .await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    let target = urlencoding::decode(&location(&response))
        .unwrap()
        .into_owned();
    assert_eq!(
        target,
        format!(
            "/sabhas/{}/attendance?msg=Sent 1 absence notices (1 failed).",
            sabha.id
        )
    );

    let sent = notifier.sent.lock().unwrap();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, "9876543210");
    assert!(sent[0].1.contains("Dear Ram Patel"));
}

#[tokio::test]
async fn photo_is_kept_only_when_the_devotee_is_saved() {
    let app = TestApp::new();
    let cookie = app.login("admin", "admin123").await;
    app.db
        .insert_devotee(devotee("b7", "Asha Patel", "9876543210", SabhaType::Bal))
        .unwrap();

    let response = app
        .send(devotee_form_post(
            &cookie,
            &[
                ("devotee_id", "b7"),
                ("name", "Asha Patel"),
                ("contact_number", "9876543210"),
                ("sabha_type", "bal"),
            ],
        ))
        .await;
    assert!(location(&response).starts_with("/devotees/add?error="));
    assert_eq!(app.media_files(), 0);

    let response = app
        .send(devotee_form_post(
            &cookie,
            &[
                ("name", "Asha Patel"),
                ("contact_number", "9876543212"),
                ("sabha_type", "bal"),
            ],
        ))
        .await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    let saved = app.db.find_devotee_by_number("b8").unwrap().unwrap();
    assert_eq!(
        saved.photo_url.as_deref(),
        Some("/media/asha_patel_9876543212.jpg")
    );
    assert!(app.media_dir.join("asha_patel_9876543212.jpg").exists());
    assert_eq!(app.media_files(), 1);
}
