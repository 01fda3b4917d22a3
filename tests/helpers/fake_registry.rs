//! In-process subject registry for integration tests
//!
//! Serves the three endpoints the registry client talks to, scripted and
//! inspectable through a shared fixture value.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::header;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;

/// Scripted registry state, shared between the server and the test body.
#[derive(Debug, Default)]
pub struct RegistryFixture {
    /// project name -> known subject record ids
    pub subjects: HashMap<String, Vec<String>>,
    /// project name -> (event key, event label) in declaration order
    pub events: HashMap<String, Vec<(String, String)>>,
    /// subject ids whose creation is refused with an error reply
    pub refuse: Vec<String>,
    /// (project, new_id) pairs received by the creation endpoint
    pub create_calls: Vec<(String, String)>,
    /// byte sizes of uploaded coupling lists
    pub uploads: Vec<usize>,
}

impl RegistryFixture {
    /// Fixture with one project, three events and one known subject.
    pub fn with_ndose() -> Self {
        let mut fixture = Self::default();
        fixture.subjects.insert(
            "NDOSE".to_string(),
            vec!["NDOSE_1000".to_string()],
        );
        fixture.events.insert(
            "NDOSE".to_string(),
            vec![
                ("event_1".to_string(), "baseline_arm_1".to_string()),
                ("event_2".to_string(), "followup_arm_1".to_string()),
                ("event_3".to_string(), "year2_arm_1".to_string()),
            ],
        );
        fixture
    }
}

pub type SharedFixture = Arc<Mutex<RegistryFixture>>;

/// Serve the fixture on an ephemeral port and return the base URL.
pub async fn serve_registry(fixture: SharedFixture) -> String {
    let app = Router::new()
        .route("/infoForThisProject.php", get(project_info))
        .route("/createNewName.php", get(create_subject))
        .route("/upload-couplings-file.php", post(upload_couplings))
        .with_state(fixture);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind fake registry");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("fake registry");
    });
    format!("http://{addr}")
}

/// The JSON is assembled by hand so the event object keeps the declaration
/// order of the fixture; a serde map would sort the keys.
async fn project_info(
    State(fixture): State<SharedFixture>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let project = params.get("project").cloned().unwrap_or_default();
    let fixture = fixture.lock().unwrap();
    let participants = fixture
        .subjects
        .get(&project)
        .map(|subjects| {
            subjects
                .iter()
                .map(|s| format!("{{\"record_id\": \"{s}\"}}"))
                .collect::<Vec<_>>()
                .join(", ")
        })
        .unwrap_or_default();
    let events = fixture
        .events
        .get(&project)
        .map(|events| {
            events
                .iter()
                .map(|(key, label)| format!("\"{key}\": \"{label}\""))
                .collect::<Vec<_>>()
                .join(", ")
        })
        .unwrap_or_default();
    let body = format!("{{\"participants\": [{participants}], \"events\": {{{events}}}}}");
    ([(header::CONTENT_TYPE, "application/json")], body)
}

async fn create_subject(
    State(fixture): State<SharedFixture>,
    Query(params): Query<HashMap<String, String>>,
) -> Json<serde_json::Value> {
    let project = params.get("project").cloned().unwrap_or_default();
    let new_id = params.get("new_id").cloned().unwrap_or_default();
    let mut fixture = fixture.lock().unwrap();
    fixture.create_calls.push((project.clone(), new_id.clone()));
    if fixture.refuse.contains(&new_id) {
        Json(json!({"error": 1, "message": "name already in use"}))
    } else {
        fixture.subjects.entry(project).or_default().push(new_id);
        Json(json!({"error": 0, "message": "created"}))
    }
}

async fn upload_couplings(State(fixture): State<SharedFixture>, body: Bytes) -> &'static str {
    fixture.lock().unwrap().uploads.push(body.len());
    "upload received"
}
