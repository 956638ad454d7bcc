//! Stand-in for the Flickr REST API
//!
//! Serves `/services/rest` search responses and `/images/:n` image bytes
//! from an axum router bound to an ephemeral local port. Every search
//! request's query parameters are recorded for later inspection.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use vt_common::config::FlickrConfig;

/// How the fake answers search requests
#[derive(Debug, Clone)]
pub enum SearchBehavior {
    /// A normal `stat: ok` page
    Photos {
        pages: Value,
        total: Value,
        /// One entry per result; `false` omits `url_m`
        with_url: Vec<bool>,
    },
    /// `stat: fail` with a message
    Fail { code: i64, message: String },
    /// Arbitrary JSON body
    Raw(Value),
    /// Bare HTTP error status
    Status(u16),
}

impl SearchBehavior {
    /// `count` results that all carry an image URL
    pub fn photos(pages: Value, total: Value, count: usize) -> Self {
        SearchBehavior::Photos {
            pages,
            total,
            with_url: vec![true; count],
        }
    }
}

struct FakeState {
    base_url: String,
    behavior: Mutex<SearchBehavior>,
    broken_images: Mutex<BTreeSet<usize>>,
    image_delay: Mutex<Duration>,
    requests: Mutex<Vec<HashMap<String, String>>>,
    image_requests: Mutex<usize>,
}

/// Running fake server; stops when dropped
pub struct FakeFlickr {
    state: Arc<FakeState>,
    server: tokio::task::JoinHandle<()>,
}

impl FakeFlickr {
    pub async fn start(behavior: SearchBehavior) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let state = Arc::new(FakeState {
            base_url: format!("http://{}", addr),
            behavior: Mutex::new(behavior),
            broken_images: Mutex::new(BTreeSet::new()),
            image_delay: Mutex::new(Duration::ZERO),
            requests: Mutex::new(Vec::new()),
            image_requests: Mutex::new(0),
        });

        let router = Router::new()
            .route("/services/rest", get(search))
            .route("/images/:index", get(image))
            .with_state(Arc::clone(&state));

        let server = tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        Self { state, server }
    }

    pub fn base_url(&self) -> &str {
        &self.state.base_url
    }

    pub fn config(&self) -> FlickrConfig {
        FlickrConfig {
            api_key: "test-key".to_string(),
            base_url: self.state.base_url.clone(),
            timeout_secs: 5,
        }
    }

    pub fn set_behavior(&self, behavior: SearchBehavior) {
        *self.state.behavior.lock().unwrap() = behavior;
    }

    /// Image at `index` answers 404
    pub fn break_image(&self, index: usize) {
        self.state.broken_images.lock().unwrap().insert(index);
    }

    pub fn set_image_delay(&self, delay: Duration) {
        *self.state.image_delay.lock().unwrap() = delay;
    }

    /// Query parameters of every search request so far
    pub fn requests(&self) -> Vec<HashMap<String, String>> {
        self.state.requests.lock().unwrap().clone()
    }

    pub fn image_request_count(&self) -> usize {
        *self.state.image_requests.lock().unwrap()
    }
}

impl Drop for FakeFlickr {
    fn drop(&mut self) {
        self.server.abort();
    }
}

/// Bytes served for image `index`
pub fn image_bytes(index: usize) -> Vec<u8> {
    vec![0xFF, 0xD8, index as u8]
}

async fn search(
    State(state): State<Arc<FakeState>>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let page = params
        .get("page")
        .and_then(|p| p.parse::<u32>().ok())
        .unwrap_or(1);
    state.requests.lock().unwrap().push(params);

    let behavior = state.behavior.lock().unwrap().clone();
    match behavior {
        SearchBehavior::Photos {
            pages,
            total,
            with_url,
        } => {
            let photo: Vec<Value> = with_url
                .iter()
                .enumerate()
                .map(|(i, has_url)| {
                    let mut item = json!({
                        "id": format!("{}", i),
                        "title": format!("Photo {}", i),
                    });
                    if *has_url {
                        item["url_m"] = json!(format!("{}/images/{}", state.base_url, i));
                    }
                    item
                })
                .collect();
            Json(json!({
                "photos": {
                    "page": page,
                    "pages": pages,
                    "perpage": 30,
                    "total": total,
                    "photo": photo,
                },
                "stat": "ok",
            }))
            .into_response()
        }
        SearchBehavior::Fail { code, message } => Json(json!({
            "stat": "fail",
            "code": code,
            "message": message,
        }))
        .into_response(),
        SearchBehavior::Raw(body) => Json(body).into_response(),
        SearchBehavior::Status(code) => StatusCode::from_u16(code)
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
            .into_response(),
    }
}

async fn image(State(state): State<Arc<FakeState>>, Path(index): Path<usize>) -> Response {
    *state.image_requests.lock().unwrap() += 1;
    let delay = *state.image_delay.lock().unwrap();
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }

    if state.broken_images.lock().unwrap().contains(&index) {
        return StatusCode::NOT_FOUND.into_response();
    }
    image_bytes(index).into_response()
}
