//! Drives [`KubeBackend`] against a minimal in-process API server.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Json;
use axum::Router;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use bytes::Bytes;
use jobgate_core::{BackendError, ExecutionBackend, UnitStatus};
use jobgate_kube::{JobTemplate, KubeBackend, KubeConfig};
use serde_json::{Value, json};

#[derive(Default)]
struct Cluster {
    config_maps: HashMap<String, Value>,
    jobs: HashMap<String, Value>,
    finished: HashSet<String>,
    deletes: Vec<String>,
    auth: Vec<Option<String>>,
}

type Shared = Arc<Mutex<Cluster>>;

fn status(code: StatusCode, reason: &str, message: String) -> Response {
    let body = json!({
        "kind": "Status",
        "apiVersion": "v1",
        "status": "Failure",
        "message": message,
        "reason": reason,
        "code": code.as_u16(),
    });
    (code, Json(body)).into_response()
}

async fn create_config_map(
    State(c): State<Shared>,
    headers: axum::http::HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let mut c = c.lock().unwrap();
    c.auth.push(
        headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned),
    );
    let name = body["metadata"]["name"].as_str().unwrap_or_default().to_owned();
    if c.config_maps.contains_key(&name) {
        return status(StatusCode::CONFLICT, "AlreadyExists", format!("configmaps \"{name}\" already exists"));
    }
    c.config_maps.insert(name, body.clone());
    (StatusCode::CREATED, Json(body)).into_response()
}

async fn create_job(State(c): State<Shared>, Json(body): Json<Value>) -> Response {
    let mut c = c.lock().unwrap();
    let name = body["metadata"]["name"].as_str().unwrap_or_default().to_owned();
    if body["spec"]["template"]["spec"]["containers"][0]["image"] == "invalid" {
        return status(StatusCode::UNPROCESSABLE_ENTITY, "Invalid", format!("Job.batch \"{name}\" is invalid"));
    }
    c.jobs.insert(name, body.clone());
    (StatusCode::CREATED, Json(body)).into_response()
}

async fn get_job(State(c): State<Shared>, Path((_ns, name)): Path<(String, String)>) -> Response {
    if name == "stalled" {
        tokio::time::sleep(Duration::from_secs(30)).await;
    }
    let c = c.lock().unwrap();
    if !c.jobs.contains_key(&name) {
        return status(StatusCode::NOT_FOUND, "NotFound", format!("jobs.batch \"{name}\" not found"));
    }
    let job_status = if c.finished.contains(&name) {
        json!({ "succeeded": 1 })
    } else {
        json!({ "active": 1 })
    };
    Json(json!({ "metadata": { "name": name }, "status": job_status })).into_response()
}

async fn list_pods(State(c): State<Shared>, Query(q): Query<HashMap<String, String>>) -> Response {
    let c = c.lock().unwrap();
    let job = q
        .get("labelSelector")
        .and_then(|s| s.strip_prefix("job-name="))
        .unwrap_or_default();
    let items: Vec<Value> = if c.jobs.contains_key(job) {
        vec![json!({ "metadata": { "name": format!("{job}-x7k2p") } })]
    } else {
        Vec::new()
    };
    Json(json!({ "kind": "PodList", "items": items })).into_response()
}

async fn pod_log(Path((_ns, pod)): Path<(String, String)>) -> Response {
    if pod.ends_with("-x7k2p") {
        (StatusCode::OK, "{\"score\":100}\n").into_response()
    } else {
        status(StatusCode::NOT_FOUND, "NotFound", format!("pods \"{pod}\" not found"))
    }
}

async fn delete_config_map(
    State(c): State<Shared>,
    Path((_ns, name)): Path<(String, String)>,
    Query(q): Query<HashMap<String, String>>,
) -> Response {
    delete_object(&c, "configmaps", &name, &q)
}

async fn delete_job(
    State(c): State<Shared>,
    Path((_ns, name)): Path<(String, String)>,
    Query(q): Query<HashMap<String, String>>,
) -> Response {
    delete_object(&c, "jobs", &name, &q)
}

fn delete_object(c: &Shared, kind: &str, name: &str, q: &HashMap<String, String>) -> Response {
    let mut c = c.lock().unwrap();
    assert_eq!(q.get("propagationPolicy").map(String::as_str), Some("Background"));
    c.deletes.push(format!("{kind}/{name}"));
    let removed = match kind {
        "configmaps" => c.config_maps.remove(name).is_some(),
        _ => c.jobs.remove(name).is_some(),
    };
    if removed {
        Json(json!({ "kind": "Status", "status": "Success" })).into_response()
    } else {
        status(StatusCode::NOT_FOUND, "NotFound", format!("{kind} \"{name}\" not found"))
    }
}

async fn start() -> (KubeConfig, Shared) {
    let cluster: Shared = Arc::default();
    let app = Router::new()
        .route("/api/v1/namespaces/{ns}/configmaps", post(create_config_map))
        .route("/api/v1/namespaces/{ns}/configmaps/{name}", delete(delete_config_map))
        .route("/apis/batch/v1/namespaces/{ns}/jobs", post(create_job))
        .route(
            "/apis/batch/v1/namespaces/{ns}/jobs/{name}",
            get(get_job).delete(delete_job),
        )
        .route("/api/v1/namespaces/{ns}/pods", get(list_pods))
        .route("/api/v1/namespaces/{ns}/pods/{pod}/log", get(pod_log))
        .with_state(cluster.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (KubeConfig::with_url(format!("http://{addr}")), cluster)
}

#[tokio::test]
async fn full_job_round_trip() {
    let (mut cfg, cluster) = start().await;
    cfg.token = Some("sa-token".into());
    let kube = KubeBackend::new(cfg, JobTemplate::default()).unwrap();

    let artifact = kube
        .create_artifact("script-cm-alice-hw1-1", Bytes::from_static(b"PK\x03\x04"))
        .await
        .unwrap();
    kube.create_execution_unit("alice-hw1-1", &artifact).await.unwrap();

    {
        let c = cluster.lock().unwrap();
        assert_eq!(c.config_maps["script-cm-alice-hw1-1"]["binaryData"]["archive.zip"], "UEsDBA==");
        assert_eq!(
            c.jobs["alice-hw1-1"]["spec"]["template"]["spec"]["volumes"][0]["configMap"]["name"],
            "script-cm-alice-hw1-1"
        );
        assert_eq!(c.auth, vec![Some("Bearer sa-token".to_owned())]);
    }

    assert_eq!(kube.unit_status("alice-hw1-1").await.unwrap(), UnitStatus::Running);
    cluster.lock().unwrap().finished.insert("alice-hw1-1".into());
    assert_eq!(kube.unit_status("alice-hw1-1").await.unwrap(), UnitStatus::Succeeded);

    let source = kube.output_source("alice-hw1-1").await.unwrap();
    assert_eq!(source.name, "alice-hw1-1-x7k2p");
    let out = kube.read_output(&source).await.unwrap();
    assert_eq!(&out[..], b"{\"score\":100}\n");

    kube.delete_execution_unit("alice-hw1-1").await.unwrap();
    kube.delete_artifact("script-cm-alice-hw1-1").await.unwrap();

    let c = cluster.lock().unwrap();
    assert!(c.jobs.is_empty() && c.config_maps.is_empty());
    assert_eq!(c.deletes, ["jobs/alice-hw1-1", "configmaps/script-cm-alice-hw1-1"]);
}

#[tokio::test]
async fn deleting_missing_objects_is_ok() {
    let (cfg, _cluster) = start().await;
    let kube = KubeBackend::new(cfg, JobTemplate::default()).unwrap();

    kube.delete_execution_unit("gone").await.unwrap();
    kube.delete_artifact("script-cm-gone").await.unwrap();
}

#[tokio::test]
async fn api_errors_carry_the_status_message() {
    let (cfg, _cluster) = start().await;
    let kube = KubeBackend::new(
        cfg,
        JobTemplate {
            image: "invalid".into(),
            ..JobTemplate::default()
        },
    )
    .unwrap();

    let artifact = kube.create_artifact("cm", Bytes::from_static(b"x")).await.unwrap();
    let err = kube.create_artifact("cm", Bytes::from_static(b"x")).await.unwrap_err();
    assert_eq!(
        err,
        BackendError::Rejected {
            status: 409,
            message: "configmaps \"cm\" already exists".into(),
        }
    );

    let err = kube.create_execution_unit("j", &artifact).await.unwrap_err();
    assert!(matches!(err, BackendError::Rejected { status: 422, .. }), "{err}");

    let err = kube.unit_status("never-created").await.unwrap_err();
    assert!(err.is_not_found(), "{err}");

    let err = kube.output_source("never-created").await.unwrap_err();
    assert_eq!(err, BackendError::NoOutput { unit: "never-created".into() });
}

#[tokio::test]
async fn unreachable_api_is_reported() {
    // Port 9 (discard) on localhost is closed in test environments.
    let kube = KubeBackend::new(KubeConfig::with_url("http://127.0.0.1:9"), JobTemplate::default()).unwrap();
    let err = kube.unit_status("x").await.unwrap_err();
    assert!(matches!(err, BackendError::Unreachable(_)), "{err}");
}

#[tokio::test]
async fn slow_api_requests_time_out() {
    let (mut cfg, _cluster) = start().await;
    cfg.request_timeout = Duration::from_millis(100);
    let kube = KubeBackend::new(cfg, JobTemplate::default()).unwrap();

    let err = tokio::time::timeout(Duration::from_secs(5), kube.unit_status("stalled"))
        .await
        .expect("client gave up on its own")
        .unwrap_err();
    assert!(matches!(&err, BackendError::Unreachable(m) if m.contains("timed out")), "{err}");
}
