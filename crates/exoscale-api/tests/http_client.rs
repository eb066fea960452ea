//! `HttpCloudApi` against a mock Exoscale API server.
//!
//! The mock speaks HTTP/1.1 over real TCP via hyper's server connection,
//! answers from a fixed route table and records every request it sees.
//!
//! The test stack: `HttpCloudApi` → TCP → `MockExoscaleServer`

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use http::{Request, Response, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;

use exoscale_api::{
    ApiError, ApiKeySigner, CloudApi, ErrorKind, HttpCloudApi, InstanceState, ManagerFilter,
    OperationState, PoolRef, PoolState, Zone,
};

// ── MockExoscaleServer ──────────────────────────────────────────────

#[derive(Debug, Clone)]
struct Recorded {
    method: String,
    path_and_query: String,
    body: String,
    authorization: Option<String>,
}

type Routes = Arc<dyn Fn(&str, &str) -> (StatusCode, String) + Send + Sync>;

struct MockExoscaleServer {
    addr: SocketAddr,
    requests: Arc<Mutex<Vec<Recorded>>>,
}

impl MockExoscaleServer {
    async fn start(routes: Routes) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind to random port");
        let addr = listener.local_addr().expect("local addr");
        let requests = Arc::new(Mutex::new(Vec::new()));

        let log = requests.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let routes = routes.clone();
                let log = log.clone();
                tokio::spawn(async move {
                    let service = service_fn(move |req: Request<Incoming>| {
                        let routes = routes.clone();
                        let log = log.clone();
                        async move { Ok::<_, Infallible>(Self::handle(req, &routes, &log).await) }
                    });
                    let _ = hyper::server::conn::http1::Builder::new()
                        .serve_connection(TokioIo::new(stream), service)
                        .await;
                });
            }
        });

        Self { addr, requests }
    }

    async fn handle(
        req: Request<Incoming>,
        routes: &Routes,
        log: &Mutex<Vec<Recorded>>,
    ) -> Response<Full<Bytes>> {
        let method = req.method().to_string();
        let path_and_query = req
            .uri()
            .path_and_query()
            .map(|pq| pq.to_string())
            .unwrap_or_default();
        let authorization = req
            .headers()
            .get(http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = req.into_body().collect().await.unwrap().to_bytes();

        log.lock().unwrap().push(Recorded {
            method: method.clone(),
            path_and_query: path_and_query.clone(),
            body: String::from_utf8_lossy(&body).into_owned(),
            authorization,
        });

        let (status, payload) = routes(&method, &path_and_query);
        Response::builder()
            .status(status)
            .header(http::header::CONTENT_TYPE, "application/json")
            .body(Full::new(Bytes::from(payload)))
            .unwrap()
    }

    fn client(&self) -> HttpCloudApi {
        HttpCloudApi::builder(Zone::new("ch-gva-2"))
            .endpoint(format!("http://{}/v2/", self.addr))
            .signer(Arc::new(ApiKeySigner::new("EXOtest", "secret")))
            .request_timeout(Duration::from_secs(5))
            .build()
            .expect("client")
    }

    fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().unwrap().clone()
    }
}

fn ok(body: &str) -> (StatusCode, String) {
    (StatusCode::OK, body.to_string())
}

fn exoscale_routes() -> Routes {
    Arc::new(|method: &str, path: &str| match (method, path) {
        ("GET", "/v2/instance-pool") => ok(r#"{"instance-pools": [
            {"id": "p1", "name": "workers", "size": 2, "state": "running",
             "instance-type": {"id": "t1"},
             "instances": [{"id": "i1"}, {"id": "i2"}]},
            {"id": "p2", "name": "gpu", "size": 0, "state": "scaling-up",
             "instance-type": {"id": "t2"},
             "manager": {"id": "np2", "type": "sks-nodepool"}}
        ]}"#),
        ("GET", "/v2/instance?manager-type=instance-pool&manager-id=p1") => ok(r#"{"instances": [
            {"id": "i1", "name": "a", "state": "running", "manager": {"id": "p1", "type": "instance-pool"}},
            {"id": "i2", "name": "b", "state": "starting", "manager": {"id": "p1", "type": "instance-pool"}}
        ]}"#),
        ("PUT", "/v2/instance-pool/p1:scale") => ok(r#"{"id": "op-1", "state": "pending", "reference": {"id": "p1"}}"#),
        ("PUT", "/v2/sks-cluster/c1/nodepool/np2:evict") => {
            ok(r#"{"operation": {"id": "op-2", "state": "pending"}}"#)
        }
        ("GET", "/v2/operation/op-1") => ok(r#"{"id": "op-1", "state": "success"}"#),
        ("GET", "/v2/operation/op-bad") => ok(r#"{"id": "op-bad", "state": "exploded"}"#),
        ("GET", "/v2/quota") => ok(r#"{"quotas": [{"resource": "instance", "usage": 9, "limit": 10}]}"#),
        ("DELETE", "/v2/instance/i9") => (
            StatusCode::NOT_FOUND,
            r#"{"message": "instance i9 not found", "reason": "not-found"}"#.to_string(),
        ),
        ("GET", "/v2/instance-pool/busy") => (
            StatusCode::CONFLICT,
            r#"{"message": "pool is being updated", "reason": "busy"}"#.to_string(),
        ),
        ("GET", "/v2/instance-pool/quota") => (
            StatusCode::FORBIDDEN,
            r#"{"message": "Quota exceeded for resource instance", "reason": "forbidden"}"#
                .to_string(),
        ),
        ("GET", "/v2/instance-pool/garbage") => ok("<html>not json</html>"),
        ("GET", "/v2/instance-pool/oops") => (StatusCode::BAD_GATEWAY, String::new()),
        _ => (
            StatusCode::NOT_FOUND,
            r#"{"message": "no such route", "reason": "not-found"}"#.to_string(),
        ),
    })
}

// ── Tests ───────────────────────────────────────────────────────────

#[tokio::test]
async fn lists_pools_into_domain_types() {
    let server = MockExoscaleServer::start(exoscale_routes()).await;
    let pools = server.client().list_pools().await.unwrap();

    assert_eq!(pools.len(), 2);
    assert_eq!(pools[0].id, "p1");
    assert_eq!(pools[0].instance_ids, vec!["i1", "i2"]);
    assert_eq!(pools[1].state, PoolState::ScalingUp);

    let reqs = server.requests();
    assert_eq!(reqs.len(), 1);
    assert_eq!(reqs[0].method, "GET");
    let auth = reqs[0].authorization.as_deref().unwrap();
    assert!(auth.starts_with("EXO2-HMAC-SHA256 credential=EXOtest,"));
}

#[tokio::test]
async fn list_instances_sends_manager_filter() {
    let server = MockExoscaleServer::start(exoscale_routes()).await;
    let instances = server
        .client()
        .list_instances(Some(&ManagerFilter::instance_pool("p1")))
        .await
        .unwrap();

    assert_eq!(instances.len(), 2);
    assert_eq!(instances[1].state, InstanceState::Creating);
    assert_eq!(instances[0].pool_id.as_deref(), Some("p1"));
    let auth = server.requests()[0].authorization.clone().unwrap();
    assert!(auth.contains("signed-query-args=manager-id;manager-type"));
}

#[tokio::test]
async fn scale_puts_size_body_and_decodes_operation() {
    let server = MockExoscaleServer::start(exoscale_routes()).await;
    let op = server
        .client()
        .scale_pool(&PoolRef::instance_pool("p1"), 4)
        .await
        .unwrap();

    assert_eq!(op.id, "op-1");
    assert_eq!(op.state, OperationState::Pending);
    let req = &server.requests()[0];
    assert_eq!(req.method, "PUT");
    assert_eq!(req.path_and_query, "/v2/instance-pool/p1:scale");
    assert_eq!(req.body, r#"{"size":4}"#);
}

#[tokio::test]
async fn evict_routes_through_sks_nodepool() {
    let server = MockExoscaleServer::start(exoscale_routes()).await;
    let pool = PoolRef::sks_nodepool("p2", "c1", "np2");
    let op = server
        .client()
        .evict_pool_members(&pool, &["i5".to_string()])
        .await
        .unwrap();

    assert_eq!(op.id, "op-2");
    let req = &server.requests()[0];
    assert_eq!(req.path_and_query, "/v2/sks-cluster/c1/nodepool/np2:evict");
    assert_eq!(req.body, r#"{"instances":["i5"]}"#);
}

#[tokio::test]
async fn operation_states_are_strict() {
    let server = MockExoscaleServer::start(exoscale_routes()).await;
    let client = server.client();

    let done = client.get_operation("op-1").await.unwrap();
    assert_eq!(done.state, OperationState::Success);

    let err = client.get_operation("op-bad").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Protocol);
}

#[tokio::test]
async fn error_envelopes_map_to_kinds() {
    let server = MockExoscaleServer::start(exoscale_routes()).await;
    let client = server.client();

    let err = client.delete_instance("i9").await.unwrap_err();
    assert_eq!(err, ApiError::NotFound("instance i9 not found".to_string()));

    let err = client.get_pool("busy").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Busy);

    match client.get_pool("quota").await.unwrap_err() {
        ApiError::Quota { resource, .. } => assert_eq!(resource, "instance"),
        other => panic!("unexpected error: {other:?}"),
    }

    let err = client.get_pool("garbage").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Protocol);

    let err = client.get_pool("oops").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Internal);
}

#[tokio::test]
async fn quotas_decode() {
    let server = MockExoscaleServer::start(exoscale_routes()).await;
    let quotas = server.client().list_quotas().await.unwrap();
    assert_eq!(quotas[0].resource, "instance");
    assert_eq!(quotas[0].available(), Some(1));
}

#[tokio::test]
async fn unreachable_endpoint_is_transport_error() {
    // Bind then drop to get a port nobody listens on.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let client = HttpCloudApi::builder(Zone::new("ch-gva-2"))
        .endpoint(format!("http://{addr}/v2/"))
        .build()
        .unwrap();
    let err = client.list_quotas().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Transport);
    assert!(err.is_retriable());
}

#[tokio::test]
async fn slow_server_hits_request_timeout() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    // Accept and never answer.
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            held.push(stream);
        }
    });

    let client = HttpCloudApi::builder(Zone::new("ch-gva-2"))
        .endpoint(format!("http://{addr}/v2/"))
        .request_timeout(Duration::from_millis(200))
        .build()
        .unwrap();
    let err = client.list_pools().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Transport);
}
