//! The `CloudApi` façade and its HTTP implementation.
//!
//! One method = one HTTP request. No retries happen here; callers decide
//! what to do with a typed [`ApiError`].
//!
//! ```text
//! HttpCloudApi
//!   ├── build request (origin-form URI, JSON body)
//!   ├── RequestSigner::sign()
//!   ├── TcpStream → (tokio-rustls for https) → hyper http1 handshake
//!   └── status + body → domain type | ApiError
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use http::{Method, Request, StatusCode, header};
use http_body_util::{BodyExt, Full};
use hyper_util::rt::TokioIo;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tracing::debug;

use crate::error::{ApiError, ApiResult};
use crate::signer::{NoopSigner, RequestSigner};
use crate::types::*;
use crate::wire::{self, convert_all};

/// Typed access to the subset of the Exoscale API the autoscaler uses.
///
/// Implementations must be safe for concurrent use. The zone is fixed when
/// the implementation is constructed.
#[async_trait]
pub trait CloudApi: Send + Sync {
    fn zone(&self) -> &Zone;

    async fn list_pools(&self) -> ApiResult<Vec<Pool>>;

    async fn get_pool(&self, id: &str) -> ApiResult<Pool>;

    async fn list_sks_clusters(&self) -> ApiResult<Vec<SksCluster>>;

    async fn list_instances(&self, filter: Option<&ManagerFilter>) -> ApiResult<Vec<Instance>>;

    async fn get_instance(&self, id: &str) -> ApiResult<Instance>;

    /// Set the pool's target size.
    async fn scale_pool(&self, pool: &PoolRef, size: u64) -> ApiResult<Operation>;

    /// Remove the named members and decrement the pool size accordingly.
    async fn evict_pool_members(
        &self,
        pool: &PoolRef,
        instance_ids: &[InstanceId],
    ) -> ApiResult<Operation>;

    async fn delete_instance(&self, id: &str) -> ApiResult<Operation>;

    async fn get_operation(&self, id: &str) -> ApiResult<Operation>;

    async fn list_quotas(&self) -> ApiResult<Vec<Quota>>;

    async fn list_instance_types(&self) -> ApiResult<Vec<InstanceType>>;
}

// ── Endpoint ───────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct Endpoint {
    tls: bool,
    host: String,
    port: u16,
    /// Always ends with `/`.
    base_path: String,
}

impl Endpoint {
    fn parse(url: &str) -> ApiResult<Self> {
        let uri: http::Uri = url
            .parse()
            .map_err(|e| ApiError::Transport(format!("invalid endpoint {url:?}: {e}")))?;
        let tls = match uri.scheme_str() {
            Some("https") => true,
            Some("http") => false,
            other => {
                return Err(ApiError::Transport(format!(
                    "unsupported endpoint scheme {other:?} in {url:?}"
                )));
            }
        };
        let authority = uri
            .authority()
            .ok_or_else(|| ApiError::Transport(format!("endpoint {url:?} has no host")))?;
        let port = authority.port_u16().unwrap_or(if tls { 443 } else { 80 });

        let mut base_path = uri.path().to_string();
        if !base_path.ends_with('/') {
            base_path.push('/');
        }

        // IPv6 literals keep their brackets in the authority.
        let host = authority.host();
        let host = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host);

        Ok(Self {
            tls,
            host: host.to_string(),
            port,
            base_path,
        })
    }

    fn host_header(&self) -> String {
        let host = if self.host.contains(':') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        };
        let default_port = if self.tls { 443 } else { 80 };
        if self.port == default_port {
            host
        } else {
            format!("{host}:{}", self.port)
        }
    }
}

// ── HttpCloudApi ───────────────────────────────────────────────────

/// Builder for [`HttpCloudApi`].
pub struct HttpCloudApiBuilder {
    zone: Zone,
    endpoint: Option<String>,
    signer: Arc<dyn RequestSigner>,
    request_timeout: Duration,
}

impl HttpCloudApiBuilder {
    /// Override the zone-derived base URL.
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn signer(mut self, signer: Arc<dyn RequestSigner>) -> Self {
        self.signer = signer;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn build(self) -> ApiResult<HttpCloudApi> {
        let url = self
            .endpoint
            .unwrap_or_else(|| self.zone.default_endpoint());
        let endpoint = Endpoint::parse(&url)?;
        let tls = if endpoint.tls {
            Some(tls_connector()?)
        } else {
            None
        };

        debug!(zone = %self.zone, %url, "exoscale api client configured");

        Ok(HttpCloudApi {
            inner: Arc::new(Inner {
                zone: self.zone,
                endpoint,
                signer: self.signer,
                tls,
                request_timeout: self.request_timeout,
            }),
        })
    }
}

struct Inner {
    zone: Zone,
    endpoint: Endpoint,
    signer: Arc<dyn RequestSigner>,
    tls: Option<TlsConnector>,
    request_timeout: Duration,
}

/// `CloudApi` over HTTP/1.1, one connection per request.
#[derive(Clone)]
pub struct HttpCloudApi {
    inner: Arc<Inner>,
}

impl HttpCloudApi {
    pub fn builder(zone: Zone) -> HttpCloudApiBuilder {
        HttpCloudApiBuilder {
            zone,
            endpoint: None,
            signer: Arc::new(NoopSigner),
            request_timeout: Duration::from_secs(30),
        }
    }

    fn uri(&self, path: &str, query: Option<&str>) -> String {
        let mut uri = format!("{}{}", self.inner.endpoint.base_path, path);
        if let Some(q) = query.filter(|q| !q.is_empty()) {
            uri.push('?');
            uri.push_str(q);
        }
        uri
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, query: Option<&str>) -> ApiResult<T> {
        let bytes = self.send(Method::GET, path, query, None).await?;
        decode(&bytes, path)
    }

    async fn put_json<B: Serialize>(&self, path: &str, body: &B) -> ApiResult<Operation> {
        let body = serde_json::to_vec(body)
            .map_err(|e| ApiError::Protocol(format!("encoding {path} body: {e}")))?;
        let bytes = self.send(Method::PUT, path, None, Some(body)).await?;
        decode_operation(&bytes, path)
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        query: Option<&str>,
        body: Option<Vec<u8>>,
    ) -> ApiResult<Bytes> {
        let uri = self.uri(path, query);
        let mut builder = Request::builder()
            .method(method.clone())
            .uri(&uri)
            .header(header::HOST, self.inner.endpoint.host_header())
            .header(header::USER_AGENT, concat!("exoscale-autoscaler/", env!("CARGO_PKG_VERSION")))
            .header(header::ACCEPT, "application/json");
        if body.is_some() {
            builder = builder.header(header::CONTENT_TYPE, "application/json");
        }
        let mut req = builder
            .body(body.map(Bytes::from).unwrap_or_default())
            .map_err(|e| ApiError::Transport(format!("building request {method} {uri}: {e}")))?;

        self.inner.signer.sign(&mut req)?;

        let started = Instant::now();
        let (status, bytes) = tokio::time::timeout(self.inner.request_timeout, self.dispatch(req))
            .await
            .map_err(|_| {
                ApiError::Transport(format!(
                    "{method} {uri}: no response within {:?}",
                    self.inner.request_timeout
                ))
            })??;

        debug!(
            %method,
            %uri,
            status = status.as_u16(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "exoscale api request"
        );

        if !status.is_success() {
            return Err(ApiError::from_response(status, &bytes));
        }
        Ok(bytes)
    }

    async fn dispatch(&self, req: Request<Bytes>) -> ApiResult<(StatusCode, Bytes)> {
        let endpoint = &self.inner.endpoint;
        let stream = TcpStream::connect((endpoint.host.as_str(), endpoint.port))
            .await
            .map_err(|e| {
                ApiError::Transport(format!("connect {}:{}: {e}", endpoint.host, endpoint.port))
            })?;
        let _ = stream.set_nodelay(true);

        let req = req.map(Full::new);
        match &self.inner.tls {
            Some(connector) => {
                let server_name = rustls::pki_types::ServerName::try_from(endpoint.host.clone())
                    .map_err(|e| {
                        ApiError::Transport(format!("invalid tls server name {:?}: {e}", endpoint.host))
                    })?;
                let tls = connector
                    .connect(server_name, stream)
                    .await
                    .map_err(|e| ApiError::Transport(format!("tls handshake: {e}")))?;
                exchange(TokioIo::new(tls), req).await
            }
            None => exchange(TokioIo::new(stream), req).await,
        }
    }
}

/// Run one request/response exchange over an established connection.
async fn exchange<I>(io: I, req: Request<Full<Bytes>>) -> ApiResult<(StatusCode, Bytes)>
where
    I: hyper::rt::Read + hyper::rt::Write + Unpin + Send + 'static,
{
    let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
        .await
        .map_err(|e| ApiError::Transport(format!("http handshake: {e}")))?;

    // Drive the connection in the background.
    tokio::spawn(async move {
        if let Err(e) = conn.await {
            debug!(error = %e, "exoscale api connection closed with error");
        }
    });

    let resp = sender
        .send_request(req)
        .await
        .map_err(|e| ApiError::Transport(format!("sending request: {e}")))?;
    let status = resp.status();
    let body = resp
        .into_body()
        .collect()
        .await
        .map_err(|e| ApiError::Transport(format!("reading response body: {e}")))?
        .to_bytes();
    Ok((status, body))
}

fn tls_connector() -> ApiResult<TlsConnector> {
    let mut root_store = rustls::RootCertStore::empty();
    root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    let config = rustls::ClientConfig::builder_with_provider(
        rustls::crypto::ring::default_provider().into(),
    )
    .with_safe_default_protocol_versions()
    .map_err(|e| ApiError::Transport(format!("tls protocol version error: {e}")))?
    .with_root_certificates(root_store)
    .with_no_client_auth();

    Ok(TlsConnector::from(Arc::new(config)))
}

fn decode<T: DeserializeOwned>(bytes: &[u8], what: &str) -> ApiResult<T> {
    serde_json::from_slice(bytes)
        .map_err(|e| ApiError::Protocol(format!("decoding {what} response: {e}")))
}

fn decode_operation(bytes: &[u8], what: &str) -> ApiResult<Operation> {
    let envelope: wire::OperationEnvelope = decode(bytes, what)?;
    Operation::try_from(envelope.into_inner())
}

fn pool_path(pool: &PoolRef) -> String {
    match &pool.manager {
        PoolManagerRef::InstancePool => format!("instance-pool/{}", pool.id),
        PoolManagerRef::SksNodepool {
            cluster_id,
            nodepool_id,
        } => format!("sks-cluster/{cluster_id}/nodepool/{nodepool_id}"),
    }
}

fn instance_query(filter: Option<&ManagerFilter>) -> Option<String> {
    let filter = filter?;
    let mut query = format!("manager-type={}", filter.kind);
    if let Some(id) = &filter.id {
        query.push_str("&manager-id=");
        query.push_str(id);
    }
    Some(query)
}

#[async_trait]
impl CloudApi for HttpCloudApi {
    fn zone(&self) -> &Zone {
        &self.inner.zone
    }

    async fn list_pools(&self) -> ApiResult<Vec<Pool>> {
        let resp: wire::ListInstancePoolsResponse = self.get("instance-pool", None).await?;
        convert_all(resp.instance_pools)
    }

    async fn get_pool(&self, id: &str) -> ApiResult<Pool> {
        let resp: wire::WireInstancePool =
            self.get(&format!("instance-pool/{id}"), None).await?;
        Pool::try_from(resp)
    }

    async fn list_sks_clusters(&self) -> ApiResult<Vec<SksCluster>> {
        let resp: wire::ListSksClustersResponse = self.get("sks-cluster", None).await?;
        convert_all(resp.sks_clusters)
    }

    async fn list_instances(&self, filter: Option<&ManagerFilter>) -> ApiResult<Vec<Instance>> {
        let query = instance_query(filter);
        let resp: wire::ListInstancesResponse = self.get("instance", query.as_deref()).await?;
        convert_all(resp.instances)
    }

    async fn get_instance(&self, id: &str) -> ApiResult<Instance> {
        let resp: wire::WireInstance = self.get(&format!("instance/{id}"), None).await?;
        Instance::try_from(resp)
    }

    async fn scale_pool(&self, pool: &PoolRef, size: u64) -> ApiResult<Operation> {
        let path = format!("{}:scale", pool_path(pool));
        self.put_json(&path, &wire::ScaleRequest { size }).await
    }

    async fn evict_pool_members(
        &self,
        pool: &PoolRef,
        instance_ids: &[InstanceId],
    ) -> ApiResult<Operation> {
        let path = format!("{}:evict", pool_path(pool));
        self.put_json(&path, &wire::EvictRequest { instances: instance_ids })
            .await
    }

    async fn delete_instance(&self, id: &str) -> ApiResult<Operation> {
        let path = format!("instance/{id}");
        let bytes = self.send(Method::DELETE, &path, None, None).await?;
        decode_operation(&bytes, &path)
    }

    async fn get_operation(&self, id: &str) -> ApiResult<Operation> {
        let path = format!("operation/{id}");
        let bytes = self.send(Method::GET, &path, None, None).await?;
        decode_operation(&bytes, &path)
    }

    async fn list_quotas(&self) -> ApiResult<Vec<Quota>> {
        let resp: wire::ListQuotasResponse = self.get("quota", None).await?;
        convert_all(resp.quotas)
    }

    async fn list_instance_types(&self) -> ApiResult<Vec<InstanceType>> {
        let resp: wire::ListInstanceTypesResponse = self.get("instance-type", None).await?;
        convert_all(resp.instance_types)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_defaults_ports_and_path() {
        let ep = Endpoint::parse("https://api-ch-gva-2.exoscale.com/v2").unwrap();
        assert!(ep.tls);
        assert_eq!(ep.port, 443);
        assert_eq!(ep.base_path, "/v2/");
        assert_eq!(ep.host_header(), "api-ch-gva-2.exoscale.com");

        let ep = Endpoint::parse("http://127.0.0.1:8080/").unwrap();
        assert!(!ep.tls);
        assert_eq!(ep.host_header(), "127.0.0.1:8080");
    }

    #[test]
    fn endpoint_unwraps_ipv6_literal() {
        let ep = Endpoint::parse("http://[::1]:8080/v2").unwrap();
        assert_eq!(ep.host, "::1");
        assert_eq!(ep.port, 8080);
        assert_eq!(ep.host_header(), "[::1]:8080");

        let ep = Endpoint::parse("https://[2001:db8::1]/").unwrap();
        assert_eq!(ep.host, "2001:db8::1");
        assert_eq!(ep.host_header(), "[2001:db8::1]");
        assert!(rustls::pki_types::ServerName::try_from(ep.host.clone()).is_ok());
    }

    #[test]
    fn endpoint_rejects_unknown_scheme() {
        assert!(matches!(
            Endpoint::parse("ftp://example.com/"),
            Err(ApiError::Transport(_))
        ));
    }

    #[test]
    fn pool_paths_follow_manager() {
        assert_eq!(pool_path(&PoolRef::instance_pool("p1")), "instance-pool/p1");
        assert_eq!(
            pool_path(&PoolRef::sks_nodepool("p1", "c1", "np1")),
            "sks-cluster/c1/nodepool/np1"
        );
    }

    #[test]
    fn instance_query_shapes() {
        assert_eq!(instance_query(None), None);
        assert_eq!(
            instance_query(Some(&ManagerFilter::instance_pools())).as_deref(),
            Some("manager-type=instance-pool")
        );
        assert_eq!(
            instance_query(Some(&ManagerFilter::instance_pool("p1"))).as_deref(),
            Some("manager-type=instance-pool&manager-id=p1")
        );
    }

    #[test]
    fn builder_uses_zone_endpoint() {
        let api = HttpCloudApi::builder(Zone::new("de-fra-1"))
            .endpoint("http://localhost:9000/v2/")
            .build()
            .unwrap();
        assert_eq!(api.zone().as_str(), "de-fra-1");
        assert_eq!(api.uri("quota", None), "/v2/quota");
        assert_eq!(api.uri("instance", Some("a=b")), "/v2/instance?a=b");
    }
}
