//! gRPC mock server transport: binds a listener, wraps the dynamic
//! dispatch router in the same tower middleware stack the rest of this
//! codebase uses, and drives the accept loop with graceful shutdown.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use hyper_util::server::graceful::GracefulShutdown;
use hyper_util::service::TowerToHyperService;
use prost::Message as _;
use prost_types::FileDescriptorSet;
use tokio::net::TcpListener;
use tonic::body::BoxBody;
use tonic::service::Routes;
use tower::ServiceBuilder;
use tower_http::compression::CompressionLayer;
use tower_http::trace::TraceLayer;
use tower_service::Service;
use tracing::{debug, info, instrument, warn};

use crate::config::ResolvedConfig;
use crate::dispatch::DynamicRouter;
use crate::error::MockServerError;
use crate::registry::DescriptorRegistry;
use crate::table::MappingTable;

/// Fronts the [`DynamicRouter`] and, when enabled, the gRPC reflection
/// services, under a single `tower` middleware stack.
#[derive(Clone)]
struct AppService<S> {
  inner: S,
  reflection: Option<Routes>,
}

impl<S, B> Service<http::Request<B>> for AppService<S>
where
  S: Service<http::Request<B>, Response = http::Response<BoxBody>> + Clone + Send + 'static,
  S::Future: Send + 'static,
  B: http_body::Body<Data = Bytes> + Send + 'static,
  B::Error: Into<Box<dyn std::error::Error + Send + Sync>> + Send,
{
  type Response = http::Response<BoxBody>;
  type Error = S::Error;
  type Future = std::pin::Pin<Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>>;

  fn poll_ready(&mut self, cx: &mut std::task::Context<'_>) -> std::task::Poll<Result<(), Self::Error>> {
    self.inner.poll_ready(cx)
  }

  fn call(&mut self, req: http::Request<B>) -> Self::Future {
    if is_reflection_path(req.uri().path()) {
      if let Some(reflection) = &self.reflection {
        let mut reflection = reflection.clone();
        return Box::pin(async move { Ok(reflection.call(req).await.expect("Routes::call is infallible")) });
      }
    }
    Box::pin(self.inner.call(req))
  }
}

fn is_reflection_path(path: &str) -> bool {
  path.starts_with("/grpc.reflection.")
}

fn build_reflection(registry: &DescriptorRegistry) -> Result<Routes, MockServerError> {
  let file_descriptor_set = FileDescriptorSet {
    file: registry.pool().files().map(|f| f.file_descriptor_proto().clone()).collect(),
  };
  let encoded = file_descriptor_set.encode_to_vec();

  let v1 = tonic_reflection::server::Builder::configure()
    .register_encoded_file_descriptor_set(&encoded)
    .build_v1()
    .map_err(|err| MockServerError::Other(anyhow::anyhow!("failed to build gRPC reflection v1 service: {err}")))?;

  let v1alpha = tonic_reflection::server::Builder::configure()
    .register_encoded_file_descriptor_set(&encoded)
    .build_v1alpha()
    .map_err(|err| MockServerError::Other(anyhow::anyhow!("failed to build gRPC reflection v1alpha service: {err}")))?;

  Ok(Routes::new(v1).add_service(v1alpha))
}

/// Bind and serve until `shutdown` resolves, per §4.I/§5. Every accepted
/// connection gets its own task; `shutdown` triggers a graceful drain of
/// in-flight calls before the listening socket is dropped.
#[instrument(skip_all, fields(addr = %addr))]
pub async fn serve(
  addr: SocketAddr,
  config: &ResolvedConfig,
  registry: &DescriptorRegistry,
  table: Arc<MappingTable>,
  shutdown: impl std::future::Future<Output = ()>,
) -> Result<(), MockServerError> {
  let router = DynamicRouter::new(registry, table, config.grpc_discard_unknown_fields);

  let reflection = if config.grpc_server_reflection {
    info!("gRPC server reflection enabled");
    Some(build_reflection(registry)?)
  } else {
    None
  };

  let app = ServiceBuilder::new()
    .layer(TraceLayer::new_for_http())
    .layer(CompressionLayer::new())
    .service(AppService { inner: router, reflection });

  let listener = TcpListener::bind(addr).await
    .map_err(|err| MockServerError::BindFailed { addr: addr.to_string(), reason: err.to_string() })?;
  let local_addr = listener.local_addr().unwrap_or(addr);
  info!(addr = %local_addr, "listening");

  let graceful = GracefulShutdown::new();
  tokio::pin!(shutdown);

  loop {
    tokio::select! {
      _ = &mut shutdown => {
        info!("shutdown signal received, draining in-flight calls");
        break;
      }
      accepted = listener.accept() => {
        let (stream, peer) = match accepted {
          Ok(pair) => pair,
          Err(err) => {
            warn!(%err, "failed to accept connection");
            continue;
          }
        };
        debug!(%peer, "accepted connection");

        let io = TokioIo::new(stream);
        let svc = TowerToHyperService::new(app.clone());
        let conn = auto::Builder::new(TokioExecutor::new()).serve_connection(io, svc);
        let conn = graceful.watch(conn.into_owned());
        tokio::spawn(async move {
          if let Err(err) = conn.await {
            warn!(%err, "connection error");
          }
        });
      }
    }
  }

  graceful.shutdown().await;
  Ok(())
}
