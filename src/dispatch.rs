//! Dispatch Handler (§4.I) — the per-call state machine, and the codec and
//! top-level routing service that feed it. Every unary call, regardless of
//! which compiled-in service it targets, flows through the same handler;
//! the only thing that varies per call is which `MethodEntry` the router
//! looked up from the path.

use std::convert::Infallible;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Buf;
use futures::FutureExt;
use indexmap::IndexMap;
use prost::Message;
use prost_reflect::{DynamicMessage, MessageDescriptor};
use tonic::body::BoxBody;
use tonic::codec::{Codec, DecodeBuf, Decoder, EncodeBuf, Encoder};
use tonic::server::{Grpc, UnaryService};
use tonic::{Code, Request, Response, Status};
use tracing::{error, instrument};

use crate::mapping::Mapping;
use crate::message::message_to_json;
use crate::registry::{DescriptorRegistry, MethodEntry};
use crate::response::build_message;
use crate::table::{MappingTable, SelectResult};

/// A `Codec` over `DynamicMessage` for one method's (input, output) pair.
/// There is no generated message type to hand `tonic` at compile time, so
/// encoding and decoding both go through `prost_reflect`'s dynamic
/// `prost::Message` implementation instead.
#[derive(Clone)]
pub struct DynamicCodec {
  input_desc: MessageDescriptor,
}

impl DynamicCodec {
  pub fn new(input_desc: MessageDescriptor) -> DynamicCodec {
    DynamicCodec { input_desc }
  }
}

impl Codec for DynamicCodec {
  type Encode = DynamicMessage;
  type Decode = DynamicMessage;
  type Encoder = DynamicEncoder;
  type Decoder = DynamicDecoder;

  fn encoder(&mut self) -> Self::Encoder {
    DynamicEncoder
  }

  fn decoder(&mut self) -> Self::Decoder {
    DynamicDecoder { input_desc: self.input_desc.clone() }
  }
}

#[derive(Clone)]
pub struct DynamicEncoder;

impl Encoder for DynamicEncoder {
  type Item = DynamicMessage;
  type Error = Status;

  fn encode(&mut self, item: Self::Item, buf: &mut EncodeBuf<'_>) -> Result<(), Self::Error> {
    item.encode(buf).map_err(|err| Status::internal(format!("failed to encode response: {}", err)))
  }
}

#[derive(Clone)]
pub struct DynamicDecoder {
  input_desc: MessageDescriptor,
}

impl Decoder for DynamicDecoder {
  type Item = DynamicMessage;
  type Error = Status;

  fn decode(&mut self, buf: &mut DecodeBuf<'_>) -> Result<Option<Self::Item>, Self::Error> {
    let remaining = buf.remaining();
    if remaining == 0 {
      return Ok(Some(DynamicMessage::new(self.input_desc.clone())));
    }
    DynamicMessage::decode(self.input_desc.clone(), buf)
      .map(Some)
      .map_err(|err| Status::invalid_argument(format!("failed to decode request: {}", err)))
  }
}

/// Everything the handler needs to answer one method, resolved once at
/// router-construction time and cheap to clone per call.
#[derive(Clone)]
pub struct DispatchHandler {
  path: String,
  method: MethodEntry,
  table: Arc<MappingTable>,
  discard_unknown_fields: bool,
}

impl DispatchHandler {
  pub fn new(path: String, method: MethodEntry, table: Arc<MappingTable>, discard_unknown_fields: bool) -> DispatchHandler {
    DispatchHandler { path, method, table, discard_unknown_fields }
  }

  /// Run the state machine of §4.I against one already-decoded request.
  /// Decode errors never reach here — they are raised by `DynamicDecoder`
  /// before `tonic::server::Grpc::unary` ever calls into the handler.
  #[instrument(skip_all, fields(path = %self.path))]
  async fn handle(&self, request: Request<DynamicMessage>) -> Result<Response<DynamicMessage>, Status> {
    // §9 "Header-value joining" open question: matcher input joins repeated
    // header values with `,`, while `$req.metadata.*` substitution joins
    // them with a space. Deliberately asymmetric; preserved as documented.
    let metadata_for_matching = project_metadata(&request, ",");
    let body = message_to_json(request.get_ref());

    let selected = match self.table.select_for(&self.path, &metadata_for_matching, &body) {
      SelectResult::NoMappingsForEndpoint => {
        return Err(Status::failed_precondition(format!("no mappings registered for '{}'", self.path)));
      }
      SelectResult::NoMatch => {
        return Err(Status::failed_precondition(format!("no mapping matched the request to '{}'", self.path)));
      }
      SelectResult::Matched(mapping) => mapping,
    };

    let metadata_for_substitution = project_metadata(&request, " ");
    self.respond(&selected, &body, &metadata_for_substitution)
  }

  fn respond(&self, mapping: &Mapping, body: &serde_json::Value, metadata: &IndexMap<String, String>) -> Result<Response<DynamicMessage>, Status> {
    if mapping.response_code != Code::Ok {
      let message = if mapping.error_message.is_empty() {
        crate::mapping::UNKNOWN_ERROR_MESSAGE.to_string()
      } else {
        mapping.error_message.clone()
      };
      return Err(Status::new(mapping.response_code, message));
    }

    let Some(output_desc) = self.method.output_desc.clone() else {
      // No resolvable output type: answer with an empty message. Wire
      // encoding of a `DynamicMessage` with no fields set is zero bytes
      // regardless of descriptor, so the input descriptor serves fine as
      // an inert container here.
      return Ok(Response::new(DynamicMessage::new(self.method.input_desc.clone())));
    };

    build_message(&output_desc, &mapping.response_body, body, metadata, self.discard_unknown_fields)
      .map(Response::new)
      .map_err(|err| Status::failed_precondition(err.to_string()))
  }
}

fn project_metadata(request: &Request<DynamicMessage>, join_with: &str) -> IndexMap<String, String> {
  let mut out = IndexMap::new();
  for key in request.metadata().keys() {
    let tonic::metadata::KeyRef::Ascii(key) = key else { continue };
    let values: Vec<String> = request.metadata().get_all(key.as_str())
      .iter()
      .filter_map(|v| v.to_str().ok().map(str::to_string))
      .collect();
    if !values.is_empty() {
      out.insert(key.as_str().to_string(), values.join(join_with));
    }
  }
  out
}

impl UnaryService<DynamicMessage> for DispatchHandler {
  type Response = DynamicMessage;
  type Future = Pin<Box<dyn std::future::Future<Output = Result<Response<Self::Response>, Status>> + Send + 'static>>;

  fn call(&mut self, request: Request<DynamicMessage>) -> Self::Future {
    let this = self.clone();
    Box::pin(async move {
      match AssertUnwindSafe(this.handle(request)).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => {
          error!(?panic, "dispatch handler panicked");
          Err(Status::internal("internal error"))
        }
      }
    })
  }
}

/// The single top-level `tower::Service` that fronts the whole server:
/// matches `req.uri().path()` against the handlers built for every
/// registered method and drives the matched one through
/// `tonic::server::Grpc::unary`. Unknown paths are answered `UNIMPLEMENTED`,
/// matching standard gRPC server behavior for unregistered methods.
#[derive(Clone)]
pub struct DynamicRouter {
  handlers: Arc<std::collections::HashMap<String, Route>>,
}

impl DynamicRouter {
  pub fn new(registry: &DescriptorRegistry, table: Arc<MappingTable>, discard_unknown_fields: bool) -> DynamicRouter {
    let mut handlers = std::collections::HashMap::new();
    for service in registry.services() {
      for method in &service.methods {
        let path = format!("/{}/{}", service.fqn, method.name);
        // Streaming methods register (they appear in reflection and in
        // `find_method` lookups) but have no dispatch path: answer
        // UNIMPLEMENTED rather than attempting unary decode, per spec.md
        // §9's resolution of the streaming open question.
        let route = if method.client_streaming || method.server_streaming {
          Route::Unimplemented
        } else {
          let handler = DispatchHandler::new(path.clone(), method.clone(), table.clone(), discard_unknown_fields);
          Route::Unary(handler, method.input_desc.clone())
        };
        handlers.insert(path, route);
      }
    }
    DynamicRouter { handlers: Arc::new(handlers) }
  }
}

#[derive(Clone)]
enum Route {
  Unary(DispatchHandler, MessageDescriptor),
  Unimplemented,
}

impl<B> tower_service::Service<http::Request<B>> for DynamicRouter
where
  B: http_body::Body<Data = bytes::Bytes> + Send + 'static,
  B::Error: Into<Box<dyn std::error::Error + Send + Sync>> + Send,
{
  type Response = http::Response<BoxBody>;
  type Error = Infallible;
  type Future = Pin<Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send + 'static>>;

  fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
    Poll::Ready(Ok(()))
  }

  fn call(&mut self, req: http::Request<B>) -> Self::Future {
    let path = req.uri().path().to_string();
    match self.handlers.get(&path).cloned() {
      Some(Route::Unary(handler, input_desc)) => Box::pin(async move {
        let codec = DynamicCodec::new(input_desc);
        let mut grpc = Grpc::new(codec);
        Ok(grpc.unary(handler, req).await)
      }),
      Some(Route::Unimplemented) => Box::pin(async move {
        Ok(Status::unimplemented(format!("'{}' is a streaming method and is not supported by this mock server", path)).to_http())
      }),
      None => Box::pin(async move {
        Ok(Status::unimplemented(format!("no method registered for '{}'", path)).to_http())
      }),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::mapping::{MappingSpec, ResponseSpec};
  use crate::message::test_support::compile_descriptor_set;
  use serde_json::json;

  fn registry_and_table() -> (DescriptorRegistry, Arc<MappingTable>) {
    let fds = compile_descriptor_set(r#"
      syntax = "proto3";
      package demo;
      message EchoReq { string msg = 1; }
      message EchoResp { string reply = 1; }
      service Echo { rpc Say(EchoReq) returns (EchoResp); }
    "#);
    let registry = DescriptorRegistry::load(vec![fds], false).unwrap();
    (registry, Arc::new(MappingTable::new()))
  }

  fn spec() -> MappingSpec {
    MappingSpec {
      id: "m1".to_string(),
      endpoint: "demo.Echo/Say".to_string(),
      metadata: IndexMap::new(),
      request_body: IndexMap::new(),
      response: ResponseSpec { code: String::new(), body: IndexMap::new(), error_message: String::new() },
    }
  }

  #[test_log::test(tokio::test)]
  async fn no_mappings_yields_failed_precondition() {
    let (registry, table) = registry_and_table();
    let method = registry.find_method("demo.Echo", "Say").unwrap().clone();
    let handler = DispatchHandler::new("/demo.Echo/Say".to_string(), method, table, false);

    let req = Request::new(DynamicMessage::new(registry.find_method("demo.Echo", "Say").unwrap().input_desc.clone()));
    let result = handler.handle(req).await;
    assert_eq!(result.unwrap_err().code(), Code::FailedPrecondition);
  }

  #[test_log::test(tokio::test)]
  async fn matched_mapping_builds_response() {
    let (registry, table) = registry_and_table();
    let mut s = spec();
    s.response.body.insert("reply".to_string(), json!("$req.body.msg"));
    let mapping = Mapping::from_spec(s).unwrap();
    table.set_mappings(vec![mapping], &registry).unwrap();

    let method = registry.find_method("demo.Echo", "Say").unwrap().clone();
    let handler = DispatchHandler::new("/demo.Echo/Say".to_string(), method.clone(), table, false);

    let mut req_msg = DynamicMessage::new(method.input_desc.clone());
    req_msg.set_field_by_name("msg", prost_reflect::Value::String("hi".to_string()));
    let response = handler.handle(Request::new(req_msg)).await.unwrap();
    let json = message_to_json(response.get_ref());
    assert_eq!(json["reply"], json!("hi"));
  }

  #[test_log::test(tokio::test)]
  async fn non_ok_code_is_returned_as_status() {
    let (registry, table) = registry_and_table();
    let mut s = spec();
    s.response.code = "NOT_FOUND".to_string();
    s.response.error_message = "nope".to_string();
    let mapping = Mapping::from_spec(s).unwrap();
    table.set_mappings(vec![mapping], &registry).unwrap();

    let method = registry.find_method("demo.Echo", "Say").unwrap().clone();
    let handler = DispatchHandler::new("/demo.Echo/Say".to_string(), method.clone(), table, false);
    let req = Request::new(DynamicMessage::new(method.input_desc.clone()));
    let result = handler.handle(req).await;
    let status = result.unwrap_err();
    assert_eq!(status.code(), Code::NotFound);
    assert_eq!(status.message(), "nope");
  }
}
