//! Inbound dispatch pipeline.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use parsec_core::config::ServerConfig;
use parsec_core::{
    Filter, FilterChain, FrameworkError, Handler, HandlerFuture, Message, MessagePool,
    NamedRegistry,
};
use parsec_proto::envelope::{trans_keys, CALL_TYPE_ONEWAY};
use parsec_proto::{
    Body, CompressorRegistry, DecodedRequest, SerializerRegistry, ServerCodec,
};
use parsec_transport::{FrameHandler, TcpServerTransport, UdpServerTransport};

/// One callable method of a service.
#[async_trait]
pub trait Method: Send + Sync {
    /// Handles one call.
    async fn invoke(&self, msg: &mut Message, body: Body) -> Result<Body, FrameworkError>;
}

/// Adapter turning a synchronous closure into a [`Method`].
pub struct FnMethod<F>(pub F);

#[async_trait]
impl<F> Method for FnMethod<F>
where
    F: Fn(&mut Message, Body) -> Result<Body, FrameworkError> + Send + Sync,
{
    async fn invoke(&self, msg: &mut Message, body: Body) -> Result<Body, FrameworkError> {
        (self.0)(msg, body)
    }
}

/// A named service: a method table looked up by callee name.
pub struct Service {
    name: String,
    methods: HashMap<String, Arc<dyn Method>>,
}

impl Service {
    /// Creates an empty service with the given dotted name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            methods: HashMap::new(),
        }
    }

    /// Registers a method under its bare name.
    #[must_use]
    pub fn with_method(mut self, name: impl Into<String>, method: Arc<dyn Method>) -> Self {
        self.methods.insert(name.into(), method);
        self
    }

    /// The service's dotted name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    fn method(&self, name: &str) -> Option<Arc<dyn Method>> {
        self.methods.get(name).map(Arc::clone)
    }
}

/// Frame-level dispatcher bridging a server transport to services.
pub struct ServerDispatcher {
    codec: ServerCodec,
    services: Arc<NamedRegistry<Service>>,
    filters: FilterChain,
    serializers: Arc<SerializerRegistry>,
    compressors: Arc<CompressorRegistry>,
    messages: Arc<MessagePool>,
    /// Server-imposed handler budget; `None` when unconfigured.
    timeout: Option<Duration>,
}

impl ServerDispatcher {
    fn new(
        config: &ServerConfig,
        services: Arc<NamedRegistry<Service>>,
        filters: FilterChain,
        serializers: Arc<SerializerRegistry>,
        compressors: Arc<CompressorRegistry>,
    ) -> Self {
        Self {
            codec: ServerCodec::with_max_frame_size(config.max_frame_size),
            services,
            filters,
            serializers,
            compressors,
            messages: MessagePool::new(),
            timeout: (config.timeout > Duration::ZERO).then_some(config.timeout),
        }
    }

    /// Runs the request through filters and the method, with the handler
    /// isolated on its own task so a panic surfaces as a system error
    /// instead of killing the connection.
    async fn dispatch(
        &self,
        decoded: DecodedRequest,
        remote: SocketAddr,
    ) -> Result<Vec<u8>, FrameworkError> {
        let DecodedRequest { envelope, body, .. } = decoded;
        let compression = envelope.content_encoding;

        let mut msg = self.messages.acquire();
        msg.set_request_id(envelope.request_id);
        msg.set_call_type(envelope.call_type);
        msg.set_message_type(envelope.message_type);
        if envelope.timeout_ms > 0 {
            msg.set_timeout(Some(Duration::from_millis(u64::from(envelope.timeout_ms))));
        }
        msg.set_caller_service_name(&envelope.caller);
        msg.set_callee_service_name(&envelope.callee);
        msg.set_rpc_name(&envelope.func);
        msg.set_serialization(envelope.content_type);
        msg.set_compression(envelope.content_encoding);
        msg.set_remote_addr(remote);
        *msg.server_meta_mut() = envelope.trans_info.clone();
        if let Some(key) = envelope.trans_info.get(trans_keys::DYEING_KEY) {
            if let Ok(key) = std::str::from_utf8(key) {
                msg.set_dyeing_key(key);
            }
        }
        if let Some(env) = envelope.trans_info.get(trans_keys::ENV_TRANSFER) {
            if let Ok(env) = std::str::from_utf8(env) {
                msg.set_env_transfer(env);
            }
        }
        msg.set_req_head(envelope);

        let service = self
            .services
            .get(msg.callee().full())
            .ok_or_else(|| FrameworkError::NoService(msg.callee().full().to_owned()))?;
        let method_name = if msg.callee_method().is_empty() {
            msg.rpc_name().to_owned()
        } else {
            msg.callee_method().to_owned()
        };
        let method = service
            .method(&method_name)
            .ok_or_else(|| FrameworkError::NoFunc(method_name))?;

        let payload = self.compressors.decompress(compression, &body)?;

        let chain = self.filters.clone();
        let serializers = Arc::clone(&self.serializers);
        // The handler gets the smaller of the caller's remaining budget
        // and the configured per-request budget.
        let deadline = match (self.timeout, msg.remaining_timeout()) {
            (Some(server), Some(caller)) => Some(server.min(caller)),
            (server, caller) => server.or(caller),
        };
        let handle = tokio::spawn(async move {
            let terminal = MethodHandler {
                method,
                serializers,
            };
            let fut = chain.handle(&mut msg, Bytes::from(payload), &terminal);
            match deadline {
                Some(d) => tokio::time::timeout(d, fut)
                    .await
                    .unwrap_or(Err(FrameworkError::Timeout)),
                None => fut.await,
            }
        });

        let rsp_bytes = match handle.await {
            Ok(result) => result?,
            Err(join_err) if join_err.is_panic() => {
                warn!(%remote, "handler panicked");
                return Err(FrameworkError::System("handler panicked".into()));
            }
            Err(_) => return Err(FrameworkError::System("handler task canceled".into())),
        };
        Ok(self.compressors.compress(compression, &rsp_bytes)?)
    }
}

#[async_trait]
impl FrameHandler for ServerDispatcher {
    async fn handle_frame(&self, frame: Bytes, remote: SocketAddr) -> Option<Bytes> {
        let decoded = match self.codec.decode_request(&frame) {
            Ok(decoded) => decoded,
            Err(e) => {
                // Without a decodable envelope there is no request id to
                // answer to; drop the frame.
                warn!(%remote, error = %e, "request decode failed");
                return None;
            }
        };
        let mut reply = decoded.reply.clone();
        let one_way = decoded.envelope.call_type == CALL_TYPE_ONEWAY;

        let result = self.dispatch(decoded, remote).await;
        if one_way {
            if let Err(e) = &result {
                debug!(%remote, error = %e, "one-way call failed");
            }
            return None;
        }

        let body = match result {
            Ok(body) => body,
            Err(e) => {
                let (ret, func_ret, error_msg) = e.to_ret();
                reply.ret = ret;
                reply.func_ret = func_ret;
                reply.error_msg = error_msg;
                Vec::new()
            }
        };
        match self.codec.encode_response(&reply, &body) {
            Ok(frame) => Some(Bytes::from(frame)),
            Err(e) => {
                warn!(%remote, error = %e, "response encode failed");
                None
            }
        }
    }
}

/// Terminal chain position: unmarshal, invoke the method, marshal.
struct MethodHandler {
    method: Arc<dyn Method>,
    serializers: Arc<SerializerRegistry>,
}

impl Handler for MethodHandler {
    fn call<'a>(&'a self, msg: &'a mut Message, req: Bytes) -> HandlerFuture<'a> {
        Box::pin(async move {
            let body = self.serializers.unmarshal(msg.serialization(), &req)?;
            let rsp = self.method.invoke(msg, body).await?;
            Ok(self.serializers.marshal(msg.serialization(), &rsp)?)
        })
    }
}

/// An RPC server: service registry plus the listening transport.
pub struct Server {
    config: ServerConfig,
    services: Arc<NamedRegistry<Service>>,
    filters: FilterChain,
    serializers: Arc<SerializerRegistry>,
    compressors: Arc<CompressorRegistry>,
    cancel: CancellationToken,
}

impl Server {
    /// Creates a server with the built-in serializers and compressors.
    #[must_use]
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            services: Arc::new(NamedRegistry::new()),
            filters: FilterChain::new(),
            serializers: Arc::new(SerializerRegistry::new()),
            compressors: Arc::new(CompressorRegistry::new()),
            cancel: CancellationToken::new(),
        }
    }

    /// Registers a service under its own name. Last registration wins.
    pub fn register_service(&self, service: Service) {
        let name = service.name().to_owned();
        self.services.register(&name, Arc::new(service));
    }

    /// Appends a filter; filters run in registration order around every
    /// method invocation.
    pub fn add_filter(&mut self, filter: Arc<dyn Filter>) {
        self.filters.add(filter);
    }

    /// Token canceled when [`Server::shutdown`] is called.
    #[must_use]
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Binds the configured transport and starts serving in the
    /// background, returning the bound address.
    pub async fn serve(&self) -> Result<SocketAddr, FrameworkError> {
        let dispatcher = Arc::new(ServerDispatcher::new(
            &self.config,
            Arc::clone(&self.services),
            self.filters.clone(),
            Arc::clone(&self.serializers),
            Arc::clone(&self.compressors),
        ));
        let addr = if self.config.network == "udp" {
            UdpServerTransport::new(self.config.clone())
                .listen_and_serve(dispatcher, self.cancel.clone())
                .await
        } else {
            TcpServerTransport::new(self.config.clone())
                .listen_and_serve(dispatcher, self.cancel.clone())
                .await
        };
        addr.map_err(FrameworkError::from)
    }

    /// Stops the accept/receive loops and in-flight serve tasks.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}
