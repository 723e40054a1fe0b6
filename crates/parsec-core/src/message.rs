//! Per-call message context.
//!
//! A [`Message`] carries every piece of mutable per-call state: routing
//! names, timing, serialization selection, metadata and the decoded
//! envelopes. Exactly one context is active per in-flight call; it is
//! never shared across tasks, and pooling reuse goes through
//! [`crate::pool::MessagePool`].

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use parsec_proto::{split_method, RequestEnvelope, ResponseEnvelope};

/// A dotted `prefix.app.server.service` name with its decomposition.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ServiceName {
    full: String,
    app: String,
    server: String,
    service: String,
}

impl ServiceName {
    /// Sets the full name, decomposing app/server/service sub-fields when
    /// the name has at least four dot-separated segments.
    pub fn set(&mut self, full: &str) {
        self.full = full.to_owned();
        let parts: Vec<&str> = full.split('.').collect();
        if parts.len() >= 4 {
            self.app = parts[1].to_owned();
            self.server = parts[2].to_owned();
            self.service = parts[3].to_owned();
        } else {
            self.app.clear();
            self.server.clear();
            self.service.clear();
        }
    }

    /// The full dotted name.
    #[must_use]
    pub fn full(&self) -> &str {
        &self.full
    }

    /// The application segment.
    #[must_use]
    pub fn app(&self) -> &str {
        &self.app
    }

    /// The server segment.
    #[must_use]
    pub fn server(&self) -> &str {
        &self.server
    }

    /// The service segment.
    #[must_use]
    pub fn service(&self) -> &str {
        &self.service
    }

    fn reset(&mut self) {
        self.full.clear();
        self.app.clear();
        self.server.clear();
        self.service.clear();
    }
}

/// Mutable per-call state threaded through codec, filters and transport.
#[derive(Debug, Default)]
pub struct Message {
    request_id: u32,
    call_type: u8,
    message_type: u32,

    caller: ServiceName,
    callee: ServiceName,
    caller_method: String,
    callee_method: String,
    rpc_name: String,

    begin: Option<Instant>,
    timeout: Option<Duration>,

    local_addr: Option<SocketAddr>,
    remote_addr: Option<SocketAddr>,

    serialization: u8,
    compression: u8,

    /// Metadata set by this process for the outbound direction.
    client_meta: HashMap<String, Vec<u8>>,
    /// Metadata received from the inbound direction.
    server_meta: HashMap<String, Vec<u8>>,

    dyeing_key: String,
    env_transfer: String,

    req_head: Option<RequestEnvelope>,
    rsp_head: Option<ResponseEnvelope>,
}

impl Message {
    /// Creates an empty context with the begin timestamp set.
    #[must_use]
    pub fn new() -> Self {
        Self {
            begin: Some(Instant::now()),
            ..Self::default()
        }
    }

    /// Derives a context for a downstream client call made while handling
    /// an inbound request.
    ///
    /// Copies timeout, serialization selection and metadata, and swaps
    /// caller and callee: the old callee becomes the new caller.
    #[must_use]
    pub fn clone_for_downstream(&self) -> Self {
        let mut msg = Self::new();
        msg.timeout = self.remaining_timeout();
        msg.serialization = self.serialization;
        msg.compression = self.compression;
        msg.message_type = self.message_type;
        msg.dyeing_key = self.dyeing_key.clone();
        msg.env_transfer = self.env_transfer.clone();
        msg.client_meta = self.client_meta.clone();
        msg.server_meta = self.server_meta.clone();
        msg.caller = self.callee.clone();
        msg.caller_method = self.callee_method.clone();
        msg
    }

    /// Zeroes all fields for pool reuse.
    pub fn reset(&mut self) {
        self.request_id = 0;
        self.call_type = 0;
        self.message_type = 0;
        self.caller.reset();
        self.callee.reset();
        self.caller_method.clear();
        self.callee_method.clear();
        self.rpc_name.clear();
        self.begin = None;
        self.timeout = None;
        self.local_addr = None;
        self.remote_addr = None;
        self.serialization = 0;
        self.compression = 0;
        self.client_meta.clear();
        self.server_meta.clear();
        self.dyeing_key.clear();
        self.env_transfer.clear();
        self.req_head = None;
        self.rsp_head = None;
    }

    /// Marks the start of the call for cost accounting.
    pub fn mark_begin(&mut self) {
        self.begin = Some(Instant::now());
    }

    /// Time elapsed since the call began.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.begin.map_or(Duration::ZERO, |b| b.elapsed())
    }

    /// Remaining timeout budget, if a timeout is set.
    #[must_use]
    pub fn remaining_timeout(&self) -> Option<Duration> {
        self.timeout.map(|t| t.saturating_sub(self.elapsed()))
    }

    /// Sets the full RPC name and extracts the bare callee method when it
    /// has the `/app.server.service/method` shape.
    pub fn set_rpc_name(&mut self, rpc_name: &str) {
        self.rpc_name = rpc_name.to_owned();
        if let Some(method) = split_method(rpc_name) {
            self.callee_method = method.to_owned();
        }
    }

    /// Sets the callee service name, decomposing sub-fields by side effect.
    pub fn set_callee_service_name(&mut self, name: &str) {
        self.callee.set(name);
    }

    /// Sets the caller service name, decomposing sub-fields by side effect.
    pub fn set_caller_service_name(&mut self, name: &str) {
        self.caller.set(name);
    }

    /// The caller name and decomposition.
    #[must_use]
    pub fn caller(&self) -> &ServiceName {
        &self.caller
    }

    /// The callee name and decomposition.
    #[must_use]
    pub fn callee(&self) -> &ServiceName {
        &self.callee
    }

    /// The full RPC name as carried on the wire.
    #[must_use]
    pub fn rpc_name(&self) -> &str {
        &self.rpc_name
    }

    /// The bare callee method, when extractable from the RPC name.
    #[must_use]
    pub fn callee_method(&self) -> &str {
        &self.callee_method
    }

    /// Sets the bare callee method directly.
    pub fn set_callee_method(&mut self, method: &str) {
        self.callee_method = method.to_owned();
    }

    /// The caller-side method name.
    #[must_use]
    pub fn caller_method(&self) -> &str {
        &self.caller_method
    }

    /// Sets the caller-side method name.
    pub fn set_caller_method(&mut self, method: &str) {
        self.caller_method = method.to_owned();
    }

    /// Per-call timeout budget.
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Sets the per-call timeout budget.
    pub fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.timeout = timeout;
    }

    /// Request id assigned by the client codec.
    #[must_use]
    pub fn request_id(&self) -> u32 {
        self.request_id
    }

    /// Sets the request id.
    pub fn set_request_id(&mut self, id: u32) {
        self.request_id = id;
    }

    /// Call type (unary or one-way).
    #[must_use]
    pub fn call_type(&self) -> u8 {
        self.call_type
    }

    /// Sets the call type.
    pub fn set_call_type(&mut self, call_type: u8) {
        self.call_type = call_type;
    }

    /// Message-type bit flags.
    #[must_use]
    pub fn message_type(&self) -> u32 {
        self.message_type
    }

    /// Sets the message-type bit flags.
    pub fn set_message_type(&mut self, flags: u32) {
        self.message_type = flags;
    }

    /// Body serialization type code.
    #[must_use]
    pub fn serialization(&self) -> u8 {
        self.serialization
    }

    /// Sets the body serialization type code.
    pub fn set_serialization(&mut self, code: u8) {
        self.serialization = code;
    }

    /// Body compression type code.
    #[must_use]
    pub fn compression(&self) -> u8 {
        self.compression
    }

    /// Sets the body compression type code.
    pub fn set_compression(&mut self, code: u8) {
        self.compression = code;
    }

    /// Local socket address, when bound.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Sets the local socket address.
    pub fn set_local_addr(&mut self, addr: SocketAddr) {
        self.local_addr = Some(addr);
    }

    /// Remote peer address, when known.
    #[must_use]
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    /// Sets the remote peer address.
    pub fn set_remote_addr(&mut self, addr: SocketAddr) {
        self.remote_addr = Some(addr);
    }

    /// Outbound metadata map.
    #[must_use]
    pub fn client_meta(&self) -> &HashMap<String, Vec<u8>> {
        &self.client_meta
    }

    /// Mutable outbound metadata map.
    pub fn client_meta_mut(&mut self) -> &mut HashMap<String, Vec<u8>> {
        &mut self.client_meta
    }

    /// Inbound metadata map.
    #[must_use]
    pub fn server_meta(&self) -> &HashMap<String, Vec<u8>> {
        &self.server_meta
    }

    /// Mutable inbound metadata map.
    pub fn server_meta_mut(&mut self) -> &mut HashMap<String, Vec<u8>> {
        &mut self.server_meta
    }

    /// Dyeing key staining this call, empty when not dyed.
    #[must_use]
    pub fn dyeing_key(&self) -> &str {
        &self.dyeing_key
    }

    /// Sets the dyeing key.
    pub fn set_dyeing_key(&mut self, key: &str) {
        self.dyeing_key = key.to_owned();
    }

    /// Environment name transferred across hops.
    #[must_use]
    pub fn env_transfer(&self) -> &str {
        &self.env_transfer
    }

    /// Sets the transferred environment name.
    pub fn set_env_transfer(&mut self, env: &str) {
        self.env_transfer = env.to_owned();
    }

    /// The inbound request envelope, when decoded.
    #[must_use]
    pub fn req_head(&self) -> Option<&RequestEnvelope> {
        self.req_head.as_ref()
    }

    /// Stores the inbound request envelope.
    pub fn set_req_head(&mut self, head: RequestEnvelope) {
        self.req_head = Some(head);
    }

    /// The response envelope, when present.
    #[must_use]
    pub fn rsp_head(&self) -> Option<&ResponseEnvelope> {
        self.rsp_head.as_ref()
    }

    /// Mutable access to the response envelope.
    pub fn rsp_head_mut(&mut self) -> Option<&mut ResponseEnvelope> {
        self.rsp_head.as_mut()
    }

    /// Stores the response envelope.
    pub fn set_rsp_head(&mut self, head: ResponseEnvelope) {
        self.rsp_head = Some(head);
    }

    /// Takes the response envelope out of the context.
    pub fn take_rsp_head(&mut self) -> Option<ResponseEnvelope> {
        self.rsp_head.take()
    }
}
