//! Outbound call pipeline.

use std::sync::Arc;

use bytes::Bytes;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use parsec_core::config::ClientConfig;
use parsec_core::{FilterChain, Filter, FrameworkError, Handler, HandlerFuture, Message};
use parsec_proto::envelope::{message_flags, trans_keys, CALL_TYPE_ONEWAY};
use parsec_proto::{
    Body, ClientCodec, CompressorRegistry, RequestEnvelope, SerializerRegistry,
};
use parsec_selector::{Node, Selector};
use parsec_transport::{
    CallOptions, ClientTransport, TcpClientTransport, UdpClientTransport,
};

/// An RPC client bound to one callee addressing pipeline.
///
/// One client is shared across calls and tasks; per-call state lives on
/// the [`Message`] passed into [`Client::invoke`].
pub struct Client {
    config: ClientConfig,
    codec: ClientCodec,
    serializers: Arc<SerializerRegistry>,
    compressors: Arc<CompressorRegistry>,
    selector: Arc<Selector>,
    transport: Arc<dyn ClientTransport>,
    filters: FilterChain,
}

impl Client {
    /// Creates a client with the transport chosen by `config.network`.
    #[must_use]
    pub fn new(config: ClientConfig, selector: Arc<Selector>) -> Self {
        let transport: Arc<dyn ClientTransport> = if config.network == "udp" {
            Arc::new(UdpClientTransport::new(true))
        } else {
            Arc::new(TcpClientTransport::new(config.pool.clone()))
        };
        Self {
            config,
            codec: ClientCodec::new(),
            serializers: Arc::new(SerializerRegistry::new()),
            compressors: Arc::new(CompressorRegistry::new()),
            selector,
            transport,
            filters: FilterChain::new(),
        }
    }

    /// Replaces the transport.
    #[must_use]
    pub fn with_transport(mut self, transport: Arc<dyn ClientTransport>) -> Self {
        self.transport = transport;
        self
    }

    /// Replaces the serializer registry.
    #[must_use]
    pub fn with_serializers(mut self, serializers: Arc<SerializerRegistry>) -> Self {
        self.serializers = serializers;
        self
    }

    /// Replaces the compressor registry.
    #[must_use]
    pub fn with_compressors(mut self, compressors: Arc<CompressorRegistry>) -> Self {
        self.compressors = compressors;
        self
    }

    /// Appends a filter; filters run in registration order around the
    /// transport round trip.
    #[must_use]
    pub fn with_filter(mut self, filter: Arc<dyn Filter>) -> Self {
        self.filters.add(filter);
        self
    }

    /// Creates a message context seeded with this client's call defaults.
    #[must_use]
    pub fn new_message(&self) -> Message {
        let mut msg = Message::new();
        msg.set_timeout(Some(self.config.timeout));
        msg.set_serialization(self.config.serialization);
        msg.set_compression(self.config.compression);
        msg
    }

    /// Invokes the callee named on `msg` with `body`.
    ///
    /// For one-way calls (`msg.call_type() == CALL_TYPE_ONEWAY`) the send
    /// itself is the success condition and the returned body is empty.
    pub async fn invoke(&self, msg: &mut Message, body: &Body) -> Result<Body, FrameworkError> {
        self.invoke_with_cancel(msg, body, None).await
    }

    /// Invokes with an external cancellation token racing the call.
    pub async fn invoke_with_cancel(
        &self,
        msg: &mut Message,
        body: &Body,
        cancel: Option<CancellationToken>,
    ) -> Result<Body, FrameworkError> {
        let node = self.selector.select(msg.callee().full()).await?;
        let result = self.invoke_on(&node, msg, body, cancel).await;

        if let Err(report_err) = self
            .selector
            .report(&node, msg.elapsed(), result.as_ref().err())
            .await
        {
            warn!(address = %node.address, error = %report_err, "outcome report failed");
        }
        result
    }

    async fn invoke_on(
        &self,
        node: &Node,
        msg: &mut Message,
        body: &Body,
        cancel: Option<CancellationToken>,
    ) -> Result<Body, FrameworkError> {
        let payload = self.serializers.marshal(msg.serialization(), body)?;
        let payload = self.compressors.compress(msg.compression(), &payload)?;

        let mut envelope = self.build_envelope(msg);
        let (request_id, frame) = self.codec.encode_request(&mut envelope, &payload)?;
        msg.set_request_id(request_id);
        msg.set_message_type(envelope.message_type);
        msg.set_req_head(envelope);

        let send_only = msg.call_type() == CALL_TYPE_ONEWAY;
        let opts = CallOptions {
            timeout: msg.remaining_timeout(),
            send_only,
            disable_pool: self.config.disable_pool,
            cancel,
        };
        let terminal = RoundTripHandler {
            transport: self.transport.as_ref(),
            address: node.address.clone(),
            opts,
        };
        let rsp_frame = self.filters.handle(msg, Bytes::from(frame), &terminal).await?;

        if send_only {
            return Ok(Body::Empty);
        }

        let (rsp, rsp_body) = self.codec.decode_response(&rsp_frame, request_id)?;
        let outcome = FrameworkError::from_ret(rsp.ret, rsp.func_ret, &rsp.error_msg);
        let content_type = rsp.content_type;
        let content_encoding = rsp.content_encoding;
        msg.set_rsp_head(rsp);
        if let Some(err) = outcome {
            return Err(err);
        }

        let decompressed = self.compressors.decompress(content_encoding, &rsp_body)?;
        Ok(self.serializers.unmarshal(content_type, &decompressed)?)
    }

    fn build_envelope(&self, msg: &Message) -> RequestEnvelope {
        let mut envelope = RequestEnvelope::new();
        envelope.call_type = msg.call_type();
        envelope.request_id = msg.request_id();
        envelope.timeout_ms = msg
            .remaining_timeout()
            .map_or(0, |t| u32::try_from(t.as_millis()).unwrap_or(u32::MAX));
        envelope.caller = msg.caller().full().to_owned();
        envelope.callee = msg.callee().full().to_owned();
        envelope.func = msg.rpc_name().to_owned();
        envelope.message_type = msg.message_type();
        envelope.trans_info = msg.client_meta().clone();
        if !msg.dyeing_key().is_empty() {
            envelope.message_type |= message_flags::DYEING;
            envelope.trans_info.insert(
                trans_keys::DYEING_KEY.to_owned(),
                msg.dyeing_key().as_bytes().to_vec(),
            );
        }
        if !msg.env_transfer().is_empty() {
            envelope.trans_info.insert(
                trans_keys::ENV_TRANSFER.to_owned(),
                msg.env_transfer().as_bytes().to_vec(),
            );
        }
        envelope.content_type = msg.serialization();
        envelope.content_encoding = msg.compression();
        envelope
    }
}

/// Terminal chain position: the actual wire exchange.
struct RoundTripHandler<'t> {
    transport: &'t dyn ClientTransport,
    address: String,
    opts: CallOptions,
}

impl Handler for RoundTripHandler<'_> {
    fn call<'a>(&'a self, _msg: &'a mut Message, req: Bytes) -> HandlerFuture<'a> {
        Box::pin(async move {
            let rsp = self
                .transport
                .round_trip(&self.address, req, &self.opts)
                .await
                .map_err(FrameworkError::from)?;
            // None is the send-only success sentinel; unary callers never
            // see it because the transport errors on missing responses.
            Ok(rsp.unwrap_or_default())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parsec_core::config::ClientConfig;

    #[test]
    fn new_message_carries_config_defaults() {
        use parsec_selector::StaticDiscovery;

        let config = ClientConfig {
            serialization: 2,
            compression: 1,
            ..ClientConfig::default()
        };
        let selector = Arc::new(Selector::new(Arc::new(StaticDiscovery::new())));
        let client = Client::new(config, selector);

        let msg = client.new_message();
        assert_eq!(msg.serialization(), 2);
        assert_eq!(msg.compression(), 1);
        assert!(msg.timeout().is_some());
    }

    #[test]
    fn envelope_carries_dyeing_and_env() {
        use parsec_selector::StaticDiscovery;

        let selector = Arc::new(Selector::new(Arc::new(StaticDiscovery::new())));
        let client = Client::new(ClientConfig::default(), selector);

        let mut msg = client.new_message();
        msg.set_callee_service_name("parsec.shop.checkout.cart");
        msg.set_rpc_name("/parsec.shop.checkout.cart/add_item");
        msg.set_dyeing_key("blue");
        msg.set_env_transfer("staging");

        let envelope = client.build_envelope(&msg);
        assert_eq!(envelope.callee, "parsec.shop.checkout.cart");
        assert_ne!(envelope.message_type & message_flags::DYEING, 0);
        assert_eq!(
            envelope.trans_info.get(trans_keys::DYEING_KEY).unwrap(),
            b"blue"
        );
        assert_eq!(
            envelope.trans_info.get(trans_keys::ENV_TRANSFER).unwrap(),
            b"staging"
        );
    }
}
