use std::collections::HashMap;
use std::rc::Rc;

use msgpipe_codec::{encode_message, Message, MessageHeader, Struct};
use tracing::trace;

use crate::connector::MessageReceiver;
use crate::error::{BindingsError, Result};

/// Incoming half of an interface: receives requests addressed to this side.
pub trait LocalStub {
    /// Handle one request. `responder` sends the reply, if the method has one.
    fn accept_request(&self, header: &MessageHeader, message: Message, responder: &Responder) -> Result<()>;
}

/// Sends the response to one incoming request.
pub struct Responder {
    sink: Rc<dyn MessageReceiver>,
    ordinal: u32,
    request_id: u64,
}

impl Responder {
    pub fn new(sink: Rc<dyn MessageReceiver>, request: &MessageHeader) -> Self {
        Self {
            sink,
            ordinal: request.ordinal,
            request_id: request.request_id,
        }
    }

    /// Encode `response` with the request's ordinal and id and send it.
    pub fn reply<Resp: Struct>(&self, response: Resp) -> Result<()> {
        let header = MessageHeader::response(self.ordinal, self.request_id);
        if !self.sink.accept(encode_message(&header, response)) {
            return Err(BindingsError::SendFailed);
        }
        trace!(ordinal = self.ordinal, request_id = self.request_id, "sent response");
        Ok(())
    }
}

type Handler = Box<dyn Fn(&MessageHeader, Message, &Responder) -> Result<()>>;

fn handler<F>(f: F) -> Handler
where
    F: Fn(&MessageHeader, Message, &Responder) -> Result<()> + 'static,
{
    Box::new(f)
}

/// Dispatch table mapping method ordinals to decode-and-invoke closures.
///
/// ```
/// # use msgpipe_bindings::Router;
/// # use msgpipe_codec::{FieldReader, FieldWriter, Result, Struct};
/// # #[derive(Default)]
/// # struct Ping;
/// # impl Struct for Ping {
/// #     const NAME: &'static str = "Ping";
/// #     fn encode_fields<'v>(&'v self, _: &mut FieldWriter<'_, 'v>) {}
/// #     fn decode_fields(_: &mut FieldReader<'_, '_>) -> Result<Self> { Ok(Ping) }
/// # }
/// let router = Router::new()
///     .on(0, |_: Ping| println!("ping"))
///     .on_call(1, |ping: Ping| ping);
/// assert_eq!(router.len(), 2);
/// ```
#[derive(Default)]
pub struct Router {
    handlers: HashMap<u32, Handler>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a one-way method.
    pub fn on<Req, F>(mut self, ordinal: u32, f: F) -> Self
    where
        Req: Struct + 'static,
        F: Fn(Req) + 'static,
    {
        let entry = handler(move |header, message, _responder| {
            if header.expects_response() {
                return Err(BindingsError::Malformed("one-way method called as a request"));
            }
            let (_, request) = message.decode::<Req>()?;
            f(request);
            Ok(())
        });
        self.handlers.insert(ordinal, entry);
        self
    }

    /// Register a method that replies.
    pub fn on_call<Req, Resp, F>(mut self, ordinal: u32, f: F) -> Self
    where
        Req: Struct + 'static,
        Resp: Struct + 'static,
        F: Fn(Req) -> Resp + 'static,
    {
        let entry = handler(move |header, message, responder| {
            if !header.expects_response() {
                return Err(BindingsError::Malformed("request without a request id"));
            }
            let (_, request) = message.decode::<Req>()?;
            responder.reply(f(request))
        });
        self.handlers.insert(ordinal, entry);
        self
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub fn has_method(&self, ordinal: u32) -> bool {
        self.handlers.contains_key(&ordinal)
    }
}

impl LocalStub for Router {
    fn accept_request(&self, header: &MessageHeader, message: Message, responder: &Responder) -> Result<()> {
        let entry = self
            .handlers
            .get(&header.ordinal)
            .ok_or(BindingsError::UnknownOrdinal(header.ordinal))?;
        trace!(ordinal = header.ordinal, request_id = header.request_id, "dispatching request");
        entry(header, message, responder)
    }
}
