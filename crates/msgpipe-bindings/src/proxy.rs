use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use msgpipe_codec::{encode_message, Message, MessageHeader, Struct};
use tracing::{debug, trace};

use crate::connector::MessageReceiver;
use crate::error::{BindingsError, Result};

type Completion = Box<dyn FnOnce(Result<Message>) -> Result<()>>;

struct PendingCall {
    ordinal: u32,
    complete: Completion,
}

struct ProxyState {
    sink: Option<Rc<dyn MessageReceiver>>,
    next_request_id: u64,
    pending: HashMap<u64, PendingCall>,
}

/// Outgoing half of an interface: encodes method calls and tracks replies.
///
/// Typed remote stubs wrap a `Proxy` and expose one method per ordinal.
/// Clones share state; once [`close`](Self::close) runs every clone fails
/// with [`BindingsError::Closed`].
#[derive(Clone)]
pub struct Proxy {
    state: Rc<RefCell<ProxyState>>,
}

impl ProxyState {
    fn allocate_request_id(&mut self) -> u64 {
        loop {
            let request_id = self.next_request_id;
            self.next_request_id = self.next_request_id.wrapping_add(1);
            if !self.pending.contains_key(&request_id) {
                return request_id;
            }
        }
    }
}

impl Proxy {
    /// Create a proxy that writes to `sink`, normally a connector.
    pub fn new(sink: Rc<dyn MessageReceiver>) -> Self {
        Self {
            state: Rc::new(RefCell::new(ProxyState {
                sink: Some(sink),
                next_request_id: 0,
                pending: HashMap::new(),
            })),
        }
    }

    /// Send a one-way message.
    pub fn send<Req: Struct>(&self, ordinal: u32, request: Req) -> Result<()> {
        let sink = self.sink()?;
        if !sink.accept(encode_message(&MessageHeader::new(ordinal), request)) {
            return Err(BindingsError::SendFailed);
        }
        trace!(ordinal, "sent message");
        Ok(())
    }

    /// Send a request and register `on_reply` for its response.
    ///
    /// Returns the request id. `on_reply` runs once: with the decoded
    /// response, with the decode error, or with the rejection passed to
    /// [`close_with`](Self::close_with) if the proxy closes first. It is
    /// dropped without running if the send itself fails.
    ///
    /// Ids increase and wrap; an id still waiting for its reply is skipped.
    pub fn call<Req, Resp, F>(&self, ordinal: u32, request: Req, on_reply: F) -> Result<u64>
    where
        Req: Struct,
        Resp: Struct + 'static,
        F: FnOnce(Result<Resp>) + 'static,
    {
        let (sink, request_id) = {
            let mut state = self.state.borrow_mut();
            let sink = state.sink.clone().ok_or(BindingsError::Closed)?;
            (sink, state.allocate_request_id())
        };

        let complete: Completion = Box::new(move |reply: Result<Message>| {
            match reply.and_then(|message| Ok(message.decode::<Resp>()?.1)) {
                Ok(response) => {
                    on_reply(Ok(response));
                    Ok(())
                }
                Err(err) => {
                    on_reply(Err(err.clone()));
                    Err(err)
                }
            }
        });
        // Replies are only read from a reactor turn, never during the write.
        let message = encode_message(&MessageHeader::request(ordinal, request_id), request);
        if !sink.accept(message) {
            return Err(BindingsError::SendFailed);
        }
        self.state
            .borrow_mut()
            .pending
            .insert(request_id, PendingCall { ordinal, complete });
        trace!(ordinal, request_id, "sent request");
        Ok(request_id)
    }

    /// Complete the pending call matching a response message.
    pub fn handle_response(&self, header: &MessageHeader, message: Message) -> Result<()> {
        let pending = self
            .state
            .borrow_mut()
            .pending
            .remove(&header.request_id)
            .ok_or(BindingsError::UnexpectedResponse(header.request_id))?;

        if pending.ordinal != header.ordinal {
            let err = BindingsError::Malformed("response ordinal does not match its request");
            let _ = (pending.complete)(Err(err.clone()));
            return Err(err);
        }
        (pending.complete)(Ok(message))
    }

    /// Drop the sink and fail every pending call with [`BindingsError::Closed`].
    pub fn close(&self) {
        self.close_with(BindingsError::Closed);
    }

    /// Drop the sink and fail every pending call with `reason`, in request
    /// id order. Later calls fail with [`BindingsError::Closed`].
    pub fn close_with(&self, reason: BindingsError) {
        let pending: Vec<PendingCall> = {
            let mut state = self.state.borrow_mut();
            state.sink = None;
            let mut pending: Vec<(u64, PendingCall)> = state.pending.drain().collect();
            pending.sort_by_key(|(request_id, _)| *request_id);
            pending.into_iter().map(|(_, call)| call).collect()
        };
        if !pending.is_empty() {
            debug!(rejected = pending.len(), %reason, "proxy closed with calls in flight");
        }
        for call in pending {
            let _ = (call.complete)(Err(reason.clone()));
        }
    }

    pub fn is_closed(&self) -> bool {
        self.state.borrow().sink.is_none()
    }

    /// Number of calls still waiting for a response.
    pub fn pending_count(&self) -> usize {
        self.state.borrow().pending.len()
    }

    fn sink(&self) -> Result<Rc<dyn MessageReceiver>> {
        self.state.borrow().sink.clone().ok_or(BindingsError::Closed)
    }
}
