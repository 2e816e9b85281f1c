use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use msgpipe_codec::Message;
use msgpipe_transport::{
    Handle, MessagePipeCore, ReadFlags, Signal, TransportError, WaitCallback, WaitToken, WriteFlags,
};
use tracing::{debug, trace, warn};

use crate::config::ConnectorConfig;

/// Consumer of whole messages.
///
/// Connectors call their incoming receiver once per message read off the
/// pipe; a connector is itself the receiver for outgoing messages.
pub trait MessageReceiver {
    /// Take ownership of `message`. Returns `false` if it was not accepted.
    fn accept(&self, message: Message) -> bool;
}

impl<F: Fn(Message) -> bool> MessageReceiver for F {
    fn accept(&self, message: Message) -> bool {
        self(message)
    }
}

/// Observable connector state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectorState {
    /// No incoming receiver installed yet.
    Idle,
    /// Waiting for the pipe to become readable.
    Waiting,
    /// Inside the incoming receiver.
    Dispatching,
    /// A read, write or wait failed. Terminal.
    Errored,
    /// `close` was called. Terminal.
    Closed,
}

impl fmt::Display for ConnectorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectorState::Idle => "idle",
            ConnectorState::Waiting => "waiting",
            ConnectorState::Dispatching => "dispatching",
            ConnectorState::Errored => "errored",
            ConnectorState::Closed => "closed",
        };
        f.write_str(name)
    }
}

struct ConnectorInner<C: MessagePipeCore> {
    core: C,
    handle: Handle,
    config: ConnectorConfig,
    error: bool,
    closed: bool,
    dispatching: bool,
    pending_wait: Option<WaitToken>,
    receiver: Option<Rc<dyn MessageReceiver>>,
    error_handler: Option<ErrorHandler>,
}

type ErrorHandler = Box<dyn FnOnce()>;

impl<C: MessagePipeCore> ConnectorInner<C> {
    fn is_terminal(&self) -> bool {
        self.error || self.closed
    }

    /// Set the sticky error. Returns the error handler on the first failure.
    fn set_error(&mut self, op: &'static str, err: &TransportError) -> Option<ErrorHandler> {
        if self.error {
            return None;
        }
        warn!(handle = self.handle.raw(), op, error = %err, "connector entered error state");
        self.error = true;
        self.error_handler.take()
    }
}

impl<C: MessagePipeCore> Drop for ConnectorInner<C> {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        if let Some(token) = self.pending_wait.take() {
            self.core.cancel_wait(token);
        }
        let handle = self.handle.take();
        if handle.is_valid() {
            if let Err(err) = self.core.close(handle) {
                debug!(error = %err, "closing dropped connector handle failed");
            }
        }
    }
}

/// Turns one message pipe handle into an ordered stream of [`Message`]s.
///
/// Outgoing messages are written synchronously by [`accept`](Self::accept).
/// Incoming messages are read whenever the core reports the pipe readable
/// and handed to the incoming receiver in arrival order; each wake drains
/// the pipe before waiting again, unless
/// [`ConnectorConfig::max_messages_per_wake`] is set.
///
/// Any read, write or wait failure sets a sticky error flag: from then on
/// nothing is written and nothing is dispatched. There is no retry. The
/// owner finds out through [`has_error`](Self::has_error), or through the
/// callback installed with [`set_error_handler`](Self::set_error_handler).
///
/// Cloning a connector yields another reference to the same state. The pipe
/// is closed by [`close`](Self::close), or when the last reference drops.
pub struct Connector<C: MessagePipeCore + 'static> {
    inner: Rc<RefCell<ConnectorInner<C>>>,
}

impl<C: MessagePipeCore + 'static> Clone for Connector<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<C: MessagePipeCore + 'static> Connector<C> {
    pub fn new(core: C, handle: Handle) -> Self {
        Self::with_config(core, handle, ConnectorConfig::default())
    }

    pub fn with_config(core: C, handle: Handle, config: ConnectorConfig) -> Self {
        debug!(handle = handle.raw(), "connector created");
        Self {
            inner: Rc::new(RefCell::new(ConnectorInner {
                core,
                handle,
                config,
                error: false,
                closed: false,
                dispatching: false,
                pending_wait: None,
                receiver: None,
                error_handler: None,
            })),
        }
    }

    /// Write `message` to the pipe.
    ///
    /// Returns `false` without writing once the connector is errored or
    /// closed. A failed write puts the connector in the error state. On
    /// success the message's handles belong to the peer.
    pub fn accept(&self, message: Message) -> bool {
        let result = {
            let inner = self.inner.borrow();
            if inner.is_terminal() {
                return false;
            }
            let (bytes, mut handles) = message.into_parts();
            let result = inner
                .core
                .write_message(&inner.handle, &bytes, &mut handles, WriteFlags::NONE);
            if result.is_err() {
                // The message was handed over; its handles are ours to close.
                for handle in handles.drain(..) {
                    let _ = inner.core.close(handle);
                }
            } else {
                trace!(handle = inner.handle.raw(), len = bytes.len(), "message written");
            }
            result
        };

        match result {
            Ok(()) => true,
            Err(err) => {
                Self::fail(&self.inner, "write", &err);
                false
            }
        }
    }

    /// Run `handler` once, the first time the connector enters the error
    /// state. It is called with no connector borrow held, so it may close
    /// the connector. Closing drops the handler without running it.
    pub fn set_error_handler(&self, handler: impl FnOnce() + 'static) {
        self.inner.borrow_mut().error_handler = Some(Box::new(handler));
    }

    /// Install the receiver for incoming messages.
    ///
    /// The first installation starts reading, unless the connector is
    /// already errored or closed. Later calls replace the receiver.
    pub fn set_incoming_receiver(&self, receiver: Rc<dyn MessageReceiver>) {
        let start = {
            let mut inner = self.inner.borrow_mut();
            let first = inner.receiver.is_none();
            inner.receiver = Some(receiver);
            first && !inner.is_terminal() && !inner.dispatching && inner.pending_wait.is_none()
        };
        if start {
            Self::wait_for_readable(&self.inner);
        }
    }

    /// Cancel the outstanding wait and close the pipe.
    ///
    /// The handle is reset to the invalid sentinel, after which
    /// [`accept`](Self::accept) is a no-op. Closing twice is a caller bug;
    /// the second call only logs.
    pub fn close(&self) {
        let mut inner = self.inner.borrow_mut();
        if inner.closed {
            warn!("close called on an already closed connector");
            return;
        }
        inner.closed = true;
        if let Some(token) = inner.pending_wait.take() {
            inner.core.cancel_wait(token);
        }
        let handle = inner.handle.take();
        let raw = handle.raw();
        let result = inner.core.close(handle);
        let receiver = inner.receiver.take();
        let error_handler = inner.error_handler.take();
        drop(inner);
        drop(receiver);
        drop(error_handler);

        match result {
            Ok(()) => debug!(handle = raw, "connector closed"),
            Err(err) => debug!(handle = raw, error = %err, "closing connector handle failed"),
        }
    }

    pub fn state(&self) -> ConnectorState {
        let inner = self.inner.borrow();
        if inner.closed {
            ConnectorState::Closed
        } else if inner.error {
            ConnectorState::Errored
        } else if inner.dispatching {
            ConnectorState::Dispatching
        } else if inner.pending_wait.is_some() {
            ConnectorState::Waiting
        } else {
            ConnectorState::Idle
        }
    }

    /// Whether a read, write or wait has failed. Never resets.
    pub fn has_error(&self) -> bool {
        self.inner.borrow().error
    }

    pub fn is_closed(&self) -> bool {
        self.inner.borrow().closed
    }

    /// Raw value of the owned handle; `0` once closed.
    pub fn handle_raw(&self) -> u32 {
        self.inner.borrow().handle.raw()
    }

    pub fn downgrade(&self) -> WeakConnector<C> {
        WeakConnector {
            inner: Rc::downgrade(&self.inner),
        }
    }

    fn wait_for_readable(inner_rc: &Rc<RefCell<ConnectorInner<C>>>) {
        let weak = Rc::downgrade(inner_rc);
        let callback: WaitCallback = Box::new(move |result| {
            if let Some(inner) = weak.upgrade() {
                Self::on_handle_ready(&inner, result);
            }
        });

        let result = {
            let mut inner = inner_rc.borrow_mut();
            let result = inner.core.async_wait(&inner.handle, Signal::Readable, callback);
            if let Ok(token) = &result {
                inner.pending_wait = Some(*token);
            }
            result
        };
        if let Err(err) = result {
            Self::fail(inner_rc, "wait", &err);
        }
    }

    fn fail(inner_rc: &Rc<RefCell<ConnectorInner<C>>>, op: &'static str, err: &TransportError) {
        let handler = inner_rc.borrow_mut().set_error(op, err);
        if let Some(handler) = handler {
            handler();
        }
    }

    fn on_handle_ready(inner_rc: &Rc<RefCell<ConnectorInner<C>>>, result: msgpipe_transport::Result<()>) {
        {
            let mut inner = inner_rc.borrow_mut();
            inner.pending_wait = None;
            if inner.is_terminal() {
                return;
            }
        }
        match result {
            Ok(()) => Self::read_available(inner_rc),
            Err(err) => Self::fail(inner_rc, "wait", &err),
        }
    }

    fn read_available(inner_rc: &Rc<RefCell<ConnectorInner<C>>>) {
        let mut dispatched = 0usize;
        loop {
            let read = {
                let inner = inner_rc.borrow();
                if inner.is_terminal() {
                    return;
                }
                let capped = inner
                    .config
                    .max_messages_per_wake
                    .is_some_and(|cap| dispatched >= cap.get());
                if capped {
                    None
                } else {
                    Some(inner.core.read_message(&inner.handle, ReadFlags::NONE))
                }
            };

            let Some(read) = read else {
                trace!(dispatched, "per-wake cap reached, yielding");
                Self::wait_for_readable(inner_rc);
                return;
            };

            match read {
                Ok(Some(raw)) => {
                    let receiver = {
                        let mut inner = inner_rc.borrow_mut();
                        inner.dispatching = true;
                        inner.receiver.clone()
                    };
                    if let Some(receiver) = receiver {
                        if !receiver.accept(Message::from(raw)) {
                            debug!("incoming receiver rejected a message");
                        }
                    }
                    inner_rc.borrow_mut().dispatching = false;
                    dispatched += 1;
                }
                Ok(None) => {
                    Self::wait_for_readable(inner_rc);
                    return;
                }
                Err(err) => {
                    Self::fail(inner_rc, "read", &err);
                    return;
                }
            }
        }
    }
}

impl<C: MessagePipeCore + 'static> MessageReceiver for Connector<C> {
    fn accept(&self, message: Message) -> bool {
        Connector::accept(self, message)
    }
}

impl<C: MessagePipeCore + 'static> fmt::Debug for Connector<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connector")
            .field("handle", &self.handle_raw())
            .field("state", &self.state())
            .finish()
    }
}

/// Non-owning reference to a [`Connector`].
pub struct WeakConnector<C: MessagePipeCore + 'static> {
    inner: Weak<RefCell<ConnectorInner<C>>>,
}

impl<C: MessagePipeCore + 'static> Clone for WeakConnector<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Weak::clone(&self.inner),
        }
    }
}

impl<C: MessagePipeCore + 'static> WeakConnector<C> {
    pub fn upgrade(&self) -> Option<Connector<C>> {
        self.inner.upgrade().map(|inner| Connector { inner })
    }
}
