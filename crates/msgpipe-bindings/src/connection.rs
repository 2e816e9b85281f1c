use std::cell::RefCell;
use std::rc::Rc;

use msgpipe_codec::Message;
use msgpipe_transport::{Handle, MessagePipeCore};
use tracing::{debug, warn};

use crate::config::ConnectionConfig;
use crate::connector::{Connector, MessageReceiver, WeakConnector};
use crate::error::{BindingsError, Result};
use crate::proxy::Proxy;
use crate::router::{LocalStub, Responder};

type LocalSlot<L> = Rc<RefCell<Option<Rc<L>>>>;

/// A connector bound to a local stub and a remote stub.
///
/// Incoming requests are decoded and dispatched to the local stub; incoming
/// responses complete calls made through the remote stub's [`Proxy`].
/// Closing the connection closes the pipe and drops both stubs; a proxy
/// clone kept past that point fails every call with
/// [`BindingsError::Closed`].
///
/// A failing pipe (peer gone, read or write error) shuts the connection down
/// on its own; calls still in flight fail with
/// [`BindingsError::Disconnected`].
pub struct Connection<C, L, R>
where
    C: MessagePipeCore + 'static,
    L: LocalStub + 'static,
{
    connector: Connector<C>,
    local: LocalSlot<L>,
    proxy: Proxy,
    remote: Option<R>,
}

impl<C, L, R> Connection<C, L, R>
where
    C: MessagePipeCore + 'static,
    L: LocalStub + 'static,
{
    pub fn new<FL, FR>(core: C, handle: Handle, local_factory: FL, remote_factory: FR) -> Self
    where
        FL: FnOnce() -> L,
        FR: FnOnce(Proxy) -> R,
    {
        Self::with_config(
            core,
            handle,
            ConnectionConfig::default(),
            local_factory,
            remote_factory,
        )
    }

    pub fn with_config<FL, FR>(
        core: C,
        handle: Handle,
        config: ConnectionConfig,
        local_factory: FL,
        remote_factory: FR,
    ) -> Self
    where
        FL: FnOnce() -> L,
        FR: FnOnce(Proxy) -> R,
    {
        let connector = Connector::with_config(core, handle, config.connector);
        let proxy = Proxy::new(Rc::new(connector.clone()));
        let remote = remote_factory(proxy.clone());
        let local: LocalSlot<L> = Rc::new(RefCell::new(Some(Rc::new(local_factory()))));

        let weak = connector.downgrade();
        let failed_local = Rc::clone(&local);
        let failed_proxy = proxy.clone();
        connector.set_error_handler(move || {
            if let Some(connector) = weak.upgrade() {
                debug!(handle = connector.handle_raw(), "pipe failed, closing connection");
                shut_down(&connector, &failed_local, &failed_proxy, BindingsError::Disconnected);
            }
        });

        connector.set_incoming_receiver(Rc::new(Dispatcher {
            connector: connector.downgrade(),
            local: Rc::clone(&local),
            proxy: proxy.clone(),
            close_on_malformed: config.close_on_malformed_message,
        }));

        Self {
            connector,
            local,
            proxy,
            remote: Some(remote),
        }
    }

    /// The local stub, until the connection closes.
    pub fn local(&self) -> Option<Rc<L>> {
        self.local.borrow().clone()
    }

    /// The remote stub, until the connection closes.
    pub fn remote(&self) -> Option<&R> {
        self.remote.as_ref()
    }

    pub fn connector(&self) -> &Connector<C> {
        &self.connector
    }

    pub fn has_error(&self) -> bool {
        self.connector.has_error()
    }

    pub fn is_closed(&self) -> bool {
        self.connector.is_closed()
    }

    /// Close the pipe and drop both stubs. Pending calls fail with
    /// [`BindingsError::Closed`].
    pub fn close(&mut self) {
        self.remote = None;
        shut_down(&self.connector, &self.local, &self.proxy, BindingsError::Closed);
    }
}

impl<C, L, R> Drop for Connection<C, L, R>
where
    C: MessagePipeCore + 'static,
    L: LocalStub + 'static,
{
    fn drop(&mut self) {
        self.close();
    }
}

/// Drop the local stub, reject pending calls with `reason` and close the pipe.
fn shut_down<C, L>(
    connector: &Connector<C>,
    local: &LocalSlot<L>,
    proxy: &Proxy,
    reason: BindingsError,
) where
    C: MessagePipeCore + 'static,
{
    let stub = local.borrow_mut().take();
    drop(stub);
    proxy.close_with(reason);
    if !connector.is_closed() {
        connector.close();
    }
}

/// The connector's incoming receiver: routes responses to the proxy and
/// requests to the local stub.
struct Dispatcher<C: MessagePipeCore + 'static, L> {
    connector: WeakConnector<C>,
    local: LocalSlot<L>,
    proxy: Proxy,
    close_on_malformed: bool,
}

impl<C, L> Dispatcher<C, L>
where
    C: MessagePipeCore + 'static,
    L: LocalStub + 'static,
{
    fn dispatch(&self, message: Message) -> Result<()> {
        let header = message.header()?;
        if header.is_response() {
            return self.proxy.handle_response(&header, message);
        }

        let local = self.local.borrow().clone().ok_or(BindingsError::Closed)?;
        let connector = self.connector.upgrade().ok_or(BindingsError::Closed)?;
        let responder = Responder::new(Rc::new(connector), &header);
        local.accept_request(&header, message, &responder)
    }
}

impl<C, L> MessageReceiver for Dispatcher<C, L>
where
    C: MessagePipeCore + 'static,
    L: LocalStub + 'static,
{
    fn accept(&self, message: Message) -> bool {
        let err = match self.dispatch(message) {
            Ok(()) => return true,
            Err(err) => err,
        };
        warn!(error = %err, "failed to dispatch incoming message");
        if self.close_on_malformed {
            if let Some(connector) = self.connector.upgrade() {
                debug!(handle = connector.handle_raw(), "closing connection after bad message");
                shut_down(&connector, &self.local, &self.proxy, BindingsError::Closed);
            }
        }
        false
    }
}
