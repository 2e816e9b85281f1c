use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::rc::Rc;

use bytes::Bytes;
use tracing::{debug, trace};

use crate::error::{Result, TransportError};
use crate::handle::Handle;
use crate::traits::{
    MessagePipeCore, RawMessage, ReadFlags, Signal, WaitCallback, WaitToken, WriteFlags,
};

/// Default maximum message size: 16 MiB.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Default number of messages an endpoint may have queued before writes fail.
pub const DEFAULT_MAX_QUEUED_MESSAGES: usize = 4096;

/// Limits enforced by [`LocalCore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalCoreConfig {
    /// Largest message body accepted by `write_message`.
    pub max_message_size: usize,
    /// Largest per-endpoint queue before `write_message` reports exhaustion.
    pub max_queued_messages: usize,
}

impl Default for LocalCoreConfig {
    fn default() -> Self {
        Self {
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            max_queued_messages: DEFAULT_MAX_QUEUED_MESSAGES,
        }
    }
}

/// In-process message pipes plus the single-threaded reactor that drives
/// their async waits.
///
/// Cloning is cheap and every clone shares the same endpoint table. Wait
/// callbacks only ever run from [`LocalCore::run_until_idle`], so primitives
/// never re-enter their caller.
#[derive(Clone, Default)]
pub struct LocalCore {
    state: Rc<RefCell<CoreState>>,
}

struct CoreState {
    config: LocalCoreConfig,
    next_handle: u32,
    next_token: u64,
    endpoints: HashMap<u32, Endpoint>,
    waits: BTreeMap<WaitToken, Registration>,
    write_faults: HashMap<u32, TransportError>,
    read_faults: HashMap<u32, TransportError>,
}

impl Default for CoreState {
    fn default() -> Self {
        Self {
            config: LocalCoreConfig::default(),
            next_handle: 1,
            next_token: 1,
            endpoints: HashMap::new(),
            waits: BTreeMap::new(),
            write_faults: HashMap::new(),
            read_faults: HashMap::new(),
        }
    }
}

struct Endpoint {
    peer: Option<u32>,
    queue: VecDeque<RawMessage>,
}

struct Registration {
    handle: u32,
    signal: Signal,
    callback: WaitCallback,
}

impl CoreState {
    fn allocate_handle(&mut self) -> u32 {
        let raw = self.next_handle;
        self.next_handle += 1;
        raw
    }
}

impl LocalCore {
    /// Create an empty core with default limits.
    pub fn new() -> Self {
        Self::with_config(LocalCoreConfig::default())
    }

    /// Create an empty core with explicit limits.
    pub fn with_config(config: LocalCoreConfig) -> Self {
        let state = CoreState {
            config,
            ..CoreState::default()
        };
        Self {
            state: Rc::new(RefCell::new(state)),
        }
    }

    /// Create a connected pair of endpoints.
    pub fn create_message_pipe(&self) -> (Handle, Handle) {
        let mut state = self.state.borrow_mut();
        let a = state.allocate_handle();
        let b = state.allocate_handle();
        state.endpoints.insert(
            a,
            Endpoint {
                peer: Some(b),
                queue: VecDeque::new(),
            },
        );
        state.endpoints.insert(
            b,
            Endpoint {
                peer: Some(a),
                queue: VecDeque::new(),
            },
        );
        debug!(a, b, "created message pipe");
        (Handle::from_raw(a), Handle::from_raw(b))
    }

    /// Run one reactor turn: fire satisfied waits in registration order until
    /// none is left. Returns the number of callbacks fired.
    pub fn run_until_idle(&self) -> usize {
        let mut fired = 0;
        while let Some((token, callback)) = self.next_ready() {
            trace!(token = token.raw(), "wait satisfied");
            callback(Ok(()));
            fired += 1;
        }
        fired
    }

    /// Whether `handle` names an open endpoint.
    pub fn is_open(&self, handle: &Handle) -> bool {
        self.state.borrow().endpoints.contains_key(&handle.raw())
    }

    /// Number of messages waiting to be read on `handle`.
    pub fn queued_messages(&self, handle: &Handle) -> usize {
        self.state
            .borrow()
            .endpoints
            .get(&handle.raw())
            .map_or(0, |endpoint| endpoint.queue.len())
    }

    /// Number of outstanding wait registrations.
    pub fn pending_waits(&self) -> usize {
        self.state.borrow().waits.len()
    }

    /// Make the next write on `handle` fail with `error`.
    pub fn fail_next_write(&self, handle: &Handle, error: TransportError) {
        self.state
            .borrow_mut()
            .write_faults
            .insert(handle.raw(), error);
    }

    /// Make the next read on `handle` fail with `error`.
    pub fn fail_next_read(&self, handle: &Handle, error: TransportError) {
        self.state
            .borrow_mut()
            .read_faults
            .insert(handle.raw(), error);
    }

    fn next_ready(&self) -> Option<(WaitToken, WaitCallback)> {
        let mut guard = self.state.borrow_mut();
        let state = &mut *guard;
        let token = state
            .waits
            .iter()
            .find(|(_, reg)| is_satisfied(&state.endpoints, reg.handle, reg.signal))
            .map(|(token, _)| *token)?;
        state
            .waits
            .remove(&token)
            .map(|reg| (token, reg.callback))
    }
}

fn is_satisfied(endpoints: &HashMap<u32, Endpoint>, handle: u32, signal: Signal) -> bool {
    let Some(endpoint) = endpoints.get(&handle) else {
        return false;
    };
    match signal {
        Signal::Readable => !endpoint.queue.is_empty() || endpoint.peer.is_none(),
    }
}

impl MessagePipeCore for LocalCore {
    fn write_message(
        &self,
        handle: &Handle,
        bytes: &[u8],
        handles: &mut Vec<Handle>,
        _flags: WriteFlags,
    ) -> Result<()> {
        let mut guard = self.state.borrow_mut();
        let state = &mut *guard;
        let raw = handle.raw();

        let peer = state
            .endpoints
            .get(&raw)
            .ok_or(TransportError::InvalidHandle(raw))?
            .peer;

        if let Some(err) = state.write_faults.remove(&raw) {
            return Err(err);
        }

        for (index, attached) in handles.iter().enumerate() {
            if attached.raw() == raw {
                return Err(TransportError::InvalidArgument(
                    "an endpoint cannot be sent over itself",
                ));
            }
            if !state.endpoints.contains_key(&attached.raw()) {
                return Err(TransportError::InvalidHandle(attached.raw()));
            }
            if handles[..index].iter().any(|h| h.raw() == attached.raw()) {
                return Err(TransportError::InvalidArgument(
                    "the same handle is attached twice",
                ));
            }
        }

        if bytes.len() > state.config.max_message_size {
            return Err(TransportError::ResourceExhausted("message too large"));
        }

        let peer = peer.ok_or(TransportError::PeerClosed)?;
        let max_queued = state.config.max_queued_messages;
        let queue = &mut state
            .endpoints
            .get_mut(&peer)
            .ok_or(TransportError::PeerClosed)?
            .queue;
        if queue.len() >= max_queued {
            return Err(TransportError::ResourceExhausted("peer queue is full"));
        }

        queue.push_back(RawMessage {
            bytes: Bytes::copy_from_slice(bytes),
            handles: std::mem::take(handles),
        });
        trace!(handle = raw, peer, len = bytes.len(), "wrote message");
        Ok(())
    }

    fn read_message(&self, handle: &Handle, _flags: ReadFlags) -> Result<Option<RawMessage>> {
        let mut guard = self.state.borrow_mut();
        let state = &mut *guard;
        let raw = handle.raw();

        let endpoint = state
            .endpoints
            .get_mut(&raw)
            .ok_or(TransportError::InvalidHandle(raw))?;

        if let Some(err) = state.read_faults.remove(&raw) {
            return Err(err);
        }

        if let Some(message) = endpoint.queue.pop_front() {
            trace!(handle = raw, len = message.bytes.len(), "read message");
            return Ok(Some(message));
        }
        if endpoint.peer.is_none() {
            return Err(TransportError::PeerClosed);
        }
        Ok(None)
    }

    fn async_wait(
        &self,
        handle: &Handle,
        signal: Signal,
        callback: WaitCallback,
    ) -> Result<WaitToken> {
        let mut state = self.state.borrow_mut();
        let raw = handle.raw();
        if !state.endpoints.contains_key(&raw) {
            return Err(TransportError::InvalidHandle(raw));
        }

        let token = WaitToken::from_raw(state.next_token);
        state.next_token += 1;
        state.waits.insert(
            token,
            Registration {
                handle: raw,
                signal,
                callback,
            },
        );
        trace!(handle = raw, token = token.raw(), ?signal, "registered wait");
        Ok(token)
    }

    fn cancel_wait(&self, token: WaitToken) {
        let removed = self.state.borrow_mut().waits.remove(&token);
        if removed.is_some() {
            trace!(token = token.raw(), "cancelled wait");
        }
    }

    fn close(&self, handle: Handle) -> Result<()> {
        let raw = handle.raw();
        let (cancelled, orphaned) = {
            let mut guard = self.state.borrow_mut();
            let state = &mut *guard;
            let endpoint = state
                .endpoints
                .remove(&raw)
                .ok_or(TransportError::InvalidHandle(raw))?;
            if let Some(peer) = endpoint.peer {
                if let Some(peer_endpoint) = state.endpoints.get_mut(&peer) {
                    peer_endpoint.peer = None;
                }
            }
            state.write_faults.remove(&raw);
            state.read_faults.remove(&raw);

            let tokens: Vec<WaitToken> = state
                .waits
                .iter()
                .filter(|(_, reg)| reg.handle == raw)
                .map(|(token, _)| *token)
                .collect();
            let cancelled: Vec<Registration> = tokens
                .iter()
                .filter_map(|token| state.waits.remove(token))
                .collect();
            (cancelled, endpoint.queue)
        };
        debug!(
            handle = raw,
            dropped_waits = cancelled.len(),
            dropped_messages = orphaned.len(),
            "closed endpoint"
        );
        drop(cancelled);

        // Endpoints still in flight on a closed endpoint go down with it.
        for message in orphaned {
            for attached in message.handles {
                let _ = self.close(attached);
            }
        }
        Ok(())
    }
}
