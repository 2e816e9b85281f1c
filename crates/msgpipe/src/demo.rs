//! Echo interface: the client sends points carrying a pipe handle, the
//! server sends each one straight back and records one-way log lines.

use std::cell::RefCell;
use std::rc::Rc;

use msgpipe_bindings::{BindingsError, Connection, ConnectionConfig, Proxy, Result, Router};
use msgpipe_codec::{FieldReader, FieldWriter, Struct};
use msgpipe_transport::{Handle, LocalCore, MessagePipeCore};

/// `EchoPoint(Point) => (Point)`
pub const ECHO_POINT: u32 = 0;

/// `Log(LogLine)`
pub const LOG: u32 = 1;

#[derive(Debug, Default, PartialEq)]
pub struct Point {
    pub x: i32,
    pub y: i32,
    pub name: String,
    pub array: Vec<u8>,
    pub handle: Handle,
}

impl Struct for Point {
    const NAME: &'static str = "Point";

    fn encode_fields<'v>(&'v self, fields: &mut FieldWriter<'_, 'v>) {
        fields.write_i32(self.x);
        fields.write_i32(self.y);
        fields.write_string(&self.name);
        fields.write_array(&self.array);
        fields.write_handle(&self.handle);
    }

    fn decode_fields(fields: &mut FieldReader<'_, '_>) -> msgpipe_codec::Result<Self> {
        Ok(Self {
            x: fields.read_i32()?,
            y: fields.read_i32()?,
            name: fields.read_string()?,
            array: fields.read_array()?,
            handle: fields.read_handle()?,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LogLine {
    pub text: String,
}

impl Struct for LogLine {
    const NAME: &'static str = "LogLine";

    fn encode_fields<'v>(&'v self, fields: &mut FieldWriter<'_, 'v>) {
        fields.write_string(&self.text);
    }

    fn decode_fields(fields: &mut FieldReader<'_, '_>) -> msgpipe_codec::Result<Self> {
        Ok(Self {
            text: fields.read_string()?,
        })
    }
}

/// Typed remote for the echo interface.
#[derive(Clone)]
pub struct EchoRemote {
    proxy: Proxy,
}

impl EchoRemote {
    pub fn new(proxy: Proxy) -> Self {
        Self { proxy }
    }

    pub fn echo_point(
        &self,
        point: Point,
        on_reply: impl FnOnce(Result<Point>) + 'static,
    ) -> Result<u64> {
        self.proxy.call(ECHO_POINT, point, on_reply)
    }

    pub fn log(&self, text: impl Into<String>) -> Result<()> {
        self.proxy.send(LOG, LogLine { text: text.into() })
    }

    /// Echo calls still waiting for a reply.
    pub fn pending_calls(&self) -> usize {
        self.proxy.pending_count()
    }
}

/// Local implementation of the echo interface.
pub fn echo_router(log: Rc<RefCell<Vec<String>>>) -> Router {
    Router::new()
        .on_call(ECHO_POINT, |point: Point| point)
        .on(LOG, move |line: LogLine| log.borrow_mut().push(line.text))
}

/// One echoed point as seen by the client.
#[derive(Debug, Clone, PartialEq)]
pub struct EchoedPoint {
    pub x: i32,
    pub y: i32,
    pub name: String,
    pub array: Vec<u8>,
    /// The handle that came back is the one that was sent.
    pub handle_returned: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DemoOutcome {
    pub echoed: Vec<EchoedPoint>,
    pub logged: Vec<String>,
    pub reactor_callbacks: usize,
    pub pending_calls: usize,
    pub client_error: bool,
    pub server_error: bool,
}

/// Run `rounds` echo calls and log messages over an in-memory pipe pair.
pub fn run_echo_demo(config: &ConnectionConfig, rounds: usize) -> Result<DemoOutcome> {
    let core = LocalCore::new();
    let (client_end, server_end) = core.create_message_pipe();

    let logged = Rc::new(RefCell::new(Vec::new()));
    let server_log = Rc::clone(&logged);
    let mut server: Connection<LocalCore, Router, Proxy> = Connection::with_config(
        core.clone(),
        server_end,
        config.clone(),
        move || echo_router(server_log),
        |proxy| proxy,
    );
    let mut client: Connection<LocalCore, Router, EchoRemote> = Connection::with_config(
        core.clone(),
        client_end,
        config.clone(),
        Router::new,
        EchoRemote::new,
    );
    let remote = client.remote().ok_or(BindingsError::Closed)?.clone();

    let replies: Rc<RefCell<Vec<(u32, Result<Point>)>>> = Rc::new(RefCell::new(Vec::new()));
    let mut kept = Vec::with_capacity(rounds);
    for round in 0..rounds {
        let (carried, kept_end) = core.create_message_pipe();
        kept.push(kept_end);
        let sent_raw = carried.raw();
        let scale = round as i32 + 1;
        let point = Point {
            x: 10 * scale,
            y: 20 * scale,
            name: format!("point-{round}"),
            array: vec![1, 2],
            handle: carried,
        };

        let sink = Rc::clone(&replies);
        remote.echo_point(point, move |reply| sink.borrow_mut().push((sent_raw, reply)))?;
        remote.log(format!("sent point {round}"))?;
    }

    let reactor_callbacks = core.run_until_idle();

    let mut echoed = Vec::with_capacity(rounds);
    for (sent_raw, reply) in replies.take() {
        let point = reply?;
        echoed.push(EchoedPoint {
            x: point.x,
            y: point.y,
            name: point.name,
            array: point.array,
            handle_returned: point.handle.raw() == sent_raw,
        });
        if point.handle.is_valid() {
            core.close(point.handle)?;
        }
    }
    for handle in kept {
        core.close(handle)?;
    }

    let outcome = DemoOutcome {
        echoed,
        logged: logged.take(),
        reactor_callbacks,
        pending_calls: remote.pending_calls(),
        client_error: client.has_error(),
        server_error: server.has_error(),
    };
    client.close();
    server.close();
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use std::num::NonZeroUsize;

    use msgpipe_bindings::ConnectorConfig;

    use super::*;

    #[test]
    fn demo_echoes_every_point_with_its_handle() {
        let outcome = run_echo_demo(&ConnectionConfig::default(), 3).unwrap();

        assert_eq!(outcome.echoed.len(), 3);
        let first = &outcome.echoed[0];
        assert_eq!((first.x, first.y), (10, 20));
        assert_eq!(first.name, "point-0");
        assert_eq!(first.array, vec![1, 2]);
        assert!(outcome.echoed.iter().all(|p| p.handle_returned));
        assert_eq!(
            outcome.logged,
            vec!["sent point 0", "sent point 1", "sent point 2"]
        );
        assert_eq!(outcome.pending_calls, 0);
        assert!(!outcome.client_error);
        assert!(!outcome.server_error);
    }

    #[test]
    fn capped_demo_matches_uncapped() {
        let capped = ConnectionConfig {
            connector: ConnectorConfig {
                max_messages_per_wake: NonZeroUsize::new(1),
            },
            ..ConnectionConfig::default()
        };
        let drained = run_echo_demo(&ConnectionConfig::default(), 4).unwrap();
        let stepped = run_echo_demo(&capped, 4).unwrap();

        assert_eq!(drained.echoed, stepped.echoed);
        assert_eq!(drained.logged, stepped.logged);
        assert!(stepped.reactor_callbacks > drained.reactor_callbacks);
    }

    #[test]
    fn zero_rounds_is_a_quiet_run() {
        let outcome = run_echo_demo(&ConnectionConfig::default(), 0).unwrap();
        assert!(outcome.echoed.is_empty());
        assert_eq!(outcome.reactor_callbacks, 0);
    }
}
