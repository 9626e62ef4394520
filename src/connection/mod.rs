//! Connection: one socket, its state machine and its two pumps.
//!
//! # Lifecycle
//!
//! ```text
//! outgoing: WaitingHello ─► connect + read Hello (connect timeout) ─► Active
//! incoming: Init ─► queue Hello ─► Active
//!
//! Active ─► close(false) ─► Close ─► (no local work, no pending) ─► Bye ─► Closing
//!        ─► close(true) / failure / peer Bye ─────────────────────────────► Closed | Error
//! ```
//!
//! # Pumps
//!
//! The send pump is the writer task. The receive pump
//! reads one frame per task: after a quest is read it spawns the task for
//! the next frame, then runs the servant, so a slow servant never holds up
//! later frames. Answers are resolved before the next read. A bye ends the
//! chain.
//!
//! # Locks
//!
//! `tasks` is taken before `life`, and `life` before the transaction table
//! lock. Results are resolved with no lock held.

mod result;
mod state;
mod table;

pub use result::{Completion, QuestResult};
pub use state::ConnectionState;
pub use table::{next_txid, TransactionTable};

use std::net::SocketAddr;
use std::sync::{Arc, Weak};
use std::time::Duration;

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::{AbortHandle, JoinHandle};

use crate::adapter::Adapter;
use crate::codec::{textify, Map};
use crate::config::ConnectionTimeouts;
use crate::dlog::{TAG_CA, TAG_CAE, TAG_CQ, TAG_EXCEPT, TAG_SA, TAG_SAE, TAG_SLOW, TAG_SQ, TAG_WARN};
use crate::engine::EngineCore;
use crate::error::{Result, XicError};
use crate::handler::{Current, QuestInfo, Servant};
use crate::pool::TaskPool;
use crate::protocol::{Answer, Frame, Header, Message, MessageType, Quest, HEADER_SIZE, TXID_ASSIGN};
use crate::proxy::Proxy;
use crate::transport::{tcp, Endpoint};
use crate::writer::{run_writer, writer_channel, Notice, OutboundFrame, WriterHandle, WriterQueue};

pub(crate) type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
pub(crate) type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Which side opened the socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Accepted by an adapter.
    Incoming,
    /// Opened by a proxy.
    Outgoing,
}

struct Lifecycle {
    state: ConnectionState,
    /// Inbound quests being processed.
    processing: usize,
    cause: Option<XicError>,
}

#[derive(Default)]
struct Tasks {
    connect: Option<AbortHandle>,
    writer: Option<AbortHandle>,
    reader: Option<AbortHandle>,
}

impl Tasks {
    fn abort_all(self) {
        for handle in [self.connect, self.writer, self.reader].into_iter().flatten() {
            handle.abort();
        }
    }
}

#[derive(Clone, Copy)]
enum Slot {
    Connect,
    Writer,
    Reader,
}

struct Addrs {
    local: String,
    peer: String,
}

/// A protocol connection.
pub struct Connection {
    id: u64,
    me: Weak<Connection>,
    core: Arc<EngineCore>,
    /// Runtime the connection was created on; all its tasks run there.
    runtime: Handle,
    direction: Direction,
    endpoint: Endpoint,
    timeouts: ConnectionTimeouts,
    life: Mutex<Lifecycle>,
    table: TransactionTable,
    writer: WriterHandle,
    queue: Mutex<Option<WriterQueue>>,
    tasks: Mutex<Tasks>,
    adapter: RwLock<Option<Arc<Adapter>>>,
    addrs: RwLock<Addrs>,
    closed: watch::Sender<bool>,
}

impl Connection {
    fn create(
        core: Arc<EngineCore>,
        runtime: Handle,
        direction: Direction,
        endpoint: Endpoint,
        state: ConnectionState,
    ) -> Arc<Self> {
        let timeouts = ConnectionTimeouts::resolve(endpoint.timeouts(), &core.tunables().timeout);
        let (writer, queue) = writer_channel();
        let (closed, _) = watch::channel(false);
        let id = core.next_connection_id();

        Arc::new_cyclic(|me| Self {
            id,
            me: me.clone(),
            core,
            runtime,
            direction,
            endpoint,
            timeouts,
            life: Mutex::new(Lifecycle {
                state,
                processing: 0,
                cause: None,
            }),
            table: TransactionTable::new(),
            writer,
            queue: Mutex::new(Some(queue)),
            tasks: Mutex::new(Tasks::default()),
            adapter: RwLock::new(None),
            addrs: RwLock::new(Addrs {
                local: "-".into(),
                peer: "-".into(),
            }),
            closed,
        })
    }

    /// Start an outgoing connection on `runtime`. Quests may be sent right
    /// away; they are written once the handshake completes.
    pub(crate) fn connect(core: Arc<EngineCore>, runtime: Handle, endpoint: Endpoint) -> Arc<Self> {
        let conn = Self::create(
            core,
            runtime,
            Direction::Outgoing,
            endpoint,
            ConnectionState::WaitingHello,
        );
        let task = conn.clone();
        let handle = conn.core.client_pool().spawn(&conn.runtime, async move {
            let limit = task.timeouts.connect;
            let attempt = tokio::time::timeout(limit, async {
                let stream = tcp::connect(&task.endpoint).await?;
                task.set_addrs(stream.local_addr().ok(), stream.peer_addr().ok());
                task.handshake(stream).await
            })
            .await;

            match attempt {
                Ok(Ok((reader, writer))) => task.activate(reader, writer),
                Ok(Err(e)) => task.disconnect(Some(e)),
                Err(_) => task.disconnect(Some(XicError::ConnectTimeout(format!(
                    "endpoint={} timeout={}ms",
                    task.endpoint,
                    limit.as_millis()
                )))),
            }
        });
        conn.keep(Slot::Connect, handle);
        conn
    }

    /// Run the outgoing handshake over an already open stream.
    #[cfg(test)]
    pub(crate) fn connect_over<S>(core: Arc<EngineCore>, endpoint: Endpoint, stream: S) -> Arc<Self>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let conn = Self::create(
            core,
            Handle::current(),
            Direction::Outgoing,
            endpoint,
            ConnectionState::WaitingHello,
        );
        let task = conn.clone();
        let handle = conn.runtime.spawn(async move {
            match task.handshake(stream).await {
                Ok((reader, writer)) => task.activate(reader, writer),
                Err(e) => task.disconnect(Some(e)),
            }
        });
        conn.keep(Slot::Connect, handle);
        conn
    }

    /// Wrap an accepted stream. The hello is queued immediately.
    ///
    /// Must be called from within a tokio runtime.
    pub(crate) fn accept<S>(
        core: Arc<EngineCore>,
        adapter: Option<Arc<Adapter>>,
        endpoint: Endpoint,
        stream: S,
        local: Option<SocketAddr>,
        peer: Option<SocketAddr>,
    ) -> Arc<Self>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let conn = Self::create(
            core,
            Handle::current(),
            Direction::Incoming,
            endpoint,
            ConnectionState::Init,
        );
        *conn.adapter.write() = adapter;
        conn.set_addrs(local, peer);

        let _ = conn.writer.send(OutboundFrame::hello());
        conn.life.lock().state = ConnectionState::Active;

        let (reader, writer) = tokio::io::split(stream);
        conn.start_pumps(Box::new(reader), Box::new(writer));
        tracing::debug!(id = conn.id, peer = %conn.peer_addr(), "connection accepted");
        conn
    }

    async fn handshake<S>(&self, stream: S) -> Result<(BoxedReader, BoxedWriter)>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        let mut reader: BoxedReader = Box::new(reader);
        let frame = read_frame(&mut reader, self.core.tunables().message_size).await?;
        if frame.header.msg_type != MessageType::Hello {
            return Err(XicError::Protocol(format!(
                "expected hello, got {:?}",
                frame.header.msg_type
            )));
        }
        Ok((reader, Box::new(writer)))
    }

    fn activate(&self, reader: BoxedReader, writer: BoxedWriter) {
        {
            let mut life = self.life.lock();
            if life.state.is_closed() {
                return;
            }
            if life.state.is_waiting() {
                life.state = ConnectionState::Active;
            }
        }
        tracing::debug!(id = self.id, endpoint = %self.endpoint, "connection established");
        self.start_pumps(reader, writer);

        let mut life = self.life.lock();
        self.try_closing(&mut life);
    }

    fn start_pumps(&self, reader: BoxedReader, writer: BoxedWriter) {
        let Some(queue) = self.queue.lock().take() else {
            return;
        };

        let weak = self.me.clone();
        let handle = self.runtime.spawn(async move {
            if let Err(e) = run_writer(queue, writer).await {
                if let Some(conn) = weak.upgrade() {
                    conn.disconnect(Some(e));
                }
            }
        });
        self.keep(Slot::Writer, handle);
        self.spawn_read(reader);
    }

    /// Track a task, or abort it if the connection already closed.
    fn keep(&self, slot: Slot, handle: JoinHandle<()>) {
        let mut tasks = self.tasks.lock();
        if self.life.lock().state.is_closed() {
            handle.abort();
            return;
        }
        let abort = Some(handle.abort_handle());
        match slot {
            Slot::Connect => tasks.connect = abort,
            Slot::Writer => tasks.writer = abort,
            Slot::Reader => tasks.reader = abort,
        }
    }

    fn pool(&self) -> &TaskPool {
        match self.direction {
            Direction::Incoming => self.core.server_pool(),
            Direction::Outgoing => self.core.client_pool(),
        }
    }

    fn spawn_read(&self, reader: BoxedReader) {
        let Some(conn) = self.me.upgrade() else {
            return;
        };
        let handle = self.pool().spawn(&self.runtime, async move { conn.read_step(reader).await });
        self.keep(Slot::Reader, handle);
    }

    async fn read_step(self: Arc<Self>, mut reader: BoxedReader) {
        let message = match self.next_frame(&mut reader).await {
            Ok(frame) => frame.to_message(),
            Err(e) => Err(e),
        };
        let message = match message {
            Ok(m) => m,
            Err(e) => {
                self.disconnect(Some(e));
                return;
            }
        };

        match message {
            Message::Quest(quest) => {
                self.spawn_read(reader);
                self.handle_quest(quest).await;
            }
            // Resolved before the next read, so a following bye cannot fail it.
            Message::Answer(answer) => {
                self.handle_answer(answer);
                self.spawn_read(reader);
            }
            Message::Bye => {
                tracing::debug!(id = self.id, peer = %self.peer_addr(), "bye received");
                self.disconnect(None);
            }
            Message::Hello => self.disconnect(Some(XicError::Protocol(
                "unexpected hello on an established connection".into(),
            ))),
        }
    }

    /// Read a frame, bounded by the message timeout while answers are due.
    async fn next_frame(&self, reader: &mut BoxedReader) -> Result<Frame> {
        let read = read_frame(reader, self.core.tunables().message_size);
        tokio::pin!(read);

        let Some(limit) = self.timeouts.message else {
            return read.await;
        };

        loop {
            if self.table.is_empty() {
                tokio::select! {
                    r = &mut read => return r,
                    _ = self.table.armed().notified() => continue,
                }
            }
            match tokio::time::timeout(limit, &mut read).await {
                Ok(r) => return r,
                Err(_) if !self.table.is_empty() => {
                    return Err(XicError::MessageTimeout(format!(
                        "peer={} timeout={}ms",
                        self.peer_addr(),
                        limit.as_millis()
                    )));
                }
                Err(_) => continue,
            }
        }
    }

    async fn handle_quest(self: &Arc<Self>, quest: Quest) {
        {
            let mut life = self.life.lock();
            if !life.state.is_live() {
                tracing::debug!(id = self.id, method = %quest.method, "quest ignored while closing");
                return;
            }
            life.processing += 1;
        }

        let info = QuestInfo::new(&quest);
        if self.core.tunables().dlog.sq {
            self.dlog(
                TAG_SQ,
                format!(
                    "{} {} Q={}::{} C{} {}",
                    self.addr_pair(),
                    quest.txid,
                    quest.service,
                    quest.method,
                    textify(&quest.context.clone().into()),
                    textify(&quest.args.clone().into())
                ),
            );
        }

        let current = Current::new(self.clone(), info.clone());
        let outcome = match self.find_servant(&quest.service) {
            Ok(servant) => servant.process(quest, current.clone()).await,
            Err(e) => Err(e),
        };

        match (current.settle(), outcome) {
            // The waiter answers, or answers on drop.
            (Some(_waiter), Ok(None)) => {}
            (Some(waiter), outcome) => {
                waiter.response(outcome.map(Option::unwrap_or_default));
            }
            (None, Ok(Some(args))) => self.answer_quest(&info, Ok(args)),
            (None, Ok(None)) if info.is_oneway() => self.answer_quest(&info, Ok(Map::new())),
            (None, Ok(None)) => self.answer_quest(
                &info,
                Err(XicError::MethodOneway(format!(
                    "peer={} method={}",
                    self.peer_addr(),
                    info.method
                ))),
            ),
            (None, Err(e)) => self.answer_quest(&info, Err(e)),
        }
    }

    fn find_servant(&self, service: &str) -> Result<Arc<dyn Servant>> {
        let adapter = self.adapter.read().clone().ok_or(XicError::AdapterAbsent)?;
        if service.is_empty() {
            return Err(XicError::ServiceEmpty);
        }
        adapter
            .find_servant(service)
            .or_else(|| adapter.default_servant())
            .ok_or_else(|| {
                XicError::ServiceNotFound(format!("peer={} service={}", self.peer_addr(), service))
            })
    }

    /// Finish an inbound quest: send its answer if twoway, log, and let a
    /// pending graceful close proceed.
    pub(crate) fn answer_quest(&self, info: &QuestInfo, result: Result<Map>) {
        let tun = self.core.tunables();
        let raiser = || format!("{}*{} @{}", info.method, info.service, self.endpoint);

        if let Err(e) = &result {
            if tun.except.server {
                self.dlog(TAG_EXCEPT, format!("{} raiser={} {}", self.addr_pair(), raiser(), e));
            }
        }

        if info.is_oneway() {
            match &result {
                Err(e) => {
                    tracing::debug!(method = %info.method, "oneway quest failed: {}", e);
                    if tun.dlog.warning {
                        self.dlog(
                            TAG_WARN,
                            format!("peer={} #=oneway quest failed: {}", self.peer_addr(), e),
                        );
                    }
                }
                Ok(args) if !args.is_empty() => {
                    tracing::debug!(method = %info.method, "answer for oneway quest discarded");
                }
                Ok(_) => {}
            }
        } else {
            let mut answer = match result {
                Ok(args) => Answer::ok(args),
                Err(e) => Answer::failure(&e, &raiser()),
            };
            answer.txid = info.txid;

            let mut message = Message::Answer(answer);
            let mut frame = Frame::from_message(&message);
            if frame.body.len() > tun.message_size {
                let err = XicError::MessageSize {
                    size: frame.body.len() as i64,
                    limit: tun.message_size,
                };
                let mut failure = Answer::failure(&err, &raiser());
                failure.txid = info.txid;
                message = Message::Answer(failure);
                frame = Frame::from_message(&message);
            }

            if let Message::Answer(a) = message {
                let failed = !a.is_ok();
                if tun.dlog.sa || (failed && tun.dlog.sae) {
                    self.dlog(
                        if failed { TAG_SAE } else { TAG_SA },
                        format!(
                            "{} {} Q={}::{} T={} A={} {}",
                            self.addr_pair(),
                            info.txid,
                            info.service,
                            info.method,
                            info.elapsed().as_millis(),
                            a.status,
                            textify(&a.args.into())
                        ),
                    );
                }
            }

            if let Err(e) = self.writer.send(OutboundFrame::from_frame(frame)) {
                tracing::debug!(id = self.id, txid = info.txid, "answer dropped: {}", e);
            }
        }

        if tun.slow.server >= 0 && info.elapsed() >= Duration::from_millis(tun.slow.server as u64) {
            self.dlog(
                TAG_SLOW,
                format!(
                    "{} S {}::{} T={}",
                    self.addr_pair(),
                    info.service,
                    info.method,
                    info.elapsed().as_millis()
                ),
            );
        }

        let mut life = self.life.lock();
        life.processing = life.processing.saturating_sub(1);
        self.try_closing(&mut life);
    }

    fn handle_answer(&self, answer: Answer) {
        let Some(result) = self.table.take(answer.txid) else {
            tracing::warn!(id = self.id, txid = answer.txid, "answer for unknown transaction discarded");
            if self.core.tunables().dlog.warning {
                self.dlog(
                    TAG_WARN,
                    format!(
                        "peer={} #=answer for unknown txid {} discarded",
                        self.peer_addr(),
                        answer.txid
                    ),
                );
            }
            return;
        };

        {
            let mut life = self.life.lock();
            self.try_closing(&mut life);
        }

        let tun = self.core.tunables();
        let failed = !answer.is_ok();
        if tun.dlog.ca || (failed && tun.dlog.cae) {
            self.dlog(
                if failed { TAG_CAE } else { TAG_CA },
                format!(
                    "{} {} Q={}::{} T={} A={} {}",
                    self.addr_pair(),
                    answer.txid,
                    result.service(),
                    result.method(),
                    result.elapsed().as_millis(),
                    answer.status,
                    textify(&answer.args.clone().into())
                ),
            );
        }
        if failed && tun.except.client {
            self.dlog(
                TAG_EXCEPT,
                format!(
                    "{} Q={}::{} A={}",
                    self.addr_pair(),
                    result.service(),
                    result.method(),
                    textify(&answer.args.clone().into())
                ),
            );
        }
        if tun.slow.client >= 0 && result.elapsed() >= Duration::from_millis(tun.slow.client as u64) {
            self.dlog(
                TAG_SLOW,
                format!(
                    "{} C {}::{} T={}",
                    self.addr_pair(),
                    result.service(),
                    result.method(),
                    result.elapsed().as_millis()
                ),
            );
        }

        result.resolve(Ok(answer));
    }

    /// Queue a quest.
    ///
    /// A quest with txid -1 is assigned an id and gets a result. Oneway
    /// quests get none. On a connection that is closing or closed a twoway
    /// quest gets an already failed result.
    pub fn send_quest(
        &self,
        mut quest: Quest,
        callback: Option<Arc<dyn Completion>>,
    ) -> Option<QuestResult> {
        let tun = self.core.tunables();
        let life = self.life.lock();
        if !life.state.is_live() {
            drop(life);
            return (!quest.is_oneway()).then(|| {
                QuestResult::failed(quest.service, quest.method, callback, XicError::ConnectionClosed)
            });
        }

        let result = if quest.txid == TXID_ASSIGN {
            let result = QuestResult::new(quest.service.clone(), quest.method.clone(), callback);
            match self.table.register(&result) {
                Ok(txid) => quest.txid = txid,
                Err(e) => {
                    drop(life);
                    result.resolve(Err(e));
                    return Some(result);
                }
            }
            Some(result)
        } else {
            None
        };

        if tun.dlog.cq {
            self.dlog(
                TAG_CQ,
                format!(
                    "{} {} Q={}::{} C{} {}",
                    self.addr_pair(),
                    quest.txid,
                    quest.service,
                    quest.method,
                    textify(&quest.context.clone().into()),
                    textify(&quest.args.clone().into())
                ),
            );
        }

        let txid = quest.txid;
        let frame = Frame::from_message(&Message::Quest(quest));
        if frame.body.len() > tun.message_size {
            let err = XicError::MessageSize {
                size: frame.body.len() as i64,
                limit: tun.message_size,
            };
            let taken = result.as_ref().and_then(|_| self.table.take(txid));
            drop(life);
            if let Some(r) = &taken {
                r.resolve(Err(err));
            }
            return taken;
        }

        let notice = result.clone().map(Notice::Sent).unwrap_or_default();
        if let Err(e) = self.writer.send(OutboundFrame::from_frame(frame).with_notice(notice)) {
            // The disconnect path resolves the registered result.
            tracing::debug!(id = self.id, txid, "quest not queued: {}", e);
        }
        result
    }

    /// Close the connection.
    ///
    /// Forced: disconnect now. Graceful: stop accepting new work, send bye
    /// once local quests are answered and pending results have resolved.
    pub fn close(&self, force: bool) {
        if force {
            self.disconnect(None);
            return;
        }

        let mut life = self.life.lock();
        if !life.state.is_live() {
            return;
        }
        if life.state.is_waiting() && life.processing == 0 && self.table.is_empty() {
            drop(life);
            self.disconnect(None);
            return;
        }
        life.state = ConnectionState::Close;
        self.try_closing(&mut life);
    }

    /// Send bye if a graceful close has nothing left to wait for.
    fn try_closing(&self, life: &mut Lifecycle) {
        if life.state != ConnectionState::Close || life.processing > 0 || !self.table.is_empty() {
            return;
        }
        life.state = ConnectionState::Closing;
        let _ = self.writer.send(OutboundFrame::bye());
        tracing::debug!(id = self.id, peer = %self.peer_addr(), "bye queued");

        let weak = self.me.clone();
        let limit = self.timeouts.close;
        let mut closed = self.closed.subscribe();
        self.runtime.spawn(async move {
            tokio::select! {
                _ = closed.wait_for(|c| *c) => {}
                _ = tokio::time::sleep(limit) => {
                    if let Some(conn) = weak.upgrade() {
                        conn.disconnect(Some(XicError::CloseTimeout(format!(
                            "timeout={}ms",
                            limit.as_millis()
                        ))));
                    }
                }
            }
        });
    }

    /// Tear the connection down and fail every pending result.
    ///
    /// Idempotent. The first failure seen while live is kept as the cause.
    pub(crate) fn disconnect(&self, cause: Option<XicError>) {
        let (failure, state) = {
            let mut life = self.life.lock();
            if life.state.is_closed() {
                return;
            }
            let was_live = life.state.is_live();
            if was_live && life.cause.is_none() {
                life.cause = cause.clone();
            }
            life.state = if was_live && cause.is_some() {
                ConnectionState::Error
            } else {
                ConnectionState::Closed
            };
            let failure = life.cause.clone().unwrap_or(XicError::ConnectionClosed);
            (failure, life.state)
        };

        match (&cause, state) {
            (Some(e), ConnectionState::Error) => {
                tracing::info!(id = self.id, endpoint = %self.endpoint, peer = %self.peer_addr(), "connection failed: {}", e)
            }
            _ => tracing::debug!(id = self.id, peer = %self.peer_addr(), "connection closed"),
        }

        std::mem::take(&mut *self.tasks.lock()).abort_all();
        self.queue.lock().take();

        for result in self.table.drain(failure.clone()) {
            result.resolve(Err(failure.clone()));
        }
        self.closed.send_replace(true);
        self.core.forget_connection(self);
    }

    fn set_addrs(&self, local: Option<SocketAddr>, peer: Option<SocketAddr>) {
        let fmt = |a: SocketAddr| format!("{}+{}", a.ip(), a.port());
        let mut addrs = self.addrs.write();
        if let Some(a) = local {
            addrs.local = fmt(a);
        }
        if let Some(a) = peer {
            addrs.peer = fmt(a);
        }
    }

    fn addr_pair(&self) -> String {
        let addrs = self.addrs.read();
        format!("{}/{}", addrs.local, addrs.peer)
    }

    fn dlog(&self, tag: &str, fields: String) {
        self.core.dlog(tag, module_path!(), &fields);
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Remote endpoint for outgoing connections, the listening endpoint
    /// for incoming ones.
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn timeouts(&self) -> &ConnectionTimeouts {
        &self.timeouts
    }

    pub fn state(&self) -> ConnectionState {
        self.life.lock().state
    }

    pub fn is_live(&self) -> bool {
        self.state().is_live()
    }

    pub fn is_active(&self) -> bool {
        self.state().is_active()
    }

    /// The failure that closed the connection, if any.
    pub fn cause(&self) -> Option<XicError> {
        self.life.lock().cause.clone()
    }

    /// Outstanding twoway quests sent on this connection.
    pub fn pending_count(&self) -> usize {
        self.table.len()
    }

    /// Inbound quests being processed.
    pub fn processing_count(&self) -> usize {
        self.life.lock().processing
    }

    /// Local address as `host+port`, `-` if unknown.
    pub fn local_addr(&self) -> String {
        self.addrs.read().local.clone()
    }

    /// Peer address as `host+port`, `-` if unknown.
    pub fn peer_addr(&self) -> String {
        self.addrs.read().peer.clone()
    }

    pub fn adapter(&self) -> Option<Arc<Adapter>> {
        self.adapter.read().clone()
    }

    /// Serve quests arriving on this connection with `adapter`.
    pub fn set_adapter(&self, adapter: Option<Arc<Adapter>>) {
        *self.adapter.write() = adapter;
    }

    /// Proxy that always uses this connection.
    pub fn create_proxy(&self, service: &str) -> Result<Proxy> {
        let conn = self.me.upgrade().ok_or(XicError::ConnectionClosed)?;
        Proxy::fixed(self.core.clone(), service, conn)
    }

    /// Resolve once the connection is closed.
    pub async fn wait_closed(&self) {
        let mut rx = self.closed.subscribe();
        let _ = rx.wait_for(|closed| *closed).await;
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("direction", &self.direction)
            .field("endpoint", &self.endpoint.to_string())
            .field("state", &self.state())
            .finish()
    }
}

/// Read one frame: the header, then exactly the declared body.
pub(crate) async fn read_frame<R>(reader: &mut R, max_size: usize) -> Result<Frame>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut head = [0u8; HEADER_SIZE];
    read_full(reader, &mut head).await?;
    let header = Header::decode(&head)?;
    header.validate(max_size)?;

    let mut body = vec![0u8; header.body_len()];
    read_full(reader, &mut body).await?;
    Ok(Frame::new(header, Bytes::from(body)))
}

async fn read_full<R>(reader: &mut R, buf: &mut [u8]) -> Result<()>
where
    R: AsyncRead + Unpin + ?Sized,
{
    if buf.is_empty() {
        return Ok(());
    }
    match reader.read_exact(buf).await {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            Err(XicError::ConnectionLost("peer closed the connection".into()))
        }
        Err(e) => Err(e.into()),
    }
}
