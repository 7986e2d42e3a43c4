//! Owns the stream, the worker loop, the pending table, and the subscriber
//! set; exposes Start/Publish/Stop (spec.md §4.6).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use tokio::io::{self, AsyncRead, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{oneshot, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tracing::{debug, instrument, trace, warn};

use crate::error::AmiError;
use crate::frame::FrameAssembler;
use crate::message::Message;
use crate::pending::{PendingOutcome, PendingTable};
use crate::subscriber::{Subscriber, SubscriberSet, SubscriptionId};

type DataHook = Arc<dyn Fn(&[u8]) + Send + Sync>;
type StoppedHook = Arc<dyn Fn(Option<&AmiError>) + Send + Sync>;

/// Callback-slot multicast for the client's three byte/lifecycle hooks
/// (spec.md §6, §9). Each slot holds any number of listeners, invoked
/// synchronously from the triggering operation, in registration order.
#[derive(Default)]
struct Hooks {
    data_sent: StdMutex<Vec<DataHook>>,
    data_received: StdMutex<Vec<DataHook>>,
    stopped: StdMutex<Vec<StoppedHook>>,
}

impl Hooks {
    fn fire_data_sent(&self, bytes: &[u8]) {
        for hook in self.data_sent.lock().unwrap().iter() {
            hook(bytes);
        }
    }

    /// Fires once per assembled frame, with that frame's raw bytes as read
    /// off the wire (not a re-serialization of the parsed fields).
    /// (spec.md §6 permits either per-read or per-message granularity; this
    /// crate documents and implements the per-message choice.)
    fn fire_data_received(&self, bytes: &[u8]) {
        for hook in self.data_received.lock().unwrap().iter() {
            hook(bytes);
        }
    }

    fn fire_stopped(&self, cause: Option<&AmiError>) {
        for hook in self.stopped.lock().unwrap().iter() {
            hook(cause);
        }
    }
}

/// The client's lifecycle state (spec.md §3).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    Unstarted,
    Running,
    Stopped,
}

struct Inner<S> {
    state: StdMutex<State>,
    write_half: AsyncMutex<Option<WriteHalf<S>>>,
    pending: PendingTable,
    subscribers: SubscriberSet,
    worker: StdMutex<Option<JoinHandle<()>>>,
    hooks: Hooks,
    stop_once: AtomicBool,
}

/// An Asterisk Manager Interface client driving a single duplex stream `S`.
///
/// `Client` does not own `S`'s lifetime: the caller supplies it to
/// [`Client::start`] and is responsible for closing it after
/// [`Client::stop`] (or the worker's own termination) completes.
pub struct Client<S> {
    inner: Arc<Inner<S>>,
}

impl<S> Clone for Client<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S> Client<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: StdMutex::new(State::Unstarted),
                write_half: AsyncMutex::new(None),
                pending: PendingTable::new(),
                subscribers: SubscriberSet::new(),
                worker: StdMutex::new(None),
                hooks: Hooks::default(),
                stop_once: AtomicBool::new(false),
            }),
        }
    }

    /// Registers a listener for bytes written by [`Client::publish`],
    /// invoked synchronously immediately after the write lock is released.
    pub fn on_data_sent(&self, f: impl Fn(&[u8]) + Send + Sync + 'static) {
        self.inner.hooks.data_sent.lock().unwrap().push(Arc::new(f));
    }

    /// Registers a listener for bytes read off the stream, fired once per
    /// assembled frame.
    pub fn on_data_received(&self, f: impl Fn(&[u8]) + Send + Sync + 'static) {
        self.inner.hooks.data_received.lock().unwrap().push(Arc::new(f));
    }

    /// Registers a listener for the client's one-shot `Stopped` lifecycle
    /// event. `cause` is `None` for a voluntary stop.
    pub fn on_stopped(&self, f: impl Fn(Option<&AmiError>) + Send + Sync + 'static) {
        self.inner.hooks.stopped.lock().unwrap().push(Arc::new(f));
    }

    fn state(&self) -> State {
        *self.inner.state.lock().unwrap()
    }

    /// Validates the banner and, on success, starts the worker loop reading
    /// subsequent frames. Requires `Unstarted`. On handshake failure the
    /// client transitions to `Stopped` through the same one-shot drain as
    /// any other fault, so a listener registered with `on_stopped` before
    /// `start` still observes the transition, and the stream is dropped.
    #[instrument(skip_all)]
    pub async fn start(&self, stream: S) -> Result<(), AmiError> {
        {
            let mut state = self.inner.state.lock().unwrap();
            match *state {
                State::Unstarted => *state = State::Running,
                State::Running => return Err(AmiError::AlreadyStarted),
                State::Stopped => return Err(AmiError::AlreadyStarted),
            }
        }

        let (read_half, write_half): (ReadHalf<S>, WriteHalf<S>) = io::split(stream);
        let mut assembler = FrameAssembler::new(read_half);

        match assembler.read_banner().await {
            Ok(banner) => debug!(%banner, "handshake complete"),
            Err(e) => {
                self.finish(Some(e.clone()), false).await;
                return Err(e);
            },
        }

        *self.inner.write_half.lock().await = Some(write_half);

        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move {
            run_worker(inner, assembler).await;
        });
        *self.inner.worker.lock().unwrap() = Some(handle);

        Ok(())
    }

    /// Registers a pending slot, writes `message` to the stream under the
    /// write lock, and awaits the matching response. The pending slot is
    /// registered before the write completes, so a fast response can never
    /// race ahead of it (spec.md §5, ordering guarantee ii).
    #[instrument(skip_all, fields(action_id = message.action_id()))]
    pub async fn publish(&self, message: Message) -> Result<Message, AmiError> {
        if self.state() != State::Running {
            return Err(AmiError::NotStarted);
        }

        let action_id = message
            .action_id()
            .ok_or_else(|| AmiError::Argument("message has no ActionID".to_string()))?
            .to_string();

        let (tx, rx) = oneshot::channel();
        if !self.inner.pending.try_insert(&action_id, tx) {
            return Err(AmiError::DuplicateActionId(action_id));
        }

        let bytes = message.to_bytes();
        let write_result = {
            let mut guard = self.inner.write_half.lock().await;
            match guard.as_mut() {
                Some(w) => w.write_all(&bytes).await,
                None => Err(io::Error::new(io::ErrorKind::NotConnected, "client not started")),
            }
        };

        if let Err(e) = write_result {
            self.inner.pending.try_take(&action_id);
            let err = AmiError::io(e);
            warn!(error = %err, "publish write failed, stopping client");
            self.finish(Some(err.clone()), true).await;
            return Err(err);
        }

        self.inner.hooks.fire_data_sent(&bytes);
        trace!(action_id, "published action");

        match rx.await {
            Ok(PendingOutcome::Response(msg)) => Ok(msg),
            Ok(PendingOutcome::Cancelled) => Err(AmiError::Cancelled),
            Ok(PendingOutcome::Failed(e)) => Err(e),
            Err(_) => Err(AmiError::Cancelled),
        }
    }

    /// Subscribes `subscriber` to unsolicited events and the terminal
    /// lifecycle signal. Adding the same subscriber twice is idempotent.
    pub fn subscribe(&self, subscriber: Arc<dyn Subscriber>) -> Result<SubscriptionId, AmiError> {
        if self.state() == State::Unstarted {
            return Err(AmiError::NotStarted);
        }
        Ok(self.inner.subscribers.add(subscriber))
    }

    /// Removes a previously registered subscriber.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.inner.subscribers.remove(id);
    }

    /// Idempotently stops the client: only the first call drains state.
    /// Pending callers resolve with `Cancelled`, subscribers receive
    /// `on_completed`, and `Stopped(None)` fires exactly once.
    pub async fn stop(&self) {
        self.finish(None, true).await;
    }

    /// Drains state exactly once, as `finish` above. `abort_worker` must be
    /// `false` when called from the worker's own task: aborting your own
    /// `JoinHandle` mid-execution would cancel the rest of this very drain.
    async fn finish(&self, cause: Option<AmiError>, abort_worker: bool) {
        if self.inner.stop_once.swap(true, Ordering::SeqCst) {
            return;
        }

        *self.inner.state.lock().unwrap() = State::Stopped;

        if let Some(handle) = self.inner.worker.lock().unwrap().take() {
            if abort_worker {
                handle.abort();
            }
        }

        match &cause {
            Some(e) => self.inner.pending.drain_with(|| PendingOutcome::Failed(e.clone())),
            None => self.inner.pending.drain_with(|| PendingOutcome::Cancelled),
        }

        self.inner.subscribers.dispatch_terminal(cause.as_ref()).await;
        self.inner.hooks.fire_stopped(cause.as_ref());

        *self.inner.write_half.lock().await = None;
    }
}

impl<S> Default for Client<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

async fn run_worker<S>(inner: Arc<Inner<S>>, mut assembler: FrameAssembler<ReadHalf<S>>)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let client = Client { inner: Arc::clone(&inner) };

    loop {
        match assembler.next_message().await {
            Ok(Some((msg, raw))) => {
                inner.hooks.fire_data_received(&raw);

                let is_response = msg
                    .first_key()
                    .map(|k| k.eq_ignore_ascii_case("response"))
                    .unwrap_or(false);

                let routed_to_caller = is_response
                    && msg.action_id().is_some_and(|id| {
                        if let Some(slot) = inner.pending.try_take(id) {
                            let _ = slot.send(PendingOutcome::Response(msg.clone()));
                            true
                        } else {
                            false
                        }
                    });

                if !routed_to_caller {
                    trace!(action_id = msg.action_id(), "dispatching event to subscribers");
                    inner.subscribers.dispatch_next(&msg).await;
                }
            },
            Ok(None) => {
                debug!("worker observed clean EOF, stopping voluntarily");
                client.finish(None, false).await;
                return;
            },
            Err(e) => {
                warn!(error = %e, "worker faulted, stopping client");
                client.finish(Some(e), false).await;
                return;
            },
        }
    }
}
