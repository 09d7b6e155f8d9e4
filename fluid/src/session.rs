//! Session: the connection to one compute service.
//!
//! A session owns:
//! - the resolved binding (released exactly once, on shutdown or drop)
//! - the connection state (one endpoint at a time)
//! - the task tracker shared with result delivery
//!
//! Entry points are called synchronously on the caller's thread. Execution in
//! the service is asynchronous; results come back through [`Session::deliver`]
//! or a result feed.

use std::ffi::CString;
use std::fmt;
use std::future::Future;
use std::io;
use std::sync::Arc;

use tokio::io::AsyncRead;
use tokio_util::bytes::Bytes;
use tracing::Dispatch;
use tracing::instrument::WithSubscriber;
use uuid::Uuid;

use crate::binding::{NativeBinding, ServiceApi};
use crate::config::SessionConfig;
use crate::envelope::{TaskKind, TaskRequest, TaskResult, TaskSpec};
use crate::error::{FluidError, Result};
use crate::feed::{FeedStats, run_result_feed};
use crate::log_sink::{scoped, sink_dispatch};
use crate::tracker::{Applied, TaskEvent, TaskHandle, TaskState, TaskTracker};

/// Address and port of the connected service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub address: String,
    pub port: u16,
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.address, self.port)
    }
}

pub struct Session {
    /// `None` once shut down.
    binding: Option<Box<dyn ServiceApi>>,
    connection: Option<Endpoint>,
    tracker: Arc<TaskTracker>,
    id_capacity: usize,
    dispatch: Option<Dispatch>,
}

impl Session {
    /// Load the configured artifact and bind to it.
    pub fn initialize(config: SessionConfig) -> Result<Self> {
        config.validate()?;
        let dispatch = config
            .log_sink
            .clone()
            .map(|sink| sink_dispatch(sink, config.log_level));

        let binding = scoped(dispatch.as_ref(), || {
            NativeBinding::load(&config.directory, &config.artifact)
        })?;
        Ok(Self::assemble(Box::new(binding), &config, dispatch))
    }

    /// Build a session over an already-resolved service.
    pub fn with_binding<B>(binding: B, config: &SessionConfig) -> Result<Self>
    where
        B: ServiceApi + 'static,
    {
        config.validate()?;
        let dispatch = config
            .log_sink
            .clone()
            .map(|sink| sink_dispatch(sink, config.log_level));
        Ok(Self::assemble(Box::new(binding), config, dispatch))
    }

    fn assemble(
        binding: Box<dyn ServiceApi>,
        config: &SessionConfig,
        dispatch: Option<Dispatch>,
    ) -> Self {
        Self {
            binding: Some(binding),
            connection: None,
            tracker: TaskTracker::new(),
            id_capacity: config.id_capacity,
            dispatch,
        }
    }

    pub fn connect(&mut self, address: &str, port: u16) -> Result<()> {
        let dispatch = self.dispatch.clone();
        scoped(dispatch.as_ref(), || self.connect_inner(address, port))
    }

    fn connect_inner(&mut self, address: &str, port: u16) -> Result<()> {
        let binding = self.binding.as_deref().ok_or(FluidError::Unbound)?;
        let c_address = CString::new(address).map_err(|_| {
            FluidError::InvalidArgument("address contains an interior NUL byte".to_string())
        })?;
        let endpoint = Endpoint {
            address: address.to_string(),
            port,
        };

        if let Some(previous) = self.connection.take() {
            tracing::info!(%previous, %endpoint, "Disconnecting before reconnect");
            binding.disconnect();
        }

        match binding.connect(&c_address, i32::from(port)) {
            Ok(()) => {
                tracing::info!(%endpoint, "Connected to compute service");
                self.connection = Some(endpoint);
                Ok(())
            }
            Err(code) => {
                tracing::warn!(%endpoint, code, "Connect failed");
                Err(FluidError::ConnectionError {
                    endpoint: endpoint.to_string(),
                    code,
                    detail: "Connect returned a non-zero status".to_string(),
                })
            }
        }
    }

    /// No-op when not connected.
    pub fn disconnect(&mut self) {
        let dispatch = self.dispatch.clone();
        scoped(dispatch.as_ref(), || {
            if let Some(endpoint) = self.connection.take()
                && let Some(binding) = self.binding.as_deref()
            {
                binding.disconnect();
                tracing::info!(%endpoint, "Disconnected from compute service");
            }
        })
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    pub fn endpoint(&self) -> Option<&Endpoint> {
        self.connection.as_ref()
    }

    pub fn id_capacity(&self) -> usize {
        self.id_capacity
    }

    /// Submit one task. Returns as soon as the service acknowledges it; the
    /// record starts `Queued`.
    pub fn submit(
        &self,
        kind: TaskKind,
        function: &str,
        data: impl Into<Bytes>,
    ) -> Result<TaskHandle> {
        scoped(self.dispatch.as_ref(), || self.submit_inner(kind, function, data.into()))
    }

    fn submit_inner(&self, kind: TaskKind, function: &str, data: Bytes) -> Result<TaskHandle> {
        let binding = match (&self.binding, &self.connection) {
            (Some(binding), Some(_)) => binding.as_ref(),
            _ => return Err(FluidError::NotConnected),
        };

        let proposed = Uuid::new_v4().to_string();
        let request = TaskRequest::new(kind, TaskSpec::new(proposed.as_str(), function, data));
        let envelope = request.encode();
        if i32::try_from(envelope.len()).is_err() {
            return Err(FluidError::InvalidArgument(format!(
                "encoded task is {} bytes, larger than the service accepts",
                envelope.len()
            )));
        }

        let mut id_buf = vec![0u8; self.id_capacity];
        if let Err(code) = binding.submit(kind, &envelope, &mut id_buf) {
            tracing::warn!(%kind, code, "Service rejected task");
            return Err(FluidError::SubmitRejected { kind, code });
        }

        let id = correlation_id(&id_buf, &proposed).inspect_err(|e| {
            tracing::error!(error = %e, %kind, "Task accepted but its correlation id is unusable; it will not be tracked");
        })?;
        let handle = self.tracker.register(id, kind)?;
        tracing::debug!(
            id = %handle.id(),
            %kind,
            envelope_len = envelope.len(),
            "Task submitted"
        );
        Ok(handle)
    }

    /// Apply one result envelope. A malformed envelope fails only this call.
    pub fn deliver(&self, envelope: &[u8]) -> Result<Applied> {
        scoped(self.dispatch.as_ref(), || {
            let result = TaskResult::decode(envelope).inspect_err(|e| {
                tracing::warn!(error = %e, len = envelope.len(), "Dropping malformed result envelope");
            })?;
            Ok(self.tracker.apply(TaskEvent::Completed(result)))
        })
    }

    /// Host-side notification that the service started a task.
    pub fn mark_running(&self, id: &str) -> Applied {
        scoped(self.dispatch.as_ref(), || {
            self.tracker.apply(TaskEvent::Started { id: id.to_string() })
        })
    }

    /// Host-side notification that a task failed in the service.
    pub fn fail_task(&self, id: &str, diagnostic: &str) -> Applied {
        scoped(self.dispatch.as_ref(), || {
            self.tracker.apply(TaskEvent::Failed {
                id: id.to_string(),
                diagnostic: diagnostic.to_string(),
            })
        })
    }

    pub fn state(&self, id: &str) -> Option<TaskState> {
        self.tracker.state(id)
    }

    /// Consume a terminal record. See [`TaskTracker::take`].
    pub fn take(&self, id: &str) -> Option<TaskState> {
        self.tracker.take(id)
    }

    pub fn tracker(&self) -> &Arc<TaskTracker> {
        &self.tracker
    }

    /// Feed framed result envelopes from `reader` into this session's tracker.
    /// The returned future owns everything it needs and can be spawned.
    pub fn result_feed<R>(&self, reader: R) -> impl Future<Output = io::Result<FeedStats>> + Send + 'static
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let tracker = Arc::clone(&self.tracker);
        let dispatch = self
            .dispatch
            .clone()
            .unwrap_or_else(|| tracing::dispatcher::get_default(Dispatch::clone));
        async move { run_result_feed(reader, &tracker).await }.with_subscriber(dispatch)
    }

    /// Disconnect, abandon unfinished tasks and release the binding.
    /// Idempotent; later `submit` fails `NotConnected`, `connect` fails `Unbound`.
    pub fn shutdown(&mut self) {
        let dispatch = self.dispatch.clone();
        scoped(dispatch.as_ref(), || {
            let Some(binding) = self.binding.take() else {
                return;
            };
            if let Some(endpoint) = self.connection.take() {
                binding.disconnect();
                tracing::info!(%endpoint, "Disconnected from compute service");
            }
            let abandoned = self.tracker.abandon_outstanding();
            binding.release();
            tracing::info!(abandoned, "Session shut down");
        })
    }

    pub fn is_shut_down(&self) -> bool {
        self.binding.is_none()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("bound", &self.binding.is_some())
            .field("connection", &self.connection)
            .field("outstanding", &self.tracker.outstanding())
            .field("id_capacity", &self.id_capacity)
            .finish_non_exhaustive()
    }
}

/// The id the service wrote, or the proposed one if it wrote nothing.
///
/// The id is never longer than `id_buf`; bytes that are not UTF-8 are
/// rejected rather than replaced.
fn correlation_id(id_buf: &[u8], proposed: &str) -> Result<String> {
    let (written, truncated) = match id_buf.iter().position(|&b| b == 0) {
        Some(end) => (&id_buf[..end], false),
        None => (id_buf, true),
    };
    if written.is_empty() {
        return Ok(proposed.to_string());
    }
    let id = std::str::from_utf8(written)
        .map_err(|_| FluidError::InvalidCorrelationId { len: written.len() })?
        .to_string();
    if truncated {
        tracing::warn!(%id, capacity = id_buf.len(), "Correlation id filled the buffer without a terminator; keeping it as truncated");
    }
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CStr;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Call {
        Connect(String, i32),
        Disconnect,
        Submit(TaskKind, TaskRequest),
    }

    /// How the fake service fills the id buffer.
    #[derive(Clone)]
    enum IdReply {
        /// Echo the envelope's uuid.
        Echo,
        Fixed(Vec<u8>),
        Nothing,
    }

    #[derive(Clone)]
    struct FakeService {
        calls: Arc<Mutex<Vec<Call>>>,
        connect_status: i32,
        submit_status: i32,
        id_reply: IdReply,
        releases: Arc<AtomicUsize>,
        /// Result applied to this tracker from inside `submit`, before the
        /// id is handed back.
        result_before_ack: Arc<Mutex<Option<(Arc<TaskTracker>, Bytes)>>>,
    }

    impl FakeService {
        fn new() -> Self {
            Self {
                calls: Arc::default(),
                connect_status: 0,
                submit_status: 0,
                id_reply: IdReply::Echo,
                releases: Arc::default(),
                result_before_ack: Arc::default(),
            }
        }

        fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl ServiceApi for FakeService {
        fn connect(&self, address: &CStr, port: i32) -> std::result::Result<(), i32> {
            self.calls
                .lock()
                .unwrap()
                .push(Call::Connect(address.to_str().unwrap().to_string(), port));
            match self.connect_status {
                0 => Ok(()),
                code => Err(code),
            }
        }

        fn disconnect(&self) {
            self.calls.lock().unwrap().push(Call::Disconnect);
        }

        fn submit(
            &self,
            kind: TaskKind,
            envelope: &[u8],
            id_buf: &mut [u8],
        ) -> std::result::Result<(), i32> {
            let request = TaskRequest::decode(kind, envelope).unwrap();
            let reply = match &self.id_reply {
                IdReply::Echo => request.correlation_id().as_bytes().to_vec(),
                IdReply::Fixed(bytes) => bytes.clone(),
                IdReply::Nothing => Vec::new(),
            };
            let n = reply.len().min(id_buf.len());
            id_buf[..n].copy_from_slice(&reply[..n]);
            if let Some((tracker, value)) = self.result_before_ack.lock().unwrap().as_ref() {
                let id = String::from_utf8(reply[..n].to_vec()).unwrap();
                tracker.apply(TaskEvent::Completed(TaskResult::new(id, value.clone())));
            }
            self.calls.lock().unwrap().push(Call::Submit(kind, request));
            match self.submit_status {
                0 => Ok(()),
                code => Err(code),
            }
        }

        fn release(self: Box<Self>) {
            self.releases.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn session(service: &FakeService) -> Session {
        Session::with_binding(service.clone(), &SessionConfig::new("/unused")).unwrap()
    }

    fn connected(service: &FakeService) -> Session {
        let mut session = session(service);
        session.connect("1.2.3.4", 20).unwrap();
        session
    }

    #[test]
    fn connect_then_submit_r_task() {
        let service = FakeService::new();
        let session = connected(&service);

        let handle = session
            .submit(TaskKind::R, "summary(x)", &b"\x01\x02"[..])
            .unwrap();

        assert!(!handle.id().is_empty());
        assert!(handle.id().len() <= 128);
        assert_eq!(handle.state(), Some(TaskState::Queued));

        let calls = service.calls();
        assert_eq!(calls[0], Call::Connect("1.2.3.4".to_string(), 20));
        match &calls[1] {
            Call::Submit(TaskKind::R, TaskRequest::R(spec)) => {
                assert_eq!(spec.uuid, handle.id());
                assert_eq!(spec.function, "summary(x)");
                assert_eq!(&spec.data[..], b"\x01\x02");
            }
            other => panic!("unexpected call {other:?}"),
        }
    }

    #[test]
    fn julia_submit_uses_julia_entry_point() {
        let service = FakeService::new();
        let session = connected(&service);
        session.submit(TaskKind::Julia, "sum(1:10)", Bytes::new()).unwrap();
        assert!(matches!(
            service.calls().last(),
            Some(Call::Submit(TaskKind::Julia, TaskRequest::Julia(_)))
        ));
    }

    #[test]
    fn result_completes_task() {
        let service = FakeService::new();
        let session = connected(&service);
        let handle = session.submit(TaskKind::R, "6 * 7", Bytes::new()).unwrap();

        let envelope = TaskResult::new(handle.id(), &b"42"[..]).encode();
        assert!(matches!(
            session.deliver(&envelope).unwrap(),
            Applied::Transitioned { .. }
        ));
        assert_eq!(
            session.state(handle.id()),
            Some(TaskState::Complete(Bytes::from_static(b"42")))
        );
    }

    #[test]
    fn submit_while_disconnected_never_calls_binding() {
        let service = FakeService::new();
        let session = session(&service);

        assert!(matches!(
            session.submit(TaskKind::R, "1", Bytes::new()),
            Err(FluidError::NotConnected)
        ));
        assert!(service.calls().is_empty());
    }

    #[test]
    fn failed_connect_leaves_session_disconnected() {
        let mut service = FakeService::new();
        service.connect_status = -2;
        let mut session = session(&service);

        let err = session.connect("10.0.0.1", 7000).unwrap_err();
        match err {
            FluidError::ConnectionError { endpoint, code, .. } => {
                assert_eq!(endpoint, "10.0.0.1:7000");
                assert_eq!(code, -2);
            }
            other => panic!("expected ConnectionError, got {other:?}"),
        }
        assert!(!session.is_connected());
    }

    #[test]
    fn address_with_nul_is_invalid() {
        let service = FakeService::new();
        let mut session = session(&service);
        assert!(matches!(
            session.connect("1.2.3.4\0evil", 20),
            Err(FluidError::InvalidArgument(_))
        ));
        assert!(service.calls().is_empty());
    }

    #[test]
    fn reconnect_disconnects_previous_endpoint() {
        let service = FakeService::new();
        let mut session = connected(&service);
        session.connect("5.6.7.8", 21).unwrap();

        assert_eq!(
            service.calls(),
            vec![
                Call::Connect("1.2.3.4".to_string(), 20),
                Call::Disconnect,
                Call::Connect("5.6.7.8".to_string(), 21),
            ]
        );
        assert_eq!(
            session.endpoint(),
            Some(&Endpoint {
                address: "5.6.7.8".to_string(),
                port: 21
            })
        );
    }

    #[test]
    fn disconnect_is_idempotent() {
        let service = FakeService::new();
        let mut session = connected(&service);
        session.disconnect();
        session.disconnect();
        assert_eq!(
            service.calls(),
            vec![Call::Connect("1.2.3.4".to_string(), 20), Call::Disconnect]
        );
    }

    #[test]
    fn rejected_submit_creates_no_record() {
        let mut service = FakeService::new();
        service.submit_status = 5;
        let session = connected(&service);

        assert!(matches!(
            session.submit(TaskKind::Julia, "error()", Bytes::new()),
            Err(FluidError::SubmitRejected {
                kind: TaskKind::Julia,
                code: 5
            })
        ));
        assert!(session.tracker().is_empty());
    }

    #[test]
    fn service_assigned_id_is_authoritative() {
        let mut service = FakeService::new();
        service.id_reply = IdReply::Fixed(b"svc-0001".to_vec());
        let session = connected(&service);

        let handle = session.submit(TaskKind::R, "1", Bytes::new()).unwrap();
        assert_eq!(handle.id(), "svc-0001");
    }

    #[test]
    fn empty_service_id_falls_back_to_proposed() {
        let mut service = FakeService::new();
        service.id_reply = IdReply::Nothing;
        let session = connected(&service);

        let handle = session.submit(TaskKind::R, "1", Bytes::new()).unwrap();
        let Some(Call::Submit(_, request)) = service.calls().pop() else {
            panic!("no submit recorded");
        };
        assert_eq!(handle.id(), request.correlation_id());
        assert!(Uuid::parse_str(handle.id()).is_ok());
    }

    #[test]
    fn unterminated_id_is_kept_truncated() {
        let mut service = FakeService::new();
        service.id_reply = IdReply::Fixed(vec![b'x'; 40]);
        let config = SessionConfig::new("/unused").with_id_capacity(16);
        let mut session = Session::with_binding(service.clone(), &config).unwrap();
        session.connect("1.2.3.4", 20).unwrap();

        let handle = session.submit(TaskKind::R, "1", Bytes::new()).unwrap();
        assert_eq!(handle.id(), "x".repeat(16));
    }

    #[test]
    fn non_utf8_service_id_is_rejected() {
        let mut service = FakeService::new();
        service.id_reply = IdReply::Fixed(vec![0xff; 128]);
        let session = connected(&service);

        let err = session.submit(TaskKind::R, "1", Bytes::new()).unwrap_err();

        assert!(matches!(err, FluidError::InvalidCorrelationId { len: 128 }));
        assert!(session.tracker().is_empty());
    }

    #[test]
    fn service_id_never_exceeds_capacity() {
        let mut service = FakeService::new();
        service.id_reply = IdReply::Fixed("é".repeat(100).into_bytes());
        let session = connected(&service);

        let handle = session.submit(TaskKind::R, "1", Bytes::new()).unwrap();

        assert_eq!(handle.id().len(), session.id_capacity());
    }

    #[test]
    fn result_arriving_before_submit_returns_is_kept() {
        let mut service = FakeService::new();
        service.id_reply = IdReply::Fixed(b"svc".to_vec());
        let session = connected(&service);
        *service.result_before_ack.lock().unwrap() =
            Some((Arc::clone(session.tracker()), Bytes::from_static(b"42")));

        let handle = session.submit(TaskKind::R, "6 * 7", Bytes::new()).unwrap();

        assert_eq!(handle.id(), "svc");
        assert_eq!(
            handle.state(),
            Some(TaskState::Complete(Bytes::from_static(b"42")))
        );
    }

    #[test]
    fn duplicate_service_id_is_rejected() {
        let mut service = FakeService::new();
        service.id_reply = IdReply::Fixed(b"same".to_vec());
        let session = connected(&service);

        session.submit(TaskKind::R, "1", Bytes::new()).unwrap();
        assert!(matches!(
            session.submit(TaskKind::R, "2", Bytes::new()),
            Err(FluidError::DuplicateCorrelationId(id)) if id == "same"
        ));
    }

    #[test]
    fn malformed_delivery_fails_only_that_message() {
        let service = FakeService::new();
        let session = connected(&service);
        let handle = session.submit(TaskKind::R, "1", Bytes::new()).unwrap();

        assert!(matches!(
            session.deliver(&[0x02, 0x00]),
            Err(FluidError::Decode(_))
        ));
        assert_eq!(handle.state(), Some(TaskState::Queued));

        session
            .deliver(&TaskResult::new(handle.id(), &b"ok"[..]).encode())
            .unwrap();
        assert!(handle.is_terminal());
    }

    #[test]
    fn unknown_result_is_dropped() {
        let service = FakeService::new();
        let session = connected(&service);
        let handle = session.submit(TaskKind::R, "1", Bytes::new()).unwrap();

        let applied = session
            .deliver(&TaskResult::new("never-issued", &b"x"[..]).encode())
            .unwrap();
        assert_eq!(applied, Applied::UnknownId);
        assert_eq!(handle.state(), Some(TaskState::Queued));
    }

    #[test]
    fn host_callbacks_drive_running_and_failed() {
        let service = FakeService::new();
        let session = connected(&service);
        let handle = session.submit(TaskKind::Julia, "1", Bytes::new()).unwrap();

        session.mark_running(handle.id());
        assert_eq!(handle.state(), Some(TaskState::Running));
        session.fail_task(handle.id(), "UndefVarError: x not defined");
        assert_eq!(
            session.take(handle.id()),
            Some(TaskState::Failed("UndefVarError: x not defined".to_string()))
        );
        assert_eq!(session.state(handle.id()), None);
    }

    #[test]
    fn shutdown_then_submit_is_not_connected() {
        let service = FakeService::new();
        let mut session = connected(&service);
        let done = session.submit(TaskKind::R, "1", Bytes::new()).unwrap();
        let pending = session.submit(TaskKind::R, "2", Bytes::new()).unwrap();
        session
            .deliver(&TaskResult::new(done.id(), &b"1"[..]).encode())
            .unwrap();

        session.shutdown();

        assert!(matches!(
            session.submit(TaskKind::R, "3", Bytes::new()),
            Err(FluidError::NotConnected)
        ));
        assert!(matches!(
            session.connect("1.2.3.4", 20),
            Err(FluidError::Unbound)
        ));
        assert!(session.state(done.id()).is_some());
        assert!(session.state(pending.id()).is_none());
        assert_eq!(service.calls().last(), Some(&Call::Disconnect));
    }

    #[test]
    fn binding_released_exactly_once() {
        let service = FakeService::new();
        {
            let mut session = connected(&service);
            session.shutdown();
            session.shutdown();
        }
        assert_eq!(service.releases.load(Ordering::SeqCst), 1);

        drop(session(&service));
        assert_eq!(service.releases.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn zero_id_capacity_rejected() {
        let config = SessionConfig::new("/unused").with_id_capacity(0);
        assert!(matches!(
            Session::with_binding(FakeService::new(), &config),
            Err(FluidError::InvalidArgument(_))
        ));
    }

    #[test]
    fn initialize_without_artifact_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = Session::initialize(SessionConfig::new(dir.path())).unwrap_err();
        assert!(matches!(
            err,
            FluidError::Load(crate::error::LoadError::ArtifactNotFound { .. })
        ));
    }

    #[test]
    fn correlation_id_parsing() {
        assert_eq!(correlation_id(b"abc\0\0\0", "p").unwrap(), "abc");
        assert_eq!(correlation_id(b"\0abc", "p").unwrap(), "p");
        assert_eq!(correlation_id(b"abcd", "p").unwrap(), "abcd");
        assert_eq!(correlation_id(b"", "p").unwrap(), "p");
        assert!(matches!(
            correlation_id(b"ab\xff\0", "p"),
            Err(FluidError::InvalidCorrelationId { len: 3 })
        ));
    }

    #[tokio::test]
    async fn wait_sees_delivered_result() {
        let service = FakeService::new();
        let session = Arc::new(connected(&service));
        let handle = session.submit(TaskKind::R, "6 * 7", Bytes::new()).unwrap();
        let envelope = TaskResult::new(handle.id(), &b"42"[..]).encode();

        let deliverer = Arc::clone(&session);
        tokio::spawn(async move {
            tokio::task::yield_now().await;
            deliverer.deliver(&envelope).unwrap();
        });

        assert_eq!(
            handle.wait().await,
            Some(TaskState::Complete(Bytes::from_static(b"42")))
        );
    }

    #[tokio::test]
    async fn result_feed_completes_submitted_tasks() {
        use futures::SinkExt;
        use tokio_util::codec::FramedWrite;

        use crate::envelope::ResultEnvelope;
        use crate::envelope::frame::EnvelopeCodec;

        let service = FakeService::new();
        let session = connected(&service);
        let handle = session.submit(TaskKind::Julia, "sum(1:10)", Bytes::new()).unwrap();

        let (client, server) = tokio::io::duplex(256);
        let feed = tokio::spawn(session.result_feed(client));

        let mut frames = FramedWrite::new(server, EnvelopeCodec::<ResultEnvelope>::new());
        frames
            .send(ResultEnvelope::ResultsMsg(TaskResult::new(handle.id(), &b"55"[..])))
            .await
            .unwrap();
        drop(frames);

        let stats = feed.await.unwrap().unwrap();
        assert_eq!(stats.delivered, 1);
        assert_eq!(
            handle.wait().await,
            Some(TaskState::Complete(Bytes::from_static(b"55")))
        );
    }
}
