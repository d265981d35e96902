//! Session namespace and its lifecycle
//!
//! A session owns one script engine on a dedicated thread. Engines hold a V8
//! isolate, which cannot move between threads, so every operation on the
//! namespace is a command sent to that thread.

use crate::error::{Result, SandboxError};
use crate::runtime::{CancelToken, EngineFactory, HostContext, Interrupt, ScriptEngine};
use crate::types::{CapturedOutput, RunOutcome};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::{mpsc, Arc, Mutex, PoisonError, RwLock};
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::oneshot;

/// Output and outcome of one execution
#[derive(Debug, Clone, PartialEq)]
pub struct ExecuteReply {
    pub output: CapturedOutput,
    pub outcome: RunOutcome,
}

enum Command {
    Execute {
        code: String,
        bindings: Vec<(String, Value)>,
        cancel: CancelToken,
        started: oneshot::Sender<()>,
        reply: oneshot::Sender<Result<ExecuteReply>>,
    },
    ExtractArtifacts {
        reply: oneshot::Sender<Vec<PathBuf>>,
    },
    Reset {
        reply: oneshot::Sender<Result<()>>,
    },
    Shutdown,
}

/// State the worker publishes for lock-free readers
#[derive(Default)]
struct Shared {
    variables: RwLock<Vec<String>>,
    interrupt: Mutex<Option<Arc<dyn Interrupt>>>,
}

impl Shared {
    fn set_variables(&self, names: Vec<String>) {
        *self.variables.write().unwrap_or_else(PoisonError::into_inner) = names;
    }

    fn set_interrupt(&self, interrupt: Option<Arc<dyn Interrupt>>) {
        *self.interrupt.lock().unwrap_or_else(PoisonError::into_inner) = interrupt;
    }

    fn interrupt(&self) {
        let interrupt = self
            .interrupt
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(interrupt) = interrupt {
            interrupt.interrupt();
        }
    }
}

/// The namespace every execution of this process runs against
pub struct Session {
    commands: mpsc::Sender<Command>,
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Session {
    /// Start the session thread and initialize the namespace.
    ///
    /// Fails when the engine or its preamble cannot be set up.
    pub async fn start<F: EngineFactory>(factory: F, host: HostContext) -> Result<Self> {
        let (commands, receiver) = mpsc::channel();
        let (ready_tx, ready_rx) = oneshot::channel();
        let shared = Arc::new(Shared::default());

        let worker_shared = shared.clone();
        let worker = std::thread::Builder::new()
            .name("codebox-session".to_string())
            .spawn(move || Worker::run(factory, host, worker_shared, receiver, ready_tx))
            .map_err(|e| SandboxError::Initialization(format!("Failed to spawn session thread: {e}")))?;

        ready_rx.await.map_err(|_| SandboxError::SessionUnavailable)??;

        Ok(Self {
            commands,
            shared,
            worker: Mutex::new(Some(worker)),
        })
    }

    fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| SandboxError::SessionUnavailable)
    }

    /// Run `code` after binding `bindings`, interrupting it once `timeout`
    /// elapses from the moment the session thread starts it.
    ///
    /// The deadline is enforced by a spawned watchdog, so it still holds when
    /// the returned future is dropped before the run finishes.
    pub async fn execute(
        &self,
        code: String,
        bindings: Vec<(String, Value)>,
        timeout: Duration,
    ) -> Result<ExecuteReply> {
        let cancel = CancelToken::new();
        let (started, started_rx) = oneshot::channel();
        let (reply, response) = oneshot::channel();
        self.send(Command::Execute {
            code,
            bindings,
            cancel: cancel.clone(),
            started,
            reply,
        })?;

        let (forward, forwarded) = oneshot::channel();
        tokio::spawn(enforce_deadline(
            Deadline {
                timeout,
                cancel,
                shared: self.shared.clone(),
            },
            started_rx,
            response,
            forward,
        ));
        forwarded
            .await
            .unwrap_or(Err(SandboxError::SessionUnavailable))
    }

    /// Save pending figures into the scratch directory and close them
    pub async fn extract_artifacts(&self) -> Result<Vec<PathBuf>> {
        let (reply, response) = oneshot::channel();
        self.send(Command::ExtractArtifacts { reply })?;
        response.await.map_err(|_| SandboxError::SessionUnavailable)
    }

    /// Discard the namespace and initialize a fresh one
    pub async fn reset(&self) -> Result<()> {
        let (reply, response) = oneshot::channel();
        self.send(Command::Reset { reply })?;
        response.await.map_err(|_| SandboxError::SessionUnavailable)?
    }

    /// Names bound in the namespace as of the last completed command
    pub fn variables(&self) -> Vec<String> {
        self.shared
            .variables
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Stop the session thread and drop the engine
    pub async fn teardown(&self) {
        let _ = self.commands.send(Command::Shutdown);
        let worker = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(worker) = worker {
            match tokio::task::spawn_blocking(move || worker.join()).await {
                Ok(Ok(())) => tracing::info!("Session stopped"),
                _ => tracing::warn!("Session thread did not stop cleanly"),
            }
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        let _ = self.commands.send(Command::Shutdown);
    }
}

/// What the watchdog needs to stop a run
struct Deadline {
    timeout: Duration,
    cancel: CancelToken,
    shared: Arc<Shared>,
}

/// Wait for the run to start, then for its reply or its deadline
async fn enforce_deadline(
    deadline: Deadline,
    started: oneshot::Receiver<()>,
    mut response: oneshot::Receiver<Result<ExecuteReply>>,
    forward: oneshot::Sender<Result<ExecuteReply>>,
) {
    let reply = match started.await {
        Ok(()) => match tokio::time::timeout(deadline.timeout, &mut response).await {
            Ok(reply) => reply,
            Err(_) => {
                tracing::warn!(
                    timeout_secs = deadline.timeout.as_secs(),
                    "Execution deadline reached, interrupting"
                );
                deadline.cancel.cancel();
                deadline.shared.interrupt();
                response.await
            }
        },
        // The worker stopped before picking the run up
        Err(_) => response.await,
    };

    let reply = reply.unwrap_or(Err(SandboxError::SessionUnavailable));
    if forward.send(reply).is_err() {
        tracing::debug!("Execution finished after its caller went away");
    }
}

/// Runs on the session thread and owns the engine
struct Worker<F: EngineFactory> {
    factory: F,
    host: HostContext,
    shared: Arc<Shared>,
    engine: Option<F::Engine>,
}

impl<F: EngineFactory> Worker<F> {
    fn run(
        factory: F,
        host: HostContext,
        shared: Arc<Shared>,
        commands: mpsc::Receiver<Command>,
        ready: oneshot::Sender<Result<()>>,
    ) {
        let mut worker = Self {
            factory,
            host,
            shared,
            engine: None,
        };

        let initialized = worker.initialize();
        let failed = initialized.is_err();
        let _ = ready.send(initialized);
        if failed {
            return;
        }

        while let Ok(command) = commands.recv() {
            match command {
                Command::Execute {
                    code,
                    bindings,
                    cancel,
                    started,
                    reply,
                } => {
                    let _ = started.send(());
                    let result = worker.execute(&code, bindings, &cancel);
                    let _ = reply.send(result);
                }
                Command::ExtractArtifacts { reply } => {
                    let written = worker
                        .engine
                        .as_mut()
                        .map(|engine| engine.extract_artifacts())
                        .unwrap_or_default();
                    let _ = reply.send(written);
                }
                Command::Reset { reply } => {
                    let _ = reply.send(worker.reset());
                }
                Command::Shutdown => break,
            }
        }

        worker.teardown();
    }

    fn initialize(&mut self) -> Result<()> {
        let mut engine = self.factory.create(self.host.clone())?;
        self.shared.set_interrupt(Some(engine.interrupt_handle()));
        tracing::info!(engine = engine.name(), "Session initialized");
        self.engine = Some(engine);
        self.publish_variables();
        Ok(())
    }

    fn reset(&mut self) -> Result<()> {
        self.teardown();
        self.initialize()
    }

    fn teardown(&mut self) {
        self.shared.set_interrupt(None);
        self.shared.set_variables(Vec::new());
        if self.engine.take().is_some() {
            tracing::debug!("Session engine dropped");
        }
    }

    fn execute(
        &mut self,
        code: &str,
        bindings: Vec<(String, Value)>,
        cancel: &CancelToken,
    ) -> Result<ExecuteReply> {
        let engine = self.engine.as_mut().ok_or(SandboxError::SessionUnavailable)?;
        // A deadline that fired after the previous run finished leaves a pending interrupt
        engine.clear_interrupt();

        for (name, value) in &bindings {
            engine.set_global(name, value)?;
        }

        let (output, result) = self.host.capture.run_with_capture(|| engine.run(code, cancel));
        if cancel.is_cancelled() {
            engine.clear_interrupt();
        }

        let outcome = match result {
            Ok(()) => RunOutcome::Completed,
            Err(_) if cancel.is_cancelled() => RunOutcome::TimedOut,
            Err(failure) => RunOutcome::Failed(failure),
        };

        self.publish_variables();
        Ok(ExecuteReply { output, outcome })
    }

    fn publish_variables(&mut self) {
        let Some(engine) = self.engine.as_mut() else {
            return;
        };
        match engine.variables() {
            Ok(names) => self.shared.set_variables(names),
            Err(e) => tracing::warn!(error = %e, "Error listing session variables"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::OutputCapture;
    use crate::runtime::{V8EngineFactory, PREAMBLE_BINDINGS};
    use crate::scratch::ScratchDir;

    async fn session() -> (tempfile::TempDir, Session) {
        let temp = tempfile::tempdir().unwrap();
        let host = HostContext {
            capture: OutputCapture::new(),
            scratch: ScratchDir::create(temp.path()).unwrap(),
        };
        let session = Session::start(V8EngineFactory, host).await.unwrap();
        (temp, session)
    }

    async fn execute(session: &Session, code: &str) -> ExecuteReply {
        session
            .execute(code.to_string(), Vec::new(), Duration::from_secs(10))
            .await
            .unwrap()
    }

    fn sorted(mut names: Vec<String>) -> Vec<String> {
        names.sort();
        names
    }

    fn preamble_names() -> Vec<String> {
        sorted(PREAMBLE_BINDINGS.iter().map(|s| s.to_string()).collect())
    }

    #[tokio::test]
    async fn test_namespace_persists_until_reset() {
        let (_temp, session) = session().await;

        let reply = execute(&session, "x = 1").await;
        assert_eq!(reply.outcome, RunOutcome::Completed);
        assert!(session.variables().contains(&"x".to_string()));

        let reply = execute(&session, "assert(x === 1)").await;
        assert_eq!(reply.outcome, RunOutcome::Completed);

        session.reset().await.unwrap();
        assert_eq!(sorted(session.variables()), preamble_names());

        let reply = execute(&session, "assert(x === 1)").await;
        match reply.outcome {
            RunOutcome::Failed(failure) => assert!(failure.message.contains("x is not defined")),
            other => panic!("unexpected outcome {other:?}"),
        }
        session.teardown().await;
    }

    #[tokio::test]
    async fn test_failure_keeps_partial_output() {
        let (_temp, session) = session().await;
        let reply = execute(&session, "console.log('before'); throw new Error('boom')").await;

        assert_eq!(reply.output.stdout, "before\n");
        match reply.outcome {
            RunOutcome::Failed(failure) => {
                assert_eq!(failure.message, "boom");
                assert!(failure.trace.contains("boom"));
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_timeout_interrupts_and_session_survives() {
        let (_temp, session) = session().await;
        execute(&session, "before = 'kept'").await;

        let started = std::time::Instant::now();
        let reply = session
            .execute("while (true) {}".to_string(), Vec::new(), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(reply.outcome, RunOutcome::TimedOut);
        assert!(started.elapsed() < Duration::from_secs(5));

        let reply = execute(&session, "assert(before === 'kept')").await;
        assert_eq!(reply.outcome, RunOutcome::Completed);
    }

    #[tokio::test]
    async fn test_timeout_ends_blocking_sleep() {
        let (_temp, session) = session().await;
        let started = std::time::Instant::now();
        let reply = session
            .execute("time.sleep(10)".to_string(), Vec::new(), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(reply.outcome, RunOutcome::TimedOut);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_deadline_holds_after_caller_drops() {
        let (temp, session) = session().await;
        let code = "const t0 = Date.now(); while (Date.now() - t0 < 4000) {}; os.write_text('done.txt', 'ran')";

        let started = std::time::Instant::now();
        let dropped = tokio::time::timeout(
            Duration::from_millis(100),
            session.execute(code.to_string(), Vec::new(), Duration::from_secs(1)),
        )
        .await;
        assert!(dropped.is_err());

        // Queued behind the abandoned run, which its own deadline stops
        let reply = execute(&session, "console.log('next')").await;
        assert_eq!(reply.outcome, RunOutcome::Completed);
        assert_eq!(reply.output.stdout, "next\n");
        assert!(started.elapsed() < Duration::from_secs(3));
        assert!(!temp.path().join("done.txt").exists());
    }

    #[tokio::test]
    async fn test_deadline_counts_from_start_of_run() {
        let (_temp, session) = session().await;
        let session = Arc::new(session);

        let first = {
            let session = session.clone();
            tokio::spawn(async move {
                session
                    .execute("time.sleep(0.8)".to_string(), Vec::new(), Duration::from_secs(5))
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;

        // Waits about 0.7s in the queue, which does not count against its 1s
        let reply = session
            .execute("time.sleep(0.6)".to_string(), Vec::new(), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(reply.outcome, RunOutcome::Completed);
        assert_eq!(first.await.unwrap().unwrap().outcome, RunOutcome::Completed);
    }

    #[tokio::test]
    async fn test_bindings_are_injected() {
        let (_temp, session) = session().await;
        let bindings = vec![("__scratch_dir__".to_string(), serde_json::json!("/data"))];
        let reply = session
            .execute(
                "console.log(__scratch_dir__)".to_string(),
                bindings,
                Duration::from_secs(10),
            )
            .await
            .unwrap();
        assert_eq!(reply.output.stdout, "/data\n");
    }

    #[tokio::test]
    async fn test_extract_artifacts_empties_registry() {
        let (temp, session) = session().await;
        execute(&session, "plt.plot([1, 2, 3])").await;

        let written = session.extract_artifacts().await.unwrap();
        assert_eq!(written.len(), 1);
        assert!(written[0].is_file());
        assert_eq!(written[0].parent(), Some(std::fs::canonicalize(temp.path()).unwrap().as_path()));

        assert!(session.extract_artifacts().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_commands_fail_after_teardown() {
        let (_temp, session) = session().await;
        session.teardown().await;
        let err = session
            .execute("1".to_string(), Vec::new(), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, SandboxError::SessionUnavailable));
    }
}
