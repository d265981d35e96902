//! V8 JavaScript engine using deno_core

mod ops;
mod prelude;

use crate::error::{Result, SandboxError};
use crate::runtime::{CancelToken, EngineFactory, HostContext, Interrupt, ScriptEngine};
use crate::types::ScriptFailure;
use deno_core::{v8, JsRuntime, RuntimeOptions};
use ops::HostState;
use serde::de::DeserializeOwned;
use std::collections::{BTreeSet, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

pub use prelude::PREAMBLE_BINDINGS;

const SESSION_SCRIPT: &str = "<session>";

/// Stops the isolate from any thread
struct IsolateInterrupt(v8::IsolateHandle);

impl Interrupt for IsolateInterrupt {
    fn interrupt(&self) {
        self.0.terminate_execution();
    }
}

/// One V8 isolate whose global object is the session namespace
pub struct V8Engine {
    runtime: JsRuntime,
    /// Globals present before the preamble ran
    baseline: HashSet<String>,
    /// Names user code may have declared with `let`, `const` or `class`
    lexical: BTreeSet<String>,
}

impl V8Engine {
    /// Create an isolate, install the host environment and run the preamble
    pub fn new(host: HostContext) -> Result<Self> {
        let mut runtime = JsRuntime::new(RuntimeOptions {
            extensions: vec![ops::create_host_extension()],
            ..Default::default()
        });
        runtime.op_state().borrow_mut().put(HostState::new(host));

        runtime
            .execute_script("<codebox:bootstrap>", prelude::BOOTSTRAP_JS)
            .map_err(|e| SandboxError::Initialization(format!("Host bootstrap failed: {e}")))?;

        let mut engine = Self {
            runtime,
            baseline: HashSet::new(),
            lexical: BTreeSet::new(),
        };
        engine.baseline = engine.global_names()?.into_iter().collect();

        let preamble = format!(
            "({})({});",
            prelude::PREAMBLE_JS,
            serde_json::to_string(&ops::REQUIRED_OPS)?
        );
        engine
            .runtime
            .execute_script("<codebox:preamble>", preamble)
            .map_err(|e| SandboxError::Initialization(format!("Preamble failed: {e}")))?;

        tracing::debug!(baseline = engine.baseline.len(), "V8 session namespace initialized");
        Ok(engine)
    }

    /// Evaluate an expression producing JSON text and decode it
    fn eval_json<T: DeserializeOwned>(&mut self, name: &'static str, source: String) -> Result<T> {
        let value = self
            .runtime
            .execute_script(name, source)
            .map_err(|e| SandboxError::Engine(e.to_string()))?;

        let text = {
            let scope = &mut self.runtime.handle_scope();
            let local = v8::Local::new(scope, value);
            local.to_rust_string_lossy(scope)
        };
        Ok(serde_json::from_str(&text)?)
    }

    fn global_names(&mut self) -> Result<Vec<String>> {
        self.eval_json(
            "<codebox:globals>",
            "JSON.stringify(Object.getOwnPropertyNames(globalThis))".to_string(),
        )
    }

    /// Candidate lexical names that resolve at the top level.
    ///
    /// Top-level `let`/`const`/`class` bindings live in the script scope, not
    /// on the global object, so each candidate is looked up by indirect eval.
    fn lexical_names(&mut self) -> Result<Vec<String>> {
        if self.lexical.is_empty() {
            return Ok(Vec::new());
        }
        let candidates = serde_json::to_string(&self.lexical)?;
        self.eval_json(
            "<codebox:lexical>",
            format!(
                "JSON.stringify({candidates}.filter((name) => {{ \
                 try {{ (0, eval)(name); return true; }} catch {{ return false; }} }}))"
            ),
        )
    }

    fn with_host<T>(&mut self, f: impl FnOnce(&mut HostState) -> T) -> T {
        let state = self.runtime.op_state();
        let mut state = state.borrow_mut();
        f(state.borrow_mut::<HostState>())
    }
}

impl ScriptEngine for V8Engine {
    fn name(&self) -> &str {
        "v8"
    }

    fn interrupt_handle(&mut self) -> Arc<dyn Interrupt> {
        Arc::new(IsolateInterrupt(self.runtime.v8_isolate().thread_safe_handle()))
    }

    fn clear_interrupt(&mut self) {
        self.runtime.v8_isolate().cancel_terminate_execution();
    }

    fn set_global(&mut self, name: &str, value: &serde_json::Value) -> Result<()> {
        let source = format!(
            "globalThis[{}] = {};",
            serde_json::to_string(name)?,
            serde_json::to_string(value)?
        );
        self.runtime
            .execute_script("<codebox:bind>", source)
            .map_err(|e| SandboxError::Engine(e.to_string()))?;
        Ok(())
    }

    fn run(&mut self, code: &str, cancel: &CancelToken) -> std::result::Result<(), ScriptFailure> {
        let token = cancel.clone();
        self.with_host(|host| host.cancel = token);
        self.lexical.extend(declared_names(code));

        self.runtime
            .execute_script(SESSION_SCRIPT, code.to_string())
            .map(|_| ())
            .map_err(|e| ScriptFailure::from_report(&e.to_string()))
    }

    fn variables(&mut self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self
            .global_names()?
            .into_iter()
            .filter(|name| !self.baseline.contains(name))
            .collect();
        for name in self.lexical_names()? {
            if !names.contains(&name) {
                names.push(name);
            }
        }
        Ok(names)
    }

    fn extract_artifacts(&mut self) -> Vec<PathBuf> {
        self.with_host(|host| host.figures.extract_and_clear(&host.scratch))
    }

    fn open_figures(&mut self) -> Vec<u32> {
        self.with_host(|host| host.figures.fignums())
    }
}

/// First name bound by each `let`, `const` or `class` statement in `code`
fn declared_names(code: &str) -> impl Iterator<Item = String> + '_ {
    code.lines()
        .flat_map(|line| line.split(';'))
        .filter_map(|statement| {
            let statement = statement.trim_start();
            let rest = ["let", "const", "class"].iter().find_map(|keyword| {
                statement
                    .strip_prefix(*keyword)
                    .filter(|rest| rest.starts_with(char::is_whitespace))
            })?;
            let name: String = rest
                .trim_start()
                .chars()
                .take_while(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '$')
                .collect();
            let valid = name.chars().next().is_some_and(|c| !c.is_ascii_digit());
            valid.then_some(name)
        })
}

/// Creates [`V8Engine`]s on the session thread
#[derive(Debug, Clone, Copy, Default)]
pub struct V8EngineFactory;

impl EngineFactory for V8EngineFactory {
    type Engine = V8Engine;

    fn create(&self, host: HostContext) -> Result<V8Engine> {
        V8Engine::new(host)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::OutputCapture;
    use crate::scratch::ScratchDir;

    fn engine() -> (tempfile::TempDir, OutputCapture, V8Engine) {
        let temp = tempfile::tempdir().unwrap();
        let capture = OutputCapture::new();
        let host = HostContext {
            capture: capture.clone(),
            scratch: ScratchDir::create(temp.path()).unwrap(),
        };
        (temp, capture, V8Engine::new(host).unwrap())
    }

    fn run(engine: &mut V8Engine, code: &str) -> std::result::Result<(), ScriptFailure> {
        engine.run(code, &CancelToken::new())
    }

    #[test]
    fn test_fresh_namespace_lists_preamble() {
        let (_temp, _capture, mut engine) = engine();
        let mut names = engine.variables().unwrap();
        names.sort();
        let mut expected: Vec<String> = PREAMBLE_BINDINGS.iter().map(|s| s.to_string()).collect();
        expected.sort();
        assert_eq!(names, expected);
    }

    #[test]
    fn test_globals_persist_between_runs() {
        let (_temp, _capture, mut engine) = engine();
        run(&mut engine, "x = 41").unwrap();
        run(&mut engine, "x += 1; assert(x === 42)").unwrap();
        assert!(engine.variables().unwrap().contains(&"x".to_string()));
    }

    #[test]
    fn test_lexical_bindings_are_listed() {
        let (_temp, _capture, mut engine) = engine();
        run(
            &mut engine,
            "const total = 3; let count = 1\nclass Point {}\nfunction f() { let hidden = 1; return hidden }",
        )
        .unwrap();
        run(&mut engine, "assert(total === 3 && count === 1)").unwrap();

        let names = engine.variables().unwrap();
        for name in ["total", "count", "Point", "f"] {
            assert!(names.contains(&name.to_string()), "missing {name}");
        }
        assert!(!names.contains(&"hidden".to_string()));
    }

    #[test]
    fn test_declared_names() {
        let names: Vec<String> =
            declared_names("let a = 1; const  b$ = 2\n  class C {}\nletter = 4; let {d} = o; let 9x").collect();
        assert_eq!(names, vec!["a", "b$", "C"]);
    }

    #[test]
    fn test_console_is_captured() {
        let (_temp, capture, mut engine) = engine();
        let (output, result) = capture.run_with_capture(|| {
            run(
                &mut engine,
                "console.log('hello', 1, [2]); console.error('oops'); throw new TypeError('bad')",
            )
        });

        let failure = result.unwrap_err();
        assert_eq!(failure.message, "bad");
        assert!(failure.trace.contains("TypeError"));
        assert_eq!(output.stdout, "hello 1 [2]\n");
        assert_eq!(output.stderr, "oops\n");
    }

    #[test]
    fn test_undefined_name_fails() {
        let (_temp, _capture, mut engine) = engine();
        let failure = run(&mut engine, "assert(y === 1)").unwrap_err();
        assert!(failure.message.contains("y is not defined"));
    }

    #[test]
    fn test_set_global_binds_json() {
        let (_temp, _capture, mut engine) = engine();
        engine
            .set_global("__scratch_dir__", &serde_json::json!("/tmp/scratch"))
            .unwrap();
        run(&mut engine, "assert(__scratch_dir__ === '/tmp/scratch')").unwrap();
    }

    #[test]
    fn test_plotting_populates_registry() {
        let (temp, _capture, mut engine) = engine();
        run(&mut engine, "plt.plot([1, 2, 3], [4, 5, 6]); plt.title('t')").unwrap();
        assert_eq!(engine.open_figures(), vec![1]);

        let written = engine.extract_artifacts();
        assert_eq!(written.len(), 1);
        assert!(written[0].starts_with(std::fs::canonicalize(temp.path()).unwrap()));
        assert!(engine.open_figures().is_empty());
    }

    #[test]
    fn test_save_plot_and_os_helpers() {
        let (temp, capture, mut engine) = engine();
        let (output, result) = capture.run_with_capture(|| {
            run(
                &mut engine,
                r#"
                plt.bar([1, 2], [3, 4]);
                saved = save_plot("chart.png");
                os.write_text("notes.txt", "hi");
                assert(os.read_text("notes.txt") === "hi");
                assert(os.listdir().includes("chart.png"));
                assert(os.exists(os.path.join(os.getcwd(), "notes.txt")));
                "#,
            )
        });
        result.unwrap();
        assert_eq!(output.stdout, "Plot saved to: chart.png\n");
        assert!(temp.path().join("chart.png").is_file());
        assert!(temp.path().join("notes.txt").is_file());
    }

    #[test]
    fn test_save_plot_follows_extension() {
        let (temp, capture, mut engine) = engine();
        let (output, result) = capture.run_with_capture(|| {
            run(
                &mut engine,
                r#"
                plt.plot([1, 2, 3]);
                saved = save_plot("chart.svg");
                assert(saved.endsWith("/chart.svg"));
                "#,
            )
        });
        result.unwrap();
        assert_eq!(output.stdout, "Plot saved to: chart.svg\n");
        assert!(temp.path().join("chart.svg").is_file());
        assert!(!temp.path().join("chart.svg.png").exists());
    }

    #[test]
    fn test_oversized_plot_commands_throw() {
        let (_temp, _capture, mut engine) = engine();
        let failure = run(&mut engine, "plt.subplots(70000, 70000)").unwrap_err();
        assert!(failure.trace.contains("RangeError"));
        assert!(failure.message.contains("exceeds 1024 axes"));

        let failure = run(&mut engine, "plt.hist([1, 2, 3], 4e9)").unwrap_err();
        assert!(failure.message.contains("at most 100000"));

        run(&mut engine, "plt.subplots(2, 2); assert(plt.get_fignums().length === 1)").unwrap();
    }

    #[test]
    fn test_csv_round_trip_through_scratch() {
        let (temp, _capture, mut engine) = engine();
        run(
            &mut engine,
            r#"
            os.write_text("data.csv", "name,score\nada,3\nbob,4.5\n");
            rows = pd.read_csv("data.csv");
            assert(rows.length === 2);
            assert(rows[1].name === "bob" && rows[1].score === 4.5);
            assert(np.sum(pd.column(rows, "score")) === 7.5);
            pd.to_csv(rows.map((row) => ({ ...row, passed: row.score > 3 })), "out.csv");
            "#,
        )
        .unwrap();
        let written = std::fs::read_to_string(temp.path().join("out.csv")).unwrap();
        assert_eq!(written, "name,score,passed\nada,3,false\nbob,4.5,true\n");
    }

    #[test]
    fn test_interrupt_terminates_and_recovers() {
        let (_temp, _capture, mut engine) = engine();
        run(&mut engine, "kept = 'yes'").unwrap();

        let interrupt = engine.interrupt_handle();
        let cancel = CancelToken::new();
        let trigger = cancel.clone();
        let stopper = std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(200));
            trigger.cancel();
            interrupt.interrupt();
        });

        let result = engine.run("while (true) {}", &cancel);
        stopper.join().unwrap();
        assert!(result.is_err());
        assert!(cancel.is_cancelled());

        engine.clear_interrupt();
        run(&mut engine, "assert(kept === 'yes')").unwrap();
    }

    #[test]
    fn test_sleep_returns_when_cancelled() {
        let (_temp, _capture, mut engine) = engine();
        let cancel = CancelToken::new();
        cancel.cancel();
        let started = std::time::Instant::now();
        engine.run("time.sleep(5)", &cancel).unwrap();
        assert!(started.elapsed() < std::time::Duration::from_secs(1));
    }
}
