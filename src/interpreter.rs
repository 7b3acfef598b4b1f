//! The interpreter session: lifecycle, evaluation and outbound calls.
//!
//! A session moves through `uninitialized -> running -> destructed` and
//! never back: construction boots the runtime (and tears it straight down
//! again on a startup failure), drop runs global destruction. At most one
//! session is live per process, tracked by a process-wide flag; handles
//! and sessions are passed explicitly everywhere; there is no ambient
//! "current interpreter" lookup.

use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::bridge::{self, HostFn};
use crate::error::Error;
use crate::interp::cell::{self, Cell};
use crate::interp::engine::Engine;
use crate::interp::{Context, eval, modules};
use crate::list::List;
use crate::scalar::Scalar;
use crate::syntax::parser::parse_source;

/// Whether any session is live in this process. `Interpreter` construction
/// claims it; drop releases it.
static LIVE: AtomicBool = AtomicBool::new(false);

/// The fixed package the binding installs its own subroutines under.
pub const BINDING_PACKAGE: &str = "Pickle";

/// Stderr warn handler, registered at boot so runtime diagnostics do not
/// interleave with host stdout.
fn warn_to_stderr(message: Scalar) -> Result<Scalar, Error> {
    eprint!("{}", message.as_string());
    Ok(Scalar::undef())
}

pub struct Interpreter {
    engine: Engine,
}

impl Interpreter {
    /// A session with the default command line, `["pickle", "-e0"]`: a
    /// no-op startup program and no script arguments.
    pub fn new() -> Result<Self, Error> {
        Self::with_args(&["pickle", "-e0"])
    }

    /// A session booted as a command-line run: `args[0]` is the program
    /// name, `-e CHUNK` (or `-eCHUNK`) supplies startup code, remaining
    /// arguments land in the `ARGS` array.
    pub fn with_args<S: AsRef<str>>(args: &[S]) -> Result<Self, Error> {
        Self::with_args_env(args, &[] as &[&str])
    }

    /// As [`Interpreter::with_args`], with an environment of `KEY=VALUE`
    /// entries that lands in the `ENV` hash.
    ///
    /// Startup failure is fatal for the instance: the partially built
    /// runtime is torn down before the error is returned, and `ping()`
    /// reports false again.
    pub fn with_args_env<S: AsRef<str>, T: AsRef<str>>(
        args: &[S],
        env: &[T],
    ) -> Result<Self, Error> {
        if LIVE
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(Error::Init {
                stage: "startup",
                message: "another interpreter is already live in this process".to_string(),
            });
        }
        let mut session = Self {
            engine: Engine::new(),
        };
        // A boot error drops `session`, which releases the LIVE flag and
        // the half-built symbol table.
        session.boot(args, env)?;
        Ok(session)
    }

    fn boot<S: AsRef<str>, T: AsRef<str>>(&mut self, args: &[S], env: &[T]) -> Result<(), Error> {
        modules::install_core(&mut self.engine);
        bridge::register(
            &mut self.engine,
            BINDING_PACKAGE,
            "warn_handler",
            HostFn::OneArg(warn_to_stderr),
        );
        // The hook is held by name, not by code cell, so replacing the
        // handler subroutine later retargets warnings too.
        self.engine
            .set_warn_hook(Some(cell::bytes(format!("{}::warn_handler", BINDING_PACKAGE))));

        let program_name = args.first().map(|s| s.as_ref()).unwrap_or("pickle");
        let slot = self.engine.scalar_slot("0");
        cell::set_from(&slot, &cell::bytes(program_name.as_bytes().to_vec()));

        let mut chunks: Vec<String> = Vec::new();
        let mut rest: Vec<&str> = Vec::new();
        let mut i = 1;
        while i < args.len() {
            let arg = args[i].as_ref();
            if arg == "-e" {
                i += 1;
                let chunk = args.get(i).map(|s| s.as_ref()).ok_or(Error::Init {
                    stage: "parse",
                    message: "no code specified for -e".to_string(),
                })?;
                chunks.push(chunk.to_string());
            } else if let Some(chunk) = arg.strip_prefix("-e") {
                chunks.push(chunk.to_string());
            } else if arg.starts_with('-') && arg.len() > 1 {
                return Err(Error::Init {
                    stage: "parse",
                    message: format!("unrecognized switch: {}", arg),
                });
            } else {
                rest.push(arg);
            }
            i += 1;
        }

        let args_slot = self.engine.array_slot("ARGS");
        if let Cell::Array(elements) = &mut *args_slot.borrow_mut() {
            for arg in rest {
                elements.push(cell::bytes(arg.as_bytes().to_vec()));
            }
        }

        let env_slot = self.engine.hash_slot("ENV");
        if let Cell::Hash(entries) = &mut *env_slot.borrow_mut() {
            for entry in env {
                let entry = entry.as_ref();
                let (key, value) = entry.split_once('=').unwrap_or((entry, ""));
                entries.insert(key.to_string(), cell::bytes(value.as_bytes().to_vec()));
            }
        }

        let startup = chunks.join(";\n");
        if !startup.is_empty() {
            let program = parse_source(&startup).map_err(|message| Error::Init {
                stage: "parse",
                message,
            })?;
            eval::eval_program(&mut self.engine, &program).map_err(|e| Error::Init {
                stage: "run",
                message: e.borrow().as_text(),
            })?;
        }
        Ok(())
    }

    /// Whether any session is currently live in this process.
    pub fn ping() -> bool {
        LIVE.load(Ordering::SeqCst)
    }

    /// Creates a default session only if none is live: the idempotent
    /// bootstrap helper. `Ok(None)` means one already exists.
    pub fn vivify() -> Result<Option<Self>, Error> {
        if Self::ping() {
            return Ok(None);
        }
        Self::new().map(Some)
    }

    /// Direct access to the runtime underneath the binding, for embedding
    /// uses the handle layer does not cover (dereference-overload
    /// installation, slot surgery). Everything reachable from here is the
    /// same single-threaded engine the handles already share.
    pub fn engine_mut(&mut self) -> &mut Engine {
        &mut self.engine
    }

    /// Compiles and runs source text in scalar context.
    ///
    /// The caller's error slot is saved around the evaluation and
    /// restored before any error is raised, so host-initiated evaluation
    /// never leaks into the script-visible `$err`. Embedded NUL bytes in
    /// `code` are not supported (the lexer rejects them).
    pub fn eval_string(&mut self, code: &str) -> Result<Scalar, Error> {
        let slot = self.engine.error_slot();
        let saved = cell::shallow_copy(&slot);
        let result = eval::eval_source(&mut self.engine, code);
        cell::set_from(&slot, &saved);
        result
            .map(Scalar::from_cell)
            .map_err(|e| Error::Runtime(Scalar::from_cell(e)))
    }

    /// Calls a runtime callable: a code reference, or a (possibly
    /// package-qualified) subroutine name.
    ///
    /// The requested context shapes the result: list context returns a
    /// sequence reference holding every returned value, scalar context
    /// exactly the last returned value, void context undef. After every
    /// call, whatever the context, the error signal is checked and
    /// raised as [`Error::Runtime`] carrying the runtime's error value,
    /// after the caller's error-slot bookkeeping has been restored.
    pub fn call_function(
        &mut self,
        func: &Scalar,
        args: &List,
        context: Context,
    ) -> Result<Scalar, Error> {
        let slot = self.engine.error_slot();
        let saved = cell::shallow_copy(&slot);
        let cells = args.element_cells();
        let result = self.engine.call(func.cell(), &cells, context);
        cell::set_from(&slot, &saved);
        match result {
            Ok(values) => Ok(match context {
                Context::List => {
                    Scalar::from_cell(cell::ref_to(cell::new_cell(Cell::Array(values))))
                }
                Context::Scalar => values
                    .last()
                    .map(|v| Scalar::from_cell(Rc::clone(v)))
                    .unwrap_or_else(Scalar::undef),
                Context::Void => Scalar::undef(),
            }),
            Err(e) => Err(Error::Runtime(Scalar::from_cell(e))),
        }
    }

    /// [`Interpreter::call_function`] by subroutine name.
    pub fn call_named(&mut self, name: &str, args: &List, context: Context) -> Result<Scalar, Error> {
        self.call_function(&Scalar::from(name), args, context)
    }

    /// Evaluates a module import for a bare module name.
    pub fn require_module(&mut self, bare: &str) -> Result<(), Error> {
        self.eval_string(&format!("require {};", bare)).map(|_| ())
    }

    /// Registers a host function as a runtime-callable subroutine under
    /// `package::name`. The [`HostFn`] tag picks the bridge entry form;
    /// see [`crate::bridge`] for the three calling conventions.
    pub fn define_sub(&mut self, package: &str, name: &str, host: HostFn) {
        bridge::register(&mut self.engine, package, name, host);
    }

    /// Registers the named subroutine as `class`'s dereference hook for
    /// one shape: blessed references of that class then behave as the
    /// hook's result for shape predicates and checked narrowing.
    pub fn install_deref_overload(
        &mut self,
        class: &str,
        shape: crate::interp::Shape,
        sub_name: &str,
    ) -> Result<(), Error> {
        let code = self.engine.code_slot(sub_name).ok_or_else(|| {
            Error::msg(format!("undefined subroutine &{} called", sub_name))
        })?;
        self.engine.install_overload(class, shape, code);
        Ok(())
    }
}

impl Drop for Interpreter {
    /// Global destruction: releasing the symbol table releases every cell
    /// graph it keeps alive, then the process-wide flag clears. Handles
    /// that outlive the session stay memory-safe, but running
    /// engine-dependent operations on them afterwards is a caller error.
    fn drop(&mut self) {
        self.engine.clear_symbols();
        LIVE.store(false, Ordering::SeqCst);
    }
}
