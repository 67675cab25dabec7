//! Bridge: the host-side owner of one foreign runtime.
//!
//! Every foreign call made through a [`Bridge`] runs inside one process-wide
//! reentrant lock, so at most one thread talks to the runtime at a time, and
//! every call wrapper drains the exception slate before it returns.
use std::{
    collections::{HashMap, HashSet},
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use log::{debug, trace, warn};
use parking_lot::{Mutex, ReentrantMutex, ReentrantMutexGuard};

use crate::{
    Boxable, ForeignException, Machine, MachineCreateInfo, Proxy, Result, Runtime, Type, Value,
};

/// Optional overrides, everything left `None` takes the [`BridgeSettings`]
/// default.
#[derive(Debug, Clone, Default)]
pub struct BridgeCreateInfo {
    /// prefix of synthesized binding symbols
    pub symbol_prefix: Option<String>,
}

#[derive(Debug, Clone)]
pub struct BridgeSettings {
    pub symbol_prefix: String,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            symbol_prefix: "#tether#".to_string(),
        }
    }
}

impl From<BridgeCreateInfo> for BridgeSettings {
    fn from(info: BridgeCreateInfo) -> Self {
        let defaults = Self::default();
        Self {
            symbol_prefix: info.symbol_prefix.unwrap_or(defaults.symbol_prefix),
        }
    }
}

pub struct BridgeShared {
    runtime: Box<dyn Runtime>,
    lock: ReentrantMutex<()>,
    next_symbol: AtomicU64,
    /// symbols currently anchored on behalf of proxies
    bindings: Mutex<HashSet<String, ahash::RandomState>>,
    /// globals and types resolved once by source text, each anchored
    globals: Mutex<HashMap<String, Value, ahash::RandomState>>,
    settings: BridgeSettings,
}

/// Cheap to clone handle to the shared bridge state, every [`Proxy`] holds
/// one.
#[derive(Clone)]
pub struct Bridge {
    shared: Arc<BridgeShared>,
}

impl fmt::Debug for Bridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bridge")
            .field("settings", &self.shared.settings)
            .field("anchored", &self.anchored_count())
            .finish_non_exhaustive()
    }
}

/// Collection is deferred while this guard lives.
///
/// Holds the bridge lock for its whole lifetime and resumes collection on
/// every exit path. Nesting is fine, the runtime's pause counter is
/// reentrant.
pub struct GcPause<'bridge> {
    runtime: &'bridge dyn Runtime,
    _guard: ReentrantMutexGuard<'bridge, ()>,
}

impl Drop for GcPause<'_> {
    fn drop(&mut self) {
        self.runtime.resume_collection();
    }
}

impl Bridge {
    pub fn new(runtime: impl Runtime + 'static, info: BridgeCreateInfo) -> Self {
        let settings = BridgeSettings::from(info);
        debug!("bridge created, binding prefix {:?}", settings.symbol_prefix);
        Self {
            shared: Arc::new(BridgeShared {
                runtime: Box::new(runtime),
                lock: ReentrantMutex::new(()),
                next_symbol: AtomicU64::new(0),
                bindings: Mutex::new(HashSet::default()),
                globals: Mutex::new(HashMap::default()),
                settings,
            }),
        }
    }

    /// A bridge over a fresh in-process [`Machine`].
    pub fn with_machine(info: MachineCreateInfo) -> Self {
        Self::new(Machine::new(info), BridgeCreateInfo::default())
    }

    #[inline]
    pub fn runtime(&self) -> &dyn Runtime {
        &*self.shared.runtime
    }

    #[inline]
    pub fn settings(&self) -> &BridgeSettings {
        &self.shared.settings
    }

    /// Enters the foreign call domain.
    #[inline]
    pub fn lock(&self) -> ReentrantMutexGuard<'_, ()> {
        self.shared.lock.lock()
    }

    pub fn pause(&self) -> GcPause<'_> {
        let guard = self.lock();
        self.runtime().pause_collection();
        GcPause {
            runtime: self.runtime(),
            _guard: guard,
        }
    }

    /// Reads and clears the exception slate.
    pub fn take_exception(&self) -> Option<ForeignException> {
        let _lock = self.lock();
        let runtime = self.runtime();
        let exception = runtime.last_exception()?;
        let type_name = runtime.type_name(runtime.type_of(exception));
        let message = match runtime.exception_message(exception) {
            Some(message) => message
                .strip_prefix(&format!("{type_name}: "))
                .map(str::to_string)
                .unwrap_or(message),
            None => {
                warn!("could not read the message of a pending {type_name}");
                String::new()
            }
        };
        runtime.clear_exception();
        trace!("forwarding foreign {type_name}");
        Some(ForeignException { type_name, message })
    }

    /// `Err` with the pending foreign exception, if any.
    #[inline]
    pub fn forward_last_exception(&self) -> Result<()> {
        match self.take_exception() {
            Some(exception) => Err(exception.into()),
            None => Ok(()),
        }
    }

    pub fn eval(&self, code: &str) -> Result<Proxy> {
        let _lock = self.lock();
        trace!("evaluating {code:?}");
        let value = self.runtime().evaluate(code);
        self.forward_last_exception()?;
        Ok(Proxy::new(self, value, None))
    }

    pub fn call(&self, function: &Proxy, args: &[&dyn Boxable]) -> Result<Proxy> {
        self.safe_call(function.as_raw(), args, |result| {
            Ok(Proxy::new(self, result, None))
        })
    }

    /// Calls the global function `name`.
    pub fn call_function(&self, name: &str, args: &[&dyn Boxable]) -> Result<Proxy> {
        let function = self.global(name)?;
        self.safe_call(function, args, |result| Ok(Proxy::new(self, result, None)))
    }

    /// Boxes `args`, calls `function` and hands the raw result to `then`,
    /// all inside one pause. `then` must anchor whatever it keeps.
    pub(crate) fn safe_call<R>(
        &self,
        function: Value,
        args: &[&dyn Boxable],
        then: impl FnOnce(Value) -> Result<R>,
    ) -> Result<R> {
        let _pause = self.pause();
        let args = args
            .iter()
            .map(|arg| arg.box_value(self))
            .collect::<Result<Vec<_>>>()?;
        trace!("foreign call {function:?} with {} arguments", args.len());
        let result = self.runtime().call(function, &args);
        self.forward_last_exception()?;
        then(result)
    }

    /// Resolves `source` once; the result stays anchored for the lifetime of
    /// the bridge.
    pub(crate) fn global(&self, source: &str) -> Result<Value> {
        let _lock = self.lock();
        if let Some(&value) = self.shared.globals.lock().get(source) {
            return Ok(value);
        }
        let value = self.runtime().evaluate(source);
        self.forward_last_exception()?;
        let symbol = format!("{}global#{source}", self.shared.settings.symbol_prefix);
        self.runtime().anchor(value, &symbol);
        trace!("resolved {source} as {value:?}");
        self.shared.globals.lock().insert(source.to_string(), value);
        Ok(value)
    }

    pub fn function(&self, name: &str) -> Result<Proxy> {
        let value = self.global(name)?;
        Ok(Proxy::new(self, value, None))
    }

    /// Evaluates a type expression such as `Vector{Int64}`.
    pub fn resolve_type(&self, source: &str) -> Result<Type> {
        let value = self.global(source)?;
        Type::from_value(self, value)
    }

    /// Boxes `value` and anchors the result.
    pub fn create<T: Boxable + ?Sized>(&self, value: &T) -> Result<Proxy> {
        let _pause = self.pause();
        let value = value.box_value(self)?;
        Ok(Proxy::new(self, value, None))
    }

    pub fn collect_garbage(&self) {
        let _lock = self.lock();
        debug!(
            "collecting garbage with {} proxies anchored",
            self.anchored_count()
        );
        self.runtime().collect_garbage();
    }

    /// Number of values currently anchored by live proxies.
    pub fn anchored_count(&self) -> usize {
        self.shared.bindings.lock().len()
    }

    pub(crate) fn next_symbol(&self) -> String {
        let id = self.shared.next_symbol.fetch_add(1, Ordering::Relaxed);
        format!("{}{id}", self.shared.settings.symbol_prefix)
    }

    /// Anchors `value` and returns the symbol actually bound. A symbol that
    /// is already taken gets a counter suffix.
    pub(crate) fn anchor(&self, value: Value, symbol: String) -> String {
        let _lock = self.lock();
        let mut bindings = self.shared.bindings.lock();
        let mut bound = symbol;
        while bindings.contains(&bound) {
            let id = self.shared.next_symbol.fetch_add(1, Ordering::Relaxed);
            debug!("binding {bound} is taken, suffixing #{id}");
            bound = format!("{bound}#{id}");
        }
        self.runtime().anchor(value, &bound);
        trace!("anchored {value:?} as {bound}");
        bindings.insert(bound.clone());
        bound
    }

    pub(crate) fn release(&self, symbol: &str) {
        let _lock = self.lock();
        self.runtime().unanchor(symbol);
        self.shared.bindings.lock().remove(symbol);
        trace!("released {symbol}");
    }
}
