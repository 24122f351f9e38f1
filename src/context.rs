//! Typed ambient context inherited across nested asynchronous frames.
//!
//! A context is an ordered bag of values keyed by their concrete type.
//! Nested [`begin_async`](crate::begin_async_in) frames see a merged context
//! in which the inner frame's values precede (and therefore shadow) the
//! outer frame's, while outer values of types the inner frame did not
//! provide remain discoverable.

use std::any::{type_name, Any, TypeId};
use std::cell::RefCell;
use std::fmt;
use std::sync::Arc;

/// Type-erased shared value, the storage shape for context entries.
pub(crate) type AnyArc = Arc<dyn Any + Send + Sync>;

#[derive(Clone)]
struct ContextEntry {
    type_id: TypeId,
    type_name: &'static str,
    value: AnyArc,
}

/// Ordered, typed bag of ambient values.
///
/// Lookup by type returns the first entry whose concrete type matches, so
/// entry order is the shadowing rule. The handle is cheap to clone; the
/// entry list behind it is immutable once built.
///
/// # Examples
///
/// ```rust
/// use ferrous_scope::{AmbientContext, CancelScope};
///
/// struct TraceId(&'static str);
///
/// let scope = CancelScope::new();
/// let context = AmbientContext::of(scope.clone()).with(TraceId("req-7"));
///
/// assert_eq!(context.get::<TraceId>().unwrap().0, "req-7");
/// assert!(context.get::<CancelScope>().is_some());
/// assert!(context.get::<u64>().is_none());
/// ```
#[derive(Clone, Default)]
pub struct AmbientContext {
    entries: Arc<Vec<ContextEntry>>,
}

impl AmbientContext {
    /// Creates an empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a context holding a single value.
    pub fn of<T: Send + Sync + 'static>(value: T) -> Self {
        Self::of_arc(Arc::new(value))
    }

    /// Creates a context holding a single already-shared value.
    pub fn of_arc<T: Send + Sync + 'static>(value: Arc<T>) -> Self {
        Self {
            entries: Arc::new(vec![ContextEntry {
                type_id: TypeId::of::<T>(),
                type_name: type_name::<T>(),
                value,
            }]),
        }
    }

    /// Returns a context with `value` added in front of the existing
    /// entries, so the new value shadows any previous entry of the same
    /// type.
    pub fn with<T: Send + Sync + 'static>(&self, value: T) -> Self {
        self.with_arc(Arc::new(value))
    }

    /// Like [`with`](AmbientContext::with) for an already-shared value.
    pub fn with_arc<T: Send + Sync + 'static>(&self, value: Arc<T>) -> Self {
        let mut entries = Vec::with_capacity(self.entries.len() + 1);
        entries.push(ContextEntry {
            type_id: TypeId::of::<T>(),
            type_name: type_name::<T>(),
            value,
        });
        entries.extend(self.entries.iter().cloned());
        Self { entries: Arc::new(entries) }
    }

    /// True when the context carries no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of entries, shadowed ones included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Looks up the first entry of concrete type `T`.
    pub fn get<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        let id = TypeId::of::<T>();
        self.entries
            .iter()
            .find(|entry| entry.type_id == id)
            .and_then(|entry| entry.value.clone().downcast::<T>().ok())
    }

    /// Merges this context over an enclosing one for a nested frame.
    ///
    /// - Either side empty: the other is reused as-is.
    /// - Both sides the same underlying list: reused as-is.
    /// - Otherwise the inner entries precede the outer entries, so inner
    ///   values shadow outer values at lookup while outer-only types stay
    ///   reachable.
    pub fn merged_over(&self, outer: &AmbientContext) -> AmbientContext {
        if self.is_empty() {
            return outer.clone();
        }
        if outer.is_empty() {
            return self.clone();
        }
        if Arc::ptr_eq(&self.entries, &outer.entries) {
            return outer.clone();
        }
        let mut entries = Vec::with_capacity(self.entries.len() + outer.entries.len());
        entries.extend(self.entries.iter().cloned());
        entries.extend(outer.entries.iter().cloned());
        AmbientContext { entries: Arc::new(entries) }
    }

    /// The context installed for the executing frame, or an empty context
    /// outside any frame.
    pub fn current() -> AmbientContext {
        installed()
    }
}

impl fmt::Debug for AmbientContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.entries.iter().map(|e| e.type_name))
            .finish()
    }
}

thread_local! {
    static INSTALLED: RefCell<Option<AmbientContext>> = const { RefCell::new(None) };
}

/// Queries the ambient context of the executing frame by type.
///
/// Returns the innermost value of type `T` visible to the current frame, or
/// `None` when no frame is installed or no entry matches.
///
/// # Examples
///
/// ```rust
/// use ferrous_scope::{begin_async_in, get_context, AmbientContext};
///
/// struct Settings {
///     retries: u32,
/// }
///
/// begin_async_in(AmbientContext::of(Settings { retries: 3 }), || {
///     let settings = get_context::<Settings>().expect("installed for this frame");
///     assert_eq!(settings.retries, 3);
///     Ok(())
/// })
/// .unwrap();
/// ```
pub fn get_context<T: Send + Sync + 'static>() -> Option<Arc<T>> {
    INSTALLED.with(|cell| cell.borrow().as_ref().and_then(|ctx| ctx.get::<T>()))
}

/// Clone of the installed context, empty outside any frame.
pub(crate) fn installed() -> AmbientContext {
    INSTALLED.with(|cell| cell.borrow().clone().unwrap_or_default())
}

/// Runs `f` with `context` installed, restoring the prior installation on
/// every exit path.
pub(crate) fn with_installed<R>(context: AmbientContext, f: impl FnOnce() -> R) -> R {
    struct Restore(Option<AmbientContext>);
    impl Drop for Restore {
        fn drop(&mut self) {
            let prior = self.0.take();
            INSTALLED.with(|cell| *cell.borrow_mut() = prior);
        }
    }

    let prior = INSTALLED.with(|cell| cell.borrow_mut().replace(context));
    let _restore = Restore(prior);
    f()
}

/// Snapshot of the ambient state of the capturing frame.
///
/// Callbacks delivered on a different worker (a delayed work item, a
/// transport completion handler) do not inherit the scheduling frame's
/// thread-local installation. Capture a `CoroutineState` where the work is
/// scheduled and [`restore`](CoroutineState::restore) it inside the
/// callback so `get_context` keeps answering there.
///
/// # Examples
///
/// ```rust
/// use ferrous_scope::{begin_async_in, get_context, AmbientContext, CoroutineState};
///
/// struct Tag(&'static str);
///
/// begin_async_in(AmbientContext::of(Tag("outer")), || {
///     let state = CoroutineState::save();
///     std::thread::spawn(move || {
///         state.restore(|| {
///             assert_eq!(get_context::<Tag>().unwrap().0, "outer");
///         });
///     })
///     .join()
///     .unwrap();
///     Ok(())
/// })
/// .unwrap();
/// ```
#[derive(Clone)]
pub struct CoroutineState {
    context: AmbientContext,
}

impl CoroutineState {
    /// Captures the ambient state of the executing frame.
    pub fn save() -> Self {
        Self { context: installed() }
    }

    /// Runs `f` with the captured state reinstalled, restoring the worker's
    /// prior state afterwards.
    pub fn restore<R>(&self, f: impl FnOnce() -> R) -> R {
        with_installed(self.context.clone(), f)
    }
}
