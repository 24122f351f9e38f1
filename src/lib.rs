//! # ferrous-scope
//!
//! Structured cancellation scopes, timeouts, and typed ambient context for
//! callback-driven asynchronous Rust.
//!
//! The crate turns callback APIs into direct-style code with two
//! primitives ([`begin_async`] starts an asynchronous body,
//! [`suspend_async`] parks it until an adapter delivers a value) and adds
//! the pieces that make such code governable: a [`CancelScope`] that fans
//! `cancel()` out to everything a suspension registered, timeouts that fire
//! that same cancel, subscopes cancelled transitively by their parents, and
//! an [`AmbientContext`] that carries typed values (the scope itself, a
//! [`WorkQueue`], your own types) to the leaves of nested computations
//! without parameter threading.
//!
//! ## Features
//!
//! - **Broadcast cancellation**: one `cancel()` reaches every registered
//!   [`Cancellable`], in registration order, exactly once per call
//! - **Timeouts**: a scope timer is just a scheduled `cancel()`; re-armable
//! - **Subscope nesting**: scopes are cancellables, so a child registers
//!   with its parent; parent cancels cascade down, child cancels stay put
//! - **Typed ambient context**: by-type lookup with inner-shadows-outer
//!   merging across nested bodies
//! - **Race-safe resumption**: a real value or error always beats a
//!   concurrent cancellation; misuse (double resume, resume after failure)
//!   is a programmer error and fails fast
//!
//! The handoff is deliberately blocking: a suspended body parks its pool
//! worker. That is the prototype's acknowledged cost, and the contracts are
//! written so a green-thread or generator implementation can replace the
//! mechanism without changing what body code observes.
//!
//! ## Quick Start
//!
//! ```rust
//! use ferrous_scope::{begin_async_in, get_context, suspend_async};
//! use ferrous_scope::{AmbientContext, CancelScope, WorkQueue};
//! use std::sync::mpsc;
//! use std::time::Duration;
//!
//! // The scope and the queue ride the ambient context into the body.
//! let scope = CancelScope::new();
//! let context = AmbientContext::of(scope).with(WorkQueue::new());
//! let (tx, rx) = mpsc::channel();
//!
//! begin_async_in(context, move || {
//!     let answer: u32 = suspend_async(|resume, _fail| {
//!         let queue = get_context::<WorkQueue>().unwrap();
//!         let scope = get_context::<CancelScope>().unwrap();
//!         let item = queue.schedule_after(Duration::from_millis(10), move || {
//!             resume.resume(42);
//!         });
//!         scope.add(item);
//!     })?;
//!     tx.send(answer).unwrap();
//!     Ok(())
//! })
//! .unwrap();
//!
//! assert_eq!(rx.recv().unwrap(), 42);
//! ```
//!
//! ## Timeouts
//!
//! A timeout is a cancel on a timer. Here the work needs 500ms but the
//! scope allows 25ms, so the suspension fails with a cancellation and the
//! delayed item never runs:
//!
//! ```rust
//! use ferrous_scope::{begin_async_with, get_context, suspend_async};
//! use ferrous_scope::{AmbientContext, CancelScope, WorkQueue};
//! use std::sync::mpsc;
//! use std::time::Duration;
//!
//! let scope = CancelScope::with_timeout(Duration::from_millis(25));
//! let context = AmbientContext::of(scope).with(WorkQueue::new());
//! let (tx, rx) = mpsc::channel();
//!
//! begin_async_with(
//!     context,
//!     move |error| tx.send(error).unwrap(),
//!     || {
//!         let _: u32 = suspend_async(|resume, _fail| {
//!             let queue = get_context::<WorkQueue>().unwrap();
//!             let scope = get_context::<CancelScope>().unwrap();
//!             let item = queue
//!                 .schedule_after(Duration::from_millis(500), move || resume.resume(1));
//!             scope.add(item);
//!         })?;
//!         Ok(())
//!     },
//! )
//! .unwrap();
//!
//! assert!(rx.recv().unwrap().is_cancelled());
//! ```
//!
//! ## Nesting
//!
//! Contexts merge across nested bodies (inner values shadow outer values
//! of the same type, everything else stays visible), and a parent scope's
//! cancel reaches work registered arbitrarily deep, because each
//! [`make_subscope`](CancelScope::make_subscope) child is itself registered
//! as a cancellable of its parent.

// Module declarations
pub mod cancellable;
pub mod context;
pub mod error;
pub mod future;
pub mod queue;
pub mod scope;
pub mod task;

// Internal modules
mod pool;
mod suspension;

// Re-export core types
pub use cancellable::{Cancellable, RequestHandle, RequestState};
pub use context::{get_context, AmbientContext, CoroutineState};
pub use error::{TaskError, TaskResult};
pub use future::TaskFuture;
pub use queue::{DelayedTask, WorkQueue};
pub use scope::CancelScope;
pub use suspension::{Fail, Resume};
pub use task::{begin_async, begin_async_in, begin_async_with, suspend_async, suspend_async_value};
