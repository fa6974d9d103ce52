//! # Offload Pool
//!
//! Background work for a single-threaded engine loop.
//!
//! Rendering, UI and scripting all run on one owning thread and assume
//! serialized access to engine state. This crate moves slow work (decoding
//! models, reading assets, waiting on timers) onto a bounded pool of worker
//! threads and hands the results back to the owning thread at a safe point:
//! the owning thread's own [`Engine::tick`](core::Engine::tick).
//!
//! ## Model
//!
//! - **Function items**: a closure plus an optional callback and a
//!   [`Priority`](util::Priority). High priority items jump ahead of every
//!   normal item not yet claimed.
//! - **Tasks**: long-lived [`Task`](core::Task) objects held by the engine
//!   while queued and while running, observed through a weak
//!   [`TaskHandle`](core::TaskHandle).
//! - **Callbacks**: never run on a worker. Workers buffer them; `tick` drains
//!   the buffer on the owning thread.
//! - **Timed callbacks**: delay or repeat based, fired from `tick`.
//! - **Cancellation**: [`Engine::cancel_all`](core::Engine::cancel_all) drops
//!   unclaimed work silently and swallows callbacks of work already running.
//!
//! ```rust,ignore
//! use offload_pool::config::EngineConfig;
//! use offload_pool::core::Engine;
//! use offload_pool::util::Priority;
//! use std::time::Duration;
//!
//! let mut engine = Engine::new(EngineConfig::from_env()?)?;
//! engine.submit_with_callback(
//!     || Ok(expensive_decode()),
//!     |decoded| println!("decoded on the owning thread: {decoded:?}"),
//!     Priority::Normal,
//! )?;
//! let timer = engine.schedule_timed(|| println!("tick"), Duration::from_millis(500), true);
//!
//! loop {
//!     engine.tick();
//!     // render, handle input, ...
//! }
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Queues, registry, worker pool and the owning-thread engine.
pub mod core;
/// Engine configuration.
pub mod config;
/// Ready-made task implementations.
pub mod tasks;
/// Shared utilities.
pub mod util;
