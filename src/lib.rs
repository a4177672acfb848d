//! Scriptable X11 event dispatch.
//!
//! `wmhooks` sits between a live X connection and user callbacks: it binds
//! hotkeys (expanded across CapsLock/NumLock variants so lock keys never
//! swallow them), announces window creation and destruction, watches
//! property changes, tracks focus history, and multiplexes an internal
//! wake-up channel so other threads can inject named signals onto the
//! dispatch thread. It observes a running window manager and talks to it
//! through EWMH commands; it is not a window manager itself.
//!
//! ```no_run
//! use wmhooks::{actions, Flow, Wm};
//!
//! let wm = Wm::new()?;
//! wm.on_key("Ctrl+Alt+t", actions::spawner("xterm"));
//! wm.on_signal("quit", |_| Ok(Flow::Stop));
//! wm.run()?;
//! # Ok::<(), anyhow::Error>(())
//! ```
//!
//! Dispatch is strictly single-threaded and cooperative: every hook runs on
//! the thread that called [`Wm::run`], so registries need no locking, and a
//! slow hook stalls event processing by design. The only cross-thread entry
//! point is [`SignalSender::emit`].

pub mod actions;
pub mod core;
mod dispatch;
mod keys;
mod matcher;
mod registry;
mod signals;
mod wm;

pub use dispatch::RunStatus;
pub use keys::{keysym_from_name, parse_keyspec, KeySpec, KeySpecError};
pub use matcher::MatchSpec;
pub use registry::{Flow, HookHandle, HookResult, KeyInput};
pub use signals::SignalSender;
pub use wm::{WindowState, Wm};
