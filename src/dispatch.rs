//! The run loop: multiplex the X connection and the wake-up channel, drain
//! queued events, route each to its handler chain, and keep one window's
//! registry footprint from outliving the window.

use std::os::fd::{AsFd, AsRawFd};

use anyhow::Result;
use tracing::{debug, error, info};
use x11rb::connection::Connection;
use x11rb::protocol::xproto::{ConnectionExt, Property, Window};
use x11rb::protocol::Event;

use crate::registry::{Flow, Hook, KeyInput};
use crate::signals::wait_readable;
use crate::wm::Wm;

/// How the run loop ended. `Restarted` invites the caller to re-register
/// its hooks and call `run` again; `Stopped` means exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Stopped,
    Restarted,
}

impl Flow {
    fn exit_status(self) -> Option<RunStatus> {
        match self {
            Flow::Continue => None,
            Flow::Stop => Some(RunStatus::Stopped),
            Flow::Restart => Some(RunStatus::Restarted),
        }
    }
}

impl Wm {
    /// Dispatch events until a hook asks to stop or restart.
    ///
    /// Before blocking for the first time, every window the session already
    /// manages is announced through the creation chain with `startup()`
    /// true; there is no second replay. On both exit paths the registries
    /// are cleared, so a restart begins from a clean slate.
    pub fn run(&self) -> Result<RunStatus> {
        self.ctx.select_root_input()?;

        let init: Vec<Hook> = self.reg.borrow().init_hooks.clone();
        for hook in &init {
            if let Some(status) = self.run_hook(hook, "init").exit_status() {
                return Ok(self.teardown(status));
            }
        }

        self.set_startup(true);
        for window in self.clients() {
            if let Some(status) = self.announce_window(window).exit_status() {
                self.set_startup(false);
                return Ok(self.teardown(status));
            }
        }
        self.set_startup(false);
        self.ctx.flush()?;

        info!("Dispatching events on screen {}", self.ctx.screen_num);

        let conn_fd = self.ctx.conn.stream().as_fd().as_raw_fd();
        let signal_fd = self.signals.fd();

        loop {
            // Drain every queued event before blocking again; one readiness
            // wake-up can stand for many events.
            while let Some(event) = self.ctx.conn.poll_for_event()? {
                if let Some(status) = self.route(event).exit_status() {
                    return Ok(self.teardown(status));
                }
            }
            self.ctx.flush()?;

            let ready = wait_readable(conn_fd, signal_fd)?;
            if ready.signals {
                for name in self.signals.drain() {
                    if let Some(status) = self.dispatch_signal(&name).exit_status() {
                        return Ok(self.teardown(status));
                    }
                }
            }
            // A readable connection is picked up by the drain above.
        }
    }

    fn route(&self, event: Event) -> Flow {
        match event {
            Event::KeyPress(e) => {
                // An exclusive keyboard grab bypasses binding lookup.
                let grab = self.reg.borrow().keyboard_grab.clone();
                if let Some(hook) = grab {
                    let input =
                        KeyInput { pressed: true, mask: e.state.into(), keycode: e.detail };
                    return self.run_grab_hook(&hook, input);
                }
                let hook = self.reg.borrow().key_hook(e.event, e.state.into(), e.detail);
                match hook {
                    Some(hook) => {
                        self.set_event_window(Some(e.event));
                        self.run_hook(&hook, "key")
                    }
                    None => Flow::Continue,
                }
            }
            Event::KeyRelease(e) => {
                // Releases only matter to a held keyboard grab.
                let grab = self.reg.borrow().keyboard_grab.clone();
                match grab {
                    Some(hook) => {
                        let input =
                            KeyInput { pressed: false, mask: e.state.into(), keycode: e.detail };
                        self.run_grab_hook(&hook, input)
                    }
                    None => Flow::Continue,
                }
            }
            Event::CreateNotify(e) => self.announce_window(e.window),
            Event::DestroyNotify(e) => {
                self.set_event_window(Some(e.window));
                let chain = self.reg.borrow().destroy_chain(e.window);
                let flow = self.dispatch_chain(&chain, "destroy");
                // The cleaner runs whether or not listeners existed or
                // faulted; nothing keyed by this window may survive it.
                self.cleanup_window(e.window);
                flow
            }
            Event::PropertyNotify(e) => {
                if e.state != Property::NEW_VALUE {
                    return Flow::Continue;
                }
                let chain = self.reg.borrow().property_chain(e.atom, e.window);
                if chain.is_empty() {
                    return Flow::Continue;
                }
                self.set_event_window(Some(e.window));
                self.dispatch_chain(&chain, "property")
            }
            Event::FocusIn(e) => {
                self.reg.borrow_mut().note_focus(e.event);
                Flow::Continue
            }
            Event::Error(e) => {
                error!(
                    "X11 error {:?} (sequence {}, opcode {}:{}, value {:#x})",
                    e.error_kind, e.sequence, e.major_opcode, e.minor_opcode, e.bad_value
                );
                Flow::Continue
            }
            _ => Flow::Continue,
        }
    }

    /// Track a new window and run the creation chain for it: input interest
    /// first, then listeners in registration order.
    pub(crate) fn announce_window(&self, window: Window) -> Flow {
        if let Err(e) = self.ctx.select_client_input(window) {
            debug!("Cannot select input on window {:#x}: {}", window, e);
        }
        self.set_event_window(Some(window));
        let chain = self.reg.borrow().create_chain();
        self.dispatch_chain(&chain, "create")
    }

    fn dispatch_signal(&self, name: &str) -> Flow {
        let chain = self.reg.borrow().signal_chain(name);
        if chain.is_empty() {
            debug!("No hooks registered for signal [{}]", name);
            return Flow::Continue;
        }
        self.set_event_window(None);
        self.dispatch_chain(&chain, "signal")
    }

    /// Run a snapshot of one handler chain. A faulting hook is logged and
    /// the chain continues; `Stop`/`Restart` short-circuit.
    fn dispatch_chain(&self, chain: &[Hook], what: &str) -> Flow {
        for hook in chain {
            match hook(self) {
                Ok(Flow::Continue) => {}
                Ok(flow) => return flow,
                Err(e) => error!("{} hook failed: {:#}", what, e),
            }
        }
        Flow::Continue
    }

    fn run_hook(&self, hook: &Hook, what: &str) -> Flow {
        match hook(self) {
            Ok(flow) => flow,
            Err(e) => {
                error!("{} hook failed: {:#}", what, e);
                Flow::Continue
            }
        }
    }

    fn run_grab_hook(&self, hook: &crate::registry::KeyGrabHook, input: KeyInput) -> Flow {
        match hook(self, input) {
            Ok(flow) => flow,
            Err(e) => {
                error!("keyboard grab hook failed: {:#}", e);
                Flow::Continue
            }
        }
    }

    /// Purge every registry entry keyed by a destroyed window and release
    /// the grabs that backed its key bindings, best-effort.
    fn cleanup_window(&self, window: Window) {
        let freed = self.reg.borrow_mut().purge_window(window);
        for (mask, keycode) in freed {
            let _ = self.ctx.ungrab_key(window, mask, keycode);
        }
        let _ = self.ctx.flush();
    }

    fn teardown(&self, status: RunStatus) -> RunStatus {
        let deinit: Vec<Hook> = self.reg.borrow().deinit_hooks.clone();
        self.reg.borrow_mut().clear();

        if status == RunStatus::Restarted {
            // The next run re-registers from scratch; drop what we grabbed.
            let _ = self.ctx.ungrab_all_keys(self.ctx.root);
            for window in self.clients() {
                let _ = self.ctx.ungrab_all_keys(window);
            }
            let _ = self.ctx.conn.ungrab_keyboard(x11rb::CURRENT_TIME);
            let _ = self.ctx.conn.ungrab_pointer(x11rb::CURRENT_TIME);
        }

        for hook in &deinit {
            if let Err(e) = hook(self) {
                error!("deinit hook failed: {:#}", e);
            }
        }
        let _ = self.ctx.flush();
        info!("Run loop finished: {:?}", status);
        status
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flow_exit_status() {
        assert_eq!(Flow::Continue.exit_status(), None);
        assert_eq!(Flow::Stop.exit_status(), Some(RunStatus::Stopped));
        assert_eq!(Flow::Restart.exit_status(), Some(RunStatus::Restarted));
    }
}
