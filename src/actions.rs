//! Canned hook bodies and process helpers for wiring hotkeys without
//! writing every closure by hand.

use std::os::unix::process::CommandExt;
use std::process::{Command, Stdio};

use tracing::error;

use crate::matcher::MatchSpec;
use crate::registry::{Flow, HookResult};
use crate::wm::Wm;

/// Run a shell command detached from the dispatcher: own process group, no
/// inherited stdio. Failures are logged, never propagated.
pub fn spawn(cmd: &str) {
    let spawned = Command::new("/bin/sh")
        .arg("-c")
        .arg(cmd)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .process_group(0)
        .spawn();
    match spawned {
        Ok(mut child) => {
            // Reap off-thread so the dispatch thread never waits.
            std::thread::spawn(move || {
                let _ = child.wait();
            });
        }
        Err(e) => error!("Failed to spawn [{}]: {}", cmd, e),
    }
}

/// A hook that spawns `cmd` every time it fires.
pub fn spawner(cmd: &str) -> impl Fn(&Wm) -> HookResult {
    let cmd = cmd.to_string();
    move |_wm: &Wm| {
        spawn(&cmd);
        Ok(Flow::Continue)
    }
}

/// Focus an existing window matching `spec`, or spawn `cmd` if none exists.
pub fn spawn_or_raise(wm: &Wm, spec: &MatchSpec, cmd: &str) -> HookResult {
    match wm.find_client(spec) {
        Some(window) => wm.focus_and_raise(window)?,
        None => spawn(cmd),
    }
    Ok(Flow::Continue)
}

/// Close the currently focused window.
pub fn close_focused(wm: &Wm) -> HookResult {
    if let Some(window) = wm.current_window() {
        wm.close_window(window)?;
    }
    Ok(Flow::Continue)
}

/// Focus the next client on the focused window's desktop, in client order.
pub fn focus_next(wm: &Wm) -> HookResult {
    shift_focus(wm, 1)
}

/// Focus the previous client on the focused window's desktop.
pub fn focus_prev(wm: &Wm) -> HookResult {
    shift_focus(wm, -1)
}

fn shift_focus(wm: &Wm, direction: i64) -> HookResult {
    let Some(current) = wm.current_window() else {
        return Ok(Flow::Continue);
    };
    let Some(desktop) = wm.window_desktop(current) else {
        return Ok(Flow::Continue);
    };
    let clients = wm.find_clients(&MatchSpec::new().desktop(desktop));
    let Some(index) = clients.iter().position(|&w| w == current) else {
        return Ok(Flow::Continue);
    };
    let len = clients.len() as i64;
    let next = clients[(index as i64 + direction).rem_euclid(len) as usize];
    wm.focus_and_raise(next)?;
    Ok(Flow::Continue)
}

/// A hook that stops the run loop.
pub fn stop(_wm: &Wm) -> HookResult {
    Ok(Flow::Stop)
}

/// A hook that asks the caller to restart the run loop.
pub fn restart(_wm: &Wm) -> HookResult {
    Ok(Flow::Restart)
}
