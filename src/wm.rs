//! The `Wm` handle: hook registration, exclusive grabs, window matching,
//! and the EWMH command wrappers scripts use to act on what they observe.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use anyhow::Result;
use tracing::{error, warn};
use x11rb::protocol::xproto::{
    AtomEnum, ConfigureWindowAux, ConnectionExt, EventMask, GrabMode, GrabStatus, StackMode,
    Window,
};

use crate::core::context::Context;
use crate::keys;
use crate::matcher::{MatchSpec, RegexCache, WindowFacts};
use crate::registry::{Flow, Hook, HookHandle, HookResult, KeyInput, Registry, Slot};
use crate::signals::{SignalPipe, SignalSender};

/// _NET_WM_STATE summary for one window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WindowState {
    pub maximized_vert: bool,
    pub maximized_horz: bool,
    pub undecorated: bool,
}

/// One dispatcher instance: owns the connection facade, every handler
/// registry, and the wake-up channel. Strictly single-threaded; hooks run
/// on the dispatch thread and get `&Wm` back to mutate the registries.
pub struct Wm {
    pub(crate) ctx: Context,
    pub(crate) reg: RefCell<Registry>,
    pub(crate) signals: SignalPipe,
    regex_cache: RefCell<RegexCache>,
    startup: Cell<bool>,
    event_window: Cell<Option<Window>>,
    self_ref: Weak<Wm>,
}

impl Wm {
    /// Connect to the display named by `$DISPLAY`.
    pub fn new() -> Result<Rc<Self>> {
        Self::with_context(Context::new()?)
    }

    pub fn with_context(ctx: Context) -> Result<Rc<Self>> {
        let signals = SignalPipe::new()?;
        Ok(Rc::new_cyclic(|weak| Self {
            ctx,
            reg: RefCell::new(Registry::new()),
            signals,
            regex_cache: RefCell::new(RegexCache::new()),
            startup: Cell::new(false),
            event_window: Cell::new(None),
            self_ref: weak.clone(),
        }))
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    /// True while the startup replay is announcing pre-existing windows.
    pub fn startup(&self) -> bool {
        self.startup.get()
    }

    pub(crate) fn set_startup(&self, value: bool) {
        self.startup.set(value);
    }

    /// The window the currently dispatched event refers to.
    pub fn event_window(&self) -> Option<Window> {
        self.event_window.get()
    }

    pub(crate) fn set_event_window(&self, window: Option<Window>) {
        self.event_window.set(window);
    }

    /// A cloneable producer for the wake-up channel, usable from any thread
    /// or signal context.
    pub fn sender(&self) -> SignalSender {
        self.signals.sender()
    }

    /// Queue a named signal for the dispatch thread.
    pub fn emit(&self, name: &str) {
        self.signals.sender().emit(name);
    }

    // --- hook registration ---------------------------------------------

    /// Bind a global hotkey on the root window.
    ///
    /// The spec is `[Mod+...+]KeyName` with modifiers out of
    /// Alt, Control (Ctrl), Shift and Win (Mod). A malformed spec is logged
    /// and yields a dead handle; nothing is registered.
    pub fn on_key(
        &self,
        keydef: &str,
        hook: impl Fn(&Wm) -> HookResult + 'static,
    ) -> HookHandle {
        self.bind_key(self.ctx.root, keydef, hook)
    }

    /// Bind a hotkey scoped to one window.
    ///
    /// Each binding grabs the requested mask plus the CapsLock/NumLock
    /// variants, so lock keys never swallow it; all variants share the
    /// returned handle and are removed together.
    pub fn bind_key(
        &self,
        window: Window,
        keydef: &str,
        hook: impl Fn(&Wm) -> HookResult + 'static,
    ) -> HookHandle {
        let spec = match keys::parse_keyspec(keydef) {
            Ok(spec) => spec,
            Err(e) => {
                error!("Invalid key [{}]: {}", keydef, e);
                return HookHandle::dead();
            }
        };
        let Some(keycode) = self.ctx.keycode(spec.keysym) else {
            error!("Invalid key [{}]: no keycode for keysym {:#x}", keydef, spec.keysym);
            return HookHandle::dead();
        };

        let hook: Hook = Rc::new(hook);
        let mut pairs = Vec::with_capacity(4);
        {
            let mut reg = self.reg.borrow_mut();
            for ignored in keys::ignored_mod_masks() {
                let mask = spec.mask | ignored;
                if let Err(e) = self.ctx.grab_key(window, mask, keycode) {
                    warn!("Key grab for [{}] mask {:#x} failed: {}", keydef, mask, e);
                }
                reg.insert_key(window, mask, keycode, hook.clone());
                pairs.push((mask, keycode));
            }
        }
        let _ = self.ctx.flush();
        HookHandle::new(self.self_ref.clone(), Slot::Keys { window, pairs })
    }

    /// Run `hook` when a window appears. Skipped during the startup replay;
    /// use `on_manage` to also see the windows that already exist.
    pub fn on_create(&self, hook: impl Fn(&Wm) -> HookResult + 'static) -> HookHandle {
        self.add_create_hook(false, None, Rc::new(hook))
    }

    /// `on_create` restricted to windows matching `spec`.
    pub fn on_create_where(
        &self,
        spec: MatchSpec,
        hook: impl Fn(&Wm) -> HookResult + 'static,
    ) -> HookHandle {
        self.add_create_hook(false, Some(spec), Rc::new(hook))
    }

    /// Run `hook` for every window the dispatcher manages: the startup
    /// replay announces pre-existing windows with `startup()` true, then
    /// live creations follow with `startup()` false.
    pub fn on_manage(&self, hook: impl Fn(&Wm) -> HookResult + 'static) -> HookHandle {
        self.add_create_hook(true, None, Rc::new(hook))
    }

    /// `on_manage` restricted to windows matching `spec`.
    pub fn on_manage_where(
        &self,
        spec: MatchSpec,
        hook: impl Fn(&Wm) -> HookResult + 'static,
    ) -> HookHandle {
        self.add_create_hook(true, Some(spec), Rc::new(hook))
    }

    fn add_create_hook(&self, during_replay: bool, spec: Option<MatchSpec>, hook: Hook) -> HookHandle {
        let hook = match spec {
            Some(spec) if !spec.is_empty() => {
                let inner = hook;
                Rc::new(move |wm: &Wm| match wm.event_window() {
                    Some(window) if wm.is_match(window, &spec) => inner(wm),
                    _ => Ok(Flow::Continue),
                }) as Hook
            }
            _ => hook,
        };
        // Startup-skip wrapper outermost: a live event pays the matcher
        // check exactly once.
        let hook = if during_replay {
            hook
        } else {
            let inner = hook;
            Rc::new(move |wm: &Wm| {
                if wm.startup() {
                    Ok(Flow::Continue)
                } else {
                    inner(wm)
                }
            }) as Hook
        };
        let id = self.reg.borrow_mut().add_create(hook);
        HookHandle::new(self.self_ref.clone(), Slot::Create { id })
    }

    /// Run `hook` when `window` is destroyed. The window's whole registry
    /// footprint is purged right after the destruction chain runs.
    pub fn on_destroy(
        &self,
        window: Window,
        hook: impl Fn(&Wm) -> HookResult + 'static,
    ) -> HookHandle {
        let id = self.reg.borrow_mut().add_destroy(window, Rc::new(hook));
        HookHandle::new(self.self_ref.clone(), Slot::Destroy { window, id })
    }

    /// Run `hook` when any window changes one of `properties`.
    pub fn on_property_change(
        &self,
        properties: &[&str],
        hook: impl Fn(&Wm) -> HookResult + 'static,
    ) -> HookHandle {
        self.add_property_hook(None, properties, Rc::new(hook))
    }

    /// Run `hook` when `window` changes one of `properties`.
    pub fn on_window_property_change(
        &self,
        window: Window,
        properties: &[&str],
        hook: impl Fn(&Wm) -> HookResult + 'static,
    ) -> HookHandle {
        self.add_property_hook(Some(window), properties, Rc::new(hook))
    }

    fn add_property_hook(
        &self,
        scope: Option<Window>,
        properties: &[&str],
        hook: Hook,
    ) -> HookHandle {
        let mut atoms = Vec::with_capacity(properties.len());
        for name in properties {
            match self.ctx.atom(name) {
                Ok(atom) => atoms.push(atom),
                Err(e) => {
                    error!("Cannot intern property [{}]: {}", name, e);
                    return HookHandle::dead();
                }
            }
        }
        let mut reg = self.reg.borrow_mut();
        let id = reg.alloc_id();
        for &atom in &atoms {
            reg.add_property(atom, scope, id, hook.clone());
        }
        drop(reg);
        HookHandle::new(self.self_ref.clone(), Slot::Property { atoms, scope, id })
    }

    /// Run `hook` when `emit(name)` wakes the dispatcher.
    pub fn on_signal(
        &self,
        name: &str,
        hook: impl Fn(&Wm) -> HookResult + 'static,
    ) -> HookHandle {
        let id = self.reg.borrow_mut().add_signal(name, Rc::new(hook));
        HookHandle::new(self.self_ref.clone(), Slot::Signal { name: name.to_string(), id })
    }

    /// Run once when `run` starts, before the startup replay.
    pub fn on_init(&self, hook: impl Fn(&Wm) -> HookResult + 'static) {
        self.reg.borrow_mut().init_hooks.push(Rc::new(hook));
    }

    /// Run once while `run` tears down, after the registries are cleared.
    pub fn on_deinit(&self, hook: impl Fn(&Wm) -> HookResult + 'static) {
        self.reg.borrow_mut().deinit_hooks.push(Rc::new(hook));
    }

    // --- exclusive grabs -----------------------------------------------

    /// Grab the whole keyboard. While held, every key press and release is
    /// routed to `hook` and normal key bindings are bypassed. Fails without
    /// side effects when the slot is already held or the server refuses.
    pub fn grab_keyboard(
        &self,
        hook: impl Fn(&Wm, KeyInput) -> HookResult + 'static,
    ) -> bool {
        if self.reg.borrow().keyboard_grab.is_some() {
            return false;
        }
        let granted = self
            .ctx
            .conn
            .grab_keyboard(
                false,
                self.ctx.root,
                x11rb::CURRENT_TIME,
                GrabMode::ASYNC,
                GrabMode::ASYNC,
            )
            .ok()
            .and_then(|cookie| cookie.reply().ok())
            .is_some_and(|reply| reply.status == GrabStatus::SUCCESS);
        if !granted {
            return false;
        }
        self.reg.borrow_mut().set_keyboard_grab(Rc::new(hook))
    }

    /// Release the keyboard grab. Safe to call when not held.
    pub fn ungrab_keyboard(&self) {
        self.reg.borrow_mut().keyboard_grab = None;
        let _ = self.ctx.conn.ungrab_keyboard(x11rb::CURRENT_TIME);
        let _ = self.ctx.flush();
    }

    /// Grab the pointer exclusively. Same slot discipline as the keyboard.
    pub fn grab_pointer(&self, hook: impl Fn(&Wm) -> HookResult + 'static) -> bool {
        if self.reg.borrow().pointer_grab.is_some() {
            return false;
        }
        let granted = self
            .ctx
            .conn
            .grab_pointer(
                false,
                self.ctx.root,
                EventMask::NO_EVENT,
                GrabMode::ASYNC,
                GrabMode::ASYNC,
                x11rb::NONE,
                x11rb::NONE,
                x11rb::CURRENT_TIME,
            )
            .ok()
            .and_then(|cookie| cookie.reply().ok())
            .is_some_and(|reply| reply.status == GrabStatus::SUCCESS);
        if !granted {
            return false;
        }
        self.reg.borrow_mut().set_pointer_grab(Rc::new(hook))
    }

    /// Release the pointer grab. Safe to call when not held.
    pub fn ungrab_pointer(&self) {
        self.reg.borrow_mut().pointer_grab = None;
        let _ = self.ctx.conn.ungrab_pointer(x11rb::CURRENT_TIME);
        let _ = self.ctx.flush();
    }

    // --- matching and queries ------------------------------------------

    /// Evaluate `spec` against one window. Only the attributes the spec
    /// actually names are fetched; an absent attribute fails its criterion.
    pub fn is_match(&self, window: Window, spec: &MatchSpec) -> bool {
        let mut facts = WindowFacts::default();
        if spec.name.is_some() || spec.class.is_some() {
            if let Some((instance, class)) = self.ctx.window_class(window) {
                facts.name = Some(instance);
                facts.class = Some(class);
            }
        }
        if spec.role.is_some() {
            facts.role = self.ctx.window_role(window);
        }
        if spec.desktop.is_some() {
            facts.desktop = self.ctx.window_desktop(window);
        }
        spec.matches(&mut self.regex_cache.borrow_mut(), &facts)
    }

    /// Managed clients in the window manager's order.
    pub fn clients(&self) -> Vec<Window> {
        self.ctx
            .property_u32s(self.ctx.root, self.ctx.atoms._NET_CLIENT_LIST, AtomEnum::WINDOW)
            .unwrap_or_default()
    }

    /// Managed clients bottom-to-top; useful to judge visibility.
    pub fn stacked_clients(&self) -> Vec<Window> {
        self.ctx
            .property_u32s(
                self.ctx.root,
                self.ctx.atoms._NET_CLIENT_LIST_STACKING,
                AtomEnum::WINDOW,
            )
            .unwrap_or_default()
    }

    pub fn find_clients(&self, spec: &MatchSpec) -> Vec<Window> {
        self.clients().into_iter().filter(|&w| self.is_match(w, spec)).collect()
    }

    pub fn find_client(&self, spec: &MatchSpec) -> Option<Window> {
        self.clients().into_iter().find(|&w| self.is_match(w, spec))
    }

    /// The window currently holding input focus.
    pub fn current_window(&self) -> Option<Window> {
        self.ctx
            .property_u32s(self.ctx.root, self.ctx.atoms._NET_ACTIVE_WINDOW, AtomEnum::WINDOW)?
            .first()
            .copied()
            .filter(|&w| w != x11rb::NONE)
    }

    pub fn current_desktop(&self) -> Option<i32> {
        let values = self.ctx.property_u32s(
            self.ctx.root,
            self.ctx.atoms._NET_CURRENT_DESKTOP,
            AtomEnum::CARDINAL,
        )?;
        values.first().map(|&d| d as i32)
    }

    /// The window's desktop; -1 means it is on all desktops.
    pub fn window_desktop(&self, window: Window) -> Option<i32> {
        self.ctx.window_desktop(window)
    }

    /// Focus history, most recently focused last.
    pub fn focus_history(&self) -> Vec<Window> {
        self.reg.borrow().focus_history.clone()
    }

    pub fn window_state(&self, window: Window) -> WindowState {
        let atoms = self
            .ctx
            .property_u32s(window, self.ctx.atoms._NET_WM_STATE, AtomEnum::ATOM)
            .unwrap_or_default();
        WindowState {
            maximized_vert: atoms.contains(&self.ctx.atoms._NET_WM_STATE_MAXIMIZED_VERT),
            maximized_horz: atoms.contains(&self.ctx.atoms._NET_WM_STATE_MAXIMIZED_HORZ),
            undecorated: atoms.contains(&self.ctx.atoms._OB_WM_STATE_UNDECORATED),
        }
    }

    // --- commands -------------------------------------------------------

    pub fn activate_desktop(&self, desktop: i32) -> Result<()> {
        if desktop < 0 {
            return Ok(());
        }
        self.ctx.send_command(
            self.ctx.root,
            self.ctx.atoms._NET_CURRENT_DESKTOP,
            [desktop as u32, 0, 0, 0, 0],
        )?;
        self.ctx.flush()
    }

    /// Move `window` to `desktop`.
    pub fn change_window_desktop(&self, window: Window, desktop: i32) -> Result<()> {
        if desktop < 0 {
            return Ok(());
        }
        self.ctx.send_command(
            window,
            self.ctx.atoms._NET_WM_DESKTOP,
            [desktop as u32, 0, 0, 0, 0],
        )?;
        self.ctx.flush()
    }

    /// Switch to the window's desktop if it differs from the current one.
    /// `None` when the window carries no desktop property.
    pub fn activate_window_desktop(&self, window: Window) -> Result<Option<bool>> {
        match self.window_desktop(window) {
            Some(desktop) => {
                if self.current_desktop() != Some(desktop) {
                    self.activate_desktop(desktop)?;
                    Ok(Some(true))
                } else {
                    Ok(Some(false))
                }
            }
            None => Ok(None),
        }
    }

    /// Ask the window manager to close `window`.
    pub fn close_window(&self, window: Window) -> Result<()> {
        self.ctx.send_command(
            window,
            self.ctx.atoms._NET_CLOSE_WINDOW,
            [x11rb::CURRENT_TIME, 0, 0, 0, 0],
        )?;
        self.ctx.flush()
    }

    /// Ask the window manager to focus `window`.
    pub fn focus_window(&self, window: Window) -> Result<()> {
        // Source indication 2: a pager-style request.
        self.ctx.send_command(
            window,
            self.ctx.atoms._NET_ACTIVE_WINDOW,
            [2, x11rb::CURRENT_TIME, 0, 0, 0],
        )?;
        self.ctx.flush()
    }

    /// Switch to the window's desktop, raise it and focus it.
    pub fn focus_and_raise(&self, window: Window) -> Result<()> {
        self.activate_window_desktop(window)?;
        self.ctx.conn.configure_window(
            window,
            &ConfigureWindowAux::new().stack_mode(StackMode::ABOVE),
        )?;
        self.focus_window(window)
    }

    pub fn place_window_above(&self, window: Window) -> Result<()> {
        self.ctx.conn.configure_window(
            window,
            &ConfigureWindowAux::new().stack_mode(StackMode::ABOVE),
        )?;
        self.ctx.flush()
    }

    pub fn place_window_below(&self, window: Window) -> Result<()> {
        self.ctx.conn.configure_window(
            window,
            &ConfigureWindowAux::new().stack_mode(StackMode::BELOW),
        )?;
        self.ctx.flush()
    }

    pub fn set_skip_taskbar(&self, window: Window, skip: bool) -> Result<()> {
        self.set_state(window, skip, self.ctx.atoms._NET_WM_STATE_SKIP_TASKBAR, 0)
    }

    pub fn set_skip_pager(&self, window: Window, skip: bool) -> Result<()> {
        self.set_state(window, skip, self.ctx.atoms._NET_WM_STATE_SKIP_PAGER, 0)
    }

    pub fn set_decorated(&self, window: Window, decorated: bool) -> Result<()> {
        self.set_state(window, !decorated, self.ctx.atoms._OB_WM_STATE_UNDECORATED, 0)
    }

    pub fn set_maximized(&self, window: Window, maximized: bool) -> Result<()> {
        self.set_state(
            window,
            maximized,
            self.ctx.atoms._NET_WM_STATE_MAXIMIZED_VERT,
            self.ctx.atoms._NET_WM_STATE_MAXIMIZED_HORZ,
        )
    }

    fn set_state(&self, window: Window, add: bool, first: u32, second: u32) -> Result<()> {
        self.ctx.send_command(
            window,
            self.ctx.atoms._NET_WM_STATE,
            [u32::from(add), first, second, 0, 0],
        )?;
        self.ctx.flush()
    }
}
