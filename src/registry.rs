//! Handler registry: the maps binding X events to user hooks, the two
//! exclusive grab slots, and the focus history. Pure bookkeeping; the
//! dispatcher and the `Wm` registration surface drive it.

use std::collections::HashMap;
use std::rc::{Rc, Weak};

use x11rb::protocol::xproto::{Atom, Window};

use crate::wm::Wm;

/// What a hook asks the dispatcher to do next. `Stop` and `Restart` are the
/// two sanctioned ways to leave the run loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Stop,
    Restart,
}

/// Hooks report faults as `Err`; faults are logged and dispatch moves on.
pub type HookResult = anyhow::Result<Flow>;

pub(crate) type Hook = Rc<dyn Fn(&Wm) -> HookResult>;

/// Raw key input forwarded to an exclusive keyboard grab.
#[derive(Debug, Clone, Copy)]
pub struct KeyInput {
    pub pressed: bool,
    pub mask: u16,
    pub keycode: u8,
}

pub(crate) type KeyGrabHook = Rc<dyn Fn(&Wm, KeyInput) -> HookResult>;

#[derive(Default)]
pub(crate) struct Registry {
    next_id: u64,
    pub key_hooks: HashMap<Window, HashMap<(u16, u8), Hook>>,
    pub property_hooks: HashMap<Atom, HashMap<Option<Window>, Vec<(u64, Hook)>>>,
    pub create_hooks: Vec<(u64, Hook)>,
    pub destroy_hooks: HashMap<Window, Vec<(u64, Hook)>>,
    pub signal_hooks: HashMap<String, Vec<(u64, Hook)>>,
    pub init_hooks: Vec<Hook>,
    pub deinit_hooks: Vec<Hook>,
    pub keyboard_grab: Option<KeyGrabHook>,
    pub pointer_grab: Option<Hook>,
    pub focus_history: Vec<Window>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    pub fn insert_key(&mut self, window: Window, mask: u16, keycode: u8, hook: Hook) {
        // At most one hook per (window, mask, code); insertion replaces.
        self.key_hooks.entry(window).or_default().insert((mask, keycode), hook);
    }

    pub fn key_hook(&self, window: Window, mask: u16, keycode: u8) -> Option<Hook> {
        self.key_hooks.get(&window)?.get(&(mask, keycode)).cloned()
    }

    pub fn add_create(&mut self, hook: Hook) -> u64 {
        let id = self.alloc_id();
        self.create_hooks.push((id, hook));
        id
    }

    pub fn add_destroy(&mut self, window: Window, hook: Hook) -> u64 {
        let id = self.alloc_id();
        self.destroy_hooks.entry(window).or_default().push((id, hook));
        id
    }

    pub fn add_property(&mut self, atom: Atom, scope: Option<Window>, id: u64, hook: Hook) {
        self.property_hooks
            .entry(atom)
            .or_default()
            .entry(scope)
            .or_default()
            .push((id, hook));
    }

    pub fn add_signal(&mut self, name: &str, hook: Hook) -> u64 {
        let id = self.alloc_id();
        self.signal_hooks.entry(name.to_string()).or_default().push((id, hook));
        id
    }

    /// Acquire the exclusive keyboard grab slot. Fails fast when held.
    pub fn set_keyboard_grab(&mut self, hook: KeyGrabHook) -> bool {
        if self.keyboard_grab.is_some() {
            return false;
        }
        self.keyboard_grab = Some(hook);
        true
    }

    pub fn set_pointer_grab(&mut self, hook: Hook) -> bool {
        if self.pointer_grab.is_some() {
            return false;
        }
        self.pointer_grab = Some(hook);
        true
    }

    /// Move `window` to the most-recent end of the focus history, never
    /// duplicating an entry.
    pub fn note_focus(&mut self, window: Window) {
        self.focus_history.retain(|&w| w != window);
        self.focus_history.push(window);
    }

    /// Drop every entry keyed by a destroyed window. Returns the freed
    /// (mask, keycode) pairs so the caller can release the matching grabs.
    pub fn purge_window(&mut self, window: Window) -> Vec<(u16, u8)> {
        let freed = self
            .key_hooks
            .remove(&window)
            .map(|hooks| hooks.into_keys().collect())
            .unwrap_or_default();

        self.destroy_hooks.remove(&window);
        self.focus_history.retain(|&w| w != window);

        self.property_hooks.retain(|_, scopes| {
            scopes.remove(&Some(window));
            !scopes.is_empty()
        });

        freed
    }

    pub fn clear(&mut self) {
        self.key_hooks.clear();
        self.property_hooks.clear();
        self.create_hooks.clear();
        self.destroy_hooks.clear();
        self.signal_hooks.clear();
        self.init_hooks.clear();
        self.deinit_hooks.clear();
        self.keyboard_grab = None;
        self.pointer_grab = None;
        self.focus_history.clear();
    }

    // Chain snapshots. Dispatch iterates these clones so a hook removing
    // itself (or registering new hooks) cannot corrupt the iteration.

    pub fn create_chain(&self) -> Vec<Hook> {
        self.create_hooks.iter().map(|(_, h)| h.clone()).collect()
    }

    pub fn destroy_chain(&self, window: Window) -> Vec<Hook> {
        self.destroy_hooks
            .get(&window)
            .map(|hooks| hooks.iter().map(|(_, h)| h.clone()).collect())
            .unwrap_or_default()
    }

    /// Window-scoped subscribers first, then the any-window subscribers.
    pub fn property_chain(&self, atom: Atom, window: Window) -> Vec<Hook> {
        let mut chain = Vec::new();
        if let Some(scopes) = self.property_hooks.get(&atom) {
            if let Some(hooks) = scopes.get(&Some(window)) {
                chain.extend(hooks.iter().map(|(_, h)| h.clone()));
            }
            if let Some(hooks) = scopes.get(&None) {
                chain.extend(hooks.iter().map(|(_, h)| h.clone()));
            }
        }
        chain
    }

    pub fn signal_chain(&self, name: &str) -> Vec<Hook> {
        self.signal_hooks
            .get(name)
            .map(|hooks| hooks.iter().map(|(_, h)| h.clone()).collect())
            .unwrap_or_default()
    }

    // Removal paths used by `HookHandle`. All are no-ops when the entry is
    // already gone.

    pub fn remove_key_pairs(&mut self, window: Window, pairs: &[(u16, u8)]) -> Vec<(u16, u8)> {
        let Some(hooks) = self.key_hooks.get_mut(&window) else {
            return Vec::new();
        };
        let mut removed = Vec::new();
        for pair in pairs {
            if hooks.remove(pair).is_some() {
                removed.push(*pair);
            }
        }
        if hooks.is_empty() {
            self.key_hooks.remove(&window);
        }
        removed
    }

    pub fn remove_create(&mut self, id: u64) {
        self.create_hooks.retain(|(hook_id, _)| *hook_id != id);
    }

    pub fn remove_destroy(&mut self, window: Window, id: u64) {
        if let Some(hooks) = self.destroy_hooks.get_mut(&window) {
            hooks.retain(|(hook_id, _)| *hook_id != id);
            if hooks.is_empty() {
                self.destroy_hooks.remove(&window);
            }
        }
    }

    pub fn remove_property(&mut self, atoms: &[Atom], scope: Option<Window>, id: u64) {
        for atom in atoms {
            if let Some(scopes) = self.property_hooks.get_mut(atom) {
                if let Some(hooks) = scopes.get_mut(&scope) {
                    hooks.retain(|(hook_id, _)| *hook_id != id);
                    if hooks.is_empty() {
                        scopes.remove(&scope);
                    }
                }
                if scopes.is_empty() {
                    self.property_hooks.remove(atom);
                }
            }
        }
    }

    pub fn remove_signal(&mut self, name: &str, id: u64) {
        if let Some(hooks) = self.signal_hooks.get_mut(name) {
            hooks.retain(|(hook_id, _)| *hook_id != id);
            if hooks.is_empty() {
                self.signal_hooks.remove(name);
            }
        }
    }
}

/// Where a registration lives, for later removal.
pub(crate) enum Slot {
    /// All mask variants of one logical key binding.
    Keys { window: Window, pairs: Vec<(u16, u8)> },
    Create { id: u64 },
    Destroy { window: Window, id: u64 },
    Property { atoms: Vec<Atom>, scope: Option<Window>, id: u64 },
    Signal { name: String, id: u64 },
    /// Registration failed; nothing to remove.
    Dead,
}

/// Removal capability returned by every registration. `remove` is
/// idempotent and safe to call from inside a running hook.
pub struct HookHandle {
    wm: Weak<Wm>,
    slot: Slot,
}

impl HookHandle {
    pub(crate) fn new(wm: Weak<Wm>, slot: Slot) -> Self {
        Self { wm, slot }
    }

    pub(crate) fn dead() -> Self {
        Self { wm: Weak::new(), slot: Slot::Dead }
    }

    /// True when the registration actually took effect.
    pub fn is_active(&self) -> bool {
        !matches!(self.slot, Slot::Dead)
    }

    pub fn remove(&self) {
        let Some(wm) = self.wm.upgrade() else {
            return;
        };
        match &self.slot {
            Slot::Dead => {}
            Slot::Keys { window, pairs } => {
                let removed = wm.reg.borrow_mut().remove_key_pairs(*window, pairs);
                for (mask, keycode) in removed {
                    let _ = wm.ctx.ungrab_key(*window, mask, keycode);
                }
                let _ = wm.ctx.flush();
            }
            Slot::Create { id } => wm.reg.borrow_mut().remove_create(*id),
            Slot::Destroy { window, id } => wm.reg.borrow_mut().remove_destroy(*window, *id),
            Slot::Property { atoms, scope, id } => {
                wm.reg.borrow_mut().remove_property(atoms, *scope, *id)
            }
            Slot::Signal { name, id } => wm.reg.borrow_mut().remove_signal(name, *id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hook() -> Hook {
        Rc::new(|_: &Wm| Ok(Flow::Continue))
    }

    fn grab_hook() -> KeyGrabHook {
        Rc::new(|_: &Wm, _: KeyInput| Ok(Flow::Continue))
    }

    #[test]
    fn test_key_binding_replaces_on_reinsert() {
        let mut reg = Registry::new();
        reg.insert_key(7, 0x8, 28, hook());
        reg.insert_key(7, 0x8, 28, hook());
        assert_eq!(reg.key_hooks[&7].len(), 1);
        assert!(reg.key_hook(7, 0x8, 28).is_some());
        assert!(reg.key_hook(7, 0x9, 28).is_none());
    }

    #[test]
    fn test_remove_key_pairs_is_idempotent() {
        let mut reg = Registry::new();
        let pairs = [(0u16, 28u8), (2, 28)];
        for &(mask, code) in &pairs {
            reg.insert_key(7, mask, code, hook());
        }
        assert_eq!(reg.remove_key_pairs(7, &pairs).len(), 2);
        assert_eq!(reg.remove_key_pairs(7, &pairs).len(), 0);
        assert!(!reg.key_hooks.contains_key(&7));
    }

    #[test]
    fn test_lock_variants_fire_but_unrelated_masks_do_not() {
        let mut reg = Registry::new();
        let base = 0x4 | 0x8; // Control | Mod1
        for ignored in crate::keys::ignored_mod_masks() {
            reg.insert_key(42, base | ignored, 28, hook());
        }
        // CapsLock held: still resolves to a hook.
        assert!(reg.key_hook(42, base | 0x2, 28).is_some());
        // Shift is not an ignorable modifier.
        assert!(reg.key_hook(42, base | 0x1, 28).is_none());
        assert!(reg.key_hook(42, 0x8, 28).is_none());
    }

    #[test]
    fn test_dead_handle_is_inert() {
        let handle = HookHandle::dead();
        assert!(!handle.is_active());
        handle.remove();
        handle.remove();
    }

    #[test]
    fn test_create_hooks_keep_registration_order() {
        let mut reg = Registry::new();
        let first = reg.add_create(hook());
        let second = reg.add_create(hook());
        assert!(first < second);
        assert_eq!(reg.create_chain().len(), 2);

        reg.remove_create(first);
        reg.remove_create(first);
        assert_eq!(reg.create_chain().len(), 1);
    }

    #[test]
    fn test_property_chain_orders_scoped_before_global() {
        let mut reg = Registry::new();
        let atom: Atom = 301;
        let global = reg.alloc_id();
        reg.add_property(atom, None, global, hook());
        let scoped = reg.alloc_id();
        reg.add_property(atom, Some(9), scoped, hook());

        assert_eq!(reg.property_chain(atom, 9).len(), 2);
        // A window without a scoped entry still reaches the global hook.
        assert_eq!(reg.property_chain(atom, 10).len(), 1);
        assert_eq!(reg.property_chain(302, 9).len(), 0);
    }

    #[test]
    fn test_remove_property_prunes_empty_maps() {
        let mut reg = Registry::new();
        let atoms = [301, 302];
        let id = reg.alloc_id();
        for &atom in &atoms {
            reg.add_property(atom, Some(9), id, hook());
        }
        reg.remove_property(&atoms, Some(9), id);
        assert!(reg.property_hooks.is_empty());
        // Second removal is a no-op.
        reg.remove_property(&atoms, Some(9), id);
    }

    #[test]
    fn test_purge_window_leaves_no_trace() {
        let mut reg = Registry::new();
        let win: Window = 9;
        reg.insert_key(win, 0, 28, hook());
        reg.insert_key(win, 2, 28, hook());
        reg.add_destroy(win, hook());
        reg.note_focus(win);
        let id = reg.alloc_id();
        reg.add_property(301, Some(win), id, hook());
        let other = reg.alloc_id();
        reg.add_property(301, None, other, hook());

        let freed = reg.purge_window(win);
        assert_eq!(freed.len(), 2);
        assert!(!reg.key_hooks.contains_key(&win));
        assert!(!reg.destroy_hooks.contains_key(&win));
        assert!(!reg.focus_history.contains(&win));
        assert!(reg.property_hooks[&301].get(&Some(win)).is_none());
        // The any-window subscriber survives.
        assert_eq!(reg.property_chain(301, 10).len(), 1);

        // Purging an unknown window frees nothing.
        assert!(reg.purge_window(1234).is_empty());
    }

    #[test]
    fn test_purge_window_drops_emptied_property_atom() {
        let mut reg = Registry::new();
        let id = reg.alloc_id();
        reg.add_property(301, Some(9), id, hook());
        reg.purge_window(9);
        assert!(reg.property_hooks.is_empty());
    }

    #[test]
    fn test_focus_history_moves_to_tail() {
        let mut reg = Registry::new();
        reg.note_focus(1);
        reg.note_focus(2);
        reg.note_focus(1);
        assert_eq!(reg.focus_history, vec![2, 1]);
    }

    #[test]
    fn test_keyboard_grab_slot_is_exclusive() {
        let mut reg = Registry::new();
        assert!(reg.set_keyboard_grab(grab_hook()));
        assert!(!reg.set_keyboard_grab(grab_hook()));
        reg.keyboard_grab = None;
        assert!(reg.set_keyboard_grab(grab_hook()));
    }

    #[test]
    fn test_pointer_grab_slot_is_exclusive() {
        let mut reg = Registry::new();
        assert!(reg.set_pointer_grab(hook()));
        assert!(!reg.set_pointer_grab(hook()));
    }

    #[test]
    fn test_signal_hooks_remove_by_id() {
        let mut reg = Registry::new();
        let first = reg.add_signal("reload", hook());
        let _second = reg.add_signal("reload", hook());
        assert_eq!(reg.signal_chain("reload").len(), 2);

        reg.remove_signal("reload", first);
        assert_eq!(reg.signal_chain("reload").len(), 1);
        reg.remove_signal("reload", first);
        assert_eq!(reg.signal_chain("reload").len(), 1);
        assert!(reg.signal_chain("other").is_empty());
    }

    #[test]
    fn test_clear_empties_everything() {
        let mut reg = Registry::new();
        reg.insert_key(7, 0, 28, hook());
        reg.add_create(hook());
        reg.add_destroy(7, hook());
        reg.add_signal("reload", hook());
        reg.note_focus(7);
        reg.set_keyboard_grab(grab_hook());

        reg.clear();
        assert!(reg.key_hooks.is_empty());
        assert!(reg.create_hooks.is_empty());
        assert!(reg.destroy_hooks.is_empty());
        assert!(reg.signal_hooks.is_empty());
        assert!(reg.focus_history.is_empty());
        assert!(reg.keyboard_grab.is_none());
    }
}
