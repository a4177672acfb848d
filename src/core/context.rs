use std::cell::RefCell;
use std::collections::HashMap;

use anyhow::Result;
use x11rb::connection::Connection;
use x11rb::protocol::xproto::{
    Atom, AtomEnum, ChangeWindowAttributesAux, ClientMessageData, ClientMessageEvent,
    ConnectionExt, EventMask, Grab, GrabMode, ModMask, Window, CLIENT_MESSAGE_EVENT,
};
use x11rb::rust_connection::RustConnection;

use crate::core::atoms::AtomCollection;

/// Connection facade: owns the X session plus the lookup tables everything
/// else needs (interned atoms, keysym to keycode translation).
pub struct Context {
    pub conn: RustConnection,
    pub screen_num: usize,
    pub root: Window,
    pub atoms: AtomCollection,
    keymap: HashMap<u32, u8>,
    atom_cache: RefCell<HashMap<String, Atom>>,
}

impl Context {
    pub fn new() -> Result<Self> {
        let (conn, screen_num) = x11rb::connect(None)?;
        let screen = &conn.setup().roots[screen_num];
        let root = screen.root;

        let atoms = AtomCollection::new(&conn)?.reply()?;
        let keymap = load_keymap(&conn)?;

        Ok(Self {
            conn,
            screen_num,
            root,
            atoms,
            keymap,
            atom_cache: RefCell::new(HashMap::new()),
        })
    }

    /// Intern an atom by name, caching the reply for the process lifetime.
    pub fn atom(&self, name: &str) -> Result<Atom> {
        if let Some(&atom) = self.atom_cache.borrow().get(name) {
            return Ok(atom);
        }
        let atom = self.conn.intern_atom(false, name.as_bytes())?.reply()?.atom;
        self.atom_cache.borrow_mut().insert(name.to_string(), atom);
        Ok(atom)
    }

    pub fn atom_name(&self, atom: Atom) -> Result<String> {
        let reply = self.conn.get_atom_name(atom)?.reply()?;
        Ok(String::from_utf8_lossy(&reply.name).into_owned())
    }

    /// Translate a keysym to the server's current keycode mapping.
    pub fn keycode(&self, keysym: u32) -> Option<u8> {
        self.keymap.get(&keysym).copied()
    }

    /// Events the dispatcher needs from the root window.
    pub fn select_root_input(&self) -> Result<()> {
        let values = ChangeWindowAttributesAux::new().event_mask(EventMask::SUBSTRUCTURE_NOTIFY);
        self.conn.change_window_attributes(self.root, &values)?;
        Ok(())
    }

    /// Events the dispatcher needs from every tracked client window.
    pub fn select_client_input(&self, window: Window) -> Result<()> {
        let values = ChangeWindowAttributesAux::new().event_mask(
            EventMask::STRUCTURE_NOTIFY | EventMask::PROPERTY_CHANGE | EventMask::FOCUS_CHANGE,
        );
        self.conn.change_window_attributes(window, &values)?;
        Ok(())
    }

    /// Passive grab for one (mask, keycode) pair on `window`.
    pub fn grab_key(&self, window: Window, mask: u16, keycode: u8) -> Result<()> {
        self.conn.grab_key(
            false,
            window,
            ModMask::from(mask),
            keycode,
            GrabMode::ASYNC,
            GrabMode::ASYNC,
        )?;
        Ok(())
    }

    pub fn ungrab_key(&self, window: Window, mask: u16, keycode: u8) -> Result<()> {
        self.conn.ungrab_key(keycode, window, ModMask::from(mask))?;
        Ok(())
    }

    /// Release every passive key grab this client holds on `window`.
    pub fn ungrab_all_keys(&self, window: Window) -> Result<()> {
        self.conn.ungrab_key(Grab::ANY, window, ModMask::ANY)?;
        Ok(())
    }

    /// Read a 32-bit-format property as a list of u32 values.
    /// Absent or mismatched properties read as `None`.
    pub fn property_u32s(
        &self,
        window: Window,
        property: Atom,
        type_: impl Into<Atom>,
    ) -> Option<Vec<u32>> {
        let reply = self
            .conn
            .get_property(false, window, property, type_.into(), 0, 1024)
            .ok()?
            .reply()
            .ok()?;
        if reply.format != 32 || reply.value_len == 0 {
            return None;
        }
        reply.value32().map(|values| values.collect())
    }

    /// WM_CLASS as the (instance, class) pair.
    pub fn window_class(&self, window: Window) -> Option<(String, String)> {
        let reply = self
            .conn
            .get_property(false, window, AtomEnum::WM_CLASS, AtomEnum::STRING, 0, 1024)
            .ok()?
            .reply()
            .ok()?;
        if reply.format != 8 {
            return None;
        }
        // Two NUL-terminated strings: instance, then class.
        let mut parts = reply.value.split(|&b| b == 0);
        let instance = String::from_utf8_lossy(parts.next()?).into_owned();
        let class = String::from_utf8_lossy(parts.next()?).into_owned();
        Some((instance, class))
    }

    pub fn window_role(&self, window: Window) -> Option<String> {
        let reply = self
            .conn
            .get_property(false, window, self.atoms.WM_WINDOW_ROLE, AtomEnum::STRING, 0, 1024)
            .ok()?
            .reply()
            .ok()?;
        if reply.format != 8 || reply.value_len == 0 {
            return None;
        }
        Some(String::from_utf8_lossy(&reply.value).into_owned())
    }

    /// _NET_WM_DESKTOP; the all-desktops value reads as -1.
    pub fn window_desktop(&self, window: Window) -> Option<i32> {
        let values = self.property_u32s(window, self.atoms._NET_WM_DESKTOP, AtomEnum::CARDINAL)?;
        let desktop = *values.first()?;
        if desktop == 0xFFFF_FFFF {
            Some(-1)
        } else {
            Some(desktop as i32)
        }
    }

    /// Send a command ClientMessage to the root window, the way pagers talk
    /// to the running window manager. Up to 5 u32 parameters.
    pub fn send_command(&self, window: Window, message_type: Atom, data: [u32; 5]) -> Result<()> {
        let event = ClientMessageEvent {
            response_type: CLIENT_MESSAGE_EVENT,
            format: 32,
            sequence: 0,
            window,
            type_: message_type,
            data: ClientMessageData::from(data),
        };
        self.conn.send_event(
            false,
            self.root,
            EventMask::SUBSTRUCTURE_REDIRECT | EventMask::SUBSTRUCTURE_NOTIFY,
            event,
        )?;
        Ok(())
    }

    pub fn flush(&self) -> Result<()> {
        self.conn.flush()?;
        Ok(())
    }
}

/// Fetch the server's keyboard mapping once and index it keysym-first.
/// Columns are scanned in order so unshifted symbols win, and within a
/// column the lowest keycode wins.
fn load_keymap(conn: &RustConnection) -> Result<HashMap<u32, u8>> {
    let setup = conn.setup();
    let min = setup.min_keycode;
    let max = setup.max_keycode;
    let count = max - min + 1;
    let reply = conn.get_keyboard_mapping(min, count)?.reply()?;

    let per = reply.keysyms_per_keycode as usize;
    let mut map = HashMap::new();
    for column in 0..per {
        for (row, chunk) in reply.keysyms.chunks(per).enumerate() {
            match chunk.get(column) {
                Some(&keysym) if keysym != 0 => {
                    map.entry(keysym).or_insert(min + row as u8);
                }
                _ => {}
            }
        }
    }
    Ok(map)
}
