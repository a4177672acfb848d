//! Key spec compiler: turns `"[Mod+...+]KeyName"` strings into a modifier
//! mask plus an X keysym, and expands bindings across the lock-modifier
//! variants that must not keep a hotkey from firing.

use thiserror::Error;
use x11rb::protocol::xproto::ModMask;

/// Modifier name table. Aliases map to the same bit.
const MODIFIERS: &[(&str, ModMask)] = &[
    ("Alt", ModMask::M1),
    ("Control", ModMask::CONTROL),
    ("Ctrl", ModMask::CONTROL),
    ("Shift", ModMask::SHIFT),
    ("Win", ModMask::M4),
    ("Mod", ModMask::M4),
];

/// Mask variants a grab must cover so CapsLock and NumLock do not swallow
/// the binding: none, CapsLock, NumLock, both.
pub fn ignored_mod_masks() -> [u16; 4] {
    let lock = u16::from(ModMask::LOCK);
    let num = u16::from(ModMask::M2);
    [0, lock, num, lock | num]
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeySpecError {
    #[error("empty key spec")]
    Empty,
    #[error("unknown modifier `{0}`")]
    UnknownModifier(String),
    #[error("unknown key name `{0}`")]
    UnknownKey(String),
}

/// A parsed key spec: requested modifier mask plus the keysym still to be
/// translated through the server's keycode mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeySpec {
    pub mask: u16,
    pub keysym: u32,
}

/// Parse `"Ctrl+Alt+t"` style specs: zero or more modifier names, one key
/// name, joined by `+`.
pub fn parse_keyspec(keydef: &str) -> Result<KeySpec, KeySpecError> {
    let mut parts: Vec<&str> = keydef.split('+').collect();
    let key = parts.pop().filter(|k| !k.is_empty()).ok_or(KeySpecError::Empty)?;

    let mut mask = 0u16;
    for modifier in parts {
        let bit = MODIFIERS
            .iter()
            .find(|(name, _)| *name == modifier)
            .map(|(_, bit)| u16::from(*bit))
            .ok_or_else(|| KeySpecError::UnknownModifier(modifier.to_string()))?;
        mask |= bit;
    }

    let keysym =
        keysym_from_name(key).ok_or_else(|| KeySpecError::UnknownKey(key.to_string()))?;
    Ok(KeySpec { mask, keysym })
}

/// Resolve a key name to its X keysym. Printable ASCII names are their own
/// keysym; everything else goes through the table below.
pub fn keysym_from_name(name: &str) -> Option<u32> {
    let mut chars = name.chars();
    if let (Some(c), None) = (chars.next(), chars.next()) {
        if c.is_ascii_graphic() || c == ' ' {
            return Some(c as u32);
        }
    }
    named_keysym(name)
}

fn named_keysym(name: &str) -> Option<u32> {
    let keysym = match name {
        "BackSpace" => 0xff08,
        "Tab" => 0xff09,
        "Return" => 0xff0d,
        "Pause" => 0xff13,
        "Escape" => 0xff1b,
        "Delete" => 0xffff,
        "Home" => 0xff50,
        "Left" => 0xff51,
        "Up" => 0xff52,
        "Right" => 0xff53,
        "Down" => 0xff54,
        "Prior" | "Page_Up" => 0xff55,
        "Next" | "Page_Down" => 0xff56,
        "End" => 0xff57,
        "Print" => 0xff61,
        "Insert" => 0xff63,
        "Menu" => 0xff67,
        "KP_Enter" => 0xff8d,
        "F1" => 0xffbe,
        "F2" => 0xffbf,
        "F3" => 0xffc0,
        "F4" => 0xffc1,
        "F5" => 0xffc2,
        "F6" => 0xffc3,
        "F7" => 0xffc4,
        "F8" => 0xffc5,
        "F9" => 0xffc6,
        "F10" => 0xffc7,
        "F11" => 0xffc8,
        "F12" => 0xffc9,
        "space" => 0x20,
        "minus" => 0x2d,
        "equal" => 0x3d,
        "grave" => 0x60,
        "semicolon" => 0x3b,
        "apostrophe" => 0x27,
        "comma" => 0x2c,
        "period" => 0x2e,
        "slash" => 0x2f,
        "backslash" => 0x5c,
        "bracketleft" => 0x5b,
        "bracketright" => 0x5d,
        "XF86MonBrightnessUp" => 0x1008ff02,
        "XF86MonBrightnessDown" => 0x1008ff03,
        "XF86AudioLowerVolume" => 0x1008ff11,
        "XF86AudioMute" => 0x1008ff12,
        "XF86AudioRaiseVolume" => 0x1008ff13,
        "XF86AudioPlay" => 0x1008ff14,
        "XF86AudioStop" => 0x1008ff15,
        "XF86AudioPrev" => 0x1008ff16,
        "XF86AudioNext" => 0x1008ff17,
        "XF86Calculator" => 0x1008ff1d,
        "XF86Sleep" => 0x1008ff2f,
        _ => return None,
    };
    Some(keysym)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_key() {
        let spec = parse_keyspec("t").unwrap();
        assert_eq!(spec.mask, 0);
        assert_eq!(spec.keysym, 't' as u32);
    }

    #[test]
    fn test_parse_modifier_combo() {
        let spec = parse_keyspec("Ctrl+Alt+t").unwrap();
        assert_eq!(spec.mask, u16::from(ModMask::CONTROL) | u16::from(ModMask::M1));
        assert_eq!(spec.keysym, 't' as u32);
    }

    #[test]
    fn test_modifier_aliases_share_a_bit() {
        let control = parse_keyspec("Control+a").unwrap();
        let ctrl = parse_keyspec("Ctrl+a").unwrap();
        assert_eq!(control.mask, ctrl.mask);

        let win = parse_keyspec("Win+a").unwrap();
        let modkey = parse_keyspec("Mod+a").unwrap();
        assert_eq!(win.mask, modkey.mask);
    }

    #[test]
    fn test_unknown_modifier_is_an_error() {
        assert_eq!(
            parse_keyspec("Hyper+t"),
            Err(KeySpecError::UnknownModifier("Hyper".to_string()))
        );
    }

    #[test]
    fn test_unknown_key_is_an_error() {
        assert_eq!(
            parse_keyspec("Ctrl+NoSuchKey"),
            Err(KeySpecError::UnknownKey("NoSuchKey".to_string()))
        );
    }

    #[test]
    fn test_empty_specs() {
        assert_eq!(parse_keyspec(""), Err(KeySpecError::Empty));
        assert_eq!(parse_keyspec("Ctrl+"), Err(KeySpecError::Empty));
    }

    #[test]
    fn test_named_keysyms() {
        assert_eq!(keysym_from_name("Return"), Some(0xff0d));
        assert_eq!(keysym_from_name("F5"), Some(0xffc2));
        assert_eq!(keysym_from_name("Page_Up"), keysym_from_name("Prior"));
        assert_eq!(keysym_from_name("XF86AudioMute"), Some(0x1008ff12));
        assert_eq!(keysym_from_name("7"), Some('7' as u32));
    }

    #[test]
    fn test_ignored_masks_cover_lock_variants() {
        let masks = ignored_mod_masks();
        assert_eq!(masks.len(), 4);
        assert_eq!(masks[0], 0);
        assert_eq!(masks[3], masks[1] | masks[2]);
    }
}
