//! Key decoding for terminal input
//!
//! Converts the raw VT byte stream a browser terminal sends into key events.
//! Chunks may split UTF-8 characters and escape sequences anywhere, so the
//! decoder keeps an incomplete tail between calls.

use bitflags::bitflags;

/// Longest incomplete sequence kept between chunks
const MAX_PENDING: usize = 32;

bitflags! {
    /// Modifier keys
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct Modifiers: u8 {
        const SHIFT = 0b0001;
        const CTRL  = 0b0010;
        const ALT   = 0b0100;
    }
}

impl Modifiers {
    /// Decode an xterm modifier parameter (`1 + shift + 2*alt + 4*ctrl`)
    fn from_xterm_code(code: u16) -> Self {
        let bits = code.saturating_sub(1);
        let mut mods = Modifiers::empty();
        if bits & 1 != 0 {
            mods |= Modifiers::SHIFT;
        }
        if bits & 2 != 0 {
            mods |= Modifiers::ALT;
        }
        if bits & 4 != 0 {
            mods |= Modifiers::CTRL;
        }
        mods
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeyCode {
    Char(char),
    Enter,
    Backspace,
    Tab,
    BackTab,
    Esc,
    Up,
    Down,
    Left,
    Right,
    Home,
    End,
    PageUp,
    PageDown,
    Insert,
    Delete,
    F(u8),
}

/// A decoded key press
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Key {
    pub code: KeyCode,
    pub modifiers: Modifiers,
}

impl Key {
    pub fn new(code: KeyCode, modifiers: Modifiers) -> Self {
        Self { code, modifiers }
    }

    pub fn plain(code: KeyCode) -> Self {
        Self::new(code, Modifiers::empty())
    }

    fn ctrl(ch: char) -> Self {
        Self::new(KeyCode::Char(ch), Modifiers::CTRL)
    }
}

enum Parsed {
    Key(Key, usize),
    Skip(usize),
    Incomplete,
}

/// Stateful byte-to-key decoder
#[derive(Debug, Default)]
pub struct KeyDecoder {
    pending: Vec<u8>,
    /// ESC ended the previous chunk
    held_esc: bool,
    /// Inside an overlong CSI sequence, skipping through its final byte
    discarding: bool,
}

impl KeyDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode a chunk of input, returning every complete key in it
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<Key> {
        let mut keys = Vec::new();

        // A held ESC only joins the next chunk if that chunk continues a sequence
        if std::mem::take(&mut self.held_esc) {
            match bytes.first() {
                Some(b'[') | Some(b'O') => self.pending.push(0x1B),
                Some(_) => keys.push(Key::plain(KeyCode::Esc)),
                None => self.held_esc = true,
            }
        }
        self.pending.extend_from_slice(bytes);

        let mut pos = 0;
        while pos < self.pending.len() {
            if self.discarding {
                let (len, finished) = Self::skip_csi_tail(&self.pending[pos..]);
                pos += len;
                self.discarding = !finished;
                continue;
            }
            match Self::parse(&self.pending[pos..]) {
                Parsed::Key(key, len) => {
                    keys.push(key);
                    pos += len;
                }
                Parsed::Skip(len) => pos += len,
                Parsed::Incomplete if self.pending[pos..] == [0x1B] => {
                    self.held_esc = true;
                    pos += 1;
                }
                // Only a CSI sequence can grow this long
                Parsed::Incomplete if self.pending.len() - pos > MAX_PENDING => {
                    self.discarding = true;
                    pos = self.pending.len();
                }
                Parsed::Incomplete => break,
            }
        }
        self.pending.drain(..pos);
        keys
    }

    /// Length of the rest of an abandoned CSI sequence, through its final
    /// byte, and whether the sequence ended within `buf`
    fn skip_csi_tail(buf: &[u8]) -> (usize, bool) {
        for (i, &c) in buf.iter().enumerate() {
            match c {
                0x20..=0x3F => {}
                0x40..=0x7E => return (i + 1, true),
                _ => return (i, true),
            }
        }
        (buf.len(), false)
    }

    fn parse(buf: &[u8]) -> Parsed {
        let b = buf[0];
        match b {
            0x1B => Self::parse_escape(buf),
            b'\r' if buf.get(1) == Some(&b'\n') => Parsed::Key(Key::plain(KeyCode::Enter), 2),
            b'\r' | b'\n' => Parsed::Key(Key::plain(KeyCode::Enter), 1),
            b'\t' => Parsed::Key(Key::plain(KeyCode::Tab), 1),
            0x7F | 0x08 => Parsed::Key(Key::plain(KeyCode::Backspace), 1),
            0x00 => Parsed::Key(Key::ctrl(' '), 1),
            0x01..=0x1A => Parsed::Key(Key::ctrl((b - 1 + b'a') as char), 1),
            0x1C => Parsed::Key(Key::ctrl('\\'), 1),
            0x1D => Parsed::Key(Key::ctrl(']'), 1),
            0x1E => Parsed::Key(Key::ctrl('^'), 1),
            0x1F => Parsed::Key(Key::ctrl('_'), 1),
            0x20..=0x7E => Parsed::Key(Key::plain(KeyCode::Char(b as char)), 1),
            _ => Self::parse_utf8(buf),
        }
    }

    fn parse_escape(buf: &[u8]) -> Parsed {
        match buf.get(1) {
            // Held until the next chunk shows whether a sequence follows
            None => Parsed::Incomplete,
            Some(0x1B) => Parsed::Key(Key::plain(KeyCode::Esc), 1),
            Some(b'[') => Self::parse_csi(buf),
            Some(b'O') => match buf.get(2) {
                None => Parsed::Incomplete,
                Some(&final_byte) => match Self::ss3_key(final_byte) {
                    Some(code) => Parsed::Key(Key::plain(code), 3),
                    None => Parsed::Skip(3),
                },
            },
            // Alt + key = ESC + key
            Some(_) => match Self::parse(&buf[1..]) {
                Parsed::Key(mut key, len) => {
                    key.modifiers |= Modifiers::ALT;
                    Parsed::Key(key, len + 1)
                }
                Parsed::Skip(len) => Parsed::Skip(len + 1),
                Parsed::Incomplete => Parsed::Incomplete,
            },
        }
    }

    /// ESC [ <params> <final>
    fn parse_csi(buf: &[u8]) -> Parsed {
        let mut i = 2;
        while let Some(&c) = buf.get(i) {
            match c {
                0x20..=0x3F => i += 1,
                0x40..=0x7E => {
                    return match Self::csi_key(&buf[2..i], c) {
                        Some(key) => Parsed::Key(key, i + 1),
                        None => Parsed::Skip(i + 1),
                    };
                }
                _ => return Parsed::Skip(i),
            }
        }
        Parsed::Incomplete
    }

    fn csi_key(params: &[u8], final_byte: u8) -> Option<Key> {
        let text = std::str::from_utf8(params).ok()?;
        let fields: Vec<u16> = text
            .split(';')
            .map(|p| if p.is_empty() { Some(0) } else { p.parse().ok() })
            .collect::<Option<_>>()?;
        let first = fields.first().copied().unwrap_or(0);
        let modifiers = Modifiers::from_xterm_code(fields.get(1).copied().unwrap_or(1));

        let code = match final_byte {
            b'A' => KeyCode::Up,
            b'B' => KeyCode::Down,
            b'C' => KeyCode::Right,
            b'D' => KeyCode::Left,
            b'H' => KeyCode::Home,
            b'F' => KeyCode::End,
            b'Z' => KeyCode::BackTab,
            b'P'..=b'S' => KeyCode::F(final_byte - b'P' + 1),
            b'~' => match first {
                1 | 7 => KeyCode::Home,
                2 => KeyCode::Insert,
                3 => KeyCode::Delete,
                4 | 8 => KeyCode::End,
                5 => KeyCode::PageUp,
                6 => KeyCode::PageDown,
                11..=15 => KeyCode::F((first - 10) as u8),
                17..=21 => KeyCode::F((first - 11) as u8),
                23 | 24 => KeyCode::F((first - 12) as u8),
                _ => return None,
            },
            _ => return None,
        };
        Some(Key::new(code, modifiers))
    }

    /// ESC O <final> (application cursor keys, F1-F4)
    fn ss3_key(final_byte: u8) -> Option<KeyCode> {
        match final_byte {
            b'A' => Some(KeyCode::Up),
            b'B' => Some(KeyCode::Down),
            b'C' => Some(KeyCode::Right),
            b'D' => Some(KeyCode::Left),
            b'H' => Some(KeyCode::Home),
            b'F' => Some(KeyCode::End),
            b'P'..=b'S' => Some(KeyCode::F(final_byte - b'P' + 1)),
            _ => None,
        }
    }

    fn parse_utf8(buf: &[u8]) -> Parsed {
        let len = match buf[0] {
            0xC2..=0xDF => 2,
            0xE0..=0xEF => 3,
            0xF0..=0xF4 => 4,
            _ => return Parsed::Skip(1),
        };
        if buf.len() < len {
            // Only wait if what we have so far could still be valid
            return if buf[1..].iter().all(|b| b & 0xC0 == 0x80) {
                Parsed::Incomplete
            } else {
                Parsed::Skip(1)
            };
        }
        match std::str::from_utf8(&buf[..len]).ok().and_then(|s| s.chars().next()) {
            Some(ch) => Parsed::Key(Key::plain(KeyCode::Char(ch)), len),
            None => Parsed::Skip(1),
        }
    }
}
