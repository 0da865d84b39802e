//! Frame-paced keyboard injection, parsing WinAPE-style `~KEY~` text into a
//! queue of press/release/pause actions. See §4.10.
use std::collections::HashMap;
use std::collections::VecDeque;
use std::fmt;

/// One CPC key, identified by keyboard-matrix (row, column) - the same
/// coordinate space [`crate::keyboard::KeyboardMatrix`] uses.
pub type CpcKey = (u8, u8);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ActionKind { CharPressRelease, KeyPress, KeyRelease, Pause }

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Action {
    kind: ActionKind,
    key: CpcKey,
    pause_frames: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError(pub String);

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.0) }
}
impl std::error::Error for ParseError {}

/// Maps key names (`~RETURN~`, `~F3~`, ...) and literal characters to matrix
/// coordinates. The host populates this once from its keyboard layout table.
#[derive(Debug, Clone, Default)]
pub struct KeyNameTable {
    names: HashMap<String, CpcKey>,
    chars: HashMap<char, CpcKey>,
}

impl KeyNameTable {
    pub fn new() -> Self { Self::default() }

    pub fn with_name(mut self, name: &str, key: CpcKey) -> Self {
        self.names.insert(name.to_ascii_uppercase(), key);
        self
    }

    pub fn with_char(mut self, ch: char, key: CpcKey) -> Self {
        self.chars.insert(ch, key);
        self
    }

    fn resolve_name(&self, name: &str) -> Option<CpcKey> {
        if let Some(k) = self.names.get(&name.to_ascii_uppercase()) {
            return Some(*k);
        }
        if name.chars().count() == 1 {
            return self.chars.get(&name.chars().next().unwrap()).copied();
        }
        None
    }

    fn resolve_char(&self, ch: char) -> Option<CpcKey> {
        self.chars.get(&ch).copied()
    }
}

/// The pending sequence of key actions plus the single-frame press/release
/// and pause latches that make `tick` frame-accurate.
#[derive(Debug, Clone, Default)]
pub struct AutoTypeQueue {
    queue: VecDeque<Action>,
    pause_counter: i32,
    awaiting_release: bool,
    pending_release_key: CpcKey,
}

impl AutoTypeQueue {
    pub fn new() -> Self { Self::default() }

    /// Parses `text` and appends the resulting actions to the queue. On a
    /// parse error the queue is left unchanged, matching the original's
    /// all-or-nothing behaviour.
    pub fn enqueue(&mut self, text: &str, keys: &KeyNameTable) -> Result<(), ParseError> {
        let mut parsed = VecDeque::new();
        let chars: Vec<char> = text.chars().collect();
        let mut i = 0usize;
        while i < chars.len() {
            if chars[i] == '~' {
                if i + 1 < chars.len() && chars[i + 1] == '~' {
                    i += 2;
                    continue;
                }
                let close = chars[i + 1..].iter().position(|&c| c == '~').map(|p| i + 1 + p);
                let close = match close {
                    Some(c) => c,
                    None => return Err(ParseError(format!("unclosed ~ at position {}", i))),
                };
                let tag: String = chars[i + 1..close].iter().collect();
                if tag.is_empty() {
                    return Err(ParseError(format!("empty ~~ tag at position {}", i)));
                }
                if let Some(rest) = tag.strip_prefix("PAUSE ") {
                    let frames: i32 = rest.parse().map_err(|_| ParseError(format!("bad PAUSE value: {}", tag)))?;
                    if frames < 1 {
                        return Err(ParseError(format!("bad PAUSE value: {}", tag)));
                    }
                    parsed.push_back(Action { kind: ActionKind::Pause, key: (0, 0), pause_frames: frames });
                    i = close + 1;
                    continue;
                }
                if tag.len() >= 2 && (tag.starts_with('+') || tag.starts_with('-')) {
                    let press = tag.starts_with('+');
                    let key_name = &tag[1..];
                    let key = keys.resolve_name(key_name)
                        .ok_or_else(|| ParseError(format!("unknown key: {}", key_name)))?;
                    let kind = if press { ActionKind::KeyPress } else { ActionKind::KeyRelease };
                    parsed.push_back(Action { kind, key, pause_frames: 0 });
                    i = close + 1;
                    continue;
                }
                let key = keys.resolve_name(&tag).ok_or_else(|| ParseError(format!("unknown key: {}", tag)))?;
                parsed.push_back(Action { kind: ActionKind::CharPressRelease, key, pause_frames: 0 });
                i = close + 1;
                continue;
            }
            if let Some(key) = keys.resolve_char(chars[i]) {
                parsed.push_back(Action { kind: ActionKind::CharPressRelease, key, pause_frames: 0 });
            }
            // unmappable characters are silently dropped, matching free-form text entry.
            i += 1;
        }
        self.queue.extend(parsed);
        Ok(())
    }

    /// Advances the queue by one frame, invoking `apply_key(key, pressed)` at
    /// most once. Returns `true` if more work remains after this tick.
    pub fn tick(&mut self, mut apply_key: impl FnMut(CpcKey, bool)) -> bool {
        if self.awaiting_release {
            apply_key(self.pending_release_key, false);
            self.awaiting_release = false;
            return !self.queue.is_empty();
        }

        if self.pause_counter > 0 {
            self.pause_counter -= 1;
            return true;
        }

        let action = match self.queue.pop_front() {
            Some(a) => a,
            None => return false,
        };

        match action.kind {
            ActionKind::CharPressRelease => {
                apply_key(action.key, true);
                self.awaiting_release = true;
                self.pending_release_key = action.key;
                true
            }
            ActionKind::KeyPress => {
                apply_key(action.key, true);
                !self.queue.is_empty() || self.awaiting_release
            }
            ActionKind::KeyRelease => {
                apply_key(action.key, false);
                !self.queue.is_empty() || self.awaiting_release
            }
            ActionKind::Pause => {
                self.pause_counter = action.pause_frames - 1;
                true
            }
        }
    }

    pub fn is_active(&self) -> bool {
        !self.queue.is_empty() || self.awaiting_release || self.pause_counter > 0
    }

    pub fn remaining(&self) -> usize { self.queue.len() }

    pub fn clear(&mut self) {
        self.queue.clear();
        self.pause_counter = 0;
        self.awaiting_release = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys() -> KeyNameTable {
        KeyNameTable::new()
            .with_name("RETURN", (8, 2))
            .with_name("SHIFT", (8, 5))
            .with_char('a', (1, 0))
            .with_char('b', (1, 1))
    }

    #[test]
    fn literal_text_presses_and_releases_each_char_over_two_frames() {
        let mut q = AutoTypeQueue::new();
        q.enqueue("ab", &keys()).unwrap();
        let mut events = Vec::new();
        while q.tick(|k, pressed| events.push((k, pressed))) {}
        assert_eq!(events, vec![((1, 0), true), ((1, 0), false), ((1, 1), true), ((1, 1), false)]);
    }

    #[test]
    fn pause_token_idles_for_n_frames() {
        let mut q = AutoTypeQueue::new();
        q.enqueue("~PAUSE 3~", &keys()).unwrap();
        let mut ticks = 0;
        let mut busy = true;
        while busy {
            busy = q.tick(|_, _| panic!("pause must not press keys"));
            ticks += 1;
        }
        assert_eq!(ticks, 3);
    }

    #[test]
    fn double_tilde_is_a_dropped_literal() {
        let mut q = AutoTypeQueue::new();
        q.enqueue("~~", &keys()).unwrap();
        assert_eq!(q.remaining(), 0);
        assert!(!q.is_active());
    }

    #[test]
    fn held_key_does_not_auto_release() {
        let mut q = AutoTypeQueue::new();
        q.enqueue("~+SHIFT~a~-SHIFT~", &keys()).unwrap();
        let mut events = Vec::new();
        while q.tick(|k, pressed| events.push((k, pressed))) {}
        assert_eq!(events[0], ((8, 5), true));
        assert_eq!(events.last().copied(), Some(((8, 5), false)));
    }

    #[test]
    fn unknown_key_name_is_a_parse_error_and_leaves_queue_unchanged() {
        let mut q = AutoTypeQueue::new();
        q.enqueue("a", &keys()).unwrap();
        let err = q.enqueue("~NOSUCHKEY~", &keys()).unwrap_err();
        assert!(err.0.contains("NOSUCHKEY"));
        assert_eq!(q.remaining(), 1);
    }

    #[test]
    fn clear_drops_pending_release_and_pause() {
        let mut q = AutoTypeQueue::new();
        q.enqueue("a~PAUSE 5~", &keys()).unwrap();
        q.tick(|_, _| {});
        assert!(q.is_active());
        q.clear();
        assert!(!q.is_active());
        assert_eq!(q.remaining(), 0);
    }
}
