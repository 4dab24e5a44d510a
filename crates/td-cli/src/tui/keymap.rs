//! Monitor key bindings, with optional overrides from `.todos/keymap.json`.
//!
//! ```json
//! { "down": ["j", "down", "n"], "quit": ["q", "ctrl-q"] }
//! ```
//!
//! An action listed in the file replaces all of its default keys; actions
//! not listed keep theirs. Ctrl-C always quits.

use anyhow::{Context, Result, bail};
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Quit,
    Refresh,
    Help,
    NextPane,
    PrevPane,
    Down,
    Up,
    Top,
    Bottom,
}

impl Action {
    pub const ALL: [Self; 9] = [
        Self::Quit,
        Self::Refresh,
        Self::Help,
        Self::NextPane,
        Self::PrevPane,
        Self::Down,
        Self::Up,
        Self::Top,
        Self::Bottom,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Quit => "quit",
            Self::Refresh => "refresh",
            Self::Help => "help",
            Self::NextPane => "next_pane",
            Self::PrevPane => "prev_pane",
            Self::Down => "down",
            Self::Up => "up",
            Self::Top => "top",
            Self::Bottom => "bottom",
        }
    }

    const fn defaults(self) -> &'static [&'static str] {
        match self {
            Self::Quit => &["q", "esc"],
            Self::Refresh => &["r"],
            Self::Help => &["?"],
            Self::NextPane => &["tab"],
            Self::PrevPane => &["backtab"],
            Self::Down => &["j", "down"],
            Self::Up => &["k", "up"],
            Self::Top => &["g", "home"],
            Self::Bottom => &["G", "end"],
        }
    }
}

impl FromStr for Action {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|a| a.as_str() == s)
            .with_context(|| format!("unknown monitor action '{s}'"))
    }
}

/// One key, optionally with Ctrl held.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KeyBind {
    code: KeyCode,
    ctrl: bool,
}

impl KeyBind {
    fn from_event(key: &KeyEvent) -> Self {
        Self {
            code: key.code,
            ctrl: key.modifiers.contains(KeyModifiers::CONTROL),
        }
    }
}

impl FromStr for KeyBind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let (ctrl, name) = match s.strip_prefix("ctrl-") {
            Some(rest) => (true, rest),
            None => (false, s),
        };
        let lower = name.to_ascii_lowercase();
        let code = match lower.as_str() {
            "esc" => KeyCode::Esc,
            "tab" => KeyCode::Tab,
            "backtab" | "shift-tab" => KeyCode::BackTab,
            "enter" => KeyCode::Enter,
            "space" => KeyCode::Char(' '),
            "up" => KeyCode::Up,
            "down" => KeyCode::Down,
            "left" => KeyCode::Left,
            "right" => KeyCode::Right,
            "home" => KeyCode::Home,
            "end" => KeyCode::End,
            "pageup" => KeyCode::PageUp,
            "pagedown" => KeyCode::PageDown,
            _ => {
                let mut chars = name.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) => KeyCode::Char(c),
                    _ => bail!("unrecognised key '{s}'"),
                }
            }
        };
        Ok(Self { code, ctrl })
    }
}

impl fmt::Display for KeyBind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.ctrl {
            f.write_str("ctrl-")?;
        }
        match self.code {
            KeyCode::Char(' ') => f.write_str("space"),
            KeyCode::Char(c) => write!(f, "{c}"),
            KeyCode::Esc => f.write_str("esc"),
            KeyCode::Tab => f.write_str("tab"),
            KeyCode::BackTab => f.write_str("shift-tab"),
            KeyCode::Enter => f.write_str("enter"),
            KeyCode::Up => f.write_str("up"),
            KeyCode::Down => f.write_str("down"),
            KeyCode::Left => f.write_str("left"),
            KeyCode::Right => f.write_str("right"),
            KeyCode::Home => f.write_str("home"),
            KeyCode::End => f.write_str("end"),
            KeyCode::PageUp => f.write_str("pageup"),
            KeyCode::PageDown => f.write_str("pagedown"),
            other => write!(f, "{other:?}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Keymap {
    bindings: HashMap<KeyBind, Action>,
}

impl Default for Keymap {
    fn default() -> Self {
        let bindings = Action::ALL
            .into_iter()
            .flat_map(|action| {
                action
                    .defaults()
                    .iter()
                    .filter_map(move |raw| raw.parse::<KeyBind>().ok().map(|k| (k, action)))
            })
            .collect();
        Self { bindings }
    }
}

impl Keymap {
    /// Defaults with the overrides in `path` applied. A missing file is not
    /// an error.
    ///
    /// # Errors
    ///
    /// The file exists but cannot be read, is not a JSON object of string
    /// lists, or names an unknown action or key.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let overrides: BTreeMap<String, Vec<String>> = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        let mut keymap = Self::default();
        keymap
            .apply(&overrides)
            .with_context(|| format!("Invalid keymap in {}", path.display()))?;
        tracing::debug!(
            path = %path.display(),
            actions = overrides.len(),
            "loaded keymap overrides"
        );
        Ok(keymap)
    }

    fn apply(&mut self, overrides: &BTreeMap<String, Vec<String>>) -> Result<()> {
        for (name, keys) in overrides {
            let action: Action = name.parse()?;
            let keys = keys
                .iter()
                .map(|k| k.parse::<KeyBind>())
                .collect::<Result<Vec<_>>>()?;
            self.bindings.retain(|_, bound| *bound != action);
            for key in keys {
                self.bindings.insert(key, action);
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn action(&self, key: &KeyEvent) -> Option<Action> {
        self.bindings.get(&KeyBind::from_event(key)).copied()
    }

    /// Keys bound to `action`, for the help popup.
    #[must_use]
    pub fn keys_for(&self, action: Action) -> String {
        let mut keys: Vec<String> = self
            .bindings
            .iter()
            .filter(|(_, a)| **a == action)
            .map(|(k, _)| k.to_string())
            .collect();
        keys.sort();
        keys.join(" / ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn press(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    #[test]
    fn defaults_cover_every_action() {
        let keymap = Keymap::default();
        for action in Action::ALL {
            assert!(!keymap.keys_for(action).is_empty(), "{action:?} unbound");
        }
        assert_eq!(keymap.action(&press(KeyCode::Char('j'))), Some(Action::Down));
        assert_eq!(keymap.action(&press(KeyCode::Esc)), Some(Action::Quit));
        assert_eq!(keymap.action(&press(KeyCode::Char('x'))), None);
    }

    #[test]
    fn override_replaces_action_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keymap.json");
        std::fs::write(&path, r#"{"down": ["n", "ctrl-n"], "quit": ["x"]}"#).unwrap();
        let keymap = Keymap::load(&path).unwrap();

        assert_eq!(keymap.action(&press(KeyCode::Char('n'))), Some(Action::Down));
        assert_eq!(
            keymap.action(&KeyEvent::new(KeyCode::Char('n'), KeyModifiers::CONTROL)),
            Some(Action::Down)
        );
        assert_eq!(keymap.action(&press(KeyCode::Char('j'))), None);
        assert_eq!(keymap.action(&press(KeyCode::Char('q'))), None);
        assert_eq!(keymap.action(&press(KeyCode::Char('x'))), Some(Action::Quit));
        assert_eq!(keymap.action(&press(KeyCode::Char('k'))), Some(Action::Up));
    }

    #[test]
    fn missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let keymap = Keymap::load(&dir.path().join("keymap.json")).unwrap();
        assert_eq!(keymap.action(&press(KeyCode::Tab)), Some(Action::NextPane));
    }

    #[test]
    fn bad_entries_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keymap.json");
        std::fs::write(&path, r#"{"jump": ["z"]}"#).unwrap();
        assert!(Keymap::load(&path).is_err());
        std::fs::write(&path, r#"{"down": ["f13x"]}"#).unwrap();
        assert!(Keymap::load(&path).is_err());
    }

    #[test]
    fn key_names_print_back() {
        for raw in ["j", "ctrl-n", "esc", "shift-tab", "space", "pagedown"] {
            assert_eq!(raw.parse::<KeyBind>().unwrap().to_string(), raw);
        }
    }
}
