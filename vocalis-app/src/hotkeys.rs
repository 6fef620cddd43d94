//! Global hotkeys via `RegisterHotKey` on a dedicated message-pump thread.
//!
//! Hotkey callbacks must return quickly, so the hook thread only forwards
//! the fired binding to a worker thread; the worker runs the selection
//! capture and routes the text.

use std::sync::Arc;

use crossbeam_channel::unbounded;
use tracing::{debug, info, warn};
use vocalis_core::Admission;

use crate::config::HotkeyConfig;
use crate::selection::SELECTION_SOURCE;
use crate::state::AppState;

/// A parsed hotkey chord.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chord {
    pub ctrl: bool,
    pub alt: bool,
    pub shift: bool,
    pub win: bool,
    pub vk: u16,
}

/// Parse `"ctrl+shift+q"`-style chord strings. Returns `None` when no
/// non-modifier key is present or a token is unknown.
pub fn parse_chord(keys: &str) -> Option<Chord> {
    let mut chord = Chord {
        ctrl: false,
        alt: false,
        shift: false,
        win: false,
        vk: 0,
    };

    for part in keys.split('+').map(str::trim).filter(|p| !p.is_empty()) {
        match part.to_ascii_lowercase().as_str() {
            "ctrl" | "control" => chord.ctrl = true,
            "alt" => chord.alt = true,
            "shift" => chord.shift = true,
            "win" | "super" | "meta" => chord.win = true,
            key => {
                if chord.vk != 0 {
                    return None;
                }
                chord.vk = parse_vk(key)?;
            }
        }
    }

    (chord.vk != 0).then_some(chord)
}

fn parse_vk(key: &str) -> Option<u16> {
    if key.len() == 1 {
        let ch = key.chars().next()?;
        if ch.is_ascii_alphanumeric() {
            return Some(ch.to_ascii_uppercase() as u16);
        }
        return None;
    }

    if let Some(n) = key.strip_prefix('f').and_then(|n| n.parse::<u16>().ok()) {
        if (1..=24).contains(&n) {
            return Some(0x70 + n - 1); // VK_F1..VK_F24
        }
        return None;
    }

    match key {
        "space" => Some(0x20),
        "enter" | "return" => Some(0x0D),
        "pause" => Some(0x13),
        "insert" => Some(0x2D),
        "delete" => Some(0x2E),
        "home" => Some(0x24),
        "end" => Some(0x23),
        _ => None,
    }
}

/// Register the configured hotkeys and start dispatching them.
pub fn spawn(bindings: Vec<HotkeyConfig>, state: Arc<AppState>) {
    let parsed: Vec<(Chord, HotkeyConfig)> = bindings
        .into_iter()
        .filter_map(|binding| match parse_chord(&binding.keys) {
            Some(chord) => Some((chord, binding)),
            None => {
                warn!(keys = %binding.keys, "unparseable hotkey chord — skipping");
                None
            }
        })
        .collect();

    if parsed.is_empty() {
        return;
    }

    let (event_tx, event_rx) = unbounded::<HotkeyConfig>();

    {
        let state = Arc::clone(&state);
        if let Err(e) = std::thread::Builder::new()
            .name("vocalis-hotkey-worker".into())
            .spawn(move || {
                for binding in event_rx {
                    handle_hotkey(&state, &binding);
                }
            })
        {
            warn!(error = %e, "failed to spawn hotkey worker thread");
            return;
        }
    }

    spawn_hook_thread(parsed, event_tx);
}

/// Runs on the worker thread: capture the selection, route it.
fn handle_hotkey(state: &AppState, binding: &HotkeyConfig) {
    let Some(text) = state.selection.capture() else {
        debug!(keys = %binding.keys, "hotkey fired with no selection");
        return;
    };

    let source = binding.source.as_deref().unwrap_or(SELECTION_SOURCE);
    match state
        .router
        .submit(&text, Some(source), binding.voice.as_deref())
    {
        Admission::Enqueued { request_id } => {
            info!(keys = %binding.keys, request_id = %request_id, "hotkey selection queued");
        }
        admission => {
            debug!(keys = %binding.keys, ?admission, "hotkey selection not admitted");
        }
    }
}

#[cfg(target_os = "windows")]
fn spawn_hook_thread(
    parsed: Vec<(Chord, HotkeyConfig)>,
    event_tx: crossbeam_channel::Sender<HotkeyConfig>,
) {
    let spawned = std::thread::Builder::new()
        .name("vocalis-hotkeys".into())
        .spawn(move || {
            use windows_sys::Win32::UI::Input::KeyboardAndMouse::{
                RegisterHotKey, UnregisterHotKey, MOD_ALT, MOD_CONTROL, MOD_NOREPEAT, MOD_SHIFT,
                MOD_WIN,
            };
            use windows_sys::Win32::UI::WindowsAndMessaging::{GetMessageW, MSG, WM_HOTKEY};

            let mut registered = Vec::new();
            for (idx, (chord, binding)) in parsed.iter().enumerate() {
                let id = idx as i32 + 1;
                let mut modifiers = MOD_NOREPEAT;
                if chord.ctrl {
                    modifiers |= MOD_CONTROL;
                }
                if chord.alt {
                    modifiers |= MOD_ALT;
                }
                if chord.shift {
                    modifiers |= MOD_SHIFT;
                }
                if chord.win {
                    modifiers |= MOD_WIN;
                }

                // SAFETY: null HWND binds the hotkey to this thread's queue.
                let ok = unsafe {
                    RegisterHotKey(std::ptr::null_mut(), id, modifiers, chord.vk as u32)
                };
                if ok == 0 {
                    warn!(keys = %binding.keys, "RegisterHotKey failed — chord taken by another app?");
                } else {
                    info!(keys = %binding.keys, "global hotkey registered");
                    registered.push(id);
                }
            }

            if registered.is_empty() {
                return;
            }

            // SAFETY: standard message loop on the registering thread;
            // WM_HOTKEY arrives here because the hotkeys are thread-bound.
            unsafe {
                let mut msg: MSG = std::mem::zeroed();
                while GetMessageW(&mut msg, std::ptr::null_mut(), 0, 0) > 0 {
                    if msg.message == WM_HOTKEY {
                        let id = msg.wParam;
                        if let Some((_, binding)) = parsed.get(id.wrapping_sub(1)) {
                            if event_tx.send(binding.clone()).is_err() {
                                break;
                            }
                        }
                    }
                }
                for id in registered {
                    UnregisterHotKey(std::ptr::null_mut(), id);
                }
            }
        });

    if let Err(e) = spawned {
        warn!(error = %e, "failed to spawn hotkey hook thread");
    }
}

#[cfg(not(target_os = "windows"))]
fn spawn_hook_thread(
    parsed: Vec<(Chord, HotkeyConfig)>,
    _event_tx: crossbeam_channel::Sender<HotkeyConfig>,
) {
    warn!(
        hotkeys = parsed.len(),
        "global hotkeys are only supported on Windows — configured chords are inert"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_modifier_combinations() {
        let chord = parse_chord("ctrl+shift+q").unwrap();
        assert!(chord.ctrl && chord.shift);
        assert!(!chord.alt && !chord.win);
        assert_eq!(chord.vk, b'Q' as u16);
    }

    #[test]
    fn parses_function_and_named_keys() {
        assert_eq!(parse_chord("alt+f5").unwrap().vk, 0x74);
        assert_eq!(parse_chord("win+space").unwrap().vk, 0x20);
        assert_eq!(parse_chord("ctrl+enter").unwrap().vk, 0x0D);
    }

    #[test]
    fn rejects_modifier_only_and_unknown_tokens() {
        assert!(parse_chord("ctrl+shift").is_none());
        assert!(parse_chord("ctrl+banana").is_none());
        assert!(parse_chord("").is_none());
        assert!(parse_chord("ctrl+q+w").is_none());
    }
}
