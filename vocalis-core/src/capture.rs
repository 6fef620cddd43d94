//! Selected-text capture protocol.
//!
//! Best-effort, clipboard-preserving capture of the OS-level selection:
//!
//! ```text
//! 1. Snapshot the clipboard (or record "empty")
//! 2. Clear it
//! 3. Inject the platform copy keystroke (Ctrl+C)
//! 4. Pump host messages and poll for non-empty clipboard content,
//!    in ~25 ms steps for up to 300 ms
//! 5. Read the result; whitespace-only counts as "no selection"
//! 6. Restore the snapshot
//! ```
//!
//! Some applications populate the clipboard lazily from rendering callbacks
//! on the reader's thread, which is why step 4 pumps messages instead of
//! just sleeping. Every step may fail independently; failures are logged at
//! WARN and the remaining steps still run.
//!
//! The platform half lives behind [`CaptureHost`]: the host binary
//! implements it over the Win32 clipboard and `SendInput` on its
//! single-threaded UI context, tests implement it with scripted fakes.

use std::time::{Duration, Instant};

use tracing::warn;

/// Total window the protocol waits for the source application to copy.
/// Synchronous writers land well under 100 ms; lazy-rendering applications
/// push toward 200 ms. 300 ms covers both while staying unnoticeable.
pub const CAPTURE_DEADLINE: Duration = Duration::from_millis(300);

/// Poll step inside the capture window.
pub const CAPTURE_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Platform operations the capture protocol runs on. All methods are called
/// from the host's single-threaded UI context; callers on other threads
/// marshal to it first.
pub trait CaptureHost {
    /// Current clipboard text; `None` when the clipboard is empty or holds
    /// no text format.
    fn clipboard_text(&mut self) -> Result<Option<String>, String>;

    fn set_clipboard_text(&mut self, text: &str) -> Result<(), String>;

    fn clear_clipboard(&mut self) -> Result<(), String>;

    /// Inject the copy chord: control down, C down, C up, control up.
    fn send_copy_keystroke(&mut self) -> Result<(), String>;

    /// Pump pending host messages, then wait one poll interval.
    fn pump_and_wait(&mut self);
}

/// Capture the current selection, preserving the clipboard across the call.
///
/// Returns `None` when nothing was selected (or every step failed); the
/// clipboard is restored best-effort either way.
pub fn capture_selection(host: &mut dyn CaptureHost) -> Option<String> {
    let snapshot = match host.clipboard_text() {
        Ok(text) => text,
        Err(e) => {
            warn!(error = %e, "clipboard snapshot failed — will restore to empty");
            None
        }
    };

    if let Err(e) = host.clear_clipboard() {
        warn!(error = %e, "clipboard clear failed");
    }

    if let Err(e) = host.send_copy_keystroke() {
        warn!(error = %e, "copy keystroke injection failed");
    }

    let deadline = Instant::now() + CAPTURE_DEADLINE;
    let mut captured: Option<String> = None;
    loop {
        host.pump_and_wait();
        match host.clipboard_text() {
            Ok(Some(text)) if !text.trim().is_empty() => {
                captured = Some(text);
                break;
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "clipboard poll failed"),
        }
        if Instant::now() >= deadline {
            break;
        }
    }

    match &snapshot {
        Some(text) => {
            if let Err(e) = host.set_clipboard_text(text) {
                warn!(error = %e, "clipboard restore failed");
            }
        }
        None => {
            if let Err(e) = host.clear_clipboard() {
                warn!(error = %e, "clipboard restore-to-empty failed");
            }
        }
    }

    captured
}
