//! Selection capture host — the single-threaded UI context.
//!
//! The Win32 clipboard wants single-threaded access, and some source
//! applications deliver clipboard data through messages dispatched on the
//! reading thread. A dedicated UI-context thread owns both: other threads
//! hand it capture jobs over a channel and block on the reply. While idle
//! the thread keeps draining its message queue so delayed clipboard
//! rendering never wedges.

use std::time::Duration;

use crossbeam_channel::{bounded, unbounded, RecvTimeoutError, Sender};
use tracing::warn;

/// Source name selection captures are routed under.
pub const SELECTION_SOURCE: &str = "speak-selection";

/// Idle message-pump cadence of the UI thread.
const IDLE_PUMP_INTERVAL: Duration = Duration::from_millis(50);

/// Upper bound on one capture round-trip; the protocol itself finishes
/// within its 300 ms window, the margin covers a busy clipboard.
const CAPTURE_REPLY_TIMEOUT: Duration = Duration::from_secs(2);

enum UiJob {
    Capture(Sender<Option<String>>),
}

/// Handle to the UI-context thread.
pub struct SelectionCapture {
    jobs: Sender<UiJob>,
}

impl SelectionCapture {
    /// Spawn the UI-context thread.
    pub fn spawn() -> std::io::Result<Self> {
        let (jobs, job_rx) = unbounded::<UiJob>();

        std::thread::Builder::new()
            .name("vocalis-ui".into())
            .spawn(move || loop {
                match job_rx.recv_timeout(IDLE_PUMP_INTERVAL) {
                    Ok(UiJob::Capture(reply)) => {
                        let _ = reply.send(run_capture());
                    }
                    Err(RecvTimeoutError::Timeout) => host::pump_pending_messages(),
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            })?;

        Ok(Self { jobs })
    }

    /// Capture the current selection, marshalling to the UI thread and
    /// blocking until the protocol finishes.
    pub fn capture(&self) -> Option<String> {
        let (reply_tx, reply_rx) = bounded(1);
        if self.jobs.send(UiJob::Capture(reply_tx)).is_err() {
            warn!("UI context thread is gone — cannot capture selection");
            return None;
        }
        match reply_rx.recv_timeout(CAPTURE_REPLY_TIMEOUT) {
            Ok(result) => result,
            Err(_) => {
                warn!("selection capture timed out");
                None
            }
        }
    }
}

#[cfg(target_os = "windows")]
fn run_capture() -> Option<String> {
    let mut host = host::WinCaptureHost;
    vocalis_core::capture_selection(&mut host)
}

#[cfg(not(target_os = "windows"))]
fn run_capture() -> Option<String> {
    warn!("selection capture is only supported on Windows");
    None
}

#[cfg(target_os = "windows")]
mod host {
    use std::ffi::OsString;
    use std::os::windows::ffi::OsStringExt;

    use vocalis_core::capture::{CaptureHost, CAPTURE_POLL_INTERVAL};

    const CF_UNICODETEXT: u32 = 13;

    /// `CaptureHost` over the Win32 clipboard and `SendInput`. All calls run
    /// on the UI-context thread.
    pub(super) struct WinCaptureHost;

    impl CaptureHost for WinCaptureHost {
        fn clipboard_text(&mut self) -> Result<Option<String>, String> {
            use windows_sys::Win32::System::DataExchange::{
                CloseClipboard, GetClipboardData, IsClipboardFormatAvailable,
            };
            use windows_sys::Win32::System::Memory::{GlobalLock, GlobalUnlock};

            if !open_clipboard_with_retry() {
                return Err("OpenClipboard failed".into());
            }

            let result = unsafe {
                if IsClipboardFormatAvailable(CF_UNICODETEXT) == 0 {
                    Ok(None)
                } else {
                    let handle = GetClipboardData(CF_UNICODETEXT);
                    if handle.is_null() {
                        Ok(None)
                    } else {
                        let ptr = GlobalLock(handle as _) as *const u16;
                        if ptr.is_null() {
                            Err("GlobalLock failed for clipboard text".to_string())
                        } else {
                            let mut len = 0usize;
                            while *ptr.add(len) != 0 {
                                len += 1;
                            }
                            let slice = std::slice::from_raw_parts(ptr, len);
                            let text = OsString::from_wide(slice).to_string_lossy().to_string();
                            let _ = GlobalUnlock(handle as _);
                            Ok(Some(text))
                        }
                    }
                }
            };

            unsafe {
                CloseClipboard();
            }
            result
        }

        fn set_clipboard_text(&mut self, text: &str) -> Result<(), String> {
            use windows_sys::Win32::System::DataExchange::{
                CloseClipboard, EmptyClipboard, SetClipboardData,
            };
            use windows_sys::Win32::System::Memory::{
                GlobalAlloc, GlobalLock, GlobalUnlock, GMEM_MOVEABLE,
            };

            let mut utf16: Vec<u16> = text.encode_utf16().collect();
            utf16.push(0);
            let bytes = utf16.len() * std::mem::size_of::<u16>();

            if !open_clipboard_with_retry() {
                return Err("OpenClipboard failed".into());
            }

            let result = unsafe {
                if EmptyClipboard() == 0 {
                    Err("EmptyClipboard failed".to_string())
                } else {
                    let hmem = GlobalAlloc(GMEM_MOVEABLE, bytes);
                    if hmem.is_null() {
                        Err("GlobalAlloc failed for clipboard text".to_string())
                    } else {
                        let dst = GlobalLock(hmem) as *mut u16;
                        if dst.is_null() {
                            Err("GlobalLock failed for clipboard text".to_string())
                        } else {
                            std::ptr::copy_nonoverlapping(utf16.as_ptr(), dst, utf16.len());
                            let _ = GlobalUnlock(hmem);
                            let set = SetClipboardData(CF_UNICODETEXT, hmem as *mut _);
                            if set.is_null() {
                                Err("SetClipboardData(CF_UNICODETEXT) failed".to_string())
                            } else {
                                Ok(())
                            }
                        }
                    }
                }
            };

            unsafe {
                CloseClipboard();
            }
            result
        }

        fn clear_clipboard(&mut self) -> Result<(), String> {
            use windows_sys::Win32::System::DataExchange::{CloseClipboard, EmptyClipboard};

            if !open_clipboard_with_retry() {
                return Err("OpenClipboard failed".into());
            }
            let result = unsafe {
                if EmptyClipboard() == 0 {
                    Err("EmptyClipboard failed".to_string())
                } else {
                    Ok(())
                }
            };
            unsafe {
                CloseClipboard();
            }
            result
        }

        fn send_copy_keystroke(&mut self) -> Result<(), String> {
            use windows_sys::Win32::UI::Input::KeyboardAndMouse::{VK_C, VK_CONTROL};

            send_key_chord(&[VK_CONTROL], VK_C)
        }

        fn pump_and_wait(&mut self) {
            pump_pending_messages();
            std::thread::sleep(CAPTURE_POLL_INTERVAL);
        }
    }

    /// Drain the thread's message queue. Required for applications that
    /// populate the clipboard via delayed rendering callbacks.
    pub(super) fn pump_pending_messages() {
        use windows_sys::Win32::UI::WindowsAndMessaging::{
            DispatchMessageW, PeekMessageW, TranslateMessage, MSG, PM_REMOVE,
        };

        // SAFETY: MSG is plain-old-data; PeekMessageW with a null HWND reads
        // this thread's own queue.
        unsafe {
            let mut msg: MSG = std::mem::zeroed();
            while PeekMessageW(&mut msg, std::ptr::null_mut(), 0, 0, PM_REMOVE) != 0 {
                TranslateMessage(&msg);
                DispatchMessageW(&msg);
            }
        }
    }

    /// The clipboard is a process-global resource another application may be
    /// holding open; retry briefly before giving up.
    fn open_clipboard_with_retry() -> bool {
        use windows_sys::Win32::System::DataExchange::OpenClipboard;

        for _ in 0..8 {
            let opened = unsafe { OpenClipboard(std::ptr::null_mut()) != 0 };
            if opened {
                return true;
            }
            std::thread::sleep(std::time::Duration::from_millis(8));
        }
        false
    }

    fn send_key_chord(modifiers: &[u16], key: u16) -> Result<(), String> {
        use std::mem::size_of;
        use windows_sys::Win32::UI::Input::KeyboardAndMouse::{
            SendInput, INPUT, INPUT_0, INPUT_KEYBOARD, KEYBDINPUT, KEYEVENTF_KEYUP,
        };

        fn key_event(vk: u16, flags: u32) -> INPUT {
            INPUT {
                r#type: INPUT_KEYBOARD,
                Anonymous: INPUT_0 {
                    ki: KEYBDINPUT {
                        wVk: vk,
                        wScan: 0,
                        dwFlags: flags,
                        time: 0,
                        dwExtraInfo: 0,
                    },
                },
            }
        }

        let mut inputs: Vec<INPUT> = Vec::with_capacity(modifiers.len() * 2 + 2);
        for &vk in modifiers {
            inputs.push(key_event(vk, 0));
        }
        inputs.push(key_event(key, 0));
        inputs.push(key_event(key, KEYEVENTF_KEYUP));
        for &vk in modifiers.iter().rev() {
            inputs.push(key_event(vk, KEYEVENTF_KEYUP));
        }

        // SAFETY: `inputs` points to initialized `INPUT` structs and lives
        // for the duration of the call.
        let sent = unsafe {
            SendInput(
                inputs.len() as u32,
                inputs.as_ptr(),
                size_of::<INPUT>() as i32,
            )
        };
        if sent != inputs.len() as u32 {
            let win_err = std::io::Error::last_os_error();
            return Err(format!(
                "SendInput chord sent {sent}/{} events (os_error={win_err})",
                inputs.len()
            ));
        }
        Ok(())
    }
}

#[cfg(not(target_os = "windows"))]
mod host {
    pub(super) fn pump_pending_messages() {}
}
