//! Global record gesture using evdev.
//!
//! Watches every keyboard for the configured key combo. Each time the combo
//! becomes fully held, one [`SessionEvent::RecordGesture`] is sent. Releasing
//! the combo does nothing: a gesture starts a single capture.

use crate::config::HotkeyConfig;
use crate::session::SessionEvent;
use evdev::{Device, EventType, InputEventKind, Key};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Resolve a key name like "KEY_LEFTMETA" to an evdev Key code.
fn resolve_key(name: &str) -> Option<Key> {
    let key = match name {
        "KEY_LEFTMETA" => Key::KEY_LEFTMETA,
        "KEY_RIGHTMETA" => Key::KEY_RIGHTMETA,
        "KEY_LEFTALT" => Key::KEY_LEFTALT,
        "KEY_RIGHTALT" => Key::KEY_RIGHTALT,
        "KEY_LEFTCTRL" => Key::KEY_LEFTCTRL,
        "KEY_RIGHTCTRL" => Key::KEY_RIGHTCTRL,
        "KEY_LEFTSHIFT" => Key::KEY_LEFTSHIFT,
        "KEY_RIGHTSHIFT" => Key::KEY_RIGHTSHIFT,
        "KEY_SPACE" => Key::KEY_SPACE,
        "KEY_M" => Key::KEY_M,
        "KEY_R" => Key::KEY_R,
        "KEY_V" => Key::KEY_V,
        "KEY_F9" => Key::KEY_F9,
        "KEY_F10" => Key::KEY_F10,
        "KEY_F11" => Key::KEY_F11,
        "KEY_F12" => Key::KEY_F12,
        _ => {
            warn!("Unknown key name: {name}");
            return None;
        }
    };
    Some(key)
}

/// Pressed keys across all devices, plus whether the combo is currently held.
#[derive(Default)]
struct ComboState {
    pressed: HashSet<Key>,
    held: bool,
}

impl ComboState {
    /// Feed one key event (1 = press, 0 = release). Returns true when the
    /// combo has just become held.
    fn on_key(&mut self, combo: &HashSet<Key>, key: Key, value: i32) -> bool {
        match value {
            1 => {
                self.pressed.insert(key);
            }
            0 => {
                self.pressed.remove(&key);
            }
            _ => return false, // repeat
        }

        let now_held = !combo.is_empty() && combo.is_subset(&self.pressed);
        let fired = now_held && !self.held;
        self.held = now_held;
        fired
    }
}

pub struct HotkeyMonitor {
    combo: HashSet<Key>,
    state: Arc<Mutex<ComboState>>,
    events: mpsc::UnboundedSender<SessionEvent>,
}

impl HotkeyMonitor {
    pub fn new(config: &HotkeyConfig, events: mpsc::UnboundedSender<SessionEvent>) -> Self {
        let combo: HashSet<Key> = config.combo.iter().filter_map(|s| resolve_key(s)).collect();
        info!("Record gesture: {}", config.combo.join("+"));

        Self {
            combo,
            state: Arc::new(Mutex::new(ComboState::default())),
            events,
        }
    }

    fn find_keyboards() -> Vec<Device> {
        evdev::enumerate()
            .map(|(_path, device)| device)
            .filter(|device| {
                device
                    .supported_keys()
                    .is_some_and(|keys| keys.contains(Key::KEY_A) && keys.contains(Key::KEY_ENTER))
            })
            .inspect(|device| {
                info!(
                    "Found keyboard: {} at {:?}",
                    device.name().unwrap_or("unknown"),
                    device.physical_path()
                );
            })
            .collect()
    }

    async fn monitor_device(
        device: Device,
        combo: HashSet<Key>,
        state: Arc<Mutex<ComboState>>,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) {
        let name = device.name().unwrap_or("unknown").to_string();
        debug!("Monitoring {name}");

        let mut stream = match device.into_event_stream() {
            Ok(stream) => stream,
            Err(e) => {
                warn!("Cannot create event stream for {name}: {e}");
                return;
            }
        };

        loop {
            let event = match stream.next_event().await {
                Ok(event) => event,
                Err(e) => {
                    warn!("Device {name} disconnected: {e}");
                    break;
                }
            };

            if event.event_type() != EventType::KEY {
                continue;
            }
            let InputEventKind::Key(key) = event.kind() else {
                continue;
            };

            let fired = state
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .on_key(&combo, key, event.value());

            if fired {
                debug!("Record gesture");
                if events.send(SessionEvent::RecordGesture).is_err() {
                    break;
                }
            }
        }
    }

    /// Monitor all keyboards until they disconnect or the session ends.
    pub async fn run(self) {
        if self.combo.is_empty() {
            warn!("No valid keys in record combo, gesture disabled");
            return;
        }

        let keyboards = Self::find_keyboards();
        if keyboards.is_empty() {
            warn!(
                "No keyboards found, record gesture disabled. \
                 Make sure you're in the 'input' group: sudo usermod -aG input $USER"
            );
            return;
        }

        info!("Monitoring {} keyboard(s)", keyboards.len());

        let mut handles = Vec::new();
        for device in keyboards {
            handles.push(tokio::spawn(Self::monitor_device(
                device,
                self.combo.clone(),
                Arc::clone(&self.state),
                self.events.clone(),
            )));
        }

        for handle in handles {
            let _ = handle.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn combo() -> HashSet<Key> {
        [Key::KEY_LEFTMETA, Key::KEY_LEFTALT].into_iter().collect()
    }

    #[test]
    fn fires_once_per_hold() {
        let combo = combo();
        let mut state = ComboState::default();

        assert!(!state.on_key(&combo, Key::KEY_LEFTMETA, 1));
        assert!(state.on_key(&combo, Key::KEY_LEFTALT, 1));
        // Key repeat and an extra key while held do not fire again
        assert!(!state.on_key(&combo, Key::KEY_LEFTALT, 2));
        assert!(!state.on_key(&combo, Key::KEY_SPACE, 1));
    }

    #[test]
    fn release_does_not_fire_and_rearms() {
        let combo = combo();
        let mut state = ComboState::default();

        state.on_key(&combo, Key::KEY_LEFTMETA, 1);
        state.on_key(&combo, Key::KEY_LEFTALT, 1);
        assert!(!state.on_key(&combo, Key::KEY_LEFTALT, 0));
        assert!(state.on_key(&combo, Key::KEY_LEFTALT, 1));
    }

    #[test]
    fn unknown_key_names_are_dropped() {
        assert_eq!(resolve_key("KEY_F12"), Some(Key::KEY_F12));
        assert_eq!(resolve_key("KEY_NOPE"), None);
    }
}
