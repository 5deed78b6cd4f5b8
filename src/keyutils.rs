//! Conversion des événements clavier Winit vers les types Servo.
//!
//! Le contenu est un dictionnaire : saisie de texte, édition, navigation
//! au clavier et touches de fonction. Les touches nommées hors de ce
//! périmètre (média, TV, IME…) arrivent comme `Unidentified`.

use servo::{Code, Key, KeyState, KeyboardEvent, Location, Modifiers, NamedKey};
use winit::event::{ElementState, KeyEvent};
use winit::keyboard::{
    Key as WinitKey, KeyCode, KeyLocation as WinitKeyLocation, ModifiersState,
    NamedKey as WinitNamedKey, PhysicalKey,
};

/// Convertit un `KeyEvent` Winit + état des modificateurs en `KeyboardEvent` Servo.
pub fn keyboard_event_from_winit(key_event: &KeyEvent, state: ModifiersState) -> KeyboardEvent {
    KeyboardEvent::new_without_event(
        key_state_from_winit(key_event.state),
        key_from_winit(&key_event.logical_key),
        code_from_winit(&key_event.physical_key),
        location_from_winit(key_event.location),
        modifiers_from_winit(state),
        false,
        false,
    )
}

fn key_state_from_winit(state: ElementState) -> KeyState {
    match state {
        ElementState::Pressed => KeyState::Down,
        ElementState::Released => KeyState::Up,
    }
}

fn key_from_winit(logical_key: &WinitKey) -> Key {
    let named = match logical_key {
        WinitKey::Character(string) => return Key::Character(string.to_string()),
        WinitKey::Named(WinitNamedKey::Space) => return Key::Character(" ".to_string()),
        WinitKey::Named(named) => named,
        WinitKey::Unidentified(_) | WinitKey::Dead(_) => {
            return Key::Named(NamedKey::Unidentified);
        }
    };

    let named = match named {
        WinitNamedKey::Enter => NamedKey::Enter,
        WinitNamedKey::Tab => NamedKey::Tab,
        WinitNamedKey::Backspace => NamedKey::Backspace,
        WinitNamedKey::Delete => NamedKey::Delete,
        WinitNamedKey::Escape => NamedKey::Escape,
        WinitNamedKey::Insert => NamedKey::Insert,
        WinitNamedKey::ArrowUp => NamedKey::ArrowUp,
        WinitNamedKey::ArrowDown => NamedKey::ArrowDown,
        WinitNamedKey::ArrowLeft => NamedKey::ArrowLeft,
        WinitNamedKey::ArrowRight => NamedKey::ArrowRight,
        WinitNamedKey::Home => NamedKey::Home,
        WinitNamedKey::End => NamedKey::End,
        WinitNamedKey::PageUp => NamedKey::PageUp,
        WinitNamedKey::PageDown => NamedKey::PageDown,
        WinitNamedKey::Shift => NamedKey::Shift,
        WinitNamedKey::Control => NamedKey::Control,
        WinitNamedKey::Alt => NamedKey::Alt,
        WinitNamedKey::AltGraph => NamedKey::AltGraph,
        WinitNamedKey::Meta => NamedKey::Meta,
        WinitNamedKey::CapsLock => NamedKey::CapsLock,
        WinitNamedKey::NumLock => NamedKey::NumLock,
        WinitNamedKey::ContextMenu => NamedKey::ContextMenu,
        WinitNamedKey::Copy => NamedKey::Copy,
        WinitNamedKey::Cut => NamedKey::Cut,
        WinitNamedKey::Paste => NamedKey::Paste,
        WinitNamedKey::Undo => NamedKey::Undo,
        WinitNamedKey::Redo => NamedKey::Redo,
        WinitNamedKey::BrowserBack => NamedKey::BrowserBack,
        WinitNamedKey::BrowserForward => NamedKey::BrowserForward,
        WinitNamedKey::BrowserRefresh => NamedKey::BrowserRefresh,
        WinitNamedKey::BrowserHome => NamedKey::BrowserHome,
        WinitNamedKey::F1 => NamedKey::F1,
        WinitNamedKey::F2 => NamedKey::F2,
        WinitNamedKey::F3 => NamedKey::F3,
        WinitNamedKey::F4 => NamedKey::F4,
        WinitNamedKey::F5 => NamedKey::F5,
        WinitNamedKey::F6 => NamedKey::F6,
        WinitNamedKey::F7 => NamedKey::F7,
        WinitNamedKey::F8 => NamedKey::F8,
        WinitNamedKey::F9 => NamedKey::F9,
        WinitNamedKey::F10 => NamedKey::F10,
        WinitNamedKey::F11 => NamedKey::F11,
        WinitNamedKey::F12 => NamedKey::F12,
        _ => NamedKey::Unidentified,
    };
    Key::Named(named)
}

fn location_from_winit(location: WinitKeyLocation) -> Location {
    match location {
        WinitKeyLocation::Standard => Location::Standard,
        WinitKeyLocation::Left => Location::Left,
        WinitKeyLocation::Right => Location::Right,
        WinitKeyLocation::Numpad => Location::Numpad,
    }
}

/// Les noms `Debug` de `KeyCode` suivent ceux du W3C, sauf pour Super/Meta.
#[allow(deprecated)]
fn code_from_winit(physical_key: &PhysicalKey) -> Code {
    let PhysicalKey::Code(key_code) = physical_key else {
        return Code::Unidentified;
    };
    match key_code {
        KeyCode::SuperLeft => Code::MetaLeft,
        KeyCode::SuperRight => Code::MetaRight,
        KeyCode::Meta => Code::Super,
        other => format!("{other:?}")
            .parse::<Code>()
            .unwrap_or(Code::Unidentified),
    }
}

fn modifiers_from_winit(mods: ModifiersState) -> Modifiers {
    let mut modifiers = Modifiers::empty();
    modifiers.set(Modifiers::CONTROL, mods.control_key());
    modifiers.set(Modifiers::SHIFT, mods.shift_key());
    modifiers.set(Modifiers::ALT, mods.alt_key());
    modifiers.set(Modifiers::META, mods.super_key());
    modifiers
}
