//! Button and axis state plus curve evaluation.
//!
//! Bindings name inputs per device; the host answers queries through
//! [`InputDevices`]. State is kept per uniform key so edges are detected
//! between consecutive frames of the same uniform.
use std::collections::{HashMap, HashSet};

use crate::audio::AudioLevels;
use crate::layer::{AxisBinding, AxisBindings, ButtonBindings, Curve, CurveInput};

/// One device's view of a button.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ButtonSample {
    pub button_held: bool,
    pub touch_held: bool,
    /// Analogue pressure in `[0, 1]`, 0 for digital buttons.
    pub value: f64,
}

/// Host-side input devices.
pub trait InputDevices {
    fn button(&self, device: &str, input: &str) -> Option<ButtonSample>;
    fn axis(&self, device: &str, input: &str) -> Option<f64>;
}

/// No devices connected: every button is up and every axis centred.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoInputDevices;

impl InputDevices for NoInputDevices {
    fn button(&self, _device: &str, _input: &str) -> Option<ButtonSample> {
        None
    }

    fn axis(&self, _device: &str, _input: &str) -> Option<f64> {
        None
    }
}

/// A fixed set of device readings, handy for tools and tests.
#[derive(Debug, Clone, Default)]
pub struct InputSnapshot {
    pub buttons: HashMap<(String, String), ButtonSample>,
    pub axes: HashMap<(String, String), f64>,
}

impl InputSnapshot {
    pub fn press(&mut self, device: &str, input: &str) {
        self.buttons.insert(
            (device.to_string(), input.to_string()),
            ButtonSample {
                button_held: true,
                ..ButtonSample::default()
            },
        );
    }

    pub fn lift(&mut self, device: &str, input: &str) {
        self.buttons.remove(&(device.to_string(), input.to_string()));
    }

    pub fn set_axis(&mut self, device: &str, input: &str, value: f64) {
        self.axes.insert((device.to_string(), input.to_string()), value);
    }
}

impl InputDevices for InputSnapshot {
    fn button(&self, device: &str, input: &str) -> Option<ButtonSample> {
        self.buttons
            .get(&(device.to_string(), input.to_string()))
            .copied()
    }

    fn axis(&self, device: &str, input: &str) -> Option<f64> {
        self.axes.get(&(device.to_string(), input.to_string())).copied()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ButtonState {
    pub held: bool,
    pub triggered: bool,
    pub released: bool,
    pub value: f64,
    pub triggered_timestamp: f64,
    pub released_timestamp: f64,
}

impl ButtonState {
    /// `vec4(held, triggered, released, secondsSinceTriggered)`.
    pub fn as_uniform(&self, now: f64) -> [f32; 4] {
        let flag = |on: bool| if on { 1.0 } else { 0.0 };
        [
            flag(self.held),
            flag(self.triggered),
            flag(self.released),
            (now - self.triggered_timestamp).max(0.0) as f32,
        ]
    }
}

/// Identity of a uniform's input state: `layerId\0name`, with `_curve`
/// appended for the state behind a curve.
pub fn uniform_key(layer_id: &str, uniform: &str, curve: bool) -> String {
    let suffix = if curve { "_curve" } else { "" };
    format!("{layer_id}\0{uniform}{suffix}")
}

fn key_layer(key: &str) -> &str {
    key.split('\0').next().unwrap_or(key)
}

/// Linear remap of a clamped input onto the curve range.
pub fn apply_curve(curve: &Curve, input: f64) -> f64 {
    let t = if input.is_nan() { 0.0 } else { input.clamp(0.0, 1.0) };
    curve.min + (curve.max - curve.min) * t
}

/// Everything a curve input can read in one frame.
#[derive(Clone, Copy)]
pub struct CurveContext<'a> {
    pub time: f64,
    pub audio: AudioLevels,
    pub devices: &'a dyn InputDevices,
}

#[derive(Debug, Default)]
pub struct InputState {
    frame: u64,
    buttons: HashMap<String, (u64, ButtonState)>,
    axes: HashMap<String, (u64, f64)>,
}

impl InputState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a new frame; each key is updated at most once per frame.
    pub fn begin_frame(&mut self, frame: u64) {
        self.frame = frame;
    }

    pub fn button(&self, key: &str) -> Option<ButtonState> {
        self.buttons.get(key).map(|(_, state)| *state)
    }

    pub fn axis(&self, key: &str) -> Option<f64> {
        self.axes.get(key).map(|(_, value)| *value)
    }

    pub fn evaluate_button(
        &mut self,
        key: &str,
        bindings: &ButtonBindings,
        devices: &dyn InputDevices,
        now: f64,
    ) -> ButtonState {
        if let Some((frame, state)) = self.buttons.get(key) {
            if *frame == self.frame {
                return *state;
            }
        }

        let mut held = false;
        let mut value: f64 = 0.0;
        for (device, input) in &bindings.0 {
            if let Some(sample) = devices.button(device, input) {
                held |= sample.button_held || sample.touch_held;
                value = value.max(sample.value);
            }
        }

        let previous = self.button(key).unwrap_or_default();
        let triggered = held && !previous.held;
        let released = !held && previous.held;
        let state = ButtonState {
            held,
            triggered,
            released,
            value,
            triggered_timestamp: if triggered { now } else { previous.triggered_timestamp },
            released_timestamp: if released { now } else { previous.released_timestamp },
        };
        self.buttons.insert(key.to_string(), (self.frame, state));
        state
    }

    pub fn evaluate_axis(&mut self, key: &str, bindings: &AxisBindings, devices: &dyn InputDevices) -> f64 {
        if let Some((frame, value)) = self.axes.get(key) {
            if *frame == self.frame {
                return *value;
            }
        }

        let mut best: Option<f64> = None;
        for (device, binding) in &bindings.0 {
            let reading = match binding {
                AxisBinding::Axis(input) => devices.axis(device, input),
                AxisBinding::Buttons { buttons, default } => {
                    let mut pressed = buttons.iter().filter(|(input, _)| {
                        devices
                            .button(device, input)
                            .is_some_and(|sample| sample.button_held || sample.touch_held)
                    });
                    match (pressed.next(), pressed.next()) {
                        (Some((_, value)), None) => Some(*value),
                        _ => Some(*default),
                    }
                }
            };
            if let Some(reading) = reading.filter(|r| r.is_finite()) {
                if best.map_or(true, |current| reading.abs() > current.abs()) {
                    best = Some(reading);
                }
            }
        }

        let value = best.unwrap_or(0.0);
        self.axes.insert(key.to_string(), (self.frame, value));
        value
    }

    /// Samples `curve`'s input and remaps it. `key` must be the curve key
    /// from [`uniform_key`].
    pub fn evaluate_curve(&mut self, key: &str, curve: &Curve, context: CurveContext<'_>) -> f64 {
        let input = match &curve.input {
            CurveInput::Time { duration, repeat } => {
                let progress = context.time / duration.max(f64::EPSILON);
                if *repeat {
                    progress.rem_euclid(1.0)
                } else {
                    progress
                }
            }
            CurveInput::Button { bindings } => {
                let state = self.evaluate_button(key, bindings, context.devices, context.time);
                if state.value > 0.0 {
                    state.value
                } else if state.held {
                    1.0
                } else {
                    0.0
                }
            }
            CurveInput::Axis { bindings } => self.evaluate_axis(key, bindings, context.devices),
            CurveInput::AudioVolume => f64::from(context.audio.volume),
            CurveInput::AudioPeak => f64::from(context.audio.peak),
            CurveInput::AudioTrough => f64::from(context.audio.trough),
            CurveInput::AudioReactive => f64::from(context.audio.reactive),
        };
        apply_curve(curve, input)
    }

    /// Forgets the state of layers that no longer exist.
    pub fn retain_layers(&mut self, live: &HashSet<&str>) {
        self.buttons.retain(|key, _| live.contains(key_layer(key)));
        self.axes.retain(|key, _| live.contains(key_layer(key)));
    }

    pub fn len(&self) -> usize {
        self.buttons.len() + self.axes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    fn space() -> ButtonBindings {
        ButtonBindings(BTreeMap::from([("keyboard".to_string(), "Space".to_string())]))
    }

    #[test]
    fn trigger_fires_once_with_the_transition_timestamp() {
        let mut state = InputState::new();
        let mut devices = InputSnapshot::default();
        let key = uniform_key("layer", "jump", false);

        state.begin_frame(1);
        assert!(!state.evaluate_button(&key, &space(), &devices, 0.1).triggered);

        devices.press("keyboard", "Space");
        state.begin_frame(2);
        let pressed = state.evaluate_button(&key, &space(), &devices, 0.2);
        assert!(pressed.held && pressed.triggered);
        assert_eq!(pressed.triggered_timestamp, 0.2);
        assert_eq!(state.evaluate_button(&key, &space(), &devices, 0.2), pressed, "once per frame");

        state.begin_frame(3);
        let still = state.evaluate_button(&key, &space(), &devices, 0.3);
        assert!(still.held && !still.triggered);
        assert_eq!(still.triggered_timestamp, 0.2);

        devices.lift("keyboard", "Space");
        state.begin_frame(4);
        let up = state.evaluate_button(&key, &space(), &devices, 0.4);
        assert!(!up.held && up.released);
        assert_eq!(up.released_timestamp, 0.4);
        assert_eq!(up.as_uniform(0.5), [0.0, 0.0, 1.0, 0.3]);
    }

    #[test]
    fn held_is_ored_and_value_is_maxed_across_devices() {
        let bindings = ButtonBindings(BTreeMap::from([
            ("gamepad".to_string(), "A".to_string()),
            ("touch".to_string(), "screen".to_string()),
        ]));
        let mut devices = InputSnapshot::default();
        devices.buttons.insert(
            ("gamepad".into(), "A".into()),
            ButtonSample {
                button_held: false,
                touch_held: false,
                value: 0.4,
            },
        );
        devices.buttons.insert(
            ("touch".into(), "screen".into()),
            ButtonSample {
                button_held: false,
                touch_held: true,
                value: 0.0,
            },
        );
        let mut state = InputState::new();
        let result = state.evaluate_button("k", &bindings, &devices, 1.0);
        assert!(result.held);
        assert_eq!(result.value, 0.4);
    }

    #[test]
    fn largest_axis_magnitude_wins() {
        let bindings = AxisBindings(BTreeMap::from([
            ("a".to_string(), AxisBinding::Axis("x".into())),
            ("b".to_string(), AxisBinding::Axis("x".into())),
        ]));
        let mut devices = InputSnapshot::default();
        devices.set_axis("a", "x", 0.3);
        devices.set_axis("b", "x", -0.7);
        let mut state = InputState::new();
        assert_eq!(state.evaluate_axis("k", &bindings, &devices), -0.7);
    }

    #[test]
    fn axis_from_buttons_needs_exactly_one_press() {
        let bindings = AxisBindings(BTreeMap::from([(
            "keyboard".to_string(),
            AxisBinding::Buttons {
                buttons: BTreeMap::from([("Left".to_string(), -1.0), ("Right".to_string(), 1.0)]),
                default: 0.0,
            },
        )]));
        let mut devices = InputSnapshot::default();
        let mut state = InputState::new();

        devices.press("keyboard", "Right");
        state.begin_frame(1);
        assert_eq!(state.evaluate_axis("k", &bindings, &devices), 1.0);

        devices.press("keyboard", "Left");
        state.begin_frame(2);
        assert_eq!(state.evaluate_axis("k", &bindings, &devices), 0.0);
    }

    #[test]
    fn curves_clamp_and_remap() {
        let curve = Curve {
            min: 2.0,
            max: 4.0,
            input: CurveInput::Time {
                duration: 2.0,
                repeat: false,
            },
        };
        assert_eq!(apply_curve(&curve, -1.0), 2.0);
        assert_eq!(apply_curve(&curve, 0.25), 2.5);
        assert_eq!(apply_curve(&curve, 9.0), 4.0);

        let mut state = InputState::new();
        let context = CurveContext {
            time: 1.0,
            audio: AudioLevels::default(),
            devices: &NoInputDevices,
        };
        assert_eq!(state.evaluate_curve("k", &curve, context), 3.0);

        let repeating = Curve {
            input: CurveInput::Time {
                duration: 2.0,
                repeat: true,
            },
            ..curve
        };
        let later = CurveContext { time: 5.0, ..context };
        assert_eq!(state.evaluate_curve("k", &repeating, later), 3.0);
    }

    #[test]
    fn state_of_deleted_layers_is_dropped() {
        let mut state = InputState::new();
        state.evaluate_button(&uniform_key("keep", "a", false), &space(), &NoInputDevices, 0.0);
        state.evaluate_button(&uniform_key("gone", "a", true), &space(), &NoInputDevices, 0.0);
        state.retain_layers(&HashSet::from(["keep"]));
        assert_eq!(state.len(), 1);
        assert!(state.button(&uniform_key("keep", "a", false)).is_some());
    }
}
