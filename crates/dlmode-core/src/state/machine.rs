//! Device session states and transitions.

use std::fmt;

/// Where the device session currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeviceState {
    /// No transport open.
    #[default]
    NoDevice,
    /// Transport open, no PIT held.
    Detected,
    /// Transport open and a validated PIT held.
    PitReady,
    /// A flash session is in flight.
    Flashing,
    /// Settings surface open; flashing state is left untouched.
    Settings,
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceState::NoDevice => write!(f, "No Device"),
            DeviceState::Detected => write!(f, "Detected"),
            DeviceState::PitReady => write!(f, "PIT Ready"),
            DeviceState::Flashing => write!(f, "Flashing"),
            DeviceState::Settings => write!(f, "Settings"),
        }
    }
}

impl DeviceState {
    /// Resting state for an open device.
    pub fn ready(has_pit: bool) -> Self {
        if has_pit {
            DeviceState::PitReady
        } else {
            DeviceState::Detected
        }
    }
}

/// Current state plus the state to return to when leaving settings.
#[derive(Debug, Default)]
pub struct StateMachine {
    state: DeviceState,
    resume: Option<DeviceState>,
}

impl StateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> DeviceState {
        self.state
    }

    /// Transition to a new state, returning the previous one.
    pub fn goto_state(&mut self, new_state: DeviceState) -> DeviceState {
        let from = self.state;
        if from != new_state {
            tracing::info!(from = %from, to = %new_state, "State transition");
        }
        self.state = new_state;
        from
    }

    /// Enter the settings side state, remembering where to return.
    ///
    /// Returns `false` when already in settings or while flashing.
    pub fn enter_settings(&mut self) -> bool {
        if matches!(self.state, DeviceState::Settings | DeviceState::Flashing) {
            return false;
        }
        self.resume = Some(self.state);
        self.goto_state(DeviceState::Settings);
        true
    }

    /// Leave settings, restoring the state it was entered from.
    pub fn leave_settings(&mut self) -> bool {
        match self.resume.take() {
            Some(previous) if self.state == DeviceState::Settings => {
                self.goto_state(previous);
                true
            }
            other => {
                self.resume = other;
                false
            }
        }
    }
}
