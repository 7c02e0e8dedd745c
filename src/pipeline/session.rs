// src/pipeline/session.rs
//
// Inspection session state machine.
//
//   Idle ──start_camera──▶ Previewing ──start_recording──▶ Recording
//                              ▲   (needs a vehicle box)        │
//                              │                         stop_recording
//                            retry                              ▼
//   Idle ◀──restart── Complete / Failed ◀──upload result── Uploading
//
// The machine is the single owner of the session state and of the epoch
// counter. Every transition that begins or abandons a capture bumps the
// epoch so detector results from the previous capture are ignored.

use crate::upload_client::InspectionResult;
use serde::Serialize;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionState {
    Idle,
    Previewing,
    Recording,
    Uploading,
    Complete,
    Failed,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::Previewing => "PREVIEWING",
            Self::Recording => "RECORDING",
            Self::Uploading => "UPLOADING",
            Self::Complete => "COMPLETE",
            Self::Failed => "FAILED",
        }
    }

    /// States in which frames are analysed and detections requested
    pub fn is_capturing(&self) -> bool {
        matches!(self, Self::Previewing | Self::Recording)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionAction {
    StartCamera,
    StartRecording,
    StopRecording,
    UploadSucceeded,
    UploadFailed,
    Retry,
    Restart,
}

#[derive(Debug, Error, PartialEq)]
pub enum TransitionError {
    #[error("cannot {action:?} while {from:?}")]
    Illegal {
        from: SessionState,
        action: SessionAction,
    },
    #[error("no vehicle detected yet, recording not started")]
    VehicleNotDetected,
}

pub struct SessionMachine {
    state: SessionState,
    epoch: u64,
    last_error: Option<String>,
    result: Option<InspectionResult>,
}

impl SessionMachine {
    pub fn new() -> Self {
        Self {
            state: SessionState::Idle,
            epoch: 0,
            last_error: None,
            result: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn result(&self) -> Option<&InspectionResult> {
        self.result.as_ref()
    }

    fn require(&self, allowed: &[SessionState], action: SessionAction) -> Result<(), TransitionError> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(TransitionError::Illegal {
                from: self.state,
                action,
            })
        }
    }

    fn enter(&mut self, next: SessionState) {
        info!("Session {} → {}", self.state.as_str(), next.as_str());
        self.state = next;
    }

    /// Idle → Previewing. Starts a new epoch.
    pub fn start_camera(&mut self) -> Result<u64, TransitionError> {
        self.require(&[SessionState::Idle], SessionAction::StartCamera)?;
        self.epoch += 1;
        self.last_error = None;
        self.result = None;
        self.enter(SessionState::Previewing);
        Ok(self.epoch)
    }

    /// Previewing → Recording, only with a valid vehicle box in view.
    /// Without one the state is left unchanged.
    pub fn start_recording(&mut self, vehicle_present: bool) -> Result<(), TransitionError> {
        self.require(&[SessionState::Previewing], SessionAction::StartRecording)?;
        if !vehicle_present {
            return Err(TransitionError::VehicleNotDetected);
        }
        self.enter(SessionState::Recording);
        Ok(())
    }

    /// Recording → Uploading. Starts a new epoch so in-flight detections
    /// for the finished recording are dropped.
    pub fn stop_recording(&mut self) -> Result<u64, TransitionError> {
        self.require(&[SessionState::Recording], SessionAction::StopRecording)?;
        self.epoch += 1;
        self.enter(SessionState::Uploading);
        Ok(self.epoch)
    }

    /// Uploading → Complete
    pub fn upload_succeeded(&mut self, result: InspectionResult) -> Result<(), TransitionError> {
        self.require(&[SessionState::Uploading], SessionAction::UploadSucceeded)?;
        self.result = Some(result);
        self.enter(SessionState::Complete);
        Ok(())
    }

    /// Uploading → Failed, keeping the collaborator's message for display.
    pub fn upload_failed(&mut self, error: String) -> Result<(), TransitionError> {
        self.require(&[SessionState::Uploading], SessionAction::UploadFailed)?;
        self.last_error = Some(error);
        self.enter(SessionState::Failed);
        Ok(())
    }

    /// Failed → Previewing (manual retry). Starts a new epoch.
    pub fn retry(&mut self) -> Result<u64, TransitionError> {
        self.require(&[SessionState::Failed], SessionAction::Retry)?;
        self.epoch += 1;
        self.last_error = None;
        self.enter(SessionState::Previewing);
        Ok(self.epoch)
    }

    /// Complete / Failed → Idle. Starts a new epoch.
    pub fn restart(&mut self) -> Result<u64, TransitionError> {
        self.require(
            &[SessionState::Complete, SessionState::Failed],
            SessionAction::Restart,
        )?;
        self.epoch += 1;
        self.enter(SessionState::Idle);
        Ok(self.epoch)
    }
}

impl Default for SessionMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uploading() -> SessionMachine {
        let mut m = SessionMachine::new();
        m.start_camera().unwrap();
        m.start_recording(true).unwrap();
        m.stop_recording().unwrap();
        m
    }

    #[test]
    fn test_happy_path() {
        let mut m = uploading();
        m.upload_succeeded(InspectionResult::default()).unwrap();
        assert_eq!(m.state(), SessionState::Complete);
        assert!(m.result().is_some());

        m.restart().unwrap();
        assert_eq!(m.state(), SessionState::Idle);
    }

    #[test]
    fn test_recording_requires_vehicle() {
        let mut m = SessionMachine::new();
        m.start_camera().unwrap();

        assert_eq!(m.start_recording(false), Err(TransitionError::VehicleNotDetected));
        assert_eq!(m.state(), SessionState::Previewing);
    }

    #[test]
    fn test_illegal_transitions_leave_state_unchanged() {
        let mut m = SessionMachine::new();
        assert!(matches!(m.start_recording(true), Err(TransitionError::Illegal { .. })));
        assert!(m.stop_recording().is_err());
        assert!(m.retry().is_err());
        assert!(m.restart().is_err());
        assert!(m.upload_succeeded(InspectionResult::default()).is_err());
        assert_eq!(m.state(), SessionState::Idle);

        m.start_camera().unwrap();
        assert!(m.start_camera().is_err());
        assert!(m.upload_failed("boom".to_string()).is_err());
        assert_eq!(m.state(), SessionState::Previewing);
    }

    #[test]
    fn test_failure_exposes_error_and_allows_retry() {
        let mut m = uploading();
        m.upload_failed("HTTP 502".to_string()).unwrap();
        assert_eq!(m.state(), SessionState::Failed);
        assert_eq!(m.last_error(), Some("HTTP 502"));

        m.retry().unwrap();
        assert_eq!(m.state(), SessionState::Previewing);
        assert_eq!(m.last_error(), None);
    }

    #[test]
    fn test_epoch_advances_on_session_boundaries() {
        let mut m = SessionMachine::new();
        let e1 = m.start_camera().unwrap();
        m.start_recording(true).unwrap();
        assert_eq!(m.epoch(), e1, "recording continues the preview epoch");

        let e2 = m.stop_recording().unwrap();
        assert!(e2 > e1);
        m.upload_failed("timeout".to_string()).unwrap();
        let e3 = m.retry().unwrap();
        assert!(e3 > e2);
    }
}
