//! Error types of the pitch core.
//!
//! Only resource acquisition can fail. Algorithmic edge cases (short windows,
//! silent spectra, no threshold crossing) are reported as data instead.

/// Failures of the capture and playback devices.
#[derive(Debug, thiserror::Error)]
pub enum AudioError {
    /// The host has no default device of the requested direction.
    #[error("no {0} device available")]
    NoDevice(&'static str),

    /// The platform refused access to the microphone.
    #[error("permission to use the audio device was denied")]
    PermissionDenied,

    /// The device exists but could not be opened or started.
    #[error("audio device unavailable: {0}")]
    DeviceUnavailable(String),

    /// No configuration matches the requested rate and sample formats.
    #[error("unsupported stream configuration: {0}")]
    UnsupportedConfig(String),

    /// The running stream reported an error.
    #[error("audio stream error: {0}")]
    Stream(String),

    /// The background worker thread could not be spawned.
    #[error("failed to spawn audio worker: {0}")]
    WorkerSpawn(#[from] std::io::Error),
}

/// Failures reading or writing persisted settings.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("malformed settings file: {0}")]
    Json(#[from] serde_json::Error),

    /// JSON has no representation for NaN or infinity.
    #[error("refusing to store non-finite value {value} under {key}")]
    NonFinite { key: String, value: f32 },
}

/// Failures of a calibration run.
///
/// Cancellation is not an error; see [`crate::calibration::CalibrationOutcome`].
#[derive(Debug, thiserror::Error)]
pub enum CalibrationError {
    /// Another calibration is still playing its tone.
    #[error("a calibration is already in progress")]
    AlreadyCalibrating,

    /// The reference frequency or tone duration cannot be played.
    #[error("invalid calibration tone: {0}")]
    InvalidTone(String),

    /// The playback device failed to open or failed mid-tone.
    #[error("calibration tone playback failed: {0}")]
    Playback(#[from] AudioError),
}

impl AudioError {
    /// Maps a backend-specific description, recognising permission refusals.
    pub(crate) fn from_backend(description: &str) -> Self {
        let lowered = description.to_ascii_lowercase();
        if lowered.contains("permission") || lowered.contains("not authorized") {
            AudioError::PermissionDenied
        } else {
            AudioError::DeviceUnavailable(description.to_string())
        }
    }
}

impl From<cpal::BuildStreamError> for AudioError {
    fn from(err: cpal::BuildStreamError) -> Self {
        match err {
            cpal::BuildStreamError::BackendSpecific { err } => {
                AudioError::from_backend(&err.description)
            }
            cpal::BuildStreamError::StreamConfigNotSupported => AudioError::UnsupportedConfig(
                "the device rejected the stream configuration".to_string(),
            ),
            other => AudioError::DeviceUnavailable(other.to_string()),
        }
    }
}

impl From<cpal::PlayStreamError> for AudioError {
    fn from(err: cpal::PlayStreamError) -> Self {
        match err {
            cpal::PlayStreamError::BackendSpecific { err } => {
                AudioError::from_backend(&err.description)
            }
            other => AudioError::DeviceUnavailable(other.to_string()),
        }
    }
}

impl From<cpal::SupportedStreamConfigsError> for AudioError {
    fn from(err: cpal::SupportedStreamConfigsError) -> Self {
        match err {
            cpal::SupportedStreamConfigsError::BackendSpecific { err } => {
                AudioError::from_backend(&err.description)
            }
            other => AudioError::DeviceUnavailable(other.to_string()),
        }
    }
}
