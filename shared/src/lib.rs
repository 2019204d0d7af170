#![forbid(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod app;
pub mod capabilities;
pub mod event;
pub mod model;

use serde::{Deserialize, Serialize};

pub use app::{App, ProviderView, ResultView, ViewModel};
pub use capabilities::{Capabilities, Effect};
pub use crux_core::{render::Render, App as CruxApp};
pub use event::Event;
pub use model::{
    Coordinate, ImageSelection, InferenceResult, LocationPermissionState, Model, ProgressState,
    Provider, TriageConfig,
};

// Simulated progress: +5% every 300ms, capped at 90 so the real completion
// always lands visibly above it.
pub const PROGRESS_TICK_MS: u64 = 300;
pub const PROGRESS_STEP_PERCENT: u8 = 5;
pub const PROGRESS_CAP_PERCENT: u8 = 90;

/// Used when the backend omits the confidence or sends something unparseable.
pub const FALLBACK_CONFIDENCE: f64 = 100.0;

pub const PREDICT_TIMEOUT_MS: u64 = 60_000;
pub const LOOKUP_TIMEOUT_MS: u64 = 30_000;

// Reference deployment values; shells override via `TriageConfig`.
pub const DEFAULT_PREDICT_URL: &str = "https://backendpneumo.onrender.com/predict";
pub const DEFAULT_DIRECTORY_URL: &str = "https://nominatim.openstreetmap.org/search";
pub const DEFAULT_SEARCH_TERM: &str = "pulmonologist";
pub const DEFAULT_COUNTRY_CODES: &str = "in";
pub const DEFAULT_RESULT_LIMIT: u8 = 6;
pub const DEFAULT_BBOX_DELTA_DEG: f64 = 0.05;
pub const DEFAULT_FINDING_TOKEN: &str = "pneumonia";

/// The ways a user-visible step can fail. Primary-path failures become the
/// active notice; `LookupFailed` never reaches the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    NoFileSelected,
    RequestFailed,
    LocationDenied,
    LocationUnsupported,
    LookupFailed,
}

impl FailureKind {
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::NoFileSelected => "NO_FILE_SELECTED",
            Self::RequestFailed => "REQUEST_FAILED",
            Self::LocationDenied => "LOCATION_DENIED",
            Self::LocationUnsupported => "LOCATION_UNSUPPORTED",
            Self::LookupFailed => "LOOKUP_FAILED",
        }
    }

    #[must_use]
    pub const fn user_facing_message(self) -> &'static str {
        match self {
            Self::NoFileSelected => "Please select an X-ray image first.",
            Self::RequestFailed => "Unable to get a prediction. Please try again.",
            Self::LocationDenied => {
                "Location access denied. Please enable location to find doctors near you."
            }
            Self::LocationUnsupported => "Location is not supported on this device.",
            Self::LookupFailed => "Could not find nearby doctors right now.",
        }
    }

    /// Whether this failure should interrupt the user at all.
    #[must_use]
    pub const fn is_user_visible(self) -> bool {
        !matches!(self, Self::LookupFailed)
    }
}

/// The single active user-facing notice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notice {
    pub kind: FailureKind,
    pub message: String,
}

impl Notice {
    #[must_use]
    pub fn new(kind: FailureKind) -> Self {
        Self {
            kind,
            message: kind.user_facing_message().to_string(),
        }
    }
}
