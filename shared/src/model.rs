use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::{
    Notice, DEFAULT_BBOX_DELTA_DEG, DEFAULT_COUNTRY_CODES, DEFAULT_DIRECTORY_URL,
    DEFAULT_FINDING_TOKEN, DEFAULT_PREDICT_URL, DEFAULT_RESULT_LIMIT, DEFAULT_SEARCH_TERM,
    PROGRESS_CAP_PERCENT, PROGRESS_STEP_PERCENT,
};

/// Validated lat/lon. Rejects NaN, infinities and out-of-range values so the
/// rest of the core never has to re-check.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    lat: f64,
    lon: f64,
}

#[derive(Debug, Clone, thiserror::Error, PartialEq)]
pub enum CoordinateError {
    #[error("coordinate value is not finite")]
    NonFinite,
    #[error("latitude {0} is out of valid range [-90, 90]")]
    LatitudeOutOfRange(f64),
    #[error("longitude {0} is out of valid range [-180, 180]")]
    LongitudeOutOfRange(f64),
}

impl Coordinate {
    pub fn new(lat: f64, lon: f64) -> Result<Self, CoordinateError> {
        if !lat.is_finite() || !lon.is_finite() {
            return Err(CoordinateError::NonFinite);
        }
        if !(-90.0..=90.0).contains(&lat) {
            return Err(CoordinateError::LatitudeOutOfRange(lat));
        }
        if !(-180.0..=180.0).contains(&lon) {
            return Err(CoordinateError::LongitudeOutOfRange(lon));
        }
        Ok(Self { lat, lon })
    }

    #[must_use]
    pub const fn lat(self) -> f64 {
        self.lat
    }

    #[must_use]
    pub const fn lon(self) -> f64 {
        self.lon
    }
}

/// The currently chosen X-ray. The shell mints the preview URI when the user
/// picks a file; the core owns its lifecycle from then on.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSelection {
    pub data: Vec<u8>,
    pub file_name: String,
    pub preview_uri: String,
}

// Medical images are sensitive; keep the bytes out of Debug output.
impl fmt::Debug for ImageSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageSelection")
            .field("byte_len", &self.data.len())
            .field("file_name", &self.file_name)
            .field("preview_uri", &self.preview_uri)
            .finish()
    }
}

/// Parsed classifier output. Immutable once stored; superseded wholesale by
/// the next successful analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceResult {
    pub label: String,
    pub confidence: f64,
    pub probabilities: BTreeMap<String, f64>,
}

impl InferenceResult {
    /// Case-insensitive substring match against the configured finding token.
    #[must_use]
    pub fn is_positive(&self, finding_token: &str) -> bool {
        self.label
            .to_lowercase()
            .contains(&finding_token.to_lowercase())
    }
}

/// Cosmetic progress for one in-flight analysis. The percentage is simulated
/// and capped below 100 so the real completion always visibly lands above it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ProgressState {
    pub percent: u8,
    pub is_running: bool,
    pub is_cancelled: bool,
}

impl ProgressState {
    pub fn start(&mut self) {
        self.percent = 0;
        self.is_running = true;
        self.is_cancelled = false;
    }

    /// Advances one step, saturating at the cap.
    pub fn advance(&mut self) {
        self.percent = (self.percent + PROGRESS_STEP_PERCENT).min(PROGRESS_CAP_PERCENT);
    }

    pub fn finish(&mut self) {
        self.is_running = false;
    }

    pub fn cancel(&mut self) {
        self.is_cancelled = true;
        self.is_running = false;
        self.percent = 0;
    }

    #[must_use]
    pub const fn at_cap(&self) -> bool {
        self.percent >= PROGRESS_CAP_PERCENT
    }
}

/// Session-scoped location permission. Denial is sticky; the only way back
/// to `Unasked` is a fresh session (a new `Model`).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LocationPermissionState {
    #[default]
    Unasked,
    Requesting,
    Granted(Coordinate),
    Denied,
}

impl LocationPermissionState {
    #[must_use]
    pub const fn coordinate(&self) -> Option<Coordinate> {
        match self {
            Self::Granted(coord) => Some(*coord),
            _ => None,
        }
    }

    #[must_use]
    pub const fn is_denied(&self) -> bool {
        matches!(self, Self::Denied)
    }

    /// A new platform request is only allowed from `Unasked`; everything else
    /// is either in flight or already settled for this session.
    #[must_use]
    pub const fn can_request(&self) -> bool {
        matches!(self, Self::Unasked)
    }
}

/// One nearby specialist, normalized from a directory record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provider {
    pub display_label: String,
    pub secondary_label: String,
}

impl Provider {
    /// Splits a comma-delimited hierarchical place description: the leading
    /// segment becomes the display label, the next two the secondary line.
    #[must_use]
    pub fn from_display_name(display_name: &str) -> Self {
        let display_label = display_name
            .split(',')
            .next()
            .unwrap_or_default()
            .to_string();

        let secondary_label = display_name
            .split(',')
            .skip(1)
            .take(2)
            .map(str::trim)
            .collect::<Vec<_>>()
            .join(", ");

        Self {
            display_label,
            secondary_label,
        }
    }
}

/// Deployment knobs with the reference-deployment defaults. Shells override
/// these through `Model::with_config`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriageConfig {
    pub predict_url: String,
    pub directory_url: String,
    /// Free-text category sent to the directory service.
    pub search_term: String,
    pub country_codes: String,
    pub result_limit: u8,
    /// Half-width of the bounding box around the device, in degrees.
    pub bbox_delta_deg: f64,
    /// Label substring that marks a finding as positive.
    pub finding_token: String,
}

impl Default for TriageConfig {
    fn default() -> Self {
        Self {
            predict_url: DEFAULT_PREDICT_URL.to_string(),
            directory_url: DEFAULT_DIRECTORY_URL.to_string(),
            search_term: DEFAULT_SEARCH_TERM.to_string(),
            country_codes: DEFAULT_COUNTRY_CODES.to_string(),
            result_limit: DEFAULT_RESULT_LIMIT,
            bbox_delta_deg: DEFAULT_BBOX_DELTA_DEG,
            finding_token: DEFAULT_FINDING_TOKEN.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Model {
    pub config: TriageConfig,

    pub selection: Option<ImageSelection>,
    pub inference: Option<InferenceResult>,
    pub progress: ProgressState,

    pub location: LocationPermissionState,
    pub providers: Vec<Provider>,
    pub lookup_in_flight: bool,

    pub active_notice: Option<Notice>,

    /// Generation counter for in-flight work. Ticks and responses carry the
    /// attempt they were started under and are dropped when it has moved on.
    pub attempt: u64,
}

impl Model {
    #[must_use]
    pub fn with_config(config: TriageConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// Clears everything derived from the previous selection. Location
    /// permission deliberately survives; it is session-scoped.
    pub fn reset_analysis(&mut self) {
        self.inference = None;
        self.progress = ProgressState::default();
        self.providers.clear();
        self.lookup_in_flight = false;
        self.active_notice = None;
    }

    pub fn set_notice(&mut self, notice: Notice) {
        self.active_notice = Some(notice);
    }

    pub fn clear_notice(&mut self) {
        self.active_notice = None;
    }

    #[must_use]
    pub fn has_positive_finding(&self) -> bool {
        self.inference
            .as_ref()
            .map(|r| r.is_positive(&self.config.finding_token))
            .unwrap_or(false)
    }
}
