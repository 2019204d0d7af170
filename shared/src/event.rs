use serde::{Deserialize, Serialize};

use crate::capabilities::{GeolocationResult, HttpResult};
use crate::model::ImageSelection;

/// Everything that can happen to the core: user interactions and settled
/// capability results. Async results carry the `attempt` they were started
/// under so the reducer can drop the ones that have gone stale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    // Selection
    ImageSelected {
        image: ImageSelection,
    },

    // Analysis
    SubmitRequested,
    CancelRequested,
    ProgressTick {
        attempt: u64,
    },
    PredictionResponse {
        attempt: u64,
        result: Box<HttpResult>,
    },

    // Location gate
    LocationPermissionRequested,
    PositionResult(Box<GeolocationResult>),

    // Nearby providers
    ProviderLookupResponse {
        attempt: u64,
        result: Box<HttpResult>,
    },
}

impl Event {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::ImageSelected { .. } => "image_selected",
            Self::SubmitRequested => "submit_requested",
            Self::CancelRequested => "cancel_requested",
            Self::ProgressTick { .. } => "progress_tick",
            Self::PredictionResponse { .. } => "prediction_response",
            Self::LocationPermissionRequested => "location_permission_requested",
            Self::PositionResult(_) => "position_result",
            Self::ProviderLookupResponse { .. } => "provider_lookup_response",
        }
    }

    #[must_use]
    pub const fn is_user_initiated(&self) -> bool {
        matches!(
            self,
            Self::ImageSelected { .. }
                | Self::SubmitRequested
                | Self::CancelRequested
                | Self::LocationPermissionRequested
        )
    }
}
