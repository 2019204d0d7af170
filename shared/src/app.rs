use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use url::Url;

use crate::capabilities::{
    Capabilities, GeolocationError, HttpError, HttpRequest, HttpResponse, MultipartForm,
};
use crate::event::Event;
use crate::model::{
    Coordinate, InferenceResult, LocationPermissionState, Model, Provider, TriageConfig,
};
use crate::{
    FailureKind, Notice, FALLBACK_CONFIDENCE, LOOKUP_TIMEOUT_MS, PREDICT_TIMEOUT_MS,
    PROGRESS_TICK_MS,
};

#[derive(Default)]
pub struct App;

/// Wire shape of the classification backend's success payload. The reference
/// backend formats numbers as percent strings ("88.5%"), so everything
/// numeric is taken as a raw value and parsed leniently.
#[derive(Debug, Deserialize)]
struct PredictionPayload {
    prediction: Option<String>,
    confidence: Option<serde_json::Value>,
    #[serde(default)]
    probabilities: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Error)]
enum PredictionParseError {
    #[error("malformed prediction payload: {0}")]
    Malformed(String),
    #[error("payload has no prediction label")]
    MissingLabel,
}

/// One record from the directory service; everything beyond `display_name`
/// is ignored.
#[derive(Debug, Deserialize)]
struct PlaceRecord {
    display_name: String,
}

impl App {
    /// Accepts numbers, numeric strings, and percent-suffixed strings.
    fn lenient_percent(value: &serde_json::Value) -> Option<f64> {
        let parsed = match value {
            serde_json::Value::Number(n) => n.as_f64(),
            serde_json::Value::String(s) => {
                s.trim().trim_end_matches('%').trim().parse::<f64>().ok()
            }
            _ => None,
        };
        parsed.filter(|v| v.is_finite())
    }

    fn parse_prediction(body: &[u8]) -> Result<InferenceResult, PredictionParseError> {
        let payload: PredictionPayload = serde_json::from_slice(body)
            .map_err(|e| PredictionParseError::Malformed(e.to_string()))?;

        // The reference backend reports errors as 200s with an "error" body,
        // which shows up here as a payload without a label.
        let label = payload.prediction.ok_or(PredictionParseError::MissingLabel)?;

        let confidence = payload
            .confidence
            .as_ref()
            .and_then(Self::lenient_percent)
            .unwrap_or(FALLBACK_CONFIDENCE)
            .clamp(0.0, 100.0);

        let probabilities = payload
            .probabilities
            .iter()
            .filter_map(|(k, v)| Self::lenient_percent(v).map(|p| (k.clone(), p)))
            .collect();

        Ok(InferenceResult {
            label,
            confidence,
            probabilities,
        })
    }

    fn parse_providers(body: &[u8], limit: u8) -> Result<Vec<Provider>, HttpError> {
        let records: Vec<PlaceRecord> =
            serde_json::from_slice(body).map_err(|e| HttpError::InvalidResponse {
                reason: e.to_string(),
            })?;

        Ok(records
            .into_iter()
            .take(limit as usize)
            .map(|r| Provider::from_display_name(&r.display_name))
            .collect())
    }

    /// Bounded-region directory query around the device coordinate.
    fn build_directory_request(
        config: &TriageConfig,
        coord: Coordinate,
    ) -> Result<HttpRequest, HttpError> {
        let mut url = Url::parse(&config.directory_url).map_err(|e| HttpError::InvalidUrl {
            url: config.directory_url.clone(),
            reason: e.to_string(),
        })?;

        let delta = config.bbox_delta_deg;
        let (lat, lon) = (coord.lat(), coord.lon());
        let viewbox = format!(
            "{},{},{},{}",
            lon - delta,
            lat + delta,
            lon + delta,
            lat - delta
        );

        url.query_pairs_mut()
            .append_pair("format", "json")
            .append_pair("q", &config.search_term)
            .append_pair("addressdetails", "1")
            .append_pair("limit", &config.result_limit.to_string())
            .append_pair("countrycodes", &config.country_codes)
            .append_pair("viewbox", &viewbox)
            .append_pair("bounded", "1");

        HttpRequest::get(url.as_str())?.with_timeout_ms(LOOKUP_TIMEOUT_MS)
    }

    fn send_prediction_request(model: &Model, caps: &Capabilities) -> Result<(), HttpError> {
        let Some(selection) = &model.selection else {
            return Ok(());
        };

        let mut form = MultipartForm::new();
        form.add_file("image", &selection.file_name, &selection.data);

        let request = HttpRequest::post(&model.config.predict_url)?
            .with_header("Content-Type", form.content_type())
            .with_timeout_ms(PREDICT_TIMEOUT_MS)?
            .with_body(form.finish())?;

        let attempt = model.attempt;
        caps.http.send(request, move |result| Event::PredictionResponse {
            attempt,
            result: Box::new(result),
        });

        Ok(())
    }

    /// Kicks off the nearby-provider lookup. Callers guarantee the finding is
    /// positive and the coordinate resolved; this only guards reentrancy.
    fn start_provider_lookup(coord: Coordinate, model: &mut Model, caps: &Capabilities) {
        if model.lookup_in_flight {
            return;
        }

        match Self::build_directory_request(&model.config, coord) {
            Ok(request) => {
                model.lookup_in_flight = true;
                let attempt = model.attempt;
                caps.http
                    .send(request, move |result| Event::ProviderLookupResponse {
                        attempt,
                        result: Box::new(result),
                    });
            }
            Err(e) => {
                // Best-effort feature: log and move on.
                caps.telemetry.error("lookup_request_invalid", &e.to_string());
            }
        }
    }

    /// Raises the one-shot platform position request. Used both by the
    /// explicit user action and by the automatic post-positive prompt.
    fn request_position(model: &mut Model, caps: &Capabilities) {
        model.location = LocationPermissionState::Requesting;
        caps.geolocation
            .get_current_position(|result| Event::PositionResult(Box::new(result)));
    }

    fn arm_progress_ticker(attempt: u64, caps: &Capabilities) {
        caps.timer
            .notify_after(PROGRESS_TICK_MS, move |_| Event::ProgressTick { attempt });
    }

    fn handle_prediction_success(response: &HttpResponse, model: &mut Model, caps: &Capabilities) {
        match Self::parse_prediction(response.body()) {
            Ok(inference) => {
                caps.telemetry
                    .event("prediction_received", &[("label", &inference.label)]);

                let positive = inference.is_positive(&model.config.finding_token);
                model.inference = Some(inference);

                if positive {
                    match model.location {
                        LocationPermissionState::Granted(coord) => {
                            Self::start_provider_lookup(coord, model, caps);
                        }
                        LocationPermissionState::Unasked => {
                            // Ask once, automatically; the lookup follows
                            // reactively when the position resolves.
                            Self::request_position(model, caps);
                        }
                        // Denial is sticky for the session; the view surfaces
                        // it instead of prompting again.
                        LocationPermissionState::Denied
                        | LocationPermissionState::Requesting => {}
                    }
                }
            }
            Err(e) => {
                model.set_notice(Notice::new(FailureKind::RequestFailed));
                caps.telemetry.error("prediction_parse_failed", &e.to_string());
            }
        }
    }
}

impl crux_core::App for App {
    type Event = Event;
    type Model = Model;
    type ViewModel = ViewModel;
    type Capabilities = Capabilities;

    fn update(&self, event: Event, model: &mut Model, caps: &Capabilities) {
        if event.is_user_initiated() {
            caps.telemetry.event("user_action", &[("event", event.name())]);
        }

        match event {
            Event::ImageSelected { image } => {
                if let Some(previous) = model.selection.take() {
                    caps.media.revoke_preview(previous.preview_uri);
                }

                // Invalidate any in-flight ticker or response for the old
                // selection before wiping derived state.
                model.attempt += 1;
                model.reset_analysis();
                model.selection = Some(image);

                caps.render.render();
            }

            Event::SubmitRequested => {
                if model.selection.is_none() {
                    model.set_notice(Notice::new(FailureKind::NoFileSelected));
                    caps.render.render();
                    return;
                }

                if model.progress.is_running {
                    return;
                }

                model.attempt += 1;
                model.reset_analysis();
                model.progress.start();

                if let Err(e) = Self::send_prediction_request(model, caps) {
                    model.progress.finish();
                    model.set_notice(Notice::new(FailureKind::RequestFailed));
                    caps.telemetry.error("prediction_request_invalid", &e.to_string());
                    caps.render.render();
                    return;
                }

                Self::arm_progress_ticker(model.attempt, caps);
                caps.render.render();
            }

            Event::ProgressTick { attempt } => {
                if attempt != model.attempt
                    || !model.progress.is_running
                    || model.progress.is_cancelled
                {
                    // Stale tick from a finished, cancelled, or superseded
                    // attempt; do not re-arm.
                    return;
                }

                model.progress.advance();
                if !model.progress.at_cap() {
                    Self::arm_progress_ticker(attempt, caps);
                }
                caps.render.render();
            }

            Event::PredictionResponse { attempt, result } => {
                if attempt != model.attempt || !model.progress.is_running {
                    caps.telemetry.event("stale_prediction_dropped", &[]);
                    return;
                }

                model.progress.finish();

                match *result {
                    Ok(response) if response.is_success() => {
                        Self::handle_prediction_success(&response, model, caps);
                    }
                    Ok(response) => {
                        model.set_notice(Notice::new(FailureKind::RequestFailed));
                        caps.telemetry.error(
                            "prediction_http_status",
                            &response.status().to_string(),
                        );
                    }
                    Err(e) => {
                        model.set_notice(Notice::new(FailureKind::RequestFailed));
                        caps.telemetry.error("prediction_transport", &e.to_string());
                    }
                }

                caps.render.render();
            }

            Event::CancelRequested => {
                if !model.progress.is_running {
                    return;
                }

                // The request itself is not aborted; its response is dropped
                // because the progress state is no longer running.
                model.progress.cancel();
                caps.telemetry.event("analysis_cancelled", &[]);
                caps.render.render();
            }

            Event::LocationPermissionRequested => {
                if !model.location.can_request() {
                    return;
                }

                Self::request_position(model, caps);
                caps.render.render();
            }

            Event::PositionResult(result) => {
                if !matches!(model.location, LocationPermissionState::Requesting) {
                    caps.telemetry.event("stale_position_dropped", &[]);
                    return;
                }

                match *result {
                    Ok(position) => match Coordinate::new(position.lat, position.lon) {
                        Ok(coord) => {
                            model.location = LocationPermissionState::Granted(coord);
                            caps.telemetry.event("position_resolved", &[]);

                            if model.has_positive_finding() && model.providers.is_empty() {
                                Self::start_provider_lookup(coord, model, caps);
                            }
                        }
                        Err(e) => {
                            model.location = LocationPermissionState::Unasked;
                            caps.telemetry.error("position_invalid", &e.to_string());
                        }
                    },
                    Err(GeolocationError::PermissionDenied) => {
                        model.location = LocationPermissionState::Denied;
                        caps.telemetry.event("location_denied", &[]);
                    }
                    Err(GeolocationError::Unsupported) => {
                        model.location = LocationPermissionState::Unasked;
                        model.set_notice(Notice::new(FailureKind::LocationUnsupported));
                        caps.telemetry.event("location_unsupported", &[]);
                    }
                    Err(GeolocationError::Failed { reason }) => {
                        model.location = LocationPermissionState::Unasked;
                        caps.telemetry.error("position_failed", &reason);
                    }
                }

                caps.render.render();
            }

            Event::ProviderLookupResponse { attempt, result } => {
                if attempt != model.attempt {
                    caps.telemetry.event("stale_lookup_dropped", &[]);
                    return;
                }

                model.lookup_in_flight = false;

                match *result {
                    Ok(response) if response.is_success() => {
                        match Self::parse_providers(response.body(), model.config.result_limit) {
                            Ok(providers) => {
                                caps.telemetry.event(
                                    "providers_found",
                                    &[("count", &providers.len().to_string())],
                                );
                                model.providers = providers;
                            }
                            Err(e) => {
                                caps.telemetry.error("lookup_parse_failed", &e.to_string());
                            }
                        }
                    }
                    Ok(response) => {
                        caps.telemetry
                            .error("lookup_http_status", &response.status().to_string());
                    }
                    Err(e) => {
                        caps.telemetry.error("lookup_transport", &e.to_string());
                    }
                }

                caps.render.render();
            }
        }
    }

    fn view(&self, model: &Model) -> ViewModel {
        let positive = model.has_positive_finding();
        let coordinate = model.location.coordinate();

        ViewModel {
            preview_uri: model.selection.as_ref().map(|s| s.preview_uri.clone()),
            can_submit: model.selection.is_some() && !model.progress.is_running,
            is_analyzing: model.progress.is_running,
            progress_percent: model.progress.percent,
            result: model.inference.as_ref().map(|r| ResultView {
                label: r.label.clone(),
                confidence: r.confidence,
                is_positive: r.is_positive(&model.config.finding_token),
                probabilities: r.probabilities.clone(),
            }),
            show_location_prompt: positive
                && matches!(model.location, LocationPermissionState::Unasked),
            location_denied: model.location.is_denied(),
            searching_providers: positive
                && coordinate.is_some()
                && model.providers.is_empty()
                && model.lookup_in_flight,
            providers: model.providers.iter().map(ProviderView::from).collect(),
            notice: model.active_notice.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewModel {
    pub preview_uri: Option<String>,
    pub can_submit: bool,
    pub is_analyzing: bool,
    pub progress_percent: u8,
    pub result: Option<ResultView>,
    pub show_location_prompt: bool,
    pub location_denied: bool,
    pub searching_providers: bool,
    pub providers: Vec<ProviderView>,
    pub notice: Option<Notice>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultView {
    pub label: String,
    pub confidence: f64,
    pub is_positive: bool,
    pub probabilities: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderView {
    pub display_label: String,
    pub secondary_label: String,
}

impl From<&Provider> for ProviderView {
    fn from(provider: &Provider) -> Self {
        Self {
            display_label: provider.display_label.clone(),
            secondary_label: provider.secondary_label.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn lenient_percent_accepts_numbers_and_percent_strings() {
        let cases = [
            (serde_json::json!(97.3), Some(97.3)),
            (serde_json::json!("88.5"), Some(88.5)),
            (serde_json::json!("88.5%"), Some(88.5)),
            (serde_json::json!("  72% "), Some(72.0)),
            (serde_json::json!("high"), None),
            (serde_json::json!(null), None),
            (serde_json::json!([1, 2]), None),
        ];

        for (value, expected) in cases {
            assert_eq!(App::lenient_percent(&value), expected, "value: {value}");
        }
    }

    #[test]
    fn parse_prediction_reads_numeric_payload() {
        let body = serde_json::json!({
            "prediction": "Normal",
            "confidence": 97.3,
            "probabilities": { "NORMAL": 0.97, "PNEUMONIA": 0.03 }
        });
        let result = App::parse_prediction(&serde_json::to_vec(&body).unwrap()).unwrap();

        assert_eq!(result.label, "Normal");
        assert!((result.confidence - 97.3).abs() < f64::EPSILON);
        assert_eq!(result.probabilities.len(), 2);
    }

    #[test]
    fn parse_prediction_reads_percent_string_payload() {
        // The reference backend formats every number as "NN.NN%".
        let body = serde_json::json!({
            "prediction": "PNEUMONIA",
            "confidence": "88.5%",
            "probabilities": { "NORMAL": "11.5%", "PNEUMONIA": "88.5%" }
        });
        let result = App::parse_prediction(&serde_json::to_vec(&body).unwrap()).unwrap();

        assert!((result.confidence - 88.5).abs() < f64::EPSILON);
        assert!((result.probabilities["PNEUMONIA"] - 88.5).abs() < f64::EPSILON);
    }

    #[test]
    fn parse_prediction_falls_back_to_full_confidence() {
        let missing = serde_json::json!({ "prediction": "Pneumonia" });
        let result = App::parse_prediction(&serde_json::to_vec(&missing).unwrap()).unwrap();
        assert!((result.confidence - FALLBACK_CONFIDENCE).abs() < f64::EPSILON);

        let garbage = serde_json::json!({ "prediction": "Pneumonia", "confidence": "high" });
        let result = App::parse_prediction(&serde_json::to_vec(&garbage).unwrap()).unwrap();
        assert!((result.confidence - FALLBACK_CONFIDENCE).abs() < f64::EPSILON);
    }

    #[test]
    fn parse_prediction_rejects_error_payload() {
        // Flask catch-all: HTTP 200 with {"error": "..."}.
        let body = serde_json::json!({ "error": "no image field" });
        assert!(App::parse_prediction(&serde_json::to_vec(&body).unwrap()).is_err());

        assert!(App::parse_prediction(b"not json").is_err());
    }

    #[test]
    fn parse_providers_truncates_to_limit() {
        let records: Vec<_> = (0..10)
            .map(|i| serde_json::json!({ "display_name": format!("Clinic {i}, Road, City") }))
            .collect();
        let body = serde_json::to_vec(&records).unwrap();

        let providers = App::parse_providers(&body, 6).unwrap();
        assert_eq!(providers.len(), 6);
        assert_eq!(providers[0].display_label, "Clinic 0");
    }

    #[test]
    fn parse_providers_rejects_malformed_payload() {
        assert!(App::parse_providers(b"{\"not\": \"an array\"}", 6).is_err());
        assert!(App::parse_providers(b"[{\"no_display_name\": 1}]", 6).is_err());
    }

    #[test]
    fn directory_request_is_bounded_and_scoped() {
        let config = TriageConfig::default();
        let coord = Coordinate::new(12.97, 77.59).unwrap();

        let request = App::build_directory_request(&config, coord).unwrap();
        let url = Url::parse(request.url().as_str()).unwrap();
        let pairs: std::collections::HashMap<_, _> = url.query_pairs().into_owned().collect();

        assert_eq!(pairs["q"], "pulmonologist");
        assert_eq!(pairs["limit"], "6");
        assert_eq!(pairs["countrycodes"], "in");
        assert_eq!(pairs["bounded"], "1");
        assert_eq!(pairs["format"], "json");

        let corners: Vec<f64> = pairs["viewbox"]
            .split(',')
            .map(|v| v.parse().unwrap())
            .collect();
        let expected = [77.54, 13.02, 77.64, 12.92];
        for (actual, expected) in corners.iter().zip(expected) {
            assert!((actual - expected).abs() < 1e-9);
        }
    }

    proptest! {
        #[test]
        fn provider_display_label_is_prefix_before_first_comma(name in ".{0,80}") {
            let provider = Provider::from_display_name(&name);
            let expected = name.split(',').next().unwrap_or_default();
            prop_assert_eq!(provider.display_label, expected);
        }

        #[test]
        fn lookup_output_never_exceeds_limit(count in 0usize..20, limit in 1u8..10) {
            let records: Vec<_> = (0..count)
                .map(|i| serde_json::json!({ "display_name": format!("Clinic {i}") }))
                .collect();
            let body = serde_json::to_vec(&records).unwrap();

            let providers = App::parse_providers(&body, limit).unwrap();
            prop_assert!(providers.len() <= limit as usize);
        }
    }
}
