use crux_core::testing::AppTester;
use crux_core::Request;
use shared::capabilities::{
    GeolocationError, GeolocationOperation, HttpOperation, HttpResponse, Position,
};
use shared::{App, Effect, Event, FailureKind, ImageSelection, Model};

fn select_event(file_name: &str) -> Event {
    Event::ImageSelected {
        image: ImageSelection {
            data: b"\x89PNG-fake-xray".to_vec(),
            file_name: file_name.to_string(),
            preview_uri: format!("blob:{file_name}"),
        },
    }
}

fn http_requests(effects: Vec<Effect>) -> Vec<Request<HttpOperation>> {
    effects
        .into_iter()
        .filter_map(|effect| match effect {
            Effect::Http(request) => Some(request),
            _ => None,
        })
        .collect()
}

fn geolocation_requests(effects: Vec<Effect>) -> Vec<Request<GeolocationOperation>> {
    effects
        .into_iter()
        .filter_map(|effect| match effect {
            Effect::Geolocation(request) => Some(request),
            _ => None,
        })
        .collect()
}

/// Drives a positive analysis to completion and returns the position request
/// the core raised automatically.
fn analyze_positive(
    app: &AppTester<App, Effect>,
    model: &mut Model,
) -> Request<GeolocationOperation> {
    app.update(select_event("xray.png"), model);
    let update = app.update(Event::SubmitRequested, model);

    let mut requests = http_requests(update.effects);
    let response = HttpResponse::ok(
        serde_json::to_vec(&serde_json::json!({
            "prediction": "PNEUMONIA",
            "confidence": "88.5%",
        }))
        .unwrap(),
    );
    let update = app.resolve(&mut requests[0], Ok(response)).unwrap();

    let mut position_requests = Vec::new();
    for event in update.events {
        let update = app.update(event, model);
        position_requests.extend(geolocation_requests(update.effects));
    }

    assert_eq!(position_requests.len(), 1);
    position_requests.remove(0)
}

#[test]
fn granted_position_triggers_the_provider_lookup() {
    let app = AppTester::<App, Effect>::default();
    let mut model = Model::default();
    let mut position_request = analyze_positive(&app, &mut model);

    let position = Position {
        lat: 12.97,
        lon: 77.59,
        accuracy_m: Some(25.0),
    };
    let update = app.resolve(&mut position_request, Ok(position)).unwrap();

    let mut lookups = Vec::new();
    for event in update.events {
        let update = app.update(event, &mut model);
        lookups.extend(http_requests(update.effects));
    }

    assert_eq!(lookups.len(), 1);
    let HttpOperation::Execute(request) = &lookups[0].operation;
    assert_eq!(request.method().as_str(), "GET");
    assert!(request.url().as_str().contains("bounded=1"));

    let view = app.view(&model);
    assert!(!view.show_location_prompt);
    assert!(!view.location_denied);
    assert!(view.searching_providers);
}

#[test]
fn denial_is_sticky_for_the_session() {
    let app = AppTester::<App, Effect>::default();
    let mut model = Model::default();
    let mut position_request = analyze_positive(&app, &mut model);

    let update = app
        .resolve(&mut position_request, Err(GeolocationError::PermissionDenied))
        .unwrap();
    for event in update.events {
        app.update(event, &mut model);
    }

    let view = app.view(&model);
    assert!(view.location_denied);
    assert!(!view.show_location_prompt);

    // A repeated request is a no-op: no new platform prompt.
    let update = app.update(Event::LocationPermissionRequested, &mut model);
    assert!(geolocation_requests(update.effects).is_empty());
    assert!(app.view(&model).location_denied);
}

#[test]
fn unsupported_geolocation_leaves_the_gate_open() {
    let app = AppTester::<App, Effect>::default();
    let mut model = Model::default();
    let mut position_request = analyze_positive(&app, &mut model);

    let update = app
        .resolve(&mut position_request, Err(GeolocationError::Unsupported))
        .unwrap();
    for event in update.events {
        app.update(event, &mut model);
    }

    let view = app.view(&model);
    assert_eq!(
        view.notice.map(|n| n.kind),
        Some(FailureKind::LocationUnsupported)
    );
    assert!(!view.location_denied);
    // The gate stays answerable, e.g. after the user changes device settings.
    assert!(view.show_location_prompt);
}

#[test]
fn transient_position_failure_keeps_the_prompt_available() {
    let app = AppTester::<App, Effect>::default();
    let mut model = Model::default();
    let mut position_request = analyze_positive(&app, &mut model);

    let update = app
        .resolve(
            &mut position_request,
            Err(GeolocationError::Failed {
                reason: "gps timeout".to_string(),
            }),
        )
        .unwrap();
    for event in update.events {
        app.update(event, &mut model);
    }

    let view = app.view(&model);
    assert!(view.show_location_prompt);
    assert!(view.notice.is_none());

    // Asking again raises a fresh platform request.
    let update = app.update(Event::LocationPermissionRequested, &mut model);
    assert_eq!(geolocation_requests(update.effects).len(), 1);
}

#[test]
fn out_of_range_position_is_rejected() {
    let app = AppTester::<App, Effect>::default();
    let mut model = Model::default();
    let mut position_request = analyze_positive(&app, &mut model);

    let position = Position {
        lat: 123.0,
        lon: 77.59,
        accuracy_m: None,
    };
    let update = app.resolve(&mut position_request, Ok(position)).unwrap();
    for event in update.events {
        let update = app.update(event, &mut model);
        assert!(http_requests(update.effects).is_empty());
    }

    let view = app.view(&model);
    assert!(view.show_location_prompt);
    assert!(view.providers.is_empty());
}

#[test]
fn permission_request_while_in_flight_is_ignored() {
    let app = AppTester::<App, Effect>::default();
    let mut model = Model::default();
    let _position_request = analyze_positive(&app, &mut model);

    // First request is still unresolved; a second tap must not raise another.
    let update = app.update(Event::LocationPermissionRequested, &mut model);
    assert!(geolocation_requests(update.effects).is_empty());
}

#[test]
fn granted_location_survives_a_new_analysis() {
    let app = AppTester::<App, Effect>::default();
    let mut model = Model::default();
    let mut position_request = analyze_positive(&app, &mut model);

    let position = Position {
        lat: 12.97,
        lon: 77.59,
        accuracy_m: None,
    };
    let update = app.resolve(&mut position_request, Ok(position)).unwrap();
    for event in update.events {
        app.update(event, &mut model);
    }

    // A second positive analysis goes straight to the lookup; no new
    // permission prompt.
    app.update(select_event("followup.png"), &mut model);
    let update = app.update(Event::SubmitRequested, &mut model);
    let mut requests = http_requests(update.effects);
    let response = HttpResponse::ok(
        serde_json::to_vec(&serde_json::json!({
            "prediction": "PNEUMONIA",
            "confidence": "90%",
        }))
        .unwrap(),
    );
    let update = app.resolve(&mut requests[0], Ok(response)).unwrap();

    let mut lookups = Vec::new();
    let mut position_requests = 0;
    for event in update.events {
        let update = app.update(event, &mut model);
        for effect in update.effects {
            match effect {
                Effect::Http(request) => lookups.push(request),
                Effect::Geolocation(_) => position_requests += 1,
                _ => {}
            }
        }
    }

    assert_eq!(position_requests, 0);
    assert_eq!(lookups.len(), 1);
}
