mod geolocation;
mod http;
mod media;
mod telemetry;
mod timer;

pub use self::geolocation::{
    Geolocation, GeolocationError, GeolocationOperation, GeolocationResult, Position,
};
pub use self::http::{
    Http, HttpError, HttpMethod, HttpOperation, HttpRequest, HttpResponse, HttpResult,
    MultipartForm, ValidatedUrl,
};
pub use self::media::{Media, MediaOperation};
pub use self::telemetry::{Telemetry, TelemetryOperation};
pub use self::timer::{Timer, TimerOperation, TimerOutput};

// Render comes straight from crux_core; it already does everything we need
// to tell the shell the view model changed.
pub use crux_core::render::Render;

use crate::app::App;
use crate::event::Event;

#[derive(crux_core::macros::Effect)]
pub struct Capabilities {
    pub render: Render<Event>,
    pub http: Http<Event>,
    pub timer: Timer<Event>,
    pub geolocation: Geolocation<Event>,
    pub media: Media<Event>,
    pub telemetry: Telemetry<Event>,
}
