use crux_core::capability::{Capability, CapabilityContext, Operation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One-shot device location capability. Requesting a position implies the
/// platform permission prompt; the outcome arrives as a single result.
pub struct Geolocation<E> {
    context: CapabilityContext<GeolocationOperation, E>,
}

impl<Ev> Capability<Ev> for Geolocation<Ev> {
    type Operation = GeolocationOperation;
    type MappedSelf<MappedEv> = Geolocation<MappedEv>;

    fn map_event<F, NewEv>(&self, f: F) -> Self::MappedSelf<NewEv>
    where
        F: Fn(NewEv) -> Ev + Send + Sync + 'static,
        Ev: 'static,
        NewEv: 'static + Send,
    {
        Geolocation::new(self.context.map_event(f))
    }
}

impl<E> Geolocation<E>
where
    E: 'static,
{
    pub fn new(context: CapabilityContext<GeolocationOperation, E>) -> Self {
        Self { context }
    }

    pub fn get_current_position<F>(&self, make_event: F)
    where
        F: FnOnce(GeolocationResult) -> E + Send + 'static,
    {
        let context = self.context.clone();
        self.context.spawn(async move {
            let result = context
                .request_from_shell(GeolocationOperation::GetCurrentPosition)
                .await;
            context.update_app(make_event(result));
        });
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GeolocationOperation {
    GetCurrentPosition,
}

impl Operation for GeolocationOperation {
    type Output = GeolocationResult;
}

/// Raw position as reported by the platform; validated by the core before it
/// becomes a `Coordinate`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub lat: f64,
    pub lon: f64,
    pub accuracy_m: Option<f64>,
}

#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
pub enum GeolocationError {
    #[error("location permission denied")]
    PermissionDenied,

    #[error("geolocation is not supported on this platform")]
    Unsupported,

    #[error("position acquisition failed: {reason}")]
    Failed { reason: String },
}

pub type GeolocationResult = Result<Position, GeolocationError>;
