use crux_core::capability::{Capability, CapabilityContext, Operation};
use serde::{Deserialize, Serialize};

/// Fire-and-forget diagnostics. The shell decides where records go (console,
/// analytics, nowhere); the core never blocks on them. Best-effort failures
/// like the provider lookup are reported here instead of to the user.
pub struct Telemetry<E> {
    context: CapabilityContext<TelemetryOperation, E>,
}

impl<Ev> Capability<Ev> for Telemetry<Ev> {
    type Operation = TelemetryOperation;
    type MappedSelf<MappedEv> = Telemetry<MappedEv>;

    fn map_event<F, NewEv>(&self, f: F) -> Self::MappedSelf<NewEv>
    where
        F: Fn(NewEv) -> Ev + Send + Sync + 'static,
        Ev: 'static,
        NewEv: 'static + Send,
    {
        Telemetry::new(self.context.map_event(f))
    }
}

impl<E> Telemetry<E>
where
    E: 'static,
{
    pub fn new(context: CapabilityContext<TelemetryOperation, E>) -> Self {
        Self { context }
    }

    pub fn event(&self, name: &str, fields: &[(&str, &str)]) {
        self.notify(TelemetryOperation::Event {
            name: name.to_string(),
            fields: fields
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect(),
        });
    }

    pub fn error(&self, name: &str, detail: &str) {
        self.notify(TelemetryOperation::Error {
            name: name.to_string(),
            detail: detail.to_string(),
        });
    }

    fn notify(&self, operation: TelemetryOperation) {
        let context = self.context.clone();
        self.context.spawn(async move {
            context.notify_shell(operation).await;
        });
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TelemetryOperation {
    Event {
        name: String,
        fields: Vec<(String, String)>,
    },
    Error {
        name: String,
        detail: String,
    },
}

impl Operation for TelemetryOperation {
    type Output = ();
}
