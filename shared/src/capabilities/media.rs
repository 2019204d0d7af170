use crux_core::capability::{Capability, CapabilityContext, Operation};
use serde::{Deserialize, Serialize};

/// Shell-side media housekeeping. The shell mints preview object-URLs when
/// the user picks a file; the core tells it when a URL is no longer
/// referenced so the backing resource can be released.
pub struct Media<E> {
    context: CapabilityContext<MediaOperation, E>,
}

impl<Ev> Capability<Ev> for Media<Ev> {
    type Operation = MediaOperation;
    type MappedSelf<MappedEv> = Media<MappedEv>;

    fn map_event<F, NewEv>(&self, f: F) -> Self::MappedSelf<NewEv>
    where
        F: Fn(NewEv) -> Ev + Send + Sync + 'static,
        Ev: 'static,
        NewEv: 'static + Send,
    {
        Media::new(self.context.map_event(f))
    }
}

impl<E> Media<E>
where
    E: 'static,
{
    pub fn new(context: CapabilityContext<MediaOperation, E>) -> Self {
        Self { context }
    }

    /// Fire-and-forget release of a preview URI.
    pub fn revoke_preview(&self, uri: String) {
        let context = self.context.clone();
        self.context.spawn(async move {
            context
                .notify_shell(MediaOperation::RevokePreview { uri })
                .await;
        });
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MediaOperation {
    RevokePreview { uri: String },
}

impl Operation for MediaOperation {
    type Output = ();
}
