use crate::metrics::Metrics;
use crate::mirror::MirrorRegistry;
use crate::traffic::TrafficSink;
use std::sync::Arc;

/// Shared state handed to every connection. Every field is cheaply
/// cloneable (`Arc` internally). Configuration is immutable after startup,
/// so unlike the mirror registry snapshot there is no `ArcSwap` layer here.
#[derive(Clone)]
pub struct AppState {
    pub registry: MirrorRegistry,
    pub traffic: Arc<dyn TrafficSink>,
    pub upstream_client: reqwest::Client,
    pub metrics: Metrics,
}
