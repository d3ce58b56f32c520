mod config;
mod engine;
mod errors;
mod foursquare;
mod geo;
mod pool;
mod telemetry;

#[cfg(test)]
pub(crate) mod test_support;

use once_cell::sync::OnceCell;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub use config::{AppConfig, PublicAppConfig};
pub use engine::{DiscoveryEngine, DiscoverySnapshot, DisplayableVenue, EnginePhase};
pub use errors::{AppError, AppResult};
pub use foursquare::{
    BaseVenue, Category, DetailedVenue, ExploreOptions, VenueCatalog, VenueLocation, VenuePhoto,
    VenueService,
};
pub use geo::{Coordinate, FixedLocationProvider, GeoService, IpLocationProvider, LocationProvider};
pub use telemetry::TelemetryClient;

pub fn init_tracing() {
    static INIT: OnceCell<()> = OnceCell::new();
    let _ = INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("info,where_to_go=debug"));
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    });
}
