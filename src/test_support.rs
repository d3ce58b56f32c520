//! Shared helpers for the crate's unit tests.

use crate::config::AppConfig;
use crate::foursquare::{BaseVenue, Category, VenueLocation};

/// A config with defaults that never touches the environment, so tests do not
/// race over env vars.
pub fn test_config() -> AppConfig {
    AppConfig {
        foursquare_client_id: None,
        foursquare_client_secret: None,
        foursquare_api_base: "https://api.foursquare.com/v2".into(),
        foursquare_api_version: "20180323".into(),
        explore_limit: 50,
        explore_radius_m: 1500,
        explore_section: "food".into(),
        explore_open_now: true,
        reroll_budget: 4,
        geoip_endpoint: "http://ip-api.com/json".into(),
        fixed_latitude: None,
        fixed_longitude: None,
        telemetry_enabled_by_default: true,
        telemetry_batch_size: 25,
        telemetry_buffer_max_bytes: 1024 * 1024,
        telemetry_buffer_max_files: 3,
        data_dir: None,
    }
}

/// A deterministic base venue: the same id always produces the same fields.
pub fn venue(id: &str) -> BaseVenue {
    BaseVenue {
        id: id.to_string(),
        name: format!("Venue {id}"),
        categories: vec![Category {
            id: format!("category_{id}"),
            name: "Test Kitchen".into(),
            plural_name: Some("Test Kitchens".into()),
            short_name: Some("Kitchen".into()),
            primary: true,
            icon: None,
        }],
        location: VenueLocation {
            address: Some(format!("1 {id} St")),
            city: Some("Minneapolis".into()),
            formatted_address: vec![format!("1 {id} St"), "Minneapolis, MN".into()],
            ..VenueLocation::default()
        },
    }
}
