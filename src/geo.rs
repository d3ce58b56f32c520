use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::AppConfig;
use crate::errors::{AppError, AppResult};

const LOOKUP_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinate {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// `lat,lng` pair the way the venue API expects its `ll` parameter.
    pub fn as_ll(&self) -> String {
        format!("{},{}", self.latitude, self.longitude)
    }
}

/// One-shot position fix, requested once per discovery start.
#[async_trait]
pub trait LocationProvider: Send + Sync {
    async fn current_position(&self) -> AppResult<Coordinate>;
}

#[derive(Clone)]
pub struct GeoService {
    inner: Arc<dyn LocationProvider>,
}

impl GeoService {
    pub fn new(config: &AppConfig) -> Self {
        if let Some((latitude, longitude)) = config.fixed_position() {
            debug!(latitude, longitude, "using fixed position from config");
            return Self {
                inner: Arc::new(FixedLocationProvider {
                    position: Coordinate::new(latitude, longitude),
                }),
            };
        }
        Self {
            inner: Arc::new(IpLocationProvider::new(config.geoip_endpoint.clone())),
        }
    }

    #[cfg(test)]
    pub fn from_provider(provider: Arc<dyn LocationProvider>) -> Self {
        Self { inner: provider }
    }

    pub async fn current_position(&self) -> AppResult<Coordinate> {
        self.inner.current_position().await
    }
}

pub struct FixedLocationProvider {
    position: Coordinate,
}

impl FixedLocationProvider {
    pub fn new(position: Coordinate) -> Self {
        Self { position }
    }
}

#[async_trait]
impl LocationProvider for FixedLocationProvider {
    async fn current_position(&self) -> AppResult<Coordinate> {
        Ok(self.position)
    }
}

/// Coarse position via an ip-api style endpoint. Good enough for picking a
/// lunch spot; a fixed coordinate override skips it entirely.
pub struct IpLocationProvider {
    http: reqwest::Client,
    endpoint: String,
}

#[derive(Debug, Deserialize)]
struct GeoIpResponse {
    status: String,
    lat: Option<f64>,
    lon: Option<f64>,
    message: Option<String>,
}

impl IpLocationProvider {
    pub fn new(endpoint: String) -> Self {
        let http = reqwest::Client::builder()
            .timeout(LOOKUP_TIMEOUT)
            .build()
            .expect("geoip http client");
        Self { http, endpoint }
    }
}

#[async_trait]
impl LocationProvider for IpLocationProvider {
    async fn current_position(&self) -> AppResult<Coordinate> {
        let response = self
            .http
            .get(&self.endpoint)
            .send()
            .await
            .map_err(|err| AppError::PositionUnavailable(err.to_string()))?
            .error_for_status()
            .map_err(|err| AppError::PositionUnavailable(err.to_string()))?;

        let parsed: GeoIpResponse = response
            .json()
            .await
            .map_err(|err| AppError::PositionUnavailable(err.to_string()))?;

        if parsed.status != "success" {
            return Err(AppError::PositionUnavailable(
                parsed
                    .message
                    .unwrap_or_else(|| format!("geoip lookup returned {}", parsed.status)),
            ));
        }

        match (parsed.lat, parsed.lon) {
            (Some(latitude), Some(longitude)) => Ok(Coordinate::new(latitude, longitude)),
            _ => Err(AppError::PositionUnavailable(
                "geoip response missing coordinates".into(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use httptest::matchers::request;
    use httptest::responders::json_encoded;
    use httptest::{Expectation, Server};
    use serde_json::json;

    use super::*;
    use crate::test_support::test_config;

    #[test]
    fn formats_ll_pair() {
        let coordinate = Coordinate::new(44.97, -93.26);
        assert_eq!(coordinate.as_ll(), "44.97,-93.26");
    }

    #[tokio::test]
    async fn fixed_position_wins_over_lookup() {
        let mut config = test_config();
        config.fixed_latitude = Some(51.5);
        config.fixed_longitude = Some(-0.1);
        let service = GeoService::new(&config);
        let position = service.current_position().await.unwrap();
        assert_eq!(position, Coordinate::new(51.5, -0.1));
    }

    #[tokio::test]
    async fn parses_successful_geoip_lookup() {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("GET", "/json")).respond_with(
                json_encoded(json!({
                    "status": "success",
                    "lat": 44.97,
                    "lon": -93.26
                })),
            ),
        );

        let provider = IpLocationProvider::new(server.url("/json").to_string());
        let position = provider.current_position().await.unwrap();
        assert_eq!(position, Coordinate::new(44.97, -93.26));
    }

    #[tokio::test]
    async fn failed_lookup_maps_to_position_unavailable() {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("GET", "/json")).respond_with(
                json_encoded(json!({
                    "status": "fail",
                    "message": "private range"
                })),
            ),
        );

        let provider = IpLocationProvider::new(server.url("/json").to_string());
        let err = provider.current_position().await.unwrap_err();
        match err {
            AppError::PositionUnavailable(message) => assert!(message.contains("private range")),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
