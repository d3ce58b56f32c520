use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use parking_lot::Mutex;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::config::AppConfig;
use crate::errors::{AppError, AppResult};
use crate::geo::Coordinate;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryIcon {
    pub prefix: String,
    pub suffix: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Category {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub plural_name: Option<String>,
    #[serde(default)]
    pub short_name: Option<String>,
    #[serde(default)]
    pub primary: bool,
    #[serde(default)]
    pub icon: Option<CategoryIcon>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct VenueLocation {
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub cross_street: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub postal_code: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub lat: Option<f64>,
    #[serde(default)]
    pub lng: Option<f64>,
    #[serde(default)]
    pub distance: Option<u32>,
    #[serde(default)]
    pub formatted_address: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VenuePhoto {
    pub prefix: String,
    pub suffix: String,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
}

impl VenuePhoto {
    pub fn sized_url(&self, size: &str) -> String {
        format!("{}{}{}", self.prefix, size, self.suffix)
    }
}

/// The shape the explore endpoint returns for each candidate. Identity is
/// `id`; everything else is display data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BaseVenue {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub categories: Vec<Category>,
    #[serde(default)]
    pub location: VenueLocation,
}

impl BaseVenue {
    /// First category flagged primary, if any. The API does not promise
    /// exactly one.
    pub fn primary_category(&self) -> Option<&Category> {
        self.categories.iter().find(|category| category.primary)
    }
}

/// Enrichment of a [`BaseVenue`] from the per-venue detail endpoint. Same id,
/// never a different entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetailedVenue {
    #[serde(flatten)]
    pub venue: BaseVenue,
    #[serde(default)]
    pub best_photo: Option<VenuePhoto>,
    #[serde(default)]
    pub rating: Option<f64>,
    #[serde(default)]
    pub rating_signals: Option<u64>,
    #[serde(default)]
    pub canonical_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ExploreOptions {
    pub limit: u32,
    pub radius_m: u32,
    pub section: String,
    pub open_now: bool,
}

impl ExploreOptions {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            limit: config.explore_limit,
            radius_m: config.explore_radius_m,
            section: config.explore_section.clone(),
            open_now: config.explore_open_now,
        }
    }
}

/// The two capabilities the discovery engine consumes: an ordered candidate
/// list for a coordinate, and per-venue enrichment.
#[async_trait]
pub trait VenueCatalog: Send + Sync {
    async fn explore(&self, position: Coordinate) -> AppResult<Vec<BaseVenue>>;
    async fn details(&self, id: &str) -> AppResult<DetailedVenue>;
}

#[derive(Clone)]
pub struct VenueService {
    inner: Arc<dyn VenueCatalog>,
}

impl VenueService {
    pub fn new(config: &AppConfig) -> Self {
        let options = ExploreOptions::from_config(config);
        match (
            config.foursquare_client_id.clone(),
            config.foursquare_client_secret.clone(),
        ) {
            (Some(client_id), Some(client_secret)) => {
                let http = HttpVenueClient::new(config, client_id, client_secret, options);
                Self {
                    inner: Arc::new(FallbackVenueClient::new(http, SyntheticVenueClient::new())),
                }
            }
            _ => {
                warn!("no Foursquare credentials configured; serving synthetic venues");
                Self {
                    inner: Arc::new(SyntheticVenueClient::new()),
                }
            }
        }
    }

    #[cfg(test)]
    pub fn from_catalog(catalog: Arc<dyn VenueCatalog>) -> Self {
        Self { inner: catalog }
    }

    pub async fn explore(&self, position: Coordinate) -> AppResult<Vec<BaseVenue>> {
        self.inner.explore(position).await
    }

    pub async fn details(&self, id: &str) -> AppResult<DetailedVenue> {
        self.inner.details(id).await
    }
}

/// Explore keeps working offline by falling back to synthetic venues; detail
/// lookups are not bridged, so a fallback session degrades to base display
/// only if its synthetic state is lost.
struct FallbackVenueClient {
    primary: HttpVenueClient,
    fallback: SyntheticVenueClient,
}

impl FallbackVenueClient {
    fn new(primary: HttpVenueClient, fallback: SyntheticVenueClient) -> Self {
        Self { primary, fallback }
    }
}

#[async_trait]
impl VenueCatalog for FallbackVenueClient {
    async fn explore(&self, position: Coordinate) -> AppResult<Vec<BaseVenue>> {
        match self.primary.explore(position).await {
            Ok(venues) => Ok(venues),
            Err(err) => {
                warn!(?err, "venue explore failed; falling back to synthetic venues");
                self.fallback.explore(position).await
            }
        }
    }

    async fn details(&self, id: &str) -> AppResult<DetailedVenue> {
        if self.fallback.knows(id) {
            return self.fallback.details(id).await;
        }
        self.primary.details(id).await
    }
}

pub struct HttpVenueClient {
    http: reqwest::Client,
    api_base: String,
    api_version: String,
    client_id: SecretString,
    client_secret: SecretString,
    options: ExploreOptions,
}

#[derive(Debug, Deserialize)]
struct ExploreEnvelope {
    response: ExploreResponse,
}

#[derive(Debug, Deserialize, Default)]
struct ExploreResponse {
    #[serde(default)]
    groups: Vec<ExploreGroup>,
}

#[derive(Debug, Deserialize)]
struct ExploreGroup {
    #[serde(default)]
    items: Vec<ExploreItem>,
}

#[derive(Debug, Deserialize)]
struct ExploreItem {
    venue: BaseVenue,
}

#[derive(Debug, Deserialize)]
struct DetailEnvelope {
    response: DetailResponse,
}

#[derive(Debug, Deserialize)]
struct DetailResponse {
    venue: DetailedVenue,
}

impl HttpVenueClient {
    pub fn new(
        config: &AppConfig,
        client_id: SecretString,
        client_secret: SecretString,
        options: ExploreOptions,
    ) -> Self {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("venue http client");
        Self {
            http,
            api_base: config.foursquare_api_base.trim_end_matches('/').to_string(),
            api_version: config.foursquare_api_version.clone(),
            client_id,
            client_secret,
            options,
        }
    }

    fn auth_params(&self) -> [(&'static str, String); 3] {
        [
            ("client_id", self.client_id.expose_secret().to_string()),
            (
                "client_secret",
                self.client_secret.expose_secret().to_string(),
            ),
            ("v", self.api_version.clone()),
        ]
    }
}

#[async_trait]
impl VenueCatalog for HttpVenueClient {
    async fn explore(&self, position: Coordinate) -> AppResult<Vec<BaseVenue>> {
        let url = format!("{}/venues/explore", self.api_base);
        let response = self
            .http
            .get(&url)
            .query(&[
                ("ll", position.as_ll()),
                ("limit", self.options.limit.to_string()),
                ("radius", self.options.radius_m.to_string()),
                ("openNow", self.options.open_now.to_string()),
                ("section", self.options.section.clone()),
            ])
            .query(&self.auth_params())
            .send()
            .await?
            .error_for_status()?;

        let parsed: ExploreEnvelope = response.json().await?;
        let venues = parsed
            .response
            .groups
            .into_iter()
            .next()
            .map(|group| group.items.into_iter().map(|item| item.venue).collect())
            .unwrap_or_default();
        Ok(venues)
    }

    async fn details(&self, id: &str) -> AppResult<DetailedVenue> {
        let url = format!("{}/venues/{}", self.api_base, id);
        let response = self
            .http
            .get(&url)
            .query(&self.auth_params())
            .send()
            .await?
            .error_for_status()?;

        let parsed: DetailEnvelope = response.json().await?;
        Ok(parsed.response.venue)
    }
}

const SYNTHETIC_SPOTS: &[(&str, &str)] = &[
    ("The Rolling Pin", "Bakery"),
    ("Señor Taco", "Taco Place"),
    ("Pho Real", "Vietnamese Restaurant"),
    ("Crust & Ember", "Pizza Place"),
    ("The Greasy Spoon", "Diner"),
    ("Noodle Theory", "Noodle House"),
    ("Smoke Signal BBQ", "BBQ Joint"),
    ("Leaf & Ladle", "Salad Place"),
    ("Dumpling Dynasty", "Dumpling Restaurant"),
    ("Burger Bureau", "Burger Joint"),
    ("Falafel Forward", "Falafel Restaurant"),
    ("The Curry Cupboard", "Indian Restaurant"),
];

/// Deterministic offline catalog: ids hash the name and coordinate, so the
/// same position always yields the same venues. Detail enrichment works only
/// for venues this instance has already handed out.
pub struct SyntheticVenueClient {
    seen: Mutex<HashMap<String, BaseVenue>>,
}

impl SyntheticVenueClient {
    pub fn new() -> Self {
        Self {
            seen: Mutex::new(HashMap::new()),
        }
    }

    fn knows(&self, id: &str) -> bool {
        self.seen.lock().contains_key(id)
    }

    fn synthetic_id(name: &str, position: Coordinate) -> String {
        let mut hasher = Sha256::new();
        hasher.update(name.as_bytes());
        hasher.update(position.latitude.to_le_bytes());
        hasher.update(position.longitude.to_le_bytes());
        let digest = URL_SAFE_NO_PAD.encode(hasher.finalize());
        format!("synthetic_{}", &digest[..16])
    }

    fn build_venue(index: usize, name: &str, category: &str, position: Coordinate) -> BaseVenue {
        BaseVenue {
            id: Self::synthetic_id(name, position),
            name: name.to_string(),
            categories: vec![Category {
                id: format!("synthetic_category_{index}"),
                name: category.to_string(),
                plural_name: Some(format!("{category}s")),
                short_name: Some(category.to_string()),
                primary: true,
                icon: None,
            }],
            location: VenueLocation {
                formatted_address: vec![
                    format!("{} Imaginary Ave", 100 + index * 11),
                    format!(
                        "Near {:.3}, {:.3}",
                        position.latitude, position.longitude
                    ),
                ],
                lat: Some(position.latitude),
                lng: Some(position.longitude),
                ..VenueLocation::default()
            },
        }
    }
}

impl Default for SyntheticVenueClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VenueCatalog for SyntheticVenueClient {
    async fn explore(&self, position: Coordinate) -> AppResult<Vec<BaseVenue>> {
        let venues: Vec<BaseVenue> = SYNTHETIC_SPOTS
            .iter()
            .enumerate()
            .map(|(index, (name, category))| Self::build_venue(index, name, category, position))
            .collect();

        let mut seen = self.seen.lock();
        for venue in &venues {
            seen.insert(venue.id.clone(), venue.clone());
        }
        Ok(venues)
    }

    async fn details(&self, id: &str) -> AppResult<DetailedVenue> {
        let base = self
            .seen
            .lock()
            .get(id)
            .cloned()
            .ok_or_else(|| AppError::Config(format!("unknown synthetic venue: {id}")))?;

        let mut hasher = Sha256::new();
        hasher.update(base.id.as_bytes());
        let digest = hasher.finalize();
        // Flattering but stable: 6.0..=9.9 derived from the id.
        let rating = 6.0 + f64::from(digest[0] % 40) / 10.0;
        let rating_signals = 25 + u64::from(digest[1]) * 3;

        Ok(DetailedVenue {
            venue: base,
            best_photo: None,
            rating: Some(rating),
            rating_signals: Some(rating_signals),
            canonical_url: None,
        })
    }
}
