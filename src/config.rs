use std::path::PathBuf;
use std::{env, io};

use secrecy::SecretString;
use serde::Serialize;
use tracing::debug;

const DEFAULT_API_BASE: &str = "https://api.foursquare.com/v2";
const DEFAULT_API_VERSION: &str = "20180323";
const DEFAULT_GEOIP_ENDPOINT: &str = "http://ip-api.com/json";
const DEFAULT_EXPLORE_LIMIT: u32 = 50;
const DEFAULT_EXPLORE_RADIUS_M: u32 = 1500;
const DEFAULT_EXPLORE_SECTION: &str = "food";
const DEFAULT_REROLL_BUDGET: u32 = 4;
const DEFAULT_TELEMETRY_BUFFER_MAX_BYTES: u64 = 5 * 1024 * 1024;
const DEFAULT_TELEMETRY_BUFFER_MAX_FILES: usize = 5;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub foursquare_client_id: Option<SecretString>,
    pub foursquare_client_secret: Option<SecretString>,
    pub foursquare_api_base: String,
    pub foursquare_api_version: String,
    pub explore_limit: u32,
    pub explore_radius_m: u32,
    pub explore_section: String,
    pub explore_open_now: bool,
    pub reroll_budget: u32,
    pub geoip_endpoint: String,
    pub fixed_latitude: Option<f64>,
    pub fixed_longitude: Option<f64>,
    pub telemetry_enabled_by_default: bool,
    pub telemetry_batch_size: usize,
    pub telemetry_buffer_max_bytes: u64,
    pub telemetry_buffer_max_files: usize,
    pub data_dir: Option<PathBuf>,
}

#[derive(Clone, Debug, Serialize)]
pub struct PublicAppConfig {
    pub foursquare_api_base: String,
    pub explore_limit: u32,
    pub explore_radius_m: u32,
    pub explore_section: String,
    pub explore_open_now: bool,
    pub reroll_budget: u32,
    pub geoip_endpoint: String,
    pub has_foursquare_credentials: bool,
    pub has_fixed_position: bool,
    pub telemetry_enabled_by_default: bool,
    pub telemetry_batch_size: usize,
    pub telemetry_buffer_max_bytes: u64,
    pub telemetry_buffer_max_files: usize,
}

impl AppConfig {
    pub fn from_env() -> Self {
        load_dotenv_if_applicable();
        Self {
            foursquare_client_id: parse_secret("FOURSQUARE_CLIENT_ID"),
            foursquare_client_secret: parse_secret("FOURSQUARE_CLIENT_SECRET"),
            foursquare_api_base: env::var("FOURSQUARE_API_BASE")
                .map(|base| base.trim_end_matches('/').to_string())
                .unwrap_or_else(|_| DEFAULT_API_BASE.to_string()),
            foursquare_api_version: env::var("FOURSQUARE_API_VERSION")
                .unwrap_or_else(|_| DEFAULT_API_VERSION.to_string()),
            explore_limit: parse_u32("EXPLORE_LIMIT", DEFAULT_EXPLORE_LIMIT).max(1),
            explore_radius_m: parse_u32("EXPLORE_RADIUS_M", DEFAULT_EXPLORE_RADIUS_M),
            explore_section: env::var("EXPLORE_SECTION")
                .unwrap_or_else(|_| DEFAULT_EXPLORE_SECTION.to_string()),
            explore_open_now: parse_bool("EXPLORE_OPEN_NOW", true),
            reroll_budget: parse_u32("REROLL_BUDGET", DEFAULT_REROLL_BUDGET),
            geoip_endpoint: env::var("GEOIP_ENDPOINT")
                .unwrap_or_else(|_| DEFAULT_GEOIP_ENDPOINT.to_string()),
            fixed_latitude: parse_f64("WHERETOGO_LATITUDE"),
            fixed_longitude: parse_f64("WHERETOGO_LONGITUDE"),
            telemetry_enabled_by_default: parse_bool("TELEMETRY_ENABLED", true),
            telemetry_batch_size: parse_usize("TELEMETRY_BATCH_SIZE", 25).max(1),
            telemetry_buffer_max_bytes: parse_u64(
                "TELEMETRY_BUFFER_MAX_BYTES",
                DEFAULT_TELEMETRY_BUFFER_MAX_BYTES,
            ),
            telemetry_buffer_max_files: parse_usize(
                "TELEMETRY_BUFFER_MAX_FILES",
                DEFAULT_TELEMETRY_BUFFER_MAX_FILES,
            )
            .max(1),
            data_dir: env::var("WHERETOGO_DATA_DIR").ok().map(PathBuf::from),
        }
    }

    pub fn has_foursquare_credentials(&self) -> bool {
        self.foursquare_client_id.is_some() && self.foursquare_client_secret.is_some()
    }

    pub fn fixed_position(&self) -> Option<(f64, f64)> {
        match (self.fixed_latitude, self.fixed_longitude) {
            (Some(lat), Some(lng)) => Some((lat, lng)),
            _ => None,
        }
    }

    pub fn public_profile(&self) -> PublicAppConfig {
        PublicAppConfig {
            foursquare_api_base: self.foursquare_api_base.clone(),
            explore_limit: self.explore_limit,
            explore_radius_m: self.explore_radius_m,
            explore_section: self.explore_section.clone(),
            explore_open_now: self.explore_open_now,
            reroll_budget: self.reroll_budget,
            geoip_endpoint: self.geoip_endpoint.clone(),
            has_foursquare_credentials: self.has_foursquare_credentials(),
            has_fixed_position: self.fixed_position().is_some(),
            telemetry_enabled_by_default: self.telemetry_enabled_by_default,
            telemetry_batch_size: self.telemetry_batch_size,
            telemetry_buffer_max_bytes: self.telemetry_buffer_max_bytes,
            telemetry_buffer_max_files: self.telemetry_buffer_max_files,
        }
    }
}

fn load_dotenv_if_applicable() {
    if !should_load_dotenv() {
        debug!("skipping .env load outside dev mode");
        return;
    }

    if let Err(err) = dotenvy::dotenv() {
        match &err {
            dotenvy::Error::Io(io_err) if io_err.kind() == io::ErrorKind::NotFound => {}
            _ => debug!(?err, "unable to load .env file"),
        }
    }
}

fn should_load_dotenv() -> bool {
    cfg!(debug_assertions) || parse_bool("ALLOW_DOTENV", false)
}

fn parse_secret(key: &str) -> Option<SecretString> {
    env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .map(SecretString::from)
}

fn parse_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .map(|v| matches!(v.trim(), "1" | "true" | "TRUE" | "True"))
        .unwrap_or(default)
}

fn parse_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(default)
}

fn parse_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(default)
}

fn parse_u32(key: &str, default: u32) -> u32 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(default)
}

fn parse_f64(key: &str) -> Option<f64> {
    env::var(key).ok().and_then(|v| v.trim().parse::<f64>().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_public_profile_without_secrets() {
        env::set_var("FOURSQUARE_CLIENT_ID", "client");
        env::set_var("FOURSQUARE_CLIENT_SECRET", "secret");
        env::set_var("FOURSQUARE_API_BASE", "https://example.com/v2/");
        env::set_var("EXPLORE_LIMIT", "10");
        env::set_var("WHERETOGO_LATITUDE", "44.97");
        env::set_var("WHERETOGO_LONGITUDE", "-93.26");

        let config = AppConfig::from_env();
        let public = config.public_profile();

        assert!(public.has_foursquare_credentials);
        assert!(public.has_fixed_position);
        assert_eq!(public.foursquare_api_base, "https://example.com/v2");
        assert_eq!(public.explore_limit, 10);
        assert_eq!(public.reroll_budget, DEFAULT_REROLL_BUDGET);
        assert_eq!(
            public.telemetry_buffer_max_bytes,
            DEFAULT_TELEMETRY_BUFFER_MAX_BYTES
        );
        assert_eq!(config.fixed_position(), Some((44.97, -93.26)));

        env::remove_var("FOURSQUARE_CLIENT_ID");
        env::remove_var("FOURSQUARE_CLIENT_SECRET");
        env::remove_var("FOURSQUARE_API_BASE");
        env::remove_var("EXPLORE_LIMIT");
        env::remove_var("WHERETOGO_LATITUDE");
        env::remove_var("WHERETOGO_LONGITUDE");
    }
}
