//! Reverse geocoding (Nominatim) and display-address normalization.
//!
//! The `first, third-from-last, last` collapse approximates "street, city,
//! country" for Nominatim's English display names. It is a best-effort
//! heuristic, not a semantic parse: other locales or providers can produce
//! components in a different order.

use super::types::coordinate_label;
use reqwest::header::ACCEPT;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

pub const DEFAULT_GEOCODER_URL: &str = "https://nominatim.openstreetmap.org/reverse";

/// Results this short are treated as "nothing usable".
const MIN_USABLE_LEN: usize = 5;

#[derive(Deserialize, Debug)]
struct ReverseResponse {
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Error)]
enum GeocodeError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("HTTP status {0}")]
    Status(u16),
    #[error("no response within {0:?}")]
    Timeout(Duration),
    #[error("invalid response: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("no address: {0}")]
    NoAddress(String),
}

/// Converts coordinates into a display address via a single reverse-geocoding endpoint.
#[derive(Clone)]
pub struct ReverseGeocoder {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl ReverseGeocoder {
    pub fn new(client: reqwest::Client, url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client,
            url: url.into(),
            timeout,
        }
    }

    /// Formatted address for the coordinates. Never fails: any error, or a
    /// formatted result of five characters or fewer, degrades to the
    /// coordinate label.
    pub async fn reverse_geocode(&self, latitude: f64, longitude: f64) -> String {
        match self.lookup(latitude, longitude).await.map(|raw| format_address(&raw)) {
            Ok(address) if address.chars().count() > MIN_USABLE_LEN => address,
            Ok(address) => {
                debug!(lat = latitude, lon = longitude, %address, "Reverse geocode result too short");
                coordinate_label(latitude, longitude)
            }
            Err(e) => {
                warn!(lat = latitude, lon = longitude, error = %e, "Reverse geocoding failed");
                coordinate_label(latitude, longitude)
            }
        }
    }

    async fn lookup(&self, latitude: f64, longitude: f64) -> Result<String, GeocodeError> {
        let lat = latitude.to_string();
        let lon = longitude.to_string();

        let fetch = async {
            let response = self
                .client
                .get(&self.url)
                .query(&[
                    ("format", "json"),
                    ("lat", lat.as_str()),
                    ("lon", lon.as_str()),
                    ("zoom", "16"),
                    ("addressdetails", "1"),
                    ("accept-language", "en"),
                ])
                .header(ACCEPT, "application/json")
                .send()
                .await?;

            if !response.status().is_success() {
                return Err(GeocodeError::Status(response.status().as_u16()));
            }
            Ok::<_, GeocodeError>(response.bytes().await?)
        };

        let body = tokio::time::timeout(self.timeout, fetch)
            .await
            .map_err(|_| GeocodeError::Timeout(self.timeout))??;

        let data: ReverseResponse = serde_json::from_slice(&body)?;
        if let Some(err) = data.error {
            return Err(GeocodeError::NoAddress(err));
        }

        match data.display_name {
            Some(name) if !name.trim().is_empty() => Ok(shorten_display_name(&name)),
            _ => Err(GeocodeError::NoAddress("empty display_name".into())),
        }
    }
}

/// First-pass trim of a raw display name to `first, third-from-last, last`.
///
/// Applied only above three components; a 3-part name is already in that shape
/// and collapsing it would repeat the first component.
pub fn shorten_display_name(display_name: &str) -> String {
    let parts: Vec<&str> = display_name.split(", ").collect();
    if parts.len() > 3 {
        format!(
            "{}, {}, {}",
            parts[0],
            parts[parts.len() - 3],
            parts[parts.len() - 1]
        )
    } else {
        display_name.to_string()
    }
}

/// Strips empty, doubled, leading and trailing comma components and collapses
/// anything above four components to `first, third-from-last, last`.
///
/// Idempotent: its output is a fixed point.
pub fn format_address(address: &str) -> String {
    let parts: Vec<&str> = address
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect();

    if parts.len() > 4 {
        format!(
            "{}, {}, {}",
            parts[0],
            parts[parts.len() - 3],
            parts[parts.len() - 1]
        )
    } else {
        parts.join(", ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn geocoder(server: &mockito::Server) -> ReverseGeocoder {
        ReverseGeocoder::new(
            reqwest::Client::new(),
            format!("{}/reverse", server.url()),
            Duration::from_secs(5),
        )
    }

    fn is_coordinate_label(s: &str) -> bool {
        let Some((lat, lon)) = s.split_once(", ") else {
            return false;
        };
        [lat, lon].iter().all(|part| {
            let digits = part.strip_prefix('-').unwrap_or(part);
            match digits.split_once('.') {
                Some((int, frac)) => {
                    !int.is_empty()
                        && int.chars().all(|c| c.is_ascii_digit())
                        && frac.len() == 4
                        && frac.chars().all(|c| c.is_ascii_digit())
                }
                None => false,
            }
        })
    }

    #[test]
    fn test_shorten_keeps_three_parts() {
        let s = "Sheikh Zayed Rd, Dubai, United Arab Emirates";
        assert_eq!(shorten_display_name(s), s);
    }

    #[test]
    fn test_shorten_collapses_long_names() {
        assert_eq!(
            shorten_display_name("12 Main St, Downtown, Springfield, Sangamon County, Illinois, 62701, United States"),
            "12 Main St, Illinois, United States"
        );
        assert_eq!(
            shorten_display_name("Road, City, Region, Country"),
            "Road, City, Country"
        );
    }

    #[test]
    fn test_shorten_short_names_verbatim() {
        assert_eq!(shorten_display_name("Antarctica"), "Antarctica");
        assert_eq!(shorten_display_name("Atlantic Ocean, Earth"), "Atlantic Ocean, Earth");
    }

    #[test]
    fn test_format_strips_stray_commas() {
        assert_eq!(format_address(", Main St,, Dubai , UAE,"), "Main St, Dubai, UAE");
        assert_eq!(format_address("Main St ,  , Dubai"), "Main St, Dubai");
    }

    #[test]
    fn test_format_collapses_above_four() {
        assert_eq!(format_address("A, B, C, D, E"), "A, C, E");
        assert_eq!(format_address("A, B, C, D"), "A, B, C, D");
    }

    #[test]
    fn test_format_idempotent() {
        for input in [
            "Sheikh Zayed Rd, Dubai, United Arab Emirates",
            "A, B, C, D, E, F",
            ",,Main St,, Dubai,",
            "Road, City, Region, Country",
        ] {
            let once = format_address(input);
            assert_eq!(format_address(&once), once, "{input}");
        }
    }

    #[test]
    fn test_coordinate_label_shape() {
        assert!(is_coordinate_label("25.2048, 55.2708"));
        assert!(is_coordinate_label("-33.8688, -151.2093"));
        assert!(!is_coordinate_label("Dubai, UAE"));
        assert!(!is_coordinate_label("25.20, 55.27"));
    }

    #[tokio::test]
    async fn test_reverse_geocode_sends_expected_query() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/reverse")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("format".into(), "json".into()),
                Matcher::UrlEncoded("lat".into(), "25.2".into()),
                Matcher::UrlEncoded("lon".into(), "55.27".into()),
                Matcher::UrlEncoded("zoom".into(), "16".into()),
                Matcher::UrlEncoded("addressdetails".into(), "1".into()),
                Matcher::UrlEncoded("accept-language".into(), "en".into()),
            ]))
            .with_header("content-type", "application/json")
            .with_body(r#"{"display_name": "Sheikh Zayed Rd, Dubai, United Arab Emirates"}"#)
            .create_async()
            .await;

        let address = geocoder(&server).reverse_geocode(25.2, 55.27).await;
        assert_eq!(address, "Sheikh Zayed Rd, Dubai, United Arab Emirates");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_reverse_geocode_collapses_long_display_name() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/reverse")
            .match_query(Matcher::Any)
            .with_body(r#"{"display_name": "Al Wasl Rd, Al Safa, Jumeirah, Dubai, Dubai, United Arab Emirates"}"#)
            .create_async()
            .await;

        let address = geocoder(&server).reverse_geocode(25.18, 55.24).await;
        assert_eq!(address, "Al Wasl Rd, Dubai, United Arab Emirates");
    }

    #[tokio::test]
    async fn test_reverse_geocode_degrades_on_server_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/reverse")
            .match_query(Matcher::Any)
            .with_status(500)
            .create_async()
            .await;

        let address = geocoder(&server).reverse_geocode(25.2048, 55.2708).await;
        assert_eq!(address, "25.2048, 55.2708");
        assert!(is_coordinate_label(&address));
    }

    #[tokio::test]
    async fn test_reverse_geocode_degrades_on_empty_or_error_body() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/reverse")
            .match_query(Matcher::UrlEncoded("lat".into(), "10.5".into()))
            .with_body(r#"{"display_name": ""}"#)
            .create_async()
            .await;
        let _mock = server
            .mock("GET", "/reverse")
            .match_query(Matcher::UrlEncoded("lat".into(), "-45.5".into()))
            .with_body(r#"{"error": "Unable to geocode"}"#)
            .create_async()
            .await;

        let g = geocoder(&server);
        assert_eq!(g.reverse_geocode(10.5, 20.25).await, "10.5000, 20.2500");
        assert!(is_coordinate_label(&g.reverse_geocode(-45.5, -120.125).await));
    }

    #[tokio::test]
    async fn test_reverse_geocode_degrades_on_short_result() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/reverse")
            .match_query(Matcher::Any)
            .with_body(r#"{"display_name": "Sea"}"#)
            .create_async()
            .await;

        assert_eq!(geocoder(&server).reverse_geocode(12.0, 60.0).await, "12.0000, 60.0000");
    }

    #[tokio::test]
    async fn test_reverse_geocode_degrades_when_only_commas() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/reverse")
            .match_query(Matcher::UrlEncoded("lat".into(), "25.2048".into()))
            .with_body(r#"{"display_name": ",,,,,,,,"}"#)
            .create_async()
            .await;
        let _mock = server
            .mock("GET", "/reverse")
            .match_query(Matcher::UrlEncoded("lat".into(), "40.5".into()))
            .with_body(r#"{"display_name": ", Sea ,, ,"}"#)
            .create_async()
            .await;

        let g = geocoder(&server);
        assert_eq!(g.reverse_geocode(25.2048, 55.2708).await, "25.2048, 55.2708");
        // Formats to "Sea", which is too short to use.
        assert_eq!(g.reverse_geocode(40.5, -30.25).await, "40.5000, -30.2500");
    }

    #[tokio::test]
    async fn test_reverse_geocode_degrades_on_garbage() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/reverse")
            .match_query(Matcher::Any)
            .with_body("<html>rate limited</html>")
            .create_async()
            .await;

        assert_eq!(geocoder(&server).reverse_geocode(1.0, 2.0).await, "1.0000, 2.0000");
    }
}
