//! IP geolocation providers: ipapi.co, ipify → ipapi.co, freegeoip, ipinfo.
//!
//! Each variant maps its provider-specific payload onto [`ResolvedLocation`].
//! Addresses are left as coordinate labels here; the chain enriches them only
//! after validation.

use super::types::{coordinate_label, ProviderError, ResolvedLocation, DEFAULT_TIMEZONE, UNKNOWN};
use chrono_tz::Tz;
use reqwest::header::ACCEPT;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;

pub const IPAPI_URL: &str = "https://ipapi.co/json/";
pub const IPIFY_URL: &str = "https://api.ipify.org?format=json";
pub const IPAPI_LOOKUP_BASE: &str = "https://ipapi.co";
pub const FREEGEOIP_URL: &str = "https://freegeoip.app/json/";
pub const IPINFO_URL: &str = "https://ipinfo.io/json";

/// One IP geolocation strategy. The set is closed; order lives in the chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Provider {
    IpApiCo { url: String },
    /// Discovers the public IP first, then geolocates it by IP.
    Ipify { ip_url: String, lookup_base: String },
    FreeGeoIp { url: String },
    IpInfo { url: String },
}

impl Provider {
    /// The four public providers, in default chain order.
    pub fn defaults() -> Vec<Provider> {
        vec![
            Provider::IpApiCo { url: IPAPI_URL.into() },
            Provider::Ipify {
                ip_url: IPIFY_URL.into(),
                lookup_base: IPAPI_LOOKUP_BASE.into(),
            },
            Provider::FreeGeoIp { url: FREEGEOIP_URL.into() },
            Provider::IpInfo { url: IPINFO_URL.into() },
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::IpApiCo { .. } => "ipapi.co",
            Self::Ipify { .. } => "ipify",
            Self::FreeGeoIp { .. } => "freegeoip",
            Self::IpInfo { .. } => "ipinfo.io",
        }
    }

    /// Query the provider once. `Ok(None)` means it answered without coordinates.
    pub async fn attempt(
        &self,
        client: &reqwest::Client,
    ) -> Result<Option<ResolvedLocation>, ProviderError> {
        let provider = self.name();
        match self {
            Self::IpApiCo { url } => {
                let r: IpApiResponse = fetch_json(client, provider, url).await?;
                Ok(r.into_location(None))
            }
            Self::Ipify { ip_url, lookup_base } => {
                let IpifyResponse { ip }: IpifyResponse = fetch_json(client, provider, ip_url).await?;
                let ip = ip.trim();
                if ip.is_empty() {
                    return Err(ProviderError::Parse {
                        provider,
                        message: "empty ip".into(),
                    });
                }
                debug!(provider, %ip, "Public IP discovered");
                let lookup_url = format!("{}/{}/json/", lookup_base.trim_end_matches('/'), ip);
                let r: IpApiResponse = fetch_json(client, provider, &lookup_url).await?;
                Ok(r.into_location(Some(ip.to_string())))
            }
            Self::FreeGeoIp { url } => {
                let r: FreeGeoIpResponse = fetch_json(client, provider, url).await?;
                Ok(r.into_location())
            }
            Self::IpInfo { url } => {
                let r: IpInfoResponse = fetch_json(client, provider, url).await?;
                Ok(r.into_location())
            }
        }
    }
}

async fn fetch_json<T: DeserializeOwned>(
    client: &reqwest::Client,
    provider: &'static str,
    url: &str,
) -> Result<T, ProviderError> {
    let response = client
        .get(url)
        .header(ACCEPT, "application/json")
        .send()
        .await
        .map_err(|source| ProviderError::Http { provider, source })?;

    if !response.status().is_success() {
        return Err(ProviderError::Status {
            provider,
            status: response.status().as_u16(),
        });
    }

    let body = response
        .bytes()
        .await
        .map_err(|source| ProviderError::Http { provider, source })?;

    serde_json::from_slice(&body).map_err(|e| ProviderError::Parse {
        provider,
        message: e.to_string(),
    })
}

// ─── Response shapes ─────────────────────────────────────────────

#[derive(Deserialize, Debug)]
struct IpApiResponse {
    latitude: Option<f64>,
    longitude: Option<f64>,
    city: Option<String>,
    region: Option<String>,
    country_name: Option<String>,
    timezone: Option<String>,
    ip: Option<String>,
    org: Option<String>,
}

impl IpApiResponse {
    fn into_location(self, ip_override: Option<String>) -> Option<ResolvedLocation> {
        let (latitude, longitude) = (self.latitude?, self.longitude?);
        Some(ResolvedLocation {
            latitude,
            longitude,
            address: coordinate_label(latitude, longitude),
            source_ip: ip_override.or(self.ip).unwrap_or_else(|| UNKNOWN.into()),
            country: or_unknown(self.country_name),
            region: or_unknown(self.region),
            city: or_unknown(self.city),
            timezone: normalize_timezone(self.timezone),
            isp: self.org,
        })
    }
}

#[derive(Deserialize, Debug)]
struct IpifyResponse {
    ip: String,
}

#[derive(Deserialize, Debug)]
struct FreeGeoIpResponse {
    latitude: Option<f64>,
    longitude: Option<f64>,
    region_name: Option<String>,
    city: Option<String>,
    country_name: Option<String>,
    time_zone: Option<String>,
    isp: Option<String>,
    ip: Option<String>,
}

impl FreeGeoIpResponse {
    fn into_location(self) -> Option<ResolvedLocation> {
        let (latitude, longitude) = (self.latitude?, self.longitude?);
        Some(ResolvedLocation {
            latitude,
            longitude,
            address: coordinate_label(latitude, longitude),
            source_ip: self.ip.unwrap_or_else(|| UNKNOWN.into()),
            country: or_unknown(self.country_name),
            region: or_unknown(self.region_name),
            city: or_unknown(self.city),
            timezone: normalize_timezone(self.time_zone),
            isp: self.isp,
        })
    }
}

#[derive(Deserialize, Debug)]
struct IpInfoResponse {
    loc: Option<String>,
    city: Option<String>,
    region: Option<String>,
    country: Option<String>,
    timezone: Option<String>,
    ip: Option<String>,
    org: Option<String>,
}

impl IpInfoResponse {
    fn into_location(self) -> Option<ResolvedLocation> {
        let (latitude, longitude) = parse_loc(self.loc.as_deref()?)?;
        Some(ResolvedLocation {
            latitude,
            longitude,
            address: coordinate_label(latitude, longitude),
            source_ip: or_unknown(self.ip),
            country: or_unknown(self.country),
            region: or_unknown(self.region),
            city: or_unknown(self.city),
            timezone: normalize_timezone(self.timezone),
            isp: Some(or_unknown(self.org)),
        })
    }
}

/// Parse ipinfo's `"lat,lon"`. Unparseable or zero components count as "no coordinates".
fn parse_loc(loc: &str) -> Option<(f64, f64)> {
    let (lat, lon) = loc.split_once(',')?;
    let lat: f64 = lat.trim().parse().ok()?;
    let lon: f64 = lon.trim().parse().ok()?;
    if lat == 0.0 || lon == 0.0 {
        return None;
    }
    Some((lat, lon))
}

fn or_unknown(value: Option<String>) -> String {
    value
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| UNKNOWN.into())
}

/// Keep a provider-reported timezone only if it is a known IANA name.
pub(crate) fn normalize_timezone(tz: Option<String>) -> String {
    match tz {
        Some(name) if name.parse::<Tz>().is_ok() => name,
        Some(name) => {
            debug!(timezone = %name, "Unrecognised timezone, using UTC");
            DEFAULT_TIMEZONE.into()
        }
        None => DEFAULT_TIMEZONE.into(),
    }
}
