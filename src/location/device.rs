//! Last-resort positioning from the host's own location capability.
//!
//! The capability is abstracted as a [`PositionSource`]. The default source
//! is a local gpsd daemon; hosts without one report `Unsupported` and the
//! caller surfaces the error instead of inventing a location.

use super::geocode::ReverseGeocoder;
use super::types::{
    DeviceLocationError, ResolvedLocation, DEFAULT_TIMEZONE, DEVICE_SOURCE, UNKNOWN,
};
use super::validate;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::Deserialize;
use std::future::Future;
use std::io;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

pub const DEFAULT_GPSD_ADDR: &str = "127.0.0.1:2947";

const WATCH_COMMAND: &[u8] = b"?WATCH={\"enable\":true,\"json\":true};\n";

/// One-shot fix options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PositionOptions {
    pub timeout: Duration,
    pub enable_high_accuracy: bool,
    /// A previous fix at most this old is returned without asking the source.
    pub maximum_age: Duration,
}

impl Default for PositionOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            enable_high_accuracy: false,
            maximum_age: Duration::from_secs(5 * 60),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Position {
    pub latitude: f64,
    pub longitude: f64,
    pub timestamp: DateTime<Utc>,
}

/// A native positioning capability.
#[async_trait]
pub trait PositionSource: Send + Sync {
    fn name(&self) -> &'static str;

    async fn current_position(
        &self,
        options: &PositionOptions,
    ) -> Result<Position, DeviceLocationError>;
}

/// Reads the first 2D/3D fix from gpsd's JSON watch stream.
#[derive(Debug, Clone)]
pub struct GpsdSource {
    addr: String,
}

impl GpsdSource {
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }

    fn io_error(&self, e: io::Error) -> DeviceLocationError {
        match e.kind() {
            io::ErrorKind::ConnectionRefused => {
                DeviceLocationError::Unsupported(format!("no gpsd listening at {}", self.addr))
            }
            io::ErrorKind::PermissionDenied => DeviceLocationError::PermissionDenied,
            _ => DeviceLocationError::Unavailable(e.to_string()),
        }
    }
}

impl Default for GpsdSource {
    fn default() -> Self {
        Self::new(DEFAULT_GPSD_ADDR)
    }
}

#[derive(Deserialize, Debug)]
struct GpsdReport {
    class: String,
    #[serde(default)]
    mode: Option<u8>,
    #[serde(default)]
    lat: Option<f64>,
    #[serde(default)]
    lon: Option<f64>,
    #[serde(default)]
    message: Option<String>,
}

#[async_trait]
impl PositionSource for GpsdSource {
    fn name(&self) -> &'static str {
        "gpsd"
    }

    async fn current_position(
        &self,
        options: &PositionOptions,
    ) -> Result<Position, DeviceLocationError> {
        debug!(addr = %self.addr, high_accuracy = options.enable_high_accuracy, "Querying gpsd");
        let stream = TcpStream::connect(&self.addr)
            .await
            .map_err(|e| self.io_error(e))?;
        let (read, mut write) = stream.into_split();
        write
            .write_all(WATCH_COMMAND)
            .await
            .map_err(|e| self.io_error(e))?;

        let mut lines = BufReader::new(read).lines();
        while let Some(line) = lines.next_line().await.map_err(|e| self.io_error(e))? {
            let report: GpsdReport = match serde_json::from_str(&line) {
                Ok(r) => r,
                Err(e) => {
                    debug!(error = %e, "Skipping unparseable gpsd line");
                    continue;
                }
            };

            match report.class.as_str() {
                // mode: 0/1 = no fix, 2 = 2D, 3 = 3D
                "TPV" if report.mode.unwrap_or(0) >= 2 => {
                    if let (Some(latitude), Some(longitude)) = (report.lat, report.lon) {
                        return Ok(Position {
                            latitude,
                            longitude,
                            timestamp: Utc::now(),
                        });
                    }
                }
                "ERROR" => {
                    return Err(DeviceLocationError::Unavailable(
                        report.message.unwrap_or_else(|| "gpsd error".into()),
                    ));
                }
                _ => {}
            }
        }

        Err(DeviceLocationError::Unavailable(
            "gpsd closed the stream without a fix".into(),
        ))
    }
}

/// For hosts with no positioning backend configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoPositionSource;

#[async_trait]
impl PositionSource for NoPositionSource {
    fn name(&self) -> &'static str {
        "none"
    }

    async fn current_position(
        &self,
        _options: &PositionOptions,
    ) -> Result<Position, DeviceLocationError> {
        Err(DeviceLocationError::Unsupported(
            "device positioning disabled".into(),
        ))
    }
}

/// Turns a one-shot device fix into a [`ResolvedLocation`].
pub struct DeviceLocator {
    source: Arc<dyn PositionSource>,
    options: PositionOptions,
    last_fix: Mutex<Option<Position>>,
    geocoder: ReverseGeocoder,
}

impl DeviceLocator {
    pub fn new(
        source: Arc<dyn PositionSource>,
        options: PositionOptions,
        geocoder: ReverseGeocoder,
    ) -> Self {
        Self {
            source,
            options,
            last_fix: Mutex::new(None),
            geocoder,
        }
    }

    fn recent_fix(&self, now: DateTime<Utc>) -> Option<Position> {
        let max_age = chrono::Duration::from_std(self.options.maximum_age).ok()?;
        let slot = self.last_fix.lock().unwrap_or_else(PoisonError::into_inner);
        slot.as_ref()
            .filter(|fix| now - fix.timestamp <= max_age)
            .cloned()
    }

    /// A fix no older than `maximum_age`, asking the source only when needed.
    pub async fn current_position(&self) -> Result<Position, DeviceLocationError> {
        if let Some(fix) = self.recent_fix(Utc::now()) {
            debug!(source = self.source.name(), "Reusing recent device fix");
            return Ok(fix);
        }

        let timeout = self.options.timeout;
        let fix = tokio::time::timeout(timeout, self.source.current_position(&self.options))
            .await
            .map_err(|_| DeviceLocationError::Timeout(timeout))??;

        if !validate::is_valid_coordinates(fix.latitude, fix.longitude) {
            return Err(DeviceLocationError::Unavailable(format!(
                "invalid fix {}, {}",
                fix.latitude, fix.longitude
            )));
        }

        *self.last_fix.lock().unwrap_or_else(PoisonError::into_inner) = Some(fix.clone());
        Ok(fix)
    }

    pub async fn resolve_via_device(&self) -> Result<ResolvedLocation, DeviceLocationError> {
        let fix = match self.current_position().await {
            Ok(fix) => fix,
            Err(e) => {
                warn!(source = self.source.name(), error = %e, "Device positioning failed");
                return Err(e);
            }
        };

        let address = self
            .geocoder
            .reverse_geocode(fix.latitude, fix.longitude)
            .await;
        info!(source = self.source.name(), lat = fix.latitude, lon = fix.longitude, "Device fix resolved");

        Ok(ResolvedLocation {
            latitude: fix.latitude,
            longitude: fix.longitude,
            address,
            source_ip: DEVICE_SOURCE.into(),
            country: UNKNOWN.into(),
            region: UNKNOWN.into(),
            city: UNKNOWN.into(),
            timezone: local_timezone(),
            isp: Some(DEVICE_SOURCE.into()),
        })
    }

    /// Like [`Self::resolve_via_device`], abandoned with `Cancelled` as soon as
    /// `cancel` completes. The in-flight request is dropped.
    pub async fn resolve_via_device_until<C>(
        &self,
        cancel: C,
    ) -> Result<ResolvedLocation, DeviceLocationError>
    where
        C: Future<Output = ()>,
    {
        tokio::select! {
            result = self.resolve_via_device() => result,
            _ = cancel => {
                debug!("Device positioning cancelled");
                Err(DeviceLocationError::Cancelled)
            }
        }
    }
}

/// IANA name of the host timezone: `$TZ`, then `/etc/timezone`, then the
/// `/etc/localtime` symlink target. Falls back to UTC.
pub fn local_timezone() -> String {
    timezone_from(
        std::env::var("TZ").ok(),
        std::fs::read_to_string("/etc/timezone").ok(),
        std::fs::read_link("/etc/localtime").ok().as_deref(),
    )
}

fn timezone_from(
    tz_var: Option<String>,
    etc_timezone: Option<String>,
    localtime_link: Option<&Path>,
) -> String {
    let from_var = tz_var
        .map(|v| v.trim().trim_start_matches(':').to_string())
        .filter(|v| !v.is_empty());
    let from_file = etc_timezone
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty());
    let from_link = localtime_link.and_then(|p| {
        let s = p.to_str()?;
        let (_, name) = s.split_once("zoneinfo/")?;
        Some(name.to_string())
    });

    // POSIX rules such as `CET-1CEST` are not IANA names; try the next source.
    [from_var, from_file, from_link]
        .into_iter()
        .flatten()
        .find(|name| name.parse::<Tz>().is_ok())
        .unwrap_or_else(|| DEFAULT_TIMEZONE.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::net::TcpListener;

    struct FixedSource {
        fix: Result<Position, DeviceLocationError>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl PositionSource for FixedSource {
        fn name(&self) -> &'static str {
            "fixed"
        }

        async fn current_position(
            &self,
            _options: &PositionOptions,
        ) -> Result<Position, DeviceLocationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.fix.clone()
        }
    }

    struct HangingSource;

    #[async_trait]
    impl PositionSource for HangingSource {
        fn name(&self) -> &'static str {
            "hanging"
        }

        async fn current_position(
            &self,
            _options: &PositionOptions,
        ) -> Result<Position, DeviceLocationError> {
            std::future::pending().await
        }
    }

    // Nothing listens on port 1, so geocoding degrades to the coordinate label.
    fn offline_geocoder() -> ReverseGeocoder {
        ReverseGeocoder::new(
            reqwest::Client::new(),
            "http://127.0.0.1:1/reverse",
            Duration::from_secs(2),
        )
    }

    fn fixed(fix: Result<Position, DeviceLocationError>) -> Arc<FixedSource> {
        Arc::new(FixedSource {
            fix,
            calls: AtomicUsize::new(0),
        })
    }

    fn stockholm() -> Position {
        Position {
            latitude: 59.3293,
            longitude: 18.0686,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_default_options() {
        let opts = PositionOptions::default();
        assert_eq!(opts.timeout, Duration::from_secs(10));
        assert!(!opts.enable_high_accuracy);
        assert_eq!(opts.maximum_age, Duration::from_secs(300));
    }

    #[tokio::test]
    async fn test_resolve_stamps_device_sentinel() {
        let source = fixed(Ok(stockholm()));
        let locator = DeviceLocator::new(source.clone(), PositionOptions::default(), offline_geocoder());

        let loc = locator.resolve_via_device().await.unwrap();
        assert_eq!(loc.source_ip, "Browser GPS");
        assert_eq!(loc.isp.as_deref(), Some("Browser GPS"));
        assert_eq!(loc.country, "Unknown");
        assert_eq!(loc.address, "59.3293, 18.0686");
        assert!(!loc.timezone.is_empty());
    }

    #[tokio::test]
    async fn test_recent_fix_is_reused() {
        let source = fixed(Ok(stockholm()));
        let locator = DeviceLocator::new(source.clone(), PositionOptions::default(), offline_geocoder());

        locator.current_position().await.unwrap();
        locator.current_position().await.unwrap();
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stale_fix_is_refreshed() {
        let old = Position {
            timestamp: Utc::now() - chrono::Duration::minutes(6),
            ..stockholm()
        };
        let source = fixed(Ok(old));
        let locator = DeviceLocator::new(source.clone(), PositionOptions::default(), offline_geocoder());

        locator.current_position().await.unwrap();
        locator.current_position().await.unwrap();
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_permission_denied_is_surfaced() {
        let source = fixed(Err(DeviceLocationError::PermissionDenied));
        let locator = DeviceLocator::new(source, PositionOptions::default(), offline_geocoder());
        assert_eq!(
            locator.resolve_via_device().await.unwrap_err(),
            DeviceLocationError::PermissionDenied
        );
    }

    #[tokio::test]
    async fn test_null_island_fix_rejected() {
        let source = fixed(Ok(Position {
            latitude: 0.0,
            longitude: 0.0,
            timestamp: Utc::now(),
        }));
        let locator = DeviceLocator::new(source, PositionOptions::default(), offline_geocoder());
        assert!(matches!(
            locator.current_position().await,
            Err(DeviceLocationError::Unavailable(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_source_times_out() {
        let locator = DeviceLocator::new(
            Arc::new(HangingSource),
            PositionOptions::default(),
            offline_geocoder(),
        );
        let started = tokio::time::Instant::now();
        let err = locator.resolve_via_device().await.unwrap_err();
        assert_eq!(err, DeviceLocationError::Timeout(Duration::from_secs(10)));
        assert_eq!(started.elapsed(), Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_cancellation() {
        let locator = DeviceLocator::new(
            Arc::new(HangingSource),
            PositionOptions::default(),
            offline_geocoder(),
        );
        let err = locator
            .resolve_via_device_until(tokio::time::sleep(Duration::from_millis(20)))
            .await
            .unwrap_err();
        assert_eq!(err, DeviceLocationError::Cancelled);
    }

    #[tokio::test]
    async fn test_no_position_source() {
        let locator = DeviceLocator::new(
            Arc::new(NoPositionSource),
            PositionOptions::default(),
            offline_geocoder(),
        );
        assert!(matches!(
            locator.resolve_via_device().await,
            Err(DeviceLocationError::Unsupported(_))
        ));
    }

    async fn fake_gpsd(replies: &'static [&'static str]) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let (read, mut write) = socket.into_split();
            write
                .write_all(b"{\"class\":\"VERSION\",\"release\":\"3.25\"}\n")
                .await
                .unwrap();
            let mut lines = BufReader::new(read).lines();
            let watch = lines.next_line().await.unwrap().unwrap();
            assert!(watch.starts_with("?WATCH="));
            for reply in replies {
                write.write_all(reply.as_bytes()).await.unwrap();
                write.write_all(b"\n").await.unwrap();
            }
        });
        addr
    }

    #[tokio::test]
    async fn test_gpsd_first_real_fix() {
        let addr = fake_gpsd(&[
            r#"{"class":"DEVICES","devices":[]}"#,
            r#"{"class":"TPV","mode":1}"#,
            "garbage",
            r#"{"class":"TPV","mode":3,"lat":25.2048,"lon":55.2708}"#,
        ])
        .await;

        let pos = GpsdSource::new(addr)
            .current_position(&PositionOptions::default())
            .await
            .unwrap();
        approx::assert_abs_diff_eq!(pos.latitude, 25.2048, epsilon = 1e-9);
        approx::assert_abs_diff_eq!(pos.longitude, 55.2708, epsilon = 1e-9);
    }

    #[tokio::test]
    async fn test_gpsd_no_fix_before_close() {
        let addr = fake_gpsd(&[r#"{"class":"TPV","mode":1}"#]).await;
        let err = GpsdSource::new(addr)
            .current_position(&PositionOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, DeviceLocationError::Unavailable(_)));
    }

    #[tokio::test]
    async fn test_gpsd_error_report() {
        let addr = fake_gpsd(&[r#"{"class":"ERROR","message":"no devices"}"#]).await;
        let err = GpsdSource::new(addr)
            .current_position(&PositionOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err, DeviceLocationError::Unavailable("no devices".into()));
    }

    #[tokio::test]
    async fn test_gpsd_not_running() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let err = GpsdSource::new(addr)
            .current_position(&PositionOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, DeviceLocationError::Unsupported(_)));
    }

    #[test]
    fn test_timezone_sources() {
        assert_eq!(timezone_from(Some(":Asia/Dubai".into()), None, None), "Asia/Dubai");
        assert_eq!(
            timezone_from(None, Some("Europe/Stockholm\n".into()), None),
            "Europe/Stockholm"
        );
        assert_eq!(
            timezone_from(None, None, Some(Path::new("/usr/share/zoneinfo/America/New_York"))),
            "America/New_York"
        );
        assert_eq!(
            timezone_from(Some("Europe/Paris".into()), Some("Asia/Tokyo".into()), None),
            "Europe/Paris"
        );
    }

    #[test]
    fn test_timezone_fallback() {
        assert_eq!(timezone_from(None, None, None), "UTC");
        assert_eq!(timezone_from(Some("Mars/Olympus".into()), None, None), "UTC");
        assert_eq!(timezone_from(Some(String::new()), None, Some(Path::new("/etc/nowhere"))), "UTC");
    }

    #[test]
    fn test_timezone_skips_posix_rule() {
        assert_eq!(
            timezone_from(Some("CET-1CEST".into()), Some("Europe/Berlin\n".into()), None),
            "Europe/Berlin"
        );
        assert_eq!(
            timezone_from(
                Some("EST5EDT,M3.2.0,M11.1.0".into()),
                Some("garbage".into()),
                Some(Path::new("/usr/share/zoneinfo/America/Chicago")),
            ),
            "America/Chicago"
        );
    }
}
