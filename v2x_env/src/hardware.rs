//! Hardware sensor drivers.
//!
//! All three devices are line-oriented serial peripherals: the GPS emits
//! NMEA sentences, the radar a bare ASCII distance per line, the IMU six
//! whitespace-separated values per line. Ports are opened through
//! `tokio-serial` with the configured baud rate and read timeout.
//!
//! Reads never wait for the device. Each read drains only the bytes the UART
//! has already buffered; a partial line is kept for the next tick.

use crate::context::V2xContext;
use crate::error::EnvError;
use crate::sensor::SensorDriver;
use crate::types::{SensorData, SensorKind, SensorReading};
use std::io::{self, Read};
use std::sync::Arc;
use std::time::Duration;
use tokio_serial::SerialPort;
use tracing::{info, warn};

/// Knots to metres per second.
const KNOTS_TO_MPS: f64 = 0.514444;

/// Lines the GPS driver scans per read before giving up on finding `$GPRMC`.
const MAX_NMEA_LINES_PER_READ: usize = 16;

/// Longest line kept while waiting for its terminator.
const MAX_LINE_BYTES: usize = 512;

/// Serial line parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct SerialSettings {
    pub path: String,
    pub baud_rate: u32,
    pub timeout: Duration,
}

impl SerialSettings {
    pub fn new(path: impl Into<String>, baud_rate: u32, timeout: Duration) -> Self {
        Self {
            path: path.into(),
            baud_rate,
            timeout,
        }
    }
}

/// Byte-level access to an open serial line.
pub trait SerialLink: Send {
    /// Bytes received by the UART and not yet read.
    fn bytes_to_read(&self) -> Result<u32, EnvError>;

    /// Reads up to `buf.len()` already-buffered bytes.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;
}

impl SerialLink for Box<dyn SerialPort> {
    fn bytes_to_read(&self) -> Result<u32, EnvError> {
        SerialPort::bytes_to_read(&**self).map_err(|e| EnvError::read(e.to_string()))
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Read::read(&mut **self, buf)
    }
}

/// A line-oriented serial port.
struct LinePort {
    settings: SerialSettings,
    link: Option<Box<dyn SerialLink>>,
    pending: Vec<u8>,
}

impl LinePort {
    fn new(settings: SerialSettings) -> Self {
        Self {
            settings,
            link: None,
            pending: Vec::new(),
        }
    }

    fn open(&mut self) -> Result<(), EnvError> {
        let port = tokio_serial::new(&self.settings.path, self.settings.baud_rate)
            .timeout(self.settings.timeout)
            .open()
            .map_err(|e| EnvError::ConnectionFailed(format!("{}: {}", self.settings.path, e)))?;
        self.attach(Box::new(port));
        Ok(())
    }

    fn attach(&mut self, link: Box<dyn SerialLink>) {
        self.link = Some(link);
        self.pending.clear();
    }

    fn is_open(&self) -> bool {
        self.link.is_some()
    }

    fn close(&mut self) {
        self.link = None;
        self.pending.clear();
    }

    /// Pops the next non-blank buffered line.
    fn take_line(&mut self) -> Option<String> {
        while let Some(end) = self.pending.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.pending.drain(..=end).collect();
            let line = String::from_utf8_lossy(&raw).trim().to_string();
            if !line.is_empty() {
                return Some(line);
            }
        }
        None
    }

    /// Returns the next complete line, or `None` when no full line has
    /// arrived yet.
    fn read_line(&mut self, name: &str) -> Result<Option<String>, EnvError> {
        loop {
            if let Some(line) = self.take_line() {
                return Ok(Some(line));
            }

            let link = self
                .link
                .as_mut()
                .ok_or_else(|| EnvError::NotConnected(name.to_string()))?;
            let waiting = link.bytes_to_read()? as usize;
            if waiting == 0 {
                return Ok(None);
            }

            let mut chunk = vec![0u8; waiting.min(MAX_LINE_BYTES)];
            let n = match link.read(&mut chunk) {
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::TimedOut => {
                    return Err(EnvError::read(format!("{} read timed out", name)));
                }
                Err(e) => return Err(e.into()),
            };
            if n == 0 {
                return Ok(None);
            }
            self.pending.extend_from_slice(&chunk[..n]);

            if self.pending.len() > MAX_LINE_BYTES && !self.pending.contains(&b'\n') {
                warn!("{} dropped {} bytes without a line terminator", name, self.pending.len());
                self.pending.clear();
                return Err(EnvError::parse(format!("{} line exceeds {} bytes", name, MAX_LINE_BYTES)));
            }
        }
    }
}

// ============================================================================
// PARSERS
// ============================================================================

/// Converts an NMEA `ddmm.mmmm` field to signed decimal degrees.
fn nmea_to_decimal(raw: f64, direction: &str) -> f64 {
    let degrees = (raw / 100.0).trunc();
    let minutes = raw - degrees * 100.0;
    let decimal = degrees + minutes / 60.0;
    if direction == "S" || direction == "W" {
        -decimal
    } else {
        decimal
    }
}

/// Parses a `$GPRMC` sentence into `(lat, lon, speed_mps, heading_deg)`.
pub fn parse_gprmc(sentence: &str) -> Result<(f64, f64, f64, f64), EnvError> {
    if !sentence.starts_with("$GPRMC") {
        return Err(EnvError::parse(format!("not a GPRMC sentence: {}", sentence)));
    }
    let parts: Vec<&str> = sentence.split(',').collect();
    if parts.len() < 9 {
        return Err(EnvError::parse("truncated GPRMC sentence"));
    }

    let field = |i: usize| -> Result<f64, EnvError> {
        parts[i]
            .parse::<f64>()
            .map_err(|_| EnvError::parse(format!("bad GPRMC field {}: {:?}", i, parts[i])))
    };
    let optional = |i: usize| -> Result<f64, EnvError> {
        if parts[i].is_empty() {
            Ok(0.0)
        } else {
            field(i)
        }
    };

    let lat = nmea_to_decimal(field(3)?, parts[4]);
    let lon = nmea_to_decimal(field(5)?, parts[6]);
    let speed_mps = optional(7)? * KNOTS_TO_MPS;
    let heading = optional(8)?;

    Ok((lat, lon, speed_mps, heading))
}

/// Parses a radar line holding a single decimal distance in metres.
pub fn parse_distance(line: &str) -> Result<f64, EnvError> {
    line.trim()
        .parse::<f64>()
        .map_err(|_| EnvError::parse(format!("bad radar distance: {:?}", line)))
}

fn parse_imu_line(line: &str) -> Result<[f64; 6], EnvError> {
    let values: Vec<f64> = line
        .split_whitespace()
        .map(|v| v.parse::<f64>())
        .collect::<Result<_, _>>()
        .map_err(|_| EnvError::parse(format!("bad IMU line: {:?}", line)))?;
    if values.len() != 6 {
        return Err(EnvError::parse(format!(
            "IMU line has {} fields, expected 6",
            values.len()
        )));
    }
    Ok([values[0], values[1], values[2], values[3], values[4], values[5]])
}

// ============================================================================
// DRIVERS
// ============================================================================

/// NMEA GPS on a serial port.
pub struct SerialGps {
    port: LinePort,
    clock: Arc<dyn V2xContext>,
}

impl SerialGps {
    pub fn new(settings: SerialSettings, clock: Arc<dyn V2xContext>) -> Self {
        Self {
            port: LinePort::new(settings),
            clock,
        }
    }

    /// Uses an already-open link instead of a device path.
    pub fn with_link(link: Box<dyn SerialLink>, clock: Arc<dyn V2xContext>) -> Self {
        let mut gps = Self::new(attached(), clock);
        gps.port.attach(link);
        gps
    }
}

fn attached() -> SerialSettings {
    SerialSettings::new("<attached>", 0, Duration::ZERO)
}

impl SensorDriver for SerialGps {
    fn name(&self) -> &str {
        "GPS"
    }

    fn kind(&self) -> SensorKind {
        SensorKind::Gps
    }

    fn is_simulation(&self) -> bool {
        false
    }

    fn is_connected(&self) -> bool {
        self.port.is_open()
    }

    fn connect(&mut self) -> Result<(), EnvError> {
        if !self.port.is_open() {
            self.port.open()?;
        }
        info!(
            "GPS connected on {} @ {} baud",
            self.port.settings.path, self.port.settings.baud_rate
        );
        Ok(())
    }

    fn read(&mut self) -> Result<SensorReading, EnvError> {
        for _ in 0..MAX_NMEA_LINES_PER_READ {
            let line = match self.port.read_line("GPS")? {
                Some(line) => line,
                None => break,
            };
            if !line.starts_with("$GPRMC") {
                continue;
            }
            let (latitude, longitude, speed_mps, heading_deg) = parse_gprmc(&line)?;
            return Ok(SensorReading::new(
                self.clock.now_secs(),
                SensorData::Gps {
                    latitude,
                    longitude,
                    speed_mps,
                    heading_deg,
                },
            )
            .with_raw(line.into_bytes()));
        }
        Err(EnvError::read("no GPRMC sentence available"))
    }

    fn calibrate(&mut self) -> Result<(), EnvError> {
        info!("GPS calibration - waiting for satellite fix");
        Ok(())
    }

    fn close(&mut self) {
        self.port.close();
        info!("GPS sensor closed");
    }
}

/// Six-axis IMU streaming text lines.
pub struct SerialImu {
    port: LinePort,
    clock: Arc<dyn V2xContext>,
}

impl SerialImu {
    pub fn new(settings: SerialSettings, clock: Arc<dyn V2xContext>) -> Self {
        Self {
            port: LinePort::new(settings),
            clock,
        }
    }

    pub fn with_link(link: Box<dyn SerialLink>, clock: Arc<dyn V2xContext>) -> Self {
        let mut imu = Self::new(attached(), clock);
        imu.port.attach(link);
        imu
    }
}

impl SensorDriver for SerialImu {
    fn name(&self) -> &str {
        "IMU"
    }

    fn kind(&self) -> SensorKind {
        SensorKind::Imu
    }

    fn is_simulation(&self) -> bool {
        false
    }

    fn is_connected(&self) -> bool {
        self.port.is_open()
    }

    fn connect(&mut self) -> Result<(), EnvError> {
        if !self.port.is_open() {
            self.port.open()?;
        }
        info!(
            "IMU connected on {} @ {} baud",
            self.port.settings.path, self.port.settings.baud_rate
        );
        Ok(())
    }

    fn read(&mut self) -> Result<SensorReading, EnvError> {
        let line = self
            .port
            .read_line("IMU")?
            .ok_or_else(|| EnvError::read("IMU produced no data"))?;
        let [ax, ay, az, gx, gy, gz] = parse_imu_line(&line)?;
        Ok(SensorReading::new(
            self.clock.now_secs(),
            SensorData::Imu {
                accel_x: ax,
                accel_y: ay,
                accel_z: az,
                gyro_x: gx,
                gyro_y: gy,
                gyro_z: gz,
            },
        )
        .with_raw(line.into_bytes()))
    }

    fn calibrate(&mut self) -> Result<(), EnvError> {
        info!("IMU calibration - keep device still");
        Ok(())
    }

    fn close(&mut self) {
        self.port.close();
        info!("IMU sensor closed");
    }
}

/// UART range sensor.
pub struct SerialRadar {
    port: LinePort,
    clock: Arc<dyn V2xContext>,
    max_range_m: f64,
}

impl SerialRadar {
    pub fn new(settings: SerialSettings, clock: Arc<dyn V2xContext>, max_range_m: f64) -> Self {
        Self {
            port: LinePort::new(settings),
            clock,
            max_range_m,
        }
    }

    pub fn with_link(link: Box<dyn SerialLink>, clock: Arc<dyn V2xContext>, max_range_m: f64) -> Self {
        let mut radar = Self::new(attached(), clock, max_range_m);
        radar.port.attach(link);
        radar
    }
}

impl SensorDriver for SerialRadar {
    fn name(&self) -> &str {
        "Radar"
    }

    fn kind(&self) -> SensorKind {
        SensorKind::Radar
    }

    fn is_simulation(&self) -> bool {
        false
    }

    fn is_connected(&self) -> bool {
        self.port.is_open()
    }

    fn connect(&mut self) -> Result<(), EnvError> {
        if !self.port.is_open() {
            self.port.open()?;
        }
        info!(
            "Radar connected on {} @ {} baud",
            self.port.settings.path, self.port.settings.baud_rate
        );
        Ok(())
    }

    fn read(&mut self) -> Result<SensorReading, EnvError> {
        let line = self
            .port
            .read_line("Radar")?
            .ok_or_else(|| EnvError::read("radar produced no data"))?;
        let distance_m = parse_distance(&line)?;
        // This device reports range only
        Ok(SensorReading::new(
            self.clock.now_secs(),
            SensorData::Radar {
                distance_m,
                relative_velocity_mps: 0.0,
                target_detected: distance_m < self.max_range_m,
            },
        )
        .with_raw(line.into_bytes()))
    }

    fn calibrate(&mut self) -> Result<(), EnvError> {
        info!("Radar calibration - point sensor at known distance");
        Ok(())
    }

    fn close(&mut self) {
        self.port.close();
        info!("Radar sensor closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokio_impl::TokioContext;
    use approx::assert_relative_eq;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Serial line fed from a shared byte queue.
    #[derive(Clone, Default)]
    struct ScriptedLine {
        bytes: Arc<Mutex<VecDeque<u8>>>,
    }

    impl ScriptedLine {
        fn with(text: &str) -> Self {
            let line = Self::default();
            line.push(text);
            line
        }

        fn push(&self, text: &str) {
            self.bytes.lock().unwrap().extend(text.bytes());
        }
    }

    impl SerialLink for ScriptedLine {
        fn bytes_to_read(&self) -> Result<u32, EnvError> {
            Ok(self.bytes.lock().unwrap().len() as u32)
        }

        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let mut bytes = self.bytes.lock().unwrap();
            let n = buf.len().min(bytes.len());
            for (slot, byte) in buf.iter_mut().zip(bytes.drain(..n)) {
                *slot = byte;
            }
            Ok(n)
        }
    }

    /// Idle line: nothing buffered, and reading would block.
    struct IdleLine;

    impl SerialLink for IdleLine {
        fn bytes_to_read(&self) -> Result<u32, EnvError> {
            Ok(0)
        }

        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            panic!("read issued on an idle line");
        }
    }

    /// Line that reports data but times out delivering it.
    struct StalledLine;

    impl SerialLink for StalledLine {
        fn bytes_to_read(&self) -> Result<u32, EnvError> {
            Ok(8)
        }

        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::TimedOut, "operation timed out"))
        }
    }

    fn clock() -> Arc<dyn V2xContext> {
        TokioContext::shared()
    }

    #[test]
    fn test_parse_gprmc() {
        let sentence = "$GPRMC,123519,A,4807.038,N,01131.000,E,022.4,084.4,230394,003.1,W*6A";
        let (lat, lon, speed, heading) = parse_gprmc(sentence).unwrap();

        assert_relative_eq!(lat, 48.0 + 7.038 / 60.0, epsilon = 1e-9);
        assert_relative_eq!(lon, 11.0 + 31.0 / 60.0, epsilon = 1e-9);
        assert_relative_eq!(speed, 22.4 * KNOTS_TO_MPS, epsilon = 1e-9);
        assert_relative_eq!(heading, 84.4, epsilon = 1e-9);
    }

    #[test]
    fn test_parse_gprmc_southern_western() {
        let sentence = "$GPRMC,000000,A,3351.000,S,15112.000,W,,,010100,,*00";
        let (lat, lon, speed, heading) = parse_gprmc(sentence).unwrap();

        assert!(lat < 0.0);
        assert!(lon < 0.0);
        assert_eq!(speed, 0.0);
        assert_eq!(heading, 0.0);
    }

    #[test]
    fn test_parse_gprmc_rejects_garbage() {
        assert!(parse_gprmc("$GPGGA,1,2,3").is_err());
        assert!(parse_gprmc("$GPRMC,1,A").is_err());
        assert!(parse_gprmc("$GPRMC,1,A,xx,N,01131.000,E,0,0,0").is_err());
    }

    #[test]
    fn test_gps_skips_other_sentences() {
        let mut gps = SerialGps::with_link(
            Box::new(ScriptedLine::with(
                "$GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,*47\r\n\
                 $GPRMC,123519,A,4807.038,N,01131.000,E,022.4,084.4,230394,003.1,W*6A\r\n",
            )),
            clock(),
        );
        assert!(gps.is_connected());

        let reading = gps.read().unwrap();
        assert_eq!(reading.kind, SensorKind::Gps);
        assert!(reading.raw.is_some());

        // Port drained
        assert!(matches!(gps.read(), Err(EnvError::ReadFailed(_))));
    }

    #[test]
    fn test_idle_line_returns_without_reading() {
        let mut gps = SerialGps::with_link(Box::new(IdleLine), clock());
        assert!(matches!(gps.read(), Err(EnvError::ReadFailed(_))));

        let mut radar = SerialRadar::with_link(Box::new(IdleLine), clock(), 200.0);
        assert!(matches!(radar.read(), Err(EnvError::ReadFailed(_))));
    }

    #[test]
    fn test_timeout_is_a_read_failure() {
        let mut imu = SerialImu::with_link(Box::new(StalledLine), clock());
        assert!(matches!(imu.read(), Err(EnvError::ReadFailed(_))));
    }

    #[test]
    fn test_partial_line_completes_on_later_read() {
        let line = ScriptedLine::with("42.");
        let mut radar = SerialRadar::with_link(Box::new(line.clone()), clock(), 200.0);

        assert!(matches!(radar.read(), Err(EnvError::ReadFailed(_))));

        line.push("5\n");
        match radar.read().unwrap().data {
            SensorData::Radar { distance_m, .. } => assert_relative_eq!(distance_m, 42.5),
            other => panic!("unexpected payload {:?}", other),
        }
    }

    #[test]
    fn test_unterminated_flood_is_discarded() {
        let line = ScriptedLine::with(&"9".repeat(MAX_LINE_BYTES + 1));
        let mut radar = SerialRadar::with_link(Box::new(line.clone()), clock(), 200.0);

        assert!(matches!(radar.read(), Err(EnvError::ParseError(_))));

        line.push("\n17\n");
        match radar.read().unwrap().data {
            SensorData::Radar { distance_m, .. } => assert_relative_eq!(distance_m, 17.0),
            other => panic!("unexpected payload {:?}", other),
        }
        assert!(matches!(radar.read(), Err(EnvError::ReadFailed(_))));
    }

    #[test]
    fn test_radar_reads_distance_lines() {
        let mut radar = SerialRadar::with_link(Box::new(ScriptedLine::with("42.5\nnope\n")), clock(), 200.0);

        match radar.read().unwrap().data {
            SensorData::Radar {
                distance_m,
                target_detected,
                ..
            } => {
                assert_relative_eq!(distance_m, 42.5);
                assert!(target_detected);
            }
            other => panic!("unexpected payload {:?}", other),
        }
        assert!(matches!(radar.read(), Err(EnvError::ParseError(_))));
    }

    #[test]
    fn test_imu_line_parsing() {
        let mut imu = SerialImu::with_link(Box::new(ScriptedLine::with("0.1 -0.2 9.81 0 0 1.5\n1 2 3\n")), clock());
        assert!(imu.read().is_ok());
        assert!(matches!(imu.read(), Err(EnvError::ParseError(_))));
    }

    #[tokio::test]
    async fn test_readings_are_stamped_by_context_clock() {
        let ctx = TokioContext::shared();
        let mut radar = SerialRadar::with_link(Box::new(ScriptedLine::with("10\n20\n")), ctx.clone(), 200.0);

        let first = radar.read().unwrap().timestamp;
        ctx.sleep(Duration::from_millis(20)).await;
        let second = radar.read().unwrap().timestamp;

        assert!(first < 1.0);
        assert!(second - first >= 0.02);
    }

    #[test]
    fn test_connect_missing_device_fails() {
        let settings = SerialSettings::new("/nonexistent/ttyV2X0", 9600, Duration::from_millis(50));
        let mut gps = SerialGps::new(settings, clock());
        assert!(matches!(gps.connect(), Err(EnvError::ConnectionFailed(_))));
        assert!(matches!(gps.read(), Err(EnvError::NotConnected(_))));
    }
}
