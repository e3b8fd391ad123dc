// src/gps/reader.rs
//! Background NMEA reader that keeps the freshest fix available

use super::{
    data::{Fix, GpsHealth},
    nmea,
};
use crate::error::{Result, SurveyError};
use serde::{Deserialize, Serialize};
use std::{
    sync::{
        atomic::{AtomicBool, AtomicU32, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader},
    sync::{watch, Mutex},
    task::JoinHandle,
    time::{sleep, timeout},
};
use tokio_serial::SerialPortBuilderExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Serial settings for the GPS receiver
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GpsSettings {
    pub port: Option<String>,
    pub baud_rate: u32,
    pub read_timeout_ms: u64,
    pub idle_delay_ms: u64,
    /// Longest line kept before the partial input is dropped
    pub max_line_bytes: usize,
    /// Give up on the stream after this many failed reads in a row
    pub max_consecutive_failures: Option<u32>,
}

impl Default for GpsSettings {
    fn default() -> Self {
        Self {
            port: None,
            baud_rate: 9600,
            read_timeout_ms: 500,
            idle_delay_ms: 1,
            max_line_bytes: 1024,
            max_consecutive_failures: None,
        }
    }
}

impl GpsSettings {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn idle_delay(&self) -> Duration {
        Duration::from_millis(self.idle_delay_ms)
    }
}

/// Flags shared between the reader handle and its loop
#[derive(Debug, Default)]
struct LinkState {
    connected: AtomicBool,
    running: AtomicBool,
    failures: AtomicU32,
}

impl LinkState {
    fn record_failure(&self, reason: &str) -> u32 {
        let failures = self.failures.fetch_add(1, Ordering::Relaxed) + 1;
        warn!("GPS read failed ({} in a row): {}", failures, reason);
        failures
    }

    fn record_line(&self) {
        self.failures.store(0, Ordering::Relaxed);
    }
}

struct ReaderTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Owns the GPS transport and publishes every parsed RMC/HDT update as a
/// whole [`Fix`] snapshot. Readers never observe a half-updated fix.
pub struct GpsReader {
    settings: GpsSettings,
    fix: Arc<watch::Sender<Fix>>,
    link: Arc<LinkState>,
    task: Mutex<Option<ReaderTask>>,
}

impl GpsReader {
    pub fn new(settings: GpsSettings) -> Self {
        let (fix, _) = watch::channel(Fix::new());
        Self {
            settings,
            fix: Arc::new(fix),
            link: Arc::new(LinkState::default()),
            task: Mutex::new(None),
        }
    }

    pub fn settings(&self) -> &GpsSettings {
        &self.settings
    }

    /// Open a serial port and start the read loop
    pub async fn connect(&self, port: &str, baud_rate: u32) -> Result<()> {
        info!("Connecting to GPS on {} at {} baud", port, baud_rate);

        let serial = tokio_serial::new(port, baud_rate)
            .timeout(self.settings.read_timeout())
            .open_native_async()
            .map_err(|e| {
                SurveyError::Connection(format!("Failed to open serial port {}: {}", port, e))
            })?;

        self.connect_stream(serial).await
    }

    /// Start the read loop on an already opened byte stream
    pub async fn connect_stream<R>(&self, stream: R) -> Result<()>
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        let mut task = self.task.lock().await;
        if task.is_some() {
            return Err(SurveyError::Connection("GPS is already connected".to_string()));
        }

        let mut reader = BufReader::new(stream);

        // The first line is usually a partial one left in the driver buffer
        let mut partial = Vec::new();
        match timeout(self.settings.read_timeout(), reader.read_until(b'\n', &mut partial)).await {
            Ok(Ok(n)) => debug!("Discarded {} bytes of buffered GPS input", n),
            Ok(Err(e)) => warn!("Error clearing GPS input buffer: {}", e),
            Err(_) => debug!("No buffered GPS input to discard"),
        }

        self.link.failures.store(0, Ordering::Relaxed);
        self.link.connected.store(true, Ordering::Relaxed);
        self.link.running.store(true, Ordering::Relaxed);

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(read_loop(
            reader,
            Arc::clone(&self.fix),
            Arc::clone(&self.link),
            cancel.clone(),
            self.settings.clone(),
        ));

        *task = Some(ReaderTask { cancel, handle });
        info!("GPS connected");
        Ok(())
    }

    /// Stop the read loop, release the transport and clear the fix.
    /// Does nothing if the reader was never connected.
    pub async fn disconnect(&self) {
        let task = self.task.lock().await.take();

        if let Some(task) = task {
            task.cancel.cancel();
            if let Err(e) = task.handle.await {
                warn!("GPS read loop ended abnormally: {}", e);
            }
            info!("GPS sampling stopped");
        }

        self.fix.send_replace(Fix::new());
        self.link.connected.store(false, Ordering::Relaxed);
        self.link.running.store(false, Ordering::Relaxed);
        self.link.failures.store(0, Ordering::Relaxed);
    }

    /// Serial port is open
    pub fn is_connected(&self) -> bool {
        self.link.connected.load(Ordering::Relaxed)
    }

    /// Read loop is active
    pub fn is_running(&self) -> bool {
        self.link.running.load(Ordering::Relaxed)
    }

    pub fn health(&self) -> GpsHealth {
        if !self.is_running() {
            return GpsHealth::Disconnected;
        }
        match self.link.failures.load(Ordering::Relaxed) {
            0 => GpsHealth::Live,
            consecutive_failures => GpsHealth::Stale { consecutive_failures },
        }
    }

    /// Copy of the latest fix
    pub fn fix(&self) -> Fix {
        self.fix.borrow().clone()
    }

    /// Receiver notified on every fix change
    pub fn subscribe(&self) -> watch::Receiver<Fix> {
        self.fix.subscribe()
    }
}

async fn read_loop<R>(
    mut reader: BufReader<R>,
    fix: Arc<watch::Sender<Fix>>,
    link: Arc<LinkState>,
    cancel: CancellationToken,
    settings: GpsSettings,
) where
    R: AsyncRead + Unpin,
{
    // Survives timeouts so a line split across two reads is not lost
    let mut buf = Vec::new();

    loop {
        // One byte past the cap so an overlong line is detectable
        let room = (settings.max_line_bytes + 1).saturating_sub(buf.len()) as u64;
        let mut limited = (&mut reader).take(room);
        let read = tokio::select! {
            _ = cancel.cancelled() => break,
            read = timeout(settings.read_timeout(), limited.read_until(b'\n', &mut buf)) => read,
        };

        let failures = match read {
            Err(_) => link.record_failure("read timed out"),
            Ok(Ok(0)) => {
                warn!("GPS stream closed");
                break;
            }
            Ok(Ok(_)) if buf.last() != Some(&b'\n') => {
                if buf.len() <= settings.max_line_bytes {
                    // Stream ended mid-line; the next read reports the EOF
                    continue;
                }
                let dropped = buf.len();
                buf.clear();
                link.record_failure(&format!("no line end within {} bytes", dropped))
            }
            Ok(Ok(_)) => {
                let failures = match std::str::from_utf8(&buf) {
                    Ok(line) => {
                        link.record_line();
                        handle_line(&fix, line.trim());
                        0
                    }
                    Err(e) => link.record_failure(&format!("decode error: {}", e)),
                };
                buf.clear();
                failures
            }
            Ok(Err(e)) => {
                buf.clear();
                link.record_failure(&e.to_string())
            }
        };

        if let Some(max) = settings.max_consecutive_failures {
            if failures >= max {
                warn!("GPS gave no valid data for {} reads, stopping", failures);
                break;
            }
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = sleep(settings.idle_delay()) => {}
        }
    }

    link.running.store(false, Ordering::Relaxed);
}

fn handle_line(fix: &watch::Sender<Fix>, line: &str) {
    if line.is_empty() {
        return;
    }

    match nmea::parse_sentence(line) {
        Ok(sentence) => {
            fix.send_if_modified(|current| sentence.apply(current));
        }
        Err(e) => debug!("Ignoring sentence {:?}: {}", line, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, AsyncWriteExt};

    const RMC: &str = "$GPRMC,123519,A,4807.038,N,01131.000,E,022.4,084.4,230394,003.1,W*6A\r\n";
    const HDT: &str = "$HEHDT,274.07,T*19\r\n";

    fn test_settings() -> GpsSettings {
        GpsSettings {
            read_timeout_ms: 50,
            ..GpsSettings::default()
        }
    }

    async fn wait_for_fix<F>(reader: &GpsReader, predicate: F) -> Fix
    where
        F: Fn(&Fix) -> bool,
    {
        let mut rx = reader.subscribe();
        let fix = timeout(Duration::from_secs(2), rx.wait_for(|fix| predicate(fix)))
            .await
            .expect("timed out waiting for fix")
            .expect("fix channel closed")
            .clone();
        fix
    }

    #[tokio::test]
    async fn test_reads_rmc_and_hdt() {
        let reader = GpsReader::new(test_settings());
        let (mut device, host) = duplex(1024);

        // Partial line sitting in the buffer before connect
        device.write_all(b"0.000,E,022.4*00\r\n").await.unwrap();
        reader.connect_stream(host).await.unwrap();
        assert!(reader.is_connected());
        assert!(reader.is_running());

        device.write_all(RMC.as_bytes()).await.unwrap();
        device.write_all(HDT.as_bytes()).await.unwrap();

        let fix = wait_for_fix(&reader, |fix| !fix.heading.is_empty()).await;
        assert_eq!(fix.date, "1994-03-23");
        assert_eq!(fix.time, "12:35:19+00:00");
        assert_eq!(fix.latitude, "4807.038 N");
        assert_eq!(fix.longitude, "01131.000 E");
        assert_eq!(fix.heading, "274.07");
        assert_eq!(reader.health(), GpsHealth::Live);

        reader.disconnect().await;
    }

    #[tokio::test]
    async fn test_garbage_does_not_stop_loop() {
        let reader = GpsReader::new(test_settings());
        let (mut device, host) = duplex(1024);
        reader.connect_stream(host).await.unwrap();

        device.write_all(b"not nmea at all\r\n").await.unwrap();
        device.write_all(&[0xff, 0xfe, b'\n']).await.unwrap();
        device.write_all(RMC.as_bytes()).await.unwrap();

        let fix = wait_for_fix(&reader, Fix::has_position).await;
        assert_eq!(fix.latitude, "4807.038 N");
        assert!(reader.is_running());

        reader.disconnect().await;
    }

    #[tokio::test]
    async fn test_timeouts_mark_fix_stale() {
        let reader = GpsReader::new(test_settings());
        let (mut device, host) = duplex(1024);
        reader.connect_stream(host).await.unwrap();
        device.write_all(RMC.as_bytes()).await.unwrap();
        wait_for_fix(&reader, Fix::has_position).await;

        sleep(Duration::from_millis(200)).await;

        assert!(matches!(reader.health(), GpsHealth::Stale { .. }));
        assert!(reader.is_running());
        assert!(reader.fix().has_position());

        reader.disconnect().await;
    }

    #[tokio::test]
    async fn test_overlong_line_is_dropped() {
        let reader = GpsReader::new(GpsSettings {
            read_timeout_ms: 5_000,
            max_line_bytes: 256,
            ..GpsSettings::default()
        });
        let (mut device, host) = duplex(4096);
        device.write_all(b"\r\n").await.unwrap();
        reader.connect_stream(host).await.unwrap();

        // A stuck device streaming bytes without any line end
        device.write_all(&[b'A'; 1000]).await.unwrap();
        timeout(Duration::from_secs(1), async {
            while !matches!(reader.health(), GpsHealth::Stale { consecutive_failures } if consecutive_failures >= 3) {
                sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("overlong input was not reported");
        assert!(reader.is_running());

        device.write_all(b"\r\n").await.unwrap();
        device.write_all(RMC.as_bytes()).await.unwrap();
        let fix = wait_for_fix(&reader, Fix::has_position).await;
        assert_eq!(fix.latitude, "4807.038 N");
        assert_eq!(reader.health(), GpsHealth::Live);

        reader.disconnect().await;
    }

    #[tokio::test]
    async fn test_max_failures_stops_loop() {
        let reader = GpsReader::new(GpsSettings {
            read_timeout_ms: 20,
            max_consecutive_failures: Some(3),
            ..GpsSettings::default()
        });
        let (_device, host) = duplex(1024);
        reader.connect_stream(host).await.unwrap();

        sleep(Duration::from_millis(300)).await;

        assert!(!reader.is_running());
        assert!(reader.is_connected());
        assert_eq!(reader.health(), GpsHealth::Disconnected);

        reader.disconnect().await;
        assert!(!reader.is_connected());
    }

    #[tokio::test]
    async fn test_closed_stream_ends_loop() {
        let reader = GpsReader::new(test_settings());
        let (device, host) = duplex(1024);
        reader.connect_stream(host).await.unwrap();

        drop(device);
        sleep(Duration::from_millis(100)).await;

        assert!(!reader.is_running());
        reader.disconnect().await;
    }

    #[tokio::test]
    async fn test_disconnect_clears_fix() {
        let reader = GpsReader::new(test_settings());
        let (mut device, host) = duplex(1024);
        reader.connect_stream(host).await.unwrap();
        device.write_all(RMC.as_bytes()).await.unwrap();
        wait_for_fix(&reader, Fix::has_position).await;

        reader.disconnect().await;

        assert!(reader.fix().is_empty());
        assert!(!reader.is_connected());
        assert!(!reader.is_running());
    }

    #[tokio::test]
    async fn test_disconnect_without_connect_is_noop() {
        let reader = GpsReader::new(GpsSettings::default());
        reader.disconnect().await;
        reader.disconnect().await;
        assert!(!reader.is_connected());
        assert_eq!(reader.health(), GpsHealth::Disconnected);
    }

    #[tokio::test]
    async fn test_double_connect_is_rejected() {
        let reader = GpsReader::new(test_settings());
        let (_device_a, host_a) = duplex(64);
        let (_device_b, host_b) = duplex(64);
        reader.connect_stream(host_a).await.unwrap();

        assert!(matches!(
            reader.connect_stream(host_b).await,
            Err(SurveyError::Connection(_))
        ));

        reader.disconnect().await;
    }

    #[tokio::test]
    async fn test_connect_to_missing_port_fails() {
        let reader = GpsReader::new(GpsSettings::default());
        let result = reader.connect("/dev/does-not-exist-gps", 4800).await;

        assert!(matches!(result, Err(SurveyError::Connection(_))));
        assert!(!reader.is_connected());
        assert!(!reader.is_running());
    }
}
