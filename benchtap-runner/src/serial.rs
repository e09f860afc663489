//! Serial console capture
//!
//! A [`SerialTap`] opens a serial device and copies everything it reads
//! into a log file and onto a chunk channel until told to stop:
//!
//! ```text
//! Idle --start()--> Capturing --stop(linger)--> Stopped
//! ```
//!
//! The read loop is blocking I/O and runs on the blocking thread pool.

use benchtap_core::{DataBits, Degraded, Parity, SerialCaptureConfig, StopBits, TextEncoding};
use std::fs::File;
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Size of one device read
const READ_CHUNK: usize = 4096;

/// How long `stop` waits for the capture loop to close the device
const JOIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Pause after a zero-length read so a closed source does not spin
const IDLE_BACKOFF: Duration = Duration::from_millis(10);

const CHANNEL: &str = "uart";

/// Lifecycle of a tap
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TapState {
    Idle,
    Capturing,
    Stopped,
}

/// Background capture of one serial device
pub struct SerialTap {
    config: SerialCaptureConfig,
    log_path: PathBuf,
    state: TapState,
    bytes_captured: Arc<AtomicU64>,
    error: Arc<Mutex<Option<String>>>,
    cancel: CancellationToken,
    worker: Option<JoinHandle<()>>,
}

impl SerialTap {
    pub fn new(config: SerialCaptureConfig, log_path: impl Into<PathBuf>) -> Self {
        Self {
            config,
            log_path: log_path.into(),
            state: TapState::Idle,
            bytes_captured: Arc::new(AtomicU64::new(0)),
            error: Arc::new(Mutex::new(None)),
            cancel: CancellationToken::new(),
            worker: None,
        }
    }

    /// Opens the device and starts capturing
    ///
    /// On failure the tap stays idle and [`error`](Self::error) holds the
    /// diagnostic.
    pub fn start(&mut self, on_chunk: UnboundedSender<Vec<u8>>) -> Result<(), Degraded> {
        self.ensure_idle()?;
        let port = match open_port(&self.config) {
            Ok(port) => port,
            Err(e) => return Err(self.fail(format!("open serial failed: {}", e))),
        };
        info!(
            "Serial capture opened {} at {} baud",
            self.config.device, self.config.baud_rate
        );
        self.start_with_reader(port, on_chunk)
    }

    /// Starts capturing from an already open byte source
    pub fn start_with_reader<R>(
        &mut self,
        reader: R,
        on_chunk: UnboundedSender<Vec<u8>>,
    ) -> Result<(), Degraded>
    where
        R: Read + Send + 'static,
    {
        self.ensure_idle()?;
        let file = match File::create(&self.log_path) {
            Ok(file) => file,
            Err(e) => {
                return Err(self.fail(format!(
                    "cannot create {}: {}",
                    self.log_path.display(),
                    e
                )));
            }
        };

        let capture = CaptureLoop {
            reader,
            file,
            cancel: self.cancel.clone(),
            bytes_captured: Arc::clone(&self.bytes_captured),
            error: Arc::clone(&self.error),
            on_chunk,
        };
        self.worker = Some(tokio::task::spawn_blocking(move || capture.run()));
        self.state = TapState::Capturing;
        Ok(())
    }

    /// Keeps capturing for `linger`, then stops the loop and waits for it
    pub async fn stop(&mut self, linger: Duration) {
        if self.state == TapState::Capturing && !linger.is_zero() {
            tokio::time::sleep(linger).await;
        }
        self.cancel.cancel();

        if let Some(worker) = self.worker.take() {
            match tokio::time::timeout(JOIN_TIMEOUT, worker).await {
                Ok(Ok(())) => debug!("Serial capture of {} stopped", self.config.device),
                Ok(Err(e)) => warn!("Serial capture of {} panicked: {}", self.config.device, e),
                Err(_) => warn!(
                    "Serial capture of {} did not stop within {:?}",
                    self.config.device, JOIN_TIMEOUT
                ),
            }
        }
        self.state = TapState::Stopped;
    }

    pub fn state(&self) -> TapState {
        self.state
    }

    pub fn bytes_captured(&self) -> u64 {
        self.bytes_captured.load(Ordering::Relaxed)
    }

    /// Last open or read failure, if any
    pub fn error(&self) -> Option<String> {
        self.error.lock().ok().and_then(|guard| guard.clone())
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    pub fn config(&self) -> &SerialCaptureConfig {
        &self.config
    }

    /// Decoded prefix of the captured file; `None` if it cannot be read
    pub fn preview_text(&self, max_bytes: usize, encoding: TextEncoding) -> Option<String> {
        let file = File::open(&self.log_path).ok()?;
        let mut data = Vec::new();
        file.take(max_bytes as u64).read_to_end(&mut data).ok()?;
        Some(encoding.decode_lossy(&data))
    }

    fn ensure_idle(&self) -> Result<(), Degraded> {
        match self.state {
            TapState::Idle => Ok(()),
            state => Err(Degraded::new(
                CHANNEL,
                format!("serial tap is not idle ({:?})", state),
            )),
        }
    }

    fn fail(&self, reason: String) -> Degraded {
        warn!("Serial capture of {} unavailable: {}", self.config.device, reason);
        record_error(&self.error, reason.clone());
        Degraded::new(CHANNEL, reason)
    }
}

impl Drop for SerialTap {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

struct CaptureLoop<R> {
    reader: R,
    file: File,
    cancel: CancellationToken,
    bytes_captured: Arc<AtomicU64>,
    error: Arc<Mutex<Option<String>>>,
    on_chunk: UnboundedSender<Vec<u8>>,
}

impl<R: Read> CaptureLoop<R> {
    fn run(mut self) {
        let mut buf = [0u8; READ_CHUNK];
        while !self.cancel.is_cancelled() {
            match self.reader.read(&mut buf) {
                Ok(0) => std::thread::sleep(IDLE_BACKOFF),
                Ok(n) => {
                    let chunk = &buf[..n];
                    if let Err(e) = self.file.write_all(chunk).and_then(|_| self.file.flush()) {
                        record_error(&self.error, format!("write error: {}", e));
                        break;
                    }
                    self.bytes_captured.fetch_add(n as u64, Ordering::Relaxed);
                    let _ = self.on_chunk.send(chunk.to_vec());
                }
                Err(e)
                    if matches!(
                        e.kind(),
                        ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted
                    ) => {}
                Err(e) => {
                    record_error(&self.error, format!("read error: {}", e));
                    break;
                }
            }
        }
    }
}

fn record_error(slot: &Mutex<Option<String>>, reason: String) {
    if let Ok(mut guard) = slot.lock() {
        *guard = Some(reason);
    }
}

fn open_port(config: &SerialCaptureConfig) -> serialport::Result<Box<dyn serialport::SerialPort>> {
    let data_bits = match config.data_bits {
        DataBits::Five => serialport::DataBits::Five,
        DataBits::Six => serialport::DataBits::Six,
        DataBits::Seven => serialport::DataBits::Seven,
        DataBits::Eight => serialport::DataBits::Eight,
    };
    let parity = match config.parity {
        Parity::None => serialport::Parity::None,
        Parity::Odd => serialport::Parity::Odd,
        Parity::Even => serialport::Parity::Even,
    };
    let stop_bits = match config.stop_bits {
        StopBits::One => serialport::StopBits::One,
        StopBits::Two => serialport::StopBits::Two,
    };

    serialport::new(&config.device, config.baud_rate)
        .data_bits(data_bits)
        .parity(parity)
        .stop_bits(stop_bits)
        .flow_control(serialport::FlowControl::None)
        .timeout(config.read_timeout)
        .open()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tokio::sync::mpsc;

    struct BrokenReader;

    impl Read for BrokenReader {
        fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
            Err(std::io::Error::new(ErrorKind::Other, "device unplugged"))
        }
    }

    #[tokio::test]
    async fn test_open_failure_leaves_tap_idle() {
        let dir = tempfile::tempdir().unwrap();
        let mut tap = SerialTap::new(
            SerialCaptureConfig::new("/dev/benchtap-no-such-tty"),
            dir.path().join("uart.log"),
        );
        let (tx, _rx) = mpsc::unbounded_channel();

        let err = tap.start(tx).unwrap_err();
        assert_eq!(err.channel, "uart");
        assert!(err.reason.starts_with("open serial failed"));
        assert_eq!(tap.state(), TapState::Idle);
        assert!(tap.error().is_some());
    }

    #[tokio::test]
    async fn test_capture_writes_file_and_forwards_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let mut tap = SerialTap::new(
            SerialCaptureConfig::new("/dev/null"),
            dir.path().join("uart.log"),
        );
        let (tx, mut rx) = mpsc::unbounded_channel();

        tap.start_with_reader(Cursor::new(b"U-Boot 2024.01\nready\n".to_vec()), tx)
            .unwrap();
        assert_eq!(tap.state(), TapState::Capturing);

        tap.stop(Duration::from_millis(50)).await;
        assert_eq!(tap.state(), TapState::Stopped);
        assert_eq!(tap.bytes_captured(), 21);
        assert!(tap.error().is_none());

        let mut forwarded = Vec::new();
        while let Some(chunk) = rx.recv().await {
            forwarded.extend(chunk);
        }
        assert_eq!(forwarded, b"U-Boot 2024.01\nready\n");
        assert_eq!(
            std::fs::read(dir.path().join("uart.log")).unwrap(),
            b"U-Boot 2024.01\nready\n"
        );
        assert_eq!(
            tap.preview_text(6, TextEncoding::Utf8).as_deref(),
            Some("U-Boot")
        );
    }

    #[tokio::test]
    async fn test_read_error_ends_capture() {
        let dir = tempfile::tempdir().unwrap();
        let mut tap = SerialTap::new(
            SerialCaptureConfig::new("/dev/null"),
            dir.path().join("uart.log"),
        );
        let (tx, _rx) = mpsc::unbounded_channel();

        tap.start_with_reader(BrokenReader, tx).unwrap();
        tap.stop(Duration::ZERO).await;
        assert!(tap.error().unwrap().contains("device unplugged"));
        assert_eq!(tap.bytes_captured(), 0);
    }

    #[tokio::test]
    async fn test_cannot_restart_stopped_tap() {
        let dir = tempfile::tempdir().unwrap();
        let mut tap = SerialTap::new(
            SerialCaptureConfig::new("/dev/null"),
            dir.path().join("uart.log"),
        );
        let (tx, _rx) = mpsc::unbounded_channel();
        tap.start_with_reader(Cursor::new(Vec::new()), tx.clone()).unwrap();
        tap.stop(Duration::ZERO).await;

        assert!(tap.start_with_reader(Cursor::new(Vec::new()), tx).is_err());
    }

    #[test]
    fn test_preview_of_missing_file_is_none() {
        let tap = SerialTap::new(
            SerialCaptureConfig::new("/dev/null"),
            "/nonexistent/benchtap/uart.log",
        );
        assert!(tap.preview_text(100, TextEncoding::Utf8).is_none());
    }
}
