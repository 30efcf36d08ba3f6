use crate::config::SerialConfig;
use crate::error::AppError;
use async_trait::async_trait;
use std::io;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::{timeout_at, Instant};
use tokio_serial::{DataBits, Parity, SerialPortBuilderExt, SerialStream, StopBits};
use tracing::{debug, info};

/// Duplex byte channel to the charge controller.
#[async_trait]
pub trait Transport: Send {
    async fn write(&mut self, bytes: &[u8]) -> io::Result<()>;

    /// Read up to `n` bytes. Returns fewer once the read timeout expires
    /// rather than blocking indefinitely.
    async fn read(&mut self, n: usize) -> io::Result<Vec<u8>>;
}

pub struct SerialTransport {
    stream: SerialStream,
    timeout: Duration,
}

impl SerialTransport {
    /// Open the port 8N1 at the configured baud rate.
    pub fn open(cfg: &SerialConfig) -> Result<Self, AppError> {
        let stream = tokio_serial::new(&cfg.port, cfg.baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .timeout(cfg.timeout())
            .open_native_async()?;

        info!(
            port = %cfg.port,
            baud = cfg.baud_rate,
            timeout_ms = cfg.timeout_ms,
            "serial port opened"
        );

        Ok(Self {
            stream,
            timeout: cfg.timeout(),
        })
    }
}

#[async_trait]
impl Transport for SerialTransport {
    async fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.stream.write_all(bytes).await?;
        self.stream.flush().await
    }

    async fn read(&mut self, n: usize) -> io::Result<Vec<u8>> {
        let deadline = Instant::now() + self.timeout;
        let mut buf = vec![0u8; n];
        let mut filled = 0;

        while filled < n {
            match timeout_at(deadline, self.stream.read(&mut buf[filled..])).await {
                Ok(Ok(0)) => break,
                Ok(Ok(count)) => filled += count,
                Ok(Err(e)) => return Err(e),
                Err(_) => {
                    debug!(requested = n, received = filled, "serial read timed out");
                    break;
                }
            }
        }

        buf.truncate(filled);
        Ok(buf)
    }
}
