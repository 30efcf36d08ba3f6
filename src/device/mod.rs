pub mod codec;
pub mod transport;

pub use codec::{decode_response, encode_query, Reading, StatusFrame};
pub use transport::{SerialTransport, Transport};

use crate::error::AcquireError;
use codec::{RESPONSE_READ_LEN, TRAILING_READS};
use tracing::trace;

/// The charge controller behind a transport: one call is one QPIGS exchange.
pub struct Device<T> {
    transport: T,
}

impl<T: Transport> Device<T> {
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    /// Send the query, read the response plus the two trailing bytes the
    /// device always emits, and decode.
    pub async fn poll(&mut self) -> Result<StatusFrame, AcquireError> {
        let raw = self.exchange().await?;
        Ok(decode_response(&raw)?)
    }

    /// Raw response bytes, trailing bytes already discarded.
    pub async fn exchange(&mut self) -> Result<Vec<u8>, AcquireError> {
        self.transport.write(encode_query()).await?;
        let raw = self.transport.read(RESPONSE_READ_LEN).await?;
        for _ in 0..TRAILING_READS {
            self.transport.read(1).await?;
        }
        trace!(len = raw.len(), "device response");
        Ok(raw)
    }

    pub fn into_inner(self) -> T {
        self.transport
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FrameError;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::io;

    /// Replays canned responses; records every write and read size.
    #[derive(Default)]
    struct CannedTransport {
        responses: VecDeque<Vec<u8>>,
        pending: Vec<u8>,
        writes: Vec<Vec<u8>>,
        reads: Vec<usize>,
    }

    #[async_trait]
    impl Transport for CannedTransport {
        async fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
            self.writes.push(bytes.to_vec());
            self.pending = self.responses.pop_front().unwrap_or_default();
            Ok(())
        }

        async fn read(&mut self, n: usize) -> io::Result<Vec<u8>> {
            self.reads.push(n);
            let take = n.min(self.pending.len());
            Ok(self.pending.drain(..take).collect())
        }
    }

    #[tokio::test]
    async fn test_poll_reads_frame_then_two_trailing_bytes() {
        let mut transport = CannedTransport::default();
        transport
            .responses
            .push_back(b"(032.3 24.02 00.10 00.00 00.10 0045 +023\xB7\xA9".to_vec());
        let mut device = Device::new(transport);

        let status = device.poll().await.unwrap();
        assert_eq!(status.charging_power, 45.0);

        let transport = device.into_inner();
        assert_eq!(transport.writes, vec![encode_query().to_vec()]);
        assert_eq!(transport.reads, vec![RESPONSE_READ_LEN, 1, 1]);
    }

    #[tokio::test]
    async fn test_poll_reports_truncated_response() {
        let mut transport = CannedTransport::default();
        transport.responses.push_back(b"(032.3 24.0".to_vec());
        let mut device = Device::new(transport);

        match device.poll().await {
            Err(AcquireError::Frame(FrameError::TooShort { len, .. })) => assert_eq!(len, 11),
            other => panic!("expected TooShort, got {:?}", other),
        }
    }
}
