use async_trait::async_trait;
use std::io;
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Pre-encoded stop request handed down by the packet layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StopMessage {
    pub length: Vec<u8>,
    pub body: Vec<u8>,
}

impl StopMessage {
    pub fn new(length: Vec<u8>, body: Vec<u8>) -> Self {
        Self { length, body }
    }
}

/// The manager-side connection to a worker: buffered writes plus an
/// explicit flush.
#[async_trait]
pub trait ControlConnection: Send {
    fn write(&mut self, bytes: &[u8]);

    async fn drain(&mut self) -> io::Result<()>;
}

/// [`ControlConnection`] over any tokio writer.
pub struct StreamConnection<W> {
    writer: W,
    pending: Vec<u8>,
}

impl<W> StreamConnection<W>
where
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            pending: Vec::new(),
        }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

#[async_trait]
impl<W> ControlConnection for StreamConnection<W>
where
    W: AsyncWrite + Unpin + Send,
{
    fn write(&mut self, bytes: &[u8]) {
        self.pending.extend_from_slice(bytes);
    }

    async fn drain(&mut self) -> io::Result<()> {
        let pending = std::mem::take(&mut self.pending);
        self.writer.write_all(&pending).await?;
        self.writer.flush().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn writes_are_buffered_until_drain() {
        let mut conn = StreamConnection::new(Vec::new());
        conn.write(&[2, 0]);
        conn.write(b"ok");
        assert!(conn.writer.is_empty());

        conn.drain().await.unwrap();
        assert_eq!(conn.into_inner(), vec![2, 0, b'o', b'k']);
    }
}
