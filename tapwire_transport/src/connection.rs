use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use log::debug;
use tapwire_core::error::{CoreError, CoreErrorKind};
use tapwire_core::item::Item;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{Framed, LengthDelimitedCodec};

/// Width of the big-endian length prefix in front of every frame.
pub const LENGTH_FIELD_LEN: usize = 2;
pub const MAX_FRAME_SIZE: usize = u16::MAX as usize;

pub fn frame_codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .length_field_length(LENGTH_FIELD_LEN)
        .big_endian()
        .max_frame_length(MAX_FRAME_SIZE)
        .new_codec()
}

/// A framed byte stream owned by a single task.
///
/// After a read or write failure the stream is dropped and every further call
/// answers `ConnectionReset`.
pub struct Connection<S> {
    framed: Option<Framed<S, LengthDelimitedCodec>>,
    peer: String,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S, peer: impl ToString) -> Self {
        Self {
            framed: Some(Framed::new(stream, frame_codec())),
            peer: peer.to_string(),
        }
    }

    pub fn peer(&self) -> &str {
        self.peer.as_str()
    }

    pub fn is_reset(&self) -> bool {
        self.framed.is_none()
    }

    pub fn reset(&mut self) {
        if self.framed.take().is_some() {
            debug!("Connection to {} reset", self.peer);
        }
    }

    fn reset_error(&self) -> CoreError {
        CoreError::new(CoreErrorKind::ConnectionReset, self.peer.as_str())
    }

    /// Writes the length prefix and the payload of `item`, then flushes.
    ///
    /// Payloads above `MAX_FRAME_SIZE` are refused with `FrameTooLarge` before
    /// anything is written, leaving the connection usable.
    pub async fn send_item(&mut self, item: &Item) -> Result<(), CoreError> {
        self.send_frame(item.payload().clone()).await
    }

    pub async fn send_frame(&mut self, payload: Bytes) -> Result<(), CoreError> {
        if payload.len() > MAX_FRAME_SIZE {
            return Err(CoreError::new(
                CoreErrorKind::FrameTooLarge,
                &format!("{} bytes exceed {MAX_FRAME_SIZE}", payload.len()),
            ));
        }
        let Some(framed) = self.framed.as_mut() else {
            return Err(self.reset_error());
        };
        if let Err(e) = framed.send(payload).await {
            self.reset();
            return Err(CoreError::new(
                CoreErrorKind::WriteError,
                &format!("{}: {e}", self.peer),
            ));
        }
        Ok(())
    }

    /// Next item from the peer, `None` once the peer closed the stream cleanly.
    pub async fn receive_item(&mut self) -> Result<Option<Item>, CoreError> {
        Ok(self.receive_frame().await?.map(Item::from_wire))
    }

    pub async fn receive_frame(&mut self) -> Result<Option<Bytes>, CoreError> {
        let Some(framed) = self.framed.as_mut() else {
            return Err(self.reset_error());
        };
        match framed.next().await {
            Some(Ok(frame)) => Ok(Some(frame.freeze())),
            Some(Err(e)) => {
                self.reset();
                Err(CoreError::new(
                    CoreErrorKind::ReadError,
                    &format!("{}: {e}", self.peer),
                ))
            }
            None => {
                self.reset();
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt, duplex};

    #[tokio::test]
    async fn frames_carry_big_endian_length() {
        let (local, mut remote) = duplex(1024);
        let mut connection = Connection::new(local, "remote");
        connection.send_item(&Item::raw("x", "TD2")).await.unwrap();

        let mut buffer = [0u8; 5];
        remote.read_exact(&mut buffer).await.unwrap();
        assert_eq!(buffer, [0x00, 0x03, b'T', b'D', b'2']);
    }

    #[tokio::test]
    async fn partial_frames_are_accumulated() {
        let (local, mut remote) = duplex(1024);
        let mut connection = Connection::new(local, "remote");
        let writer = tokio::spawn(async move {
            for chunk in [&[0x00u8][..], &[0x04, b'a'], &[b'b', b'c'], &[b'd']] {
                remote.write_all(chunk).await.unwrap();
                remote.flush().await.unwrap();
                tokio::task::yield_now().await;
            }
            remote
        });
        let item = connection.receive_item().await.unwrap().unwrap();
        assert_eq!(&item.payload()[..], b"abcd");
        drop(writer.await.unwrap());
        assert!(connection.receive_item().await.unwrap().is_none());
        assert!(connection.is_reset());
    }

    #[tokio::test]
    async fn truncated_frame_is_a_read_error() {
        let (local, mut remote) = duplex(1024);
        let mut connection = Connection::new(local, "remote");
        remote.write_all(&[0x00, 0x08, 1, 2, 3]).await.unwrap();
        drop(remote);
        let error = connection.receive_item().await.unwrap_err();
        assert_eq!(error.kind(), CoreErrorKind::ReadError);
        let error = connection.receive_item().await.unwrap_err();
        assert_eq!(error.kind(), CoreErrorKind::ConnectionReset);
    }

    #[tokio::test]
    async fn write_failure_resets_the_connection() {
        let (local, remote) = duplex(64);
        let mut connection = Connection::new(local, "remote");
        drop(remote);

        let error = connection.send_item(&Item::raw("x", vec![7u8; 10])).await.unwrap_err();
        assert_eq!(error.kind(), CoreErrorKind::WriteError);
        assert!(connection.is_reset());

        let error = connection.send_item(&Item::raw("x", vec![7u8; 10])).await.unwrap_err();
        assert_eq!(error.kind(), CoreErrorKind::ConnectionReset);
    }

    #[tokio::test]
    async fn oversized_frame_leaves_connection_usable() {
        let (local, mut remote) = duplex(1024);
        let mut connection = Connection::new(local, "remote");
        let error = connection
            .send_item(&Item::raw("x", vec![0u8; MAX_FRAME_SIZE + 1]))
            .await
            .unwrap_err();
        assert_eq!(error.kind(), CoreErrorKind::FrameTooLarge);
        assert!(!connection.is_reset());

        connection.send_item(&Item::raw("x", "ok")).await.unwrap();
        let mut buffer = [0u8; 4];
        remote.read_exact(&mut buffer).await.unwrap();
        assert_eq!(&buffer[2..], b"ok");
    }
}
