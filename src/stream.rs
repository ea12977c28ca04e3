//! Encrypted transport over a framed duplex.
//!
//! After `Split`, each direction owns its CipherState: outbound plaintext
//! is sealed per chunk and framed, inbound frames are unsealed back into
//! the sender's chunks. Chunk boundaries survive the trip.

use std::sync::Arc;

use tokio::io::{AsyncWriteExt, ReadHalf, WriteHalf};
use tracing::{debug, warn};

use crate::cipher::TAG_SIZE;
use crate::error::Error;
use crate::framing::{try_read_frame, write_frame, Duplex, MAX_FRAME_LEN};
use crate::metrics::NoiseMetrics;
use crate::state::CipherState;

/// Largest plaintext sealed into a single record; the 16-byte tag must
/// still fit under the 16-bit length prefix.
pub const MAX_PLAINTEXT_LEN: usize = MAX_FRAME_LEN - TAG_SIZE;

/// Sending half of a secured duplex.
pub struct SecureWriter<W> {
    io: W,
    cipher: CipherState,
    metrics: Option<Arc<NoiseMetrics>>,
}

impl<W: tokio::io::AsyncWrite + Unpin> SecureWriter<W> {
    /// Seals `data` and writes it as one record, or as several in-order
    /// maximum-size records when it exceeds [`MAX_PLAINTEXT_LEN`].
    pub async fn send(&mut self, data: &[u8]) -> Result<(), Error> {
        if data.is_empty() {
            return self.send_record(data).await;
        }
        for chunk in data.chunks(MAX_PLAINTEXT_LEN) {
            self.send_record(chunk).await?;
        }
        Ok(())
    }

    async fn send_record(&mut self, chunk: &[u8]) -> Result<(), Error> {
        let sealed = self.cipher.encrypt_with_ad(&[], chunk)?;
        write_frame(&mut self.io, &sealed).await?;
        if let Some(m) = &self.metrics {
            m.record_encrypted_packet();
        }
        Ok(())
    }

    /// Flushes and shuts down the write direction, signalling end of
    /// stream to the peer.
    pub async fn close(&mut self) -> Result<(), Error> {
        self.io.shutdown().await?;
        Ok(())
    }
}

/// Receiving half of a secured duplex.
pub struct SecureReader<R> {
    io: R,
    cipher: CipherState,
    metrics: Option<Arc<NoiseMetrics>>,
    poisoned: bool,
}

impl<R: tokio::io::AsyncRead + Unpin> SecureReader<R> {
    /// Returns the next plaintext chunk, `None` at clean end of stream.
    ///
    /// A record that fails AEAD verification terminates the read
    /// direction: the failure and every later call return `Decrypt`.
    pub async fn recv(&mut self) -> Result<Option<Vec<u8>>, Error> {
        if self.poisoned {
            return Err(Error::Decrypt);
        }

        let frame = match try_read_frame(&mut self.io).await? {
            Some(frame) => frame,
            None => {
                debug!("secure stream ended");
                return Ok(None);
            }
        };

        match self.cipher.decrypt_with_ad(&[], &frame) {
            Ok(plaintext) => {
                if let Some(m) = &self.metrics {
                    m.record_decrypted_packet();
                }
                Ok(Some(plaintext))
            }
            Err(err) => {
                warn!("record failed decryption, terminating read direction");
                self.poisoned = true;
                if let Some(m) = &self.metrics {
                    m.record_decrypt_error();
                }
                Err(err)
            }
        }
    }
}

/// A full-duplex secured connection.
///
/// The two directions are independent; [`into_split`](Self::into_split)
/// hands each to its own task. Writes from multiple producers must be
/// serialized by the caller.
pub struct SecureStream<T> {
    reader: SecureReader<ReadHalf<T>>,
    writer: SecureWriter<WriteHalf<T>>,
}

impl<T: Duplex> SecureStream<T> {
    pub(crate) fn new(
        io: T,
        send: CipherState,
        recv: CipherState,
        metrics: Option<Arc<NoiseMetrics>>,
    ) -> Self {
        let (read_half, write_half) = tokio::io::split(io);
        Self {
            reader: SecureReader {
                io: read_half,
                cipher: recv,
                metrics: metrics.clone(),
                poisoned: false,
            },
            writer: SecureWriter {
                io: write_half,
                cipher: send,
                metrics,
            },
        }
    }

    /// See [`SecureWriter::send`].
    pub async fn send(&mut self, data: &[u8]) -> Result<(), Error> {
        self.writer.send(data).await
    }

    /// See [`SecureReader::recv`].
    pub async fn recv(&mut self) -> Result<Option<Vec<u8>>, Error> {
        self.reader.recv().await
    }

    /// See [`SecureWriter::close`].
    pub async fn close(&mut self) -> Result<(), Error> {
        self.writer.close().await
    }

    /// Splits into independently owned halves, one per direction.
    pub fn into_split(self) -> (SecureReader<ReadHalf<T>>, SecureWriter<WriteHalf<T>>) {
        (self.reader, self.writer)
    }
}
