//! The duplex byte channel to the wrapped shell.
//!
//! [`PtyChannel`] owns read and write handles dup'd from the PTY master fd,
//! wrapped in `tokio::fs::File` for async I/O. The relay, the depth probe,
//! and the cascade injector all talk to the shell through it, never
//! concurrently: the relay loop is suspended for the whole duration of
//! command-prompt handling.
//!
//! The [`Channel`] trait exists so the probe and injector can be exercised
//! against a scripted channel in tests.

use std::io;
use std::os::fd::OwnedFd;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::error::Error;

/// A bidirectional byte stream with full writes and timeout-guarded reads.
#[allow(async_fn_in_trait)]
pub trait Channel {
    /// Write all of `data` to the channel.
    async fn send(&mut self, data: &[u8]) -> Result<(), Error>;

    /// Read whatever is available within `timeout`.
    ///
    /// `Ok(None)` means the timeout expired with nothing pending; that is
    /// how callers detect "nothing more is coming", not an error.
    /// `Err(ChannelClosed)` means EOF or a dead PTY.
    async fn recv(&mut self, buf: &mut [u8], timeout: Duration) -> Result<Option<usize>, Error>;
}

/// The real channel over the PTY master.
pub struct PtyChannel {
    reader: tokio::fs::File,
    writer: tokio::fs::File,
}

impl PtyChannel {
    /// Dup the master fd into independent read and write handles. The
    /// original fd stays with the caller for resize ioctls.
    pub fn new(master: &OwnedFd) -> io::Result<Self> {
        let reader = master.try_clone()?;
        let writer = master.try_clone()?;
        Ok(Self {
            reader: tokio::fs::File::from_std(std::fs::File::from(reader)),
            writer: tokio::fs::File::from_std(std::fs::File::from(writer)),
        })
    }

    /// Read without a timeout, for the relay loop's pass-through arm.
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
        match self.reader.read(buf).await {
            Ok(0) => Err(Error::ChannelClosed),
            Ok(n) => Ok(n),
            // A PTY master reports EIO once the slave side is gone.
            Err(e) => {
                tracing::debug!("PTY read failed: {e}");
                Err(Error::ChannelClosed)
            }
        }
    }
}

impl Channel for PtyChannel {
    async fn send(&mut self, data: &[u8]) -> Result<(), Error> {
        match self.writer.write_all(data).await {
            Ok(()) => {
                self.writer.flush().await?;
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::WriteZero || e.kind() == io::ErrorKind::BrokenPipe => {
                Err(Error::ChannelClosed)
            }
            Err(e) => Err(Error::Io(e)),
        }
    }

    async fn recv(&mut self, buf: &mut [u8], timeout: Duration) -> Result<Option<usize>, Error> {
        match tokio::time::timeout(timeout, self.reader.read(buf)).await {
            Err(_) => Ok(None),
            Ok(Ok(0)) => Err(Error::ChannelClosed),
            Ok(Ok(n)) => Ok(Some(n)),
            Ok(Err(e)) => {
                tracing::debug!("PTY read failed: {e}");
                Err(Error::ChannelClosed)
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted channel for probe/injector tests.

    use super::*;
    use std::collections::VecDeque;

    /// One scripted response to a `recv` call.
    pub enum Reply {
        /// Bytes delivered on this read.
        Data(Vec<u8>),
        /// Timeout with nothing pending.
        Timeout,
    }

    /// Records every `send` and pops one scripted [`Reply`] per `recv`.
    /// Once the script is exhausted, every further `recv` times out.
    pub struct ScriptedChannel {
        pub sent: Vec<Vec<u8>>,
        pub replies: VecDeque<Reply>,
    }

    impl ScriptedChannel {
        pub fn new(replies: Vec<Reply>) -> Self {
            Self {
                sent: Vec::new(),
                replies: replies.into(),
            }
        }

        /// Every byte written so far, flattened in order.
        pub fn sent_bytes(&self) -> Vec<u8> {
            self.sent.concat()
        }
    }

    impl Channel for ScriptedChannel {
        async fn send(&mut self, data: &[u8]) -> Result<(), Error> {
            self.sent.push(data.to_vec());
            Ok(())
        }

        async fn recv(
            &mut self,
            buf: &mut [u8],
            _timeout: Duration,
        ) -> Result<Option<usize>, Error> {
            match self.replies.pop_front() {
                Some(Reply::Data(data)) => {
                    let n = data.len().min(buf.len());
                    buf[..n].copy_from_slice(&data[..n]);
                    Ok(Some(n))
                }
                Some(Reply::Timeout) | None => Ok(None),
            }
        }
    }
}
