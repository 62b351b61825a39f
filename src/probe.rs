//! Nested-session depth measurement.
//!
//! No layer will report its own existence, so the probe exploits how the
//! layers handle their escape character: when a contiguous run of escape
//! bytes is written into the channel, each nested interactive session
//! consumes exactly one byte of the run before passing the remainder
//! inward. The innermost shell echoes whatever survives. Sending
//! `max_depth` escape bytes and counting the echo therefore yields
//!
//! ```text
//! nested sessions = sent − received
//! ```
//!
//! That consumption behavior is a property of the environment, not of this
//! program; when it is violated (more bytes come back than were sent) the
//! cycle reports [`Error::ProbeInconsistency`] instead of guessing.
//!
//! The result is only meaningful immediately after the cycle, before any
//! other writer touches the channel.

use std::time::Duration;

use crate::channel::Channel;
use crate::error::Error;

/// Probe cycle state. Transient, lives for one cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProbeState {
    SendingProbe,
    AwaitingEcho,
    SendingClear,
    Done,
}

/// Run one probe cycle and return the number of nested sessions.
///
/// Sends `max_depth` escape bytes one at a time, accumulates the echo for
/// up to `echo_timeout` per read, then writes one NUL per assumed layer to
/// flush each layer's escape parser back to its normal input state.
pub async fn measure_depth<C: Channel>(
    channel: &mut C,
    escape: u8,
    max_depth: usize,
    echo_timeout: Duration,
) -> Result<usize, Error> {
    let mut state = ProbeState::SendingProbe;
    let mut sent = 0usize;
    let mut received = 0usize;
    let mut cleared = 0usize;
    let mut buf = [0u8; 1024];

    while state != ProbeState::Done {
        match state {
            ProbeState::SendingProbe => {
                channel.send(&[escape]).await?;
                sent += 1;
                if sent == max_depth {
                    state = ProbeState::AwaitingEcho;
                }
            }
            ProbeState::AwaitingEcho => match channel.recv(&mut buf, echo_timeout).await? {
                // XXX counts every byte that comes back, not actual escape
                // characters. Only correct when nothing else is writing to
                // the session during the cycle.
                Some(n) => received += n,
                None => state = ProbeState::SendingClear,
            },
            ProbeState::SendingClear => {
                channel.send(&[0u8]).await?;
                cleared += 1;
                if cleared == max_depth {
                    state = ProbeState::Done;
                }
            }
            ProbeState::Done => unreachable!(),
        }
    }

    if received > sent {
        return Err(Error::ProbeInconsistency { sent, received });
    }
    Ok(sent - received)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::testing::{Reply, ScriptedChannel};

    const TIMEOUT: Duration = Duration::from_millis(10);

    async fn run(channel: &mut ScriptedChannel) -> Result<usize, Error> {
        measure_depth(channel, b'~', 6, TIMEOUT).await
    }

    #[tokio::test]
    async fn probe_and_clear_bytes_on_the_wire() {
        let mut channel = ScriptedChannel::new(vec![Reply::Timeout]);
        // Nothing echoed back: all six probes were consumed.
        assert_eq!(run(&mut channel).await.unwrap(), 6);
        // Six escape bytes then six clear bytes, one write each.
        assert_eq!(channel.sent.len(), 12);
        assert_eq!(channel.sent_bytes(), b"~~~~~~\0\0\0\0\0\0");
    }

    #[tokio::test]
    async fn echoed_bytes_reduce_depth() {
        let mut channel =
            ScriptedChannel::new(vec![Reply::Data(b"~~~~".to_vec()), Reply::Timeout]);
        assert_eq!(run(&mut channel).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn echo_split_across_reads_accumulates() {
        let mut channel = ScriptedChannel::new(vec![
            Reply::Data(b"~~~".to_vec()),
            Reply::Data(b"~~~".to_vec()),
            Reply::Timeout,
        ]);
        assert_eq!(run(&mut channel).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn excess_echo_is_inconsistent() {
        let mut channel =
            ScriptedChannel::new(vec![Reply::Data(vec![b'~'; 9]), Reply::Timeout]);
        match run(&mut channel).await {
            Err(Error::ProbeInconsistency { sent: 6, received: 9 }) => {}
            other => panic!("expected ProbeInconsistency, got {other:?}"),
        }
    }
}
