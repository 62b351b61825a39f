//! Cascaded forward injection into each discovered session layer.
//!
//! Hops are numbered from the operator outward: hop `depth` is the session
//! nearest the final destination, hop 1 the one nearest the operator's
//! shell. To reach hop `h`'s command line, exactly `h` escape bytes are
//! written followed by the command letter: each layer above hop `h`
//! strips one escape byte from the run, so only the `h`-th layer sees the
//! full `escape + command` pair.
//!
//! Hops are visited strictly top-down. The first hop is preceded by a bare
//! carriage return so the outermost session's escape recognition is armed
//! (its parser only accepts the escape character at the start of a line);
//! every directive ends in `\r`, which re-arms it for the next hop.

use std::time::Duration;

use memchr::memmem;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::channel::Channel;
use crate::error::Error;
use crate::forward::ForwardPlan;

/// Banner printed by a session when its command line opens.
const PROMPT_PATTERN: &[u8] = b"ssh>";

/// How much banner output to accumulate before giving up the search.
const BANNER_MAX: usize = 1024;

/// Inject the plan's directives into `depth` nested sessions, outermost
/// first.
///
/// Everything the sessions print while we wait for their banners is
/// relayed to `display` so the operator can see what is happening. A
/// missing banner aborts the remaining hops with
/// [`Error::PromptTimeout`]; the operator is told which hop failed and can
/// re-run the command.
pub async fn cascade<C, W>(
    channel: &mut C,
    display: &mut W,
    plan: &ForwardPlan,
    depth: usize,
    escape: u8,
    command: u8,
    prompt_timeout: Duration,
) -> Result<(), Error>
where
    C: Channel,
    W: AsyncWrite + Unpin,
{
    for hop in (1..=depth).rev() {
        if hop == depth {
            channel.send(b"\r").await?;
        }
        for _ in 0..hop {
            channel.send(&[escape]).await?;
        }
        channel.send(&[command]).await?;

        if !wait_for_prompt(channel, display, prompt_timeout).await? {
            return Err(Error::PromptTimeout { hop });
        }

        let directive = plan.directive_for(hop, depth);
        tracing::debug!(hop, directive = directive.trim_end(), "submitting forward");
        channel.send(directive.as_bytes()).await?;

        drain_reply(channel, display, prompt_timeout).await?;
    }
    Ok(())
}

/// Wait for the `ssh>` banner, relaying received bytes to the display.
///
/// Returns `Ok(false)` when the per-read timeout expires or the
/// accumulation cap fills without a match.
async fn wait_for_prompt<C, W>(
    channel: &mut C,
    display: &mut W,
    timeout: Duration,
) -> Result<bool, Error>
where
    C: Channel,
    W: AsyncWrite + Unpin,
{
    let mut seen = Vec::with_capacity(256);
    let mut buf = [0u8; 1024];
    while seen.len() < BANNER_MAX {
        let Some(n) = channel.recv(&mut buf, timeout).await? else {
            return Ok(false);
        };
        display.write_all(&buf[..n]).await?;
        display.flush().await?;
        seen.extend_from_slice(&buf[..n]);
        if memmem::find(&seen, PROMPT_PATTERN).is_some() {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Best-effort drain of whatever a session prints after accepting a
/// directive, capped at [`BANNER_MAX`] bytes so a continuously printing
/// session cannot hold the suspended relay. A timeout is the normal exit;
/// only a closed channel is propagated.
async fn drain_reply<C, W>(channel: &mut C, display: &mut W, timeout: Duration) -> Result<(), Error>
where
    C: Channel,
    W: AsyncWrite + Unpin,
{
    let mut buf = [0u8; 1024];
    let mut drained = 0usize;
    while drained < BANNER_MAX {
        match channel.recv(&mut buf, timeout).await {
            Ok(Some(n)) => {
                display.write_all(&buf[..n]).await?;
                display.flush().await?;
                drained += n;
            }
            Ok(None) => return Ok(()),
            Err(Error::ChannelClosed) => return Err(Error::ChannelClosed),
            Err(e) => {
                tracing::warn!("discarding reply failed: {e}");
                return Ok(());
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::testing::{Reply, ScriptedChannel};
    use crate::forward::ForwardRequest;

    const TIMEOUT: Duration = Duration::from_millis(10);

    fn plan() -> ForwardPlan {
        ForwardRequest::parse("L8080:example.com:80").unwrap().compile()
    }

    fn banner() -> Reply {
        Reply::Data(b"\r\nssh> ".to_vec())
    }

    #[tokio::test]
    async fn single_hop_resubmits_original_line() {
        let mut channel = ScriptedChannel::new(vec![banner(), Reply::Timeout]);
        let mut display = Vec::new();
        cascade(&mut channel, &mut display, &plan(), 1, b'~', b'C', TIMEOUT)
            .await
            .unwrap();

        let sends: Vec<&[u8]> = channel.sent.iter().map(Vec::as_slice).collect();
        assert_eq!(
            sends,
            vec![
                b"\r".as_slice(),
                b"~".as_slice(),
                b"C".as_slice(),
                b"L8080:example.com:80\r".as_slice(),
            ]
        );
        // The banner was relayed to the operator's display.
        assert_eq!(display, b"\r\nssh> ");
    }

    #[tokio::test]
    async fn three_hops_descend_with_role_directives() {
        let mut channel = ScriptedChannel::new(vec![
            banner(),
            Reply::Timeout,
            banner(),
            Reply::Timeout,
            banner(),
            Reply::Timeout,
        ]);
        let mut display = Vec::new();
        let plan = plan();
        cascade(&mut channel, &mut display, &plan, 3, b'~', b'C', TIMEOUT)
            .await
            .unwrap();

        let mut expected: Vec<Vec<u8>> = vec![b"\r".to_vec()];
        expected.extend(vec![b"~".to_vec(); 3]);
        expected.push(b"C".to_vec());
        expected.push(plan.outermost.clone().into_bytes());
        expected.extend(vec![b"~".to_vec(); 2]);
        expected.push(b"C".to_vec());
        expected.push(plan.relay.clone().into_bytes());
        expected.push(b"~".to_vec());
        expected.push(b"C".to_vec());
        expected.push(plan.innermost.clone().into_bytes());
        assert_eq!(channel.sent, expected);
    }

    #[tokio::test]
    async fn banner_split_across_reads_still_matches() {
        let mut channel = ScriptedChannel::new(vec![
            Reply::Data(b"\r\nss".to_vec()),
            Reply::Data(b"h> ".to_vec()),
            Reply::Timeout,
        ]);
        let mut display = Vec::new();
        cascade(&mut channel, &mut display, &plan(), 1, b'~', b'C', TIMEOUT)
            .await
            .unwrap();
        assert_eq!(display, b"\r\nssh> ");
    }

    #[tokio::test]
    async fn reply_drain_is_bounded() {
        // A session that never stops printing after the directive. The
        // drain must give up once it has relayed BANNER_MAX bytes.
        let mut replies = vec![banner()];
        for _ in 0..4 {
            replies.push(Reply::Data(vec![b'.'; 1024]));
        }
        let mut channel = ScriptedChannel::new(replies);
        let mut display = Vec::new();
        cascade(&mut channel, &mut display, &plan(), 1, b'~', b'C', TIMEOUT)
            .await
            .unwrap();

        // One full read reaches the cap; the rest of the script is unread.
        assert_eq!(display.len(), b"\r\nssh> ".len() + 1024);
        assert_eq!(channel.replies.len(), 3);
    }

    #[tokio::test]
    async fn missing_banner_aborts_remaining_hops() {
        // Hop 2 answers, hop 1 never shows its prompt.
        let mut channel = ScriptedChannel::new(vec![banner(), Reply::Timeout, Reply::Timeout]);
        let mut display = Vec::new();
        let plan = plan();
        let err = cascade(&mut channel, &mut display, &plan, 2, b'~', b'C', TIMEOUT)
            .await
            .unwrap_err();
        match err {
            Error::PromptTimeout { hop: 1 } => {}
            other => panic!("expected PromptTimeout at hop 1, got {other:?}"),
        }
        // The outermost directive went out; the innermost never did.
        let sent = channel.sent_bytes();
        assert!(memmem::find(&sent, plan.outermost.as_bytes()).is_some());
        assert!(memmem::find(&sent, plan.innermost.as_bytes()).is_none());
    }
}
