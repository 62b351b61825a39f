//! Escape-sequence detection in the operator's keystroke stream.
//!
//! The detector watches the bytes the operator types, before they reach the
//! wrapped shell, for the trigger sequence: line break, then escape
//! character, then command letter. Its state survives across
//! relay iterations, since the three bytes of the sequence normally arrive
//! as three separate reads.
//!
//! Known limitation, preserved deliberately for compatibility: a chunk is
//! scanned only up to the first match, and the relay strips exactly the
//! chunk's *first* byte before forwarding the remainder. One keystroke per
//! chunk (the interactive case) behaves correctly; pasted text containing
//! an escape character mid-chunk does not. A corrected design would track
//! the matched byte offset instead of assuming offset 0.

/// Detector state, persisted across input reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DetectorState {
    Idle,
    SawBreak,
    SawEscape,
}

/// What the relay should do with the chunk that was just scanned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanOutcome {
    /// No escape activity: forward the whole chunk.
    Forward,
    /// The escape character was recognized: withhold the chunk's first
    /// byte, forward the rest.
    StripFirst,
    /// The full trigger sequence completed: open the command prompt, then
    /// withhold the chunk's first byte and forward the rest.
    OpenPrompt,
}

/// Recognizes the `\r ~ C` trigger sequence in operator input.
pub struct EscapeDetector {
    state: DetectorState,
    escape: u8,
    command: u8,
}

impl EscapeDetector {
    pub fn new(escape: u8, command: u8) -> Self {
        Self {
            state: DetectorState::Idle,
            escape,
            command,
        }
    }

    /// Scan one delivered chunk, stopping at the first match.
    pub fn scan(&mut self, chunk: &[u8]) -> ScanOutcome {
        for &b in chunk {
            match self.state {
                DetectorState::SawEscape if b == self.command => {
                    self.state = DetectorState::Idle;
                    return ScanOutcome::OpenPrompt;
                }
                DetectorState::SawBreak if b == self.escape => {
                    self.state = DetectorState::SawEscape;
                    return ScanOutcome::StripFirst;
                }
                _ if b == b'\r' => {
                    self.state = DetectorState::SawBreak;
                }
                _ => {
                    self.state = DetectorState::Idle;
                }
            }
        }
        ScanOutcome::Forward
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detector() -> EscapeDetector {
        EscapeDetector::new(b'~', b'C')
    }

    #[test]
    fn trigger_sequence_fires() {
        let mut d = detector();
        assert_eq!(d.scan(b"\r"), ScanOutcome::Forward);
        assert_eq!(d.scan(b"~"), ScanOutcome::StripFirst);
        assert_eq!(d.scan(b"C"), ScanOutcome::OpenPrompt);
    }

    #[test]
    fn double_escape_resets_without_firing() {
        let mut d = detector();
        assert_eq!(d.scan(b"\r"), ScanOutcome::Forward);
        assert_eq!(d.scan(b"~"), ScanOutcome::StripFirst);
        // A second ~ is not the command letter: back to Idle, forwarded.
        assert_eq!(d.scan(b"~"), ScanOutcome::Forward);
        assert_eq!(d.scan(b"C"), ScanOutcome::Forward);
    }

    #[test]
    fn escape_mid_line_is_ignored() {
        let mut d = detector();
        assert_eq!(d.scan(b"x"), ScanOutcome::Forward);
        assert_eq!(d.scan(b"~"), ScanOutcome::Forward);
        assert_eq!(d.scan(b"C"), ScanOutcome::Forward);
    }

    #[test]
    fn state_survives_chunk_boundaries() {
        let mut d = detector();
        assert_eq!(d.scan(b"echo hi\r"), ScanOutcome::Forward);
        assert_eq!(d.scan(b"~"), ScanOutcome::StripFirst);
        assert_eq!(d.scan(b"C"), ScanOutcome::OpenPrompt);
    }

    #[test]
    fn firing_resets_to_idle() {
        let mut d = detector();
        d.scan(b"\r");
        d.scan(b"~");
        assert_eq!(d.scan(b"C"), ScanOutcome::OpenPrompt);
        // The sequence must be typed again from the line break.
        assert_eq!(d.scan(b"~"), ScanOutcome::Forward);
    }

    #[test]
    fn non_escape_chunk_head_resets() {
        let mut d = detector();
        d.scan(b"\r");
        // The leading x drops the detector back to Idle, so the ~ later in
        // the same chunk is mid-line and never matches.
        assert_eq!(d.scan(b"x~C"), ScanOutcome::Forward);
        d.scan(b"\r");
        assert_eq!(d.scan(b"~C"), ScanOutcome::StripFirst);
    }

    #[test]
    fn whole_sequence_in_one_chunk_strips_wrong_byte() {
        let mut d = detector();
        // Pasted input: the escape matches at offset 1, but the outcome
        // tells the relay to withhold byte 0 (the carriage return). The
        // scan stops there, so the command letter in the tail is never
        // seen and the prompt does not open for this chunk.
        assert_eq!(d.scan(b"\r~C"), ScanOutcome::StripFirst);
        // The armed state carries over to the next chunk.
        assert_eq!(d.scan(b"C"), ScanOutcome::OpenPrompt);
    }
}
