//! Forward-specification parsing and per-hop directive compilation.
//!
//! One operator line like `L8080:example.com:80` compiles into three
//! directive strings, one per hop role:
//!
//! - **innermost** — submitted to the session nearest the operator's shell
//! - **relay** — reused for every intermediate hop
//! - **outermost** — submitted to the session nearest the destination
//!
//! For a local forward the outermost hop carries the real destination and
//! every hop below it relays `port` to `127.0.0.1:port` on the next layer
//! in; remote forwards invert the roles. Each directive ends in a carriage
//! return, which is what ssh's `~C` command line expects as termination.

use crate::error::ParseError;

/// Forward type selector, the first letter of the specification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardType {
    Local,
    Remote,
    Dynamic,
}

/// A parsed forward request. Immutable once parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardRequest {
    pub ty: ForwardType,
    /// The `[bind_address:]port` part, exactly as typed.
    pub source: String,
    /// The listen port extracted from `source`.
    pub port: u16,
    /// `host:hostport` destination; absent for dynamic forwards.
    pub dest: Option<String>,
    /// The trimmed original line, resubmitted verbatim when there is only
    /// a single hop.
    pub original: String,
}

impl ForwardRequest {
    /// Parse one operator line.
    ///
    /// An optional leading `-` is accepted so the familiar ssh command-line
    /// spelling (`-L...`) works too.
    pub fn parse(line: &str) -> Result<Self, ParseError> {
        let original = line.trim();
        if original.is_empty() {
            return Err(ParseError::Empty);
        }
        let s = original.strip_prefix('-').unwrap_or(original);
        let mut chars = s.chars();
        let ty = match chars.next() {
            Some('L') => ForwardType::Local,
            Some('R') => ForwardType::Remote,
            Some('D') => ForwardType::Dynamic,
            Some(other) => return Err(ParseError::UnknownType(other)),
            None => return Err(ParseError::Empty),
        };
        let spec = chars.as_str();

        if ty == ForwardType::Dynamic {
            // D[bind_address:]port: at most one colon, port is the last field.
            let colons = spec.matches(':').count();
            if colons > 1 {
                return Err(ParseError::ColonCount(colons));
            }
            let port = parse_port(spec.rsplit(':').next().unwrap_or(""))?;
            return Ok(Self {
                ty,
                source: spec.to_string(),
                port,
                dest: None,
                original: original.to_string(),
            });
        }

        // L/R: [bind_address:]port:host:hostport
        let colons = spec.matches(':').count();
        if !(2..=3).contains(&colons) {
            return Err(ParseError::ColonCount(colons));
        }
        let fields: Vec<&str> = spec.split(':').collect();
        let (source_fields, dest_fields) = fields.split_at(fields.len() - 2);
        let source = source_fields.join(":");
        let port = parse_port(source_fields.last().unwrap_or(&""))?;

        Ok(Self {
            ty,
            source,
            port,
            dest: Some(dest_fields.join(":")),
            original: original.to_string(),
        })
    }

    /// Compile the three hop-role directives for this request.
    pub fn compile(&self) -> ForwardPlan {
        let port = self.port;
        let source = &self.source;
        let (innermost, relay, outermost) = match self.ty {
            ForwardType::Dynamic => (
                format!("L{source}:127.0.0.1:{port}\r"),
                format!("L{port}:127.0.0.1:{port}\r"),
                format!("D:{port}\r"),
            ),
            ForwardType::Local => {
                let dest = self.dest.as_deref().unwrap_or("");
                (
                    format!("L{source}:127.0.0.1:{port}\r"),
                    format!("L{port}:127.0.0.1:{port}\r"),
                    format!("L{port}:{dest}\r"),
                )
            }
            ForwardType::Remote => {
                let dest = self.dest.as_deref().unwrap_or("");
                (
                    format!("R{port}:{dest}\r"),
                    format!("R{port}:127.0.0.1:{port}\r"),
                    format!("R{source}:127.0.0.1:{port}\r"),
                )
            }
        };
        ForwardPlan {
            original: format!("{}\r", self.original),
            innermost,
            relay,
            outermost,
        }
    }
}

fn parse_port(s: &str) -> Result<u16, ParseError> {
    match s.parse::<u16>() {
        Ok(0) | Err(_) => Err(ParseError::BadPort(s.to_string())),
        Ok(p) => Ok(p),
    }
}

/// The compiled directives for one command, each CR-terminated. Created
/// once per command and consumed during injection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardPlan {
    pub original: String,
    pub innermost: String,
    pub relay: String,
    pub outermost: String,
}

impl ForwardPlan {
    /// The directive to submit at hop `hop` of `depth` total.
    ///
    /// Hop `depth` is the outermost session (nearest the destination) and
    /// gets the outermost directive, except when it is the *only* hop, in
    /// which case the operator's original line is resubmitted unmodified.
    /// Hop 1 is nearest the operator and gets the innermost directive;
    /// everything between relays.
    pub fn directive_for(&self, hop: usize, depth: usize) -> &str {
        if hop == depth {
            if depth == 1 {
                &self.original
            } else {
                &self.outermost
            }
        } else if hop > 1 {
            &self.relay
        } else {
            &self.innermost
        }
    }
}
