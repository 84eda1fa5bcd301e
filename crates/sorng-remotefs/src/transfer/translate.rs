use crate::types::LineSeparator;

const CR: u8 = b'\r';
const LF: u8 = b'\n';
const CRLF: &[u8] = b"\r\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    /// Local line endings to CRLF.
    ToNet,
    /// CRLF to the local separator.
    FromNet(LineSeparator),
}

/// Streaming line-ending filter. State carries a trailing CR across chunk
/// boundaries, so a CRLF split between two reads is still seen as one.
#[derive(Debug, Clone)]
pub struct LineTranslator {
    direction: Direction,
    pending_cr: bool,
}

impl LineTranslator {
    /// Upload direction: LF, CR and CRLF all become CRLF.
    pub fn to_net() -> Self {
        Self {
            direction: Direction::ToNet,
            pending_cr: false,
        }
    }

    /// Download direction: CRLF (or a bare LF) becomes `separator`.
    pub fn from_net(separator: LineSeparator) -> Self {
        Self {
            direction: Direction::FromNet(separator),
            pending_cr: false,
        }
    }

    pub fn filter(&mut self, input: &[u8], out: &mut Vec<u8>) {
        out.reserve(input.len() + input.len() / 8);
        match self.direction {
            Direction::ToNet => self.filter_to_net(input, out),
            Direction::FromNet(sep) => self.filter_from_net(input, out, sep.as_bytes()),
        }
    }

    /// Flush state held back at the end of the stream.
    pub fn finish(&mut self, out: &mut Vec<u8>) {
        if !std::mem::take(&mut self.pending_cr) {
            return;
        }
        match self.direction {
            Direction::ToNet => out.extend_from_slice(CRLF),
            Direction::FromNet(_) => out.push(CR),
        }
    }

    fn filter_to_net(&mut self, input: &[u8], out: &mut Vec<u8>) {
        for &b in input {
            if self.pending_cr {
                self.pending_cr = false;
                out.extend_from_slice(CRLF);
                if b == LF {
                    continue;
                }
            }
            match b {
                CR => self.pending_cr = true,
                LF => out.extend_from_slice(CRLF),
                _ => out.push(b),
            }
        }
    }

    fn filter_from_net(&mut self, input: &[u8], out: &mut Vec<u8>, sep: &[u8]) {
        for &b in input {
            if self.pending_cr {
                self.pending_cr = false;
                if b == LF {
                    out.extend_from_slice(sep);
                    continue;
                }
                // bare CR is data
                out.push(CR);
            }
            match b {
                CR => self.pending_cr = true,
                LF => out.extend_from_slice(sep),
                _ => out.push(b),
            }
        }
    }
}
