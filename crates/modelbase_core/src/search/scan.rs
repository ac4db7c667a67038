//! Exact literal matching over byte slices and streams.

use regex::bytes::Regex;
use std::fmt::Write as _;
use std::io::{self, ErrorKind, Read};
use std::ops::Range;

/// One occurrence inside a scanned value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hit {
    pub offset: u64,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone)]
struct Term {
    pattern: Regex,
    bytes: Vec<u8>,
}

impl Term {
    fn compile(bytes: &[u8]) -> Option<Self> {
        if bytes.is_empty() {
            return None;
        }
        let mut source = String::with_capacity(bytes.len() * 4 + 4);
        source.push_str("(?-u)");
        for byte in bytes {
            let _ = write!(source, "\\x{byte:02x}");
        }
        Some(Self {
            pattern: Regex::new(&source).ok()?,
            bytes: bytes.to_vec(),
        })
    }
}

/// Finds every, possibly overlapping, occurrence of one literal byte string,
/// or of several terms that follow each other inside a bounded span.
///
/// A span hit starts at an occurrence of the first term and runs through the
/// earliest following occurrence of each later term. Hits longer than
/// `max_span` bytes are dropped, so every hit is decided by the `max_span`
/// bytes from its start.
#[derive(Debug, Clone)]
pub struct Scanner {
    terms: Vec<Term>,
    max_span: usize,
}

impl Scanner {
    /// Compiles `needle` as a case-sensitive byte literal; `None` if it is empty.
    pub fn new(needle: &[u8]) -> Option<Self> {
        Self::spanning(&[needle], needle.len())
    }

    /// Terms matched in order; `None` if there are no terms or one is empty.
    pub fn spanning<T: AsRef<[u8]>>(terms: &[T], max_span: usize) -> Option<Self> {
        let terms = terms
            .iter()
            .map(|term| Term::compile(term.as_ref()))
            .collect::<Option<Vec<_>>>()?;
        if terms.is_empty() {
            return None;
        }
        let total = terms.iter().map(|term| term.bytes.len()).sum::<usize>();
        Some(Self {
            terms,
            max_span: max_span.max(total),
        })
    }

    pub fn terms(&self) -> impl Iterator<Item = &[u8]> {
        self.terms.iter().map(|term| term.bytes.as_slice())
    }

    pub fn max_span(&self) -> usize {
        self.max_span
    }

    /// Start offsets of all hits, including overlapping ones.
    pub fn find_all(&self, haystack: &[u8]) -> Vec<usize> {
        self.find_spans(haystack)
            .into_iter()
            .map(|span| span.start)
            .collect()
    }

    /// Byte ranges of all hits, ordered by start offset.
    pub fn find_spans(&self, haystack: &[u8]) -> Vec<Range<usize>> {
        let Some((first, rest)) = self.terms.split_first() else {
            return Vec::new();
        };
        let mut spans = Vec::new();
        let mut start = 0;
        while start < haystack.len() {
            let Some(found) = first.pattern.find_at(haystack, start) else {
                break;
            };
            if let Some(end) = self.complete(haystack, found.start(), found.end(), rest) {
                spans.push(found.start()..end);
            }
            start = found.start() + 1;
        }
        spans
    }

    pub fn hits(&self, haystack: &[u8]) -> Vec<Hit> {
        self.find_spans(haystack)
            .into_iter()
            .map(|span| Hit {
                offset: span.start as u64,
                bytes: haystack[span].to_vec(),
            })
            .collect()
    }

    fn complete(&self, haystack: &[u8], begin: usize, mut end: usize, rest: &[Term]) -> Option<usize> {
        let limit = haystack.len().min(begin + self.max_span);
        let bounded = &haystack[..limit];
        for term in rest {
            end = term.pattern.find_at(bounded, end)?.end();
        }
        (end - begin <= self.max_span).then_some(end)
    }

    /// Scans a stream in `buffer_size` reads.
    ///
    /// The last `max_span - 1` bytes of each window are carried into the
    /// next one. Hits starting inside the carried bytes are reported from a
    /// later window, so a hit split across two reads is reported exactly once.
    pub fn scan_reader(&self, reader: &mut dyn Read, buffer_size: usize) -> io::Result<Vec<Hit>> {
        self.scan_stream(reader, buffer_size, false)
    }

    /// The earliest hit of a stream; stops reading once it is settled.
    pub fn first_in_reader(
        &self,
        reader: &mut dyn Read,
        buffer_size: usize,
    ) -> io::Result<Option<Hit>> {
        Ok(self.scan_stream(reader, buffer_size, true)?.into_iter().next())
    }

    fn scan_stream(
        &self,
        reader: &mut dyn Read,
        buffer_size: usize,
        first_only: bool,
    ) -> io::Result<Vec<Hit>> {
        let carry = self.max_span - 1;
        let mut buffer = vec![0_u8; buffer_size.max(1)];
        let mut window: Vec<u8> = Vec::with_capacity(buffer.len() + carry);
        let mut window_start = 0_u64;
        let mut hits = Vec::new();

        loop {
            let read = match reader.read(&mut buffer) {
                Ok(0) => break,
                Ok(read) => read,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
            };
            window.extend_from_slice(&buffer[..read]);
            let settled = window.len().saturating_sub(carry);
            self.collect(&window, settled, window_start, &mut hits);
            if first_only && !hits.is_empty() {
                hits.truncate(1);
                return Ok(hits);
            }
            window.drain(..settled);
            window_start += settled as u64;
        }
        self.collect(&window, window.len(), window_start, &mut hits);
        if first_only {
            hits.truncate(1);
        }
        Ok(hits)
    }

    /// Appends hits of `window` starting before `settled`.
    fn collect(&self, window: &[u8], settled: usize, window_start: u64, hits: &mut Vec<Hit>) {
        hits.extend(
            self.find_spans(window)
                .into_iter()
                .take_while(|span| span.start < settled)
                .map(|span| Hit {
                    offset: window_start + span.start as u64,
                    bytes: window[span].to_vec(),
                }),
        );
    }
}
