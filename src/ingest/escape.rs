//! The text-escape splitter and the logical-line scanner.
//!
//! A logical line respects the text qualifier and the escape bracket sets:
//! newlines inside an open quote or bracket region do not terminate it.
//! The splitter runs the same state machine over a single line to cut it
//! into fields.

use std::collections::VecDeque;
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::mem;
use std::path::Path;

use encoding_rs::{CoderResult, Decoder, Encoding};

/// Quote/bracket-aware line-to-fields tokenizer.
///
/// Delimiters split only in the `Outside` state; the qualifier toggles the
/// quote state and is dropped from the output, brackets adjust depth and
/// are kept.
#[derive(Debug, Clone)]
pub struct TextEscape {
    delimiter: char,
    qualifier: Option<char>,
    openings: Vec<char>,
    closures: Vec<char>,
    strip: bool,
}

impl TextEscape {
    pub fn new(
        delimiter: char,
        qualifier: Option<char>,
        openings: &str,
        closures: &str,
        strip: bool,
    ) -> TextEscape {
        TextEscape {
            delimiter,
            qualifier,
            openings: openings.chars().collect(),
            closures: closures.chars().collect(),
            strip,
        }
    }

    pub fn split(&self, line: &str) -> Vec<String> {
        let mut fields = Vec::new();
        let mut field = String::new();
        let mut in_quote = false;
        let mut depth = 0usize;

        for c in line.chars() {
            if Some(c) == self.qualifier && depth == 0 {
                in_quote = !in_quote;
                continue;
            }
            if !in_quote {
                if self.openings.contains(&c) {
                    depth += 1;
                    field.push(c);
                    continue;
                }
                if self.closures.contains(&c) {
                    depth = depth.saturating_sub(1);
                    field.push(c);
                    continue;
                }
                if c == self.delimiter && depth == 0 {
                    fields.push(mem::take(&mut field));
                    continue;
                }
            }
            field.push(c);
        }
        fields.push(field);

        if self.strip {
            for field in &mut fields {
                let trimmed = field.trim();
                if trimmed.len() != field.len() {
                    *field = trimmed.to_owned();
                }
            }
        }
        fields
    }
}

const CHUNK: usize = 64 * 1024;

/// Streaming reader of logical lines under a chosen encoding.
///
/// Each ingest worker opens its own scanner and fast-forwards by re-running
/// it from line zero; byte offsets are never shared between workers.
pub struct LineScanner {
    reader: BufReader<File>,
    decoder: Decoder,
    qualifier: Option<char>,
    openings: Vec<char>,
    closures: Vec<char>,
    in_quote: bool,
    depth: usize,
    line: String,
    ready: VecDeque<String>,
    eof: bool,
}

impl LineScanner {
    pub fn open(
        path: &Path,
        encoding: &'static Encoding,
        qualifier: Option<char>,
        openings: &str,
        closures: &str,
    ) -> io::Result<LineScanner> {
        Ok(LineScanner {
            reader: BufReader::new(File::open(path)?),
            decoder: encoding.new_decoder(),
            qualifier,
            openings: openings.chars().collect(),
            closures: closures.chars().collect(),
            in_quote: false,
            depth: 0,
            line: String::new(),
            ready: VecDeque::new(),
            eof: false,
        })
    }

    /// The next logical line, without its terminator, or `None` at the end
    /// of the stream.
    pub fn next_line(&mut self) -> io::Result<Option<String>> {
        loop {
            if let Some(line) = self.ready.pop_front() {
                return Ok(Some(line));
            }
            if self.eof {
                if self.line.is_empty() {
                    return Ok(None);
                }
                return Ok(Some(mem::take(&mut self.line)));
            }
            self.fill()?;
        }
    }

    /// Skip `n` logical lines.
    pub fn skip(&mut self, n: usize) -> io::Result<()> {
        for _ in 0..n {
            if self.next_line()?.is_none() {
                break;
            }
        }
        Ok(())
    }

    fn fill(&mut self) -> io::Result<()> {
        let mut chunk = [0u8; CHUNK];
        let n = self.reader.read(&mut chunk)?;
        let last = n == 0;

        let mut decoded = String::new();
        let mut consumed = 0;
        loop {
            let capacity = self
                .decoder
                .max_utf8_buffer_length(n - consumed)
                .unwrap_or((n - consumed) * 4 + 16);
            decoded.reserve(capacity);
            let (result, read, _) =
                self.decoder.decode_to_string(&chunk[consumed..n], &mut decoded, last);
            consumed += read;
            match result {
                CoderResult::InputEmpty => break,
                CoderResult::OutputFull => continue,
            }
        }
        if last {
            self.eof = true;
        }
        self.consume(&decoded);
        Ok(())
    }

    fn consume(&mut self, text: &str) {
        for c in text.chars() {
            if c == '\n' && !self.in_quote && self.depth == 0 {
                if self.line.ends_with('\r') {
                    self.line.pop();
                }
                self.ready.push_back(mem::take(&mut self.line));
                continue;
            }
            if Some(c) == self.qualifier && self.depth == 0 {
                self.in_quote = !self.in_quote;
            } else if !self.in_quote {
                if self.openings.contains(&c) {
                    self.depth += 1;
                } else if self.closures.contains(&c) {
                    self.depth = self.depth.saturating_sub(1);
                }
            }
            self.line.push(c);
        }
    }
}
