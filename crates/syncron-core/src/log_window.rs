use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_CHUNK_BYTES: u64 = 1024 * 1024;

/// Logs shorter than this many chunks are fetched in one piece.
const WHOLE_LOG_CHUNKS: u64 = 3;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LogWindowError {
    #[error("short read for bytes {start}..{end}: got {got} bytes")]
    ShortRead { start: u64, end: u64, got: u64 },
    #[error("no gap {from}..{to} in log window")]
    NoSuchGap { from: u64, to: u64 },
    #[error("expand size must be between 1 and {max} bytes, got {size}")]
    InvalidSize { size: u64, max: u64 },
    #[error("inconsistent log window: {0}")]
    Inconsistent(String),
}

/// Half-open byte range `[start, end)` into the full log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn new(start: u64, end: u64) -> Self {
        Self {
            start,
            end: end.max(start),
        }
    }

    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Gap {
    pub from: u64,
    pub to: u64,
}

impl Gap {
    pub fn len(&self) -> u64 {
        self.to - self.from
    }

    pub fn is_empty(&self) -> bool {
        self.from >= self.to
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Edge {
    Start,
    End,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogPart {
    Text(Vec<u8>),
    Gap(Gap),
}

impl LogPart {
    pub fn byte_len(&self) -> u64 {
        match self {
            LogPart::Text(bytes) => bytes.len() as u64,
            LogPart::Gap(gap) => gap.len(),
        }
    }

    pub fn as_gap(&self) -> Option<Gap> {
        match self {
            LogPart::Gap(gap) => Some(*gap),
            LogPart::Text(_) => None,
        }
    }
}

/// Byte ranges to fetch for the first load of a run's log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadPlan {
    Empty,
    Whole(ByteRange),
    HeadTail { head: ByteRange, tail: ByteRange },
}

impl LoadPlan {
    pub fn for_len(log_len: u64, chunk: u64) -> Self {
        let chunk = chunk.max(1);
        if log_len == 0 {
            LoadPlan::Empty
        } else if log_len < chunk.saturating_mul(WHOLE_LOG_CHUNKS) {
            LoadPlan::Whole(ByteRange::new(0, log_len))
        } else {
            LoadPlan::HeadTail {
                head: ByteRange::new(0, chunk),
                tail: ByteRange::new(log_len - chunk, log_len),
            }
        }
    }

    pub fn ranges(&self) -> Vec<ByteRange> {
        match self {
            LoadPlan::Empty => Vec::new(),
            LoadPlan::Whole(range) => vec![*range],
            LoadPlan::HeadTail { head, tail } => vec![*head, *tail],
        }
    }
}

/// A pending read into one edge of a gap. `gap` is the gap as it was when
/// the read was planned; the read only applies if the gap is still exactly that.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpandRequest {
    pub gap: Gap,
    pub edge: Edge,
    pub range: ByteRange,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpandOutcome {
    Applied { gap_closed: bool },
    StaleDiscarded,
}

/// Partially loaded log: text parts around at most one unfetched gap.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogWindow {
    parts: Vec<LogPart>,
    log_len: u64,
    loaded: bool,
}

impl LogWindow {
    /// Builds the window from the bodies fetched for `plan`, in plan order.
    pub fn assemble(plan: &LoadPlan, bodies: Vec<Vec<u8>>) -> Result<Self, LogWindowError> {
        let ranges = plan.ranges();
        let mut bodies = bodies.into_iter();
        let mut texts = Vec::with_capacity(ranges.len());
        for range in &ranges {
            let body = bodies.next().unwrap_or_default();
            texts.push(exact_body(*range, body)?);
        }

        let mut window = LogWindow {
            parts: Vec::new(),
            log_len: 0,
            loaded: true,
        };
        match plan {
            LoadPlan::Empty => {}
            LoadPlan::Whole(range) => {
                window.parts = texts.into_iter().map(LogPart::Text).collect();
                window.log_len = range.end;
            }
            LoadPlan::HeadTail { head, tail } => {
                let mut texts = texts.into_iter();
                window.parts = vec![
                    LogPart::Text(texts.next().unwrap_or_default()),
                    LogPart::Gap(Gap {
                        from: head.end,
                        to: tail.start,
                    }),
                    LogPart::Text(texts.next().unwrap_or_default()),
                ];
                window.log_len = tail.end;
            }
        }
        Ok(window)
    }

    /// A window holding a log that arrived inline with its run.
    pub fn from_inline(log: impl Into<Vec<u8>>) -> Self {
        let log = log.into();
        let log_len = log.len() as u64;
        LogWindow {
            parts: if log.is_empty() {
                Vec::new()
            } else {
                vec![LogPart::Text(log)]
            },
            log_len,
            loaded: true,
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn parts(&self) -> &[LogPart] {
        &self.parts
    }

    pub fn log_len(&self) -> u64 {
        self.log_len
    }

    pub fn gap(&self) -> Option<Gap> {
        self.parts.iter().find_map(LogPart::as_gap)
    }

    /// Offset of the end of the materialized tail; new bytes start here.
    pub fn seek_offset(&self) -> u64 {
        self.log_len
    }

    pub fn loaded_bytes(&self) -> u64 {
        self.parts
            .iter()
            .filter_map(|part| match part {
                LogPart::Text(bytes) => Some(bytes.len() as u64),
                LogPart::Gap(_) => None,
            })
            .sum()
    }

    /// Appends live tail bytes. Ignored until the window has been loaded.
    pub fn append(&mut self, chunk: &[u8]) -> bool {
        if !self.loaded {
            return false;
        }
        if chunk.is_empty() {
            return true;
        }
        match self.parts.last_mut() {
            Some(LogPart::Text(text)) => text.extend_from_slice(chunk),
            _ => self.parts.push(LogPart::Text(chunk.to_vec())),
        }
        self.log_len += chunk.len() as u64;
        true
    }

    pub fn plan_expand(
        &self,
        gap: Gap,
        edge: Edge,
        size: u64,
        max: u64,
    ) -> Result<ExpandRequest, LogWindowError> {
        if size == 0 || size > max {
            return Err(LogWindowError::InvalidSize { size, max });
        }
        if self.gap() != Some(gap) {
            return Err(LogWindowError::NoSuchGap {
                from: gap.from,
                to: gap.to,
            });
        }
        let size = size.min(gap.len());
        let range = match edge {
            Edge::Start => ByteRange::new(gap.from, gap.from + size),
            Edge::End => ByteRange::new(gap.to - size, gap.to),
        };
        Ok(ExpandRequest { gap, edge, range })
    }

    /// Applies bytes fetched for `request`. If the gap moved since the
    /// request was planned the bytes are dropped and nothing changes.
    pub fn apply_expand(
        &mut self,
        request: &ExpandRequest,
        bytes: Vec<u8>,
    ) -> Result<ExpandOutcome, LogWindowError> {
        let Some(index) = self
            .parts
            .iter()
            .position(|part| part.as_gap() == Some(request.gap))
        else {
            return Ok(ExpandOutcome::StaleDiscarded);
        };
        let bytes = exact_body(request.range, bytes)?;
        let gap = request.gap;

        if request.range.len() >= gap.len() {
            self.parts[index] = LogPart::Text(bytes);
            return Ok(ExpandOutcome::Applied { gap_closed: true });
        }

        match request.edge {
            Edge::Start => {
                self.parts[index] = LogPart::Gap(Gap {
                    from: request.range.end,
                    to: gap.to,
                });
                self.parts.insert(index, LogPart::Text(bytes));
            }
            Edge::End => {
                self.parts[index] = LogPart::Gap(Gap {
                    from: gap.from,
                    to: request.range.start,
                });
                self.parts.insert(index + 1, LogPart::Text(bytes));
            }
        }
        Ok(ExpandOutcome::Applied { gap_closed: false })
    }

    /// Verifies that the parts tile `[0, log_len)` with at most one gap.
    pub fn check(&self) -> Result<(), LogWindowError> {
        let mut offset = 0u64;
        let mut gaps = 0usize;
        for part in &self.parts {
            if let LogPart::Gap(gap) = part {
                gaps += 1;
                if gap.is_empty() {
                    return Err(LogWindowError::Inconsistent(format!(
                        "empty gap {}..{}",
                        gap.from, gap.to
                    )));
                }
                if gap.from != offset {
                    return Err(LogWindowError::Inconsistent(format!(
                        "gap starts at {} but previous part ends at {offset}",
                        gap.from
                    )));
                }
            }
            offset += part.byte_len();
        }
        if gaps > 1 {
            return Err(LogWindowError::Inconsistent(format!("{gaps} gaps")));
        }
        if offset != self.log_len {
            return Err(LogWindowError::Inconsistent(format!(
                "parts cover {offset} bytes but log_len is {}",
                self.log_len
            )));
        }
        Ok(())
    }
}

fn exact_body(range: ByteRange, mut body: Vec<u8>) -> Result<Vec<u8>, LogWindowError> {
    let want = range.len();
    let got = body.len() as u64;
    if got < want {
        return Err(LogWindowError::ShortRead {
            start: range.start,
            end: range.end,
            got,
        });
    }
    body.truncate(want as usize);
    Ok(body)
}

/// Resolves a `seek`/`limit` log request against a log of `len` bytes into
/// the `(offset, length)` actually served. A negative limit counts back from
/// the end but never before `seek`.
pub fn apply_limit(len: u64, seek: Option<u64>, limit: Option<i64>) -> (u64, u64) {
    let seek = seek.unwrap_or(0);
    let remaining = len.saturating_sub(seek);
    match limit {
        None => (seek, remaining),
        Some(limit) if limit >= 0 => (seek, limit.unsigned_abs().min(remaining)),
        Some(limit) => {
            let limit = limit.unsigned_abs();
            (
                seek.max(len.saturating_sub(limit)),
                limit.min(remaining),
            )
        }
    }
}
