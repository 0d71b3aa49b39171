//! Heading-aware markdown chunker.
//!
//! Splits a document into [`RawChunk`]s that never exceed the padded token
//! limit `floor(model_token_limit × padding_factor)`, and records for every
//! chunk the heading path it lives under and the source lines it consumed.
//!
//! # Algorithm
//!
//! 1. Parse ATX headings (`#` … `######`, outside fenced code) into a
//!    section tree. A heading of level L closes every open section of
//!    level ≥ L.
//! 2. Split each section body into paragraph units at blank lines. A unit
//!    larger than the limit is split into line groups; a single line
//!    larger than the limit is split at sentence boundaries, and a
//!    sentence still too large is cut into character windows. Pieces cut
//!    inside a line are marked `synthetic_split`.
//! 3. Greedily accumulate units per section. The buffer is closed when
//!    adding the next unit would exceed the limit, or when the buffer has
//!    reached `target_chunk_size` and the next unit is non-empty.
//! 4. Merge chunks below `min_chunk_size` into the previous chunk of the
//!    same section when the result still fits.
//!
//! Heading lines and blank lines are structure: they are not part of any
//! chunk's content, but every other line belongs to exactly one chunk.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use mdrag_core::chunk::{chunk_document, ChunkingConfig};
//! use mdrag_core::tokens::ByteLengthCounter;
//!
//! let config = ChunkingConfig::new(3, 6, 1.0, None, Arc::new(ByteLengthCounter)).unwrap();
//! let result = chunk_document("# A\n\nfoo bar baz\n\n## B\n\nqux quux", &config).unwrap();
//! assert_eq!(result.chunks.len(), 2);
//! assert_eq!(result.chunks[0].heading_path.as_deref(), Some("A"));
//! assert_eq!(result.chunks[1].heading_path.as_deref(), Some("A > B"));
//! ```

use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::error::{ChunkingError, ConfigError};
use crate::models::RawChunk;
use crate::tokens::TokenCounter;

const PARAGRAPH_JOINER: &str = "\n\n";
const LINE_JOINER: &str = "\n";
const SENTENCE_JOINER: &str = " ";

/// Chunk sizing parameters. Immutable for the duration of a run.
///
/// Only constructible through [`ChunkingConfig::new`], so every instance
/// in circulation has already been validated.
#[derive(Clone)]
pub struct ChunkingConfig {
    target_chunk_size: usize,
    model_token_limit: usize,
    padding_factor: f64,
    min_chunk_size: Option<usize>,
    token_counter: Arc<dyn TokenCounter>,
}

impl ChunkingConfig {
    /// Validate and build a configuration.
    ///
    /// # Errors
    ///
    /// - `target_chunk_size` or `model_token_limit` is zero.
    /// - `padding_factor` is outside `(0, 1]`.
    /// - the padded limit rounds down to zero tokens.
    /// - `min_chunk_size` exceeds `target_chunk_size`.
    pub fn new(
        target_chunk_size: usize,
        model_token_limit: usize,
        padding_factor: f64,
        min_chunk_size: Option<usize>,
        token_counter: Arc<dyn TokenCounter>,
    ) -> Result<Self, ConfigError> {
        if target_chunk_size == 0 {
            return Err(ConfigError::NotPositive {
                field: "target_chunk_size",
            });
        }
        if model_token_limit == 0 {
            return Err(ConfigError::NotPositive {
                field: "model_token_limit",
            });
        }
        if !(padding_factor > 0.0 && padding_factor <= 1.0) {
            return Err(ConfigError::PaddingFactor(padding_factor));
        }
        if let Some(min) = min_chunk_size {
            if min > target_chunk_size {
                return Err(ConfigError::MinAboveTarget {
                    min,
                    target: target_chunk_size,
                });
            }
        }

        let config = Self {
            target_chunk_size,
            model_token_limit,
            padding_factor,
            min_chunk_size,
            token_counter,
        };
        if config.hard_limit() == 0 {
            return Err(ConfigError::EmptyHardLimit);
        }
        Ok(config)
    }

    /// `floor(model_token_limit × padding_factor)`: no chunk may exceed it.
    pub fn hard_limit(&self) -> usize {
        (self.model_token_limit as f64 * self.padding_factor).floor() as usize
    }

    pub fn target_chunk_size(&self) -> usize {
        self.target_chunk_size
    }

    pub fn model_token_limit(&self) -> usize {
        self.model_token_limit
    }

    pub fn padding_factor(&self) -> f64 {
        self.padding_factor
    }

    pub fn min_chunk_size(&self) -> Option<usize> {
        self.min_chunk_size
    }

    pub fn token_counter(&self) -> &dyn TokenCounter {
        self.token_counter.as_ref()
    }
}

impl fmt::Debug for ChunkingConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChunkingConfig")
            .field("target_chunk_size", &self.target_chunk_size)
            .field("model_token_limit", &self.model_token_limit)
            .field("padding_factor", &self.padding_factor)
            .field("min_chunk_size", &self.min_chunk_size)
            .field("token_counter", &self.token_counter.name())
            .finish()
    }
}

/// Token statistics over a chunk sequence. All zero for an empty document.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ChunkStats {
    pub total_chunks: usize,
    pub average_tokens: f64,
    pub max_tokens: usize,
    pub min_tokens: usize,
}

/// Output of one chunking pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ChunkingResult {
    pub chunks: Vec<RawChunk>,
    pub stats: ChunkStats,
}

/// Chunker bound to one configuration.
#[derive(Debug, Clone)]
pub struct Chunker {
    config: ChunkingConfig,
}

impl Chunker {
    pub fn new(config: ChunkingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ChunkingConfig {
        &self.config
    }

    pub fn chunk(&self, text: &str) -> Result<ChunkingResult, ChunkingError> {
        chunk_document(text, &self.config)
    }
}

/// Split `text` into heading-aware, token-bounded chunks.
///
/// # Errors
///
/// [`ChunkingError::Unsplittable`] when a single character already exceeds
/// the limit under the configured token counter.
pub fn chunk_document(text: &str, config: &ChunkingConfig) -> Result<ChunkingResult, ChunkingError> {
    let sizer = Sizer::new(config);
    let mut drafts = Vec::new();

    for (section_index, section) in parse_sections(text).iter().enumerate() {
        let units = section_units(section, &sizer)?;
        accumulate(section_index, section, units, &sizer, &mut drafts);
    }

    let drafts = merge_small(drafts, &sizer);
    let stats = compute_stats(&drafts);
    let chunks = drafts
        .into_iter()
        .map(|d| RawChunk {
            content: d.text,
            heading_path: d.heading_path,
            heading_level: d.heading_level,
            start_line: d.start_line,
            end_line: d.end_line,
            synthetic_split: d.synthetic,
        })
        .collect();

    Ok(ChunkingResult { chunks, stats })
}

// ============ Parsing ============

/// One source line with its 1-based number.
#[derive(Debug, Clone, Copy)]
struct SourceLine<'a> {
    number: usize,
    text: &'a str,
    in_fence: bool,
}

impl SourceLine<'_> {
    fn is_blank(&self) -> bool {
        !self.in_fence && self.text.trim().is_empty()
    }
}

#[derive(Debug)]
struct Section<'a> {
    heading_path: Option<String>,
    heading_level: Option<u8>,
    body: Vec<SourceLine<'a>>,
}

fn parse_sections(text: &str) -> Vec<Section<'_>> {
    let mut sections = vec![Section {
        heading_path: None,
        heading_level: None,
        body: Vec::new(),
    }];
    let mut stack: Vec<(u8, String)> = Vec::new();
    let mut fences = FenceTracker::default();

    for (idx, raw) in text.split('\n').enumerate() {
        let line = raw.strip_suffix('\r').unwrap_or(raw);
        let number = idx + 1;

        if fences.observe(line) {
            push_body(&mut sections, number, line, true);
            continue;
        }

        if !fences.inside() {
            if let Some((level, title)) = parse_heading(line) {
                while stack.last().is_some_and(|(l, _)| *l >= level) {
                    stack.pop();
                }
                stack.push((level, title));
                sections.push(Section {
                    heading_path: heading_path(&stack),
                    heading_level: Some(level),
                    body: Vec::new(),
                });
                continue;
            }
        }

        push_body(&mut sections, number, line, fences.inside());
    }

    sections
}

fn push_body<'a>(sections: &mut [Section<'a>], number: usize, text: &'a str, in_fence: bool) {
    if let Some(section) = sections.last_mut() {
        section.body.push(SourceLine {
            number,
            text,
            in_fence,
        });
    }
}

fn heading_path(stack: &[(u8, String)]) -> Option<String> {
    let titles: Vec<&str> = stack
        .iter()
        .map(|(_, t)| t.as_str())
        .filter(|t| !t.is_empty())
        .collect();
    if titles.is_empty() {
        None
    } else {
        Some(titles.join(" > "))
    }
}

/// Parse an ATX heading: up to three spaces of indent, 1–6 `#`, then
/// whitespace or end of line. A closing `#` run is dropped when it is
/// separated from the title by whitespace.
fn parse_heading(line: &str) -> Option<(u8, String)> {
    let indent = line.len() - line.trim_start_matches(' ').len();
    if indent > 3 {
        return None;
    }
    let rest = &line[indent..];
    let hashes = rest.len() - rest.trim_start_matches('#').len();
    if hashes == 0 || hashes > 6 {
        return None;
    }
    let after = &rest[hashes..];
    if !(after.is_empty() || after.starts_with(' ') || after.starts_with('\t')) {
        return None;
    }

    let title = after.trim();
    let without_closing = title.trim_end_matches('#');
    let title = if without_closing.is_empty() {
        ""
    } else if without_closing.ends_with(|c: char| c == ' ' || c == '\t') {
        without_closing.trim_end()
    } else {
        title
    };
    Some((hashes as u8, title.to_string()))
}

/// Title of the first non-empty ATX heading of `level` outside fenced
/// code, with the same heading and fence rules the chunker applies.
pub fn first_heading(text: &str, level: u8) -> Option<String> {
    let mut fences = FenceTracker::default();
    text.split('\n')
        .map(|raw| raw.strip_suffix('\r').unwrap_or(raw))
        .filter(|line| !fences.observe(line) && !fences.inside())
        .filter_map(parse_heading)
        .find(|(l, title)| *l == level && !title.is_empty())
        .map(|(_, title)| title)
}

/// Line-by-line fenced code block state. A fence closes only on the marker
/// character that opened it.
#[derive(Debug, Default)]
struct FenceTracker {
    open: Option<char>,
}

impl FenceTracker {
    /// Feed the next line. Returns true when it is a fence delimiter.
    fn observe(&mut self, line: &str) -> bool {
        let Some(marker) = fence_marker(line) else {
            return false;
        };
        match self.open {
            Some(open) if open == marker => self.open = None,
            None => self.open = Some(marker),
            Some(_) => {}
        }
        true
    }

    fn inside(&self) -> bool {
        self.open.is_some()
    }
}

/// Opening/closing marker character of a fenced code block line.
fn fence_marker(line: &str) -> Option<char> {
    let trimmed = line.trim_start();
    if line.len() - trimmed.len() > 3 {
        return None;
    }
    ['`', '~']
        .into_iter()
        .find(|&c| trimmed.len() - trimmed.trim_start_matches(c).len() >= 3)
}

// ============ Units ============

/// Token arithmetic against the configured counter and limits.
struct Sizer<'a> {
    counter: &'a dyn TokenCounter,
    hard_limit: usize,
    target: usize,
    min: Option<usize>,
}

impl<'a> Sizer<'a> {
    fn new(config: &'a ChunkingConfig) -> Self {
        Self {
            counter: config.token_counter(),
            hard_limit: config.hard_limit(),
            target: config.target_chunk_size(),
            min: config.min_chunk_size(),
        }
    }

    fn count(&self, text: &str) -> usize {
        self.counter.count(text)
    }

    fn fits(&self, text: &str) -> bool {
        self.count(text) <= self.hard_limit
    }
}

/// An indivisible piece of section body, ready for accumulation.
#[derive(Debug)]
struct Unit {
    text: String,
    tokens: usize,
    start_line: usize,
    end_line: usize,
    synthetic: bool,
    /// Separator placed before this unit when appended to a buffer.
    joiner: &'static str,
}

fn section_units(section: &Section<'_>, sizer: &Sizer<'_>) -> Result<Vec<Unit>, ChunkingError> {
    let mut units = Vec::new();
    for block in section.body.split(|l| l.is_blank()) {
        if block.is_empty() {
            continue;
        }
        let text = join_lines(block);
        if text.trim().is_empty() {
            continue;
        }
        let tokens = sizer.count(&text);
        if tokens <= sizer.hard_limit {
            units.push(Unit {
                text,
                tokens,
                start_line: block[0].number,
                end_line: block[block.len() - 1].number,
                synthetic: false,
                joiner: PARAGRAPH_JOINER,
            });
        } else {
            split_block(block, sizer, &mut units)?;
        }
    }
    Ok(units)
}

fn join_lines(lines: &[SourceLine<'_>]) -> String {
    lines
        .iter()
        .map(|l| l.text.trim_end())
        .collect::<Vec<_>>()
        .join(LINE_JOINER)
}

/// Split an oversized paragraph into line groups, falling back to
/// sentence and character splits for lines that are too long on their own.
fn split_block(
    block: &[SourceLine<'_>],
    sizer: &Sizer<'_>,
    units: &mut Vec<Unit>,
) -> Result<(), ChunkingError> {
    let first_unit = units.len();
    let mut group: Vec<SourceLine<'_>> = Vec::new();

    for line in block {
        let text = line.text.trim_end();
        if !sizer.fits(text) {
            flush_group(&mut group, sizer, units);
            for (i, piece) in split_long_line(text, line.number, sizer)?
                .into_iter()
                .enumerate()
            {
                units.push(Unit {
                    tokens: sizer.count(&piece),
                    text: piece,
                    start_line: line.number,
                    end_line: line.number,
                    synthetic: true,
                    joiner: if i == 0 { LINE_JOINER } else { SENTENCE_JOINER },
                });
            }
            continue;
        }

        if !group.is_empty() {
            let mut candidate = join_lines(&group);
            candidate.push_str(LINE_JOINER);
            candidate.push_str(text);
            if !sizer.fits(&candidate) {
                flush_group(&mut group, sizer, units);
            }
        }
        group.push(*line);
    }
    flush_group(&mut group, sizer, units);

    if let Some(first) = units.get_mut(first_unit) {
        first.joiner = PARAGRAPH_JOINER;
    }
    Ok(())
}

fn flush_group(group: &mut Vec<SourceLine<'_>>, sizer: &Sizer<'_>, units: &mut Vec<Unit>) {
    if group.is_empty() {
        return;
    }
    let text = join_lines(group);
    if !text.trim().is_empty() {
        units.push(Unit {
            tokens: sizer.count(&text),
            text,
            start_line: group[0].number,
            end_line: group[group.len() - 1].number,
            synthetic: false,
            joiner: LINE_JOINER,
        });
    }
    group.clear();
}

/// Pack the sentences of one line into pieces that fit the limit.
fn split_long_line(text: &str, line: usize, sizer: &Sizer<'_>) -> Result<Vec<String>, ChunkingError> {
    let mut pieces = Vec::new();
    let mut current = String::new();

    for sentence in split_sentences(text) {
        if !sizer.fits(sentence) {
            if !current.is_empty() {
                pieces.push(std::mem::take(&mut current));
            }
            pieces.extend(split_windows(sentence, line, sizer)?);
            continue;
        }
        if current.is_empty() {
            current.push_str(sentence);
            continue;
        }
        let candidate = format!("{}{}{}", current, SENTENCE_JOINER, sentence);
        if sizer.fits(&candidate) {
            current = candidate;
        } else {
            pieces.push(std::mem::replace(&mut current, sentence.to_string()));
        }
    }
    if !current.is_empty() {
        pieces.push(current);
    }
    Ok(pieces)
}

/// Sentences end at `.`, `!` or `?` followed by whitespace.
fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();

    while let Some((_, c)) = chars.next() {
        if matches!(c, '.' | '!' | '?') {
            if let Some(&(next, n)) = chars.peek() {
                if n.is_whitespace() {
                    let sentence = text[start..next].trim();
                    if !sentence.is_empty() {
                        sentences.push(sentence);
                    }
                    start = next;
                }
            }
        }
    }
    let tail = text[start..].trim();
    if !tail.is_empty() {
        sentences.push(tail);
    }
    sentences
}

/// Cut text into the longest prefixes that fit, preferring whitespace
/// boundaries.
///
/// Each window only measures prefixes up to about twice its own length, so
/// total work grows with the text rather than with its square.
fn split_windows(text: &str, line: usize, sizer: &Sizer<'_>) -> Result<Vec<String>, ChunkingError> {
    let mut pieces = Vec::new();
    let mut rest = text.trim();

    while !rest.is_empty() {
        let cut = longest_fitting_prefix(rest, sizer);
        if cut == 0 {
            return Err(ChunkingError::Unsplittable {
                line,
                limit: sizer.hard_limit,
            });
        }
        if cut == rest.len() {
            pieces.push(rest.to_string());
            break;
        }
        let cut = match rest[..cut].rfind(char::is_whitespace) {
            Some(ws) if ws > 0 && sizer.fits(rest[..ws].trim_end()) => ws,
            _ => cut,
        };
        pieces.push(rest[..cut].trim_end().to_string());
        rest = rest[cut..].trim_start();
    }
    Ok(pieces)
}

/// Byte length of the longest char-aligned prefix that fits the limit,
/// or 0 if not even the first character fits.
///
/// Gallops forward from the first character, doubling the step while the
/// prefix still fits, then bisects between the last fitting end and the
/// first overflowing one.
fn longest_fitting_prefix(text: &str, sizer: &Sizer<'_>) -> usize {
    let Some(first) = text.chars().next() else {
        return 0;
    };
    let mut fit = first.len_utf8();
    if !sizer.fits(&text[..fit]) {
        return 0;
    }

    let mut step = fit;
    let mut overflow = loop {
        if fit == text.len() {
            return fit;
        }
        let end = ceil_char_boundary(text, fit + step);
        if sizer.fits(&text[..end]) {
            fit = end;
            step = step.saturating_mul(2);
        } else {
            break end;
        }
    };

    // `fit` always fits and `overflow` never does.
    while overflow - fit > 1 {
        let mid = floor_char_boundary(text, fit + (overflow - fit) / 2);
        let mid = if mid > fit {
            mid
        } else {
            ceil_char_boundary(text, fit + 1)
        };
        if mid >= overflow {
            break;
        }
        if sizer.fits(&text[..mid]) {
            fit = mid;
        } else {
            overflow = mid;
        }
    }
    fit
}

fn floor_char_boundary(text: &str, mut index: usize) -> usize {
    while !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}

fn ceil_char_boundary(text: &str, index: usize) -> usize {
    let mut index = index.min(text.len());
    while !text.is_char_boundary(index) {
        index += 1;
    }
    index
}

// ============ Accumulation ============

#[derive(Debug)]
struct Draft {
    section: usize,
    text: String,
    tokens: usize,
    heading_path: Option<String>,
    heading_level: Option<u8>,
    start_line: usize,
    end_line: usize,
    synthetic: bool,
}

impl Draft {
    fn start(section: usize, owner: &Section<'_>, unit: Unit) -> Self {
        Self {
            section,
            text: unit.text,
            tokens: unit.tokens,
            heading_path: owner.heading_path.clone(),
            heading_level: owner.heading_level,
            start_line: unit.start_line,
            end_line: unit.end_line,
            synthetic: unit.synthetic,
        }
    }
}

fn accumulate(
    section_index: usize,
    section: &Section<'_>,
    units: Vec<Unit>,
    sizer: &Sizer<'_>,
    out: &mut Vec<Draft>,
) {
    let mut buffer: Option<Draft> = None;

    for unit in units {
        let Some(mut draft) = buffer.take() else {
            buffer = Some(Draft::start(section_index, section, unit));
            continue;
        };

        let joined = format!("{}{}{}", draft.text, unit.joiner, unit.text);
        let joined_tokens = sizer.count(&joined);
        let over_limit = joined_tokens > sizer.hard_limit;
        let target_reached = draft.tokens >= sizer.target && unit.tokens > 0;

        if over_limit || target_reached {
            out.push(draft);
            buffer = Some(Draft::start(section_index, section, unit));
        } else {
            draft.text = joined;
            draft.tokens = joined_tokens;
            draft.end_line = unit.end_line;
            draft.synthetic |= unit.synthetic;
            buffer = Some(draft);
        }
    }

    if let Some(draft) = buffer {
        out.push(draft);
    }
}

/// Fold undersized chunks into their predecessor within the same section.
fn merge_small(drafts: Vec<Draft>, sizer: &Sizer<'_>) -> Vec<Draft> {
    let Some(min) = sizer.min else {
        return drafts;
    };

    let mut merged: Vec<Draft> = Vec::with_capacity(drafts.len());
    for draft in drafts {
        if draft.tokens < min {
            if let Some(prev) = merged.last_mut().filter(|p| p.section == draft.section) {
                let joined = format!("{}{}{}", prev.text, PARAGRAPH_JOINER, draft.text);
                let tokens = sizer.count(&joined);
                if tokens <= sizer.hard_limit {
                    prev.text = joined;
                    prev.tokens = tokens;
                    prev.end_line = draft.end_line;
                    prev.synthetic |= draft.synthetic;
                    continue;
                }
            }
        }
        merged.push(draft);
    }
    merged
}

fn compute_stats(drafts: &[Draft]) -> ChunkStats {
    if drafts.is_empty() {
        return ChunkStats::default();
    }
    let total: usize = drafts.iter().map(|d| d.tokens).sum();
    ChunkStats {
        total_chunks: drafts.len(),
        average_tokens: total as f64 / drafts.len() as f64,
        max_tokens: drafts.iter().map(|d| d.tokens).max().unwrap_or(0),
        min_tokens: drafts.iter().map(|d| d.tokens).min().unwrap_or(0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokens::ByteLengthCounter;

    fn config(target: usize, limit: usize, padding: f64, min: Option<usize>) -> ChunkingConfig {
        ChunkingConfig::new(target, limit, padding, min, Arc::new(ByteLengthCounter)).unwrap()
    }

    fn content_lines(text: &str) -> Vec<usize> {
        let mut fence = None;
        let mut out = Vec::new();
        for (i, raw) in text.split('\n').enumerate() {
            if let Some(m) = fence_marker(raw) {
                fence = match fence {
                    Some(open) if open == m => None,
                    None => Some(m),
                    other => other,
                };
                out.push(i + 1);
                continue;
            }
            if fence.is_none() && (raw.trim().is_empty() || parse_heading(raw).is_some()) {
                continue;
            }
            out.push(i + 1);
        }
        out
    }

    fn assert_invariants(text: &str, cfg: &ChunkingConfig) -> ChunkingResult {
        let result = chunk_document(text, cfg).unwrap();
        let limit = cfg.hard_limit();
        for c in &result.chunks {
            assert!(
                cfg.token_counter().count(&c.content) <= limit,
                "chunk over limit: {:?}",
                c
            );
            assert!(c.start_line <= c.end_line);
        }
        for pair in result.chunks.windows(2) {
            assert!(pair[0].start_line <= pair[1].start_line);
            if !(pair[0].synthetic_split && pair[1].synthetic_split) {
                assert!(pair[0].end_line < pair[1].start_line, "overlap: {:?}", pair);
            }
        }
        for line in content_lines(text) {
            let owners = result
                .chunks
                .iter()
                .filter(|c| c.start_line <= line && line <= c.end_line)
                .count();
            assert!(owners >= 1, "line {} not covered", line);
        }
        result
    }

    #[test]
    fn test_reference_example() {
        let cfg = config(3, 6, 1.0, None);
        let result = chunk_document("# A\n\nfoo bar baz\n\n## B\n\nqux quux", &cfg).unwrap();
        assert_eq!(result.chunks.len(), 2);
        assert_eq!(result.chunks[0].content, "foo bar baz");
        assert_eq!(result.chunks[0].heading_path.as_deref(), Some("A"));
        assert_eq!(result.chunks[0].heading_level, Some(1));
        assert_eq!((result.chunks[0].start_line, result.chunks[0].end_line), (3, 3));
        assert_eq!(result.chunks[1].content, "qux quux");
        assert_eq!(result.chunks[1].heading_path.as_deref(), Some("A > B"));
        assert_eq!(result.chunks[1].heading_level, Some(2));
        assert_eq!((result.chunks[1].start_line, result.chunks[1].end_line), (7, 7));
        assert_eq!(result.stats.total_chunks, 2);
        assert_eq!(result.stats.max_tokens, 3);
        assert_eq!(result.stats.min_tokens, 2);
        assert!((result.stats.average_tokens - 2.5).abs() < 1e-9);
    }

    #[test]
    fn test_empty_document() {
        let cfg = config(100, 200, 0.9, Some(10));
        for text in ["", "\n\n  \n"] {
            let result = chunk_document(text, &cfg).unwrap();
            assert!(result.chunks.is_empty());
            assert_eq!(result.stats, ChunkStats::default());
        }
    }

    #[test]
    fn test_headings_only_document_has_no_chunks() {
        let cfg = config(100, 200, 1.0, None);
        let result = chunk_document("# One\n## Two\n### Three", &cfg).unwrap();
        assert!(result.chunks.is_empty());
    }

    #[test]
    fn test_no_headings_has_no_path() {
        let cfg = config(5, 10, 1.0, None);
        let text = "First paragraph here.\n\nSecond paragraph here.\n\nThird.";
        let result = assert_invariants(text, &cfg);
        assert!(result.chunks.len() > 1);
        for c in &result.chunks {
            assert!(c.heading_path.is_none());
            assert!(c.heading_level.is_none());
        }
    }

    #[test]
    fn test_paragraphs_accumulate_under_target() {
        let cfg = config(100, 200, 1.0, None);
        let text = "# Title\n\nAlpha.\n\nBeta.\n\nGamma.";
        let result = chunk_document(text, &cfg).unwrap();
        assert_eq!(result.chunks.len(), 1);
        assert_eq!(result.chunks[0].content, "Alpha.\n\nBeta.\n\nGamma.");
        assert_eq!(result.chunks[0].start_line, 3);
        assert_eq!(result.chunks[0].end_line, 7);
    }

    #[test]
    fn test_closes_at_target() {
        // Each paragraph is 3 tokens; the target is reached after one.
        let cfg = config(3, 100, 1.0, None);
        let text = "aaaa bbbb cc\n\ndddd eeee ff\n\ngggg hhhh ii";
        let result = assert_invariants(text, &cfg);
        assert_eq!(result.chunks.len(), 3);
    }

    #[test]
    fn test_closes_before_hard_limit() {
        // Target is large, so only the hard limit forces a close.
        let cfg = config(8, 8, 1.0, None);
        let text = "aaaa bbbb cccc\n\ndddd eeee ffff\n\ngggg";
        let result = assert_invariants(text, &cfg);
        assert_eq!(result.chunks.len(), 2);
        assert_eq!(result.chunks[0].content, "aaaa bbbb cccc\n\ndddd eeee ffff");
        assert_eq!(result.chunks[1].content, "gggg");
    }

    #[test]
    fn test_padding_factor_shrinks_limit() {
        let cfg = config(10, 10, 0.5, None);
        assert_eq!(cfg.hard_limit(), 5);
        let text = "aaaa bbbb cccc\n\ndddd eeee ffff";
        let result = assert_invariants(text, &cfg);
        assert_eq!(result.chunks.len(), 2);
    }

    #[test]
    fn test_heading_stack_pops_to_equal_level() {
        let cfg = config(100, 200, 1.0, None);
        let text = "# A\n\na\n\n## B\n\nb\n\n### C\n\nc\n\n## D\n\nd\n\n# E\n\ne";
        let result = chunk_document(text, &cfg).unwrap();
        let paths: Vec<_> = result
            .chunks
            .iter()
            .map(|c| c.heading_path.clone().unwrap_or_default())
            .collect();
        assert_eq!(paths, vec!["A", "A > B", "A > B > C", "A > D", "E"]);
    }

    #[test]
    fn test_preamble_before_first_heading() {
        let cfg = config(100, 200, 1.0, None);
        let result = chunk_document("intro text\n\n# H\n\nbody", &cfg).unwrap();
        assert_eq!(result.chunks.len(), 2);
        assert!(result.chunks[0].heading_path.is_none());
        assert_eq!(result.chunks[1].heading_path.as_deref(), Some("H"));
    }

    #[test]
    fn test_headings_in_code_fence_ignored() {
        let cfg = config(100, 200, 1.0, None);
        let text = "# Real\n\n```sh\n# not a heading\n\necho hi\n```\n\nafter";
        let result = assert_invariants(text, &cfg);
        assert!(result
            .chunks
            .iter()
            .all(|c| c.heading_path.as_deref() == Some("Real")));
        assert!(result.chunks[0].content.contains("# not a heading"));
        assert!(result.chunks[0].content.contains("echo hi"));
    }

    #[test]
    fn test_parse_heading_variants() {
        assert_eq!(parse_heading("# A"), Some((1, "A".to_string())));
        assert_eq!(parse_heading("###### Six"), Some((6, "Six".to_string())));
        assert_eq!(parse_heading("####### Seven"), None);
        assert_eq!(parse_heading("#hashtag"), None);
        assert_eq!(parse_heading("    # indented code"), None);
        assert_eq!(parse_heading("   ## ok"), Some((2, "ok".to_string())));
        assert_eq!(parse_heading("## Closed ##"), Some((2, "Closed".to_string())));
        assert_eq!(parse_heading("# C#"), Some((1, "C#".to_string())));
        assert_eq!(parse_heading("#"), Some((1, String::new())));
    }

    #[test]
    fn test_crlf_lines() {
        let cfg = config(100, 200, 1.0, None);
        let result = chunk_document("# A\r\n\r\nbody\r\n", &cfg).unwrap();
        assert_eq!(result.chunks.len(), 1);
        assert_eq!(result.chunks[0].content, "body");
        assert_eq!(result.chunks[0].heading_path.as_deref(), Some("A"));
    }

    #[test]
    fn test_oversized_paragraph_split_by_sentences() {
        let cfg = config(6, 6, 1.0, None);
        let text = "One short sentence. Another short one. A third here.";
        let result = assert_invariants(text, &cfg);
        assert!(result.chunks.len() >= 2);
        assert!(result.chunks.iter().all(|c| c.synthetic_split));
        assert!(result.chunks.iter().all(|c| c.start_line == 1 && c.end_line == 1));
    }

    #[test]
    fn test_oversized_sentence_falls_back_to_windows() {
        let cfg = config(4, 4, 1.0, None);
        let text = "x".repeat(100);
        let result = assert_invariants(&text, &cfg);
        assert!(result.chunks.len() >= 7);
        assert!(result.chunks.iter().all(|c| c.synthetic_split));
        let rejoined: String = result.chunks.iter().map(|c| c.content.as_str()).collect();
        assert_eq!(rejoined, text);
    }

    #[test]
    fn test_windows_prefer_whitespace() {
        let cfg = config(3, 3, 1.0, None);
        let result = chunk_document("alpha beta gamma delta", &cfg).unwrap();
        for c in &result.chunks {
            assert_eq!(c.content, c.content.trim());
            assert!(!c.content.is_empty());
        }
        let words: Vec<&str> = result
            .chunks
            .iter()
            .flat_map(|c| c.content.split_whitespace())
            .collect();
        assert_eq!(words, vec!["alpha", "beta", "gamma", "delta"]);
    }

    #[test]
    fn test_oversized_block_split_by_lines_is_not_synthetic() {
        let cfg = config(4, 4, 1.0, None);
        let text = "line one aaa\nline two bbb\nline three c\nline four dd";
        let result = assert_invariants(text, &cfg);
        assert_eq!(result.chunks.len(), 4);
        for (i, c) in result.chunks.iter().enumerate() {
            assert!(!c.synthetic_split);
            assert_eq!(c.start_line, i + 1);
            assert_eq!(c.end_line, i + 1);
        }
    }

    #[test]
    fn test_multibyte_never_split_inside_char() {
        let cfg = config(2, 2, 1.0, None);
        let text = "┌──────────────────┐";
        let result = assert_invariants(text, &cfg);
        assert!(!result.chunks.is_empty());
        let rejoined: String = result.chunks.iter().map(|c| c.content.as_str()).collect();
        assert_eq!(rejoined, text);
    }

    #[test]
    fn test_windows_over_mixed_width_chars() {
        let cfg = config(3, 3, 1.0, None);
        let text = "aé€😀".repeat(40);
        let result = assert_invariants(&text, &cfg);
        let rejoined: String = result.chunks.iter().map(|c| c.content.as_str()).collect();
        assert_eq!(rejoined, text);
        // Windows are maximal: each one but the last is at most one
        // character short of the limit.
        for c in &result.chunks[..result.chunks.len() - 1] {
            assert!(c.content.len() > 12 - 4, "{:?}", c.content);
        }
    }

    /// Byte-length counter that also totals how many bytes it was asked
    /// to measure.
    #[derive(Default)]
    struct Metered {
        measured: std::sync::atomic::AtomicUsize,
    }

    impl TokenCounter for Metered {
        fn name(&self) -> &str {
            "metered"
        }
        fn count(&self, text: &str) -> usize {
            self.measured
                .fetch_add(text.len(), std::sync::atomic::Ordering::Relaxed);
            ByteLengthCounter.count(text)
        }
    }

    fn measured_bytes_for_line(len: usize) -> usize {
        let counter = Arc::new(Metered::default());
        let cfg = ChunkingConfig::new(100, 100, 1.0, None, counter.clone()).unwrap();
        let text = "x".repeat(len);
        let result = chunk_document(&text, &cfg).unwrap();
        assert_eq!(result.chunks.len(), len.div_ceil(400));
        counter
            .measured
            .load(std::sync::atomic::Ordering::Relaxed)
    }

    #[test]
    fn test_long_line_splitting_scales_linearly() {
        let small = measured_bytes_for_line(100_000);
        let large = measured_bytes_for_line(200_000);
        assert!(small < 64 * 100_000, "measured {small} bytes");
        // Doubling the input must not come close to quadrupling the work.
        assert!(large * 10 < small * 25, "{small} -> {large}");
    }

    #[test]
    fn test_first_heading_skips_fences() {
        let text = "intro\n~~~\n# not a title\n```\n# still code\n~~~\n#\n## Sub\n   # Real Title #\n# Later";
        assert_eq!(first_heading(text, 1).as_deref(), Some("Real Title"));
        assert_eq!(first_heading(text, 2).as_deref(), Some("Sub"));
        assert_eq!(first_heading("#hashtag\n    # code", 1), None);
    }

    #[test]
    fn test_unsplittable_character() {
        // A counter for which every character costs more than the limit.
        struct Expensive;
        impl TokenCounter for Expensive {
            fn name(&self) -> &str {
                "expensive"
            }
            fn count(&self, text: &str) -> usize {
                text.chars().count() * 10
            }
        }
        let cfg = ChunkingConfig::new(5, 5, 1.0, None, Arc::new(Expensive)).unwrap();
        let err = chunk_document("# H\n\nab", &cfg).unwrap_err();
        assert_eq!(err, ChunkingError::Unsplittable { line: 3, limit: 5 });
    }

    #[test]
    fn test_small_chunk_merged_within_section() {
        // Target 3 closes after the first paragraph; "z" (1 token) is
        // below min 2 and folds back into its predecessor.
        let cfg = config(3, 10, 1.0, Some(2));
        let text = "# S\n\naaaa bbbb cc\n\nz";
        let result = assert_invariants(text, &cfg);
        assert_eq!(result.chunks.len(), 1);
        assert_eq!(result.chunks[0].content, "aaaa bbbb cc\n\nz");
        assert_eq!(result.chunks[0].end_line, 5);
    }

    #[test]
    fn test_small_chunk_not_merged_across_headings() {
        let cfg = config(3, 10, 1.0, Some(2));
        let text = "# S\n\naaaa bbbb cc\n\n# T\n\nz";
        let result = assert_invariants(text, &cfg);
        assert_eq!(result.chunks.len(), 2);
        assert_eq!(result.chunks[1].content, "z");
        assert_eq!(result.chunks[1].heading_path.as_deref(), Some("T"));
    }

    #[test]
    fn test_sole_small_chunk_kept() {
        let cfg = config(50, 100, 1.0, Some(20));
        let result = chunk_document("tiny", &cfg).unwrap();
        assert_eq!(result.chunks.len(), 1);
        assert_eq!(result.chunks[0].content, "tiny");
    }

    #[test]
    fn test_merge_respects_hard_limit() {
        let cfg = config(3, 3, 1.0, Some(2));
        let text = "aaaa bbbb cc\n\nz";
        let result = assert_invariants(text, &cfg);
        assert_eq!(result.chunks.len(), 2);
    }

    #[test]
    fn test_invariants_on_mixed_document() {
        let mut text = String::from("Preamble line.\n\n# Guide\n\n");
        for i in 0..20 {
            text.push_str(&format!(
                "Paragraph {} talks about deployment. It has two sentences!\n\n",
                i
            ));
            if i % 5 == 0 {
                text.push_str(&format!("## Part {}\n\n", i));
            }
        }
        text.push_str(&"long ".repeat(200));
        for (target, limit, padding, min) in [
            (20, 40, 0.9, Some(5)),
            (50, 64, 1.0, None),
            (8, 16, 0.75, Some(2)),
        ] {
            let cfg = config(target, limit, padding, min);
            assert_invariants(&text, &cfg);
        }
    }

    #[test]
    fn test_config_validation() {
        let c = || Arc::new(ByteLengthCounter) as Arc<dyn TokenCounter>;
        assert_eq!(
            ChunkingConfig::new(0, 10, 1.0, None, c()).unwrap_err(),
            ConfigError::NotPositive {
                field: "target_chunk_size"
            }
        );
        assert_eq!(
            ChunkingConfig::new(5, 0, 1.0, None, c()).unwrap_err(),
            ConfigError::NotPositive {
                field: "model_token_limit"
            }
        );
        assert!(matches!(
            ChunkingConfig::new(5, 10, 0.0, None, c()),
            Err(ConfigError::PaddingFactor(_))
        ));
        assert!(matches!(
            ChunkingConfig::new(5, 10, 1.5, None, c()),
            Err(ConfigError::PaddingFactor(_))
        ));
        assert!(matches!(
            ChunkingConfig::new(5, 10, f64::NAN, None, c()),
            Err(ConfigError::PaddingFactor(_))
        ));
        assert_eq!(
            ChunkingConfig::new(5, 1, 0.5, None, c()).unwrap_err(),
            ConfigError::EmptyHardLimit
        );
        assert_eq!(
            ChunkingConfig::new(5, 10, 1.0, Some(6), c()).unwrap_err(),
            ConfigError::MinAboveTarget { min: 6, target: 5 }
        );
        assert_eq!(ChunkingConfig::new(400, 512, 0.9, None, c()).unwrap().hard_limit(), 460);
    }

    #[test]
    fn test_deterministic() {
        let cfg = config(5, 10, 0.9, Some(2));
        let text = "# A\n\nAlpha\n\nBeta\n\n## B\n\nGamma\n\nDelta";
        assert_eq!(
            chunk_document(text, &cfg).unwrap(),
            chunk_document(text, &cfg).unwrap()
        );
    }
}
