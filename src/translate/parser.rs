//! Translation response parser
//!
//! The translation model is asked for `<subline>` blocks, but what comes
//! back is semi-structured at best: payloads wrapped in markdown fences,
//! blocks outside any fence, truncated or mismatched closing tags, tag-name
//! aliases, and three different timing formats. The parser extracts
//! everything recoverable and records an issue for everything that needed
//! tolerance.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::Range;

use crate::issue::{Issue, IssueKind, ParseErrorKind};
use crate::macros::regex;
use crate::srt::time::parse_timing_range;

/// Where in the response an entry was found
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SourceFormat {
    FencedBlock,
    BareTag,
    RegexFallback,
}

/// One parsed translation record, keyed by the reference subtitle id
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslationEntry {
    pub original_id: String,
    pub original_line: Option<String>,
    pub original_timing: Option<String>,
    pub start_sec: Option<f64>,
    pub end_sec: Option<f64>,
    /// Language tag to translated text; both `english` and the target
    /// language are expected keys, either may be null
    pub translations: BTreeMap<String, Option<String>>,
    /// Part number of the segment that produced this entry
    pub source_chunk: u32,
    pub source_format: SourceFormat,
}

impl TranslationEntry {
    pub fn translation(&self, language: &str) -> Option<&str> {
        self.translations
            .get(language)
            .and_then(|t| t.as_deref())
            .filter(|t| !t.is_empty())
    }
}

const NUMBER_ALIASES: &[&str] = &["original_number", "number", "id"];
const LINE_ALIASES: &[&str] = &["original_line"];
const TIMING_ALIASES: &[&str] = &["original_timing", "timing"];
const ENGLISH_ALIASES: &[&str] = &["better_english_translation", "english_translation", "english"];

/// Parse a full translation response into entries.
///
/// Fenced code blocks are scanned first; the rest of the document is then
/// scanned for `<subline>` blocks that fall outside every fenced range.
/// Entries are deduplicated by id (first wins) and sorted numerically.
pub fn parse_response(
    text: &str,
    target_language: &str,
    source_chunk: u32,
    issues: &mut Vec<Issue>,
) -> Vec<TranslationEntry> {
    let target_language = target_language.to_lowercase();
    let mut entries = Vec::new();

    // 1. Fenced blocks and their byte ranges.
    let fence_re = regex!(r"(?s)```[a-zA-Z]*[ \t]*\r?\n(.*?)```");
    let mut fenced_ranges: Vec<Range<usize>> = Vec::new();
    for caps in fence_re.captures_iter(text) {
        let whole = caps.get(0).unwrap();
        let inner = caps.get(1).unwrap();
        fenced_ranges.push(whole.range());

        let found = collect_sublines(
            text,
            inner.range(),
            SourceFormat::FencedBlock,
            &target_language,
            source_chunk,
            issues,
        );
        if found.is_empty() {
            issues.push(
                Issue::warning(
                    IssueKind::Parse(ParseErrorKind::MarkdownBlockEmptyOrInvalid),
                    "fenced block contains no subline entries",
                )
                .with_line(line_of(text, whole.start()))
                .with_context(inner.as_str()),
            );
        }
        entries.extend(found);
    }

    // 2. Bare <subline> blocks outside every fenced range.
    let outside = outside_ranges(text.len(), &fenced_ranges);
    for range in outside {
        entries.extend(collect_sublines(
            text,
            range,
            SourceFormat::BareTag,
            &target_language,
            source_chunk,
            issues,
        ));
    }

    // 3. Last resort: no structure at all, but numbered tags are present.
    if entries.is_empty() {
        entries = regex_fallback(text, &target_language, source_chunk, issues);
    }

    if entries.is_empty() {
        issues.push(Issue::error(
            IssueKind::Parse(ParseErrorKind::ExtractionFailed),
            "no translation entries could be extracted from the response",
        ));
        return entries;
    }

    // 4. Deduplicate by id, first wins.
    let mut seen = std::collections::BTreeSet::new();
    let mut deduped = Vec::with_capacity(entries.len());
    for entry in entries {
        if seen.contains(&entry.original_id) {
            issues.push(
                Issue::warning(
                    IssueKind::Parse(ParseErrorKind::DuplicateId),
                    format!("duplicate subline for id {}, keeping the first", entry.original_id),
                )
                .with_subtitle_id(entry.original_id.clone()),
            );
            continue;
        }
        seen.insert(entry.original_id.clone());
        deduped.push(entry);
    }

    // 5. Numeric sort; non-numeric ids sink to the end.
    deduped.sort_by(|a, b| match (parse_id(&a.original_id), parse_id(&b.original_id)) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => a.original_id.cmp(&b.original_id),
    });
    deduped
}

fn parse_id(id: &str) -> Option<i64> {
    id.trim().parse().ok()
}

/// Complement of a set of non-overlapping ranges over `[0, len)`.
fn outside_ranges(len: usize, ranges: &[Range<usize>]) -> Vec<Range<usize>> {
    let mut out = Vec::new();
    let mut pos = 0;
    for range in ranges {
        if range.start > pos {
            out.push(pos..range.start);
        }
        pos = range.end.max(pos);
    }
    if pos < len {
        out.push(pos..len);
    }
    out
}

/// Find every `<subline>…</subline>` inside `range` and extract its fields.
fn collect_sublines(
    text: &str,
    range: Range<usize>,
    source_format: SourceFormat,
    target_language: &str,
    source_chunk: u32,
    issues: &mut Vec<Issue>,
) -> Vec<TranslationEntry> {
    const OPEN: &str = "<subline>";
    const CLOSE: &str = "</subline>";

    let slice = &text[range.clone()];
    let mut entries = Vec::new();
    let mut pos = 0;

    while let Some(found) = slice[pos..].find(OPEN) {
        let content_start = pos + found + OPEN.len();
        let (content_end, next_pos) = match slice[content_start..].find(CLOSE) {
            Some(close) => (content_start + close, content_start + close + CLOSE.len()),
            None => {
                // Truncated block: ends at the next opener or the end of the
                // region.
                let end = slice[content_start..]
                    .find(OPEN)
                    .map(|n| content_start + n)
                    .unwrap_or(slice.len());
                issues.push(
                    Issue::warning(
                        IssueKind::Parse(ParseErrorKind::AmbiguousStructure),
                        "unterminated <subline> block",
                    )
                    .with_line(line_of(text, range.start + pos + found)),
                );
                (end, end)
            }
        };

        let abs_offset = range.start + content_start;
        if let Some(entry) = parse_subline(
            &slice[content_start..content_end],
            abs_offset,
            text,
            source_format,
            target_language,
            source_chunk,
            issues,
        ) {
            entries.push(entry);
        }
        pos = next_pos;
    }
    entries
}

/// Extract all fields of one subline block.
fn parse_subline(
    block: &str,
    abs_offset: usize,
    full_text: &str,
    source_format: SourceFormat,
    target_language: &str,
    source_chunk: u32,
    issues: &mut Vec<Issue>,
) -> Option<TranslationEntry> {
    let line = line_of(full_text, abs_offset);

    let original_id = match extract_tag(block, NUMBER_ALIASES, line, issues) {
        Some(id) if !id.is_empty() => id,
        _ => {
            issues.push(
                Issue::error(
                    IssueKind::Parse(ParseErrorKind::NumberNotFound),
                    "subline has no original_number",
                )
                .with_line(line)
                .with_context(block),
            );
            return None;
        }
    };

    let original_line = extract_tag(block, LINE_ALIASES, line, issues).filter(|s| !s.is_empty());

    let original_timing = extract_tag(block, TIMING_ALIASES, line, issues).filter(|s| !s.is_empty());
    let (start_sec, end_sec) = match &original_timing {
        Some(timing) => match parse_timing_range(timing) {
            Some((start, end)) if end > start => (Some(start), Some(end)),
            Some((start, end)) => {
                issues.push(
                    Issue::warning(
                        IssueKind::Parse(ParseErrorKind::InvalidTimingValue),
                        format!("non-monotonic timing {:.3} -> {:.3}, discarding", start, end),
                    )
                    .with_subtitle_id(original_id.clone())
                    .with_line(line)
                    .with_context(timing),
                );
                (None, None)
            }
            None => {
                issues.push(
                    Issue::warning(
                        IssueKind::Parse(ParseErrorKind::InvalidTimingFormat),
                        "unrecognized timing format",
                    )
                    .with_subtitle_id(original_id.clone())
                    .with_line(line)
                    .with_context(timing),
                );
                (None, None)
            }
        },
        None => (None, None),
    };

    let target_aliases = [format!("{}_translation", target_language), target_language.to_string()];
    let target_alias_refs: Vec<&str> = target_aliases.iter().map(|s| s.as_str()).collect();

    let mut translations = BTreeMap::new();
    translations.insert(
        "english".to_string(),
        extract_translation(block, ENGLISH_ALIASES, "english", &original_id, line, issues),
    );
    translations.insert(
        target_language.to_string(),
        extract_translation(block, &target_alias_refs, target_language, &original_id, line, issues),
    );

    Some(TranslationEntry {
        original_id,
        original_line,
        original_timing,
        start_sec,
        end_sec,
        translations,
        source_chunk,
        source_format,
    })
}

fn extract_translation(
    block: &str,
    aliases: &[&str],
    language: &str,
    id: &str,
    line: usize,
    issues: &mut Vec<Issue>,
) -> Option<String> {
    match extract_tag(block, aliases, line, issues) {
        Some(value) if !value.is_empty() => Some(value),
        Some(_) => {
            issues.push(
                Issue::warning(
                    IssueKind::Parse(ParseErrorKind::TextNotFound),
                    format!("empty {} translation", language),
                )
                .with_subtitle_id(id.to_string())
                .with_line(line),
            );
            None
        }
        None => {
            issues.push(
                Issue::warning(
                    IssueKind::Parse(ParseErrorKind::MissingTag),
                    format!("missing {} translation tag", language),
                )
                .with_subtitle_id(id.to_string())
                .with_line(line),
            );
            None
        }
    }
}

/// Tolerant tag extractor.
///
/// Tries each alias in order. When the text after the opener does not close
/// with the matching tag, the content up to the next `</` is taken instead
/// and a `MalformedTag` warning is recorded; a regex-only approach would
/// silently lose that content.
fn extract_tag(
    block: &str,
    aliases: &[&str],
    line: usize,
    issues: &mut Vec<Issue>,
) -> Option<String> {
    for name in aliases {
        let opener = format!("<{}>", name);
        let Some(open_idx) = block.find(&opener) else {
            continue;
        };
        let content_start = open_idx + opener.len();
        let rest = &block[content_start..];

        let closer = format!("</{}>", name);
        let value = match rest.find("</") {
            Some(slash_idx) => {
                if rest[slash_idx..].starts_with(&closer) {
                    &rest[..slash_idx]
                } else {
                    issues.push(
                        Issue::warning(
                            IssueKind::Parse(ParseErrorKind::MalformedTag),
                            format!("<{}> closed by a different tag, keeping content", name),
                        )
                        .with_line(line)
                        .with_context(rest),
                    );
                    &rest[..slash_idx]
                }
            }
            None => {
                issues.push(
                    Issue::warning(
                        IssueKind::Parse(ParseErrorKind::MalformedTag),
                        format!("<{}> never closed, keeping remaining content", name),
                    )
                    .with_line(line)
                    .with_context(rest),
                );
                rest
            }
        };
        return Some(value.trim().to_string());
    }
    None
}

/// Lenient last-resort extraction: pair each numbered tag with whatever
/// translation tags follow it, up to the next numbered tag.
fn regex_fallback(
    text: &str,
    target_language: &str,
    source_chunk: u32,
    issues: &mut Vec<Issue>,
) -> Vec<TranslationEntry> {
    let re = regex!(r"<(?:original_number|number|id)>\s*(\d+)");
    let matches: Vec<_> = re.find_iter(text).collect();
    if matches.is_empty() {
        return Vec::new();
    }

    issues.push(Issue::warning(
        IssueKind::Parse(ParseErrorKind::AmbiguousStructure),
        format!(
            "no subline blocks found, falling back to lenient extraction ({} numbered tags)",
            matches.len()
        ),
    ));

    let mut entries = Vec::new();
    for (i, found) in matches.iter().enumerate() {
        let end = matches
            .get(i + 1)
            .map(|next| next.start())
            .unwrap_or(text.len());
        let block = &text[found.start()..end];
        if let Some(entry) = parse_subline(
            block,
            found.start(),
            text,
            SourceFormat::RegexFallback,
            target_language,
            source_chunk,
            issues,
        ) {
            entries.push(entry);
        }
    }
    entries
}

/// 1-based line number of a byte offset.
fn line_of(text: &str, offset: usize) -> usize {
    text[..offset.min(text.len())].matches('\n').count() + 1
}
