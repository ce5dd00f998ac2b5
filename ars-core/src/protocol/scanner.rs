//! Incremental tag scanner.
//!
//! Fragments arrive with arbitrary boundaries. Narrative text is released as
//! soon as it cannot be part of a tag; an open `[` is held until its `]`
//! arrives, another `[` starts, or the held text exceeds the maximum tag
//! length. Concatenating the raw text of every emitted token reproduces the
//! input exactly.

use super::{ControlTag, Keyword, TagError};
use std::collections::VecDeque;

/// Longest bracket segment (brackets included, in bytes) considered a tag.
pub const DEFAULT_MAX_TAG_LEN: usize = 300;

/// A recognised tag with its original text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagToken {
    pub keyword: Keyword,
    /// Exact input text; lacks the closing `]` if the tag was closed implicitly
    /// at end of stream.
    pub raw: String,
    pub payload: String,
}

impl TagToken {
    pub fn decode(&self) -> Result<ControlTag, TagError> {
        ControlTag::decode(self.keyword, &self.payload)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Narrative(String),
    Tag(TagToken),
}

impl Token {
    pub fn as_tag(&self) -> Option<&TagToken> {
        match self {
            Token::Tag(tag) => Some(tag),
            Token::Narrative(_) => None,
        }
    }

    pub fn as_narrative(&self) -> Option<&str> {
        match self {
            Token::Narrative(text) => Some(text),
            Token::Tag(_) => None,
        }
    }

    /// Original input text of this token.
    pub fn raw(&self) -> &str {
        match self {
            Token::Narrative(text) => text,
            Token::Tag(tag) => &tag.raw,
        }
    }
}

/// Streaming tokenizer holding at most one bracket segment.
#[derive(Debug, Clone)]
pub struct Scanner {
    buf: String,
    max_len: usize,
}

impl Default for Scanner {
    fn default() -> Self {
        Self::new()
    }
}

impl Scanner {
    pub fn new() -> Self {
        Self::with_max_len(DEFAULT_MAX_TAG_LEN)
    }

    pub fn with_max_len(max_len: usize) -> Self {
        Self {
            buf: String::new(),
            max_len: max_len.max(2),
        }
    }

    pub fn max_len(&self) -> usize {
        self.max_len
    }

    /// True while an unresolved `[` is held back.
    pub fn is_buffering(&self) -> bool {
        !self.buf.is_empty()
    }

    /// Feed one fragment, returning every token that is now unambiguous.
    pub fn push(&mut self, fragment: &str) -> Vec<Token> {
        self.buf.push_str(fragment);
        let mut out = Vec::new();
        self.drain(false, &mut out);
        out
    }

    /// End of stream: resolve whatever is still held.
    pub fn finish(&mut self) -> Vec<Token> {
        let mut out = Vec::new();
        self.drain(true, &mut out);
        out
    }

    /// Scan a complete text in one pass.
    pub fn scan_all(mut self, text: &str) -> Vec<Token> {
        let mut tokens = self.push(text);
        tokens.extend(self.finish());
        tokens
    }

    fn drain(&mut self, end_of_stream: bool, out: &mut Vec<Token>) {
        while !self.buf.is_empty() {
            if !self.buf.starts_with('[') {
                match self.buf.find('[') {
                    Some(open) => {
                        let text: String = self.buf.drain(..open).collect();
                        out.push(Token::Narrative(text));
                        continue;
                    }
                    None => {
                        out.push(Token::Narrative(std::mem::take(&mut self.buf)));
                        return;
                    }
                }
            }

            let rest = &self.buf[1..];
            let close = rest.find(']').map(|i| i + 1);
            let inner_open = rest.find('[').map(|i| i + 1);

            match (close, inner_open) {
                (Some(close), open) if open.map_or(true, |open| close < open) => {
                    let len = close + 1;
                    let segment: String = self.buf.drain(..len).collect();
                    let token = if len <= self.max_len {
                        recognize(&segment, true)
                    } else {
                        None
                    };
                    out.push(match token {
                        Some(tag) => Token::Tag(tag),
                        None => Token::Narrative(segment),
                    });
                }
                (_, Some(open)) => {
                    let text: String = self.buf.drain(..open).collect();
                    out.push(Token::Narrative(text));
                }
                (_, None) => {
                    if end_of_stream {
                        let segment = std::mem::take(&mut self.buf);
                        let token = if segment.len() < self.max_len {
                            recognize(&segment, false)
                        } else {
                            None
                        };
                        out.push(match token {
                            Some(tag) => Token::Tag(tag),
                            None => Token::Narrative(segment),
                        });
                    } else if self.buf.len() >= self.max_len {
                        // No closing bracket can keep this within the limit.
                        out.push(Token::Narrative(std::mem::take(&mut self.buf)));
                    }
                    return;
                }
            }
        }
    }
}

/// Match `[KEYWORD: payload]` (or the unclosed form at end of stream).
fn recognize(segment: &str, closed: bool) -> Option<TagToken> {
    let inner = segment.strip_prefix('[')?;
    let inner = if closed {
        inner.strip_suffix(']')?
    } else {
        inner
    };

    let name_len = inner
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .unwrap_or(inner.len());
    let keyword = Keyword::from_name(&inner[..name_len])?;
    let payload = inner[name_len..].strip_prefix(':')?;

    Some(TagToken {
        keyword,
        raw: segment.to_string(),
        payload: payload.trim().to_string(),
    })
}

/// Iterator adapter over text fragments that yields narrative only.
///
/// Recognised tags are collected and available through [`TagFilter::tags`]
/// once the iterator is exhausted. A voice callback, if set, fires the moment
/// a `STIMME` tag is recognised, before any narrative that follows it is
/// yielded.
pub struct TagFilter<'a, I> {
    source: I,
    scanner: Scanner,
    pending: VecDeque<Token>,
    tags: Vec<TagToken>,
    full: String,
    on_voice: Option<Box<dyn FnMut(&str) + 'a>>,
    exhausted: bool,
}

impl<'a, I> TagFilter<'a, I>
where
    I: Iterator,
    I::Item: AsRef<str>,
{
    pub fn new(source: I) -> Self {
        Self {
            source,
            scanner: Scanner::new(),
            pending: VecDeque::new(),
            tags: Vec::new(),
            full: String::new(),
            on_voice: None,
            exhausted: false,
        }
    }

    pub fn with_max_len(mut self, max_len: usize) -> Self {
        self.scanner = Scanner::with_max_len(max_len);
        self
    }

    pub fn on_voice(mut self, callback: impl FnMut(&str) + 'a) -> Self {
        self.on_voice = Some(Box::new(callback));
        self
    }

    /// Tags recognised so far.
    pub fn tags(&self) -> &[TagToken] {
        &self.tags
    }

    /// Everything read from the source so far, tags included.
    pub fn full(&self) -> &str {
        &self.full
    }

    fn release(&mut self, tag: TagToken) {
        if let (Some(callback), Ok(ControlTag::VoiceSwitch { role })) =
            (self.on_voice.as_mut(), tag.decode())
        {
            callback(&role);
        }
        self.tags.push(tag);
    }
}

impl<'a, I> Iterator for TagFilter<'a, I>
where
    I: Iterator,
    I::Item: AsRef<str>,
{
    type Item = String;

    fn next(&mut self) -> Option<String> {
        loop {
            match self.pending.pop_front() {
                Some(Token::Narrative(text)) if !text.is_empty() => return Some(text),
                Some(Token::Narrative(_)) => continue,
                Some(Token::Tag(tag)) => {
                    self.release(tag);
                    continue;
                }
                None => {}
            }
            if self.exhausted {
                return None;
            }
            match self.source.next() {
                Some(fragment) => {
                    let fragment = fragment.as_ref();
                    self.full.push_str(fragment);
                    self.pending.extend(self.scanner.push(fragment));
                }
                None => {
                    self.exhausted = true;
                    self.pending.extend(self.scanner.finish());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn scan_chunks(chunks: &[&str], max_len: usize) -> Vec<Token> {
        let mut scanner = Scanner::with_max_len(max_len);
        let mut tokens = Vec::new();
        for chunk in chunks {
            tokens.extend(scanner.push(chunk));
        }
        tokens.extend(scanner.finish());
        tokens
    }

    fn narrative(tokens: &[Token]) -> String {
        tokens.iter().filter_map(Token::as_narrative).collect()
    }

    fn raw(tokens: &[Token]) -> String {
        tokens.iter().map(Token::raw).collect()
    }

    fn keywords(tokens: &[Token]) -> Vec<Keyword> {
        tokens
            .iter()
            .filter_map(Token::as_tag)
            .map(|t| t.keyword)
            .collect()
    }

    #[test]
    fn test_tag_split_across_fragments() {
        let chunks = ["Der Wind heult. [PRO", "BE: Horchen | 4", "0] Stille."];
        let tokens = scan_chunks(&chunks, DEFAULT_MAX_TAG_LEN);
        assert_eq!(narrative(&tokens), "Der Wind heult.  Stille.");
        assert_eq!(keywords(&tokens), vec![Keyword::Probe]);
        assert_eq!(raw(&tokens), chunks.concat());

        let tag = tokens.iter().find_map(Token::as_tag).unwrap();
        assert_eq!(tag.raw, "[PROBE: Horchen | 40]");
        assert_eq!(tag.payload, "Horchen | 40");
    }

    #[test]
    fn test_narrative_released_before_bracket_closes() {
        let mut scanner = Scanner::new();
        let tokens = scanner.push("Hallo [PRO");
        assert_eq!(tokens, vec![Token::Narrative("Hallo ".to_string())]);
        assert!(scanner.is_buffering());
    }

    #[test]
    fn test_unknown_bracket_is_narrative() {
        let tokens = scan_chunks(&["Er sagt [leise] etwas."], DEFAULT_MAX_TAG_LEN);
        assert!(keywords(&tokens).is_empty());
        assert_eq!(narrative(&tokens), "Er sagt [leise] etwas.");
    }

    #[test]
    fn test_keyword_without_colon_is_narrative() {
        let tokens = scan_chunks(&["[PROBE] und [probe: Horchen | 30]"], DEFAULT_MAX_TAG_LEN);
        assert_eq!(keywords(&tokens), vec![Keyword::Probe]);
        assert_eq!(narrative(&tokens), "[PROBE] und ");
    }

    #[test]
    fn test_colon_must_follow_keyword() {
        let tokens = scan_chunks(&["[FAKT : {\"a\": 1}] [FAKT:{\"b\": 2}]"], DEFAULT_MAX_TAG_LEN);
        assert_eq!(keywords(&tokens), vec![Keyword::Fakt]);
        assert_eq!(narrative(&tokens), "[FAKT : {\"a\": 1}] ");
    }

    #[test]
    fn test_inner_bracket_ends_segment() {
        let tokens = scan_chunks(&["[alt [WETTER: Nebel]"], DEFAULT_MAX_TAG_LEN);
        assert_eq!(narrative(&tokens), "[alt ");
        assert_eq!(keywords(&tokens), vec![Keyword::Wetter]);
    }

    #[test]
    fn test_unterminated_unknown_bracket_at_end() {
        let input = "Der Raum ist kalt. [WETTE";
        let tokens = scan_chunks(&[input], DEFAULT_MAX_TAG_LEN);
        assert!(keywords(&tokens).is_empty());
        assert_eq!(narrative(&tokens), input);
    }

    #[test]
    fn test_implicit_close_at_end() {
        let tokens = scan_chunks(&["Ende. [STIMME: ", "keeper"], DEFAULT_MAX_TAG_LEN);
        let tag = tokens.iter().find_map(Token::as_tag).unwrap();
        assert_eq!(tag.keyword, Keyword::Stimme);
        assert_eq!(tag.raw, "[STIMME: keeper");
        assert_eq!(raw(&tokens), "Ende. [STIMME: keeper");
    }

    #[test]
    fn test_overlong_bracket_degrades_to_narrative() {
        let input = format!("A [WETTER: {}] B", "x".repeat(40));

        // Batch
        let tokens = scan_chunks(&[&input], 20);
        assert!(keywords(&tokens).is_empty());
        assert_eq!(narrative(&tokens), input);

        // One character at a time
        let chars: Vec<String> = input.chars().map(String::from).collect();
        let refs: Vec<&str> = chars.iter().map(String::as_str).collect();
        let tokens = scan_chunks(&refs, 20);
        assert!(keywords(&tokens).is_empty());
        assert_eq!(narrative(&tokens), input);
    }

    #[test]
    fn test_tag_at_exact_limit() {
        let tag = "[WETTER: Nebel]";
        let tokens = scan_chunks(&[tag], tag.len());
        assert_eq!(keywords(&tokens), vec![Keyword::Wetter]);

        let tokens = scan_chunks(&[tag], tag.len() - 1);
        assert!(keywords(&tokens).is_empty());
    }

    #[test]
    fn test_multibyte_text_round_trips() {
        let chunks = ["Äußerst düster… [FAKT: {\"grü", "n\": \"ja\"}] Ende ✓"];
        let tokens = scan_chunks(&chunks, DEFAULT_MAX_TAG_LEN);
        assert_eq!(raw(&tokens), chunks.concat());
        assert_eq!(keywords(&tokens), vec![Keyword::Fakt]);
    }

    #[test]
    fn test_tag_filter_collects_tags() {
        let chunks = vec!["Du liest. [FERTIGKEIT_", "GENUTZT: Okkultismus] Weiter."];
        let mut filter = TagFilter::new(chunks.into_iter());
        let spoken: String = filter.by_ref().collect();
        assert_eq!(spoken, "Du liest.  Weiter.");
        assert_eq!(filter.tags().len(), 1);
        assert_eq!(filter.full(), "Du liest. [FERTIGKEIT_GENUTZT: Okkultismus] Weiter.");
    }

    #[test]
    fn test_tag_filter_voice_switches_before_following_text() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let voice_log = Rc::clone(&log);
        let chunks = vec!["Er dreht sich um. [STIMME: Wirt]", "\"Was wollt Ihr?\""];

        let filter = TagFilter::new(chunks.into_iter())
            .on_voice(move |role| voice_log.borrow_mut().push(format!("voice:{role}")));
        for text in filter {
            log.borrow_mut().push(format!("text:{text}"));
        }

        assert_eq!(
            *log.borrow(),
            vec![
                "text:Er dreht sich um. ".to_string(),
                "voice:wirt".to_string(),
                "text:\"Was wollt Ihr?\"".to_string(),
            ]
        );
    }
}
