//! Finding runs of a short token repeated over and over, like `KR KR KR KR`
//! or `s s s s s`.
//!
//! OCR engines produce these when they hit table rules, dotted leaders or
//! halftone noise. The `regex` crate has no backreferences, so we scan for
//! them by hand. A run must:
//!
//! 1. Start at a word boundary.
//! 2. Consist of the same token, repeated `min_run` or more times, with
//!    whitespace between each copy.
//! 3. End at a word boundary.
//!
//! Where several token lengths would work, the longest one wins, and a run
//! always extends as far as it can.

use std::borrow::Cow;

/// How to recognize a run of repeated tokens.
#[derive(Clone, Copy, Debug)]
pub struct RepeatRule<F>
where
    F: Fn(char) -> bool,
{
    /// Which characters may appear in a token.
    pub is_token_char: F,
    /// Maximum token length, in characters.
    pub max_token_len: usize,
    /// Minimum number of copies of the token that make a run.
    pub min_run: usize,
}

impl<F> RepeatRule<F>
where
    F: Fn(char) -> bool,
{
    /// Remove every run matched by this rule. Whitespace around a removed
    /// run is left alone.
    pub fn remove_runs<'a>(&self, line: &'a str) -> Cow<'a, str> {
        let chars = line.chars().collect::<Vec<_>>();
        let mut output = String::with_capacity(line.len());
        let mut changed = false;
        let mut idx = 0;
        while idx < chars.len() {
            if let Some(end) = self.run_at(&chars, idx) {
                changed = true;
                idx = end;
            } else {
                output.push(chars[idx]);
                idx += 1;
            }
        }
        if changed {
            Cow::Owned(output)
        } else {
            Cow::Borrowed(line)
        }
    }

    /// If a run starts at `start`, return the index just past its end.
    fn run_at(&self, chars: &[char], start: usize) -> Option<usize> {
        if !(self.is_token_char)(chars[start]) || !is_word_boundary(chars, start) {
            return None;
        }
        for token_len in (1..=self.max_token_len).rev() {
            let token_end = start + token_len;
            if token_end > chars.len() {
                continue;
            }
            let token = &chars[start..token_end];
            if !token.iter().all(|&c| (self.is_token_char)(c)) {
                continue;
            }

            let mut copies = 1;
            let mut pos = token_end;
            let mut longest = None;
            loop {
                let mut next = pos;
                while next < chars.len() && chars[next].is_whitespace() {
                    next += 1;
                }
                if next == pos
                    || next + token_len > chars.len()
                    || chars[next..next + token_len] != *token
                {
                    break;
                }
                pos = next + token_len;
                copies += 1;
                if copies >= self.min_run && is_word_boundary(chars, pos) {
                    longest = Some(pos);
                }
            }
            if longest.is_some() {
                return longest;
            }
        }
        None
    }
}

/// Is this a "word" character, in the regex `\w` sense?
pub fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Is there a word boundary just before `chars[pos]`?
fn is_word_boundary(chars: &[char], pos: usize) -> bool {
    let before = pos > 0 && is_word_char(chars[pos - 1]);
    let after = pos < chars.len() && is_word_char(chars[pos]);
    before != after
}
