/// 終結語尾（EF）を境に文を分割する。
///
/// 分割の前にタグの自動補正（[`refine_tokens`]）を行い、必要なら [`Reviewer`] に判断を委ねる。
use tracing::trace;

use super::{is_ending_suffix_tag, is_split_ending_tag};
use crate::tagger::Morpheme;

const NOMINAL_ENDINGS: [&str; 4] = ["ㅁ", "음", "기", "긔"];
const NEOLOGISM_ENDINGS: [&str; 5] = ["긔", "노", "나", "슨", "임"];
const NEOLOGISM_MAX_PROB: f64 = 0.9;
const REVIEW_EC_MAX_PROB: f64 = 0.92;

/// 曖昧なタグに対するレビュー結果。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// タグを変更しない
    Keep,
    /// 指定したタグに置き換える
    Retag(String),
    /// 文（を含む行）をデータセットから除外する
    Delete,
}

/// 曖昧な形態素のタグを判断するレビュアー。
pub trait Reviewer {
    /// `tokens[index]` のタグについて判断する。`tokens` は補正前の形態素列。
    fn review(&mut self, tokens: &[Morpheme], index: usize, sentence: &str) -> Decision;
}

#[derive(Debug, Clone, PartialEq)]
pub enum RefineOutcome {
    Refined(Vec<Morpheme>),
    /// レビュアーが削除を選んだ
    Deleted,
}

/// 分割された1文とその形態素列。
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub text: String,
    pub tokens: Vec<Morpheme>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SegmentOutcome {
    Segments(Vec<Segment>),
    Deleted,
}

/// 形態素列のタグを規則で補正する。
///
/// 1. 後ろに助詞が続かない名詞形語尾（ㅁ/음/기/긔, ETN）は EF
/// 2. 後ろに記号しかない EC は ECF
/// 3. 긔/노/나/슨/임 で確率 0.9 以下は EF
/// 4. `reviewer` があれば確率 0.92 以下の EC、ETN の ㅁ/음、すべての 임 を確認する
pub fn refine_tokens(
    tokens: &[Morpheme],
    sentence: &str,
    mut reviewer: Option<&mut (dyn Reviewer + '_)>,
) -> RefineOutcome {
    let mut refined = Vec::with_capacity(tokens.len());

    for (i, token) in tokens.iter().enumerate() {
        let morph = token.text.as_str();
        let mut new_tag = token.tag.clone();

        if token.tag == "ETN" && NOMINAL_ENDINGS.contains(&morph) {
            let followed_by_josa = tokens.get(i + 1).is_some_and(Morpheme::is_josa);
            if !followed_by_josa {
                new_tag = "EF".to_string();
            }
        }

        if token.tag == "EC" && tokens[i + 1..].iter().all(Morpheme::is_symbol) {
            new_tag = "ECF".to_string();
        }

        if NEOLOGISM_ENDINGS.contains(&morph) && token.probability <= NEOLOGISM_MAX_PROB {
            new_tag = "EF".to_string();
        }

        if let Some(reviewer) = reviewer.as_deref_mut() {
            let ask = (new_tag == "EC" && token.probability <= REVIEW_EC_MAX_PROB)
                || (new_tag == "ETN" && matches!(morph, "ㅁ" | "음"))
                || morph == "임";
            if ask {
                match reviewer.review(tokens, i, sentence) {
                    Decision::Keep => {}
                    Decision::Retag(tag) => new_tag = tag,
                    Decision::Delete => return RefineOutcome::Deleted,
                }
            }
        }

        if new_tag == token.tag {
            refined.push(token.clone());
        } else {
            trace!(morph, from = %token.tag, to = %new_tag, "retagged morpheme");
            refined.push(Morpheme {
                tag: new_tag,
                ..token.clone()
            });
        }
    }

    RefineOutcome::Refined(refined)
}

/// 各形態素の文中のバイト位置 `(start, end)` を求める。
///
/// カーソル位置から前方検索し、見つからなければ先頭から探す。
/// それでも見つからない形態素は `(cursor, cursor)`（幅0）になる。
#[must_use]
pub fn token_positions(sentence: &str, tokens: &[Morpheme]) -> Vec<(usize, usize)> {
    let mut positions = Vec::with_capacity(tokens.len());
    let mut cursor = 0;

    for token in tokens {
        let morph = token.text.as_str();
        if morph.is_empty() {
            positions.push((cursor, cursor));
            continue;
        }
        let found = sentence
            .get(cursor..)
            .and_then(|rest| rest.find(morph))
            .map(|offset| cursor + offset)
            .or_else(|| sentence.find(morph));
        match found {
            Some(start) => {
                let end = start + morph.len();
                positions.push((start, end));
                cursor = end;
            }
            None => positions.push((cursor, cursor)),
        }
    }
    positions
}

struct Buffer<'a> {
    sentence: &'a str,
    tokens: Vec<Morpheme>,
    start: Option<usize>,
    end: Option<usize>,
    segments: Vec<Segment>,
}

impl Buffer<'_> {
    fn push(&mut self, token: &Morpheme, (start, end): (usize, usize)) {
        self.tokens.push(token.clone());
        if self.start.is_none() {
            self.start = Some(start);
        }
        // 幅0（文中に見つからない）形態素は前の区間を延長する
        if end > start {
            self.end = Some(end);
        }
    }

    fn flush(&mut self, end: usize) {
        let Some(start) = self.start.take() else {
            return;
        };
        self.end = None;
        if self.tokens.is_empty() {
            return;
        }

        let mut tokens = std::mem::take(&mut self.tokens);
        if let Some(last) = tokens.last_mut() {
            if last.tag == "EC" {
                last.tag = "ECF".to_string();
            }
        }

        let text = if start <= end {
            self.sentence.get(start..end).unwrap_or_default()
        } else {
            ""
        };
        self.segments.push(Segment {
            text: text.trim().to_string(),
            tokens,
        });
    }
}

/// 文を終結語尾ごとに分割する。
///
/// EF の直後に続く助詞・EP・記号は同じ文に含める。分割位置は次の形態素の開始位置
/// （ただし現在の終端より前なら現在の終端）で、残りは文末まで1つにまとめる。
/// 文または形態素列が空なら入力をそのまま1文として返す。
pub fn segment_sentence_by_endings(
    sentence: &str,
    tokens: &[Morpheme],
    reviewer: Option<&mut (dyn Reviewer + '_)>,
) -> SegmentOutcome {
    if sentence.is_empty() || tokens.is_empty() {
        return SegmentOutcome::Segments(vec![Segment {
            text: sentence.to_string(),
            tokens: tokens.to_vec(),
        }]);
    }

    let tokens = match refine_tokens(tokens, sentence, reviewer) {
        RefineOutcome::Refined(tokens) => tokens,
        RefineOutcome::Deleted => return SegmentOutcome::Deleted,
    };
    let positions = token_positions(sentence, &tokens);

    let mut buffer = Buffer {
        sentence,
        tokens: Vec::new(),
        start: None,
        end: None,
        segments: Vec::new(),
    };

    let mut idx = 0;
    while idx < tokens.len() {
        buffer.push(&tokens[idx], positions[idx]);

        if !is_split_ending_tag(&tokens[idx].tag) {
            idx += 1;
            continue;
        }

        let mut lookahead = idx + 1;
        while lookahead < tokens.len() {
            let tag = tokens[lookahead].tag.as_str();
            if !(is_ending_suffix_tag(tag) || tag.starts_with('S')) {
                break;
            }
            buffer.push(&tokens[lookahead], positions[lookahead]);
            lookahead += 1;
        }

        let split_end = if lookahead < tokens.len() {
            let next_start = positions[lookahead].0;
            match buffer.end {
                Some(end) if next_start < end => end,
                _ => next_start,
            }
        } else {
            sentence.len()
        };
        buffer.flush(split_end);
        idx = lookahead;
    }

    buffer.flush(sentence.len());
    SegmentOutcome::Segments(buffer.segments)
}
