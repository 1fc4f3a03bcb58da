/// テキスト処理ユーティリティ。

/// テキストを文に分割する。
///
/// `.` `!` `?` の直後に続く空白でのみ分割し、空白自体は捨てる。
/// 各文は前後の空白を除去し、空文は含めない。
#[must_use]
pub fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut prev: Option<char> = None;
    let mut chars = text.char_indices().peekable();

    while let Some((idx, ch)) = chars.next() {
        if ch.is_whitespace() && matches!(prev, Some('.' | '!' | '?')) {
            push_trimmed(&mut sentences, &text[start..idx]);
            let mut end = idx + ch.len_utf8();
            while let Some(&(next_idx, next)) = chars.peek() {
                if !next.is_whitespace() {
                    break;
                }
                end = next_idx + next.len_utf8();
                chars.next();
            }
            start = end;
            prev = None;
            continue;
        }
        prev = Some(ch);
    }
    push_trimmed(&mut sentences, &text[start..]);

    sentences
}

fn push_trimmed(sentences: &mut Vec<String>, piece: &str) {
    let trimmed = piece.trim();
    if !trimmed.is_empty() {
        sentences.push(trimmed.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_sentences_handles_korean_text() {
        let sentences = split_sentences("오늘 날씨 좋다. 밥 먹었어?  진짜!\n응");
        assert_eq!(sentences, vec!["오늘 날씨 좋다.", "밥 먹었어?", "진짜!", "응"]);
    }

    #[test]
    fn split_sentences_keeps_ellipsis_runs_together() {
        let sentences = split_sentences("그래서... 어쩌라고?? ㅋㅋ");
        assert_eq!(sentences, vec!["그래서...", "어쩌라고??", "ㅋㅋ"]);
    }

    #[test]
    fn split_sentences_does_not_split_without_whitespace() {
        assert_eq!(split_sentences("a.b!c"), vec!["a.b!c"]);
    }

    #[test]
    fn split_sentences_filters_empty() {
        assert!(split_sentences("   ").is_empty());
    }
}
