/// 端末で曖昧なタグを1件ずつ確認するレビュアー。
use std::collections::HashMap;
use std::io::{self, BufRead, Write};

use console::style;
use tracing::warn;

use super::segment::{Decision, Reviewer};
use crate::tagger::Morpheme;

const CONTEXT_WINDOW: usize = 3;

/// 同じ (形態素, タグ) に対して記憶した判断。
#[derive(Debug, Clone, PartialEq, Eq)]
enum Remembered {
    Keep,
    /// 以後は確認しない
    Skip,
    Retag(String),
}

/// 標準入出力で判断を求める [`Reviewer`]。
///
/// 選択肢は `e`（EFに変更）、`k`（維持）、`c`（任意のタグ）、`d`（行を削除）、
/// `s`（この形態素は以後確認しない）。末尾に `a` を付けると以後の同じ出現にも適用する。
pub struct TerminalReviewer {
    input: Box<dyn BufRead + Send>,
    output: Box<dyn Write + Send>,
    remembered: HashMap<(String, String), Remembered>,
    corrections: usize,
    deletions: usize,
}

impl std::fmt::Debug for TerminalReviewer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TerminalReviewer")
            .field("remembered", &self.remembered.len())
            .field("corrections", &self.corrections)
            .field("deletions", &self.deletions)
            .finish_non_exhaustive()
    }
}

impl TerminalReviewer {
    /// 標準入力・標準出力を使うレビュアー。
    #[must_use]
    pub fn stdio() -> Self {
        Self::with_io(io::BufReader::new(io::stdin()), io::stdout())
    }

    #[must_use]
    pub fn with_io(
        input: impl BufRead + Send + 'static,
        output: impl Write + Send + 'static,
    ) -> Self {
        Self {
            input: Box::new(input),
            output: Box::new(output),
            remembered: HashMap::new(),
            corrections: 0,
            deletions: 0,
        }
    }

    /// タグを変更した回数。
    #[must_use]
    pub fn corrections(&self) -> usize {
        self.corrections
    }

    /// 削除を選んだ回数。
    #[must_use]
    pub fn deletions(&self) -> usize {
        self.deletions
    }

    fn read_choice(&mut self, prompt: &str) -> io::Result<Option<String>> {
        write!(self.output, "{prompt}")?;
        self.output.flush()?;
        let mut line = String::new();
        if self.input.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim().to_string()))
    }

    fn show_context(&mut self, tokens: &[Morpheme], index: usize, sentence: &str) -> io::Result<()> {
        let token = &tokens[index];
        let start = index.saturating_sub(CONTEXT_WINDOW);
        let end = (index + CONTEXT_WINDOW + 1).min(tokens.len());
        let context = tokens[start..end]
            .iter()
            .enumerate()
            .map(|(offset, t)| {
                let pair = format!("{}/{}", t.text, t.tag);
                if start + offset == index {
                    format!("[{pair}]")
                } else {
                    pair
                }
            })
            .collect::<Vec<_>>()
            .join(" ");

        writeln!(
            self.output,
            "\n{} '{}' ({}) prob={:.4}",
            style("[Interactive Check] Ambiguous Token:").yellow().bold(),
            token.text,
            token.tag,
            token.probability
        )?;
        if !sentence.is_empty() {
            writeln!(self.output, "Full Sentence: \"{sentence}\"")?;
        }
        writeln!(self.output, "Context: ... {context} ...")?;
        Ok(())
    }

    fn show_options(&mut self) -> io::Result<()> {
        writeln!(self.output, "Options:")?;
        writeln!(self.output, "  [e] Change to EF")?;
        writeln!(self.output, "  [k] Keep (Don't change)")?;
        writeln!(self.output, "  [c] Custom Tag")?;
        writeln!(self.output, "  [d] Delete Sentence (Remove from dataset)")?;
        writeln!(self.output, "  [s] Skip (Don't ask again for this morph)")?;
        writeln!(self.output, "  Add 'a' to apply to all (e.g., 'ea', 'ka', 'ca')")?;
        Ok(())
    }

    fn prompt(&mut self, tokens: &[Morpheme], index: usize, sentence: &str) -> io::Result<Decision> {
        let key = (tokens[index].text.clone(), tokens[index].tag.clone());
        self.show_context(tokens, index, sentence)?;

        loop {
            self.show_options()?;
            let Some(raw) = self.read_choice("Choice: ")? else {
                // 入力が閉じたら以後は維持扱い
                return Ok(Decision::Keep);
            };
            let raw = raw.to_lowercase();
            let (choice, apply_all) = match raw.strip_suffix('a') {
                Some(head) if !head.is_empty() => (head.to_string(), true),
                _ => (raw, false),
            };

            match choice.as_str() {
                "e" => {
                    if apply_all {
                        self.remembered.insert(key, Remembered::Retag("EF".into()));
                    }
                    self.corrections += 1;
                    return Ok(Decision::Retag("EF".into()));
                }
                "k" => {
                    if apply_all {
                        self.remembered.insert(key, Remembered::Keep);
                    }
                    return Ok(Decision::Keep);
                }
                "d" => {
                    self.deletions += 1;
                    return Ok(Decision::Delete);
                }
                "s" => {
                    self.remembered.insert(key, Remembered::Skip);
                    return Ok(Decision::Keep);
                }
                "c" => {
                    let Some(tag) = self.read_choice("Enter new tag (e.g., JX, MAG): ")? else {
                        return Ok(Decision::Keep);
                    };
                    let tag = tag.to_uppercase();
                    if tag.is_empty() {
                        writeln!(self.output, "{}", style("Invalid tag.").red())?;
                        continue;
                    }
                    if apply_all {
                        self.remembered.insert(key, Remembered::Retag(tag.clone()));
                    }
                    self.corrections += 1;
                    return Ok(Decision::Retag(tag));
                }
                _ => writeln!(self.output, "{}", style("Invalid choice.").red())?,
            }
        }
    }
}

impl Reviewer for TerminalReviewer {
    fn review(&mut self, tokens: &[Morpheme], index: usize, sentence: &str) -> Decision {
        let token = &tokens[index];
        let key = (token.text.clone(), token.tag.clone());
        if let Some(remembered) = self.remembered.get(&key) {
            return match remembered {
                Remembered::Keep | Remembered::Skip => Decision::Keep,
                Remembered::Retag(tag) => {
                    let tag = tag.clone();
                    self.corrections += 1;
                    Decision::Retag(tag)
                }
            };
        }

        match self.prompt(tokens, index, sentence) {
            Ok(decision) => decision,
            Err(error) => {
                warn!(error = %error, morph = %token.text, "interactive review failed; keeping tag");
                Decision::Keep
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn tokens() -> Vec<Morpheme> {
        vec![
            Morpheme::new("가", "VV", 0.99),
            Morpheme::new("는데", "EC", 0.8),
            Morpheme::new("사람", "NNG", 0.99),
        ]
    }

    fn reviewer(script: &str) -> TerminalReviewer {
        TerminalReviewer::with_io(Cursor::new(script.to_string().into_bytes()), io::sink())
    }

    #[test]
    fn single_choice_is_not_remembered() {
        let mut reviewer = reviewer("e\nk\n");
        assert_eq!(reviewer.review(&tokens(), 1, "가는데 사람"), Decision::Retag("EF".into()));
        assert_eq!(reviewer.review(&tokens(), 1, "가는데 사람"), Decision::Keep);
        assert_eq!(reviewer.corrections(), 1);
    }

    #[test]
    fn apply_all_suffix_reuses_decision() {
        let mut reviewer = reviewer("ca\njx\n");
        assert_eq!(reviewer.review(&tokens(), 1, ""), Decision::Retag("JX".into()));
        // 入力を読まずに記憶した判断を返す
        assert_eq!(reviewer.review(&tokens(), 1, ""), Decision::Retag("JX".into()));
        assert_eq!(reviewer.corrections(), 2);
    }

    #[test]
    fn invalid_input_prompts_again_then_deletes() {
        let mut reviewer = reviewer("zz\nd\n");
        assert_eq!(reviewer.review(&tokens(), 1, ""), Decision::Delete);
        assert_eq!(reviewer.deletions(), 1);
    }

    #[test]
    fn skip_silences_later_occurrences() {
        let mut reviewer = reviewer("s\n");
        assert_eq!(reviewer.review(&tokens(), 1, ""), Decision::Keep);
        assert_eq!(reviewer.review(&tokens(), 1, ""), Decision::Keep);
        assert_eq!(reviewer.corrections(), 0);
    }

    #[test]
    fn closed_input_keeps_tag() {
        let mut reviewer = reviewer("");
        assert_eq!(reviewer.review(&tokens(), 1, ""), Decision::Keep);
    }
}
