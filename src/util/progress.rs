use std::io::IsTerminal;

use indicatif::{ProgressBar, ProgressStyle};

/// 長いループ用のプログレスバーを作る。標準エラーが端末でなければ非表示。
#[must_use]
pub fn progress_bar(len: usize, label: &str) -> ProgressBar {
    if !std::io::stderr().is_terminal() {
        return ProgressBar::hidden();
    }

    let bar = ProgressBar::new(len as u64);
    if let Ok(style) = ProgressStyle::default_bar()
        .template("{msg} {wide_bar:.cyan/blue} {pos}/{len} ({eta})")
    {
        bar.set_style(style.progress_chars("=> "));
    }
    bar.set_message(label.to_string());
    bar
}
