//! scraper の上に載せた小さな抽出ヘルパー。
use scraper::{ElementRef, Selector};

/// 定数のCSSセレクタをコンパイルする。
pub(crate) fn selector(css: &str) -> Selector {
    Selector::parse(css).unwrap_or_else(|error| panic!("invalid selector {css}: {error}"))
}

/// 子孫のテキストノードを前後の空白を除いて `sep` でつなぐ。空のノードは捨てる。
pub(crate) fn text_of(element: &ElementRef<'_>, sep: &str) -> String {
    element
        .text()
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .collect::<Vec<_>>()
        .join(sep)
}

/// `element` 配下で最初にマッチした要素。
pub(crate) fn first<'a>(element: &ElementRef<'a>, selector: &Selector) -> Option<ElementRef<'a>> {
    element.select(selector).next()
}

/// 最初にマッチした要素のテキスト（区切りなし）。空なら `None`。
pub(crate) fn first_text(element: &ElementRef<'_>, selector: &Selector) -> Option<String> {
    first(element, selector)
        .map(|node| text_of(&node, ""))
        .filter(|text| !text.is_empty())
}

/// 直下のテキストノードのうち、空でない最初のもの。
pub(crate) fn own_text(element: &ElementRef<'_>) -> Option<String> {
    element
        .children()
        .filter_map(|child| child.value().as_text().map(|text| text.trim().to_string()))
        .find(|text| !text.is_empty())
}

pub(crate) fn attr(element: &ElementRef<'_>, name: &str) -> Option<String> {
    element
        .value()
        .attr(name)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToString::to_string)
}

pub(crate) fn has_class(element: &ElementRef<'_>, class: &str) -> bool {
    element.value().classes().any(|c| c == class)
}

#[cfg(test)]
mod tests {
    use super::*;
    use scraper::Html;

    #[test]
    fn text_of_joins_stripped_nodes() {
        let html = Html::parse_fragment("<div> 첫 줄 <br> <p>둘째 <b>줄</b></p>  </div>");
        let div = html.select(&selector("div")).next().expect("div");
        assert_eq!(text_of(&div, "\n"), "첫 줄\n둘째\n줄");
        assert_eq!(text_of(&div, ""), "첫 줄둘째줄");
    }

    #[test]
    fn own_text_skips_child_elements() {
        let html = Html::parse_fragment(r#"<div class="side"> <a>링크</a> 작성자 <span>날짜</span></div>"#);
        let div = html.select(&selector("div.side")).next().expect("div");
        assert_eq!(own_text(&div).as_deref(), Some("작성자"));
        assert!(has_class(&div, "side"));
        assert!(attr(&div, "id").is_none());
    }
}
