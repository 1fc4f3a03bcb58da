/// 集計結果のSVG棒グラフ。
use std::fmt::Write as _;

const WIDTH_PER_GROUP: f64 = 90.0;
const MIN_WIDTH: f64 = 480.0;
const HEIGHT: f64 = 420.0;
const MARGIN_LEFT: f64 = 60.0;
const MARGIN_RIGHT: f64 = 160.0;
const MARGIN_TOP: f64 = 40.0;
const MARGIN_BOTTOM: f64 = 70.0;
const GRID_LINES: usize = 5;
const PALETTE: [&str; 8] = [
    "#4e79a7", "#f28e2b", "#e15759", "#76b7b2", "#59a14f", "#edc948", "#b07aa1", "#ff9da7",
];

/// 1つの凡例に対応する値の列。`values` はグループと同じ順。
#[derive(Debug, Clone, PartialEq)]
pub struct BarSeries {
    pub name: String,
    pub values: Vec<f64>,
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// グループ化した縦棒グラフ。y軸は0から系列の最大値まで。
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn grouped_bar_chart(title: &str, groups: &[String], series: &[BarSeries]) -> String {
    let plot_width = (groups.len() as f64 * WIDTH_PER_GROUP).max(MIN_WIDTH - MARGIN_LEFT - MARGIN_RIGHT);
    let width = MARGIN_LEFT + plot_width + MARGIN_RIGHT;
    let plot_height = HEIGHT - MARGIN_TOP - MARGIN_BOTTOM;
    let baseline = MARGIN_TOP + plot_height;
    let max_value = series
        .iter()
        .flat_map(|s| s.values.iter().copied())
        .fold(0.0_f64, f64::max);
    let scale = if max_value > 0.0 { plot_height / max_value } else { 0.0 };

    let mut svg = String::new();
    // String への書き込みは失敗しない
    let _ = writeln!(
        svg,
        r#"<svg xmlns="http://www.w3.org/2000/svg" width="{width:.0}" height="{HEIGHT:.0}" font-family="sans-serif" font-size="12">"#
    );
    let _ = writeln!(svg, r#"<rect width="100%" height="100%" fill="white"/>"#);
    let _ = writeln!(
        svg,
        r#"<text x="{:.1}" y="24" text-anchor="middle" font-size="16">{}</text>"#,
        width / 2.0,
        escape(title)
    );

    for i in 0..=GRID_LINES {
        let fraction = i as f64 / GRID_LINES as f64;
        let y = baseline - plot_height * fraction;
        let _ = writeln!(
            svg,
            r##"<line x1="{MARGIN_LEFT:.1}" y1="{y:.1}" x2="{:.1}" y2="{y:.1}" stroke="#dddddd"/>"##,
            MARGIN_LEFT + plot_width
        );
        let _ = writeln!(
            svg,
            r#"<text x="{:.1}" y="{:.1}" text-anchor="end">{:.2}</text>"#,
            MARGIN_LEFT - 6.0,
            y + 4.0,
            max_value * fraction
        );
    }

    let group_width = if groups.is_empty() { plot_width } else { plot_width / groups.len() as f64 };
    let bar_width = if series.is_empty() { 0.0 } else { group_width * 0.8 / series.len() as f64 };
    for (g, group) in groups.iter().enumerate() {
        let group_x = MARGIN_LEFT + group_width * g as f64 + group_width * 0.1;
        for (s, line) in series.iter().enumerate() {
            let value = line.values.get(g).copied().unwrap_or(0.0);
            let height = value * scale;
            let _ = writeln!(
                svg,
                r#"<rect x="{:.1}" y="{:.1}" width="{:.1}" height="{:.1}" fill="{}"><title>{}: {:.3}</title></rect>"#,
                group_x + bar_width * s as f64,
                baseline - height,
                bar_width,
                height,
                PALETTE[s % PALETTE.len()],
                escape(&line.name),
                value
            );
        }
        let _ = writeln!(
            svg,
            r#"<text x="{:.1}" y="{:.1}" text-anchor="middle">{}</text>"#,
            MARGIN_LEFT + group_width * (g as f64 + 0.5),
            baseline + 18.0,
            escape(group)
        );
    }

    let _ = writeln!(
        svg,
        r#"<line x1="{MARGIN_LEFT:.1}" y1="{baseline:.1}" x2="{:.1}" y2="{baseline:.1}" stroke="black"/>"#,
        MARGIN_LEFT + plot_width
    );

    // 凡例
    let legend_x = MARGIN_LEFT + plot_width + 20.0;
    for (s, line) in series.iter().enumerate() {
        let y = MARGIN_TOP + 20.0 * s as f64;
        let _ = writeln!(
            svg,
            r#"<rect x="{legend_x:.1}" y="{y:.1}" width="12" height="12" fill="{}"/>"#,
            PALETTE[s % PALETTE.len()]
        );
        let _ = writeln!(
            svg,
            r#"<text x="{:.1}" y="{:.1}">{}</text>"#,
            legend_x + 18.0,
            y + 10.0,
            escape(&line.name)
        );
    }
    svg.push_str("</svg>\n");
    svg
}
