//! Minimal SVG charts for the run artifacts.

use crate::models::analysis::{AnalysisResult, SegmentCount};
use crate::models::quote::MarketCapCategory;
use std::collections::BTreeMap;
use std::fmt::Write;

const BAR_WIDTH: f64 = 40.0;
const CHART_HEIGHT: f64 = 320.0;
const MARGIN: f64 = 40.0;
const CELL: f64 = 48.0;

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Bar chart of the latest change percent per symbol.
pub fn returns_svg(result: &AnalysisResult) -> String {
    let bars: Vec<(&str, f64)> = result
        .stats
        .values()
        .filter_map(|s| s.change_percent.map(|c| (s.symbol.as_str(), c)))
        .collect();
    let width = MARGIN * 2.0 + BAR_WIDTH * bars.len().max(1) as f64;
    let height = CHART_HEIGHT + MARGIN * 2.0;
    let zero_y = MARGIN + CHART_HEIGHT / 2.0;
    let max_abs = bars.iter().map(|(_, c)| c.abs()).fold(0.0, f64::max).max(1e-9);
    let scale = (CHART_HEIGHT / 2.0) / max_abs;

    let mut svg = String::new();
    let _ = writeln!(
        svg,
        r#"<svg xmlns="http://www.w3.org/2000/svg" width="{:.0}" height="{:.0}" viewBox="0 0 {:.0} {:.0}">"#,
        width, height, width, height
    );
    let _ = writeln!(
        svg,
        r#"<text x="{:.1}" y="20" font-size="14" text-anchor="middle">Change % ({})</text>"#,
        width / 2.0,
        escape(&result.run_id)
    );
    for (i, (symbol, change)) in bars.iter().enumerate() {
        let x = MARGIN + BAR_WIDTH * i as f64 + 4.0;
        let h = change.abs() * scale;
        let y = if *change >= 0.0 { zero_y - h } else { zero_y };
        let color = if *change >= 0.0 { "#2e7d32" } else { "#c62828" };
        let _ = writeln!(
            svg,
            r#"<rect x="{:.1}" y="{:.1}" width="{:.1}" height="{:.1}" fill="{}"><title>{} {:+.2}%</title></rect>"#,
            x,
            y,
            BAR_WIDTH - 8.0,
            h,
            color,
            escape(symbol),
            change
        );
        let _ = writeln!(
            svg,
            r#"<text x="{:.1}" y="{:.1}" font-size="10" text-anchor="middle">{}</text>"#,
            x + (BAR_WIDTH - 8.0) / 2.0,
            height - MARGIN / 2.0,
            escape(symbol)
        );
    }
    let _ = writeln!(
        svg,
        r##"<line x1="{:.1}" y1="{:.1}" x2="{:.1}" y2="{:.1}" stroke="#333"/>"##,
        MARGIN,
        zero_y,
        width - MARGIN,
        zero_y
    );
    svg.push_str("</svg>\n");
    svg
}

/// One non-negative bar per label, scaled to the tallest.
fn bar_chart(title: &str, bars: &[(String, f64, String)], color: &str) -> String {
    let width = MARGIN * 2.0 + BAR_WIDTH * bars.len().max(1) as f64;
    let height = CHART_HEIGHT + MARGIN * 2.0;
    let base_y = MARGIN + CHART_HEIGHT;
    let max = bars.iter().map(|(_, v, _)| *v).fold(0.0, f64::max).max(1e-9);
    let scale = CHART_HEIGHT / max;

    let mut svg = String::new();
    let _ = writeln!(
        svg,
        r#"<svg xmlns="http://www.w3.org/2000/svg" width="{:.0}" height="{:.0}" viewBox="0 0 {:.0} {:.0}">"#,
        width, height, width, height
    );
    let _ = writeln!(
        svg,
        r#"<text x="{:.1}" y="20" font-size="14" text-anchor="middle">{}</text>"#,
        width / 2.0,
        escape(title)
    );
    for (i, (label, value, tip)) in bars.iter().enumerate() {
        let x = MARGIN + BAR_WIDTH * i as f64 + 4.0;
        let h = value.max(0.0) * scale;
        let _ = writeln!(
            svg,
            r#"<rect x="{:.1}" y="{:.1}" width="{:.1}" height="{:.1}" fill="{}"><title>{}: {}</title></rect>"#,
            x,
            base_y - h,
            BAR_WIDTH - 8.0,
            h,
            color,
            escape(label),
            escape(tip)
        );
        let _ = writeln!(
            svg,
            r#"<text x="{:.1}" y="{:.1}" font-size="9" text-anchor="middle">{}</text>"#,
            x + (BAR_WIDTH - 8.0) / 2.0,
            height - MARGIN / 2.0,
            escape(label)
        );
    }
    let _ = writeln!(
        svg,
        r##"<line x1="{:.1}" y1="{:.1}" x2="{:.1}" y2="{:.1}" stroke="#333"/>"##,
        MARGIN,
        base_y,
        width - MARGIN,
        base_y
    );
    svg.push_str("</svg>\n");
    svg
}

fn count_bars(counts: &[SegmentCount]) -> Vec<(String, f64, String)> {
    counts
        .iter()
        .map(|c| (c.label.clone(), c.count as f64, c.count.to_string()))
        .collect()
}

/// Average daily volume per symbol.
pub fn volume_svg(result: &AnalysisResult) -> String {
    let bars: Vec<(String, f64, String)> = result
        .stats
        .values()
        .map(|s| (s.symbol.clone(), s.avg_volume, format!("{:.0}", s.avg_volume)))
        .collect();
    bar_chart(&format!("Average volume ({})", result.run_id), &bars, "#1565c0")
}

/// Symbol count per price range bin.
pub fn price_distribution_svg(result: &AnalysisResult) -> String {
    let bars = count_bars(&result.market.segments.price_ranges);
    bar_chart(&format!("Price ranges ({})", result.run_id), &bars, "#6a1b9a")
}

/// Symbol count per market cap category, average change in the tooltip.
pub fn market_cap_svg(result: &AnalysisResult) -> String {
    let mut changes: BTreeMap<&str, Vec<f64>> = BTreeMap::new();
    for s in result.stats.values() {
        let category = result
            .quotes
            .get(&s.symbol)
            .map_or(MarketCapCategory::Unknown, |q| q.market_cap_category);
        if let Some(change) = s.change_percent {
            changes.entry(category.label()).or_default().push(change);
        }
    }

    let bars: Vec<(String, f64, String)> = result
        .market
        .segments
        .market_cap
        .iter()
        .map(|c| {
            let tip = match changes.get(c.label.as_str()) {
                Some(values) => format!(
                    "{} symbols, avg change {:+.2}%",
                    c.count,
                    crate::analysis::stats::mean(values)
                ),
                None => format!("{} symbols", c.count),
            };
            (c.label.clone(), c.count as f64, tip)
        })
        .collect();
    bar_chart(&format!("Market cap ({})", result.run_id), &bars, "#ef6c00")
}

// 正相关为红色，负相关为蓝色，缺失为灰色
fn heat_color(value: Option<f64>) -> String {
    match value {
        None => "#e0e0e0".to_string(),
        Some(v) => {
            let t = v.clamp(-1.0, 1.0).abs();
            let fade = (255.0 * (1.0 - t)).round() as u8;
            if v >= 0.0 {
                format!("#ff{:02x}{:02x}", fade, fade)
            } else {
                format!("#{:02x}{:02x}ff", fade, fade)
            }
        }
    }
}

/// Symmetric heatmap over the analysed symbols; the diagonal is 1.
pub fn correlation_svg(result: &AnalysisResult) -> String {
    let symbols: Vec<&str> = result.stats.keys().map(|s| s.as_str()).collect();
    let n = symbols.len();
    let size = MARGIN * 2.0 + CELL * n as f64;

    let mut svg = String::new();
    let _ = writeln!(
        svg,
        r#"<svg xmlns="http://www.w3.org/2000/svg" width="{:.0}" height="{:.0}" viewBox="0 0 {:.0} {:.0}">"#,
        size, size, size, size
    );
    for (i, a) in symbols.iter().enumerate() {
        let _ = writeln!(
            svg,
            r#"<text x="{:.1}" y="{:.1}" font-size="9" text-anchor="end">{}</text>"#,
            MARGIN - 2.0,
            MARGIN + CELL * i as f64 + CELL / 2.0,
            escape(a)
        );
        let _ = writeln!(
            svg,
            r#"<text x="{:.1}" y="{:.1}" font-size="9" text-anchor="middle">{}</text>"#,
            MARGIN + CELL * i as f64 + CELL / 2.0,
            MARGIN - 4.0,
            escape(a)
        );
        for (j, b) in symbols.iter().enumerate() {
            let value = if i == j { Some(1.0) } else { result.correlation(a, b) };
            let label = value.map(|v| format!("{:.2}", v)).unwrap_or_else(|| "n/a".to_string());
            let (x, y) = (MARGIN + CELL * j as f64, MARGIN + CELL * i as f64);
            let _ = writeln!(
                svg,
                r#"<rect x="{:.1}" y="{:.1}" width="{:.1}" height="{:.1}" fill="{}"><title>{} / {}: {}</title></rect>"#,
                x,
                y,
                CELL,
                CELL,
                heat_color(value),
                escape(a),
                escape(b),
                label
            );
            let _ = writeln!(
                svg,
                r#"<text x="{:.1}" y="{:.1}" font-size="9" text-anchor="middle">{}</text>"#,
                x + CELL / 2.0,
                y + CELL / 2.0 + 3.0,
                label
            );
        }
    }
    svg.push_str("</svg>\n");
    svg
}
