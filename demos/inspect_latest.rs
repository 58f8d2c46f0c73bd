use stock_pipeline::data_provider::DatasetStore;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 读取最近一次运行的结果
    let store = DatasetStore::new("data");
    let Some(latest) = store.load_latest()? else {
        println!("{} 中没有数据，请先运行 'cargo run -- run'", store.data_dir().display());
        return Ok(());
    };

    let dataset = &latest.dataset;
    println!("运行: {}", dataset.run_id());
    println!("标的: {}", dataset.symbols().join(", "));
    if let Some(ts) = dataset.latest_timestamp() {
        println!("最新数据时间: {}", ts);
    }

    // 获取特定股票最近5条数据
    let symbol = "AAPL";
    let series = dataset.series(symbol);
    if series.is_empty() {
        println!("未找到股票: {}", symbol);
    } else {
        println!("\n{} 最近5条数据:", symbol);
        println!("{:<12} {:>10} {:>10} {:>10} {:>10} {:>14}", "日期", "开盘", "最高", "最低", "收盘", "成交量");
        println!("{:-<72}", "");
        for r in series.iter().rev().take(5) {
            println!(
                "{:<12} {:>10.2} {:>10.2} {:>10.2} {:>10.2} {:>14}",
                r.timestamp.format("%Y-%m-%d"),
                r.open.unwrap_or_default(),
                r.high.unwrap_or_default(),
                r.low.unwrap_or_default(),
                r.close.unwrap_or_default(),
                r.volume.unwrap_or_default()
            );
        }
    }

    let Some(analysis) = &latest.analysis else {
        println!("\n没有分析结果");
        return Ok(());
    };
    println!("\n涨幅最大:");
    for m in &analysis.market.top_gainers {
        println!("  {}: {:+.2}%", m.symbol, m.change_percent);
    }
    println!("跌幅最大:");
    for m in &analysis.market.top_losers {
        println!("  {}: {:+.2}%", m.symbol, m.change_percent);
    }
    for c in analysis.strong_correlations(0.8) {
        println!("强相关: {} / {} = {:.2}", c.a, c.b, c.value);
    }
    Ok(())
}
