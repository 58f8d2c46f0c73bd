use chrono::{Duration, TimeZone, Utc};
use proptest::prelude::*;
use stock_pipeline::config::{CleaningConfig, ImputeStrategy};
use stock_pipeline::models::{Dataset, Record, TimeWindow};
use stock_pipeline::services::Cleaner;

const SYMBOLS: [&str; 3] = ["AAPL", "MSFT", "NVDA"];

fn price() -> impl Strategy<Value = Option<f64>> {
    prop_oneof![
        6 => (0.01f64..5_000.0).prop_map(Some),
        2 => Just(None::<f64>),
        1 => Just(Some(-3.0)),
        1 => Just(Some(0.0)),
        1 => Just(Some(f64::NAN)),
    ]
}

fn record() -> impl Strategy<Value = Record> {
    (
        prop::sample::select(SYMBOLS.to_vec()),
        0i64..40,
        0i64..1_000,
        prop::sample::select(vec!["yahoo", "yahoo_quote"]),
        price(),
        price(),
        price(),
        price(),
        prop::option::of(0u64..50_000_000),
    )
        .prop_map(|(symbol, day, millis, source, open, high, low, close, volume)| {
            let base = Utc.with_ymd_and_hms(2025, 1, 1, 14, 30, 0).unwrap();
            let ts = base + Duration::days(day) + Duration::milliseconds(millis);
            let mut r = Record::new(symbol, ts, source);
            r.open = open;
            r.high = high;
            r.low = low;
            r.close = close;
            r.volume = volume;
            r
        })
}

fn dataset(records: Vec<Record>) -> Dataset {
    let start = Utc.with_ymd_and_hms(2024, 12, 1, 0, 0, 0).unwrap();
    let end = Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap();
    let symbols: Vec<String> = SYMBOLS.iter().map(|s| s.to_string()).collect();
    Dataset::new("prop", end, &symbols, TimeWindow::new(start, end), records)
}

fn cleaner(mean: bool, max_missing: f64) -> Cleaner {
    Cleaner::new(CleaningConfig {
        max_missing_fraction: max_missing,
        impute: if mean { ImputeStrategy::Mean } else { ImputeStrategy::Nearest },
        ..CleaningConfig::default()
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(96))]

    #[test]
    fn cleaning_twice_changes_nothing(
        records in prop::collection::vec(record(), 0..120),
        mean in any::<bool>(),
        max_missing in prop_oneof![Just(0.0), Just(0.5), Just(1.0)],
    ) {
        let c = cleaner(mean, max_missing);
        let (once, _) = c.clean(&dataset(records));
        let (twice, report) = c.clean(&once);
        prop_assert_eq!(&twice, &once);
        prop_assert_eq!(report.imputed_values, 0);
        prop_assert!(report.dropped_symbols.is_empty());
    }

    #[test]
    fn cleaned_records_are_complete_and_ordered(
        records in prop::collection::vec(record(), 0..120),
        mean in any::<bool>(),
    ) {
        let (cleaned, _) = cleaner(mean, 0.5).clean(&dataset(records));
        for r in cleaned.records() {
            prop_assert!(r.is_complete(), "incomplete record {:?}", r);
            let (low, high) = (r.low.unwrap(), r.high.unwrap());
            for v in [r.open.unwrap(), r.close.unwrap()] {
                prop_assert!(v > 0.0 && low <= v && v <= high);
            }
            prop_assert_eq!(r.timestamp.timestamp_subsec_nanos(), 0);
        }
        let keys: Vec<_> = cleaned.records().iter().map(|r| r.key()).collect();
        prop_assert!(keys.windows(2).all(|w| w[0] < w[1]));
    }
}
