use chrono::NaiveDate;
use scanner_core::{
    config::{Dashboard, ScannerConfig},
    engine::ScannerEngine,
    metrics::ComparisonKind,
    rank::SortOrder,
    types::FuturesListing,
};

const FUTURES: &str = r#"{"futures":[
    {"figi":"FUT_ABCZ5","ticker":"ABCZ5","expirationDate":"2025-12-10","basicAsset":"ABC","basicAssetSize":100,"assetType":"TYPE_SECURITY"},
    {"figi":"FUT_ABCH6","ticker":"ABCH6","expirationDate":"2026-03-10","basicAsset":"ABC","basicAssetSize":100,"assetType":"TYPE_SECURITY"}
]}"#;

const QUOTES: [&str; 3] = [
    r#"{"figi":"FUT_ABCH6","ticker":"ABCH6","currentPrice":10300,"totalVolume":40}"#,
    r#"{"figi":"EQ_ABC","ticker":"ABC","currentPrice":100,"totalVolume":5000}"#,
    r#"{"figi":"FUT_ABCZ5","ticker":"ABCZ5","currentPrice":10100,"totalVolume":250}"#,
];

fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 11, 10).unwrap()
}

fn engine(config: ScannerConfig) -> ScannerEngine {
    let mut engine = ScannerEngine::new(config);
    engine.load_derivatives(FuturesListing::from_json(FUTURES).unwrap().into_metadata());
    engine
}

fn approx(actual: f64, expected: f64) -> bool {
    (actual - expected).abs() < 1e-6
}

#[test]
fn test_futures_dashboard_end_to_end() {
    let mut engine = engine(ScannerConfig::new(Dashboard::Futures).with_key_rate(16.5));
    for message in QUOTES {
        engine.process_message(message).unwrap();
    }

    let snapshot = engine.snapshot_on(today());

    assert_eq!(snapshot.stock_near.len(), 1);
    let near = &snapshot.stock_near[0];
    assert_eq!(near.kind, ComparisonKind::EquityVsDerivative);
    assert_eq!(near.base_symbol, "ABC");
    assert_eq!(near.symbol2, "ABCZ5");
    assert!(approx(near.spread_percent, 1.0));
    assert!(approx(near.fair_spread_percent, 16.5 / 365.0 * 30.0));
    assert_eq!(near.delta_percent, -0.36);
    assert_eq!(near.days_to_expiration, Some(30));
    assert_eq!(near.volume1, 5_000.0);
    assert_eq!(near.volume2, 250.0);

    assert_eq!(snapshot.stock_far.len(), 1);
    let far = &snapshot.stock_far[0];
    assert_eq!(far.symbol2, "ABCH6");
    assert!(approx(far.spread_percent, 3.0));
    assert!(approx(far.fair_spread_percent, 16.5 / 365.0 * 120.0));
    assert_eq!(far.delta_percent, -2.42);

    assert_eq!(snapshot.near_far.len(), 1);
    let pair = &snapshot.near_far[0];
    assert_eq!(pair.kind, ComparisonKind::NearVsFarDerivative);
    assert_eq!(pair.symbol1, "ABCZ5");
    assert_eq!(pair.symbol2, "ABCH6");
    assert!(approx(pair.spread_percent, 1.980_198));
    assert!(approx(pair.fair_spread_percent, 16.5 / 365.0 * 90.0));
    assert_eq!(pair.delta_percent, -2.09);

    assert!(snapshot.gainers.is_empty());
    assert_eq!(snapshot.stats.active_instruments, 3);
    assert_eq!(snapshot.stats.total_volume, 5_290.0);
}

#[test]
fn test_arrival_order_does_not_change_output() {
    let config = ScannerConfig::new(Dashboard::Futures).with_key_rate(16.5);

    let mut forward = engine(config.clone());
    for message in QUOTES {
        forward.process_message(message).unwrap();
    }

    let mut reverse = engine(config);
    for message in QUOTES.iter().rev() {
        reverse.process_message(message).unwrap();
    }

    let forward = forward.snapshot_on(today());
    let reverse = reverse.snapshot_on(today());
    assert_eq!(forward.stock_near, reverse.stock_near);
    assert_eq!(forward.stock_far, reverse.stock_far);
    assert_eq!(forward.near_far, reverse.near_far);
    assert_eq!(forward.stats, reverse.stats);
}

#[test]
fn test_future_without_expiry_is_never_paired() {
    let mut engine = engine(
        ScannerConfig::new(Dashboard::Futures)
            .with_key_rate(16.5)
            .with_sort_order(SortOrder::VolumeDesc),
    );
    for message in QUOTES {
        engine.process_message(message).unwrap();
    }
    engine
        .process_message(r#"{"figi":"EQ_XYZ","ticker":"XYZ","currentPrice":50,"totalVolume":90000}"#)
        .unwrap();
    engine
        .process_message(r#"{"figi":"FUT_XYZ","ticker":"XYZZ5","currentPrice":5000}"#)
        .unwrap();

    // XYZZ5 has no metadata expiry, so it never becomes a near contract
    let snapshot = engine.snapshot_on(today());
    assert_eq!(snapshot.stock_near.len(), 1);
    assert_eq!(snapshot.stock_near[0].base_symbol, "ABC");
}

#[test]
fn test_missing_equity_price_skips_row() {
    let mut engine = engine(ScannerConfig::new(Dashboard::Futures).with_key_rate(16.5));
    engine
        .process_message(r#"{"figi":"EQ_ABC","ticker":"ABC","totalVolume":5000}"#)
        .unwrap();
    engine.process_message(QUOTES[2]).unwrap();
    engine.process_message(QUOTES[0]).unwrap();

    let snapshot = engine.snapshot_on(today());
    assert!(snapshot.stock_near.is_empty());
    assert!(snapshot.stock_far.is_empty());
    assert_eq!(snapshot.near_far.len(), 1);
}
