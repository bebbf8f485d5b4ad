use rand::Rng;
use surge_metrics::{
    Aggregator, AggregatorConfig, PeriodData, QuantileSketch, deserialize_metrics,
    deserialize_metrics_list, merge_buckets, pack, serialize_metrics, serialize_metrics_list,
};

const BASE: u64 = 1_700_000_040_000 - 1_700_000_040_000 % 60_000;

fn window_with_samples(period_offset: u64, samples: &[f64], counter: u64) -> PeriodData {
    let mut agg = Aggregator::new(AggregatorConfig::default());
    let ts = BASE + period_offset;
    for s in samples {
        agg.observe_histogram("http.response_time", *s, ts);
    }
    agg.incr_counter("http.codes.200", counter, ts);
    agg.observe_rate("http.request_rate", ts);
    let mut out = agg.flush(ts + 1);
    assert_eq!(out.len(), 1);
    out.remove(0)
}

fn p50(data: &PeriodData) -> f64 {
    data.histogram("http.response_time")
        .and_then(|s| s.quantile(0.5).ok().flatten())
        .unwrap_or_else(|| panic!("missing p50"))
}

fn uniform_samples(n: usize) -> Vec<f64> {
    let mut rng = rand::rng();
    (0..n).map(|_| rng.random_range(1.0..1000.0)).collect()
}

#[test]
fn serialized_window_round_trips_within_relative_accuracy() {
    let samples = uniform_samples(5_000);
    let data = window_with_samples(0, &samples, 5_000);

    let json = serialize_metrics(&data).unwrap_or_else(|e| panic!("serialize failed: {e}"));
    assert!(json.contains("\"b64:"));

    let back = deserialize_metrics(&json).unwrap_or_else(|e| panic!("deserialize failed: {e}"));
    assert_eq!(back.period, data.period);
    assert_eq!(back.counter("http.codes.200"), 5_000);
    assert_eq!(back.rate("http.request_rate"), data.rate("http.request_rate"));

    let mut sorted = samples.clone();
    sorted.sort_by(f64::total_cmp);
    let exact = sorted[sorted.len() / 2];
    let approx = p50(&back);
    assert!(
        (approx - exact).abs() <= exact * 0.011,
        "p50 {approx} vs exact {exact}"
    );
    assert_eq!(approx, p50(&data));
}

#[test]
fn empty_histogram_survives_serialization() {
    let mut data = PeriodData::new(BASE);
    data.histograms
        .insert("empty".to_string(), QuantileSketch::default());
    let json = serialize_metrics(&data).unwrap_or_else(|e| panic!("serialize failed: {e}"));
    assert!(json.contains("\"empty\":\"\""));
    let back = deserialize_metrics(&json).unwrap_or_else(|e| panic!("deserialize failed: {e}"));
    assert!(back.histogram("empty").is_some_and(QuantileSketch::is_empty));
}

#[test]
fn window_lists_round_trip() {
    let list = vec![
        window_with_samples(0, &[1.0, 2.0], 2),
        window_with_samples(10_000, &[3.0], 1),
    ];
    let json = serialize_metrics_list(&list).unwrap_or_else(|e| panic!("serialize failed: {e}"));
    let back = deserialize_metrics_list(&json).unwrap_or_else(|e| panic!("deserialize failed: {e}"));
    assert_eq!(back.len(), 2);
    assert_eq!(back[1].period, BASE + 10_000);
}

#[test]
fn pack_is_associative_for_counters() {
    let a = window_with_samples(0, &uniform_samples(100), 3);
    let b = window_with_samples(10_000, &uniform_samples(100), 5);
    let c = window_with_samples(20_000, &uniform_samples(100), 7);

    let flat = pack([a.clone(), b.clone(), c.clone()])
        .unwrap_or_else(|e| panic!("pack failed: {e}"));
    let inner = pack([a, b]).unwrap_or_else(|e| panic!("pack failed: {e}"));
    let nested = pack([inner, c]).unwrap_or_else(|e| panic!("pack failed: {e}"));

    assert_eq!(flat.counters, nested.counters);
    assert_eq!(flat.counter("http.codes.200"), 15);
    assert_eq!(flat.period, BASE + 20_000);
    assert_eq!(
        flat.histogram("http.response_time").map(QuantileSketch::count),
        Some(300)
    );
}

#[test]
fn packed_p50_matches_sketch_of_all_raw_samples() {
    let chunks: Vec<Vec<f64>> = (0..4).map(|_| uniform_samples(1_000)).collect();
    let windows: Vec<PeriodData> = chunks
        .iter()
        .enumerate()
        .map(|(i, s)| window_with_samples(i as u64 * 10_000, s, 1))
        .collect();
    let packed = pack(windows).unwrap_or_else(|e| panic!("pack failed: {e}"));

    let mut raw = QuantileSketch::default();
    for v in chunks.iter().flatten() {
        raw.add(*v);
    }
    let expected = raw
        .quantile(0.5)
        .ok()
        .flatten()
        .unwrap_or_else(|| panic!("missing raw p50"));
    let got = p50(&packed);
    assert!(
        (got - expected).abs() <= expected * 0.02,
        "packed p50 {got} vs raw {expected}"
    );
}

#[test]
fn merge_buckets_from_two_workers_sums_same_period() {
    let w1 = window_with_samples(0, &[10.0, 20.0], 4);
    let w2 = window_with_samples(0, &[30.0], 6);
    let merged = merge_buckets([w1, w2]).unwrap_or_else(|e| panic!("merge failed: {e}"));
    assert_eq!(merged.len(), 1);
    assert_eq!(merged[0].counter("http.codes.200"), 10);
    assert_eq!(
        merged[0]
            .histogram("http.response_time")
            .map(QuantileSketch::count),
        Some(3)
    );
    // one rate event per worker, averaged
    assert_eq!(merged[0].rate("http.request_rate"), Some(1));
}
