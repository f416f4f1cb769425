use super::*;

#[test]
fn assets_fill_eighty_percent() {
    let mut agg = ProgressAggregator::default();
    agg.set_asset_percent(50);
    assert_eq!(agg.update(0.0), Some(40));
    agg.set_asset_percent(100);
    assert_eq!(agg.update(0.0), Some(80));
    assert!(!agg.is_ready());
}

#[test]
fn visible_value_never_decreases() {
    let mut agg = ProgressAggregator::default();
    agg.set_asset_percent(90);
    assert_eq!(agg.update(0.0), Some(72));
    agg.set_asset_percent(10);
    assert_eq!(agg.update(0.5), None);
    assert_eq!(agg.visible(), 72);
}

#[test]
fn first_paint_and_settle_reach_one_hundred() {
    let mut agg = ProgressAggregator::default();
    agg.set_asset_percent(100);
    agg.update(10.0);
    agg.mark_first_paint(10.0);

    assert_eq!(agg.update(10.5), Some(85));
    assert_eq!(agg.update(11.0), Some(90));
    assert!(!agg.is_ready());
    assert_eq!(agg.update(11.75), Some(95));
    assert_eq!(agg.update(12.5), Some(100));
    assert!(agg.is_ready());
    assert_eq!(agg.update(20.0), None);
}

#[test]
fn repeated_first_paint_is_ignored() {
    let mut agg = ProgressAggregator::default();
    agg.set_asset_percent(100);
    agg.mark_first_paint(1.0);
    agg.mark_first_paint(5.0);
    assert_eq!(agg.update(3.5), Some(100));
}

#[test]
fn sequence_is_monotonic_under_noisy_inputs() {
    let mut agg = ProgressAggregator::default();
    let mut last = 0;
    for step in 0..400u32 {
        let now = f64::from(step) * 0.01;
        // Asset percent jitters but trends upward.
        agg.set_asset_percent(((step / 4) as u8).min(100).saturating_sub((step % 3) as u8));
        if step == 300 {
            agg.mark_first_paint(now);
        }
        agg.update(now);
        assert!(agg.visible() >= last);
        last = agg.visible();
    }
}
