use approx::assert_abs_diff_eq;
use ndarray::Array1;
use tdms_stim::{assemble, assemble_between, Channel, ChannelSet, StimBlock};

/// A channel whose samples are their own indices, so a window tells which
/// samples it kept.
fn index_channel(name: &str, n: usize, fs: f64) -> Channel {
    Channel::new(name, Array1::from_iter((0..n).map(|i| i as f64)), fs)
}

#[test]
fn two_rates_cover_the_same_interval() {
    let mut set: ChannelSet = vec![
        index_channel("fast", 10_000, 1000.0),
        index_channel("slow", 300, 30.0),
    ]
    .into_iter()
    .collect();
    let block = StimBlock {
        start_ms: 2000.0,
        stop_ms: 5000.0,
        first_file: 0,
        last_file: 0,
    };
    let window = assemble(&mut set, &block, 0.01, None).unwrap();
    let (lower, upper) = (2000.0 - 600.0, 5000.0 + 600.0);

    for channel in set.iter() {
        let n = channel.len();
        let step = channel.duration_ms() / (n - 1) as f64;
        let kept = &window.channels[&channel.name];
        let first_t = kept[0] * step;
        let last_t = kept[kept.len() - 1] * step;

        assert!(first_t > lower && first_t - lower <= step, "{} starts at {}", channel.name, first_t);
        assert!(last_t < upper && upper - last_t <= step, "{} ends at {}", channel.name, last_t);
        assert_eq!(window.time_base(&channel.name).unwrap().len(), kept.len());
    }
}

#[test]
fn window_is_rebased_on_onset() {
    let mut set: ChannelSet = vec![index_channel("x", 10_000, 1000.0)].into_iter().collect();
    let window = assemble_between(&mut set, 2500.0, 7250.0, 0.05, None).unwrap();

    assert_eq!(window.start_ms, 0.0);
    assert_eq!(window.stop_ms, 4750.0);
    assert_abs_diff_eq!(window.pad_ms, 3000.0, epsilon = 1e-9);

    let t = window.time_base("x").unwrap();
    assert_abs_diff_eq!(t[0], -3000.0, epsilon = 1e-9);
    assert_abs_diff_eq!(t[t.len() - 1], 7750.0, epsilon = 1e-9);
}

#[test]
fn unpadded_window_has_block_length() {
    // 25 kHz for 2 s, block from sample 10000 to 40000
    let mut set: ChannelSet = vec![index_channel("stim_mon", 50_000, 25_000.0)].into_iter().collect();
    let window = assemble_between(&mut set, 400.0, 1600.0, 0.0, None).unwrap();
    let kept = &window.channels["stim_mon"];
    assert_eq!(kept.len(), 30_000);
    assert_eq!(kept[0], 10_000.0);
}
