use dasp_signal::{self as signal, Signal};
use retempo::{channel, Controller, Error, Event, PlaybackState, StretchConfig, StretchProcessor};

const RATE: u32 = 44_100;
const BLOCK: usize = 128;

fn init_logging() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn tone(hz: f64, secs: f64) -> Vec<f32> {
    let frames = (secs * RATE as f64) as usize;
    signal::rate(RATE as f64)
        .const_hz(hz)
        .sine()
        .take(frames)
        .map(|s| (s * 0.5) as f32)
        .collect()
}

fn loaded(samples: &[f32]) -> (Controller, StretchProcessor) {
    init_logging();
    let (mut controller, processor) = channel(StretchConfig::default()).unwrap();
    controller.load(samples, samples, RATE).unwrap();
    (controller, processor)
}

/// Render until the stream ends. Returns every rendered frame and the events seen.
fn play_to_end(
    controller: &mut Controller,
    processor: &mut StretchProcessor,
) -> (Vec<f32>, Vec<Event>) {
    let mut rendered = Vec::new();
    let mut events = Vec::new();
    let (mut left, mut right) = ([0.0; BLOCK], [0.0; BLOCK]);
    for _ in 0..100_000 {
        processor.process_block(&mut left, &mut right);
        rendered.extend_from_slice(&left);
        events.extend(controller.poll_events());
        if processor.state() == PlaybackState::Ended {
            return (rendered, events);
        }
    }
    panic!("stream never ended");
}

fn last_time(events: &[Event]) -> f64 {
    events
        .iter()
        .filter_map(|e| match e {
            Event::TimeUpdate { current_time } => Some(*current_time),
            _ => None,
        })
        .last()
        .unwrap()
}

#[test]
fn half_tempo_doubles_duration() {
    let source = tone(440.0, 2.0);
    let (mut controller, mut processor) = loaded(&source);
    controller.set_tempo(0.5).unwrap();
    controller.play().unwrap();

    let (_, events) = play_to_end(&mut controller, &mut processor);
    assert!(matches!(events[0], Event::Loaded { frames: 88_200, .. }));

    let times: Vec<f64> = events
        .iter()
        .filter_map(|e| match e {
            Event::TimeUpdate { current_time } => Some(*current_time),
            _ => None,
        })
        .collect();
    assert!(times.windows(2).all(|w| w[0] <= w[1]));

    let frames = (last_time(&events) * RATE as f64).round() as i64;
    assert!((frames - 176_400).abs() <= 353, "rendered {frames} frames");

    let ended = events.iter().filter(|e| **e == Event::Ended).count();
    assert_eq!(ended, 1);
}

#[test]
fn octave_up_keeps_duration() {
    let source = tone(220.0, 1.0);
    let (mut controller, mut processor) = loaded(&source);
    controller.set_pitch(12.0).unwrap();
    controller.play().unwrap();

    let (mut left, mut right) = ([0.0; BLOCK], [0.0; BLOCK]);
    processor.process_block(&mut left, &mut right);
    let engine = processor.adapter().session().unwrap().filter().engine();
    assert!((engine.pitch() - 2.0).abs() < 1e-9);
    assert!((engine.effective_tempo() - 0.5).abs() < 1e-9);
    assert!((engine.effective_rate() - 2.0).abs() < 1e-9);

    let (_, events) = play_to_end(&mut controller, &mut processor);
    let frames = (last_time(&events) * RATE as f64).round() as i64;
    assert!((frames - 44_100).abs() <= 353, "rendered {frames} frames");
}

#[test]
fn silence_stays_silent() {
    let source = vec![0.0; RATE as usize];
    let (mut controller, mut processor) = loaded(&source);
    controller.set_tempo(0.7).unwrap();
    controller.set_pitch(-5.0).unwrap();
    controller.play().unwrap();

    let (rendered, _) = play_to_end(&mut controller, &mut processor);
    assert!(rendered.iter().all(|s| *s == 0.0));
}

#[test]
fn output_is_finite_and_bounded() {
    let source = tone(440.0, 1.0);
    let (mut controller, mut processor) = loaded(&source);
    controller.set_tempo(1.3).unwrap();
    controller.set_pitch(4.0).unwrap();
    controller.play().unwrap();

    let (rendered, _) = play_to_end(&mut controller, &mut processor);
    assert!(rendered.iter().all(|s| s.is_finite() && s.abs() <= 1.0));
    assert!(rendered.iter().any(|s| *s != 0.0));
}

#[test]
fn end_of_stream_is_sticky() {
    let source = tone(440.0, 0.25);
    let (mut controller, mut processor) = loaded(&source);
    controller.play().unwrap();
    play_to_end(&mut controller, &mut processor);

    let (mut left, mut right) = ([1.0; BLOCK], [1.0; BLOCK]);
    for _ in 0..10 {
        processor.process_block(&mut left, &mut right);
        assert!(left.iter().chain(right.iter()).all(|s| *s == 0.0));
    }
    assert_eq!(controller.poll_events().count(), 0);
}

#[test]
fn stop_rewinds_to_start() {
    let source = tone(440.0, 1.0);
    let (mut controller, mut processor) = loaded(&source);
    controller.play().unwrap();

    let (mut left, mut right) = ([0.0; BLOCK], [0.0; BLOCK]);
    for _ in 0..20 {
        processor.process_block(&mut left, &mut right);
    }
    controller.poll_events().for_each(drop);

    controller.stop().unwrap();
    processor.process_block(&mut left, &mut right);
    let events: Vec<Event> = controller.poll_events().collect();
    assert_eq!(
        events,
        vec![
            Event::StateChange {
                is_playing: false,
                current_time: Some(0.0)
            },
            Event::TimeUpdate { current_time: 0.0 },
        ]
    );
    assert_eq!(processor.state(), PlaybackState::Loaded);
    assert!(left.iter().all(|s| *s == 0.0));
}

#[test]
fn seek_then_play_resumes_from_target() {
    let source = tone(440.0, 2.0);
    let (mut controller, mut processor) = loaded(&source);
    controller.seek(44_100).unwrap();
    controller.play().unwrap();

    let (mut left, mut right) = ([0.0; BLOCK], [0.0; BLOCK]);
    processor.process_block(&mut left, &mut right);
    let events: Vec<Event> = controller.poll_events().collect();
    assert!(events.contains(&Event::Seeked {
        position: 44_100,
        current_time: 1.0
    }));
    match events.last() {
        Some(Event::TimeUpdate { current_time }) => {
            assert!((current_time - (44_100 + BLOCK) as f64 / RATE as f64).abs() < 1e-9)
        }
        other => panic!("unexpected {other:?}"),
    }

    // one more second of source at unity tempo
    let (_, events) = play_to_end(&mut controller, &mut processor);
    let end = (last_time(&events) * RATE as f64).round() as i64;
    assert!((end - 88_200).abs() <= 2, "ended at {end}");
}

#[test]
fn seek_keeps_timeline_at_half_tempo() {
    let source = tone(440.0, 2.0);
    let (mut controller, mut processor) = loaded(&source);
    controller.set_tempo(0.5).unwrap();
    controller.play().unwrap();
    let (_, events) = play_to_end(&mut controller, &mut processor);
    let from_start = last_time(&events);

    controller.seek(44_100).unwrap();
    controller.play().unwrap();
    let (_, events) = play_to_end(&mut controller, &mut processor);
    assert!(events.contains(&Event::Seeked {
        position: 44_100,
        current_time: 2.0
    }));
    let after_seek = last_time(&events);

    assert!((from_start - 4.0).abs() < 0.02, "played from start to {from_start}s");
    assert!((after_seek - 4.0).abs() < 0.02, "played after seek to {after_seek}s");
}

#[test]
fn tempo_change_mid_stream_keeps_tail_tight() {
    let source = tone(440.0, 2.0);
    let (mut controller, mut processor) = loaded(&source);
    controller.set_tempo(0.05).unwrap();
    controller.play().unwrap();

    let (mut left, mut right) = ([0.0; BLOCK], [0.0; BLOCK]);
    for _ in 0..10 {
        processor.process_block(&mut left, &mut right);
    }
    controller.set_tempo(2.0).unwrap();
    let (rendered, _) = play_to_end(&mut controller, &mut processor);

    let sequence = processor
        .adapter()
        .session()
        .unwrap()
        .filter()
        .engine()
        .stretcher()
        .seek_window_length();
    let trailing = rendered.iter().rev().take_while(|s| **s == 0.0).count();
    // the ended block and the padding of the last partial block are silent too
    assert!(
        trailing < 2 * BLOCK + sequence,
        "{trailing} silent frames at the end"
    );
}

#[test]
fn commands_before_load_report_errors() {
    init_logging();
    let (mut controller, mut processor) = channel(StretchConfig::default()).unwrap();
    controller.play().unwrap();
    controller.seek(10).unwrap();
    controller.stop().unwrap();

    let (mut left, mut right) = ([0.0; BLOCK], [0.0; BLOCK]);
    processor.process_block(&mut left, &mut right);
    let events: Vec<Event> = controller.poll_events().collect();
    assert_eq!(events, vec![Event::Error(Error::NotLoaded); 3]);
    assert_eq!(processor.state(), PlaybackState::Idle);
}

#[test]
fn invalid_loads_are_rejected() {
    init_logging();
    let (mut controller, _processor) = channel(StretchConfig::default()).unwrap();
    let source = tone(440.0, 0.1);
    assert_eq!(controller.load(&[], &[], RATE), Err(Error::EmptySource));
    assert_eq!(
        controller.load(&source, &source, 1_000),
        Err(Error::InvalidSampleRate(1_000))
    );
    let events: Vec<Event> = controller.poll_events().collect();
    assert_eq!(
        events,
        vec![
            Event::Error(Error::EmptySource),
            Event::Error(Error::InvalidSampleRate(1_000)),
        ]
    );
}
