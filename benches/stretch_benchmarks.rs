use criterion::{black_box, criterion_group, criterion_main, Criterion};
use retempo::dsp::{Engine, RateTransposer, SampleQueue};
use retempo::{channel, PlaybackState, StretchConfig};

fn interleaved_tone(frames: usize) -> Vec<f32> {
    (0..frames)
        .flat_map(|i| {
            let s = (i as f32 * 0.0627).sin() * 0.5;
            [s, s]
        })
        .collect()
}

pub fn criterion_benchmark(c: &mut Criterion) {
    c.bench_function("RateTransposer.process() 8192 frames", |b| {
        let samples = interleaved_tone(8192);
        let mut transposer = RateTransposer::new();
        transposer.set_rate(1.37);
        let mut input = SampleQueue::with_capacity(8192);
        let mut output = SampleQueue::with_capacity(8192);

        b.iter(|| {
            input.put_samples(&samples);
            transposer.process(&mut input, &mut output);
            output.clear();
        })
    });

    for (name, quick_seek) in [("quick", true), ("exhaustive", false)] {
        c.bench_function(&format!("Engine.process() 8192 frames, {name} seek"), |b| {
            let samples = interleaved_tone(8192);
            let config = StretchConfig::default().with_quick_seek(quick_seek);
            let mut engine = Engine::with_config(&config);
            engine.set_tempo(0.8);
            engine.set_pitch_semitones(3.0);

            b.iter(|| {
                engine.put_samples(black_box(&samples));
                engine.process();
                engine.output_mut().clear();
            })
        });
    }

    c.bench_function("StretchProcessor.process_block() 128 frames", |b| {
        let tone: Vec<f32> = (0..44_100 * 60).map(|i| (i as f32 * 0.0627).sin()).collect();
        let (mut controller, mut processor) = channel(StretchConfig::default()).unwrap();
        controller.load(&tone, &tone, 44_100).unwrap();
        controller.set_tempo(0.75).unwrap();
        controller.play().unwrap();
        let (mut left, mut right) = ([0.0; 128], [0.0; 128]);

        b.iter(|| {
            processor.process_block(&mut left, &mut right);
            controller.poll_events().for_each(drop);
            if processor.state() == PlaybackState::Ended {
                controller.play().unwrap();
            }
        })
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
