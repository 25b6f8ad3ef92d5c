//! Play a chord through the engine while sweeping tempo and pitch
//!
//! Run with: cargo run --example play_tone --features cpal_sink

use std::thread::sleep;
use std::time::Duration;

use retempo::{channel, CpalDevice, Event, StretchConfig};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let device = CpalDevice::default_output().ok_or("No audio device")?;
    println!(
        "Using: {} @ {}Hz, {} ch",
        device.name(),
        device.sample_rate(),
        device.channels()
    );

    // generate at the device rate so no rate compensation is needed
    let rate = device.sample_rate();
    let frames = rate as usize * 6;
    let chord = |hz: [f32; 3]| -> Vec<f32> {
        (0..frames)
            .map(|i| {
                let t = i as f32 / rate as f32;
                hz.iter()
                    .map(|f| (t * f * std::f32::consts::TAU).sin())
                    .sum::<f32>()
                    * 0.15
            })
            .collect()
    };
    let left = chord([261.63, 329.63, 392.0]);
    let right = chord([261.63, 311.13, 392.0]);

    let config = StretchConfig::default().with_sample_rate(rate);
    let block_size = config.block_size;
    let (mut controller, processor) = channel(config)?;
    let _output = device.open(processor, block_size)?;

    controller.load(&left, &right, rate)?;
    controller.play()?;

    let steps: [(f64, f64); 4] = [(1.0, 0.0), (0.6, 0.0), (0.6, 5.0), (1.4, -3.0)];
    let mut step = 0;
    let mut last_second = 0;
    loop {
        let events: Vec<Event> = controller.poll_events().collect();
        for event in events {
            match event {
                Event::TimeUpdate { current_time } if current_time as u64 > last_second => {
                    last_second = current_time as u64;
                    println!("  {current_time:.1}s");
                }
                Event::Ended => {
                    step += 1;
                    if step == steps.len() {
                        println!("Done");
                        return Ok(());
                    }
                    let (tempo, semitones) = steps[step];
                    println!("tempo {tempo}, pitch {semitones:+} semitones");
                    last_second = 0;
                    controller.set_tempo(tempo)?;
                    controller.set_pitch(semitones)?;
                    controller.play()?;
                }
                Event::Error(err) => eprintln!("engine error: {err}"),
                _ => {}
            }
        }
        sleep(Duration::from_millis(20));
    }
}
