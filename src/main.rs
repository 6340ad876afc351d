#[cfg(not(all(feature = "streaming", feature = "wav")))]
fn main() {
    eprintln!(
        "The voicebus CLI requires the \"streaming\" and \"wav\" features. Rebuild with `--features streaming` to enable playback."
    );
}

#[cfg(all(feature = "streaming", feature = "wav"))]
mod cli {
    use std::env;
    use std::io::{self, Write};
    use std::time::{Duration, Instant};

    use anyhow::{bail, Context};
    use voicebus::{AudioEngine, EngineConfig, VoiceState};

    const STATUS_INTERVAL_MS: u64 = 250;

    struct Options {
        file: String,
        loops: i32,
        music_gain: f64,
        duck_gain: Option<f64>,
        config: Option<String>,
    }

    fn usage() {
        eprintln!(
            "Usage:\n  voicebus [--loops <n>] [--gain <dB>] [--duck <dB>] [--config <file.json>] <file.wav>\n\nFlags:\n  --loops <n>          Repeat the loop region n extra times (default 0)\n  --gain <dB>          Gain of the music bus (default 0)\n  --duck <dB>          Drop the music bus to this gain halfway through\n  --config <file>      Engine configuration as JSON\n  -h, --help           Show this help\n\nExamples:\n  voicebus --loops 2 --duck -18 theme.wav\n"
        );
    }

    fn value<T: std::str::FromStr>(flag: &str, raw: Option<String>) -> anyhow::Result<T> {
        let raw = raw.with_context(|| format!("{flag} requires an argument"))?;
        raw.parse()
            .map_err(|_| anyhow::anyhow!("invalid value for {flag}: {raw}"))
    }

    fn parse_args() -> anyhow::Result<Option<Options>> {
        let mut file = None;
        let mut loops = 0;
        let mut music_gain = 0.0;
        let mut duck_gain = None;
        let mut config = None;

        let mut args = env::args().skip(1);
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--help" | "-h" => return Ok(None),
                "--loops" => loops = value("--loops", args.next())?,
                "--gain" => music_gain = value("--gain", args.next())?,
                "--duck" => duck_gain = Some(value("--duck", args.next())?),
                "--config" => config = Some(value("--config", args.next())?),
                _ if arg.starts_with('-') => bail!("Unknown flag: {arg}"),
                _ => file = Some(arg),
            }
        }

        Ok(file.map(|file| Options {
            file,
            loops,
            music_gain,
            duck_gain,
            config,
        }))
    }

    pub fn run() -> anyhow::Result<()> {
        env_logger::init();

        let Some(options) = parse_args()? else {
            usage();
            return Ok(());
        };

        let config = match &options.config {
            Some(path) => EngineConfig::from_json_file(path)
                .with_context(|| format!("Failed to read config '{path}'"))?,
            None => EngineConfig::default(),
        };

        println!("voicebus - Streaming Bus Playback");
        println!("=================================\n");

        let engine = AudioEngine::builder()
            .config(config)
            .build()
            .context("Failed to start audio engine")?;

        let music = engine.mixer().create_bus(None, options.music_gain);
        let asset = engine.create_asset(&options.file, Some(&music), 0.0);
        let voice = asset
            .play(options.loops)
            .with_context(|| format!("Failed to play '{}'", options.file))?;

        let format = asset
            .format()
            .context("asset has no format after a successful play")?;
        let total = format.duration_of(asset.resident_bytes());
        let loops = asset.loop_points();
        println!("File:              {}", options.file);
        println!(
            "Format:            {} Hz, {} ch, {:?}",
            format.sample_rate(),
            format.channels(),
            format.sample_format()
        );
        println!("Length:            {:.2} seconds", total.as_secs_f32());
        if loops.is_looping() {
            println!(
                "Loop:              bytes {}..{} x{}",
                loops.start(),
                loops.end(),
                options.loops.max(0)
            );
        }
        println!("Music bus:         {:+.1} dB\n", music.gain());

        let started = Instant::now();
        let mut ducked = false;
        while voice.state() != VoiceState::Stopped {
            if let Some(duck) = options.duck_gain {
                if !ducked && voice.position() * 2 >= asset.resident_bytes() {
                    music.set_gain(duck);
                    ducked = true;
                    println!("\nDucked music bus to {:+.1} dB", music.gain());
                }
            }
            print!(
                "\r{:>7.2}s  pos {:>10}  rewinds {:>3}  gain {:+7.1} dB",
                started.elapsed().as_secs_f32(),
                voice.position(),
                voice.rewinds(),
                asset.effective_gain()
            );
            io::stdout().flush().ok();
            voice.wait(Duration::from_millis(STATUS_INTERVAL_MS));
        }

        println!("\n\nPlayback complete!");
        println!("Elapsed:           {:.2} seconds", started.elapsed().as_secs_f32());
        println!("Rewinds:           {}", voice.rewinds());
        println!(
            "Memory used:       {} bytes (PCM)",
            engine.ledger().resident_bytes()
        );
        Ok(())
    }
}

#[cfg(all(feature = "streaming", feature = "wav"))]
fn main() -> anyhow::Result<()> {
    cli::run()
}
