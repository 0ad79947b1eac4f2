use std::{fs, path::PathBuf, str::FromStr, sync::Arc};

use anyhow::{Context, bail};
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use tracklane_core::{
    AudioEngine, BitDepth, BounceOptions, DirectoryLibrary, EngineConfig, NewSound,
    OfflineDevice, Region, SignalMetrics, SoundSource, TRACK_COUNT,
    decode::decode_audio_file,
    diagnostics::init_tracing,
    persistence::write_atomic,
    validate::{compare_buffers, write_validation_report},
    wav::parse_wav_header,
};

#[derive(Debug, Parser)]
#[command(name = "tracklane-cli")]
#[command(about = "Headless tools for Tracklane bounce, inspection and library workflows")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Overrides the configured log directory.
    #[arg(long)]
    log_dir: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Mix up to three clips and write the result as WAV.
    Bounce {
        /// `PATH[:OFFSET_BEATS[:FADER]]`, once per track.
        #[arg(long = "track", required = true)]
        tracks: Vec<TrackArg>,

        #[arg(long)]
        bpm: Option<f64>,

        #[arg(long)]
        mute: Vec<usize>,

        #[arg(long)]
        solo: Vec<usize>,

        #[arg(long = "loop", num_args = 2, value_names = ["START", "END"])]
        loop_range: Option<Vec<f64>>,

        #[arg(long, default_value_t = 1)]
        loop_count: u32,

        #[arg(long, value_enum)]
        bit_depth: Option<BitDepthArg>,

        #[arg(long)]
        no_dither: bool,

        #[arg(long, num_args = 2, value_names = ["START", "END"])]
        region: Option<Vec<f64>>,

        #[arg(long, default_value_t = 0.0)]
        fade_in: f64,

        #[arg(long, default_value_t = 0.0)]
        fade_out: f64,

        #[arg(long, default_value_t = 1.0)]
        master_gain: f32,

        #[arg(long)]
        output: PathBuf,
    },
    /// Print the header and levels of a WAV file.
    Inspect { file: PathBuf },
    /// Compare a previewed file against an exported one.
    Validate {
        preview: PathBuf,
        export: PathBuf,

        #[arg(long)]
        report: Option<PathBuf>,
    },
    Library {
        /// Overrides the configured library directory.
        #[arg(long)]
        dir: Option<PathBuf>,

        #[command(subcommand)]
        action: LibraryAction,
    },
}

#[derive(Debug, Subcommand)]
enum LibraryAction {
    List,
    Add {
        file: PathBuf,

        #[arg(long)]
        title: String,

        #[arg(long)]
        category: String,

        /// Comma-separated.
        #[arg(long, default_value = "")]
        tags: String,
    },
    Remove {
        id: u64,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum BitDepthArg {
    #[value(name = "16")]
    Pcm16,
    #[value(name = "24")]
    Pcm24,
    #[value(name = "32f")]
    Float32,
}

impl From<BitDepthArg> for BitDepth {
    fn from(value: BitDepthArg) -> Self {
        match value {
            BitDepthArg::Pcm16 => Self::Pcm16,
            BitDepthArg::Pcm24 => Self::Pcm24,
            BitDepthArg::Float32 => Self::Float32,
        }
    }
}

#[derive(Debug, Clone)]
struct TrackArg {
    path: PathBuf,
    offset_beats: f64,
    fader: f32,
}

impl FromStr for TrackArg {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let mut parts = value.split(':');
        let path = parts
            .next()
            .filter(|path| !path.is_empty())
            .ok_or_else(|| "track path is empty".to_string())?;
        let offset_beats = match parts.next() {
            Some(raw) => raw
                .parse()
                .map_err(|error| format!("invalid offset beats `{raw}`: {error}"))?,
            None => 0.0,
        };
        let fader = match parts.next() {
            Some(raw) => raw
                .parse()
                .map_err(|error| format!("invalid fader `{raw}`: {error}"))?,
            None => 1.0,
        };

        Ok(Self {
            path: PathBuf::from(path),
            offset_beats,
            fader,
        })
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = EngineConfig::load_or_default();
    let log_dir = cli.log_dir.unwrap_or_else(|| config.paths.logs_dir.clone());
    let _telemetry = init_tracing(&log_dir, &config.diagnostics)?;

    match cli.command {
        Commands::Bounce {
            tracks,
            bpm,
            mute,
            solo,
            loop_range,
            loop_count,
            bit_depth,
            no_dither,
            region,
            fade_in,
            fade_out,
            master_gain,
            output,
        } => {
            if tracks.len() > TRACK_COUNT {
                bail!("at most {TRACK_COUNT} tracks can be bounced");
            }

            let mut engine = AudioEngine::new(OfflineDevice::new(), &config);
            for (index, track) in tracks.iter().enumerate() {
                let buffer = decode_audio_file(&track.path)
                    .with_context(|| format!("failed to decode {}", track.path.display()))?;
                let source_id = track.path.display().to_string();
                engine.assign_buffer(index, source_id, Arc::new(buffer))?;
                engine.set_offset_beats(index, track.offset_beats)?;
                engine.set_fader(index, track.fader)?;
            }
            for index in mute {
                engine.set_mute(index, true)?;
            }
            for index in solo {
                engine.set_solo(index, true)?;
            }
            if let Some(bpm) = bpm {
                engine.set_bpm(bpm);
            }
            if let Some([start, end]) = loop_range.as_deref() {
                if !engine.set_loop(*start, *end, true) {
                    bail!("invalid loop range {start}..{end}");
                }
            }
            engine.set_master_gain(master_gain);

            let mut request = engine.default_export_request();
            if let Some(depth) = bit_depth {
                request.bit_depth = depth.into();
            }
            request.dither = request.dither && !no_dither;
            if let Some([start, end]) = region.as_deref() {
                request.regions.push(Region::new(*start, *end));
            }
            request.fade_in_seconds = fade_in;
            request.fade_out_seconds = fade_out;

            let options = BounceOptions {
                loop_count,
                ..BounceOptions::default()
            };
            let result = engine.bounce(&request, options, Utc::now())?;
            write_atomic(&output, &result.artifact.bytes)?;
            println!(
                "wrote {} ({} bytes, sha256 {})",
                output.display(),
                result.artifact.bytes.len(),
                result.artifact.sha256
            );
        }
        Commands::Inspect { file } => {
            let bytes =
                fs::read(&file).with_context(|| format!("failed to read {}", file.display()))?;
            let header = parse_wav_header(&bytes)
                .with_context(|| format!("failed to parse wav header of {}", file.display()))?;
            println!("format tag:      {}", header.format_tag);
            println!("channels:        {}", header.channels);
            println!("sample rate:     {}", header.sample_rate);
            println!("byte rate:       {}", header.byte_rate);
            println!("block align:     {}", header.block_align);
            println!("bits per sample: {}", header.bits_per_sample);
            println!("data bytes:      {}", header.data_bytes);
            println!("frames:          {}", header.frames());

            let buffer = decode_audio_file(&file)?;
            let metrics = SignalMetrics::measure(&buffer);
            println!("{}", serde_json::to_string_pretty(&metrics)?);
        }
        Commands::Validate {
            preview,
            export,
            report,
        } => {
            let preview_buffer = decode_audio_file(&preview)
                .with_context(|| format!("failed to decode {}", preview.display()))?;
            let export_bytes =
                fs::read(&export).with_context(|| format!("failed to read {}", export.display()))?;
            let export_buffer = decode_audio_file(&export)
                .with_context(|| format!("failed to decode {}", export.display()))?;

            let outcome = compare_buffers(
                &preview.display().to_string(),
                &preview_buffer,
                &export_buffer,
                &export_bytes,
                &config.validation,
            );
            println!("{}", serde_json::to_string_pretty(&outcome)?);
            if let Some(path) = report {
                write_validation_report(&path, &outcome)?;
            }
        }
        Commands::Library { dir, action } => {
            let dir = dir.unwrap_or_else(|| config.paths.library_dir.clone());
            let mut library = DirectoryLibrary::open(&dir)?;
            match action {
                LibraryAction::List => {
                    for record in library.list() {
                        println!(
                            "{:>4}  {:<24} {:<12} {:>7.2}s  [{}]",
                            record.id,
                            record.title,
                            record.category,
                            record.duration,
                            record.tags.join(", ")
                        );
                    }
                }
                LibraryAction::Add {
                    file,
                    title,
                    category,
                    tags,
                } => {
                    let bytes = fs::read(&file)
                        .with_context(|| format!("failed to read {}", file.display()))?;
                    let original_name = file
                        .file_name()
                        .map(|name| name.to_string_lossy().into_owned())
                        .unwrap_or_default();
                    let record = library.store(
                        NewSound {
                            title,
                            category,
                            tags: NewSound::parse_tags(&tags),
                            original_name,
                        },
                        &bytes,
                    )?;
                    println!("{}", serde_json::to_string_pretty(&record)?);
                }
                LibraryAction::Remove { id } => {
                    let record = library.delete(id)?;
                    println!("removed {} ({})", record.id, record.title);
                }
            }
        }
    }

    Ok(())
}
