// src/main.rs

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;

use anyhow::{Context, bail};
use env_logger::Env;
use log::info;

use wavedit_core::chunk::Chunk;
use wavedit_core::config::EditorConfig;
use wavedit_core::decoder::SymphoniaBackend;
use wavedit_core::progress::{Progress, ProgressEvent};
use wavedit_core::session::Document;
use wavedit_core::waveform::ViewCache;
use wavedit_core::waveform::terminal::render_ascii;

const USAGE: &str = "usage: wavedit <input> <output> [op ...]
ops: fade-in | fade-out | mix:<file> | cut:<start>:<len> | crop:<start>:<len> | undo
     positions are in frames";

/// One step of the edit script given on the command line.
enum Op {
    FadeIn,
    FadeOut,
    Mix(PathBuf),
    Cut(u64, u64),
    Crop(u64, u64),
    Undo,
}

fn parse_range(spec: &str) -> anyhow::Result<(u64, u64)> {
    let (start, len) = spec
        .split_once(':')
        .with_context(|| format!("expected <start>:<len>, got `{spec}`"))?;
    let start = start.parse().with_context(|| format!("bad start `{start}`"))?;
    let len = len.parse().with_context(|| format!("bad length `{len}`"))?;
    Ok((start, len))
}

fn parse_op(arg: &str) -> anyhow::Result<Op> {
    let op = match arg.split_once(':') {
        None if arg == "fade-in" => Op::FadeIn,
        None if arg == "fade-out" => Op::FadeOut,
        None if arg == "undo" => Op::Undo,
        Some(("mix", file)) => Op::Mix(PathBuf::from(file)),
        Some(("cut", range)) => {
            let (s, l) = parse_range(range)?;
            Op::Cut(s, l)
        }
        Some(("crop", range)) => {
            let (s, l) = parse_range(range)?;
            Op::Crop(s, l)
        }
        _ => bail!("unknown operation `{arg}`\n{USAGE}"),
    };
    Ok(op)
}

fn load_config() -> anyhow::Result<EditorConfig> {
    match std::env::var_os("WAVEDIT_CONFIG") {
        Some(path) => EditorConfig::load_from_disk(&path)
            .with_context(|| format!("reading config {}", Path::new(&path).display())),
        None => Ok(EditorConfig::default()),
    }
}

/// Print progress events on stderr until every sender is gone.
fn spawn_progress_printer() -> (Progress, thread::JoinHandle<()>) {
    let (progress, rx) = Progress::new();
    let printer = thread::spawn(move || {
        let mut label = String::new();
        for event in rx {
            match event {
                ProgressEvent::Begin(l) => label = l,
                ProgressEvent::Fraction(f) => eprint!("\r{label}: {:>3.0}%", f * 100.0),
                ProgressEvent::End => eprintln!(),
            }
        }
    });
    (progress, printer)
}

fn apply(doc: &mut Document, op: &Op, progress: &Progress) -> anyhow::Result<()> {
    let frames = doc.chunk().frames();
    let select = |doc: &mut Document, start: u64, len: u64| -> anyhow::Result<()> {
        if len == 0 || start + len > frames {
            bail!("range {start}+{len} is outside the {frames} frames of the document");
        }
        doc.set_selection(start, start + len);
        Ok(())
    };

    match op {
        Op::FadeIn => doc.fade_in(progress)?,
        Op::FadeOut => doc.fade_out(progress)?,
        Op::Mix(path) => {
            let clip = Chunk::load(path, Arc::new(SymphoniaBackend))
                .with_context(|| format!("loading {}", path.display()))?;
            doc.set_cursor(0);
            doc.mix_paste(&clip, progress)?;
        }
        Op::Cut(start, len) => {
            select(doc, *start, *len)?;
            doc.cut();
        }
        Op::Crop(start, len) => {
            select(doc, *start, *len)?;
            doc.crop();
        }
        Op::Undo => {
            if !doc.undo() {
                bail!("nothing to undo");
            }
        }
    }
    doc.set_selection(0, 0);
    Ok(())
}

fn print_envelope(chunk: &Chunk, block_bytes: usize) {
    const WIDTH: usize = 72;
    const HEIGHT: usize = 9;

    let mut cache = ViewCache::new(block_bytes);
    loop {
        cache.update(chunk, 0, chunk.frames(), WIDTH);
        if cache.is_fully_updated() {
            break;
        }
    }
    for ch in 0..chunk.format().channels as usize {
        println!("channel {ch}:");
        for row in render_ascii(&cache, ch, HEIGHT) {
            println!("|{row}|");
        }
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.len() < 2 {
        bail!("{USAGE}");
    }
    let (input, output) = (PathBuf::from(&args[0]), PathBuf::from(&args[1]));
    let ops = args[2..]
        .iter()
        .map(String::as_str)
        .map(parse_op)
        .collect::<anyhow::Result<Vec<_>>>()?;

    let config = load_config()?;
    let mut doc = Document::open(&input, Arc::new(SymphoniaBackend), &config)
        .with_context(|| format!("opening {}", input.display()))?;

    let (progress, printer) = spawn_progress_printer();
    for op in &ops {
        apply(&mut doc, op, &progress)?;
    }
    // Drawn before saving: the source may be the file being replaced.
    let chunk = doc.chunk().clone();
    print_envelope(&chunk, config.io_block_bytes);

    doc.save(&output, &progress)
        .with_context(|| format!("saving {}", output.display()))?;
    drop(progress);
    let _ = printer.join();

    info!(
        "{}: {} frames, {:.2} s, {}",
        output.display(),
        chunk.frames(),
        chunk.duration(),
        chunk.format()
    );
    Ok(())
}
