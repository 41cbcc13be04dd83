// src/play_main.rs

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind, KeyModifiers},
    terminal::{disable_raw_mode, enable_raw_mode},
};
use env_logger::Env;

use wavedit_core::audio::AudioOutput;
use wavedit_core::chunk::Chunk;
use wavedit_core::decoder::SymphoniaBackend;
use wavedit_core::player::Player;

const SEEK_SECONDS: u64 = 5;

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("warn")).init();

    let Some(path) = std::env::args().nth(1).map(PathBuf::from) else {
        bail!("usage: waveplay <file>");
    };
    let chunk = Chunk::load(&path, Arc::new(SymphoniaBackend))
        .with_context(|| format!("loading {}", path.display()))?;

    let player = Arc::new(Player::new());
    let _output = AudioOutput::start(Arc::clone(&player), chunk.format())?;
    player.play(&chunk, 0, chunk.frames())?;

    println!("[SPACE] Play/Pause | [←/→] Seek | [Q] Quit");
    enable_raw_mode()?;
    let result = run_loop(&player, &chunk);
    disable_raw_mode()?;
    println!();
    result
}

/// `pos` moved by `delta` frames, kept inside `[0, total]`.
fn seek(pos: u64, delta: i64, total: u64) -> u64 {
    pos.saturating_add_signed(delta).min(total)
}

/// Seek the running player, or move the resume point while paused.
fn seek_by(player: &Player, paused_at: &mut Option<u64>, delta: i64, total: u64) {
    match paused_at.as_mut() {
        Some(pos) => *pos = seek(*pos, delta, total),
        None => player.set_position(seek(player.position(), delta, total)),
    }
}

fn run_loop(player: &Player, chunk: &Chunk) -> anyhow::Result<()> {
    let rate = chunk.format().rate as u64;
    let total = chunk.frames();
    let mut paused_at: Option<u64> = None;

    loop {
        if event::poll(Duration::from_millis(50))? {
            if let Event::Key(ev) = event::read()? {
                if ev.kind != KeyEventKind::Press {
                    continue;
                }
                match ev.code {
                    KeyCode::Char('q') => break,
                    KeyCode::Char('c') if ev.modifiers.contains(KeyModifiers::CONTROL) => break,
                    KeyCode::Char(' ') => match paused_at.take() {
                        Some(pos) => {
                            player.play(chunk, pos, total)?;
                        }
                        None => {
                            paused_at = Some(player.position());
                            player.stop();
                        }
                    },
                    KeyCode::Left | KeyCode::Right => {
                        let step = (SEEK_SECONDS * rate) as i64;
                        let delta = if ev.code == KeyCode::Left { -step } else { step };
                        seek_by(player, &mut paused_at, delta, total);
                    }
                    _ => {}
                }
            }
        }

        let pos = match (player.poll(), paused_at) {
            (Some(pos), _) => pos,
            (None, Some(pos)) => pos,
            (None, None) => break,
        };
        let secs = pos as f64 / rate as f64;
        print!("\r{:02}:{:05.2} / {:.2} s", (secs / 60.0) as u64, secs % 60.0, chunk.duration());
        std::io::stdout().flush()?;
    }
    player.stop();
    Ok(())
}
