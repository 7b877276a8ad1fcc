use std::process::ExitCode;
use std::sync::Arc;
use std::thread;

use midiplay::audio::CpalOutput;
use midiplay::banks::BankData;
use midiplay::config::Config;
use midiplay::error::MidiPlayError;
use midiplay::opl::chip::SoftChip;
use midiplay::player::Player;
use midiplay::ui::{AnsiDisplay, Display, NullDisplay};

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("{err}");
            ExitCode::from(err.exit_code() as u8)
        }
    }
}

fn run() -> Result<(), MidiPlayError> {
    let bank_data = Arc::new(BankData::load());
    let config = Config::from_args(&bank_data)?;

    if config.list_banks || config.midifile.is_none() {
        for (i, name) in midiplay::banks::BANK_NAMES.iter().enumerate() {
            println!("{i:2}: {name}");
        }
        return Ok(());
    }

    let path = config.midifile.as_ref().expect("checked above");
    let bytes = std::fs::read(path).map_err(|source| MidiPlayError::FileNotFound {
        path: path.clone(),
        source,
    })?;

    log::info!(
        "playing {path} (bank {}: {}, {} card(s), {} four-op channel(s))",
        config.bank,
        midiplay::banks::BANK_NAMES[config.bank as usize],
        config.numcards,
        config.numfourops
    );

    let chips: Vec<SoftChip> = (0..config.numcards).map(|_| SoftChip::new()).collect();
    let display: Box<dyn Display> = if config.ui {
        Box::new(AnsiDisplay::new(18 * config.numcards as usize))
    } else {
        Box::new(NullDisplay)
    };

    let mut player = Player::new(
        path,
        &bytes,
        chips,
        bank_data,
        config.bank as usize,
        config.numfourops as usize,
        display,
    )?;

    let (_output, mut sink) = CpalOutput::open()?;

    // Render thread is the sole producer into the audio ring; this thread
    // just keeps the process alive. MIDI files loop by default (spec.md
    // §6), so playback never naturally terminates.
    let render_thread = thread::spawn(move || {
        player.run_render_loop(&mut sink);
    });

    let _ = render_thread.join();
    Ok(())
}
