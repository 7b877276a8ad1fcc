//! `Config`: the single value built once from CLI args and passed by
//! reference into `Player::new`. Replaces the original's module-globals for
//! `AdlBank`/`NumFourOps`/`NumCards` per `spec.md` §9's Design Notes.

use clap::Parser;

use crate::banks::{BankData, NUM_BANKS};
use crate::error::MidiPlayError;

/// `midiplay <midifile> [bank] [numcards] [numfourops] [--ui] [--list-banks]`
#[derive(Parser, Debug)]
#[command(name = "midiplay", about = "OPL3 FM-synthesis MIDI file player")]
struct Cli {
    /// Path to the .mid file to play. If omitted, prints the bundled bank
    /// names and exits.
    midifile: Option<String>,

    /// Bank index, 0..47.
    #[arg(default_value_t = 0)]
    bank: u32,

    /// Number of emulated OPL3 chips.
    #[arg(default_value_t = 1)]
    numcards: u32,

    /// Number of four-op channels across all cards. Omit to use the
    /// bank-derived heuristic.
    numfourops: Option<u32>,

    /// Enable the ANSI terminal note visualization.
    #[arg(long)]
    ui: bool,

    /// Print the bundled bank names and exit, even if midifile is given.
    #[arg(long = "list-banks")]
    list_banks: bool,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub midifile: Option<String>,
    pub bank: u32,
    pub numcards: u32,
    pub numfourops: u32,
    pub ui: bool,
    pub list_banks: bool,
}

impl Config {
    /// Parses CLI args and validates them against the already-loaded bank
    /// tables (shared with `Player`, not reloaded here).
    pub fn from_args(bank_data: &BankData) -> Result<Self, MidiPlayError> {
        let cli = Cli::parse();
        Self::from_cli(cli, bank_data)
    }

    fn from_cli(cli: Cli, bank_data: &BankData) -> Result<Self, MidiPlayError> {
        if cli.bank as usize >= NUM_BANKS {
            return Err(MidiPlayError::BankOutOfRange {
                bank: cli.bank,
                max: NUM_BANKS as u32 - 1,
            });
        }
        if cli.numcards == 0 || cli.numcards > 100 {
            return Err(MidiPlayError::NumCardsOutOfRange {
                numcards: cli.numcards,
            });
        }
        let max_fourops = 6 * cli.numcards;
        let numfourops = match cli.numfourops {
            Some(n) => {
                if n > max_fourops {
                    return Err(MidiPlayError::NumFourOpsOutOfRange {
                        numfourops: n,
                        max: max_fourops,
                    });
                }
                n
            }
            None => heuristic_fourops(bank_data, cli.bank as usize, max_fourops),
        };

        if numfourops == 0 && bank_is_almost_all_four_op(bank_data, cli.bank as usize) {
            return Err(MidiPlayError::BankNeedsFourOps { bank: cli.bank });
        }

        Ok(Config {
            midifile: cli.midifile,
            bank: cli.bank,
            numcards: cli.numcards,
            numfourops,
            ui: cli.ui,
            list_banks: cli.list_banks,
        })
    }
}

/// Counts how many of the bank's 128 melodic program slots resolve to a
/// four-op instrument (`adlno1 != adlno2`) and scales that into a channel
/// budget capped at `max_fourops`.
fn heuristic_fourops(bank_data: &BankData, bank: usize, max_fourops: u32) -> u32 {
    let table = &bank_data.banks[bank.min(NUM_BANKS - 1)];
    let four_op_programs = (0..128)
        .filter(|&midiins| {
            let ins = bank_data.instrument(table[midiins]);
            ins.adlno1 != ins.adlno2
        })
        .count();
    (four_op_programs as u32).min(max_fourops)
}

/// True when nearly every melodic program in the bank is four-op, so
/// running with `numfourops == 0` would silence almost the whole bank.
fn bank_is_almost_all_four_op(bank_data: &BankData, bank: usize) -> bool {
    let table = &bank_data.banks[bank.min(NUM_BANKS - 1)];
    let four_op_count = (0..128)
        .filter(|&midiins| {
            let ins = bank_data.instrument(table[midiins]);
            ins.adlno1 != ins.adlno2
        })
        .count();
    four_op_count >= 112 // >= 7/8 of melodic programs
}
