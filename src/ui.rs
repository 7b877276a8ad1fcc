//! Terminal display. `spec.md` names this only by its interface
//! (`IllustrateNote`, `PrintLn`); `NullDisplay` is the default, `AnsiDisplay`
//! implements the 80-column cursor-addressable layout behind `--ui`.

/// Capability set the player needs from a UI implementation.
pub trait Display: Send {
    fn illustrate_note(&mut self, voice: usize, tone: f64, instrument: usize, pressure: i32, bend: f64);
    fn print_line(&mut self, line: &str);
}

/// Default display: drops note visualization, logs status lines instead.
pub struct NullDisplay;

impl Display for NullDisplay {
    fn illustrate_note(&mut self, _voice: usize, _tone: f64, _instrument: usize, _pressure: i32, _bend: f64) {}

    fn print_line(&mut self, line: &str) {
        log::info!("{line}");
    }
}

const MELODIC_PALETTE: [u8; 6] = [31, 32, 33, 34, 35, 36];
const PERCUSSION_PALETTE: [u8; 4] = [90, 91, 92, 93];
const COLUMNS: usize = 80;

/// ANSI cursor-addressable visualization: one row per voice, 80 columns,
/// plus a scrolling status line above. Colors round-robin per instrument,
/// split by bit 7 of `midiins` (melodic vs percussion).
pub struct AnsiDisplay {
    num_rows: usize,
}

impl AnsiDisplay {
    pub fn new(num_voices: usize) -> Self {
        print!("\x1b[2J\x1b[H");
        AnsiDisplay { num_rows: num_voices }
    }

    fn color_for(instrument: usize) -> u8 {
        if instrument & 0x80 != 0 {
            PERCUSSION_PALETTE[instrument % PERCUSSION_PALETTE.len()]
        } else {
            MELODIC_PALETTE[instrument % MELODIC_PALETTE.len()]
        }
    }
}

impl Display for AnsiDisplay {
    fn illustrate_note(&mut self, voice: usize, tone: f64, instrument: usize, pressure: i32, bend: f64) {
        if voice >= self.num_rows {
            return;
        }
        let row = 2 + voice;
        let col = ((tone + bend) as usize).min(COLUMNS.saturating_sub(1)) + 1;
        let color = Self::color_for(instrument);
        let glyph = if pressure > 0 { '#' } else { '.' };
        print!("\x1b[{row};{col}H\x1b[{color}m{glyph}\x1b[0m");
    }

    fn print_line(&mut self, line: &str) {
        print!("\x1b[1;1H\x1b[K{line}");
    }
}
