//! joe: logchamp
//! joe: call it logchamp
//! joe: please

use std::error::Error;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::sync::Mutex;

use colored::{Color, Colorize};
use log::{Level, LevelFilter, Log, Metadata, Record};
use time::macros;

struct Logger {
    file: Mutex<BufWriter<File>>,
}

impl Logger {
    fn new(filename: &str) -> io::Result<Self> {
        Ok(Self { file: Mutex::new(BufWriter::new(File::create(filename)?)) })
    }
}

impl Log for Logger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        match metadata.target().split("::").next() {
            Some("imagegen_form") => true,
            _ => metadata.level() <= Level::Info,
        }
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let timestamp = time::OffsetDateTime::now_utc()
            .format(macros::format_description!("[year]-[month]-[day] [hour]:[minute]:[second]"))
            .unwrap_or_default();
        let target = record.target();
        let level = record.level().as_str();
        let args = record.args();

        // the console is shared with the form, keep it to warnings and up
        if record.level() <= Level::Warn {
            let color = match record.level() {
                Level::Error => Color::BrightRed,
                _ => Color::BrightYellow,
            };
            eprintln!("{} {} {args}", timestamp.color(Color::BrightBlack), level.color(color));
        }

        if let Ok(mut file) = self.file.lock() {
            let _ = writeln!(file, "{timestamp} [{target} {level}] {args}");
        }
    }

    fn flush(&self) {
        if let Ok(mut file) = self.file.lock() {
            let _ = file.flush();
        }
    }
}

pub fn init(filename: &str) -> Result<(), Box<dyn Error>> {
    log::set_boxed_logger(Box::new(Logger::new(filename)?))?;
    log::set_max_level(LevelFilter::Debug);
    Ok(())
}
