use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::PathBuf;

pub trait KeyValueStore {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&mut self, key: &str, value: String) -> io::Result<()>;
}

/// String entries kept in a MessagePack file, rewritten on every change.
pub struct FileStore {
    path: PathBuf,
    entries: HashMap<String, String>,
}

impl FileStore {
    pub fn load(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();

        let entries = if path.exists() {
            log::debug!("loading {} from drive", path.display());
            rmp_serde::decode::from_read(BufReader::new(File::open(&path)?))
                .map_err(io::Error::other)?
        } else {
            log::debug!("creating empty {}", path.display());
            HashMap::new()
        };

        Ok(Self { path, entries })
    }

    fn save(&self) -> io::Result<()> {
        let file = File::options().write(true).truncate(true).create(true).open(&self.path)?;
        let mut writer = BufWriter::new(file);
        rmp_serde::encode::write_named(&mut writer, &self.entries).map_err(io::Error::other)?;
        writer.flush()
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: String) -> io::Result<()> {
        self.entries.insert(key.into(), value);
        self.save()
    }
}
