use bytes::Bytes;
use itertools::Itertools;
use std::collections::{HashMap, VecDeque};
use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error as ThisError;
use tracing::{info, warn};

use crate::store::{Data, Key, Store, StoreError, Timestamp, Value};

// Separates list items inside the value field.
const ITEM_SEPARATOR: char = '^';
// Stands for an empty key, value or list item.
const EMPTY_FIELD: &str = "~";

#[derive(Debug, ThisError)]
pub enum Error {
    #[error("snapshot I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("malformed snapshot line {line}: {reason}")]
    Malformed { line: usize, reason: String },
}

/// One line of a snapshot file.
#[derive(Clone, Debug, PartialEq)]
pub struct Entry {
    pub key: Key,
    pub value: Value,
    /// Position of the key among expiring keys when it was saved.
    pub expire_index: Option<usize>,
}

/// A flat-file snapshot. Every save appends one line per live key:
///
/// ```text
/// key value exp_ms expire_index array_size
/// ```
///
/// `exp_ms` is an absolute unix timestamp in milliseconds or `0`, `expire_index` is `-1` for keys
/// without expiry and `array_size` is `0` for strings. List items are joined with `^`. Bytes that
/// would break the format are written as `%XX`, and an empty field as `~`.
///
/// Since saves only append, loading applies lines in order and the last line for a key wins.
#[derive(Clone, Debug)]
pub struct Snapshot {
    path: PathBuf,
}

impl Snapshot {
    pub fn new(path: impl Into<PathBuf>) -> Snapshot {
        Snapshot { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends every live entry of `store`. Returns how many entries were written.
    pub fn save(&self, store: &Store) -> Result<usize, Error> {
        let expire_indexes: HashMap<&Key, usize> = store
            .expiring()
            .enumerate()
            .map(|(index, key)| (key, index))
            .collect();

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let mut writer = BufWriter::new(file);

        let mut count = 0;
        for (key, value) in store.iter().sorted_by(|a, b| a.0.cmp(b.0)) {
            let entry = Entry {
                key: key.clone(),
                value: value.clone(),
                expire_index: expire_indexes.get(key).copied(),
            };
            writeln!(writer, "{}", format_line(&entry))?;
            count += 1;
        }
        writer.flush()?;

        info!("Saved {} entries to {}", count, self.path.display());
        Ok(count)
    }

    /// Reads every well-formed line. A missing file reads as empty; malformed lines are logged
    /// and skipped.
    pub fn load(&self) -> Result<Vec<Entry>, Error> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                info!("No snapshot found at {}, skipping load", self.path.display());
                return Ok(vec![]);
            }
            Err(err) => return Err(err.into()),
        };

        let mut entries = vec![];
        for (index, line) in BufReader::new(file).split(b'\n').enumerate() {
            let line = line?;
            let parsed = std::str::from_utf8(&line)
                .map_err(|_| "line is not valid UTF-8".to_string())
                .and_then(|line| {
                    if line.trim().is_empty() {
                        Ok(None)
                    } else {
                        parse_line(line).map(Some)
                    }
                });

            match parsed {
                Ok(None) => {}
                Ok(Some(entry)) => entries.push(entry),
                Err(reason) => {
                    let err = Error::Malformed {
                        line: index + 1,
                        reason,
                    };
                    warn!("Skipping snapshot entry: {}", err);
                }
            }
        }

        Ok(entries)
    }

    /// Loads the snapshot into `store`, dropping entries that already expired. Loading stops
    /// once the store is full. Returns how many entries were applied.
    pub fn restore(&self, store: &mut Store) -> Result<usize, Error> {
        let now = store.now();
        let mut applied = 0;

        for entry in self.load()? {
            // An expired line still overrides what earlier lines stored for the key.
            if entry.value.is_expired(now) {
                store.remove(&entry.key);
                continue;
            }

            match store.insert(entry.key, entry.value) {
                Ok(()) => applied += 1,
                Err(StoreError::Capacity) => {
                    warn!(
                        "Store reached its capacity of {} keys, ignoring the rest of the snapshot",
                        store.capacity()
                    );
                    break;
                }
                Err(err) => warn!("Skipping snapshot entry: {}", err),
            }
        }

        info!("Loaded {} objects from {}", applied, self.path.display());
        Ok(applied)
    }
}

fn format_line(entry: &Entry) -> String {
    let (value, array_size) = match &entry.value.data {
        Data::String(data) => (escape(data), 0),
        Data::List(items) => (
            items.iter().map(|item| escape(item)).join(&ITEM_SEPARATOR.to_string()),
            items.len(),
        ),
    };

    let expire_index = entry
        .expire_index
        .map_or_else(|| "-1".to_string(), |index| index.to_string());

    format!(
        "{} {} {} {} {}",
        escape(&entry.key),
        value,
        entry.value.expires_at.unwrap_or(0),
        expire_index,
        array_size
    )
}

fn parse_line(line: &str) -> Result<Entry, String> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    let [key, value, exp_ms, expire_index, array_size] = &fields[..] else {
        return Err(format!("expected 5 fields, found {}", fields.len()));
    };

    let key = unescape(key)?;
    let expires_at = match exp_ms
        .parse::<Timestamp>()
        .map_err(|_| format!("invalid expiry {:?}", exp_ms))?
    {
        0 => None,
        at => Some(at),
    };
    let expire_index = match expire_index
        .parse::<i64>()
        .map_err(|_| format!("invalid expire index {:?}", expire_index))?
    {
        index if index < 0 => None,
        index => Some(index as usize),
    };
    let array_size = array_size
        .parse::<usize>()
        .map_err(|_| format!("invalid array size {:?}", array_size))?;

    let data = if array_size == 0 {
        Data::String(unescape(value)?)
    } else {
        let items = value
            .split(ITEM_SEPARATOR)
            .map(unescape)
            .collect::<Result<VecDeque<_>, _>>()?;
        if items.len() != array_size {
            return Err(format!(
                "list declares {} items, holds {}",
                array_size,
                items.len()
            ));
        }
        Data::List(items)
    };

    Ok(Entry {
        key,
        value: Value { data, expires_at },
        expire_index,
    })
}

fn escape(bytes: &[u8]) -> String {
    if bytes.is_empty() {
        return EMPTY_FIELD.to_string();
    }

    let mut field = String::with_capacity(bytes.len());
    for &byte in bytes {
        match byte {
            b'%' | b'^' | b'~' => field.push_str(&format!("%{:02X}", byte)),
            0x21..=0x7e => field.push(byte as char),
            _ => field.push_str(&format!("%{:02X}", byte)),
        }
    }
    field
}

fn unescape(field: &str) -> Result<Bytes, String> {
    if field == EMPTY_FIELD {
        return Ok(Bytes::new());
    }

    let raw = field.as_bytes();
    let mut bytes = Vec::with_capacity(raw.len());
    let mut i = 0;
    while i < raw.len() {
        match raw[i] {
            b'%' => {
                let byte = raw
                    .get(i + 1..i + 3)
                    .filter(|hex| hex.iter().all(u8::is_ascii_hexdigit))
                    .and_then(|hex| std::str::from_utf8(hex).ok())
                    .and_then(|hex| u8::from_str_radix(hex, 16).ok())
                    .ok_or_else(|| format!("invalid escape in {:?}", field))?;
                bytes.push(byte);
                i += 3;
            }
            b'~' => return Err(format!("unexpected '~' in {:?}", field)),
            byte => {
                bytes.push(byte);
                i += 1;
            }
        }
    }

    Ok(Bytes::from(bytes))
}
