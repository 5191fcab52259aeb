use std::io;

/// Key/value configuration, loaded from a TOML document
///
/// Keys are addressed by dotted paths: `queue.capacity` is the `capacity`
/// entry of the `[queue]` table.
#[derive(Clone, Debug)]
pub struct Config {
    value: toml::Value,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            value: toml::Value::Table(toml::map::Map::new()),
        }
    }
}

impl Config {
    fn lookup(&self, k: &str) -> Option<&toml::Value> {
        let mut item = &self.value;
        for key in k.split('.') {
            item = item.get(key)?;
        }
        Some(item)
    }

    /// Get an entry by path. If the input argument contains dots, the path is split
    /// into keys, each key being requested recursively.
    pub fn get<T: AsRef<str>>(&self, k: T) -> Option<&str> {
        self.lookup(k.as_ref())?.as_str()
    }

    /// Get an entry of type integer by path
    pub fn get_usize<T: AsRef<str>>(&self, k: T) -> Option<usize> {
        self.lookup(k.as_ref())?
            .as_integer()
            .and_then(|i| usize::try_from(i).ok())
    }

    /// Get an entry of type boolean by path
    pub fn get_bool<T: AsRef<str>>(&self, k: T) -> Option<bool> {
        self.lookup(k.as_ref())?.as_bool()
    }

    /// Set an entry by path, creating intermediate tables as needed.
    ///
    /// An intermediate entry which is not a table is replaced.
    pub fn set<T: AsRef<str>, V: Into<toml::Value>>(&mut self, k: T, v: V) {
        let keys: Vec<&str> = k.as_ref().split('.').collect();
        if let toml::Value::Table(t) = &mut self.value {
            insert_path(t, &keys, v.into());
        }
    }

    /// Load configuration from input object. If keys are already present, they are overwritten
    pub fn load_config<R: io::Read>(&mut self, mut config: R) -> Result<(), io::Error> {
        let mut s = String::new();
        config.read_to_string(&mut s)?;
        let table: toml::Table = toml::from_str(&s)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        if let toml::Value::Table(current) = &mut self.value {
            for (k, v) in table {
                current.insert(k, v);
            }
        }
        Ok(())
    }
}

fn insert_path(table: &mut toml::map::Map<String, toml::Value>, keys: &[&str], v: toml::Value) {
    match keys {
        [] => (),
        [last] => {
            table.insert((*last).to_owned(), v);
        }
        [first, rest @ ..] => {
            let entry = table
                .entry(*first)
                .or_insert_with(|| toml::Value::Table(toml::map::Map::new()));
            if !entry.is_table() {
                *entry = toml::Value::Table(toml::map::Map::new());
            }
            if let toml::Value::Table(t) = entry {
                insert_path(t, rest, v);
            }
        }
    }
}
