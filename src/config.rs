//! Parser for the `;`-separated `key=value` configuration string of §6.
//! Hand-rolled rather than pulled from a general config crate: this
//! connection-string shape is specific to this store and every comparable
//! embedded-store crate in this family parses its own terse format the same
//! way.

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq)]
pub struct StorageConfig {
    pub path: Option<String>,
    pub logfile: Option<String>,
    pub threads: usize,
    pub vecdim: usize,
    pub bits: usize,
    pub variations: usize,
    pub simdist: Option<u32>,
    pub probsimdist: Option<u32>,
    pub memtypes: Vec<String>,
    pub commitsize: usize,
    pub maxfeatures: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: None,
            logfile: None,
            threads: 1,
            vecdim: 300,
            bits: 64,
            variations: 8,
            simdist: None,
            probsimdist: None,
            memtypes: Vec::new(),
            commitsize: 1_000,
            maxfeatures: 10_000_000,
        }
    }
}

impl StorageConfig {
    /// Parses a `;`-separated `key=value` configuration string. Unknown keys
    /// are rejected; recognized keys are validated so construction fails
    /// fast rather than partway through building the LshModel.
    pub fn parse(s: &str) -> Result<Self> {
        let mut cfg = Self::default();
        for entry in s.split(';') {
            let entry = entry.trim();
            if entry.is_empty() {
                continue;
            }
            let (key, value) = entry.split_once('=').ok_or_else(|| {
                Error::invalid_argument(format!("malformed configuration entry: '{entry}'"))
            })?;
            let key = key.trim();
            let value = value.trim();
            match key {
                "path" => cfg.path = Some(value.to_string()),
                "logfile" => cfg.logfile = Some(value.to_string()),
                "threads" => cfg.threads = parse_positive_usize(key, value)?,
                "vecdim" => cfg.vecdim = parse_positive_usize(key, value)?,
                "bits" => cfg.bits = parse_positive_usize(key, value)?,
                "variations" => cfg.variations = parse_positive_usize(key, value)?,
                "simdist" => cfg.simdist = Some(parse_positive_usize(key, value)? as u32),
                "probsimdist" => cfg.probsimdist = Some(parse_positive_usize(key, value)? as u32),
                "memtypes" => {
                    cfg.memtypes = value.split(',').map(|t| t.trim().to_string()).filter(|t| !t.is_empty()).collect();
                }
                "commitsize" => cfg.commitsize = parse_positive_usize(key, value)?,
                "maxfeatures" => cfg.maxfeatures = parse_positive_usize(key, value)?,
                other => {
                    return Err(Error::invalid_argument(format!("unrecognized configuration key '{other}'")));
                }
            }
        }
        if cfg.bits > cfg.vecdim {
            return Err(Error::invalid_argument("bits must not exceed vecdim"));
        }
        if let (Some(simdist), Some(probsimdist)) = (cfg.simdist, cfg.probsimdist) {
            if probsimdist < simdist {
                return Err(Error::invalid_argument("probsimdist must be >= simdist"));
            }
        }
        Ok(cfg)
    }
}

fn parse_positive_usize(key: &str, value: &str) -> Result<usize> {
    let n: i64 = value
        .parse()
        .map_err(|_| Error::invalid_argument(format!("'{key}' must be an integer, got '{value}'")))?;
    if n <= 0 {
        return Err(Error::invalid_argument(format!("'{key}' must be positive, got {n}")));
    }
    Ok(n as usize)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_recognized_keys() {
        let cfg = StorageConfig::parse("path=/tmp/store;vecdim=16;bits=8;variations=4;memtypes=Word,Doc").unwrap();
        assert_eq!(cfg.path.as_deref(), Some("/tmp/store"));
        assert_eq!(cfg.vecdim, 16);
        assert_eq!(cfg.bits, 8);
        assert_eq!(cfg.variations, 4);
        assert_eq!(cfg.memtypes, vec!["Word".to_string(), "Doc".to_string()]);
    }

    #[test]
    fn empty_string_yields_defaults() {
        let cfg = StorageConfig::parse("").unwrap();
        assert_eq!(cfg, StorageConfig::default());
    }

    #[test]
    fn rejects_unknown_key() {
        assert!(StorageConfig::parse("bogus=1").is_err());
    }

    #[test]
    fn rejects_malformed_entry() {
        assert!(StorageConfig::parse("vecdim").is_err());
    }

    #[test]
    fn rejects_bits_exceeding_vecdim() {
        assert!(StorageConfig::parse("vecdim=4;bits=8").is_err());
    }

    #[test]
    fn rejects_probsimdist_below_simdist() {
        assert!(StorageConfig::parse("simdist=10;probsimdist=5").is_err());
    }

    #[test]
    fn rejects_non_positive_integer() {
        assert!(StorageConfig::parse("threads=0").is_err());
        assert!(StorageConfig::parse("threads=abc").is_err());
    }
}
