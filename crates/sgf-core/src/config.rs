//! Configuration: the INI-like single-section config file, resolved into a typed
//! [`RunConfig`], plus the `saveconf` JSON snapshot (SPEC_FULL.md §4.7, §6).

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, SgfError};
use crate::model::{Composition, NoiseDist};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mechanism {
    SeedBased,
    Marginals,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VerboseLevel {
    None,
    Info,
    Verbose,
}

impl VerboseLevel {
    pub fn tracing_level(self) -> tracing::Level {
        match self {
            VerboseLevel::None => tracing::Level::WARN,
            VerboseLevel::Info => tracing::Level::INFO,
            VerboseLevel::Verbose => tracing::Level::DEBUG,
        }
    }
}

/// 0-based equivalent of the C-style enums/bools serialized through
/// `serde`/`serde_json` for the `saveconf` snapshot (SPEC_FULL.md §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    pub workdir: PathBuf,
    pub dataprefix: PathBuf,
    pub attrs: u16,
    pub mechanism: Mechanism,
    pub verbose: VerboseLevel,
    pub runtime_secs: u64,
    pub count: u64,
    pub rngseed: u64,
    #[serde(with = "noise_dist_serde")]
    pub ndist: NoiseDist,
    #[serde(with = "composition_serde")]
    pub ncomp: Composition,
    pub lambda: f64,
    pub budget: f64,
    /// Resolved omega, always in `[0, attrs]`.
    pub omega: u16,
    pub dir_hyperp: f64,
    pub gamma: f64,
    pub max_ps: u64,
    pub max_check_ps: u64,
    pub random_ps: bool,
    pub seeded_noise: bool,
    pub saveconf: bool,
    pub output_seeds: bool,
}

mod noise_dist_serde {
    use super::NoiseDist;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(v: &NoiseDist, s: S) -> std::result::Result<S::Ok, S::Error> {
        let name = match v {
            NoiseDist::None => "none",
            NoiseDist::Laplace => "laplace",
            NoiseDist::Geometric => "geometric",
        };
        name.serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<NoiseDist, D::Error> {
        let name = String::deserialize(d)?;
        Ok(match name.as_str() {
            "none" => NoiseDist::None,
            "laplace" => NoiseDist::Laplace,
            "geometric" => NoiseDist::Geometric,
            other => return Err(serde::de::Error::custom(format!("unknown noise dist '{other}'"))),
        })
    }
}

mod composition_serde {
    use super::Composition;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(v: &Composition, s: S) -> std::result::Result<S::Ok, S::Error> {
        let name = match v {
            Composition::Sequential => "sequential",
            Composition::Advanced => "advanced",
        };
        name.serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Composition, D::Error> {
        let name = String::deserialize(d)?;
        Ok(match name.as_str() {
            "sequential" => Composition::Sequential,
            "advanced" => Composition::Advanced,
            other => return Err(serde::de::Error::custom(format!("unknown composition '{other}'"))),
        })
    }
}

/// Parses the INI-like `[all]`-section config file into a map of raw
/// `key = value` strings, ignoring blank lines, `;`/`#` comments, and the
/// section header itself.
fn parse_kv_lines(text: &str) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for raw in text.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with(';') || line.starts_with('#') {
            continue;
        }
        if line.starts_with('[') && line.ends_with(']') {
            continue;
        }
        if let Some((k, v)) = line.split_once('=') {
            map.insert(k.trim().to_lowercase(), v.trim().to_string());
        }
    }
    map
}

fn required<'a>(map: &'a HashMap<String, String>, key: &str) -> Result<&'a str> {
    map.get(key).map(|s| s.as_str()).ok_or_else(|| SgfError::config(format!("missing required key '{key}'")))
}

fn parse_num<T: std::str::FromStr>(map: &HashMap<String, String>, key: &str, default: T) -> Result<T> {
    match map.get(key) {
        None => Ok(default),
        Some(v) => v.parse().map_err(|_| SgfError::config(format!("invalid value for '{key}': '{v}'"))),
    }
}

pub fn load(path: &Path) -> Result<RunConfig> {
    let text = std::fs::read_to_string(path).map_err(|e| SgfError::io(path.to_path_buf(), e.to_string()))?;
    let map = parse_kv_lines(&text);

    let workdir = PathBuf::from(required(&map, "workdir")?);
    let dataprefix = PathBuf::from(required(&map, "dataprefix")?);
    let attrs: u16 = required(&map, "attrs")?
        .parse()
        .map_err(|_| SgfError::config("'attrs' must be a positive integer"))?;
    if attrs == 0 {
        return Err(SgfError::config("'attrs' must satisfy 0 < attrs < 32768"));
    }

    let mechanism = match map.get("mechanism").map(|s| s.as_str()).unwrap_or("seedbased") {
        "seedbased" => Mechanism::SeedBased,
        "marginals" => Mechanism::Marginals,
        other => return Err(SgfError::config(format!("unknown mechanism '{other}'"))),
    };

    let verbose = match map.get("verbose").map(|s| s.as_str()).unwrap_or("0") {
        "0" | "none" => VerboseLevel::None,
        "16" | "info" => VerboseLevel::Info,
        "32" | "verbose" => VerboseLevel::Verbose,
        other => return Err(SgfError::config(format!("unknown verbose level '{other}'"))),
    };

    let runtime_secs: u64 = parse_num(&map, "runtime", 7_200)?;
    let count: u64 = parse_num(&map, "count", 1u64 << 20)?;
    let rngseed: u64 = parse_num(&map, "rngseed", 0)?;

    let ndist = match map.get("ndist").map(|s| s.as_str()).unwrap_or("lap") {
        "lap" => NoiseDist::Laplace,
        "geom" => NoiseDist::Geometric,
        "no" | "none" => NoiseDist::None,
        other => return Err(SgfError::config(format!("unknown noise distribution '{other}'"))),
    };

    let ncomp = match map.get("ncomp").map(|s| s.as_str()).unwrap_or("seq") {
        "seq" | "def" => Composition::Sequential,
        s if s.starts_with("adv") => Composition::Advanced,
        other => return Err(SgfError::config(format!("unknown composition '{other}'"))),
    };

    let lambda: f64 = parse_num(&map, "lambda", 60.0)?;
    if lambda < 0.0 {
        return Err(SgfError::config("'lambda' must be non-negative"));
    }
    let budget: f64 = parse_num(&map, "budget", 1.0)?;
    if budget < 0.0 {
        return Err(SgfError::config("'budget' must be non-negative"));
    }

    let omega: u16 = match map.get("omega").map(|s| s.as_str()).unwrap_or("m") {
        "m" => attrs,
        s => {
            let v: u16 = s.parse().map_err(|_| SgfError::config(format!("invalid 'omega' value '{s}'")))?;
            if v > attrs {
                return Err(SgfError::config("'omega' must be in [0, attrs]"));
            }
            v
        }
    };

    if mechanism == Mechanism::Marginals && omega != attrs {
        return Err(SgfError::config("'omega' must equal 'attrs' for the 'marginals' mechanism"));
    }

    let dir_hyperp: f64 = parse_num(&map, "dir_hyperp", 1.0)?;
    let gamma: f64 = parse_num(&map, "gamma", 4.0)?;
    if gamma <= 1.0 {
        return Err(SgfError::config("'gamma' must be > 1"));
    }
    let max_ps: u64 = parse_num(&map, "max_ps", 0)?;
    let max_check_ps: u64 = parse_num(&map, "max_check_ps", 0)?;
    let random_ps: bool = parse_bool(&map, "random_ps", true)?;
    let seeded_noise: bool = parse_bool(&map, "seeded_noise", true)?;
    let saveconf: bool = parse_bool(&map, "saveconf", false)?;
    let output_seeds: bool = parse_bool(&map, "output_seeds", false)?;

    if matches!(mechanism, Mechanism::SeedBased | Mechanism::Marginals) && !seeded_noise {
        return Err(SgfError::config("'seeded_noise' must be true for 'seedbased'/'marginals'"));
    }

    Ok(RunConfig {
        workdir,
        dataprefix,
        attrs,
        mechanism,
        verbose,
        runtime_secs,
        count,
        rngseed,
        ndist,
        ncomp,
        lambda,
        budget,
        omega,
        dir_hyperp,
        gamma,
        max_ps,
        max_check_ps,
        random_ps,
        seeded_noise,
        saveconf,
        output_seeds,
    })
}

fn parse_bool(map: &HashMap<String, String>, key: &str, default: bool) -> Result<bool> {
    match map.get(key).map(|s| s.to_lowercase()) {
        None => Ok(default),
        Some(s) => match s.as_str() {
            "1" | "true" | "yes" => Ok(true),
            "0" | "false" | "no" => Ok(false),
            other => Err(SgfError::config(format!("invalid boolean for '{key}': '{other}'"))),
        },
    }
}

/// Persists the fully-resolved config as `<workdir>/<dataprefix-stem>.resolved.json`
/// when `saveconf = true` (SPEC_FULL.md §6).
pub fn save_resolved(cfg: &RunConfig) -> Result<PathBuf> {
    let stem = cfg
        .dataprefix
        .file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "config".to_string());
    let path = cfg.workdir.join(format!("{stem}.resolved.json"));
    let json = serde_json::to_string_pretty(cfg).map_err(|e| SgfError::config(e.to_string()))?;
    std::fs::write(&path, json).map_err(|e| SgfError::io(path.clone(), e.to_string()))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_cfg(dir: &Path, contents: &str) -> PathBuf {
        let path = dir.join("run.cfg");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn parses_required_and_defaulted_keys() {
        let dir = std::env::temp_dir().join(format!("sgf-config-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = write_cfg(
            &dir,
            "[all]\nworkdir = /tmp/ds\ndataprefix = /tmp/ds/data\nattrs = 3\nmechanism = seedbased\nomega = 2\n",
        );
        let cfg = load(&path).unwrap();
        assert_eq!(cfg.attrs, 3);
        assert_eq!(cfg.omega, 2);
        assert_eq!(cfg.mechanism, Mechanism::SeedBased);
        assert_eq!(cfg.gamma, 4.0);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn marginals_with_omega_not_equal_to_attrs_is_a_config_error() {
        let dir = std::env::temp_dir().join(format!("sgf-config-test4-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = write_cfg(
            &dir,
            "[all]\nworkdir = /tmp/ds\ndataprefix = /tmp/ds/data\nattrs = 3\nmechanism = marginals\nomega = 2\n",
        );
        assert!(load(&path).is_err());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn missing_required_key_is_a_config_error() {
        let dir = std::env::temp_dir().join(format!("sgf-config-test2-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = write_cfg(&dir, "[all]\nattrs = 3\n");
        assert!(load(&path).is_err());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn resolved_config_round_trips_through_json() {
        let dir = std::env::temp_dir().join(format!("sgf-config-test3-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = write_cfg(
            &dir,
            "[all]\nworkdir = WORKDIR\ndataprefix = DATA\nattrs = 3\nsaveconf = true\n",
        );
        let mut cfg = load(&path).unwrap();
        cfg.workdir = dir.clone();
        let out_path = save_resolved(&cfg).unwrap();
        let back: RunConfig = serde_json::from_str(&std::fs::read_to_string(&out_path).unwrap()).unwrap();
        let again = serde_json::to_string_pretty(&back).unwrap();
        let original = serde_json::to_string_pretty(&cfg).unwrap();
        assert_eq!(again, original);
        std::fs::remove_dir_all(&dir).ok();
    }
}
