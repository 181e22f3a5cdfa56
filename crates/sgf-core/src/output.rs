//! Output adapters: the generator-output-line format, and the extractor's
//! `.synth`/`.seeds` CSV writers (SPEC_FULL.md §6).

use std::io::{BufRead, Write};

use tracing::warn;

use crate::error::{Result, SgfError};
use crate::record::Record;
use crate::synth::SynthProps;

fn values_csv(values: &[u16]) -> String {
    values.iter().map(|v| (v + 1).to_string()).collect::<Vec<_>>().join(",")
}

/// Writes one generator-output line:
/// `seed_idx, fake_idx, gamma, ec_idx, density, ps_count ; seed_values ; fake_values`
/// `seed_idx = -1` and an empty seed-values section mean a seedless fake.
pub fn write_gen_line<W: Write>(w: &mut W, seed: Option<&Record>, fake: &Record, props: &SynthProps) -> Result<()> {
    let seed_idx: i64 = seed.map(|s| s.idx as i64).unwrap_or(-1);
    let seed_values = seed.map(|s| values_csv(&s.values)).unwrap_or_default();
    writeln!(
        w,
        "{seed_idx},{},{},{},{},{} ; {} ; {}",
        fake.idx, props.gamma, props.ec_idx, props.density, props.ps_count, seed_values, values_csv(&fake.values)
    )?;
    Ok(())
}

/// A parsed generator-output line, ready for the extractor's privacy test.
pub struct GenLineRecord {
    pub seed_idx: i64,
    pub fake_idx: u32,
    pub gamma: f64,
    pub ec_idx: i32,
    pub density: f64,
    pub ps_count: u64,
    pub seed_values: Vec<u16>,
    pub fake_values: Vec<u16>,
}

fn parse_1based_csv(s: &str) -> Option<Vec<u16>> {
    if s.trim().is_empty() {
        return Some(Vec::new());
    }
    s.split(',')
        .map(|f| f.trim().parse::<i64>().ok().and_then(|v| if v >= 1 { Some((v - 1) as u16) } else { None }))
        .collect()
}

/// Parses one generator-output line. Malformed lines are reported as an
/// `IoError` to the caller, which should log and skip per SPEC_FULL.md §7 rather
/// than aborting the whole extraction run.
pub fn parse_gen_line(line: &str) -> Result<GenLineRecord> {
    let parts: Vec<&str> = line.splitn(3, ';').collect();
    if parts.len() != 3 {
        return Err(SgfError::io(None, format!("expected 3 ';'-separated sections, got {}", parts.len())));
    }
    let head: Vec<&str> = parts[0].split(',').map(|s| s.trim()).collect();
    if head.len() != 6 {
        return Err(SgfError::io(None, format!("expected 6 comma-separated head fields, got {}", head.len())));
    }
    let parse_err = |field: &str| SgfError::io(None, format!("invalid field '{field}'"));
    let seed_idx: i64 = head[0].parse().map_err(|_| parse_err(head[0]))?;
    let fake_idx: u32 = head[1].parse().map_err(|_| parse_err(head[1]))?;
    let gamma: f64 = head[2].parse().map_err(|_| parse_err(head[2]))?;
    let ec_idx: i32 = head[3].parse().map_err(|_| parse_err(head[3]))?;
    let density: f64 = head[4].parse().map_err(|_| parse_err(head[4]))?;
    let ps_count: u64 = head[5].parse().map_err(|_| parse_err(head[5]))?;
    let seed_values = parse_1based_csv(parts[1].trim())
        .ok_or_else(|| SgfError::io(None, "invalid seed values"))?;
    let fake_values = parse_1based_csv(parts[2].trim())
        .ok_or_else(|| SgfError::io(None, "invalid fake values"))?;
    Ok(GenLineRecord { seed_idx, fake_idx, gamma, ec_idx, density, ps_count, seed_values, fake_values })
}

/// Reads every line of a generator-output stream, skipping (and warning on) any
/// line that fails to parse rather than aborting the run.
pub fn read_gen_lines<R: BufRead>(r: R) -> Vec<GenLineRecord> {
    let mut out = Vec::new();
    for (lineno, line) in r.lines().enumerate() {
        let line = match line {
            Ok(l) => l,
            Err(e) => {
                warn!(lineno, error = %e, "failed to read generator-output line, skipping");
                continue;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        match parse_gen_line(&line) {
            Ok(rec) => out.push(rec),
            Err(e) => warn!(lineno, error = %e, "malformed generator-output line, skipping"),
        }
    }
    out
}

/// Writes a `.synth` or `.seeds` output CSV: a header line of attribute names
/// followed by 1-based comma-separated value rows.
pub fn write_labeled_csv<W: Write>(w: &mut W, attr_names: &[String], rows: impl Iterator<Item = Vec<u16>>) -> Result<()> {
    writeln!(w, "{}", attr_names.join(","))?;
    for row in rows {
        writeln!(w, "{}", values_csv(&row))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synth::SynthProps;

    #[test]
    fn round_trips_a_seeded_line() {
        let seed = Record::from_values(3, vec![0, 1]);
        let fake = Record::from_values(9, vec![1, 0]);
        let props = SynthProps { gamma: 4.0, ec_idx: 2, density: -1.5, ps_count: 7 };
        let mut buf = Vec::new();
        write_gen_line(&mut buf, Some(&seed), &fake, &props).unwrap();
        let line = String::from_utf8(buf).unwrap();
        let parsed = parse_gen_line(line.trim_end()).unwrap();
        assert_eq!(parsed.seed_idx, 3);
        assert_eq!(parsed.fake_idx, 9);
        assert_eq!(parsed.seed_values, vec![0, 1]);
        assert_eq!(parsed.fake_values, vec![1, 0]);
        assert_eq!(parsed.ps_count, 7);
    }

    #[test]
    fn seedless_line_has_no_seed_values() {
        let fake = Record::from_values(1, vec![0, 0]);
        let props = SynthProps { gamma: 4.0, ec_idx: 0, density: 0.0, ps_count: 100 };
        let mut buf = Vec::new();
        write_gen_line(&mut buf, None, &fake, &props).unwrap();
        let line = String::from_utf8(buf).unwrap();
        let parsed = parse_gen_line(line.trim_end()).unwrap();
        assert_eq!(parsed.seed_idx, -1);
        assert!(parsed.seed_values.is_empty());
    }

    #[test]
    fn malformed_line_is_rejected_not_panicking() {
        assert!(parse_gen_line("not a valid line").is_err());
    }

    #[test]
    fn read_gen_lines_skips_bad_lines_and_keeps_good_ones() {
        let good = {
            let seed = Record::from_values(0, vec![0]);
            let fake = Record::from_values(1, vec![0]);
            let props = SynthProps { gamma: 4.0, ec_idx: 0, density: 0.0, ps_count: 1 };
            let mut buf = Vec::new();
            write_gen_line(&mut buf, Some(&seed), &fake, &props).unwrap();
            String::from_utf8(buf).unwrap()
        };
        let input = format!("garbage line\n{good}");
        let recs = read_gen_lines(std::io::Cursor::new(input));
        assert_eq!(recs.len(), 1);
    }
}
