//! Attribute metadata registry: domain descriptors, best-feature-sets, imputation
//! order, and value groupings, loaded once at startup and immutable thereafter
//! (SPEC_FULL.md §3, §4.5).

use std::path::Path;

use crate::error::{Result, SgfError};

/// Per-attribute descriptor.
#[derive(Debug, Clone)]
pub struct AttrMeta {
    pub name: String,
    pub domain_labels: Vec<String>,
}

impl AttrMeta {
    pub fn domain_size(&self) -> usize {
        self.domain_labels.len()
    }
}

/// Value-to-group bucketization for one attribute: `group_of[v]` is the 0-based
/// group id of value `v`.
#[derive(Debug, Clone)]
pub struct Grouping {
    group_of: Vec<u32>,
}

impl Grouping {
    pub fn group_of(&self, value: u16) -> u32 {
        self.group_of[value as usize]
    }

    /// All values sharing `value`'s group, used to build a count-vector
    /// constraint's "group members" set.
    pub fn members_of_group(&self, group: u32) -> Vec<u16> {
        self.group_of
            .iter()
            .enumerate()
            .filter(|(_, &g)| g == group)
            .map(|(v, _)| v as u16)
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct Metadata {
    attrs: Vec<AttrMeta>,
    /// `bfs[j]` = 0-based parent attribute indices for attribute `j`.
    bfs: Vec<Vec<usize>>,
    /// `bfs_merit[j]` = the trailing merit field from `_dag.csv`, kept for
    /// completeness though the generative models do not currently consume it.
    bfs_merit: Vec<f64>,
    /// `order_by_position[p]` = the 0-based attribute index at position `p` in
    /// the global imputation order.
    order_by_position: Vec<usize>,
    groupings: Vec<Grouping>,
}

impl Metadata {
    pub fn attr_count(&self) -> usize {
        self.attrs.len()
    }

    pub fn attr(&self, j: usize) -> &AttrMeta {
        &self.attrs[j]
    }

    pub fn bfs(&self, j: usize) -> &[usize] {
        &self.bfs[j]
    }

    pub fn bfs_merit(&self, j: usize) -> f64 {
        self.bfs_merit[j]
    }

    /// Full attribute order, 0-based attribute indices sorted by position.
    pub fn order(&self) -> &[usize] {
        &self.order_by_position
    }

    /// The last `omega` entries of the order: attributes that are re-sampled.
    /// The remaining prefix is copied from the seed.
    pub fn order_suffix(&self, omega: usize) -> &[usize] {
        let a = self.order_by_position.len();
        &self.order_by_position[a - omega..]
    }

    pub fn grouping(&self, j: usize) -> &Grouping {
        &self.groupings[j]
    }

    /// Validates that `order` is a topological sort of the DAG induced by `bfs`:
    /// every parent of `j` appears strictly before `j` in the order.
    pub fn validate_topological_order(&self) -> Result<()> {
        let mut position = vec![0usize; self.attrs.len()];
        for (pos, &attr) in self.order_by_position.iter().enumerate() {
            position[attr] = pos;
        }
        for (j, parents) in self.bfs.iter().enumerate() {
            for &p in parents {
                if position[p] >= position[j] {
                    return Err(SgfError::invariant(format!(
                        "attribute {j}'s BFS parent {p} does not precede it in the imputation order"
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn load(dataprefix: &Path, attr_count: usize) -> Result<Metadata> {
        let attrs = load_attrs(dataprefix, attr_count)?;
        let (bfs, bfs_merit) = load_dag(dataprefix, attr_count)?;
        let order_by_position = load_order(dataprefix, attr_count)?;
        let groupings = load_groups(dataprefix, &attrs)?;
        let md = Metadata { attrs, bfs, bfs_merit, order_by_position, groupings };
        md.validate_topological_order()?;
        Ok(md)
    }
}

fn csv_reader(path: &Path) -> Result<csv::Reader<std::fs::File>> {
    csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)
        .map_err(|e| SgfError::io(path.to_path_buf(), e.to_string()))
}

fn load_attrs(dataprefix: &Path, attr_count: usize) -> Result<Vec<AttrMeta>> {
    let path = suffixed(dataprefix, "_attrs.csv");
    let mut rdr = csv_reader(&path)?;
    let mut attrs = Vec::with_capacity(attr_count);
    for rec in rdr.records() {
        let rec = rec.map_err(SgfError::from)?;
        let mut fields = rec.iter();
        let name = fields
            .next()
            .ok_or_else(|| SgfError::io(path.clone(), "empty _attrs.csv row"))?
            .to_string();
        let domain_labels: Vec<String> = fields.map(|s| s.to_string()).collect();
        attrs.push(AttrMeta { name, domain_labels });
    }
    if attrs.len() != attr_count {
        return Err(SgfError::config(format!(
            "_attrs.csv has {} rows, expected {attr_count} (config key 'attrs')",
            attrs.len()
        )));
    }
    Ok(attrs)
}

fn load_dag(dataprefix: &Path, attr_count: usize) -> Result<(Vec<Vec<usize>>, Vec<f64>)> {
    let path = suffixed(dataprefix, "_dag.csv");
    let mut rdr = csv_reader(&path)?;
    let mut bfs = Vec::with_capacity(attr_count);
    let mut merit = Vec::with_capacity(attr_count);
    for rec in rdr.records() {
        let rec = rec.map_err(SgfError::from)?;
        let fields: Vec<&str> = rec.iter().collect();
        if fields.is_empty() {
            return Err(SgfError::io(path.clone(), "empty _dag.csv row"));
        }
        let m = parents_merit_field(fields[fields.len() - 1], &path)?;
        let parents: Vec<usize> = fields[..fields.len() - 1]
            .iter()
            .map(|s| parse_1based(*s, &path))
            .collect::<Result<Vec<usize>>>()?;
        bfs.push(parents);
        merit.push(m);
    }
    if bfs.len() != attr_count {
        return Err(SgfError::config(format!(
            "_dag.csv has {} rows, expected {attr_count}",
            bfs.len()
        )));
    }
    Ok((bfs, merit))
}

fn parents_merit_field(s: &str, path: &Path) -> Result<f64> {
    s.trim()
        .parse::<f64>()
        .map_err(|_| SgfError::io(path.to_path_buf(), format!("invalid merit field '{s}'")))
}

fn parse_1based(s: &str, path: &Path) -> Result<usize> {
    let v: i64 = s
        .trim()
        .parse()
        .map_err(|_| SgfError::io(path.to_path_buf(), format!("invalid 1-based index '{s}'")))?;
    if v < 1 {
        return Err(SgfError::io(path.to_path_buf(), format!("index {v} is not 1-based positive")));
    }
    Ok((v - 1) as usize)
}

fn load_order(dataprefix: &Path, attr_count: usize) -> Result<Vec<usize>> {
    let path = suffixed(dataprefix, "_order.csv");
    let mut rdr = csv_reader(&path)?;
    let mut position_of_attr = vec![usize::MAX; attr_count];
    let mut j = 0usize;
    for rec in rdr.records() {
        let rec = rec.map_err(SgfError::from)?;
        let field = rec
            .iter()
            .next()
            .ok_or_else(|| SgfError::io(path.clone(), "empty _order.csv row"))?;
        let pos = parse_1based(field, &path)?;
        if j >= attr_count {
            return Err(SgfError::config(format!("_order.csv has more than {attr_count} rows")));
        }
        position_of_attr[j] = pos;
        j += 1;
    }
    if j != attr_count {
        return Err(SgfError::config(format!("_order.csv has {j} rows, expected {attr_count}")));
    }
    let mut order_by_position = vec![usize::MAX; attr_count];
    for (attr, &pos) in position_of_attr.iter().enumerate() {
        if pos >= attr_count || order_by_position[pos] != usize::MAX {
            return Err(SgfError::config("_order.csv does not encode a permutation"));
        }
        order_by_position[pos] = attr;
    }
    Ok(order_by_position)
}

fn load_groups(dataprefix: &Path, attrs: &[AttrMeta]) -> Result<Vec<Grouping>> {
    let path = suffixed(dataprefix, "_grps.csv");
    let mut rdr = csv_reader(&path)?;
    let mut groupings = Vec::with_capacity(attrs.len());
    for (j, rec) in rdr.records().enumerate() {
        let rec = rec.map_err(SgfError::from)?;
        let group_of: Result<Vec<u32>> = rec
            .iter()
            .map(|s| -> Result<u32> {
                let g = parse_1based(s, &path)?;
                Ok(g as u32)
            })
            .collect();
        let group_of = group_of?;
        let expected = attrs.get(j).map(|a| a.domain_size()).unwrap_or(0);
        if group_of.len() != expected {
            return Err(SgfError::config(format!(
                "_grps.csv row {j} has {} entries, expected {expected} (domain size)",
                group_of.len()
            )));
        }
        groupings.push(Grouping { group_of });
    }
    if groupings.len() != attrs.len() {
        return Err(SgfError::config(format!(
            "_grps.csv has {} rows, expected {}",
            groupings.len(),
            attrs.len()
        )));
    }
    Ok(groupings)
}

fn suffixed(dataprefix: &Path, suffix: &str) -> std::path::PathBuf {
    let mut s = dataprefix.as_os_str().to_owned();
    s.push(suffix);
    std::path::PathBuf::from(s)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_fixture(dir: &Path, prefix: &str, suffix: &str, contents: &str) {
        let mut f = std::fs::File::create(dir.join(format!("{prefix}{suffix}"))).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
    }

    #[test]
    fn loads_a_small_three_attribute_dataset() {
        let dir = std::env::temp_dir().join(format!("sgf-meta-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        write_fixture(&dir, "ds", "_attrs.csv", "a,v1,v2,v3,v4\nb,v1,v2,v3,v4\nc,v1,v2,v3,v4\n");
        write_fixture(&dir, "ds", "_dag.csv", "1.0\n1,1.0\n1,2,1.0\n");
        write_fixture(&dir, "ds", "_order.csv", "1\n2\n3\n");
        write_fixture(&dir, "ds", "_grps.csv", "1,1,2,2\n1,1,2,2\n1,1,2,2\n");
        let md = Metadata::load(&dir.join("ds"), 3).unwrap();
        assert_eq!(md.attr_count(), 3);
        assert_eq!(md.bfs(1), &[0]);
        assert_eq!(md.bfs(2), &[0, 1]);
        assert_eq!(md.order(), &[0, 1, 2]);
        assert_eq!(md.grouping(0).group_of(0), 0);
        assert_eq!(md.grouping(0).group_of(2), 1);
        std::fs::remove_dir_all(&dir).ok();
    }
}
