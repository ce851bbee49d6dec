//! Pedigree and population tables, joined into one sample table.

use std::{
    collections::HashMap,
    fs,
    path::Path,
};

use anyhow::{Context, Result, anyhow, bail};

use crate::taxonomy::{DEFAULT_POPULATION, Taxonomy};

/// Cells read as missing in the population table, the same set pandas
/// treats as NA by default.
const MISSING_TOKENS: &[&str] = &[
    "#N/A", "#NA", "-1.#IND", "-1.#QNAN", "-NaN", "-nan", "1.#IND", "1.#QNAN", "<NA>", "N/A",
    "NA", "NULL", "NaN", "None", "n/a", "nan", "null",
];

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SampleKey {
    pub fid: String,
    pub iid: String,
}

impl SampleKey {
    pub fn new(fid: impl Into<String>, iid: impl Into<String>) -> Self {
        Self {
            fid: fid.into(),
            iid: iid.into(),
        }
    }
}

/// One line of a plink `.fam` file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FamRecord {
    pub key: SampleKey,
    pub paternal: String,
    pub maternal: String,
    pub sex: i32,
    pub phenotype: i32,
}

pub fn read_fam<P: AsRef<Path>>(path: P) -> Result<Vec<FamRecord>> {
    let path = path.as_ref();
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    parse_fam(&text).with_context(|| format!("failed to parse {}", path.display()))
}

pub fn parse_fam(text: &str) -> Result<Vec<FamRecord>> {
    let mut records = Vec::new();
    for (line_num, line) in text.lines().enumerate() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.is_empty() {
            continue;
        }
        let &[fid, iid, paternal, maternal, sex, phenotype] = fields.as_slice() else {
            bail!(
                "line {}: expected 6 columns, found {}",
                line_num + 1,
                fields.len()
            );
        };
        let parse_code = |value: &str, column: &str| {
            value
                .parse::<i32>()
                .with_context(|| format!("line {}: invalid {column} code '{value}'", line_num + 1))
        };
        records.push(FamRecord {
            key: SampleKey::new(fid, iid),
            paternal: paternal.to_string(),
            maternal: maternal.to_string(),
            sex: parse_code(sex, "SEX")?,
            phenotype: parse_code(phenotype, "PHE")?,
        });
    }
    Ok(records)
}

/// Whitespace-delimited table with a header naming at least FID, IID and POP.
/// An optional SEX column takes part in the join key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PopulationTable {
    /// Carried columns, i.e. everything except FID, IID and SEX.
    columns: Vec<String>,
    pop_column: usize,
    has_sex: bool,
    rows: HashMap<SampleKey, PopulationEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct PopulationEntry {
    sex: Option<String>,
    values: Vec<Option<String>>,
}

impl PopulationTable {
    /// Carried values for the sample, if one matches on (FID, IID) and, when
    /// the table has a SEX column, on sex too.
    pub fn get(&self, key: &SampleKey, sex: i32) -> Option<&[Option<String>]> {
        let entry = self.rows.get(key)?;
        if self.has_sex && !sex_matches(entry.sex.as_deref(), sex) {
            return None;
        }
        Some(&entry.values)
    }
}

/// A missing or non-numeric SEX cell never matches.
fn sex_matches(cell: Option<&str>, sex: i32) -> bool {
    cell.and_then(|value| value.parse::<f64>().ok())
        .is_some_and(|value| value == f64::from(sex))
}

pub fn read_population_table<P: AsRef<Path>>(path: P) -> Result<PopulationTable> {
    let path = path.as_ref();
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    parse_population_table(&text).with_context(|| format!("failed to parse {}", path.display()))
}

pub fn parse_population_table(text: &str) -> Result<PopulationTable> {
    let mut lines = text
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty());
    let (_, header) = lines.next().ok_or_else(|| anyhow!("missing header line"))?;
    let header: Vec<&str> = header.split_whitespace().collect();

    let position = |name: &str| header.iter().position(|column| *column == name);
    let fid_index = position("FID").ok_or_else(|| anyhow!("missing FID column"))?;
    let iid_index = position("IID").ok_or_else(|| anyhow!("missing IID column"))?;
    position("POP").ok_or_else(|| anyhow!("missing POP column"))?;
    let sex_index = position("SEX");

    let carried: Vec<usize> = (0..header.len())
        .filter(|&i| !matches!(header[i], "FID" | "IID" | "SEX"))
        .collect();
    let columns: Vec<String> = carried.iter().map(|&i| header[i].to_string()).collect();
    let pop_column = columns
        .iter()
        .position(|column| column == "POP")
        .ok_or_else(|| anyhow!("missing POP column"))?;

    let mut rows = HashMap::new();
    for (line_num, line) in lines {
        let fields: Vec<&str> = line.split_whitespace().collect();
        // Short rows are padded with missing cells.
        if fields.len() > header.len() {
            bail!(
                "line {}: expected {} columns, found {}",
                line_num + 1,
                header.len(),
                fields.len()
            );
        }
        let (Some(fid), Some(iid)) = (fields.get(fid_index), fields.get(iid_index)) else {
            bail!("line {}: missing FID or IID", line_num + 1);
        };
        let key = SampleKey::new(*fid, *iid);
        let cell = |i: usize| fields.get(i).and_then(|value| parse_cell(value));
        let values: Vec<Option<String>> = carried.iter().map(|&i| cell(i)).collect();
        let sex = sex_index.and_then(cell);
        if rows.contains_key(&key) {
            tracing::warn!(
                "duplicate population entry for {} {}, keeping the first",
                key.fid,
                key.iid
            );
            continue;
        }
        rows.insert(key, PopulationEntry { sex, values });
    }

    Ok(PopulationTable {
        columns,
        pop_column,
        has_sex: sex_index.is_some(),
        rows,
    })
}

fn parse_cell(value: &str) -> Option<String> {
    if MISSING_TOKENS.contains(&value) {
        None
    } else {
        Some(value.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleRow {
    pub key: SampleKey,
    pub sex: i32,
    /// Values for [`SampleTable::columns`]; the POP cell is always filled.
    pub attributes: Vec<Option<String>>,
}

/// Pedigree samples left-joined with population metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleTable {
    columns: Vec<String>,
    pop_column: usize,
    rows: Vec<SampleRow>,
}

impl SampleTable {
    /// Left join on (FID, IID), plus SEX when the population table has it.
    /// Pedigree samples without a match, or with an empty POP, get
    /// [`DEFAULT_POPULATION`]; samples only present in the population table
    /// are dropped.
    pub fn join(fam: &[FamRecord], populations: &PopulationTable) -> Self {
        let width = populations.columns.len();
        let rows = fam
            .iter()
            .map(|record| {
                let mut attributes = populations
                    .get(&record.key, record.sex)
                    .map(<[Option<String>]>::to_vec)
                    .unwrap_or_else(|| vec![None; width]);
                let pop = &mut attributes[populations.pop_column];
                if pop.is_none() {
                    *pop = Some(DEFAULT_POPULATION.to_string());
                }
                SampleRow {
                    key: record.key.clone(),
                    sex: record.sex,
                    attributes,
                }
            })
            .collect();

        Self {
            columns: populations.columns.clone(),
            pop_column: populations.pop_column,
            rows,
        }
    }

    pub fn load<P: AsRef<Path>, Q: AsRef<Path>>(fam: P, pop: Q) -> Result<Self> {
        let fam = read_fam(fam)?;
        let populations = read_population_table(pop)?;
        let table = Self::join(&fam, &populations);
        tracing::info!(
            "loaded {} samples ({} with a population label)",
            table.len(),
            table
                .rows
                .iter()
                .filter(|row| table.population(row) != DEFAULT_POPULATION)
                .count()
        );
        Ok(table)
    }

    /// Population metadata columns, POP included.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[SampleRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn population<'a>(&self, row: &'a SampleRow) -> &'a str {
        row.attributes[self.pop_column]
            .as_deref()
            .unwrap_or(DEFAULT_POPULATION)
    }

    /// Per-row membership of `group`, or `None` if the group is undefined.
    pub fn membership(&self, taxonomy: &Taxonomy, group: &str) -> Option<Vec<bool>> {
        let codes = taxonomy.codes(group)?;
        Some(
            self.rows
                .iter()
                .map(|row| codes.contains(self.population(row)))
                .collect(),
        )
    }

    /// Rows analysed for `group`: its members plus every unlabelled sample.
    pub fn keep_mask(&self, taxonomy: &Taxonomy, group: &str) -> Option<Vec<bool>> {
        let members = self.membership(taxonomy, group)?;
        let unlabelled = self.membership(taxonomy, DEFAULT_POPULATION)?;
        Some(
            members
                .into_iter()
                .zip(unlabelled)
                .map(|(member, unlabelled)| member || unlabelled)
                .collect(),
        )
    }

    pub fn select(&self, mask: &[bool]) -> Vec<&SampleRow> {
        self.rows
            .iter()
            .zip(mask)
            .filter_map(|(row, &keep)| keep.then_some(row))
            .collect()
    }
}

/// Keep-list text for gcta64: one `FID\tIID` line per sample.
pub fn keep_list(rows: &[&SampleRow]) -> String {
    rows.iter()
        .map(|row| format!("{}\t{}\n", row.key.fid, row.key.iid))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const FAM: &str = "\
F1 S1 0 0 1 -9
F2 S2 0 0 2 -9
F3 S3 0 0 0 -9
";

    const POP: &str = "\
FID IID POP SUPER
F1 S1 CEU EUR
F2 S2 NA AFR
F9 S9 YRI AFR
";

    fn table() -> SampleTable {
        let fam = parse_fam(FAM).unwrap();
        let pop = parse_population_table(POP).unwrap();
        SampleTable::join(&fam, &pop)
    }

    #[test]
    fn fam_requires_six_columns() {
        assert!(parse_fam("F1 S1 0 0 1\n").is_err());
        assert!(parse_fam("F1 S1 0 0 X -9\n").is_err());
        let records = parse_fam("\nF1\tS1  P M 2 1\n").unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].maternal, "M");
        assert_eq!(records[0].sex, 2);
    }

    #[test]
    fn population_table_needs_key_and_pop_columns() {
        assert!(parse_population_table("FID IID\nF1 S1\n").is_err());
        assert!(parse_population_table("IID POP\nS1 CEU\n").is_err());
        assert!(parse_population_table("").is_err());
    }

    #[test]
    fn join_keeps_fam_order_and_defaults_missing_labels() {
        let table = table();
        assert_eq!(table.columns(), ["POP", "SUPER"]);
        let pops: Vec<&str> = table.rows().iter().map(|r| table.population(r)).collect();
        assert_eq!(pops, ["CEU", "SET", "SET"]);
        assert_eq!(table.rows()[1].attributes[1].as_deref(), Some("AFR"));
        assert_eq!(table.rows()[2].attributes[1], None);
        // F9 S9 only exists in the population file
        assert!(table.rows().iter().all(|r| r.key.iid != "S9"));
    }

    #[test]
    fn all_null_populations_become_default_members() {
        let fam = parse_fam(FAM).unwrap();
        let pop = parse_population_table("FID IID POP\nF1 S1 NA\nF2 S2 nan\n").unwrap();
        let table = SampleTable::join(&fam, &pop);
        let taxonomy = Taxonomy::global();

        assert!(table.rows().iter().all(|r| table.population(r) == "SET"));
        assert_eq!(table.membership(taxonomy, "SET"), Some(vec![true; 3]));
        assert_eq!(table.membership(taxonomy, "ALL"), Some(vec![false; 3]));
    }

    #[test]
    fn keep_mask_adds_unlabelled_samples() {
        let table = table();
        let taxonomy = Taxonomy::global();
        assert_eq!(
            table.membership(taxonomy, "EUR"),
            Some(vec![true, false, false])
        );
        assert_eq!(table.keep_mask(taxonomy, "EUR"), Some(vec![true; 3]));
        assert_eq!(
            table.keep_mask(taxonomy, "EAS"),
            Some(vec![false, true, true])
        );
        assert_eq!(table.keep_mask(taxonomy, "BOGUS"), None);
    }

    #[test]
    fn keep_list_is_tab_separated() {
        let table = table();
        let mask = table.keep_mask(Taxonomy::global(), "EAS").unwrap();
        assert_eq!(keep_list(&table.select(&mask)), "F2\tS2\nF3\tS3\n");
    }

    #[test]
    fn sex_column_in_population_file_joins_with_fam_sex() {
        let fam = parse_fam(FAM).unwrap();
        let pop =
            parse_population_table("FID IID SEX POP\nF1 S1 2 GBR\nF2 S2 2 YRI\nF3 S3 NA CHB\n")
                .unwrap();
        let table = SampleTable::join(&fam, &pop);
        assert_eq!(table.columns(), ["POP"]);
        let pops: Vec<&str> = table.rows().iter().map(|r| table.population(r)).collect();
        assert_eq!(pops, ["SET", "YRI", "SET"]);
        // the pedigree sex is reported either way
        assert_eq!(table.rows()[0].sex, 1);
    }

    #[test]
    fn short_rows_are_padded_with_missing_cells() {
        let fam = parse_fam(FAM).unwrap();
        let pop = parse_population_table("FID IID POP SUPER\nF1 S1 CEU\nF2 S2\n").unwrap();
        let table = SampleTable::join(&fam, &pop);
        let pops: Vec<&str> = table.rows().iter().map(|r| table.population(r)).collect();
        assert_eq!(pops, ["CEU", "SET", "SET"]);
        assert_eq!(table.rows()[0].attributes[1], None);

        assert!(parse_population_table("FID IID POP\nF1 S1 CEU EUR\n").is_err());
        assert!(parse_population_table("POP FID IID\nCEU F1\n").is_err());
    }

    #[test]
    fn pandas_missing_markers_become_default_members() {
        let fam = parse_fam(FAM).unwrap();
        let pop =
            parse_population_table("FID IID POP\nF1 S1 None\nF2 S2 n/a\nF3 S3 <NA>\n").unwrap();
        let table = SampleTable::join(&fam, &pop);
        assert!(table.rows().iter().all(|r| table.population(r) == "SET"));
    }
}
