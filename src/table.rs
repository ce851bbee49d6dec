//! Per-group report: sample metadata with scaled principal components.

use std::{fmt, path::Path};

use anyhow::{Context, Result};
use rust_xlsxwriter::{Format, FormatBorder, Workbook};

use crate::{eigen::EigenVectors, samples::SampleRow};

/// Output flavour of the report.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub enum TableFormat {
    /// Tab-separated text (`.pca`).
    #[default]
    Tsv,
    /// Single-sheet spreadsheet (`.xlsx`).
    Xlsx,
}

impl TableFormat {
    pub fn extension(self) -> &'static str {
        match self {
            Self::Tsv => "pca",
            Self::Xlsx => "xlsx",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Text(String),
    Integer(i64),
    Float(f64),
    Missing,
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(value) => f.write_str(value),
            Self::Integer(value) => write!(f, "{value}"),
            Self::Float(value) => write!(f, "{value}"),
            Self::Missing => Ok(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PcaTable {
    header: Vec<String>,
    rows: Vec<Vec<Cell>>,
}

impl PcaTable {
    /// Left join of the scaled eigenvectors onto `samples`.
    ///
    /// Every sample yields one row, in input order; samples without a
    /// matching eigenvector keep missing component cells.
    pub fn merge(columns: &[String], samples: &[&SampleRow], vectors: &EigenVectors) -> Self {
        let n_components = vectors.n_components();
        let header = ["FID", "IID", "SEX"]
            .into_iter()
            .map(String::from)
            .chain(columns.iter().cloned())
            .chain((1..=n_components).map(|i| format!("PC{i}")))
            .collect();

        let rows = samples
            .iter()
            .map(|sample| {
                let mut row = Vec::with_capacity(3 + columns.len() + n_components);
                row.push(Cell::Text(sample.key.fid.clone()));
                row.push(Cell::Text(sample.key.iid.clone()));
                row.push(Cell::Integer(i64::from(sample.sex)));
                row.extend(sample.attributes.iter().map(|value| match value {
                    Some(value) => Cell::Text(value.clone()),
                    None => Cell::Missing,
                }));
                match vectors.get(&sample.key) {
                    Some(values) => row.extend(values.iter().map(|&v| Cell::Float(v))),
                    None => row.extend(std::iter::repeat_n(Cell::Missing, n_components)),
                }
                row
            })
            .collect();

        Self { header, rows }
    }

    pub fn header(&self) -> &[String] {
        &self.header
    }

    pub fn rows(&self) -> &[Vec<Cell>] {
        &self.rows
    }

    pub fn matched_rows(&self) -> usize {
        let Some(first_pc) = self.header.iter().position(|h| h == "PC1") else {
            return 0;
        };
        self.rows
            .iter()
            .filter(|row| !matches!(row[first_pc], Cell::Missing))
            .count()
    }

    pub fn write<P: AsRef<Path>>(&self, path: P, format: TableFormat) -> Result<()> {
        match format {
            TableFormat::Tsv => self.write_tsv(path),
            TableFormat::Xlsx => self.write_xlsx(path),
        }
    }

    pub fn write_tsv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let mut writer = csv::WriterBuilder::new()
            .delimiter(b'\t')
            .from_path(path)
            .with_context(|| format!("failed to create {}", path.display()))?;
        writer.write_record(&self.header)?;
        for row in &self.rows {
            writer.write_record(row.iter().map(Cell::to_string))?;
        }
        writer
            .flush()
            .with_context(|| format!("failed to write {}", path.display()))?;
        Ok(())
    }

    pub fn write_xlsx<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let mut workbook = Workbook::new();
        let header_format = Format::new().set_bold().set_border(FormatBorder::Thin);
        let worksheet = workbook.add_worksheet();
        worksheet.set_name("Sheet1")?;

        for (col, name) in self.header.iter().enumerate() {
            worksheet.write_string_with_format(0, col as u16, name, &header_format)?;
        }
        for (r, row) in self.rows.iter().enumerate() {
            let r = r as u32 + 1;
            for (col, cell) in row.iter().enumerate() {
                let col = col as u16;
                match cell {
                    Cell::Text(value) => {
                        worksheet.write_string(r, col, value)?;
                    }
                    Cell::Integer(value) => {
                        worksheet.write_number(r, col, *value as f64)?;
                    }
                    Cell::Float(value) => {
                        worksheet.write_number(r, col, *value)?;
                    }
                    Cell::Missing => {}
                }
            }
        }

        workbook
            .save(path)
            .with_context(|| format!("failed to write {}", path.display()))?;
        Ok(())
    }
}
