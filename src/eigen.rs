//! Readers for gcta64 `.eigenval` / `.eigenvec` output.

use std::{collections::HashMap, fs, path::Path};

use anyhow::{Context, Result, anyhow, bail};

use crate::samples::SampleKey;

pub fn read_eigenvalues<P: AsRef<Path>>(path: P) -> Result<Vec<f64>> {
    let path = path.as_ref();
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    parse_eigenvalues(&text).with_context(|| format!("failed to parse {}", path.display()))
}

pub fn parse_eigenvalues(text: &str) -> Result<Vec<f64>> {
    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(line_num, line)| {
            let value = line.trim();
            value
                .parse::<f64>()
                .map_err(|_| anyhow!("line {}: invalid eigenvalue '{value}'", line_num + 1))
        })
        .collect()
}

/// Per-sample principal component loadings, in file order.
#[derive(Debug, Clone, PartialEq)]
pub struct EigenVectors {
    n_components: usize,
    rows: Vec<(SampleKey, Vec<f64>)>,
    index: HashMap<SampleKey, usize>,
}

impl EigenVectors {
    pub fn n_components(&self) -> usize {
        self.n_components
    }

    pub fn get(&self, key: &SampleKey) -> Option<&[f64]> {
        self.index.get(key).map(|&i| self.rows[i].1.as_slice())
    }

    /// Multiply component `i` of every sample by `eigenvalues[i]`.
    pub fn scale(&mut self, eigenvalues: &[f64]) -> Result<()> {
        if eigenvalues.len() < self.n_components {
            bail!(
                "expected {} eigenvalues, found {}",
                self.n_components,
                eigenvalues.len()
            );
        }
        for (_, values) in &mut self.rows {
            for (value, eigenvalue) in values.iter_mut().zip(eigenvalues) {
                *value *= eigenvalue;
            }
        }
        Ok(())
    }
}

pub fn read_eigenvectors<P: AsRef<Path>>(path: P, n_components: usize) -> Result<EigenVectors> {
    let path = path.as_ref();
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    parse_eigenvectors(&text, n_components)
        .with_context(|| format!("failed to parse {}", path.display()))
}

pub fn parse_eigenvectors(text: &str, n_components: usize) -> Result<EigenVectors> {
    let mut rows = Vec::new();
    let mut index = HashMap::new();

    for (line_num, line) in text.lines().enumerate() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.is_empty() {
            continue;
        }
        if fields.len() != n_components + 2 {
            bail!(
                "line {}: expected {} columns, found {}",
                line_num + 1,
                n_components + 2,
                fields.len()
            );
        }
        let values = fields[2..]
            .iter()
            .map(|field| {
                field
                    .parse::<f64>()
                    .map_err(|_| anyhow!("line {}: invalid value '{field}'", line_num + 1))
            })
            .collect::<Result<Vec<f64>>>()?;
        let key = SampleKey::new(fields[0], fields[1]);
        index.entry(key.clone()).or_insert(rows.len());
        rows.push((key, values));
    }

    Ok(EigenVectors {
        n_components,
        rows,
        index,
    })
}
