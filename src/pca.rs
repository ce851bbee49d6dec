//! Population-stratified principal components with gcta64.
//!
//! For every requested group the samples of that group (plus unlabelled
//! samples) are handed to `gcta64 --pca` through its standard input, and the
//! eigenvalue-scaled eigenvectors are joined back onto the sample metadata.

use std::path::PathBuf;

use anyhow::{Context, Result};
use thiserror::Error;

use crate::{
    eigen::{read_eigenvalues, read_eigenvectors},
    pipeline::{Stage, ToolError},
    samples::{SampleTable, keep_list},
    table::{PcaTable, TableFormat},
    taxonomy::Taxonomy,
};

pub const DEFAULT_GROUPS: &str = "ALL,AFAM,EUR";
pub const DEFAULT_COMPONENTS: usize = 20;

#[derive(Debug, Error)]
pub enum PcaError {
    #[error("input file {} not present", path.display())]
    MissingInput { path: PathBuf },
    #[error("problems running gcta64 for group {group}")]
    Gcta {
        group: String,
        #[source]
        source: ToolError,
    },
}

#[derive(Debug, Clone)]
pub struct PcaConfig {
    /// Prefix of the binary GRM (`<prefix>.grm.id`, `<prefix>.grm.bin`).
    pub grm_bin: String,
    pub pop: PathBuf,
    pub fam: PathBuf,
    pub n_components: usize,
    pub out: String,
    pub groups: Vec<String>,
    pub remove: Option<PathBuf>,
    pub format: TableFormat,
    pub gcta64: PathBuf,
}

impl PcaConfig {
    pub fn group_prefix(&self, group: &str) -> String {
        format!("{}.{}", self.out, group.to_lowercase())
    }

    pub fn output_path(&self, group: &str) -> PathBuf {
        PathBuf::from(format!(
            "{}.{}",
            self.group_prefix(group),
            self.format.extension()
        ))
    }
}

/// Split a comma-separated group list.
pub fn parse_groups(list: &str) -> Vec<String> {
    list.split(',').map(|group| group.trim().to_string()).collect()
}

/// Result for one group that ran to completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupOutput {
    pub group: String,
    pub path: PathBuf,
    pub samples: usize,
    pub matched: usize,
}

/// Fail early when the GRM pair or the exclusion list is missing.
pub fn check_inputs(config: &PcaConfig) -> Result<(), PcaError> {
    for suffix in ["grm.id", "grm.bin"] {
        let path = PathBuf::from(format!("{}.{suffix}", config.grm_bin));
        if !path.is_file() {
            return Err(PcaError::MissingInput { path });
        }
    }
    if let Some(remove) = &config.remove
        && !remove.is_file()
    {
        return Err(PcaError::MissingInput {
            path: remove.clone(),
        });
    }
    Ok(())
}

pub fn gcta_stage(config: &PcaConfig, group: &str) -> Stage {
    let mut stage = Stage::new(&config.gcta64)
        .args(["--grm-bin", config.grm_bin.as_str()])
        .args(["--keep", "/dev/stdin"])
        .arg("--pca")
        .arg(config.n_components.to_string())
        .args(["--out".to_string(), config.group_prefix(group)]);
    if let Some(remove) = &config.remove {
        stage = stage.arg("--remove").arg(remove);
    }
    stage
}

/// Run every requested group in order. Undefined groups are skipped with a
/// warning; any other failure stops the whole run.
pub fn compute_principal_components(config: &PcaConfig) -> Result<Vec<GroupOutput>> {
    check_inputs(config)?;
    let samples = SampleTable::load(&config.fam, &config.pop)?;
    let taxonomy = Taxonomy::global();

    let mut outputs = Vec::new();
    for group in &config.groups {
        if !taxonomy.is_defined(group) {
            tracing::warn!("group {group} undefined");
            continue;
        }
        outputs.push(run_group(config, &samples, taxonomy, group)?);
    }
    Ok(outputs)
}

fn run_group(
    config: &PcaConfig,
    samples: &SampleTable,
    taxonomy: &Taxonomy,
    group: &str,
) -> Result<GroupOutput> {
    tracing::info!("computing PC for group {group}");
    let mask = samples
        .keep_mask(taxonomy, group)
        .with_context(|| format!("group {group} undefined"))?;
    let kept = samples.select(&mask);
    tracing::debug!("{} samples kept for group {group}", kept.len());

    gcta_stage(config, group)
        .run_with_input(keep_list(&kept).into_bytes())
        .map_err(|source| PcaError::Gcta {
            group: group.to_string(),
            source,
        })?;

    let prefix = config.group_prefix(group);
    let eigenvalues = read_eigenvalues(format!("{prefix}.eigenval"))?;
    let mut vectors = read_eigenvectors(format!("{prefix}.eigenvec"), config.n_components)?;
    vectors
        .scale(&eigenvalues)
        .with_context(|| format!("failed to scale components for group {group}"))?;

    let table = PcaTable::merge(samples.columns(), &kept, &vectors);
    let path = config.output_path(group);
    table.write(&path, config.format)?;

    let output = GroupOutput {
        group: group.to_string(),
        path,
        samples: table.rows().len(),
        matched: table.matched_rows(),
    };
    tracing::info!(
        "wrote {} ({} samples, {} with components)",
        output.path.display(),
        output.samples,
        output.matched
    );
    Ok(output)
}
