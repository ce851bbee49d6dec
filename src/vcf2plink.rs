//! VCF to plink conversion through a bcftools/plink pipeline.

use std::{
    fs, io,
    path::{Path, PathBuf},
};

use thiserror::Error;

use crate::pipeline::{Pipeline, Stage, ToolError};

/// Marker-count threshold passed to `--impute-sex ycount`.
pub const IMPUTE_SEX_MIN_Y_MARKERS: u32 = 10_000;
/// Missingness threshold passed to `--impute-sex ycount`.
pub const IMPUTE_SEX_MAX_Y_MISSINGNESS: u32 = 0;

/// Extensions of the backups plink leaves behind when rewriting a fileset in place.
pub const BACKUP_EXTENSIONS: [&str; 3] = ["bed~", "bim~", "fam~"];

#[derive(Debug, Error)]
pub enum Vcf2PlinkError {
    #[error("failed to create output directory {}", path.display())]
    OutputDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("error while converting VCF file to plink")]
    Conversion(#[source] ToolError),
    #[error("error while imputing sex")]
    ImputeSex(#[source] ToolError),
    #[error("error while removing temporary files ({})", path.display())]
    Cleanup {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(
        "invalid --impute-sex thresholds: female max F ({female_max_f}) must be below male min F ({male_min_f})"
    )]
    InvalidThresholds { female_max_f: f64, male_min_f: f64 },
}

/// What bcftools writes into genotypes of samples failing `--filter`.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, clap::ValueEnum)]
pub enum FailedGenotype {
    /// Set to missing (`.`).
    #[default]
    #[value(name = ".")]
    Missing,
    /// Set to reference (`0`).
    #[value(name = "0")]
    Reference,
}

impl FailedGenotype {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Missing => ".",
            Self::Reference => "0",
        }
    }
}

/// F-statistic thresholds for chromosome X sex imputation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SexThresholds {
    pub female_max_f: f64,
    pub male_min_f: f64,
}

impl SexThresholds {
    pub fn new(female_max_f: f64, male_min_f: f64) -> Result<Self, Vcf2PlinkError> {
        if !(female_max_f.is_finite() && male_min_f.is_finite() && female_max_f < male_min_f) {
            return Err(Vcf2PlinkError::InvalidThresholds {
                female_max_f,
                male_min_f,
            });
        }
        Ok(Self {
            female_max_f,
            male_min_f,
        })
    }
}

/// Where to find the external tools.
#[derive(Debug, Clone)]
pub struct Toolchain {
    pub bcftools: PathBuf,
    pub plink: PathBuf,
}

impl Default for Toolchain {
    fn default() -> Self {
        Self {
            bcftools: PathBuf::from("bcftools"),
            plink: PathBuf::from("plink"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Vcf2PlinkConfig {
    /// Input VCF/BCF; `None` reads standard input.
    pub vcf: Option<PathBuf>,
    pub reference: PathBuf,
    /// Build codes forwarded to `plink --split-x`.
    pub builds: Vec<String>,
    pub filter: Option<String>,
    pub set_gts: FailedGenotype,
    /// Output prefix for the plink fileset.
    pub out: String,
    /// Main workspace size in GB.
    pub memory_gb: Option<u32>,
    pub impute_sex: Option<SexThresholds>,
    pub tools: Toolchain,
}

/// Outcome of a successful run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionSummary {
    pub prefix: String,
    pub filtered: bool,
    pub sex_imputed: bool,
    pub removed_backups: Vec<PathBuf>,
}

/// Build the full conversion chain: bcftools preprocessing piped into plink.
pub fn conversion_pipeline(config: &Vcf2PlinkConfig) -> Pipeline {
    let bcftools = &config.tools.bcftools;
    let mut pipeline = Pipeline::new();

    let mut split = Stage::new(bcftools).args(["norm", "-Ou", "-m", "-any"]);
    if let Some(vcf) = &config.vcf {
        split = split.arg(vcf);
    }
    pipeline.push(split);

    pipeline.push(
        Stage::new(bcftools)
            .args(["norm", "-Ou", "-f"])
            .arg(&config.reference),
    );

    if let Some(expression) = &config.filter {
        pipeline.push(
            Stage::new(bcftools)
                .args(["filter", "-Ou", "-e"])
                .arg(expression)
                .args(["--set-GTs", config.set_gts.as_str()]),
        );
    }

    pipeline.push(Stage::new(bcftools).args([
        "annotate",
        "-Ob",
        "-x",
        "ID",
        "-I",
        "+%CHROM:%POS:%REF:%ALT",
    ]));

    pipeline.push(plink_conversion_stage(config));
    pipeline
}

fn plink_conversion_stage(config: &Vcf2PlinkConfig) -> Stage {
    let mut stage = Stage::new(&config.tools.plink)
        .args([
            "--make-bed",
            "--keep-allele-order",
            "--bcf",
            "/dev/stdin",
            "--vcf-idspace-to",
            "_",
            "--const-fid",
            "--allow-extra-chr",
            "0",
            "--split-x",
        ])
        .args(&config.builds)
        .args(["no-fail", "--out", config.out.as_str()]);
    if let Some(gb) = config.memory_gb {
        stage = stage.args(["--memory".to_string(), (1024 * u64::from(gb)).to_string()]);
    }
    stage
}

/// In-place rewrite of the fileset with sexes imputed from chromosome X.
pub fn impute_sex_stage(config: &Vcf2PlinkConfig, thresholds: SexThresholds) -> Stage {
    Stage::new(&config.tools.plink)
        .args(["--make-bed", "--bfile", config.out.as_str(), "--keep-allele-order"])
        .args([
            "--impute-sex".to_string(),
            "ycount".to_string(),
            thresholds.female_max_f.to_string(),
            thresholds.male_min_f.to_string(),
            IMPUTE_SEX_MIN_Y_MARKERS.to_string(),
            IMPUTE_SEX_MAX_Y_MISSINGNESS.to_string(),
        ])
        .args(["--out", config.out.as_str()])
}

pub fn backup_paths(prefix: &str) -> Vec<PathBuf> {
    BACKUP_EXTENSIONS
        .iter()
        .map(|ext| PathBuf::from(format!("{prefix}.{ext}")))
        .collect()
}

fn ensure_output_dir(prefix: &str) -> Result<(), Vcf2PlinkError> {
    let Some(parent) = Path::new(prefix).parent() else {
        return Ok(());
    };
    if parent.as_os_str().is_empty() || parent.is_dir() {
        return Ok(());
    }
    tracing::debug!("creating output directory {}", parent.display());
    fs::create_dir_all(parent).map_err(|source| Vcf2PlinkError::OutputDir {
        path: parent.to_path_buf(),
        source,
    })
}

/// Convert the configured VCF into a plink fileset.
pub fn convert_vcf_to_plink(config: &Vcf2PlinkConfig) -> Result<ConversionSummary, Vcf2PlinkError> {
    ensure_output_dir(&config.out)?;

    conversion_pipeline(config)
        .run()
        .map_err(Vcf2PlinkError::Conversion)?;

    let mut summary = ConversionSummary {
        prefix: config.out.clone(),
        filtered: config.filter.is_some(),
        sex_imputed: false,
        removed_backups: Vec::new(),
    };

    if let Some(thresholds) = config.impute_sex {
        impute_sex_stage(config, thresholds)
            .run()
            .map_err(Vcf2PlinkError::ImputeSex)?;
        summary.sex_imputed = true;

        for path in backup_paths(&config.out) {
            tracing::info!("removing {}", path.display());
            fs::remove_file(&path).map_err(|source| Vcf2PlinkError::Cleanup {
                path: path.clone(),
                source,
            })?;
            summary.removed_backups.push(path);
        }
    }

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> Vcf2PlinkConfig {
        Vcf2PlinkConfig {
            vcf: Some(PathBuf::from("in.vcf.gz")),
            reference: PathBuf::from("human_g1k_v37.fasta"),
            builds: vec![String::from("b37")],
            filter: None,
            set_gts: FailedGenotype::Missing,
            out: String::from("out/plink"),
            memory_gb: None,
            impute_sex: None,
            tools: Toolchain::default(),
        }
    }

    fn subcommand(stage: &Stage) -> String {
        stage.argv().first().cloned().unwrap_or_default()
    }

    #[test]
    fn annotate_follows_reference_normalization_without_filter() {
        let pipeline = conversion_pipeline(&config());
        let stages = pipeline.stages();
        assert_eq!(stages.len(), 4);
        assert_eq!(stages[1].argv(), ["norm", "-Ou", "-f", "human_g1k_v37.fasta"]);
        assert_eq!(subcommand(&stages[2]), "annotate");
        assert_eq!(stages[3].program(), "plink");
    }

    #[test]
    fn annotate_follows_filter_when_given() {
        let mut config = config();
        config.filter = Some(String::from("FORMAT/DP<10 || FORMAT/GQ<20"));
        config.set_gts = FailedGenotype::Reference;

        let pipeline = conversion_pipeline(&config);
        let stages = pipeline.stages();
        assert_eq!(stages.len(), 5);
        assert_eq!(
            stages[2].argv(),
            [
                "filter",
                "-Ou",
                "-e",
                "FORMAT/DP<10 || FORMAT/GQ<20",
                "--set-GTs",
                "0"
            ]
        );
        assert_eq!(subcommand(&stages[3]), "annotate");
    }

    #[test]
    fn stdin_input_adds_no_file_argument() {
        let mut config = config();
        config.vcf = None;
        let pipeline = conversion_pipeline(&config);
        assert_eq!(pipeline.stages()[0].argv(), ["norm", "-Ou", "-m", "-any"]);

        let pipeline = conversion_pipeline(&self::config());
        assert_eq!(
            pipeline.stages()[0].argv(),
            ["norm", "-Ou", "-m", "-any", "in.vcf.gz"]
        );
    }

    #[test]
    fn plink_stage_carries_builds_and_memory() {
        let mut config = config();
        config.builds = vec![String::from("b37"), String::from("b38")];
        config.memory_gb = Some(4);

        let pipeline = conversion_pipeline(&config);
        let plink = pipeline.stages().last().unwrap().to_string();
        assert!(plink.contains("--split-x b37 b38 no-fail --out out/plink"));
        assert!(plink.ends_with("--memory 4096"));
        assert!(plink.contains("--bcf /dev/stdin"));
    }

    #[test]
    fn impute_sex_stage_uses_fixed_ycount_thresholds() {
        let thresholds = SexThresholds::new(0.2, 0.8).unwrap();
        let stage = impute_sex_stage(&config(), thresholds);
        assert_eq!(
            stage.to_string(),
            "plink --make-bed --bfile out/plink --keep-allele-order \
             --impute-sex ycount 0.2 0.8 10000 0 --out out/plink"
        );
    }

    #[test]
    fn thresholds_must_be_ordered() {
        assert!(SexThresholds::new(0.8, 0.2).is_err());
        assert!(SexThresholds::new(0.5, 0.5).is_err());
        assert!(SexThresholds::new(f64::NAN, 0.8).is_err());
    }

    #[test]
    fn backups_are_the_three_tilde_files() {
        let paths = backup_paths("dir/plink");
        assert_eq!(
            paths,
            [
                PathBuf::from("dir/plink.bed~"),
                PathBuf::from("dir/plink.bim~"),
                PathBuf::from("dir/plink.fam~"),
            ]
        );
    }
}
