use std::path::PathBuf;

use anyhow::Result;
use clap::{CommandFactory, Parser, error::ErrorKind};
use tracing_subscriber::{EnvFilter, fmt};

use crate::{
    pca::{self, DEFAULT_COMPONENTS, DEFAULT_GROUPS, PcaConfig, compute_principal_components},
    table::TableFormat,
    vcf2plink::{
        FailedGenotype, SexThresholds, Toolchain, Vcf2PlinkConfig, convert_vcf_to_plink,
    },
};

/// Exit status for unparseable command lines.
pub const USAGE_EXIT_CODE: i32 = 2;

#[derive(Debug, Parser)]
#[command(
    name = "vcf2plink",
    version,
    about = "Convert a VCF file to plink format",
    long_about = None
)]
pub struct Vcf2PlinkCli {
    /// VCF file to be converted ("-" reads standard input)
    #[arg(long, value_name = "in.vcf.gz", default_value = "-")]
    vcf: String,

    /// Reference sequence (e.g. human_g1k_v37.fasta)
    #[arg(long = "ref", value_name = "FILE")]
    reference: PathBuf,

    /// Reference build code(s) (see "plink --help --split-x")
    #[arg(long, value_name = "CODE", required = true, num_args = 1..)]
    build: Vec<String>,

    /// Exclude sites for which the expression is true (e.g. "FORMAT/DP<10 || FORMAT/GQ<20")
    #[arg(long, value_name = "EXPR")]
    filter: Option<String>,

    /// Set genotypes of failed samples to missing (.) or ref (0)
    #[arg(long = "set-GTs", value_enum, value_name = "CHAR", default_value_t = FailedGenotype::Missing)]
    set_gts: FailedGenotype,

    /// Prefix for output files
    #[arg(long, value_name = "PREFIX", default_value = "plink")]
    out: String,

    /// Main workspace size, in GB
    #[arg(long, value_name = "GB")]
    mem: Option<u32>,

    /// Impute sex from chromosome X (see "plink --help --impute-sex")
    #[arg(
        long,
        num_args = 2,
        allow_negative_numbers = true,
        value_names = ["FEMALE_MAX_F", "MALE_MIN_F"]
    )]
    impute_sex: Option<Vec<f64>>,

    /// bcftools executable
    #[arg(long, value_name = "PATH", env = "KGP_BCFTOOLS", default_value = "bcftools")]
    bcftools: PathBuf,

    /// plink executable
    #[arg(long, value_name = "PATH", env = "KGP_PLINK", default_value = "plink")]
    plink: PathBuf,

    /// Logging verbosity (e.g. error, warn, info, debug)
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Vcf2PlinkCli {
    pub fn into_config(self) -> Result<Vcf2PlinkConfig> {
        let impute_sex = match self.impute_sex.as_deref() {
            Some([female_max_f, male_min_f]) => {
                Some(SexThresholds::new(*female_max_f, *male_min_f)?)
            }
            Some(other) => anyhow::bail!("--impute-sex takes 2 values, got {}", other.len()),
            None => None,
        };

        Ok(Vcf2PlinkConfig {
            vcf: (self.vcf != "-").then(|| PathBuf::from(&self.vcf)),
            reference: self.reference,
            builds: self.build,
            filter: self.filter.filter(|expression| !expression.is_empty()),
            set_gts: self.set_gts,
            out: self.out,
            memory_gb: self.mem.filter(|gb| *gb > 0),
            impute_sex,
            tools: Toolchain {
                bcftools: self.bcftools,
                plink: self.plink,
            },
        })
    }
}

#[derive(Debug, Parser)]
#[command(
    name = "kgp2pc",
    version,
    about = "Compute PC components from merged KGP datasets",
    long_about = None
)]
pub struct Kgp2PcCli {
    /// Prefix for binary GRM file
    #[arg(long, value_name = "PREFIX")]
    grm_bin: String,

    /// File with population information
    #[arg(long, value_name = "FILE")]
    pop: PathBuf,

    /// Full name of .fam file
    #[arg(long, value_name = "FILE")]
    fam: PathBuf,

    /// Number of PCs
    #[arg(long, value_name = "INT", default_value_t = DEFAULT_COMPONENTS, value_parser = parse_components)]
    pca: usize,

    /// Prefix for output files
    #[arg(long, value_name = "PREFIX", default_value = "plink")]
    out: String,

    /// Groups to be used for the principal component computations
    #[arg(long, value_name = "GROUPS", default_value = DEFAULT_GROUPS)]
    groups: String,

    /// Exclude all samples named in the file
    #[arg(long, value_name = "FILE")]
    remove: Option<PathBuf>,

    /// Write the output table as an xlsx file
    #[arg(long)]
    xlsx: bool,

    /// gcta64 executable
    #[arg(long, value_name = "PATH", env = "KGP_GCTA64", default_value = "gcta64")]
    gcta64: PathBuf,

    /// Logging verbosity (e.g. error, warn, info, debug)
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn parse_components(raw: &str) -> Result<usize, String> {
    match raw.parse::<usize>() {
        Ok(0) => Err(String::from("number of PCs must be at least 1")),
        Ok(n) => Ok(n),
        Err(err) => Err(err.to_string()),
    }
}

impl Kgp2PcCli {
    pub fn into_config(self) -> PcaConfig {
        PcaConfig {
            grm_bin: self.grm_bin,
            pop: self.pop,
            fam: self.fam,
            n_components: self.pca,
            out: self.out,
            groups: pca::parse_groups(&self.groups),
            remove: self.remove,
            format: if self.xlsx {
                TableFormat::Xlsx
            } else {
                TableFormat::Tsv
            },
            gcta64: self.gcta64,
        }
    }
}

/// Parse the command line, printing the error and help text to stderr and
/// exiting with [`USAGE_EXIT_CODE`] on failure.
fn parse_or_exit<C: Parser>() -> C {
    match C::try_parse() {
        Ok(cli) => cli,
        Err(err) if is_informational(&err) => err.exit(),
        Err(err) => {
            eprint!("{}", usage_failure::<C>(&err));
            std::process::exit(USAGE_EXIT_CODE);
        }
    }
}

/// `--help` and `--version` surface as errors but are not failures.
fn is_informational(err: &clap::Error) -> bool {
    matches!(err.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion)
}

/// Error message followed by the full help text.
fn usage_failure<C: CommandFactory>(err: &clap::Error) -> String {
    format!("{}\n{}", err.render(), C::command().render_help())
}

pub fn run_vcf2plink() -> Result<()> {
    let cli: Vcf2PlinkCli = parse_or_exit();
    init_logging(&cli.log_level)?;

    let config = cli.into_config()?;
    let summary = convert_vcf_to_plink(&config)?;
    tracing::info!(
        "wrote {prefix}.bed/.bim/.fam{filtered}{sex}",
        prefix = summary.prefix,
        filtered = if summary.filtered { " (filtered)" } else { "" },
        sex = if summary.sex_imputed { " with imputed sex" } else { "" },
    );
    Ok(())
}

pub fn run_kgp2pc() -> Result<()> {
    let cli: Kgp2PcCli = parse_or_exit();
    init_logging(&cli.log_level)?;

    let config = cli.into_config();
    let outputs = compute_principal_components(&config)?;
    if outputs.is_empty() {
        tracing::warn!("no group was computed");
    }
    Ok(())
}

fn init_logging(level: &str) -> Result<()> {
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init()
        .ok();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vcf2plink_defaults() {
        let cli = Vcf2PlinkCli::try_parse_from([
            "vcf2plink",
            "--ref",
            "ref.fa",
            "--build",
            "b37",
        ])
        .unwrap();
        let config = cli.into_config().unwrap();
        assert_eq!(config.vcf, None);
        assert_eq!(config.out, "plink");
        assert_eq!(config.set_gts, FailedGenotype::Missing);
        assert_eq!(config.builds, ["b37"]);
        assert!(config.impute_sex.is_none());
    }

    #[test]
    fn vcf2plink_parses_every_option() {
        let cli = Vcf2PlinkCli::try_parse_from([
            "vcf2plink",
            "--vcf",
            "in.vcf.gz",
            "--ref",
            "ref.fa",
            "--build",
            "b37",
            "hg19",
            "--filter",
            "FORMAT/DP<10",
            "--set-GTs",
            "0",
            "--out",
            "dir/out",
            "--mem",
            "8",
            "--impute-sex",
            "0.2",
            "0.8",
        ])
        .unwrap();
        let config = cli.into_config().unwrap();
        assert_eq!(config.vcf, Some(PathBuf::from("in.vcf.gz")));
        assert_eq!(config.builds, ["b37", "hg19"]);
        assert_eq!(config.set_gts, FailedGenotype::Reference);
        assert_eq!(config.memory_gb, Some(8));
        assert_eq!(
            config.impute_sex,
            Some(SexThresholds {
                female_max_f: 0.2,
                male_min_f: 0.8
            })
        );
    }

    #[test]
    fn vcf2plink_requires_reference_and_build() {
        assert!(Vcf2PlinkCli::try_parse_from(["vcf2plink", "--build", "b37"]).is_err());
        assert!(Vcf2PlinkCli::try_parse_from(["vcf2plink", "--ref", "ref.fa"]).is_err());
        assert!(
            Vcf2PlinkCli::try_parse_from([
                "vcf2plink",
                "--ref",
                "ref.fa",
                "--build",
                "b37",
                "--set-GTs",
                "x"
            ])
            .is_err()
        );
    }

    #[test]
    fn vcf2plink_ignores_empty_filter_and_zero_memory() {
        let cli = Vcf2PlinkCli::try_parse_from([
            "vcf2plink", "--ref", "ref.fa", "--build", "b37", "--filter", "", "--mem", "0",
        ])
        .unwrap();
        let config = cli.into_config().unwrap();
        assert_eq!(config.filter, None);
        assert_eq!(config.memory_gb, None);

        let pipeline = crate::vcf2plink::conversion_pipeline(&config);
        assert_eq!(pipeline.stages().len(), 4);
        let plink = pipeline.stages()[3].argv();
        assert!(!plink.iter().any(|arg| arg == "--memory"));
    }

    #[test]
    fn usage_errors_map_to_exit_code_two() {
        let err = Kgp2PcCli::try_parse_from(["kgp2pc"]).unwrap_err();
        assert!(!is_informational(&err));
        assert_eq!(err.exit_code(), USAGE_EXIT_CODE);
    }

    #[test]
    fn usage_failure_shows_error_then_help() {
        let err = Kgp2PcCli::try_parse_from(["kgp2pc", "--pop", "p"]).unwrap_err();
        let text = usage_failure::<Kgp2PcCli>(&err);
        let error_at = text.find("--grm-bin").unwrap();
        let help_at = text.find("Usage:").unwrap();
        assert!(error_at < help_at);
        assert!(text.contains("Number of PCs"));
    }

    #[test]
    fn help_and_version_are_not_usage_failures() {
        let help = Vcf2PlinkCli::try_parse_from(["vcf2plink", "--help"]).unwrap_err();
        let version = Kgp2PcCli::try_parse_from(["kgp2pc", "--version"]).unwrap_err();
        assert!(is_informational(&help));
        assert!(is_informational(&version));
    }

    #[test]
    fn kgp2pc_defaults() {
        let cli = Kgp2PcCli::try_parse_from([
            "kgp2pc",
            "--grm-bin",
            "kgp",
            "--pop",
            "kgp.pop",
            "--fam",
            "kgp.fam",
        ])
        .unwrap();
        let config = cli.into_config();
        assert_eq!(config.n_components, 20);
        assert_eq!(config.out, "plink");
        assert_eq!(config.groups, ["ALL", "AFAM", "EUR"]);
        assert_eq!(config.format, TableFormat::Tsv);
        assert_eq!(config.remove, None);
    }

    #[test]
    fn kgp2pc_rejects_zero_components() {
        assert!(
            Kgp2PcCli::try_parse_from([
                "kgp2pc", "--grm-bin", "kgp", "--pop", "p", "--fam", "f", "--pca", "0",
            ])
            .is_err()
        );
    }

    #[test]
    fn kgp2pc_xlsx_flag() {
        let cli = Kgp2PcCli::try_parse_from([
            "kgp2pc", "--grm-bin", "kgp", "--pop", "p", "--fam", "f", "--xlsx", "--groups", "EAS,BOGUS",
        ])
        .unwrap();
        let config = cli.into_config();
        assert_eq!(config.format, TableFormat::Xlsx);
        assert_eq!(config.groups, ["EAS", "BOGUS"]);
    }
}
