#![doc = include_str!("../README.md")]

pub mod cli;
pub mod eigen;
pub mod pca;
pub mod pipeline;
pub mod samples;
pub mod table;
pub mod taxonomy;
pub mod vcf2plink;

pub use pca::{GroupOutput, PcaConfig, compute_principal_components};
pub use vcf2plink::{ConversionSummary, Vcf2PlinkConfig, convert_vcf_to_plink};
