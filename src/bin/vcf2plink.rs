use anyhow::Result;

fn main() -> Result<()> {
    kgp_tools::cli::run_vcf2plink()
}
