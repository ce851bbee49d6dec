use anyhow::Result;

fn main() -> Result<()> {
    kgp_tools::cli::run_kgp2pc()
}
