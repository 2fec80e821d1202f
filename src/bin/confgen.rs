//! Policy compiler
//!
//! Validates the gateway policy document and compiles it into the Envoy
//! static bootstrap the fronting proxy is started with.

use std::path::PathBuf;

use clap::Parser;

use gatehouse::compiler::{compile_to_file, CompileExternals};
use gatehouse::policy::GatewayPolicy;

/// confgen - compiles the gateway policy into the Envoy bootstrap
#[derive(Parser, Debug)]
#[command(name = "confgen", version, about, long_about = None)]
struct Cli {
    /// API config file path
    #[arg(long = "api-conf", default_value = "config.yaml")]
    api_conf: PathBuf,

    /// Output Envoy config file
    #[arg(long = "out-envoy-conf", default_value = "conf_out.yaml")]
    out_envoy_conf: PathBuf,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let policy = GatewayPolicy::load(&cli.api_conf)?;
    compile_to_file(&policy, &CompileExternals::from_env(), &cli.out_envoy_conf)?;

    println!("done");
    Ok(())
}
