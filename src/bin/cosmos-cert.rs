use anyhow::Result;
use clap::{Arg, ArgAction, Command};
use log::{error, info};
use std::process::ExitCode;

use cosmos_cert::config::{create_sample_config, load_config};
use cosmos_cert::ports::PortAllocator;
use cosmos_cert::suite::Certification;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let matches = Command::new("cosmos-cert")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Certification run for the Dapr CosmosDB output binding")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
                .default_value("config/cosmos-cert.toml"),
        )
        .arg(
            Arg::new("daprd")
                .short('d')
                .long("daprd")
                .value_name("PATH")
                .help("Path to the daprd binary"),
        )
        .arg(
            Arg::new("components")
                .long("components")
                .value_name("DIR")
                .help("Directory holding the component variants"),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("daprd log level (debug, info, warn, error)"),
        )
        .arg(
            Arg::new("startup-timeout")
                .long("startup-timeout")
                .value_name("SECONDS")
                .help("How long to wait for a sidecar to become ready"),
        )
        .arg(
            Arg::new("flow")
                .short('f')
                .long("flow")
                .value_name("NAME")
                .action(ArgAction::Append)
                .help("Run only this flow (repeatable); defaults to all flows"),
        )
        .arg(
            Arg::new("init-config")
                .long("init-config")
                .value_name("FILE")
                .help("Write a sample configuration file and exit"),
        )
        .get_matches();

    if let Some(path) = matches.get_one::<String>("init-config") {
        create_sample_config(path)?;
        return Ok(ExitCode::SUCCESS);
    }

    let config_path = matches.get_one::<String>("config");
    let config = load_config(config_path.map(|s| s.as_str()), &matches)?;
    let certification = Certification::new(config);

    let names: Vec<&str> = match matches.get_many::<String>("flow") {
        Some(flows) => flows.map(String::as_str).collect(),
        None => Certification::flow_names().to_vec(),
    };

    let mut allocator = PortAllocator::new();
    let reports = certification.run(&names, &mut allocator).await?;

    let mut failed = 0;
    for report in &reports {
        println!("{report}");
        if !report.passed() {
            failed += 1;
        }
    }

    if failed > 0 {
        error!("{failed} of {} flows failed", reports.len());
        return Ok(ExitCode::FAILURE);
    }

    info!("All {} flows passed", reports.len());
    Ok(ExitCode::SUCCESS)
}
