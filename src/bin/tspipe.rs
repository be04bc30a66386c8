use clap::{Arg, ArgAction, Command};
use std::process::ExitCode;
use tracing_subscriber::filter::LevelFilter;
use tspipe::config::{create_default_config_template, PipelineConfig};
use tspipe::pipeline::{Pipeline, PipelineStatus, PluginRegistry, StageRole};

const EXIT_ABORTED: u8 = 130;

fn cli() -> Command {
    Command::new("tspipe")
        .version(env!("CARGO_PKG_VERSION"))
        .about(env!("CARGO_PKG_DESCRIPTION"))
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Pipeline configuration file (JSON)")
                .required_unless_present_any(["list-plugins", "init"]),
        )
        .arg(
            Arg::new("init")
                .long("init")
                .value_name("FILE")
                .help("Write a configuration template to FILE and exit"),
        )
        .arg(
            Arg::new("list-plugins")
                .long("list-plugins")
                .action(ArgAction::SetTrue)
                .help("List the available plugins and exit"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(ArgAction::Count)
                .help("Increase log verbosity, repeat for trace output"),
        )
        .arg(
            Arg::new("quiet")
                .short('q')
                .long("quiet")
                .action(ArgAction::SetTrue)
                .conflicts_with("verbose")
                .help("Only log errors"),
        )
}

async fn run(path: &str, registry: &PluginRegistry) -> tspipe::Result<PipelineStatus> {
    let config = PipelineConfig::load(path)?;
    let pipeline = Pipeline::build(&config, registry)?;

    let abort = pipeline.abort_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("interrupted, aborting");
            abort.abort();
        }
    });

    let report = pipeline.run().await?;
    for stage in &report.stages {
        log::info!("{} {}: {} packets", stage.role, stage.name, stage.packets);
    }
    Ok(report.status)
}

#[tokio::main]
async fn main() -> ExitCode {
    let matches = cli().get_matches();

    let level = if matches.get_flag("quiet") {
        LevelFilter::ERROR
    } else {
        match matches.get_count("verbose") {
            0 => LevelFilter::INFO,
            1 => LevelFilter::DEBUG,
            _ => LevelFilter::TRACE,
        }
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    let registry = PluginRegistry::with_builtins();

    if matches.get_flag("list-plugins") {
        for role in [StageRole::Source, StageRole::Transform, StageRole::Sink] {
            println!("{:<10} {}", role, registry.names(role).join(", "));
        }
        return ExitCode::SUCCESS;
    }

    if let Some(path) = matches.get_one::<String>("init") {
        return match create_default_config_template(path) {
            Ok(true) => {
                println!("configuration template written to {}", path);
                ExitCode::SUCCESS
            }
            Ok(false) => {
                eprintln!("{} already exists", path);
                ExitCode::FAILURE
            }
            Err(e) => {
                eprintln!("{}", e);
                ExitCode::FAILURE
            }
        };
    }

    let Some(path) = matches.get_one::<String>("config") else {
        return ExitCode::FAILURE;
    };
    match run(path, &registry).await {
        Ok(PipelineStatus::Completed) => ExitCode::SUCCESS,
        Ok(PipelineStatus::Aborted) => ExitCode::from(EXIT_ABORTED),
        Err(e) => {
            log::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
