#[macro_use]
extern crate clap;
extern crate loggerv;
#[macro_use]
extern crate log;

extern crate kraze;
extern crate kraze_core;
extern crate tokio;

use std::path::PathBuf;
use std::process;
use std::time::Duration;

use clap::{App, AppSettings, Arg, ArgMatches, SubCommand};

use kraze::engine::{Engine, EngineOptions, Filter, UpOutcome};
use kraze::error::ErrorKind;
use kraze_core::{parse_duration, Config};

fn build_cli() -> App<'static, 'static> {
    App::new("kraze")
        .version(crate_version!())
        .setting(AppSettings::VersionlessSubcommands)
        .setting(AppSettings::SubcommandRequiredElseHelp)
        .setting(AppSettings::ColoredHelp)
        .setting(AppSettings::DeriveDisplayOrder)
        .about("Declarative local-Kubernetes environment manager: deploy right meow, docker-compose style.")
        .arg(
            Arg::with_name("verbose")
                .short("v")
                .multiple(true)
                .global(true)
                .help("Increase verbosity"),
        )
        .subcommand(up_subcommand())
        .subcommand(down_subcommand())
}

fn common_args<'a, 'b>(cmd: App<'a, 'b>) -> App<'a, 'b> {
    cmd.arg(
        Arg::with_name("file")
            .short("f")
            .long("file")
            .takes_value(true)
            .default_value("kraze.yaml")
            .help("Path to the cluster config"),
    )
    .arg(
        Arg::with_name("label")
            .short("l")
            .long("label")
            .takes_value(true)
            .multiple(true)
            .number_of_values(1)
            .help("Filter by label selector key=value (repeatable)"),
    )
    .arg(
        Arg::with_name("keep-crds")
            .long("keep-crds")
            .help("Leave CRDs behind on uninstall"),
    )
    .arg(
        Arg::with_name("services")
            .multiple(true)
            .help("Service names to operate on"),
    )
}

fn up_subcommand() -> App<'static, 'static> {
    common_args(SubCommand::with_name("up").about("Bring the declared services up"))
        .arg(
            Arg::with_name("dry-run")
                .long("dry-run")
                .help("Print the resolved subset of services and exit"),
        )
        .arg(
            Arg::with_name("no-wait")
                .long("no-wait")
                .help("Do not wait for services to report ready"),
        )
        .arg(
            Arg::with_name("timeout")
                .long("timeout")
                .takes_value(true)
                .help("Wait timeout, e.g. 10m (default 10m)"),
        )
        .arg(
            Arg::with_name("no-deps")
                .long("no-deps")
                .help("Do not expand or order the named services by their dependencies"),
        )
}

fn down_subcommand() -> App<'static, 'static> {
    common_args(SubCommand::with_name("down").about("Tear the declared services down"))
}

fn init_logging(args: &ArgMatches<'_>) {
    loggerv::Logger::new()
        .verbosity(args.occurrences_of("verbose") + 1)
        .module_path(true)
        .init()
        .unwrap();
}

fn print_error_chain(e: &kraze::Error) {
    error!("{}", e);
    for cause in e.iter().skip(1) {
        warn!("caused by: {}", cause);
    }
}

#[tokio::main]
async fn main() {
    let args = build_cli().get_matches();
    init_logging(&args);

    let result = match args.subcommand() {
        ("up", Some(sub)) => up_command(sub).await,
        ("down", Some(sub)) => down_command(sub).await,
        _ => unreachable!("clap requires a subcommand"),
    };

    if let Err(e) = result {
        print_error_chain(&e);
        process::exit(1);
    }
    process::exit(0);
}

fn parse_filter(args: &ArgMatches<'_>) -> kraze::Result<Filter> {
    let names: Vec<String> = args
        .values_of("services")
        .map(|v| v.map(String::from).collect())
        .unwrap_or_default();

    let mut labels = Vec::new();
    if let Some(values) = args.values_of("label") {
        for raw in values {
            let mut parts = raw.splitn(2, '=');
            let key = parts.next().unwrap_or_default().to_string();
            let value = parts
                .next()
                .ok_or_else(|| ErrorKind::ConfigError(format!("--label '{}' must be key=value", raw)))?
                .to_string();
            labels.push((key, value));
        }
    }

    Ok(Filter {
        names,
        labels,
        no_deps: args.is_present("no-deps"),
    })
}

async fn up_command(args: &ArgMatches<'_>) -> kraze::Result<()> {
    let path = PathBuf::from(args.value_of("file").unwrap());
    let config = Config::load(&path)?;
    let filter = parse_filter(args)?;

    let opts = EngineOptions {
        dry_run: args.is_present("dry-run"),
        wait: !args.is_present("no-wait"),
        wait_timeout: args
            .value_of("timeout")
            .and_then(parse_duration)
            .unwrap_or_else(|| Duration::from_secs(600)),
        keep_crds: args.is_present("keep-crds"),
        quiet: false,
    };

    let engine = Engine::new(config, opts);
    match engine.up(filter).await? {
        UpOutcome::DryRun { subset } => {
            println!("would install: {}", subset.join(", "));
        }
        UpOutcome::Completed(state) => {
            info!("up complete: {} service(s) installed", state.services.len());
        }
    }
    Ok(())
}

async fn down_command(args: &ArgMatches<'_>) -> kraze::Result<()> {
    let path = PathBuf::from(args.value_of("file").unwrap());
    let config = Config::load(&path)?;
    let filter = parse_filter(args)?;

    let opts = EngineOptions {
        dry_run: false,
        wait: true,
        wait_timeout: Duration::from_secs(600),
        keep_crds: args.is_present("keep-crds"),
        quiet: false,
    };

    let engine = Engine::new(config, opts);
    let state = engine.down(filter).await?;
    info!(
        "down complete: {} service(s) remain recorded as installed",
        state.services.values().filter(|r| r.installed).count()
    );
    Ok(())
}
