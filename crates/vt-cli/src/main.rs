use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use std::path::PathBuf;
use std::process::ExitCode;
use vt_cli::{
    describe, exit_code, load_violations, logging, reconcile, report_status, runner_from_settings,
    write_report, CliSettings, LogFormat, EXIT_FATAL, EXIT_OK,
};
use vt_status::BuildStatus;

fn violations_arg() -> Arg {
    Arg::new("violations")
        .long("violations")
        .required(true)
        .value_parser(value_parser!(PathBuf))
        .help("Violation document (JSON)")
}

fn output_arg() -> Arg {
    Arg::new("output")
        .long("output")
        .short('o')
        .value_parser(value_parser!(PathBuf))
        .help("Write the JSON report here instead of stdout")
}

fn cli() -> Command {
    Command::new("vt")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Reconcile policy violations into issue-tracker tickets")
        .subcommand_required(true)
        .arg(
            Arg::new("config")
                .long("config")
                .short('c')
                .global(true)
                .default_value("vt.toml")
                .value_parser(value_parser!(PathBuf))
                .help("Settings file (TOML or YAML)"),
        )
        .arg(
            Arg::new("verbose")
                .long("verbose")
                .short('v')
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Debug-level logging"),
        )
        .arg(
            Arg::new("log-json")
                .long("log-json")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Log as JSON lines"),
        )
        .subcommand(
            Command::new("reconcile")
                .about("Create, update and transition tickets")
                .arg(violations_arg())
                .arg(output_arg())
                .arg(
                    Arg::new("dry-run")
                        .long("dry-run")
                        .action(ArgAction::SetTrue)
                        .help("Plan and log payloads without writing"),
                ),
        )
        .subcommand(
            Command::new("plan")
                .about("Show the operations a run would perform")
                .arg(violations_arg())
                .arg(output_arg()),
        )
        .subcommand(Command::new("validate").about("Check the settings file"))
        .subcommand(
            Command::new("status")
                .about("Post a build status to the source-control host")
                .arg(Arg::new("commit").long("commit").required(true).help("Commit hash"))
                .arg(
                    Arg::new("failed")
                        .long("failed")
                        .action(ArgAction::SetTrue)
                        .help("Report a failing evaluation"),
                )
                .arg(Arg::new("url").long("url").required(true).help("Evaluation report link"))
                .arg(Arg::new("description").long("description").help("Status description")),
        )
}

async fn dispatch(settings: CliSettings, matches: &ArgMatches) -> anyhow::Result<u8> {
    match matches.subcommand() {
        Some((name @ ("reconcile" | "plan"), args)) => {
            let Some(path) = args.get_one::<PathBuf>("violations") else {
                anyhow::bail!("--violations is required");
            };
            let violations = load_violations(path)?;
            let plan_only = name == "plan" || args.get_flag("dry-run");
            let fail_on_write_error = settings.notification.fail_on_write_error;

            let runner = runner_from_settings(&settings)?;
            let report = reconcile(&runner, &violations, plan_only).await?;
            write_report(&report, args.get_one::<PathBuf>("output").map(PathBuf::as_path))?;
            Ok(exit_code(&report, fail_on_write_error))
        }
        Some(("validate", _)) => {
            println!("ok: {}", describe(&settings));
            Ok(EXIT_OK)
        }
        Some(("status", args)) => {
            let commit = args.get_one::<String>("commit").cloned().unwrap_or_default();
            let url = args.get_one::<String>("url").cloned().unwrap_or_default();
            let mut status = BuildStatus::new(commit, !args.get_flag("failed"), url);
            if let Some(description) = args.get_one::<String>("description") {
                status = status.with_description(description);
            }
            report_status(&settings, &status).await?;
            Ok(EXIT_OK)
        }
        _ => anyhow::bail!("unknown command"),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let matches = cli().get_matches();
    let verbose = matches.get_flag("verbose");
    let format = if matches.get_flag("log-json") {
        LogFormat::Json
    } else {
        LogFormat::Text
    };

    let config_path = matches
        .get_one::<PathBuf>("config")
        .cloned()
        .unwrap_or_else(|| PathBuf::from("vt.toml"));
    let settings = match CliSettings::load(&config_path) {
        Ok(settings) => settings,
        Err(err) => {
            logging::init(verbose, format);
            tracing::error!(path = %config_path.display(), error = %err, "invalid settings");
            return ExitCode::from(EXIT_FATAL);
        }
    };
    logging::init(verbose || settings.notification.verbose_logging, format);

    match dispatch(settings, &matches).await {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            let message = format!("{err:#}");
            tracing::error!(error = %message, "run failed");
            ExitCode::from(EXIT_FATAL)
        }
    }
}
