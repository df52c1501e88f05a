// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

mod config;
mod runtime;

use anyhow::{Context, Result, anyhow, bail};
use config::Config;
use runtime::{Completion, PlanningSource, Runtime};
use snapbridge_app::{
    ActionKind, LoadedPlan, Plan, PlanId, PreviewRow, SessionCommand, SessionEvent,
    TimeBucketNormalizer,
};
use snapbridge_console::{Endpoint, SendEvent, UdpTransport};
use std::env;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() {
    init_logging();
    if let Err(error) = run() {
        eprintln!("{error:#}");
        std::process::exit(1);
    }
}

fn init_logging() {
    let filter =
        EnvFilter::try_from_env("SNAPBRIDGE_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .try_init();
}

fn run() -> Result<()> {
    let options = parse_cli_args(env::args().skip(1), Config::default_path()?)?;
    if options.show_help {
        print_help();
        return Ok(());
    }

    if options.print_config_path {
        println!("{}", options.config_path.display());
        return Ok(());
    }

    if options.print_example {
        print!("{}", Config::example_config(&options.config_path));
        return Ok(());
    }

    let Some(command) = options.command else {
        print_help();
        return Ok(());
    };

    let mut config = Config::load(&options.config_path).with_context(|| {
        format!(
            "load config {}; run `snapbridge --print-example-config` to generate a template",
            options.config_path.display()
        )
    })?;

    let client = snapbridge_pco::Client::new(
        config.pco_base_url(),
        config.pco_credentials()?,
        config.pco_timeout()?,
    )
    .with_context(|| {
        format!(
            "invalid [pco] config in {}; fix base_url/timeout values",
            options.config_path.display()
        )
    })?;
    let normalizer = TimeBucketNormalizer::new(config.time_zone())?;
    let mut runtime = Runtime::new(client, normalizer, config.preselect());

    match command {
        Command::Test => {
            runtime.start_test_connection()?;
            runtime.wait(ActionKind::TestConnection)?;
            println!("Connected to PCO.");
        }
        Command::Types => {
            runtime.start_fetch_types()?;
            runtime.wait(ActionKind::FetchTypes)?;
            let saved = config
                .saved_service_type()
                .map(|service_type| service_type.id.clone());
            for service_type in &runtime.session().service_types {
                let marker = if saved.as_ref() == Some(&service_type.id) {
                    "*"
                } else {
                    " "
                };
                println!("{marker} {:<10} {}", service_type.id.as_str(), service_type.name);
            }
        }
        Command::Plans => {
            select_service_type(&mut runtime, &mut config, &options)?;
            fetch_plans(&mut runtime, &config, &options)?;
            let session = runtime.session();
            let selected = session.selected_plan.as_ref().map(|plan| plan.id.clone());
            for plan in &session.plans {
                let marker = if selected.as_ref() == Some(&plan.id) {
                    "*"
                } else {
                    " "
                };
                println!("{marker} {:<10} {}", plan.id.as_str(), plan.label());
            }
        }
        Command::Times => {
            load_plan(&mut runtime, &mut config, &options)?;
            let session = runtime.session();
            if let Some(plan) = &session.plan {
                print!("{}", render_times(plan, &session.selected_labels));
            }
        }
        Command::Preview => {
            let rows = prepare_preview(&mut runtime, &mut config, &options)?;
            print!("{}", render_preview(&rows));
        }
        Command::Send => {
            let rows = prepare_preview(&mut runtime, &mut config, &options)?;
            print!("{}", render_preview(&rows));
            if rows.is_empty() {
                bail!("nothing to send; the selected times have no cues");
            }

            let endpoint =
                config.console_endpoint(options.host.as_deref(), options.port.as_deref())?;
            let interval = config.command_interval()?;
            let prompt = format!(
                "Send {} snapshot(s) to the DiGiCo console at {endpoint}?",
                rows.len()
            );
            if !options.assume_yes && !confirm(&prompt, &mut io::stdin().lock())? {
                println!("Cancelled.");
                return Ok(());
            }

            send_preview(&mut runtime, &endpoint, interval)?;
        }
    }

    Ok(())
}

fn select_service_type<S: PlanningSource>(
    runtime: &mut Runtime<S>,
    config: &mut Config,
    options: &CliOptions,
) -> Result<()> {
    let service_type = match &options.service_type {
        Some(id) => {
            runtime.start_fetch_types()?;
            runtime.wait(ActionKind::FetchTypes)?;
            let found = runtime
                .session()
                .service_types
                .iter()
                .find(|service_type| service_type.id.as_str() == id)
                .cloned()
                .ok_or_else(|| {
                    anyhow!("service type {id} not found; run `snapbridge types` to list them")
                })?;
            config.remember_service_type(&found);
            config.save(&options.config_path).with_context(|| {
                format!("remember service type in {}", options.config_path.display())
            })?;
            found
        }
        None => config.saved_service_type().cloned().ok_or_else(|| {
            anyhow!("no service type selected; pass --type <id> (see `snapbridge types`)")
        })?,
    };
    info!(service_type = %service_type.id, "using service type {}", service_type.name);
    runtime.dispatch(SessionCommand::SelectServiceType(service_type));
    Ok(())
}

fn fetch_plans<S: PlanningSource>(
    runtime: &mut Runtime<S>,
    config: &Config,
    options: &CliOptions,
) -> Result<()> {
    let count = parse_plan_count(options.count.as_deref(), config.plan_count());
    runtime.start_fetch_plans(count)?;
    runtime.wait(ActionKind::FetchPlans)?;
    if runtime.session().plans.is_empty() {
        bail!("no upcoming plans for this service type");
    }
    Ok(())
}

fn load_plan<S: PlanningSource>(
    runtime: &mut Runtime<S>,
    config: &mut Config,
    options: &CliOptions,
) -> Result<()> {
    select_service_type(runtime, config, options)?;
    fetch_plans(runtime, config, options)?;

    if let Some(id) = &options.plan {
        let wanted = PlanId::new(id.as_str());
        let plan: Plan = runtime
            .session()
            .plans
            .iter()
            .find(|plan| plan.id == wanted)
            .cloned()
            .ok_or_else(|| {
                anyhow!("plan {id} is not among the upcoming plans; run `snapbridge plans`")
            })?;
        runtime.dispatch(SessionCommand::SelectPlan(plan));
    }

    runtime.start_load_times()?;
    match runtime.wait(ActionKind::LoadTimes)? {
        Completion::TimesLoaded {
            buckets,
            preselected,
        } => info!(buckets, ?preselected, "plan times loaded"),
        other => bail!("unexpected completion {other:?} while loading plan times"),
    }
    Ok(())
}

fn prepare_preview<S: PlanningSource>(
    runtime: &mut Runtime<S>,
    config: &mut Config,
    options: &CliOptions,
) -> Result<Vec<PreviewRow>> {
    load_plan(runtime, config, options)?;
    if !options.times.is_empty() {
        runtime.dispatch(SessionCommand::SelectTimes(options.times.clone()));
    }
    runtime.dispatch(SessionCommand::SetOffsetPolicy(
        config.offset_policy(options.existing.as_deref()),
    ));

    for event in runtime.dispatch(SessionCommand::BuildPreview) {
        if let SessionEvent::PreviewRejected(error) = event {
            return Err(error.into());
        }
    }
    Ok(runtime
        .session()
        .preview
        .as_ref()
        .map(|preview| preview.rows.clone())
        .unwrap_or_default())
}

fn send_preview<S: PlanningSource>(
    runtime: &mut Runtime<S>,
    endpoint: &Endpoint,
    interval: std::time::Duration,
) -> Result<()> {
    let transport = UdpTransport::open(endpoint)?;
    runtime.start_send(transport, interval)?;
    let completion = runtime.wait_with(ActionKind::Send, |event| match event {
        SendEvent::Sent { snap_index, name } => println!("  {snap_index:>4}  {name}"),
        SendEvent::Failed(failure) => println!(
            "  {:>4}  {} failed: {}",
            failure.snap_index,
            failure.step.as_str(),
            failure.error
        ),
    })?;
    let Completion::Sent(report) = completion else {
        bail!("unexpected completion {completion:?} while sending");
    };

    println!("Done. Created/renamed {} snapshot(s).", report.succeeded);
    if !report.failures.is_empty() {
        bail!(
            "{} console command(s) failed; check the console address and network",
            report.failures.len()
        );
    }
    Ok(())
}

/// Non-numeric or non-positive counts fall back to the configured value.
fn parse_plan_count(raw: Option<&str>, fallback: u32) -> u32 {
    raw.and_then(|value| value.trim().parse::<u32>().ok())
        .filter(|count| *count > 0)
        .unwrap_or(fallback)
}

fn confirm<R: BufRead>(prompt: &str, input: &mut R) -> Result<bool> {
    print!("{prompt} [y/N] ");
    io::stdout().flush().context("flush prompt")?;
    let mut answer = String::new();
    input.read_line(&mut answer).context("read confirmation")?;
    Ok(matches!(
        answer.trim().to_ascii_lowercase().as_str(),
        "y" | "yes"
    ))
}

fn render_times(plan: &LoadedPlan, selected: &[String]) -> String {
    let mut out = String::new();
    for label in plan.labels().labels() {
        let marker = if selected.iter().any(|chosen| chosen == label) {
            "*"
        } else {
            " "
        };
        out.push_str(&format!("{marker} {label}\n"));
    }
    out
}

fn render_preview(rows: &[PreviewRow]) -> String {
    if rows.is_empty() {
        return "No cues for the selected times.\n".to_owned();
    }
    let mut out = format!("{:>4}  {:>5}  {}\n", "#", "Index", "Name");
    for row in rows {
        out.push_str(&format!("{:>4}  {:>5}  {}\n", row.seq, row.snap_index, row.name));
    }
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Test,
    Types,
    Plans,
    Times,
    Preview,
    Send,
}

impl Command {
    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "test" => Some(Self::Test),
            "types" => Some(Self::Types),
            "plans" => Some(Self::Plans),
            "times" => Some(Self::Times),
            "preview" => Some(Self::Preview),
            "send" => Some(Self::Send),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct CliOptions {
    config_path: PathBuf,
    command: Option<Command>,
    service_type: Option<String>,
    plan: Option<String>,
    count: Option<String>,
    times: Vec<String>,
    existing: Option<String>,
    host: Option<String>,
    port: Option<String>,
    assume_yes: bool,
    print_config_path: bool,
    print_example: bool,
    show_help: bool,
}

fn parse_cli_args<I, S>(args: I, default_config_path: PathBuf) -> Result<CliOptions>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut options = CliOptions {
        config_path: default_config_path,
        command: None,
        service_type: None,
        plan: None,
        count: None,
        times: Vec::new(),
        existing: None,
        host: None,
        port: None,
        assume_yes: false,
        print_config_path: false,
        print_example: false,
        show_help: false,
    };

    let mut iter = args.into_iter();
    while let Some(arg) = iter.next() {
        match arg.as_ref() {
            "--config" => {
                let value = iter
                    .next()
                    .ok_or_else(|| anyhow!("--config requires a file path"))?;
                options.config_path = PathBuf::from(value.as_ref());
            }
            "--type" => options.service_type = Some(next_value("--type", &mut iter)?),
            "--plan" => options.plan = Some(next_value("--plan", &mut iter)?),
            "--count" => options.count = Some(next_value("--count", &mut iter)?),
            "--time" => options.times.push(next_value("--time", &mut iter)?),
            "--existing" => options.existing = Some(next_value("--existing", &mut iter)?),
            "--host" => options.host = Some(next_value("--host", &mut iter)?),
            "--port" => options.port = Some(next_value("--port", &mut iter)?),
            "--yes" | "-y" => {
                options.assume_yes = true;
            }
            "--print-config-path" => {
                options.print_config_path = true;
            }
            "--print-example-config" => {
                options.print_example = true;
            }
            "--help" | "-h" => {
                options.show_help = true;
            }
            other => match Command::parse(other) {
                Some(command) if options.command.is_none() => options.command = Some(command),
                Some(_) => bail!("only one command may be given; run with --help for usage"),
                None => bail!("unknown argument {other:?}; run with --help to see supported options"),
            },
        }
    }

    Ok(options)
}

fn next_value<S: AsRef<str>>(flag: &str, iter: &mut impl Iterator<Item = S>) -> Result<String> {
    iter.next()
        .map(|value| value.as_ref().to_owned())
        .ok_or_else(|| anyhow!("{flag} requires a value"))
}

fn print_help() {
    println!("snapbridge: turn Planning Center cues into DiGiCo snapshots");
    println!();
    println!("usage: snapbridge [options] <command>");
    println!();
    println!("commands:");
    println!("  test                     Check PCO credentials");
    println!("  types                    List service types (* = remembered)");
    println!("  plans                    List upcoming plans");
    println!("  times                    List a plan's service times (* = selected)");
    println!("  preview                  Show the snapshots that would be created");
    println!("  send                     Create and name snapshots on the console");
    println!();
    println!("options:");
    println!("  --config <path>          Use a specific config path");
    println!("  --type <id>              Service type to use (remembered in config)");
    println!("  --plan <id>              Plan to use (default: next upcoming)");
    println!("  --count <n>              Number of upcoming plans to fetch");
    println!("  --time <label>           Select a service time; repeat for more");
    println!("  --existing <n>           Console already holds n snapshots");
    println!("  --host <host>            Console host");
    println!("  --port <port>            Console OSC port");
    println!("  --yes                    Send without asking for confirmation");
    println!("  --print-config-path      Print resolved config path");
    println!("  --print-example-config   Print a config template");
    println!("  --help                   Show this help");
}
