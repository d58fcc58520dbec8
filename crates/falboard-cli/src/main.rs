use std::io::{self, ErrorKind, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use falboard_contracts::chat::{help_lines, parse_command, FormCommand};
use falboard_contracts::events::EventWriter;
use falboard_contracts::form::{
    render_field, FormError, FormState, RequestState, REQUIRED_PARAMETER,
};
use falboard_contracts::models::ModelRegistry;
use falboard_engine::{
    default_client_registry, FalConfig, FormSession, GenerationClient, RequestOptions,
};

#[derive(Debug, Parser)]
#[command(name = "falboard", version, about = "Schema-driven image generation form")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List registered models.
    Models,
    /// Show the form fields and defaults for a model.
    Params(ParamsArgs),
    /// Fill the form from flags and submit once.
    Generate(GenerateArgs),
    /// Interactive form session.
    Form(FormArgs),
}

#[derive(Debug, Args)]
struct ParamsArgs {
    #[arg(long)]
    model: Option<String>,
}

#[derive(Debug, Args)]
struct ClientArgs {
    /// Generation client: `fal` or `dryrun`.
    #[arg(long, default_value = "fal")]
    client: String,
    #[arg(long, default_value_t = 5000)]
    poll_interval_ms: u64,
    /// Do not request queue logs while polling.
    #[arg(long)]
    no_logs: bool,
    /// Give up polling after this many seconds (default: wait indefinitely).
    #[arg(long)]
    timeout_secs: Option<u64>,
    /// Append session events to this JSONL file.
    #[arg(long)]
    events: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct GenerateArgs {
    #[arg(long)]
    model: Option<String>,
    #[arg(long)]
    prompt: String,
    /// Field override as `name=value`; repeatable.
    #[arg(long = "set", value_name = "NAME=VALUE")]
    fields: Vec<String>,
    #[arg(long)]
    random_seed: bool,
    #[arg(long)]
    streaming: bool,
    #[command(flatten)]
    client: ClientArgs,
}

#[derive(Debug, Args)]
struct FormArgs {
    #[arg(long)]
    model: Option<String>,
    #[command(flatten)]
    client: ClientArgs,
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("falboard error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let registry = Arc::new(ModelRegistry::builtin().context("built-in model table is invalid")?);
    match cli.command {
        Command::Models => {
            for option in registry.list() {
                println!("{:<24} {}", option.id, option.label);
            }
            Ok(0)
        }
        Command::Params(args) => {
            let form = FormState::new(registry, args.model.as_deref())?;
            print_form(&form);
            Ok(0)
        }
        Command::Generate(args) => run_generate(registry, args),
        Command::Form(args) => {
            run_form(registry, args)?;
            Ok(0)
        }
    }
}

fn open_session(
    registry: Arc<ModelRegistry>,
    model: Option<&str>,
    args: &ClientArgs,
) -> Result<FormSession> {
    let form = FormState::new(registry, model)?;
    let client = resolve_client(args)?;
    let events = EventWriter::with_path(args.events.clone(), uuid::Uuid::new_v4().to_string());
    let options = RequestOptions {
        poll_interval: Duration::from_millis(args.poll_interval_ms.max(1)),
        logs: !args.no_logs,
    };
    FormSession::new(form, client, events, options)
}

fn resolve_client(args: &ClientArgs) -> Result<Arc<dyn GenerationClient>> {
    let fal = FalConfig::from_env().with_poll_timeout(args.timeout_secs.map(Duration::from_secs));
    let clients = default_client_registry(fal)?;
    match clients.get(args.client.trim()) {
        Some(client) => Ok(client),
        None => bail!(
            "unknown client '{}' (available: {})",
            args.client,
            clients.names().join(", ")
        ),
    }
}

fn run_generate(registry: Arc<ModelRegistry>, args: GenerateArgs) -> Result<i32> {
    let mut session = open_session(registry, args.model.as_deref(), &args.client)?;
    session.set_field_text(REQUIRED_PARAMETER, &args.prompt)?;
    for assignment in &args.fields {
        let Some((name, value)) = assignment.split_once('=') else {
            bail!("--set expects NAME=VALUE, got '{assignment}'");
        };
        session.set_field_text(name.trim(), value)?;
    }
    if args.random_seed {
        match session.randomize_seed()? {
            Some(seed) => eprintln!("seed: {seed}"),
            None => eprintln!("model has no seed parameter; --random-seed ignored"),
        }
    }
    session.set_streaming(args.streaming)?;

    eprintln!(
        "Generating with {} via {}...",
        session.form().selected_model(),
        session.client_name()
    );
    match session.submit()? {
        RequestState::Succeeded(urls) => {
            for url in urls {
                println!("{url}");
            }
            Ok(0)
        }
        RequestState::Failed(message) => {
            eprintln!("{message}");
            Ok(1)
        }
        other => bail!("generation ended in unexpected state '{}'", other.label()),
    }
}

fn run_form(registry: Arc<ModelRegistry>, args: FormArgs) -> Result<()> {
    let mut session = open_session(registry, args.model.as_deref(), &args.client)?;
    let stdin = io::stdin();
    let mut line = String::new();

    println!(
        "Form for {} ({}). Type /help for commands.",
        session.form().spec().label,
        session.form().selected_model()
    );

    loop {
        if session.poll_completion() {
            print_request_state(session.request_state());
        }
        print!("> ");
        io::stdout().flush()?;

        line.clear();
        let read = match stdin.read_line(&mut line) {
            Ok(read) => read,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        };
        if read == 0 {
            break;
        }

        match parse_command(line.trim_end_matches(['\n', '\r'])) {
            FormCommand::Noop => {}
            FormCommand::Quit => break,
            FormCommand::Help => {
                for help in help_lines() {
                    println!("{help}");
                }
            }
            FormCommand::Models => {
                for option in session.form().registry().list() {
                    let marker = if option.id == session.form().selected_model() {
                        "*"
                    } else {
                        " "
                    };
                    println!("{marker} {:<24} {}", option.id, option.label);
                }
            }
            FormCommand::SelectModel(model) => match session.select_model(&model) {
                Ok(()) => {
                    println!("Model set to {model}");
                    print_form(session.form());
                }
                Err(err) => println!("{err:#}"),
            },
            FormCommand::Show => print_form(session.form()),
            FormCommand::Set { field, value } => match session.set_field_text(&field, &value) {
                Ok(stored) => println!("{field} = {stored}"),
                Err(err) => println!("{err:#}"),
            },
            FormCommand::RandomizeSeed => match session.randomize_seed() {
                Ok(Some(seed)) => println!("seed = {seed}"),
                Ok(None) => println!("This model has no integer seed parameter."),
                Err(err) => println!("{err:#}"),
            },
            FormCommand::Stream(flag) => {
                let streaming = flag.unwrap_or(!session.form().streaming());
                match session.set_streaming(streaming) {
                    Ok(()) => println!("streaming = {streaming}"),
                    Err(err) => println!("{err:#}"),
                }
            }
            FormCommand::Prompt(prompt) => {
                if let Err(err) = session.set_field_text(REQUIRED_PARAMETER, &prompt) {
                    println!("{err:#}");
                    continue;
                }
                start_submit(&mut session);
            }
            FormCommand::Submit => start_submit(&mut session),
            FormCommand::Status => print_request_state(session.request_state()),
            FormCommand::Wait => {
                if !session.form().is_in_flight() {
                    print_request_state(session.request_state());
                    continue;
                }
                while !session.wait_completion(Duration::from_secs(1))? {
                    if !session.form().is_in_flight() {
                        break;
                    }
                }
                print_request_state(session.request_state());
            }
            FormCommand::Invalid(message) => println!("{message}"),
        }
    }
    Ok(())
}

fn start_submit(session: &mut FormSession) {
    match session.submit_in_background() {
        Ok(()) => println!("Generating... (/status or /wait)"),
        Err(err) => match err.downcast_ref::<FormError>() {
            Some(FormError::Validation(field_error)) => {
                println!("{}: {}", field_error.field, field_error.message)
            }
            Some(FormError::InFlight) => println!("A generation is already running."),
            _ => println!("{err:#}"),
        },
    }
}

fn print_form(form: &FormState) {
    println!("{} [{}]", form.spec().label, form.selected_model());
    for param in &form.spec().parameters {
        let error = form
            .field_error()
            .filter(|error| error.field == param.name)
            .map(|error| error.message.as_str());
        println!(
            "  {}",
            render_field(param, form.field_value(&param.name), error)
        );
    }
    println!("  streaming = {}", form.streaming());
}

fn print_request_state(state: &RequestState) {
    match state {
        RequestState::Idle => println!("Idle."),
        RequestState::InFlight => println!("Generating..."),
        RequestState::Succeeded(urls) => {
            println!("Generated {} image(s):", urls.len());
            for url in urls {
                println!("  {url}");
            }
        }
        RequestState::Failed(message) => println!("{message}"),
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::{Cli, Command};

    #[test]
    fn generate_accepts_repeated_set_flags() {
        let cli = Cli::try_parse_from([
            "falboard",
            "generate",
            "--prompt",
            "a fox in the snow",
            "--set",
            "num_images=2",
            "--set",
            "image_size=square_hd",
            "--client",
            "dryrun",
        ])
        .unwrap();
        let Command::Generate(args) = cli.command else {
            panic!("expected generate");
        };
        assert_eq!(args.fields, vec!["num_images=2", "image_size=square_hd"]);
        assert_eq!(args.client.client, "dryrun");
        assert_eq!(args.client.poll_interval_ms, 5000);
        assert!(!args.client.no_logs);
        assert!(args.client.timeout_secs.is_none());
    }

    #[test]
    fn generate_requires_prompt() {
        assert!(Cli::try_parse_from(["falboard", "generate"]).is_err());
    }
}
