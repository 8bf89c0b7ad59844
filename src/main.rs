use std::path::PathBuf;

use anyhow::{anyhow, Result};
use dotenvy::dotenv;
use tracing::{error, info};

mod config;
mod handlers;
mod llm;
mod research;
mod state;
mod utils;

use handlers::chat::{chat_command, ChatArgs};
use handlers::image::{image_command, ImageArgs, PromptPreset};
use handlers::research as research_cli;
use utils::logging::init_logging;

fn usage() -> &'static str {
    "Usage: gemini_hub <command> [options]

Research:
  plan <goal>                     Create a numbered research plan
  tasks                           List plan tasks and their selection
  select <ordinals>|all|none      Choose tasks, e.g. `select 1,3,5`
  research [--select <ordinals>]  Run deep research on the selected tasks
  resume                          Keep waiting on a research job
  status                          Check the research job once
  report [--out <file.md>]        Write the executive report
  infographic [--out <file.png>]  Render a summary infographic
  show                            Print the current session
  reset                           Discard the current session

Images:
  image [--prompt <text>] [--preset women|men|custom|slide] [--ref <path>]...
        [--aspect 1:1|16:9|9:16|4:3|3:4] [--resolution 1K|2K|4K]
        [--temperature <0-1>] [--model <name>] [--thinking <level>]
        [--compare] [--out <file>]

Chat:
  chat [--model <name>] [--thinking low|high] [--temperature <0-2>] [--attach <path>]..."
}

#[derive(Debug)]
enum Command {
    Plan(String),
    Tasks,
    Select(Vec<String>),
    Research(Option<Vec<String>>),
    Resume,
    Status,
    Report(Option<PathBuf>),
    Infographic(Option<PathBuf>),
    Show,
    Reset,
    Image(ImageArgs),
    Chat(ChatArgs),
    Help,
}

fn take_value<'a>(args: &'a [String], index: &mut usize, flag: &str) -> Result<&'a str> {
    *index += 1;
    args.get(*index)
        .map(|value| value.as_str())
        .ok_or_else(|| anyhow!("Missing value for {flag}"))
}

fn parse_out_only(args: &[String], command: &str) -> Result<Option<PathBuf>> {
    let mut out = None;
    let mut index = 0;
    while index < args.len() {
        match args[index].as_str() {
            "--out" | "-o" => out = Some(PathBuf::from(take_value(args, &mut index, "--out")?)),
            other => return Err(anyhow!("Unknown {command} argument: {other}\n{}", usage())),
        }
        index += 1;
    }
    Ok(out)
}

fn parse_f32(value: &str, flag: &str) -> Result<f32> {
    value
        .parse::<f32>()
        .map_err(|_| anyhow!("Invalid {flag} value: {value}"))
}

fn parse_image_args(args: &[String]) -> Result<ImageArgs> {
    let mut parsed = ImageArgs::default();
    let mut index = 0;
    while index < args.len() {
        match args[index].as_str() {
            "--prompt" | "-p" => {
                parsed.prompt = Some(take_value(args, &mut index, "--prompt")?.to_string())
            }
            "--preset" => {
                parsed.preset = Some(PromptPreset::parse(take_value(args, &mut index, "--preset")?)?)
            }
            "--ref" | "-r" => parsed
                .references
                .push(take_value(args, &mut index, "--ref")?.to_string()),
            "--aspect" => {
                parsed.aspect_ratio = take_value(args, &mut index, "--aspect")?.to_string()
            }
            "--resolution" => {
                parsed.resolution = take_value(args, &mut index, "--resolution")?.to_uppercase()
            }
            "--temperature" => {
                parsed.temperature =
                    parse_f32(take_value(args, &mut index, "--temperature")?, "--temperature")?
            }
            "--model" => parsed.model = Some(take_value(args, &mut index, "--model")?.to_string()),
            "--thinking" => {
                parsed.thinking_level = take_value(args, &mut index, "--thinking")?.to_uppercase()
            }
            "--compare" => parsed.compare = true,
            "--out" | "-o" => {
                parsed.out = Some(PathBuf::from(take_value(args, &mut index, "--out")?))
            }
            other if !other.starts_with('-') && parsed.prompt.is_none() => {
                parsed.prompt = Some(other.to_string())
            }
            other => return Err(anyhow!("Unknown image argument: {other}\n{}", usage())),
        }
        index += 1;
    }
    Ok(parsed)
}

fn parse_chat_args(args: &[String]) -> Result<ChatArgs> {
    let mut parsed = ChatArgs::default();
    let mut index = 0;
    while index < args.len() {
        match args[index].as_str() {
            "--model" => parsed.model = Some(take_value(args, &mut index, "--model")?.to_string()),
            "--thinking" => {
                parsed.thinking_level = take_value(args, &mut index, "--thinking")?.to_string()
            }
            "--temperature" => {
                parsed.temperature =
                    parse_f32(take_value(args, &mut index, "--temperature")?, "--temperature")?
            }
            "--attach" | "-a" => parsed
                .attachments
                .push(take_value(args, &mut index, "--attach")?.to_string()),
            other => return Err(anyhow!("Unknown chat argument: {other}\n{}", usage())),
        }
        index += 1;
    }
    Ok(parsed)
}

fn parse_command(args: &[String]) -> Result<Command> {
    let Some(name) = args.get(1) else {
        return Ok(Command::Help);
    };
    let rest = &args[2..];

    let command = match name.as_str() {
        "plan" => {
            let goal = rest.join(" ");
            if goal.trim().is_empty() {
                return Err(anyhow!("plan needs a research goal\n{}", usage()));
            }
            Command::Plan(goal)
        }
        "tasks" => Command::Tasks,
        "select" => {
            if rest.is_empty() {
                return Err(anyhow!("select needs task numbers, all or none"));
            }
            Command::Select(rest.to_vec())
        }
        "research" => match rest {
            [] => Command::Research(None),
            [flag, values @ ..] if flag == "--select" && !values.is_empty() => {
                Command::Research(Some(values.to_vec()))
            }
            _ => return Err(anyhow!("Usage: research [--select <ordinals>]")),
        },
        "resume" => Command::Resume,
        "status" => Command::Status,
        "report" => Command::Report(parse_out_only(rest, "report")?),
        "infographic" => Command::Infographic(parse_out_only(rest, "infographic")?),
        "show" => Command::Show,
        "reset" => Command::Reset,
        "image" => Command::Image(parse_image_args(rest)?),
        "chat" => Command::Chat(parse_chat_args(rest)?),
        "help" | "--help" | "-h" => Command::Help,
        other => return Err(anyhow!("Unknown command: {other}\n{}", usage())),
    };
    Ok(command)
}

async fn run(command: Command) -> Result<()> {
    match command {
        Command::Plan(goal) => research_cli::plan_command(&goal).await,
        Command::Tasks => research_cli::tasks_command().await,
        Command::Select(selection) => research_cli::select_command(&selection).await,
        Command::Research(selection) => research_cli::research_command(selection).await,
        Command::Resume => research_cli::resume_command().await,
        Command::Status => research_cli::status_command().await,
        Command::Report(out) => research_cli::report_command(out).await,
        Command::Infographic(out) => research_cli::infographic_command(out).await,
        Command::Show => research_cli::show_command().await,
        Command::Reset => research_cli::reset_command().await,
        Command::Image(args) => image_command(args).await,
        Command::Chat(args) => chat_command(args).await,
        Command::Help => {
            println!("{}", usage());
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() {
    dotenv().ok();
    let _guards = init_logging();

    let args: Vec<String> = std::env::args().collect();
    let command = match parse_command(&args) {
        Ok(command) => command,
        Err(err) => {
            eprintln!("{err}");
            std::process::exit(2);
        }
    };
    info!("Running {:?}", command);

    if let Err(err) = run(command).await {
        error!("Command failed: {err:#}");
        eprintln!("{err}");
        // Flush the log writers before exiting.
        drop(_guards);
        std::process::exit(1);
    }
}
