//! Command-line argument parsing.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("Missing command. Run with --help for usage.")]
    MissingCommand,

    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    #[error("Missing argument: {0}")]
    MissingArgument(&'static str),

    #[error("Invalid value for {flag}: {value}")]
    InvalidValue { flag: &'static str, value: String },
}

/// Options for `storytree new`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewOptions {
    pub premise: String,
    pub style: Option<String>,
    pub audience: Option<String>,
    pub tone: Option<String>,
    pub min_chapters: Option<u32>,
    pub max_chapters: Option<u32>,
    pub out: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    New(NewOptions),
    Run {
        path: PathBuf,
        batch: Option<usize>,
        until_done: bool,
    },
    Status {
        path: PathBuf,
    },
    Tree {
        path: PathBuf,
    },
    Help,
}

impl Command {
    /// Whether the command calls the text generator.
    pub fn needs_services(&self) -> bool {
        matches!(self, Command::New(_) | Command::Run { .. })
    }
}

/// Parse the full argument list, program name included.
pub fn parse_args(args: &[String]) -> Result<Command, CliError> {
    if args.iter().any(|a| a == "--help" || a == "-h") {
        return Ok(Command::Help);
    }

    let rest = args.get(1..).unwrap_or_default();
    let (command, rest) = rest.split_first().ok_or(CliError::MissingCommand)?;

    match command.as_str() {
        "new" => parse_new(rest).map(Command::New),
        "run" => parse_run(rest),
        "status" => Ok(Command::Status {
            path: positional_path(rest)?,
        }),
        "tree" => Ok(Command::Tree {
            path: positional_path(rest)?,
        }),
        "help" => Ok(Command::Help),
        other => Err(CliError::UnknownCommand(other.to_string())),
    }
}

fn parse_new(args: &[String]) -> Result<NewOptions, CliError> {
    let mut options = NewOptions {
        premise: String::new(),
        style: None,
        audience: None,
        tone: None,
        min_chapters: None,
        max_chapters: None,
        out: None,
    };

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--style" => options.style = Some(flag_value(args, &mut i, "--style")?),
            "--audience" => options.audience = Some(flag_value(args, &mut i, "--audience")?),
            "--tone" => options.tone = Some(flag_value(args, &mut i, "--tone")?),
            "--min" => options.min_chapters = Some(parse_number(args, &mut i, "--min")?),
            "--max" => options.max_chapters = Some(parse_number(args, &mut i, "--max")?),
            "--out" => options.out = Some(PathBuf::from(flag_value(args, &mut i, "--out")?)),
            word => {
                if !options.premise.is_empty() {
                    options.premise.push(' ');
                }
                options.premise.push_str(word);
            }
        }
        i += 1;
    }

    if options.premise.trim().is_empty() {
        return Err(CliError::MissingArgument("premise"));
    }
    Ok(options)
}

fn parse_run(args: &[String]) -> Result<Command, CliError> {
    let mut path = None;
    let mut batch = None;
    let mut until_done = false;

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--batch" => batch = Some(parse_number(args, &mut i, "--batch")?),
            "--until-done" => until_done = true,
            other => {
                if path.is_none() {
                    path = Some(PathBuf::from(other));
                }
            }
        }
        i += 1;
    }

    Ok(Command::Run {
        path: path.ok_or(CliError::MissingArgument("snapshot path"))?,
        batch,
        until_done,
    })
}

fn positional_path(args: &[String]) -> Result<PathBuf, CliError> {
    args.iter()
        .find(|a| !a.starts_with("--"))
        .map(PathBuf::from)
        .ok_or(CliError::MissingArgument("snapshot path"))
}

/// Take the value following the flag at `i`, advancing past it.
fn flag_value(args: &[String], i: &mut usize, flag: &'static str) -> Result<String, CliError> {
    let value = args.get(*i + 1).ok_or(CliError::MissingArgument(flag))?;
    *i += 1;
    Ok(value.clone())
}

fn parse_number<T: std::str::FromStr>(
    args: &[String],
    i: &mut usize,
    flag: &'static str,
) -> Result<T, CliError> {
    let value = flag_value(args, i, flag)?;
    value
        .parse()
        .map_err(|_| CliError::InvalidValue { flag, value })
}

pub fn print_help() {
    println!("storytree - generate branching illustrated stories");
    println!();
    println!("USAGE:");
    println!("  storytree new <PREMISE> [OPTIONS]   Create a story and its opening chapter");
    println!("  storytree run <PATH> [OPTIONS]      Generate pending chapters");
    println!("  storytree status <PATH>             Show generation progress");
    println!("  storytree tree <PATH>               Print the chapter outline");
    println!();
    println!("NEW OPTIONS:");
    println!("  --style <TAG>       Art style (watercolor, anime, comic, storybook, noir, realistic)");
    println!("  --audience <TEXT>   Target audience");
    println!("  --tone <TEXT>       Narrative tone");
    println!("  --min <N>           Minimum chapters along any path");
    println!("  --max <N>           Maximum chapters along any path");
    println!("  --out <PATH>        Snapshot file (defaults to <title>.story.json)");
    println!();
    println!("RUN OPTIONS:");
    println!("  --batch <N>         Chapters per batch");
    println!("  --until-done        Keep running batches until no chapters are pending");
    println!();
    println!("ENVIRONMENT:");
    println!("  ANTHROPIC_API_KEY                 Required for new and run");
    println!("  IMAGE_API_URL, IMAGE_API_KEY      Enable illustrations");
    println!("  SPEECH_API_KEY                    Enable narration");
    println!("  STORAGE_DIR, STORAGE_UPLOAD_URL   Where media is stored");
    println!("  RUST_LOG                          Log filter (default: info)");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(line: &str) -> Vec<String> {
        std::iter::once("storytree")
            .chain(line.split_whitespace())
            .map(String::from)
            .collect()
    }

    #[test]
    fn test_parse_new() {
        let command = parse_args(&args(
            "new a fox who collects keys --style noir --min 3 --max 6 --out fox.json",
        ))
        .unwrap();
        let Command::New(options) = command else {
            panic!("expected new, got {command:?}");
        };
        assert_eq!(options.premise, "a fox who collects keys");
        assert_eq!(options.style.as_deref(), Some("noir"));
        assert_eq!(options.min_chapters, Some(3));
        assert_eq!(options.max_chapters, Some(6));
        assert_eq!(options.out, Some(PathBuf::from("fox.json")));
        assert_eq!(options.tone, None);
    }

    #[test]
    fn test_parse_run() {
        assert_eq!(
            parse_args(&args("run fox.json --batch 4 --until-done")).unwrap(),
            Command::Run {
                path: PathBuf::from("fox.json"),
                batch: Some(4),
                until_done: true,
            }
        );
        assert_eq!(
            parse_args(&args("status fox.json")).unwrap(),
            Command::Status {
                path: PathBuf::from("fox.json")
            }
        );
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(parse_args(&args("")), Err(CliError::MissingCommand)));
        assert!(matches!(
            parse_args(&args("publish x")),
            Err(CliError::UnknownCommand(_))
        ));
        assert!(matches!(
            parse_args(&args("new --min 3")),
            Err(CliError::MissingArgument("premise"))
        ));
        assert!(matches!(
            parse_args(&args("run fox.json --batch many")),
            Err(CliError::InvalidValue { flag: "--batch", .. })
        ));
        assert!(matches!(
            parse_args(&args("tree")),
            Err(CliError::MissingArgument(_))
        ));
        assert_eq!(parse_args(&args("run x --help")).unwrap(), Command::Help);
    }

    #[test]
    fn test_only_generating_commands_need_services() {
        assert!(parse_args(&args("run x")).unwrap().needs_services());
        assert!(!parse_args(&args("status x")).unwrap().needs_services());
    }
}
