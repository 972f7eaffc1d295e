use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use dialoguer::Password;
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use cheesegrader::app::{
    self, App, CopyRequest, DownloadRequest, NoProgress, Outcome, ProgressSink,
    ProgressSinkKind, SortRequest, UploadRequest,
};
use cheesegrader::config::{ConfigLoader, ResolvedConfig};
use cheesegrader::credentials::{Credentials, TOKEN_ENV_VAR, TokenStore};
use cheesegrader::domain::{AssignmentId, CourseId, FailurePolicy, UploadMode};
use cheesegrader::error::GraderError;
use cheesegrader::interactive::Interactive;
use cheesegrader::lms::LmsHttpClient;
use cheesegrader::output::{JsonOutput, OutputMode, TextOutput};
use cheesegrader::table::{GRADE_COLUMN, ID_COLUMN};
use cheesegrader::tui::Tui;

#[derive(Parser)]
#[command(name = "cheesegrader")]
#[command(about = "Grading logistics against a Canvas-style LMS: uploads, downloads, sorting")]
#[command(version, author)]
struct Cli {
    /// Print JSON results and skip prompts and the progress screen.
    #[arg(long, global = true)]
    non_interactive: bool,

    #[arg(long, global = true)]
    config: Option<String>,

    /// API token; takes precedence over the saved token file.
    #[arg(long, global = true, env = TOKEN_ENV_VAR, hide_env_values = true)]
    token: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Save, check or remove the API token")]
    Token(TokenArgs),
    #[command(about = "Upload grades and/or feedback files to an assignment")]
    Upload(UploadArgs),
    #[command(about = "Download the student list or assignment submissions")]
    Download(DownloadArgs),
    #[command(about = "Copy files into per-row folders driven by a CSV")]
    Sort(SortArgs),
    #[command(about = "Copy one file once per CSV row, named from row fields")]
    Copy(CopyArgs),
    #[command(about = "Replace LMS ids in file names with SIS ids")]
    Rename(RenameArgs),
    #[command(about = "Extract a zip archive")]
    Unzip(UnzipArgs),
}

#[derive(Args)]
struct TokenArgs {
    #[command(subcommand)]
    command: TokenCommand,
}

#[derive(Subcommand)]
enum TokenCommand {
    #[command(about = "Validate a token and save it")]
    Set,
    #[command(about = "Check the current token against the LMS")]
    Check,
    #[command(about = "Delete the saved token file")]
    Clear,
}

#[derive(Args)]
struct UploadArgs {
    #[arg(long)]
    course: CourseId,

    #[arg(long)]
    assignment: AssignmentId,

    #[arg(long)]
    csv: PathBuf,

    #[arg(long, value_enum, default_value_t = UploadMode::Grades)]
    mode: UploadMode,

    #[arg(long, default_value = ID_COLUMN)]
    id_column: String,

    #[arg(long, default_value = GRADE_COLUMN)]
    grade_column: String,

    /// Directory searched for student files; repeatable.
    #[arg(long = "dir")]
    dirs: Vec<PathBuf>,

    /// Search subdirectories of each --dir as well.
    #[arg(long)]
    recursive: bool,

    #[arg(long, value_enum)]
    policy: Option<FailurePolicy>,
}

#[derive(Args)]
struct DownloadArgs {
    #[command(subcommand)]
    command: DownloadCommand,
}

#[derive(Subcommand)]
enum DownloadCommand {
    #[command(about = "Write {course}_student_list.csv")]
    Students {
        #[arg(long)]
        course: CourseId,
        #[arg(long, default_value = ".")]
        output: PathBuf,
    },
    #[command(about = "Download every submission attachment")]
    Submissions {
        #[arg(long)]
        course: CourseId,
        #[arg(long)]
        assignment: AssignmentId,
        #[arg(long, default_value = ".")]
        output: PathBuf,
        /// Fetch the LMS bulk zip and extract it instead.
        #[arg(long)]
        archive: bool,
        #[arg(long, value_enum)]
        policy: Option<FailurePolicy>,
    },
}

#[derive(Args)]
struct SortArgs {
    #[arg(long)]
    csv: PathBuf,
    #[arg(long)]
    name_column: String,
    #[arg(long)]
    folder_column: String,
    #[arg(long)]
    source: PathBuf,
    #[arg(long)]
    dest: PathBuf,
}

#[derive(Args)]
struct CopyArgs {
    #[arg(long)]
    file: PathBuf,
    #[arg(long)]
    csv: PathBuf,
    /// Column used in the new name; repeatable, joined in order.
    #[arg(long = "field", required = true)]
    fields: Vec<String>,
    #[arg(long)]
    dest: PathBuf,
}

#[derive(Args)]
struct RenameArgs {
    #[arg(long)]
    course: CourseId,
    #[arg(long)]
    dir: PathBuf,
}

#[derive(Args)]
struct UnzipArgs {
    archive: PathBuf,
    #[arg(long)]
    dest: PathBuf,
}

struct Context {
    config: ResolvedConfig,
    store: TokenStore,
    token: Option<String>,
    output_mode: OutputMode,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<GraderError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &GraderError) -> u8 {
    match error {
        GraderError::UnsupportedGroupAssignment { .. } => 4,
        error if error.is_remote() => 3,
        GraderError::InvalidCourseId(_)
        | GraderError::InvalidAssignmentId(_)
        | GraderError::MissingToken
        | GraderError::InvalidToken(_)
        | GraderError::ConfigRead(_)
        | GraderError::ConfigParse(_)
        | GraderError::MissingColumn(_)
        | GraderError::Csv(_)
        | GraderError::InvalidPath(_)
        | GraderError::InvalidPattern(_)
        | GraderError::Validation(_) => 2,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = if cli.non_interactive {
        OutputMode::NonInteractive
    } else {
        OutputMode::Interactive
    };

    let config = ConfigLoader::resolve(cli.config.as_deref())?;
    let store = TokenStore::for_config(&config)?;
    let ctx = Context {
        config,
        store,
        token: cli.token,
        output_mode,
    };

    match cli.command {
        Some(Commands::Token(args)) => run_token(args.command, &ctx),
        Some(Commands::Upload(args)) => {
            let request = UploadRequest {
                course: args.course,
                assignment: args.assignment,
                mode: args.mode,
                csv: args.csv,
                id_column: args.id_column,
                grade_column: args.grade_column,
                directories: args.dirs,
                recursive: args.recursive,
                policy: args.policy,
            };
            run_remote(&ctx, ProgressSinkKind::Upload, move |app, sink| {
                app.upload(&request, sink)
            })
        }
        Some(Commands::Download(args)) => match args.command {
            DownloadCommand::Students { course, output } => {
                run_remote(&ctx, ProgressSinkKind::StudentList, move |app, sink| {
                    app.download_student_list(course, &output, sink)
                })
            }
            DownloadCommand::Submissions {
                course,
                assignment,
                output,
                archive,
                policy,
            } => {
                let request = DownloadRequest {
                    course,
                    assignment,
                    destination: output,
                    archive,
                    policy,
                };
                run_remote(&ctx, ProgressSinkKind::Download, move |app, sink| {
                    app.download_submissions(&request, sink)
                })
            }
        },
        Some(Commands::Rename(args)) => {
            run_remote(&ctx, ProgressSinkKind::Rename, move |app, sink| {
                app.rename_submissions(args.course, &args.dir, sink)
            })
        }
        Some(Commands::Sort(args)) => {
            let request = SortRequest {
                csv: args.csv,
                name_column: args.name_column,
                folder_column: args.folder_column,
                source: args.source,
                destination: args.dest,
            };
            let result = app::sort_directory(&request, &ctx.config, &NoProgress)?;
            emit(&result, ctx.output_mode)
        }
        Some(Commands::Copy(args)) => {
            let request = CopyRequest {
                csv: args.csv,
                name_fields: args.fields,
                source_file: args.file,
                destination: args.dest,
            };
            let result = app::copy_template(&request, &NoProgress)?;
            emit(&result, ctx.output_mode)
        }
        Some(Commands::Unzip(args)) => {
            let result = app::unzip(&args.archive, &args.dest, &NoProgress)?;
            emit(&result, ctx.output_mode)
        }
        None => match ctx.output_mode {
            OutputMode::Interactive => {
                let credentials = ctx
                    .token
                    .as_deref()
                    .map(|token| Credentials::new(token))
                    .transpose()?;
                Interactive::new(ctx.config, ctx.store, credentials).run()
            }
            OutputMode::NonInteractive => Err(miette::Report::msg(
                "command required (try `cheesegrader --help`)",
            )),
        },
    }
}

fn run_token(command: TokenCommand, ctx: &Context) -> miette::Result<()> {
    match command {
        TokenCommand::Set => {
            let raw = match (&ctx.token, ctx.output_mode) {
                (Some(token), _) => token.clone(),
                (None, OutputMode::Interactive) => Password::new()
                    .with_prompt("Paste your LMS API token")
                    .interact()
                    .into_diagnostic()?,
                (None, OutputMode::NonInteractive) => return Err(GraderError::MissingToken.into()),
            };
            let credentials = Credentials::new(raw)?;
            let app = App::new(LmsHttpClient::new(&ctx.config, &credentials)?, ctx.config.clone());
            let result = app.check_token()?;
            if !result.valid {
                return Err(GraderError::InvalidToken(format!(
                    "{} did not accept the token",
                    ctx.config.base_url
                ))
                .into());
            }
            ctx.store.save(&credentials)?;
            emit(&result, ctx.output_mode)
        }
        TokenCommand::Check => {
            let app = App::new(build_client(ctx)?, ctx.config.clone());
            let result = app.check_token()?;
            emit(&result, ctx.output_mode)
        }
        TokenCommand::Clear => {
            let removed = ctx.store.delete()?;
            match ctx.output_mode {
                OutputMode::NonInteractive => {
                    println!("{}", serde_json::json!({ "cleared": removed }));
                }
                OutputMode::Interactive if removed => println!("Deleted {}", ctx.store.path()),
                OutputMode::Interactive => println!("No saved token at {}", ctx.store.path()),
            }
            Ok(())
        }
    }
}

fn credentials(ctx: &Context) -> Result<Credentials, GraderError> {
    if let Some(token) = &ctx.token {
        return Credentials::new(token.clone());
    }
    ctx.store.load()?.ok_or(GraderError::MissingToken)
}

fn build_client(ctx: &Context) -> Result<LmsHttpClient, GraderError> {
    LmsHttpClient::new(&ctx.config, &credentials(ctx)?)
}

fn run_remote<F, R>(ctx: &Context, kind: ProgressSinkKind, job: F) -> miette::Result<()>
where
    F: FnOnce(&App<LmsHttpClient>, &dyn ProgressSink) -> Result<R, GraderError> + Send + 'static,
    R: Outcome + Send + 'static,
{
    let app = App::new(build_client(ctx)?, ctx.config.clone());
    match ctx.output_mode {
        OutputMode::NonInteractive => {
            let result = job(&app, &JsonOutput)?;
            emit(&result, ctx.output_mode)
        }
        OutputMode::Interactive => {
            let mut tui = Tui::new(kind);
            let result = tui.run(move |sink| job(&app, sink))?;
            tui.finish(result.summary())?;
            emit(&result, ctx.output_mode)
        }
    }
}

fn emit<T: Outcome>(result: &T, mode: OutputMode) -> miette::Result<()> {
    match mode {
        OutputMode::NonInteractive => JsonOutput::print(result).into_diagnostic(),
        OutputMode::Interactive => TextOutput::print(result).into_diagnostic(),
    }
}
