use anyhow::Result;
use bbor_client::models::{Refine, Study, Trial};
use bbor_client::{BborClient, ClientConfig, ClientError, FileKind, PostStudyClientParams};
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "bbor", version, about = "BBO-Rietveld client")]
struct Cli {
    /// YAML file with server, verify_cert, username and password.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// mdx, local, docker or an http(s) url.
    #[arg(long, global = true)]
    server: Option<String>,
    #[arg(long, global = true)]
    json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum KindArg {
    #[value(name = "prm")]
    Prm,
    #[value(name = "cif")]
    Cif,
    #[value(name = "seq")]
    Seq,
}

impl From<KindArg> for FileKind {
    fn from(value: KindArg) -> Self {
        match value {
            KindArg::Prm => FileKind::InstrumentParameter,
            KindArg::Cif => FileKind::Phase,
            KindArg::Seq => FileKind::Sequence,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Show the authenticated account.
    Whoami,
    Files {
        #[command(subcommand)]
        action: FilesCommand,
    },
    /// Submit a study described by a YAML task file.
    Submit {
        #[arg(long)]
        task: PathBuf,
        #[arg(long)]
        study_name: Option<String>,
        #[arg(long)]
        study_name_base: Option<String>,
        #[arg(long)]
        n_trials_total: Option<u32>,
        #[arg(long)]
        n_startup_trials: Option<u32>,
        #[arg(long)]
        random_seed: Option<u32>,
        #[arg(long = "tag")]
        tags: Vec<String>,
    },
    /// Task queue status.
    Status {
        #[arg(long)]
        study_id: Option<String>,
    },
    Study {
        #[command(subcommand)]
        action: ResourceCommand,
    },
    Trial {
        #[command(subcommand)]
        action: ResourceCommand,
    },
    Refine {
        #[command(subcommand)]
        action: ResourceCommand,
    },
    /// Parse a measurement file locally.
    Parse {
        measurement: PathBuf,
        /// Write the canonical CSV here.
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum FilesCommand {
    List {
        #[arg(long, value_enum)]
        kind: KindArg,
    },
    Upload {
        #[arg(long, value_enum)]
        kind: KindArg,
        #[arg(required = true)]
        paths: Vec<PathBuf>,
        #[arg(long)]
        overwrite: bool,
    },
    Delete {
        #[arg(long, value_enum)]
        kind: KindArg,
        #[arg(required = true)]
        names: Vec<String>,
        /// Fail on names the server does not hold instead of skipping them.
        #[arg(long)]
        strict: bool,
    },
}

#[derive(Subcommand)]
enum ResourceCommand {
    Get {
        id: String,
    },
    Search {
        /// JSON query document.
        #[arg(long, default_value = "{}")]
        query: String,
    },
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let json_mode = cli.json;
    match run_command(&cli) {
        Ok(Some(payload)) => {
            emit_json(&payload);
            Ok(())
        }
        Ok(None) => Ok(()),
        Err(err) => {
            if json_mode {
                emit_json(&error_to_json(&err));
                std::process::exit(1);
            }
            Err(err)
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn load_config(cli: &Cli) -> Result<ClientConfig> {
    let config = match &cli.config {
        Some(path) => ClientConfig::from_yaml_file(path)?,
        None => ClientConfig::default(),
    };
    let mut config = config.with_env_overrides()?;
    if let Some(server) = &cli.server {
        config.server = server.parse()?;
    }
    tracing::debug!(server = %config.server, verify_cert = config.verify_cert, "config loaded");
    Ok(config)
}

fn connect(cli: &Cli) -> Result<BborClient> {
    let config = load_config(cli)?;
    if !config.has_credentials() {
        anyhow::bail!(
            "credentials missing: set username and password in --config or BBOR_USERNAME/BBOR_PASSWORD"
        );
    }
    Ok(BborClient::connect(config)?)
}

fn run_command(cli: &Cli) -> Result<Option<Value>> {
    let json = cli.json;
    match &cli.command {
        Commands::Whoami => {
            let client = connect(cli)?;
            let me = client
                .me()
                .ok_or_else(|| anyhow::anyhow!("profile could not be fetched"))?;
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "whoami",
                    "server": client.config().server.to_string(),
                    "user": me,
                })));
            }
            println!("user: {}", me.name);
            println!("group: {}", me.group.abbr);
            println!("server: {}", client.config().server);
        }
        Commands::Files { action } => return run_files(cli, action),
        Commands::Submit {
            task,
            study_name,
            study_name_base,
            n_trials_total,
            n_startup_trials,
            random_seed,
            tags,
        } => {
            let mut params = load_task(task)?;
            if let Some(name) = study_name {
                params.study_name = Some(name.clone());
            }
            if let Some(base) = study_name_base {
                params.study_name_base = Some(base.clone());
            }
            if let Some(total) = n_trials_total {
                params.n_trials_total = *total;
            }
            if n_startup_trials.is_some() {
                params.n_startup_trials = *n_startup_trials;
            }
            if random_seed.is_some() {
                params.random_seed = *random_seed;
            }
            params.tags.extend(tags.iter().cloned());

            let mut client = connect(cli)?;
            let submission = client.submit_study(&params)?;
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "submit",
                    "submission": submission,
                })));
            }
            println!("study_id: {}", submission.study_id);
        }
        Commands::Status { study_id } => {
            let client = connect(cli)?;
            let status = client.ask_task_queue_status(study_id.as_deref())?;
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "status",
                    "status": status,
                })));
            }
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Commands::Study { action } => {
            let client = connect(cli)?;
            return match action {
                ResourceCommand::Get { id } => {
                    let study = client.get_study(id)?;
                    render(json, "study", &study, || print_study(&study))
                }
                ResourceCommand::Search { query } => {
                    let studies = client.search_studies(&parse_query(query)?)?;
                    render(json, "study", &studies, || {
                        for study in &studies {
                            println!("{}  {}  {}", study.id, study.status, study.name);
                        }
                    })
                }
            };
        }
        Commands::Trial { action } => {
            let client = connect(cli)?;
            return match action {
                ResourceCommand::Get { id } => {
                    let trial = client.get_trial(id)?;
                    render(json, "trial", &trial, || print_trial(&trial))
                }
                ResourceCommand::Search { query } => {
                    let trials = client.search_trials(&parse_query(query)?)?;
                    render(json, "trial", &trials, || {
                        for trial in &trials {
                            print_trial(trial);
                        }
                    })
                }
            };
        }
        Commands::Refine { action } => {
            let client = connect(cli)?;
            return match action {
                ResourceCommand::Get { id } => {
                    let refine = client.get_refine(id)?;
                    render(json, "refine", &refine, || print_refine(&refine))
                }
                ResourceCommand::Search { query } => {
                    let refines = client.search_refines(&parse_query(query)?)?;
                    render(json, "refine", &refines, || {
                        for refine in &refines {
                            print_refine(refine);
                        }
                    })
                }
            };
        }
        Commands::Parse { measurement, out } => {
            let parsed = bbor_client::parsers::parse_file(measurement)?;
            if let Some(path) = out {
                std::fs::write(path, parsed.histogram.to_csv_bytes())?;
            }
            let header_lines = parsed.histogram.header.lines().count();
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "parse",
                    "source": parsed.source_name,
                    "csv_name": parsed.csv_name(),
                    "points": parsed.histogram.len(),
                    "header_lines": header_lines,
                    "out": out.as_ref().map(|p| p.display().to_string()),
                })));
            }
            println!("source: {}", parsed.source_name);
            println!("csv_name: {}", parsed.csv_name());
            println!("points: {}", parsed.histogram.len());
            println!("header_lines: {}", header_lines);
            if let Some(path) = out {
                println!("written: {}", path.display());
            }
        }
    }
    Ok(None)
}

fn run_files(cli: &Cli, action: &FilesCommand) -> Result<Option<Value>> {
    let mut client = connect(cli)?;
    match action {
        FilesCommand::List { kind } => {
            let kind = FileKind::from(*kind);
            let names = client.list_files(kind)?;
            if cli.json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "files list",
                    "kind": kind.as_str(),
                    "files": names,
                })));
            }
            for name in names {
                println!("{}", name);
            }
        }
        FilesCommand::Upload {
            kind,
            paths,
            overwrite,
        } => {
            let kind = FileKind::from(*kind);
            let mut acks = Vec::new();
            for path in paths {
                acks.push(client.upload_file(kind, path, *overwrite)?);
                if !cli.json {
                    println!("uploaded: {}", path.display());
                }
            }
            if cli.json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "files upload",
                    "kind": kind.as_str(),
                    "responses": acks,
                    "files": client.registry().names(kind),
                })));
            }
        }
        FilesCommand::Delete {
            kind,
            names,
            strict,
        } => {
            let kind = FileKind::from(*kind);
            let ack = client.delete_files(kind, names, !strict)?;
            if cli.json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "files delete",
                    "kind": kind.as_str(),
                    "response": ack,
                    "files": client.registry().names(kind),
                })));
            }
            match ack {
                Some(_) => println!("remaining: {}", client.registry().names(kind).join(", ")),
                None => println!("nothing to delete"),
            }
        }
    }
    Ok(None)
}

/// Reads a task YAML; relative paths are taken from the task file's directory.
fn load_task(path: &Path) -> Result<PostStudyClientParams> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read task {}: {}", path.display(), e))?;
    let params: PostStudyClientParams = serde_yaml::from_str(&raw)?;
    let base = path.parent().unwrap_or_else(|| Path::new("."));
    Ok(rebase_paths(params, base))
}

fn rebase_paths(mut params: PostStudyClientParams, base: &Path) -> PostStudyClientParams {
    let rebase = |p: &mut PathBuf| {
        if p.is_relative() {
            *p = base.join(&*p);
        }
    };
    params.inputdir.iter_mut().for_each(rebase);
    params.gpxfile.iter_mut().for_each(rebase);
    params.measurementfile.iter_mut().for_each(rebase);
    params.prmfile.iter_mut().for_each(rebase);
    params.ciffiles.iter_mut().flatten().for_each(rebase);
    params
}

fn parse_query(raw: &str) -> Result<Value> {
    serde_json::from_str(raw).map_err(|e| anyhow::anyhow!("invalid --query json: {}", e))
}

fn render<T: serde::Serialize>(
    json: bool,
    command: &str,
    value: &T,
    print: impl FnOnce(),
) -> Result<Option<Value>> {
    if json {
        return Ok(Some(json!({
            "ok": true,
            "command": command,
            "result": serde_json::to_value(value)?,
        })));
    }
    print();
    Ok(None)
}

fn print_study(study: &Study) {
    println!("study_id: {}", study.id);
    println!("study_name: {}", study.name);
    println!("status: {}", study.status);
    println!(
        "trials: {}/{} (startup {})",
        study.trials.len(),
        study.n_trials_total,
        study.n_startup_trials
    );
    println!("random_seed: {}", study.random_seed_fix);
    for best in &study.best_trials {
        println!(
            "best[{}]: trial {} Rwp={} GOF={}",
            best.approach, best.trial_num, best.rwp, best.gof
        );
    }
}

fn print_trial(trial: &Trial) {
    let rwp = trial
        .rwp()
        .map(|r| r.to_string())
        .unwrap_or_else(|| "-".to_string());
    println!(
        "trial {} ({}): refines={} Rwp={}",
        trial.num,
        trial.id,
        trial.refines.len(),
        rwp
    );
}

fn print_refine(refine: &Refine) {
    let rval = &refine.body.rvalues;
    println!(
        "refine {} step {}: converged={} Rwp={:?} GOF={:?}",
        refine.id, refine.body.sequence_index, rval.converged, rval.rwp, rval.gof
    );
}

fn emit_json(value: &Value) {
    match serde_json::to_string(value) {
        Ok(s) => println!("{}", s),
        Err(_) => println!(
            "{{\"ok\":false,\"error\":{{\"code\":\"serialization_error\",\"message\":\"failed to serialize JSON payload\",\"details\":{{}}}}}}"
        ),
    }
}

fn json_error(code: &str, message: String, details: Value) -> Value {
    json!({
        "ok": false,
        "error": {
            "code": code,
            "message": message,
            "details": details
        }
    })
}

fn error_to_json(err: &anyhow::Error) -> Value {
    let Some(client_err) = err.downcast_ref::<ClientError>() else {
        return json_error("command_failed", err.to_string(), json!({}));
    };
    let code = match client_err {
        ClientError::Validation(_) => "validation_error",
        ClientError::NameCollision { .. } => "name_collision",
        ClientError::NotAuthenticated => "not_authenticated",
        ClientError::AuthenticationRejected { .. } => "authentication_rejected",
        ClientError::Transport { .. } => "transport_error",
        ClientError::Parse(_) => "parse_error",
        ClientError::Config(_) => "config_error",
        _ => "command_failed",
    };
    let details = match client_err {
        ClientError::Transport { endpoint, .. } => {
            let (status, body) = client_err.http_status().unwrap_or((0, ""));
            json!({"endpoint": endpoint, "status": status, "body": body})
        }
        _ => match client_err.http_status() {
            Some((status, body)) => json!({"status": status, "body": body}),
            None => json!({}),
        },
    };
    json_error(code, client_err.to_string(), details)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_paths_are_relative_to_the_task_file() {
        let params: PostStudyClientParams = serde_yaml::from_str(
            "study_name_base: run\nmeasurementfile: data/scan.csv\nprmfile: /abs/inst.prm\nciffiles: [quartz.cif]\n",
        )
        .expect("yaml");
        let params = rebase_paths(params, Path::new("/tasks"));
        assert_eq!(
            params.measurementfile,
            Some(PathBuf::from("/tasks/data/scan.csv"))
        );
        assert_eq!(params.prmfile, Some(PathBuf::from("/abs/inst.prm")));
        assert_eq!(
            params.ciffiles,
            Some(vec![PathBuf::from("/tasks/quartz.cif")])
        );
    }

    #[test]
    fn transport_errors_expose_status_and_body() {
        let err = anyhow::Error::from(ClientError::Transport {
            endpoint: "/task/study".to_string(),
            status: 422,
            body: "{\"detail\":\"bad\"}".to_string(),
        });
        let payload = error_to_json(&err);
        assert_eq!(payload["ok"], false);
        assert_eq!(payload["error"]["code"], "transport_error");
        assert_eq!(payload["error"]["details"]["status"], 422);
        assert_eq!(payload["error"]["details"]["body"], "{\"detail\":\"bad\"}");
    }

    #[test]
    fn other_errors_use_generic_code() {
        let payload = error_to_json(&anyhow::anyhow!("boom"));
        assert_eq!(payload["error"]["code"], "command_failed");
        assert_eq!(payload["error"]["message"], "boom");
    }

    #[test]
    fn cli_parses_nested_file_commands() {
        let cli = Cli::try_parse_from([
            "bbor", "--json", "files", "delete", "--kind", "cif", "a.cif", "b.cif",
        ])
        .expect("parse");
        assert!(cli.json);
        match cli.command {
            Commands::Files {
                action: FilesCommand::Delete { kind, names, strict },
            } => {
                assert_eq!(FileKind::from(kind), FileKind::Phase);
                assert_eq!(names, vec!["a.cif".to_string(), "b.cif".to_string()]);
                assert!(!strict);
            }
            _ => panic!("unexpected command"),
        }
    }
}
